//! # Viewrec Common Library
//!
//! Shared code for the view recording workspace including:
//! - Identifier newtypes and ledger models
//! - Engagement event types (EngagementEvent enum) and EventBus
//! - Configuration loading and root folder resolution
//! - Database initialization
//! - Time helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod ids;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use ids::{ContentId, ElementId, ViewerId};
