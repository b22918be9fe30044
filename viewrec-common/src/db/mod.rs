//! Database initialization and catalog helpers

pub mod catalog;
pub mod init;

pub use catalog::*;
pub use init::*;
