//! View ledger contract
//!
//! The ledger is the only shared mutable resource in the engine. It must
//! enforce "one view per (viewer, content)" itself and report a violation
//! as [`LedgerError::UniqueViolation`]; the recorder relies on that to stay
//! correct under concurrent writers.

mod memory;
mod sqlite;

pub use memory::{LedgerCalls, MemoryLedger};
pub use sqlite::SqliteLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use viewrec_common::models::ViewHistoryEntry;
use viewrec_common::{ContentId, ViewerId};

/// Ledger failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// Insert rejected by the (viewer, content) uniqueness constraint
    #[error("view already recorded for this viewer and content")]
    UniqueViolation,

    /// Call did not complete within the configured bound
    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),

    /// Any other storage or transport failure
    #[error("ledger backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => LedgerError::UniqueViolation,
            _ => LedgerError::Backend(err.to_string()),
        }
    }
}

impl From<viewrec_common::Error> for LedgerError {
    fn from(err: viewrec_common::Error) -> Self {
        match err {
            viewrec_common::Error::Database(db) => db.into(),
            other => LedgerError::Backend(other.to_string()),
        }
    }
}

/// Persistence contract consumed by the recorder and the aggregator
#[async_trait]
pub trait ViewLedger: Send + Sync {
    /// Whether a view exists for the pair
    async fn exists(&self, viewer_id: ViewerId, content_id: ContentId) -> Result<bool, LedgerError>;

    /// Persist a view; `UniqueViolation` if one already exists
    async fn insert(
        &self,
        viewer_id: ViewerId,
        content_id: ContentId,
        viewed_at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    /// Total views for a content item
    async fn count(&self, content_id: ContentId) -> Result<u64, LedgerError>;

    /// A viewer's views, newest first, joined with content and creator metadata
    async fn list_for_viewer(
        &self,
        viewer_id: ViewerId,
        limit: usize,
    ) -> Result<Vec<ViewHistoryEntry>, LedgerError>;
}
