//! Read side: view counts and viewer history

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;
use viewrec_common::config::EngagementConfig;
use viewrec_common::models::ViewHistoryEntry;
use viewrec_common::{ContentId, ViewerId};

use crate::ledger::{LedgerError, ViewLedger};

/// A viewer's history page
///
/// On failure `entries` is empty and `error` carries the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewHistory {
    pub entries: Vec<ViewHistoryEntry>,
    pub error: Option<String>,
}

/// Queries over the view ledger
///
/// Every query is bounded by the configured ledger timeout.
#[derive(Clone)]
pub struct ViewAggregator {
    ledger: Arc<dyn ViewLedger>,
    config: EngagementConfig,
}

impl ViewAggregator {
    pub fn new(ledger: Arc<dyn ViewLedger>, config: EngagementConfig) -> Self {
        Self { ledger, config }
    }

    /// Total recorded views for a content item
    pub async fn count(&self, content_id: ContentId) -> Result<u64, LedgerError> {
        self.bounded(self.ledger.count(content_id)).await
    }

    /// Newest-first history, `limit` clamped to the configured bounds
    pub async fn list_for_viewer(&self, viewer_id: ViewerId, limit: usize) -> ViewHistory {
        let limit = self.config.history_limit(limit);
        match self.bounded(self.ledger.list_for_viewer(viewer_id, limit)).await {
            Ok(entries) => ViewHistory { entries, error: None },
            Err(e) => {
                warn!(viewer_id = %viewer_id, error = %e, "Failed to load view history");
                ViewHistory {
                    entries: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        let timeout = self.config.ledger_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(timeout)),
        }
    }
}
