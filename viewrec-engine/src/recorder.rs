//! Dedup recorder
//!
//! Turns a confirmed view into at most one ledger row per
//! (viewer, content). The check-then-insert sequence is not atomic on its
//! own; a concurrent writer that wins the race surfaces as a unique
//! violation on our insert, which is reported as `AlreadyRecorded`.
//!
//! **Outcomes:**
//! - no viewer → [`RecordError::NotAuthenticated`], no ledger call
//! - viewer is the creator → `SelfView`, no ledger call
//! - row exists / lost the insert race → `AlreadyRecorded`
//! - row inserted → `Recorded`
//! - anything else (including timeouts) → [`RecordError::PersistenceFailure`]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use viewrec_common::events::{EngagementEvent, EventBus, RecordReason};
use viewrec_common::{ContentId, ViewerId};

use crate::ledger::{LedgerError, ViewLedger};

/// Record attempt failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("no authenticated viewer")]
    NotAuthenticated,

    /// Retryable by a later confirmation; never retried inline
    #[error("failed to persist view: {0}")]
    PersistenceFailure(#[source] LedgerError),
}

/// Result of one record attempt
pub type RecordOutcome = Result<RecordReason, RecordError>;

/// Idempotent view writer
#[derive(Clone)]
pub struct ViewRecorder {
    ledger: Arc<dyn ViewLedger>,
    timeout: Duration,
    events: Option<Arc<EventBus>>,
}

impl ViewRecorder {
    /// Each ledger call is bounded by `timeout`
    pub fn new(ledger: Arc<dyn ViewLedger>, timeout: Duration) -> Self {
        Self {
            ledger,
            timeout,
            events: None,
        }
    }

    /// Publish outcomes on `events`
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Record a view of `content_id` by `viewer_id`
    pub async fn record(
        &self,
        viewer_id: Option<ViewerId>,
        content_id: ContentId,
        creator_id: ViewerId,
    ) -> RecordOutcome {
        let Some(viewer_id) = viewer_id else {
            debug!(content_id = %content_id, "Record skipped: not authenticated");
            return Err(RecordError::NotAuthenticated);
        };

        let outcome = self.record_for(viewer_id, content_id, creator_id).await;
        self.publish(viewer_id, content_id, &outcome);
        outcome
    }

    async fn record_for(
        &self,
        viewer_id: ViewerId,
        content_id: ContentId,
        creator_id: ViewerId,
    ) -> RecordOutcome {
        if viewer_id == creator_id {
            debug!(viewer_id = %viewer_id, content_id = %content_id, "Self-view, not recorded");
            return Ok(RecordReason::SelfView);
        }

        let exists = self
            .bounded(self.ledger.exists(viewer_id, content_id))
            .await
            .map_err(RecordError::PersistenceFailure)?;
        if exists {
            debug!(viewer_id = %viewer_id, content_id = %content_id, "View already recorded");
            return Ok(RecordReason::AlreadyRecorded);
        }

        let viewed_at = viewrec_common::time::now();
        match self.bounded(self.ledger.insert(viewer_id, content_id, viewed_at)).await {
            Ok(()) => {
                info!(viewer_id = %viewer_id, content_id = %content_id, "View recorded");
                Ok(RecordReason::Recorded)
            }
            Err(LedgerError::UniqueViolation) => {
                debug!(
                    viewer_id = %viewer_id,
                    content_id = %content_id,
                    "Concurrent insert won, treating as already recorded"
                );
                Ok(RecordReason::AlreadyRecorded)
            }
            Err(e) => Err(RecordError::PersistenceFailure(e)),
        }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, LedgerError>>,
    ) -> Result<T, LedgerError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(self.timeout)),
        }
    }

    fn publish(&self, viewer_id: ViewerId, content_id: ContentId, outcome: &RecordOutcome) {
        let timestamp = viewrec_common::time::now();
        let event = match outcome {
            Ok(reason) => EngagementEvent::ViewRecorded {
                viewer_id,
                content_id,
                reason: *reason,
                timestamp,
            },
            Err(e) => {
                warn!(viewer_id = %viewer_id, content_id = %content_id, error = %e, "View record failed");
                EngagementEvent::ViewRecordFailed {
                    viewer_id,
                    content_id,
                    reason: e.to_string(),
                    timestamp,
                }
            }
        };
        if let Some(events) = &self.events {
            events.emit_lossy(event);
        }
    }
}
