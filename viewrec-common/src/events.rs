//! Engagement events and EventBus
//!
//! Every tracked element publishes its lifecycle on a shared
//! `tokio::sync::broadcast` channel. Nothing in the engine depends on a
//! subscriber being present; listeners are for hosts (SSE, audit logs) and
//! tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{ContentId, ElementId, ViewerId};

/// Successful outcome of a record attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordReason {
    /// A new view row was written
    Recorded,
    /// A row already existed (or a concurrent recorder won the insert)
    AlreadyRecorded,
    /// The viewer is the content's creator; nothing is written
    SelfView,
}

/// What satisfied the confirmation criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmCause {
    /// Continuous engagement reached the dwell threshold
    Dwell,
    /// Interaction-grade signal (click, playback ended)
    Interaction,
}

/// Engagement event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngagementEvent {
    /// Observers attached and a dwell instance is running
    TrackingStarted {
        element_id: ElementId,
        viewer_id: ViewerId,
        content_id: ContentId,
        timestamp: DateTime<Utc>,
    },

    /// A dwell instance reached `Confirmed`
    ViewConfirmed {
        element_id: ElementId,
        viewer_id: ViewerId,
        content_id: ContentId,
        cause: ConfirmCause,
        timestamp: DateTime<Utc>,
    },

    /// Recorder finished with a non-error outcome
    ViewRecorded {
        viewer_id: ViewerId,
        content_id: ContentId,
        reason: RecordReason,
        timestamp: DateTime<Utc>,
    },

    /// Recorder hit a ledger failure; a later confirmation may retry
    ViewRecordFailed {
        viewer_id: ViewerId,
        content_id: ContentId,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Dwell instance torn down (unmount, detach or completion)
    TrackingStopped {
        element_id: ElementId,
        content_id: ContentId,
        /// Whether the instance ended with a successful record outcome
        recorded: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast channel for [`EngagementEvent`]s
pub struct EventBus {
    tx: broadcast::Sender<EngagementEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<EngagementEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: EngagementEvent,
    ) -> Result<usize, broadcast::error::SendError<EngagementEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: EngagementEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded_event() -> EngagementEvent {
        EngagementEvent::ViewRecorded {
            viewer_id: ViewerId::new(),
            content_id: ContentId::new(),
            reason: RecordReason::Recorded,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        assert!(bus.emit(recorded_event()).is_err());
        // lossy variant must not panic
        bus.emit_lossy(recorded_event());
    }

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.emit(recorded_event()).unwrap(), 1);

        match rx.recv().await.unwrap() {
            EngagementEvent::ViewRecorded { reason, .. } => {
                assert_eq!(reason, RecordReason::Recorded)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(recorded_event()).unwrap();
        assert_eq!(json["type"], "ViewRecorded");
        assert_eq!(json["reason"], "recorded");
    }
}
