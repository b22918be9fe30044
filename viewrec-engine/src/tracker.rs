//! View tracker
//!
//! Wires one pipeline per tracked element: signal subscription, dwell
//! machine, recorder. Each instance runs on its own tokio task and owns all
//! of its state; nothing is shared between instances except the ledger.
//!
//! **Instance loop:** signals are handled strictly in arrival order, timer
//! fires are delivered through the machine's channel, and the task exits when
//! the view has a successful outcome, the element is unmounted, or the
//! [`TrackingHandle`] is cancelled. Every exit path tears the machine down
//! and detaches the element observers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use viewrec_common::config::EngagementConfig;
use viewrec_common::events::{EngagementEvent, EventBus, RecordReason};
use viewrec_common::models::ContentKind;
use viewrec_common::{ContentId, ElementId, ViewerId};

use crate::dwell::{Confirmation, DwellMachine, DwellPhase};
use crate::entitlement::EntitlementCheck;
use crate::identity::IdentityProvider;
use crate::ledger::LedgerError;
use crate::recorder::{RecordError, ViewRecorder};
use crate::signal::{self, backend_for, Element, SignalStream, SourceKind};
use crate::timer::DwellTimer;

/// What to track on an element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackTarget {
    pub content_id: ContentId,
    pub creator_id: ViewerId,
    pub kind: ContentKind,
    /// Backends to attach; empty means the kind's defaults
    #[serde(default)]
    pub sources: Vec<SourceKind>,
}

impl TrackTarget {
    pub fn new(content_id: ContentId, creator_id: ViewerId, kind: ContentKind) -> Self {
        Self {
            content_id,
            creator_id,
            kind,
            sources: Vec::new(),
        }
    }

    pub fn with_sources(mut self, sources: impl IntoIterator<Item = SourceKind>) -> Self {
        self.sources = sources.into_iter().collect();
        self
    }

    /// Requested backends, or visibility + interaction for images and
    /// playback for media
    pub fn effective_sources(&self) -> Vec<SourceKind> {
        if !self.sources.is_empty() {
            return self.sources.clone();
        }
        match self.kind {
            ContentKind::Image => vec![SourceKind::Visibility, SourceKind::Interaction],
            ContentKind::Media => vec![SourceKind::Media],
        }
    }
}

/// How an instance ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InstanceOutcome {
    /// Successful record outcome, if one was reached
    pub recorded: Option<RecordReason>,
    pub final_phase: DwellPhase,
}

/// Owner's handle on a running instance
///
/// Dropping the handle cancels the instance.
pub struct TrackingHandle {
    element_id: ElementId,
    content_id: ContentId,
    cancel: CancellationToken,
    task: Option<JoinHandle<InstanceOutcome>>,
}

impl TrackingHandle {
    pub fn element_id(&self) -> ElementId {
        self.element_id
    }

    pub fn content_id(&self) -> ContentId {
        self.content_id
    }

    /// Whether the instance task has exited
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel the instance and wait for it to wind down
    ///
    /// A record call already in flight is allowed to complete first.
    pub async fn untrack(mut self) -> Option<InstanceOutcome> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the instance to end on its own
    pub async fn finished(mut self) -> Option<InstanceOutcome> {
        self.join().await
    }

    async fn join(&mut self) -> Option<InstanceOutcome> {
        let task = self.task.take()?;
        match task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(element_id = %self.element_id, error = %e, "Tracking task failed");
                None
            }
        }
    }
}

impl Drop for TrackingHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TrackingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingHandle")
            .field("element_id", &self.element_id)
            .field("content_id", &self.content_id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Starts and owns nothing but the recipe for tracking instances
#[derive(Clone)]
pub struct ViewTracker {
    config: EngagementConfig,
    recorder: ViewRecorder,
    entitlements: Arc<dyn EntitlementCheck>,
    timer: Arc<dyn DwellTimer>,
    events: Arc<EventBus>,
}

impl ViewTracker {
    pub fn new(
        config: EngagementConfig,
        recorder: ViewRecorder,
        entitlements: Arc<dyn EntitlementCheck>,
        timer: Arc<dyn DwellTimer>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            config,
            recorder,
            entitlements,
            timer,
            events,
        }
    }

    pub fn config(&self) -> &EngagementConfig {
        &self.config
    }

    /// Begin tracking `target` on `element` for the current viewer
    ///
    /// Returns `None` when tracking is disabled, the viewer is anonymous, or
    /// the viewer is not entitled to a paid image. An entitlement lookup
    /// that fails or outlasts the ledger timeout also skips tracking. Must be called from
    /// within a tokio runtime.
    pub async fn track(
        &self,
        identity: &dyn IdentityProvider,
        element: &Element,
        target: TrackTarget,
    ) -> Option<TrackingHandle> {
        if !self.config.auto_track {
            debug!(content_id = %target.content_id, "Auto-tracking disabled");
            return None;
        }

        let Some(viewer_id) = identity.current_viewer() else {
            debug!(content_id = %target.content_id, "Anonymous viewer, not tracking");
            return None;
        };

        if self.config.require_entitlement && target.kind == ContentKind::Image {
            let timeout = self.config.ledger_timeout();
            let lookup = self.entitlements.is_entitled(viewer_id, target.content_id);
            let entitled = tokio::time::timeout(timeout, lookup)
                .await
                .unwrap_or(Err(LedgerError::Timeout(timeout)));
            match entitled {
                Ok(true) => {}
                Ok(false) => {
                    debug!(viewer_id = %viewer_id, content_id = %target.content_id, "Viewer not entitled, not tracking");
                    return None;
                }
                Err(e) => {
                    warn!(
                        viewer_id = %viewer_id,
                        content_id = %target.content_id,
                        error = %e,
                        "Entitlement lookup failed, not tracking"
                    );
                    return None;
                }
            }
        }

        let backends = target
            .effective_sources()
            .into_iter()
            .map(|kind| {
                backend_for(
                    kind,
                    self.config.visibility_threshold_ratio,
                    self.config.root_margin,
                )
            })
            .collect();
        let stream = signal::subscribe(element, target.content_id, backends);

        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let machine = DwellMachine::new(
            target.content_id,
            self.config.min_dwell(target.kind),
            self.timer.clone(),
            fire_tx,
        );

        let instance = Instance {
            element_id: element.id(),
            viewer_id,
            content_id: target.content_id,
            creator_id: target.creator_id,
            recorder: self.recorder.clone(),
            events: self.events.clone(),
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(instance.run(stream, machine, fire_rx, cancel.clone()));

        info!(
            element_id = %element.id(),
            viewer_id = %viewer_id,
            content_id = %target.content_id,
            kind = %target.kind,
            "Tracking started"
        );
        self.events.emit_lossy(EngagementEvent::TrackingStarted {
            element_id: element.id(),
            viewer_id,
            content_id: target.content_id,
            timestamp: viewrec_common::time::now(),
        });

        Some(TrackingHandle {
            element_id: element.id(),
            content_id: target.content_id,
            cancel,
            task: Some(task),
        })
    }
}

struct Instance {
    element_id: ElementId,
    viewer_id: ViewerId,
    content_id: ContentId,
    creator_id: ViewerId,
    recorder: ViewRecorder,
    events: Arc<EventBus>,
}

impl Instance {
    async fn run(
        self,
        mut stream: SignalStream,
        mut machine: DwellMachine,
        mut fire_rx: mpsc::UnboundedReceiver<crate::dwell::TimerFired>,
        cancel: CancellationToken,
    ) -> InstanceOutcome {
        let mut recorded = None;

        loop {
            let confirmation = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(element_id = %self.element_id, "Tracking cancelled");
                    break;
                }
                signal = stream.recv() => match signal {
                    Some(signal) => machine.on_signal(&signal),
                    None => {
                        debug!(element_id = %self.element_id, "Element detached");
                        break;
                    }
                },
                Some(fired) = fire_rx.recv() => {
                    machine.on_timer_fired(fired, viewrec_common::time::now())
                }
            };

            let Some(confirmation) = confirmation else {
                continue;
            };

            // Not raced against cancellation: the record is idempotent
            match self.record(confirmation).await {
                Ok(reason) => {
                    recorded = Some(reason);
                    break;
                }
                Err(RecordError::PersistenceFailure(_)) => machine.release_after_failure(),
                Err(RecordError::NotAuthenticated) => break,
            }
        }

        machine.teardown();
        drop(stream);

        self.events.emit_lossy(EngagementEvent::TrackingStopped {
            element_id: self.element_id,
            content_id: self.content_id,
            recorded: recorded.is_some(),
            timestamp: viewrec_common::time::now(),
        });

        InstanceOutcome {
            recorded,
            final_phase: machine.phase(),
        }
    }

    async fn record(&self, confirmation: Confirmation) -> Result<RecordReason, RecordError> {
        self.events.emit_lossy(EngagementEvent::ViewConfirmed {
            element_id: self.element_id,
            viewer_id: self.viewer_id,
            content_id: confirmation.content_id,
            cause: confirmation.cause,
            timestamp: confirmation.confirmed_at,
        });

        self.recorder
            .record(Some(self.viewer_id), confirmation.content_id, self.creator_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::AllowAll;
    use crate::identity::StaticIdentity;
    use crate::ledger::MemoryLedger;
    use crate::signal::RawEvent;
    use crate::timer::TokioTimer;
    use std::time::Duration;

    fn tracker(ledger: &Arc<MemoryLedger>, config: EngagementConfig) -> ViewTracker {
        let events = Arc::new(EventBus::default());
        let recorder = ViewRecorder::new(ledger.clone(), config.ledger_timeout()).with_events(events.clone());
        ViewTracker::new(config, recorder, Arc::new(AllowAll), Arc::new(TokioTimer), events)
    }

    #[test]
    fn test_default_sources_per_kind() {
        let image = TrackTarget::new(ContentId::new(), ViewerId::new(), ContentKind::Image);
        assert_eq!(
            image.effective_sources(),
            vec![SourceKind::Visibility, SourceKind::Interaction]
        );

        let media = TrackTarget::new(ContentId::new(), ViewerId::new(), ContentKind::Media);
        assert_eq!(media.effective_sources(), vec![SourceKind::Media]);

        let hover = media.with_sources([SourceKind::Hover]);
        assert_eq!(hover.effective_sources(), vec![SourceKind::Hover]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dwell_records_and_finishes() {
        let ledger = Arc::new(MemoryLedger::new());
        let tracker = tracker(&ledger, EngagementConfig::default());
        let element = Element::new();
        let viewer = ViewerId::new();
        let target = TrackTarget::new(ContentId::new(), ViewerId::new(), ContentKind::Image);

        let handle = tracker
            .track(&StaticIdentity::viewer(viewer), &element, target)
            .await
            .unwrap();
        element.dispatch(&RawEvent::Intersection { ratio: 0.8 });
        tokio::time::sleep(Duration::from_millis(3100)).await;

        assert!(handle.is_finished());
        assert_eq!(element.observer_count(), 0);
        let outcome = handle.finished().await.unwrap();
        assert_eq!(outcome.recorded, Some(RecordReason::Recorded));
        assert_eq!(outcome.final_phase, DwellPhase::Confirmed);
        assert_eq!(ledger.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_untrack_detaches_and_reports_phase() {
        let ledger = Arc::new(MemoryLedger::new());
        let tracker = tracker(&ledger, EngagementConfig::default());
        let element = Element::new();
        let target = TrackTarget::new(ContentId::new(), ViewerId::new(), ContentKind::Media);

        let handle = tracker
            .track(&StaticIdentity::viewer(ViewerId::new()), &element, target)
            .await
            .unwrap();
        element.dispatch(&RawEvent::MediaPlay);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let outcome = handle.untrack().await.unwrap();
        assert_eq!(outcome.recorded, None);
        assert_eq!(outcome.final_phase, DwellPhase::Watching);
        assert_eq!(element.observer_count(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ledger.calls().writes_path(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_record_retries_on_next_confirmation() {
        let ledger = Arc::new(MemoryLedger::new());
        let tracker = tracker(&ledger, EngagementConfig::default());
        let element = Element::new();
        let target = TrackTarget::new(ContentId::new(), ViewerId::new(), ContentKind::Image);
        let handle = tracker
            .track(&StaticIdentity::viewer(ViewerId::new()), &element, target)
            .await
            .unwrap();

        ledger.set_unavailable(true);
        element.dispatch(&RawEvent::Click);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        assert!(ledger.records().is_empty());

        ledger.set_unavailable(false);
        element.dispatch(&RawEvent::Click);
        let outcome = handle.finished().await.unwrap();

        assert_eq!(outcome.recorded, Some(RecordReason::Recorded));
        assert_eq!(ledger.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_entitlement_lookup_skips_tracking() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.set_delay(Some(Duration::from_secs(60)));
        let config = EngagementConfig {
            ledger_timeout_ms: 200,
            ..Default::default()
        };
        let events = Arc::new(EventBus::default());
        let recorder = ViewRecorder::new(ledger.clone(), config.ledger_timeout());
        let tracker = ViewTracker::new(config, recorder, ledger.clone(), Arc::new(TokioTimer), events);
        let element = Element::new();
        let viewer = ViewerId::new();
        let content = ContentId::new();
        ledger.grant_entitlement(viewer, content);

        let started = tokio::time::Instant::now();
        let handle = tracker
            .track(
                &StaticIdentity::viewer(viewer),
                &element,
                TrackTarget::new(content, ViewerId::new(), ContentKind::Image),
            )
            .await;

        assert!(handle.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(element.observer_count(), 0);
    }
}
