//! Dwell confirmation state machine
//!
//! One machine per (viewer, content, element) instance.
//!
//! ```text
//!            Start (arm timer T)
//!   Idle ─────────────────────────▶ Watching
//!    ▲  ◀───────────────────────────  │
//!    │   Stop (cancel, discard dwell) │ timer fires
//!    │                                ▼
//!    └─ ImmediateConfirm ───────▶ Confirmed (terminal)
//! ```
//!
//! Interrupted dwell is discarded, not accumulated: a `Stop` before the
//! timer fires resets progress, and the next `Start` waits the full `T`
//! again.
//!
//! Timer callbacks do not touch the machine directly. They send a
//! [`TimerFired`] tagged with the arming generation to the owning task,
//! which hands it back through [`DwellMachine::on_timer_fired`]. A fire from
//! a cancelled arming is recognised by its stale generation and dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use viewrec_common::events::ConfirmCause;
use viewrec_common::ContentId;

use crate::signal::{EngagementSignal, SignalKind};
use crate::timer::{DwellTimer, TimerHandle};

/// Phase of a dwell instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DwellPhase {
    Idle,
    Watching,
    Confirmed,
}

/// Observable state of one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DwellState {
    pub phase: DwellPhase,
    /// When the current dwell window started (Watching only)
    pub armed_at: Option<DateTime<Utc>>,
}

impl Default for DwellState {
    fn default() -> Self {
        Self {
            phase: DwellPhase::Idle,
            armed_at: None,
        }
    }
}

/// Emitted once when an instance reaches `Confirmed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub content_id: ContentId,
    pub cause: ConfirmCause,
    pub confirmed_at: DateTime<Utc>,
}

/// Message sent by an armed timer when it fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub generation: u64,
}

/// Dwell state machine for one tracked instance
pub struct DwellMachine {
    content_id: ContentId,
    threshold: Duration,
    state: DwellState,
    timer: Arc<dyn DwellTimer>,
    fire_tx: mpsc::UnboundedSender<TimerFired>,
    armed: Option<TimerHandle>,
    generation: u64,
}

impl DwellMachine {
    /// `fire_tx` receives a [`TimerFired`] whenever an armed timer elapses
    pub fn new(
        content_id: ContentId,
        threshold: Duration,
        timer: Arc<dyn DwellTimer>,
        fire_tx: mpsc::UnboundedSender<TimerFired>,
    ) -> Self {
        Self {
            content_id,
            threshold,
            state: DwellState::default(),
            timer,
            fire_tx,
            armed: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> &DwellState {
        &self.state
    }

    pub fn phase(&self) -> DwellPhase {
        self.state.phase
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Whether a dwell timer is currently live
    pub fn is_timer_armed(&self) -> bool {
        self.armed.as_ref().is_some_and(|handle| !handle.is_cancelled())
    }

    /// Apply one signal; returns the confirmation if this signal caused one
    pub fn on_signal(&mut self, signal: &EngagementSignal) -> Option<Confirmation> {
        if signal.content_id != self.content_id {
            debug!(
                expected = %self.content_id,
                got = %signal.content_id,
                "Ignoring signal for another content item"
            );
            return None;
        }

        match (self.state.phase, signal.kind) {
            (DwellPhase::Confirmed, _) => None,

            (DwellPhase::Idle, SignalKind::Start) => {
                self.arm(signal.timestamp);
                None
            }
            (DwellPhase::Watching, SignalKind::Start) => None,

            (DwellPhase::Watching, SignalKind::Stop) => {
                self.disarm();
                self.state = DwellState::default();
                trace!(content_id = %self.content_id, "Dwell interrupted, progress discarded");
                None
            }
            (DwellPhase::Idle, SignalKind::Stop) => None,

            (_, SignalKind::ImmediateConfirm) => {
                Some(self.confirm(ConfirmCause::Interaction, signal.timestamp))
            }
        }
    }

    /// Apply a timer fire; stale fires (cancelled armings) are ignored
    pub fn on_timer_fired(&mut self, fired: TimerFired, at: DateTime<Utc>) -> Option<Confirmation> {
        if self.state.phase != DwellPhase::Watching || fired.generation != self.generation {
            trace!(
                content_id = %self.content_id,
                generation = fired.generation,
                current = self.generation,
                "Stale timer fire ignored"
            );
            return None;
        }
        Some(self.confirm(ConfirmCause::Dwell, at))
    }

    /// Leave `Confirmed` after the record attempt failed, so a later
    /// confirmation can retry
    pub fn release_after_failure(&mut self) {
        if self.state.phase == DwellPhase::Confirmed {
            self.state = DwellState::default();
        }
    }

    /// Cancel any armed timer; safe to call repeatedly
    pub fn teardown(&mut self) {
        self.disarm();
    }

    fn arm(&mut self, at: DateTime<Utc>) {
        // Never more than one live timer per instance
        self.disarm();
        self.generation += 1;

        let generation = self.generation;
        let tx = self.fire_tx.clone();
        let handle = self.timer.arm(
            self.threshold,
            Box::new(move || {
                let _ = tx.send(TimerFired { generation });
            }),
        );

        self.armed = Some(handle);
        self.state = DwellState {
            phase: DwellPhase::Watching,
            armed_at: Some(at),
        };
        trace!(content_id = %self.content_id, generation, threshold_ms = self.threshold.as_millis() as u64, "Dwell timer armed");
    }

    fn disarm(&mut self) {
        if let Some(handle) = self.armed.take() {
            handle.cancel();
        }
    }

    fn confirm(&mut self, cause: ConfirmCause, at: DateTime<Utc>) -> Confirmation {
        self.disarm();
        self.state = DwellState {
            phase: DwellPhase::Confirmed,
            armed_at: None,
        };
        debug!(content_id = %self.content_id, ?cause, "View confirmed");
        Confirmation {
            content_id: self.content_id,
            cause,
            confirmed_at: at,
        }
    }
}

impl Drop for DwellMachine {
    fn drop(&mut self) {
        self.teardown();
    }
}
