//! Engagement signal source
//!
//! Normalizes raw, source-specific element events into the three-signal
//! vocabulary the dwell state machine understands:
//!
//! | Backend      | Raw event                      | Signal             |
//! |--------------|--------------------------------|--------------------|
//! | visibility   | ratio crosses threshold upward | `Start`            |
//! | visibility   | ratio crosses threshold down   | `Stop`             |
//! | hover        | pointer enter / leave          | `Start` / `Stop`   |
//! | media        | play / pause                   | `Start` / `Stop`   |
//! | media        | ended                          | `ImmediateConfirm` |
//! | interaction  | click                          | `ImmediateConfirm` |
//!
//! A subscription with several continuous backends (say visibility and
//! hover) reports engagement as a whole: `Start` when the first source
//! engages, `Stop` only once every source has disengaged.
//!
//! The caller owns the [`Element`] handle and passes it in; nothing here
//! looks elements up globally. [`subscribe`] attaches observers and returns
//! a [`SignalStream`] whose drop detaches them again.

mod backends;

pub use backends::{
    backend_for, HoverBackend, InteractionBackend, MediaBackend, SignalBackend, VisibilityBackend,
};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::trace;
use viewrec_common::{ContentId, ElementId};

/// Normalized engagement signal kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Viewer started engaging (visible, hovered, playing)
    Start,
    /// Viewer stopped engaging
    Stop,
    /// Interaction-grade signal; counts as a view regardless of dwell
    ImmediateConfirm,
}

/// One normalized signal for one content element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementSignal {
    pub content_id: ContentId,
    pub kind: SignalKind,
    pub timestamp: DateTime<Utc>,
}

/// Raw events a host can dispatch to an element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawEvent {
    /// Intersection observer update: visible fraction of the element
    Intersection { ratio: f64 },
    PointerEnter,
    PointerLeave,
    MediaPlay,
    MediaPause,
    MediaEnded,
    Click,
}

/// Which backend normalizes events for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Visibility,
    Hover,
    Media,
    Interaction,
}

struct Observer {
    token: u64,
    content_id: ContentId,
    backend: Box<dyn SignalBackend>,
    tx: mpsc::UnboundedSender<EngagementSignal>,
    /// This backend currently reports engagement
    engaged: bool,
    /// Engaged backends across the owning subscription
    engaged_sources: Arc<AtomicUsize>,
}

impl Observer {
    /// Fold this backend's signal into the subscription-wide view
    ///
    /// Only the first `Start` and the last `Stop` pass through.
    /// `ImmediateConfirm` always passes and also ends this backend's
    /// engagement (media `ended`). Mutated only under the element lock.
    fn combine(&mut self, kind: SignalKind) -> Option<SignalKind> {
        match kind {
            SignalKind::Start => {
                if self.engaged {
                    return None;
                }
                self.engaged = true;
                let before = self.engaged_sources.fetch_add(1, Ordering::SeqCst);
                (before == 0).then_some(SignalKind::Start)
            }
            SignalKind::Stop => {
                if !self.engaged {
                    return None;
                }
                self.engaged = false;
                let before = self.engaged_sources.fetch_sub(1, Ordering::SeqCst);
                (before == 1).then_some(SignalKind::Stop)
            }
            SignalKind::ImmediateConfirm => {
                if self.engaged {
                    self.engaged = false;
                    self.engaged_sources.fetch_sub(1, Ordering::SeqCst);
                }
                Some(SignalKind::ImmediateConfirm)
            }
        }
    }
}

#[derive(Default)]
struct ElementState {
    next_token: u64,
    observers: Vec<Observer>,
}

/// Handle to one trackable element
///
/// Cloning shares the same observer list. Raw events delivered through
/// [`Element::dispatch`] reach every attached observer in attachment order,
/// and each observer's signals keep dispatch order.
#[derive(Clone)]
pub struct Element {
    id: ElementId,
    state: Arc<Mutex<ElementState>>,
}

impl Element {
    pub fn new() -> Self {
        Self::with_id(ElementId::new())
    }

    pub fn with_id(id: ElementId) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(ElementState::default())),
        }
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    /// Feed one raw event to every attached observer
    ///
    /// Returns the number of signals emitted.
    pub fn dispatch(&self, event: &RawEvent) -> usize {
        self.dispatch_at(event, Utc::now())
    }

    /// As [`Element::dispatch`], stamping signals with `timestamp`
    pub fn dispatch_at(&self, event: &RawEvent, timestamp: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let mut emitted = 0;

        // Observers whose stream was dropped without detaching are pruned here
        state.observers.retain_mut(|observer| {
            let Some(kind) = observer.backend.translate(event) else {
                return !observer.tx.is_closed();
            };
            let Some(kind) = observer.combine(kind) else {
                trace!(element_id = %self.id, source = ?observer.backend.kind(), ?kind, "Signal absorbed by sibling source");
                return !observer.tx.is_closed();
            };
            let signal = EngagementSignal {
                content_id: observer.content_id,
                kind,
                timestamp,
            };
            trace!(element_id = %self.id, source = ?observer.backend.kind(), ?kind, "Signal");
            match observer.tx.send(signal) {
                Ok(()) => {
                    emitted += 1;
                    true
                }
                Err(_) => false,
            }
        });

        emitted
    }

    /// Number of observers currently attached
    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    /// Detach every observer (element removed from the page)
    ///
    /// Open streams end once their buffered signals are drained.
    pub fn unmount(&self) {
        self.lock().observers.clear();
    }

    fn attach(
        &self,
        content_id: ContentId,
        backend: Box<dyn SignalBackend>,
        tx: mpsc::UnboundedSender<EngagementSignal>,
        engaged_sources: Arc<AtomicUsize>,
    ) -> u64 {
        let mut state = self.lock();
        let token = state.next_token;
        state.next_token += 1;
        state.observers.push(Observer {
            token,
            content_id,
            backend,
            tx,
            engaged: false,
            engaged_sources,
        });
        token
    }

    fn detach(&self, tokens: &[u64]) {
        self.lock()
            .observers
            .retain(|observer| !tokens.contains(&observer.token));
    }

    fn lock(&self) -> MutexGuard<'_, ElementState> {
        // Observer bookkeeping stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Element {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("id", &self.id)
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Attached observers; detached on drop
struct Subscription {
    element: Element,
    tokens: Vec<u64>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.element.detach(&self.tokens);
        trace!(element_id = %self.element.id, observers = self.tokens.len(), "Observers detached");
    }
}

/// Ordered stream of signals for one (element, content) subscription
///
/// Dropping the stream detaches its observers from the element.
pub struct SignalStream {
    rx: mpsc::UnboundedReceiver<EngagementSignal>,
    _subscription: Subscription,
}

impl SignalStream {
    /// Next signal; `None` once the element has been unmounted
    pub async fn recv(&mut self) -> Option<EngagementSignal> {
        self.rx.recv().await
    }

    /// Next buffered signal without waiting
    pub fn try_recv(&mut self) -> Option<EngagementSignal> {
        self.rx.try_recv().ok()
    }
}

impl Stream for SignalStream {
    type Item = EngagementSignal;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Begin observing `element` on behalf of `content_id`
///
/// One observer is attached per backend; all of them feed the same stream,
/// with continuous sources combined so the stream sees one engagement
/// interval at a time.
pub fn subscribe(
    element: &Element,
    content_id: ContentId,
    backends: Vec<Box<dyn SignalBackend>>,
) -> SignalStream {
    let (tx, rx) = mpsc::unbounded_channel();
    let engaged_sources = Arc::new(AtomicUsize::new(0));
    let tokens = backends
        .into_iter()
        .map(|backend| element.attach(content_id, backend, tx.clone(), engaged_sources.clone()))
        .collect();

    SignalStream {
        rx,
        _subscription: Subscription {
            element: element.clone(),
            tokens,
        },
    }
}
