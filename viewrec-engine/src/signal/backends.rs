//! Signal backends
//!
//! Each backend keeps just enough state to turn its raw events into edge
//! signals: repeated "visible" updates or a second pointer-enter produce
//! nothing. Events meant for other backends are ignored.

use super::{RawEvent, SignalKind, SourceKind};

/// Translates raw element events into normalized signals
///
/// Implement this to add a new engagement source; the dwell state machine
/// only ever sees [`SignalKind`]s.
pub trait SignalBackend: Send {
    fn kind(&self) -> SourceKind;

    /// Signal for `event`, if this backend cares about it
    fn translate(&mut self, event: &RawEvent) -> Option<SignalKind>;
}

/// Intersection-ratio backend
#[derive(Debug, Clone)]
pub struct VisibilityBackend {
    threshold: f64,
    visible: bool,
}

impl VisibilityBackend {
    /// `threshold` is the visible fraction that counts as engaged;
    /// `root_margin` grows (positive) or shrinks (negative) the viewport by a
    /// fraction of the element, shifting the effective threshold.
    pub fn new(threshold: f64, root_margin: Option<f64>) -> Self {
        let threshold = (threshold - root_margin.unwrap_or(0.0)).clamp(0.0, 1.0);
        Self {
            threshold,
            visible: false,
        }
    }

    /// Effective threshold after applying the root margin
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn is_visible(&self, ratio: f64) -> bool {
        // A zero threshold still needs some part of the element on screen
        ratio > 0.0 && ratio >= self.threshold
    }
}

impl SignalBackend for VisibilityBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Visibility
    }

    fn translate(&mut self, event: &RawEvent) -> Option<SignalKind> {
        let RawEvent::Intersection { ratio } = event else {
            return None;
        };
        let now_visible = self.is_visible(*ratio);
        if now_visible == self.visible {
            return None;
        }
        self.visible = now_visible;
        Some(if now_visible {
            SignalKind::Start
        } else {
            SignalKind::Stop
        })
    }
}

/// Pointer hover backend
#[derive(Debug, Clone, Default)]
pub struct HoverBackend {
    hovering: bool,
}

impl SignalBackend for HoverBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Hover
    }

    fn translate(&mut self, event: &RawEvent) -> Option<SignalKind> {
        match event {
            RawEvent::PointerEnter if !self.hovering => {
                self.hovering = true;
                Some(SignalKind::Start)
            }
            RawEvent::PointerLeave if self.hovering => {
                self.hovering = false;
                Some(SignalKind::Stop)
            }
            _ => None,
        }
    }
}

/// Media playback backend
///
/// Finishing playback always counts as a view.
#[derive(Debug, Clone, Default)]
pub struct MediaBackend {
    playing: bool,
}

impl SignalBackend for MediaBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Media
    }

    fn translate(&mut self, event: &RawEvent) -> Option<SignalKind> {
        match event {
            RawEvent::MediaPlay if !self.playing => {
                self.playing = true;
                Some(SignalKind::Start)
            }
            RawEvent::MediaPause if self.playing => {
                self.playing = false;
                Some(SignalKind::Stop)
            }
            RawEvent::MediaEnded => {
                self.playing = false;
                Some(SignalKind::ImmediateConfirm)
            }
            _ => None,
        }
    }
}

/// Direct interaction backend
#[derive(Debug, Clone, Copy, Default)]
pub struct InteractionBackend;

impl SignalBackend for InteractionBackend {
    fn kind(&self) -> SourceKind {
        SourceKind::Interaction
    }

    fn translate(&mut self, event: &RawEvent) -> Option<SignalKind> {
        matches!(event, RawEvent::Click).then_some(SignalKind::ImmediateConfirm)
    }
}

/// Build a fresh backend of the given kind
pub fn backend_for(
    kind: SourceKind,
    visibility_threshold: f64,
    root_margin: Option<f64>,
) -> Box<dyn SignalBackend> {
    match kind {
        SourceKind::Visibility => Box::new(VisibilityBackend::new(visibility_threshold, root_margin)),
        SourceKind::Hover => Box::new(HoverBackend::default()),
        SourceKind::Media => Box::new(MediaBackend::default()),
        SourceKind::Interaction => Box::new(InteractionBackend),
    }
}
