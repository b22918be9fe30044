//! # Viewrec Engine (viewrec-engine)
//!
//! Decides when engagement with a piece of content becomes a recorded view,
//! and records it at most once per (viewer, content) pair.
//!
//! **Pipeline:** raw element events → [`signal`] (Start/Stop/ImmediateConfirm)
//! → [`dwell`] state machine → [`recorder`] → [`ledger`]. The [`aggregator`]
//! reads the ledger independently. [`tracker`] wires one pipeline per tracked
//! element and [`api`] exposes it over HTTP.

pub mod aggregator;
pub mod api;
pub mod dwell;
pub mod entitlement;
pub mod identity;
pub mod ledger;
pub mod recorder;
pub mod signal;
pub mod timer;
pub mod tracker;

pub use aggregator::{ViewAggregator, ViewHistory};
pub use api::{build_router, AppState};
pub use dwell::{Confirmation, DwellMachine, DwellPhase, DwellState};
pub use entitlement::{AllowAll, EntitlementCheck};
pub use identity::{IdentityProvider, StaticIdentity};
pub use ledger::{LedgerError, MemoryLedger, SqliteLedger, ViewLedger};
pub use recorder::{RecordError, RecordOutcome, ViewRecorder};
pub use signal::{Element, EngagementSignal, RawEvent, SignalKind, SignalStream, SourceKind};
pub use timer::{DwellTimer, ManualTimer, TimerHandle, TokioTimer};
pub use tracker::{InstanceOutcome, TrackTarget, TrackingHandle, ViewTracker};
pub use viewrec_common::events::{ConfirmCause, RecordReason};
