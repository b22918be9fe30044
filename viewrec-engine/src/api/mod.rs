//! HTTP host for the engine

pub mod elements;
pub mod error;
pub mod events;
pub mod health;
pub mod views;

pub use error::{ApiError, ApiResult};
pub use health::health_routes;

use axum::routing::{delete, get, post};
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use viewrec_common::events::EventBus;
use viewrec_common::ElementId;

use crate::aggregator::ViewAggregator;
use crate::signal::Element;
use crate::tracker::{TrackingHandle, ViewTracker};

/// A registered element and its tracking instance, if any
pub struct MountedElement {
    pub element: Element,
    pub tracking: Option<TrackingHandle>,
}

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub tracker: ViewTracker,
    pub aggregator: ViewAggregator,
    pub elements: Arc<RwLock<HashMap<ElementId, MountedElement>>>,
    pub events: Arc<EventBus>,
}

impl AppState {
    pub fn new(tracker: ViewTracker, aggregator: ViewAggregator, events: Arc<EventBus>) -> Self {
        Self {
            tracker,
            aggregator,
            elements: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/elements", post(elements::register_element))
        .route("/api/elements/:id/events", post(elements::dispatch_event))
        .route("/api/elements/:id", delete(elements::unmount_element))
        .route("/api/content/:id/views", get(views::content_views))
        .route("/api/viewers/:id/history", get(views::viewer_history))
        .route("/api/events", get(events::event_stream));

    Router::new()
        .merge(api)
        .merge(health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
