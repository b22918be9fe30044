//! Element lifecycle endpoints
//!
//! A host registers each piece of content it renders as an element, then
//! forwards raw events (intersection updates, pointer and media events,
//! clicks) as they happen. Deleting the element is the unmount.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use viewrec_common::models::ContentKind;
use viewrec_common::{ContentId, ElementId, ViewerId};

use super::error::{ApiError, ApiResult};
use super::{AppState, MountedElement};
use crate::identity::StaticIdentity;
use crate::signal::{Element, RawEvent, SourceKind};
use crate::tracker::TrackTarget;

/// Header carrying the authenticated viewer
pub const VIEWER_HEADER: &str = "x-viewer-id";

#[derive(Debug, Deserialize)]
pub struct RegisterElementRequest {
    pub content_id: ContentId,
    pub creator_id: ViewerId,
    pub kind: ContentKind,
    #[serde(default)]
    pub sources: Vec<SourceKind>,
}

#[derive(Debug, Serialize)]
pub struct RegisterElementResponse {
    pub element_id: ElementId,
    /// Whether a dwell instance is running for this element
    pub tracking: bool,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    /// Signals the event produced across the element's observers
    pub delivered: usize,
}

fn viewer_from_headers(headers: &HeaderMap) -> ApiResult<Option<ViewerId>> {
    let Some(value) = headers.get(VIEWER_HEADER) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("{} is not valid text", VIEWER_HEADER)))?;
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e| ApiError::BadRequest(format!("{}: {}", VIEWER_HEADER, e)))
}

/// POST /api/elements
pub async fn register_element(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterElementRequest>,
) -> ApiResult<(StatusCode, Json<RegisterElementResponse>)> {
    let identity = StaticIdentity::from(viewer_from_headers(&headers)?);
    let element = Element::new();
    let target = TrackTarget::new(request.content_id, request.creator_id, request.kind)
        .with_sources(request.sources);

    let tracking = state.tracker.track(&identity, &element, target).await;
    let response = RegisterElementResponse {
        element_id: element.id(),
        tracking: tracking.is_some(),
    };

    state
        .elements
        .write()
        .await
        .insert(element.id(), MountedElement { element, tracking });

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/elements/:id/events
pub async fn dispatch_event(
    State(state): State<AppState>,
    Path(element_id): Path<ElementId>,
    Json(event): Json<RawEvent>,
) -> ApiResult<(StatusCode, Json<DispatchResponse>)> {
    let element = state
        .elements
        .read()
        .await
        .get(&element_id)
        .map(|mounted| mounted.element.clone())
        .ok_or_else(|| ApiError::NotFound(format!("element {}", element_id)))?;

    let delivered = element.dispatch(&event);
    debug!(element_id = %element_id, ?event, delivered, "Raw event dispatched");

    Ok((StatusCode::ACCEPTED, Json(DispatchResponse { delivered })))
}

/// DELETE /api/elements/:id
pub async fn unmount_element(
    State(state): State<AppState>,
    Path(element_id): Path<ElementId>,
) -> ApiResult<StatusCode> {
    let mounted = state
        .elements
        .write()
        .await
        .remove(&element_id)
        .ok_or_else(|| ApiError::NotFound(format!("element {}", element_id)))?;

    mounted.element.unmount();
    if let Some(handle) = mounted.tracking {
        if let Some(outcome) = handle.untrack().await {
            debug!(element_id = %element_id, ?outcome, "Element unmounted");
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_viewer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(viewer_from_headers(&headers).unwrap(), None);

        let viewer = ViewerId::new();
        headers.insert(VIEWER_HEADER, HeaderValue::from_str(&viewer.to_string()).unwrap());
        assert_eq!(viewer_from_headers(&headers).unwrap(), Some(viewer));

        headers.insert(VIEWER_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(viewer_from_headers(&headers), Err(ApiError::BadRequest(_))));
    }
}
