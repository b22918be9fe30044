//! View count and history endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use viewrec_common::{ContentId, ViewerId};

use super::error::ApiResult;
use super::AppState;
use crate::aggregator::ViewHistory;

#[derive(Debug, Serialize)]
pub struct ViewCountResponse {
    pub content_id: ContentId,
    pub views: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    /// Page size; omitted or 0 means the configured default
    pub limit: Option<usize>,
}

/// GET /api/content/:id/views
pub async fn content_views(
    State(state): State<AppState>,
    Path(content_id): Path<ContentId>,
) -> ApiResult<Json<ViewCountResponse>> {
    let views = state.aggregator.count(content_id).await?;
    Ok(Json(ViewCountResponse { content_id, views }))
}

/// GET /api/viewers/:id/history
///
/// Always 200; a ledger failure shows up in the `error` field.
pub async fn viewer_history(
    State(state): State<AppState>,
    Path(viewer_id): Path<ViewerId>,
    Query(params): Query<HistoryParams>,
) -> Json<ViewHistory> {
    Json(
        state
            .aggregator
            .list_for_viewer(viewer_id, params.limit.unwrap_or(0))
            .await,
    )
}
