use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_db_error, normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct GroupsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct CarouselGroupItem {
    group_id: Uuid,
    group_key: String,
    account_id: i64,
    status: String,
    target_count: i32,
    collected_count: i32,
    retry_count: i32,
    error_message: Option<String>,
    scheduled_at: Option<DateTime<Utc>>,
    platform_post_id: Option<String>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

pub(super) async fn list_groups(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<GroupsQuery>,
) -> Result<Json<ApiResponse<Vec<CarouselGroupItem>>>, ApiError> {
    let rows = sopub_db::list_recent_groups(
        &state.pool,
        query.status.as_deref(),
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let data = rows
        .into_iter()
        .map(|row| CarouselGroupItem {
            group_id: row.public_id,
            group_key: row.group_key,
            account_id: row.account_id,
            status: row.status,
            target_count: row.target_count,
            collected_count: row.collected_count,
            retry_count: row.retry_count,
            error_message: row.error_message,
            scheduled_at: row.scheduled_at,
            platform_post_id: row.platform_post_id,
            created_at: row.created_at,
            published_at: row.published_at,
        })
        .collect();

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}
