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
pub(super) struct PostsQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(super) struct SocialPostItem {
    post_id: Uuid,
    account_id: i64,
    forum_post_id: i64,
    carousel_group_id: Option<i64>,
    position_in_carousel: Option<i32>,
    status: String,
    retry_count: i32,
    error_message: Option<String>,
    scheduled_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
    platform_post_id: Option<String>,
    platform_post_url: Option<String>,
    created_at: DateTime<Utc>,
}

pub(super) async fn list_posts(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<PostsQuery>,
) -> Result<Json<ApiResponse<Vec<SocialPostItem>>>, ApiError> {
    let rows = sopub_db::list_recent_posts(
        &state.pool,
        query.status.as_deref(),
        normalize_limit(query.limit),
    )
    .await
    .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    let data = rows
        .into_iter()
        .map(|row| SocialPostItem {
            post_id: row.public_id,
            account_id: row.account_id,
            forum_post_id: row.forum_post_id,
            carousel_group_id: row.carousel_group_id,
            position_in_carousel: row.position_in_carousel,
            status: row.status,
            retry_count: row.retry_count,
            error_message: row.error_message,
            scheduled_at: row.scheduled_at,
            published_at: row.published_at,
            platform_post_id: row.platform_post_id,
            platform_post_url: row.platform_post_url,
            created_at: row.created_at,
        })
        .collect();

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}
