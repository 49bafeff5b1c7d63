//! Dispatch endpoint: the forum calls this when a post is approved.
//!
//! The request blocks only for content preparation; publishing itself is
//! asynchronous behind the job queue, so the forum never waits on platform
//! I/O.

use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};

use sopub_core::ApprovedPost;
use sopub_engine::{EngineError, RouteOutcome};

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct DispatchRequest {
    pub forum_post_id: i64,
    pub school_id: Option<i64>,
    #[serde(default)]
    pub cross_school_announcement: bool,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub(super) struct DispatchResultItem {
    account_id: i64,
    account_slug: String,
    outcome: String,
    detail: Option<String>,
}

pub(super) async fn dispatch_post(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<ApiResponse<Vec<DispatchResultItem>>>, ApiError> {
    let post = ApprovedPost {
        forum_post_id: request.forum_post_id,
        school_id: request.school_id,
        cross_school_announcement: request.cross_school_announcement,
        title: request.title,
        body: request.body,
    };

    let outcomes = state.dispatcher.dispatch(&post).await.map_err(|e| {
        tracing::error!(error = %e, "dispatch failed before reaching any account");
        ApiError::new(req_id.0.clone(), "internal_error", "dispatch failed")
    })?;

    let data = outcomes
        .into_iter()
        .map(|o| {
            let (outcome, detail) = describe(&o.result);
            DispatchResultItem {
                account_id: o.account_id,
                account_slug: o.account_slug,
                outcome,
                detail,
            }
        })
        .collect();

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}

fn describe(result: &Result<RouteOutcome, EngineError>) -> (String, Option<String>) {
    match result {
        Ok(RouteOutcome::AlreadyDispatched) => ("already_dispatched".to_string(), None),
        Ok(RouteOutcome::QueuedSingle { .. }) => ("queued_single".to_string(), None),
        Ok(RouteOutcome::Collected {
            collected, target, ..
        }) => (
            "collected".to_string(),
            Some(format!("{collected}/{target}")),
        ),
        Ok(RouteOutcome::Triggered { collected, .. }) => (
            "carousel_triggered".to_string(),
            Some(format!("{collected} posts")),
        ),
        Ok(RouteOutcome::Waiting {
            ready, min_ready, ..
        }) => (
            "waiting_for_ready_members".to_string(),
            Some(format!("{ready}/{min_ready} ready")),
        ),
        Err(e) => ("failed".to_string(), Some(e.to_string())),
    }
}
