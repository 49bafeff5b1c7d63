//! Render service request/response types.
//!
//! The render service owns templates and pixel output; this crate only
//! models its JSON contract. Rendering is deterministic for identical
//! inputs and never partially mutates service state on failure.

use serde::{Deserialize, Serialize};

/// Body for `POST /v1/render`.
#[derive(Debug, Clone, Serialize)]
pub struct RenderRequest {
    pub forum_post_id: i64,
    pub template_id: i64,
    pub title: String,
    pub body: String,
}

/// Successful render output.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderResponse {
    /// Opaque storage reference for the rendered image.
    pub image_ref: String,
    /// Full caption for a standalone publish.
    pub caption: String,
    /// Short per-item body for use inside a combined carousel caption.
    pub caption_fragment: String,
}

/// Error envelope the render service returns with 422:
/// `{ "error": { "kind": "missing_asset", "message": "..." } }`.
#[derive(Debug, Deserialize)]
pub struct RenderErrorEnvelope {
    pub error: RenderErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct RenderErrorBody {
    pub kind: String,
    pub message: String,
}
