use thiserror::Error;

/// Errors from the render service.
///
/// Render failures are typically deterministic — a missing asset or a
/// malformed template fails the same way every time — which is why the
/// engine retries them immediately (no backoff) and only a couple of times.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("render rejected for forum post {forum_post_id}: missing asset: {detail}")]
    MissingAsset { forum_post_id: i64, detail: String },

    #[error("render rejected for forum post {forum_post_id}: malformed template {template_id}: {detail}")]
    MalformedTemplate {
        forum_post_id: i64,
        template_id: i64,
        detail: String,
    },

    #[error("unexpected HTTP status {status} from render service")]
    UnexpectedStatus { status: u16, detail: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid render service base URL \"{base_url}\": {reason}")]
    InvalidBaseUrl { base_url: String, reason: String },
}
