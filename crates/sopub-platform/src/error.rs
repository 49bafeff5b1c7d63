use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("rate limited by platform (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    /// The platform answered 2xx but returned no usable post identifier.
    /// Accepting such a response would mean "published" with nothing to
    /// verify against, so it is treated as a failed attempt.
    #[error("platform response carried no post identifier")]
    MissingPostId,

    #[error("carousel requires at least 2 items, got {got}")]
    TooFewItems { got: usize },

    #[error("unexpected HTTP status {status} from platform: {detail}")]
    UnexpectedStatus { status: u16, detail: String },

    #[error("invalid platform base URL \"{base_url}\": {reason}")]
    InvalidBaseUrl { base_url: String, reason: String },
}
