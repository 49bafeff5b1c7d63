use thiserror::Error;

use sopub_core::ConfigError;
use sopub_db::DbError;

use crate::queue::QueueError;

/// Broad kind of a content generation failure.
///
/// Deterministic rejections (`MissingAsset`, `MalformedTemplate`) fail the
/// same way on every attempt; `Service`/`Network` may clear up. The retry
/// policy does not distinguish — renders get a couple of immediate retries
/// and then the post fails — but operators reading `error_message` do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentErrorKind {
    MissingAsset,
    MalformedTemplate,
    Service,
    Network,
}

impl std::fmt::Display for ContentErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentErrorKind::MissingAsset => write!(f, "missing_asset"),
            ContentErrorKind::MalformedTemplate => write!(f, "malformed_template"),
            ContentErrorKind::Service => write!(f, "service"),
            ContentErrorKind::Network => write!(f, "network"),
        }
    }
}

/// A failed content render, as reported by whichever [`ContentPreparer`]
/// backs the engine.
///
/// [`ContentPreparer`]: crate::prepare::ContentPreparer
#[derive(Debug, Clone, Error)]
#[error("content generation failed ({kind}): {message}")]
pub struct ContentGenerationError {
    pub kind: ContentErrorKind,
    pub message: String,
}

impl From<sopub_render::RenderError> for ContentGenerationError {
    fn from(err: sopub_render::RenderError) -> Self {
        use sopub_render::RenderError;
        let kind = match &err {
            RenderError::MissingAsset { .. } => ContentErrorKind::MissingAsset,
            RenderError::MalformedTemplate { .. } => ContentErrorKind::MalformedTemplate,
            RenderError::Http(_) => ContentErrorKind::Network,
            RenderError::UnexpectedStatus { .. }
            | RenderError::Deserialize { .. }
            | RenderError::InvalidBaseUrl { .. } => ContentErrorKind::Service,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// A failed platform publish attempt. Every publish failure is handled the
/// same way — recorded on the row, retried with backoff up to the attempt
/// cap — so one message-bearing type suffices at this seam.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PublishError {
    pub message: String,
}

impl PublishError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<sopub_platform::PlatformError> for PublishError {
    fn from(err: sopub_platform::PlatformError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// Engine-level error taxonomy.
///
/// Propagation is isolated per account and per post: the dispatcher and
/// the worker log these once at their boundary, and one failure never
/// blocks sibling work in the same batch.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid trigger configuration; fails fast before any row is written.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    ContentGeneration(#[from] ContentGenerationError),

    #[error("platform publish failed: {0}")]
    PlatformPublish(#[from] PublishError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
