//! Content preparation: the seam to the render service, plus the retry
//! wrapper the dispatcher and recovery sweep share.

use async_trait::async_trait;
use std::sync::Arc;

use sopub_core::PreparedContent;
use sopub_db::{AccountRow, SocialPostRow};
use sopub_render::{RenderClient, RenderRequest};

use crate::error::ContentGenerationError;

/// Everything a renderer needs for one post.
#[derive(Debug, Clone)]
pub struct RenderInput {
    pub forum_post_id: i64,
    pub template_id: i64,
    pub title: String,
    pub body: String,
}

impl RenderInput {
    /// Build the render input for a stored post against its account's
    /// mandatory default template.
    #[must_use]
    pub fn for_post(post: &SocialPostRow, account: &AccountRow) -> Self {
        Self {
            forum_post_id: post.forum_post_id,
            template_id: account.default_template_id,
            title: post.title.clone(),
            body: post.body.clone(),
        }
    }
}

/// Renders one post's image and captions.
///
/// Implementations must be deterministic for identical inputs and must not
/// partially mutate external state on failure.
#[async_trait]
pub trait ContentPreparer: Send + Sync {
    async fn render(&self, input: &RenderInput) -> Result<PreparedContent, ContentGenerationError>;
}

/// Production preparer backed by the render service HTTP client.
pub struct HttpContentPreparer {
    client: RenderClient,
}

impl HttpContentPreparer {
    #[must_use]
    pub fn new(client: RenderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContentPreparer for HttpContentPreparer {
    async fn render(&self, input: &RenderInput) -> Result<PreparedContent, ContentGenerationError> {
        let request = RenderRequest {
            forum_post_id: input.forum_post_id,
            template_id: input.template_id,
            title: input.title.clone(),
            body: input.body.clone(),
        };
        let rendered = self.client.render(&request).await?;
        Ok(PreparedContent {
            image_ref: rendered.image_ref,
            caption: rendered.caption,
            caption_fragment: rendered.caption_fragment,
        })
    }
}

/// Retry wrapper over a [`ContentPreparer`].
///
/// Render failures are usually deterministic (missing asset, malformed
/// template), so retries are immediate and few — no backoff. After
/// `max_retries` additional attempts the last error is returned and the
/// caller marks the post failed.
#[derive(Clone)]
pub struct PreparerWithRetry {
    inner: Arc<dyn ContentPreparer>,
    max_retries: u32,
}

impl PreparerWithRetry {
    #[must_use]
    pub fn new(inner: Arc<dyn ContentPreparer>, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }

    /// A single attempt, no retries — the worker's "ensure render is
    /// cached" path calls the preparer once more, nothing else.
    ///
    /// # Errors
    ///
    /// Propagates the preparer's [`ContentGenerationError`].
    pub async fn prepare_once(
        &self,
        input: &RenderInput,
    ) -> Result<PreparedContent, ContentGenerationError> {
        self.inner.render(input).await
    }

    /// Render with up to `max_retries` immediate re-attempts.
    ///
    /// # Errors
    ///
    /// Returns the final attempt's [`ContentGenerationError`] once retries
    /// are exhausted.
    pub async fn prepare(
        &self,
        input: &RenderInput,
    ) -> Result<PreparedContent, ContentGenerationError> {
        let mut attempt = 0u32;
        loop {
            match self.inner.render(input).await {
                Ok(content) => return Ok(content),
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    tracing::warn!(
                        forum_post_id = input.forum_post_id,
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "content render failed, retrying immediately"
                    );
                }
            }
        }
    }
}
