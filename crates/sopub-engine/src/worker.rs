//! Asynchronous publish workers.
//!
//! Each job runs the `processing → published | failed` state machine for
//! one post or one carousel group. Workers share nothing in memory; a job
//! begins by claiming its row with a guarded transition, so re-delivered
//! or duplicate jobs fall out as no-ops. A failed attempt schedules its own
//! retry on the queue with exponential backoff, capped at the configured
//! attempt budget.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Semaphore;

use sopub_db::{
    cache_rendered_content, claim_group_for_publish, claim_post_for_publish,
    complete_group_publish, fail_group_publish, get_account, increment_published,
    list_group_members, mark_post_published, mark_post_render_failed, record_publish_failure,
    AccountRow, SocialPostRow,
};
use sopub_platform::{CarouselItem, PlatformClient, PublishOutcome};

use crate::caption::{assemble_carousel_caption, CaptionParts};
use crate::error::{EngineError, PublishError};
use crate::prepare::{PreparerWithRetry, RenderInput};
use crate::queue::{Job, JobQueue, JobStream};

/// Performs the actual platform API calls.
///
/// Implementations must uphold the idempotency rule: success carries a
/// verified, non-empty platform post identifier or it is not success.
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    async fn publish_single(
        &self,
        image_ref: &str,
        caption: &str,
    ) -> Result<PublishOutcome, PublishError>;

    async fn publish_carousel(
        &self,
        items: Vec<CarouselItem>,
        combined_caption: &str,
    ) -> Result<PublishOutcome, PublishError>;
}

/// Production publisher backed by the platform HTTP client.
pub struct HttpPlatformPublisher {
    client: PlatformClient,
}

impl HttpPlatformPublisher {
    #[must_use]
    pub fn new(client: PlatformClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PlatformPublisher for HttpPlatformPublisher {
    async fn publish_single(
        &self,
        image_ref: &str,
        caption: &str,
    ) -> Result<PublishOutcome, PublishError> {
        self.client
            .publish_single(image_ref, caption)
            .await
            .map_err(PublishError::from)
    }

    async fn publish_carousel(
        &self,
        items: Vec<CarouselItem>,
        combined_caption: &str,
    ) -> Result<PublishOutcome, PublishError> {
        self.client
            .publish_carousel(items, combined_caption)
            .await
            .map_err(PublishError::from)
    }
}

/// Retry policy knobs for publish jobs.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Total publish attempts before a post or group fails permanently.
    pub max_attempts: u32,
    /// Base backoff: attempt N+1 runs `retry_base_secs * 2^N` after attempt N.
    pub retry_base_secs: u64,
    /// Minimum ready members for a carousel publish.
    pub min_carousel_items: i64,
}

/// Delay before the next attempt once `retry_count` attempts have failed.
#[must_use]
pub fn retry_delay(base_secs: u64, retry_count: u32) -> Duration {
    let delay_secs = base_secs.saturating_mul(1u64 << retry_count.min(62));
    Duration::from_secs(delay_secs)
}

/// Consumes publish jobs and drives them to a terminal status.
#[derive(Clone)]
pub struct PublishWorker {
    pool: PgPool,
    preparer: PreparerWithRetry,
    publisher: Arc<dyn PlatformPublisher>,
    queue: Arc<dyn JobQueue>,
    config: WorkerConfig,
}

impl PublishWorker {
    #[must_use]
    pub fn new(
        pool: PgPool,
        preparer: PreparerWithRetry,
        publisher: Arc<dyn PlatformPublisher>,
        queue: Arc<dyn JobQueue>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            pool,
            preparer,
            publisher,
            queue,
            config,
        }
    }

    /// Runs the worker pool: consumes the stream until every producer is
    /// gone, running at most `concurrency` jobs at a time.
    pub async fn run(self: Arc<Self>, mut jobs: JobStream, concurrency: usize) {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        while let Some(job) = jobs.recv().await {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let worker = Arc::clone(&self);
            tokio::spawn(async move {
                worker.process(job).await;
                drop(permit);
            });
        }
        tracing::info!("job queue closed; publish workers draining");
    }

    /// Runs one job to completion. Errors are logged here, once, at the
    /// job boundary; the queue never sees them.
    pub async fn process(&self, job: Job) {
        let result = match job {
            Job::PublishSingle { post_id } => self.publish_single_job(post_id).await,
            Job::PublishCarousel { group_id } => self.publish_carousel_job(group_id).await,
        };
        if let Err(e) = result {
            tracing::error!(?job, error = %e, "publish job aborted");
        }
    }

    // -- single posts -------------------------------------------------------

    async fn publish_single_job(&self, post_id: i64) -> Result<(), EngineError> {
        let Some(post) = claim_post_for_publish(&self.pool, post_id).await? else {
            tracing::info!(post_id, "single publish skipped: post not claimable");
            return Ok(());
        };
        let account = get_account(&self.pool, post.account_id).await?;

        let (image_ref, caption) = match self.ensure_single_render(&account, &post).await {
            Ok(render) => render,
            Err(err) => return self.record_single_failure(post_id, &err.to_string()).await,
        };

        match self.publisher.publish_single(&image_ref, &caption).await {
            Ok(outcome) => {
                mark_post_published(
                    &self.pool,
                    post_id,
                    &outcome.platform_post_id,
                    outcome.platform_post_url.as_deref(),
                )
                .await?;
                increment_published(&self.pool, account.id, 1).await?;
                tracing::info!(
                    post_id,
                    account = %account.slug,
                    platform_post_id = %outcome.platform_post_id,
                    "post published"
                );
                Ok(())
            }
            Err(err) => self.record_single_failure(post_id, &err.message).await,
        }
    }

    /// The render is normally cached from dispatch; if not, one more
    /// preparer call fills it in.
    async fn ensure_single_render(
        &self,
        account: &AccountRow,
        post: &SocialPostRow,
    ) -> Result<(String, String), EngineError> {
        if let (Some(image_ref), Some(caption)) = (&post.image_ref, &post.caption) {
            return Ok((image_ref.clone(), caption.clone()));
        }

        let content = self
            .preparer
            .prepare_once(&RenderInput::for_post(post, account))
            .await?;
        cache_rendered_content(
            &self.pool,
            post.id,
            &content.image_ref,
            &content.caption,
            &content.caption_fragment,
        )
        .await?;
        Ok((content.image_ref, content.caption))
    }

    async fn record_single_failure(&self, post_id: i64, error: &str) -> Result<(), EngineError> {
        let retry_count = record_publish_failure(&self.pool, post_id, error).await?;

        #[allow(clippy::cast_sign_loss)]
        if (retry_count as u32) < self.config.max_attempts {
            #[allow(clippy::cast_sign_loss)]
            let delay = retry_delay(self.config.retry_base_secs, retry_count as u32);
            tracing::warn!(
                post_id,
                retry_count,
                delay_secs = delay.as_secs(),
                error,
                "single publish failed, retry scheduled"
            );
            self.queue
                .enqueue_after(Job::PublishSingle { post_id }, delay)
                .await?;
        } else {
            tracing::error!(post_id, retry_count, error, "single publish failed permanently");
        }
        Ok(())
    }

    // -- carousels ----------------------------------------------------------

    async fn publish_carousel_job(&self, group_id: i64) -> Result<(), EngineError> {
        let Some(group) = claim_group_for_publish(&self.pool, group_id).await? else {
            tracing::info!(group_id, "carousel publish skipped: group not claimable");
            return Ok(());
        };
        let account = get_account(&self.pool, group.account_id).await?;

        self.backfill_member_renders(&account, group_id).await?;

        // Members failed by a previous attempt of this same group publish
        // still belong to the carousel; only a missing render or a
        // terminal `published` excludes a member from the item set.
        let members = list_group_members(&self.pool, group_id).await?;
        let mut items = Vec::new();
        let mut fragments = Vec::new();
        for member in &members {
            if member.status == "published" {
                continue;
            }
            let Some(image_ref) = &member.image_ref else {
                continue;
            };
            let fragment = member.caption_fragment.clone().unwrap_or_default();
            items.push(CarouselItem {
                image_ref: image_ref.clone(),
                caption_fragment: fragment,
            });
            fragments.push(member.caption_fragment.as_deref().unwrap_or_default());
        }

        if (items.len() as i64) < self.config.min_carousel_items {
            let message = format!(
                "carousel has {} ready members; need at least {}",
                items.len(),
                self.config.min_carousel_items
            );
            return self.record_carousel_failure(group_id, &message).await;
        }

        // Assembled once for the whole set; member rows are not consulted
        // again after this point.
        let combined = assemble_carousel_caption(&CaptionParts::for_account(&account, fragments));
        let item_count = items.len();

        match self.publisher.publish_carousel(items, &combined).await {
            Ok(outcome) => {
                let published = complete_group_publish(
                    &self.pool,
                    group_id,
                    &outcome.platform_post_id,
                    outcome.platform_post_url.as_deref(),
                )
                .await?;
                #[allow(clippy::cast_possible_truncation)]
                increment_published(&self.pool, account.id, published as i32).await?;
                tracing::info!(
                    group_id,
                    account = %account.slug,
                    items = item_count,
                    platform_post_id = %outcome.platform_post_id,
                    "carousel published"
                );
                Ok(())
            }
            Err(err) => self.record_carousel_failure(group_id, &err.message).await,
        }
    }

    /// One bounded backfill attempt per member whose render is missing.
    async fn backfill_member_renders(
        &self,
        account: &AccountRow,
        group_id: i64,
    ) -> Result<(), EngineError> {
        let members = list_group_members(&self.pool, group_id).await?;
        for member in &members {
            if member.status == "published" || member.image_ref.is_some() {
                continue;
            }
            match self
                .preparer
                .prepare_once(&RenderInput::for_post(member, account))
                .await
            {
                Ok(content) => {
                    cache_rendered_content(
                        &self.pool,
                        member.id,
                        &content.image_ref,
                        &content.caption,
                        &content.caption_fragment,
                    )
                    .await?;
                }
                Err(err) => {
                    tracing::warn!(
                        post_id = member.id,
                        group_id,
                        error = %err,
                        "member render backfill failed; publishing without it"
                    );
                    if let Err(mark_err) =
                        mark_post_render_failed(&self.pool, member.id, &err.to_string()).await
                    {
                        tracing::debug!(
                            post_id = member.id,
                            error = %mark_err,
                            "member already left pending; keeping its status"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn record_carousel_failure(&self, group_id: i64, error: &str) -> Result<(), EngineError> {
        // Group and every still-pending member fail together; a carousel
        // publish has no partial-success outcome.
        let retry_count = fail_group_publish(&self.pool, group_id, error).await?;

        #[allow(clippy::cast_sign_loss)]
        if (retry_count as u32) < self.config.max_attempts {
            #[allow(clippy::cast_sign_loss)]
            let delay = retry_delay(self.config.retry_base_secs, retry_count as u32);
            tracing::warn!(
                group_id,
                retry_count,
                delay_secs = delay.as_secs(),
                error,
                "carousel publish failed, retry scheduled"
            );
            self.queue
                .enqueue_after(Job::PublishCarousel { group_id }, delay)
                .await?;
        } else {
            tracing::error!(group_id, retry_count, error, "carousel publish failed permanently");
        }
        Ok(())
    }
}
