//! Carousel group management: atomic assignment of posts into batches and
//! the trigger decision.
//!
//! Thin orchestration over the `sopub-db` critical sections, adding the
//! immediate-retry policy for lock contention. The group row lock is only
//! ever held for bookkeeping — content preparation happens strictly before
//! any of these calls — so a contended `FOR UPDATE NOWAIT` is retried on
//! the spot rather than backed off.

use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use sopub_db::{
    append_post_to_group, find_or_create_batch_group, find_or_create_scheduled_group,
    try_mark_group_queued, AppendOutcome, CarouselGroupRow, DbError, TriggerCheck,
};

/// Immediate retries for a contended group-row lock before giving up.
const LOCK_RETRIES: u32 = 5;

async fn with_lock_retry<T, F, Fut>(mut operation: F) -> Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Err(e) if e.is_lock_contention() && attempt < LOCK_RETRIES => {
                attempt += 1;
                tracing::debug!(attempt, "group row lock contended, retrying immediately");
            }
            other => return other,
        }
    }
}

/// Owns find-or-create, append, and trigger for carousel groups.
#[derive(Clone)]
pub struct GroupManager {
    pool: PgPool,
    /// Minimum ready members before any group may trigger.
    min_carousel_items: i64,
}

impl GroupManager {
    #[must_use]
    pub fn new(pool: PgPool, min_carousel_items: i64) -> Self {
        Self {
            pool,
            min_carousel_items,
        }
    }

    /// The account's single active collecting group for the batch policy.
    ///
    /// # Errors
    ///
    /// Propagates [`DbError`] from the find-or-create round trips.
    pub async fn resolve_batch_group(
        &self,
        account_id: i64,
        batch_size: i32,
    ) -> Result<CarouselGroupRow, DbError> {
        find_or_create_batch_group(&self.pool, account_id, batch_size).await
    }

    /// The account's collecting group for a scheduled publish slot.
    ///
    /// # Errors
    ///
    /// Propagates [`DbError`] from the find-or-create round trips.
    pub async fn resolve_scheduled_group(
        &self,
        account_id: i64,
        scheduled_at: DateTime<Utc>,
    ) -> Result<CarouselGroupRow, DbError> {
        find_or_create_scheduled_group(&self.pool, account_id, scheduled_at).await
    }

    /// Appends a rendered post to a group, retrying immediately on lock
    /// contention.
    ///
    /// # Errors
    ///
    /// [`DbError::InvalidTransition`] when the group stopped collecting
    /// (callers re-resolve) or the post is not appendable; other
    /// [`DbError`]s pass through.
    pub async fn append(&self, group_id: i64, post_id: i64) -> Result<AppendOutcome, DbError> {
        with_lock_retry(|| append_post_to_group(&self.pool, group_id, post_id)).await
    }

    /// Runs the trigger check, retrying immediately on lock contention.
    ///
    /// `require_full` is the batch-count rule (`collected >= target`);
    /// time-due scheduled groups pass `false`. Returns `Triggered` at most
    /// once per group; the caller enqueues the publish job after this
    /// returns, never under the lock.
    ///
    /// # Errors
    ///
    /// Propagates [`DbError`] from the locked check.
    pub async fn try_trigger(
        &self,
        group_id: i64,
        require_full: bool,
    ) -> Result<TriggerCheck, DbError> {
        with_lock_retry(|| {
            try_mark_group_queued(&self.pool, group_id, self.min_carousel_items, require_full)
        })
        .await
    }
}
