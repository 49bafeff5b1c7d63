//! Database operations for `carousel_groups`.
//!
//! The group row is the sole serialization point for everything that
//! contends: appends take `FOR UPDATE NOWAIT` on it, assign the next
//! `position_in_carousel` from the freshly re-read `collected_count`, and
//! commit before any job is enqueued. "At most one collecting group" per
//! account (batch policy) or per account+slot (scheduled policy) is a
//! partial unique index, not process state.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// Sentinel `target_count` for scheduled groups: the count check never
/// fires, the recovery sweep triggers them when their slot passes.
pub const SCHEDULED_TARGET_COUNT: i32 = i32::MAX;

/// A row from the `carousel_groups` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CarouselGroupRow {
    pub id: i64,
    pub public_id: Uuid,
    pub group_key: String,
    pub account_id: i64,
    pub status: String,
    pub target_count: i32,
    pub collected_count: i32,
    /// Publish slot for scheduled-trigger groups; `NULL` for batch groups.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Result of appending one post to a collecting group.
#[derive(Debug, Clone, Copy)]
pub struct AppendOutcome {
    /// Position assigned to the appended post (0-based).
    pub position: i32,
    /// Group size after the append.
    pub collected_count: i32,
    pub target_count: i32,
}

impl AppendOutcome {
    /// The append that fills the group is the one that attempts the trigger.
    #[must_use]
    pub fn reached_target(&self) -> bool {
        self.collected_count >= self.target_count
    }
}

/// Outcome of a trigger check on a collecting group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerCheck {
    /// This call moved the group `collecting` → `queued`; the caller must
    /// now enqueue the publish job (strictly after this returns, i.e. after
    /// the row lock is gone).
    Triggered,
    /// Another caller already moved the group out of `collecting`.
    AlreadyTriggered,
    /// The group has not reached its target count yet.
    NotFull { collected: i32, target: i32 },
    /// Enough posts collected, but too few have a successful render.
    NotEnoughReady { ready: i64, min_ready: i64 },
}

/// Returns the account's current `collecting` batch group, creating it if
/// none exists. Safe under concurrent callers: creation races collapse on
/// the partial unique index and everyone converges on the surviving row.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the group vanished between attempts
/// (it was concurrently triggered; callers re-resolve), or
/// [`DbError::Sqlx`] on query failure.
pub async fn find_or_create_batch_group(
    pool: &PgPool,
    account_id: i64,
    target_count: i32,
) -> Result<CarouselGroupRow, DbError> {
    // Two rounds: a lost insert race is settled by the second select.
    for _ in 0..2 {
        let existing = sqlx::query_as::<_, CarouselGroupRow>(
            "SELECT id, public_id, group_key, account_id, status, target_count, \
                    collected_count, scheduled_at, retry_count, error_message, \
                    platform_post_id, platform_post_url, created_at, published_at \
             FROM carousel_groups \
             WHERE account_id = $1 AND status = 'collecting' AND scheduled_at IS NULL",
        )
        .bind(account_id)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = existing {
            return Ok(row);
        }

        let public_id = Uuid::new_v4();
        let group_key = format!("batch:{account_id}:{public_id}");

        let inserted = sqlx::query_as::<_, CarouselGroupRow>(
            "INSERT INTO carousel_groups \
                 (public_id, group_key, account_id, status, target_count) \
             VALUES ($1, $2, $3, 'collecting', $4) \
             ON CONFLICT DO NOTHING \
             RETURNING id, public_id, group_key, account_id, status, target_count, \
                       collected_count, scheduled_at, retry_count, error_message, \
                       platform_post_id, platform_post_url, created_at, published_at",
        )
        .bind(public_id)
        .bind(&group_key)
        .bind(account_id)
        .bind(target_count)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(row);
        }
    }

    Err(DbError::NotFound)
}

/// Returns the account's `collecting` group for the given publish slot,
/// creating it if none exists. Same race discipline as
/// [`find_or_create_batch_group`]; the created group gets the unbounded
/// [`SCHEDULED_TARGET_COUNT`].
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the group vanished between attempts,
/// or [`DbError::Sqlx`] on query failure.
pub async fn find_or_create_scheduled_group(
    pool: &PgPool,
    account_id: i64,
    scheduled_at: DateTime<Utc>,
) -> Result<CarouselGroupRow, DbError> {
    for _ in 0..2 {
        let existing = sqlx::query_as::<_, CarouselGroupRow>(
            "SELECT id, public_id, group_key, account_id, status, target_count, \
                    collected_count, scheduled_at, retry_count, error_message, \
                    platform_post_id, platform_post_url, created_at, published_at \
             FROM carousel_groups \
             WHERE account_id = $1 AND status = 'collecting' AND scheduled_at = $2",
        )
        .bind(account_id)
        .bind(scheduled_at)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = existing {
            return Ok(row);
        }

        let public_id = Uuid::new_v4();
        let group_key = format!(
            "sched:{account_id}:{}:{public_id}",
            scheduled_at.format("%Y%m%dT%H%M")
        );

        let inserted = sqlx::query_as::<_, CarouselGroupRow>(
            "INSERT INTO carousel_groups \
                 (public_id, group_key, account_id, status, target_count, scheduled_at) \
             VALUES ($1, $2, $3, 'collecting', $4, $5) \
             ON CONFLICT DO NOTHING \
             RETURNING id, public_id, group_key, account_id, status, target_count, \
                       collected_count, scheduled_at, retry_count, error_message, \
                       platform_post_id, platform_post_url, created_at, published_at",
        )
        .bind(public_id)
        .bind(&group_key)
        .bind(account_id)
        .bind(SCHEDULED_TARGET_COUNT)
        .bind(scheduled_at)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(row);
        }
    }

    Err(DbError::NotFound)
}

/// Appends a rendered post to a collecting group.
///
/// One transaction: lock the group row (`FOR UPDATE NOWAIT`), re-read
/// `collected_count` (it may have advanced since the caller observed it),
/// assign `position_in_carousel = collected_count`, link the post,
/// increment the count, commit. Content rendering must already be done —
/// the lock is held for bookkeeping only.
///
/// # Errors
///
/// - [`DbError::LockContention`] — another append/trigger holds the row;
///   retry immediately.
/// - [`DbError::InvalidTransition`] — the group is no longer `collecting`
///   (caller re-resolves a fresh group) or the post is not an unassigned
///   `pending` row.
/// - [`DbError::Sqlx`] — any other query failure.
pub async fn append_post_to_group(
    pool: &PgPool,
    group_id: i64,
    post_id: i64,
) -> Result<AppendOutcome, DbError> {
    let mut tx = pool.begin().await?;

    let group = sqlx::query_as::<_, CarouselGroupRow>(
        "SELECT id, public_id, group_key, account_id, status, target_count, \
                collected_count, scheduled_at, retry_count, error_message, \
                platform_post_id, platform_post_url, created_at, published_at \
         FROM carousel_groups \
         WHERE id = $1 \
         FOR UPDATE NOWAIT",
    )
    .bind(group_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| DbError::from_lock_attempt(e, "carousel_group", group_id))?
    .ok_or(DbError::NotFound)?;

    if group.status != "collecting" {
        return Err(DbError::InvalidTransition {
            entity: "carousel_group",
            id: group_id,
            expected_status: "collecting",
        });
    }

    let position = group.collected_count;

    let linked = sqlx::query(
        "UPDATE social_posts \
         SET carousel_group_id = $1, position_in_carousel = $2, scheduled_at = $3, \
             updated_at = NOW() \
         WHERE id = $4 AND status = 'pending' AND carousel_group_id IS NULL",
    )
    .bind(group_id)
    .bind(position)
    .bind(group.scheduled_at)
    .bind(post_id)
    .execute(&mut *tx)
    .await?;

    if linked.rows_affected() == 0 {
        return Err(DbError::InvalidTransition {
            entity: "social_post",
            id: post_id,
            expected_status: "pending (unassigned)",
        });
    }

    sqlx::query(
        "UPDATE carousel_groups SET collected_count = collected_count + 1 WHERE id = $1",
    )
    .bind(group_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(AppendOutcome {
        position,
        collected_count: position + 1,
        target_count: group.target_count,
    })
}

/// Counts a group's ready members: rendered and not failed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn count_ready_members(pool: &PgPool, group_id: i64) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM social_posts \
         WHERE carousel_group_id = $1 AND status <> 'failed' AND image_ref IS NOT NULL",
    )
    .bind(group_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Checks a collecting group's trigger condition and, if met, moves it to
/// `queued` — at most once in the group's lifetime.
///
/// Under the group's lock: when `require_full` the group must have
/// `collected_count >= target_count` (batch policy; time-due scheduled
/// groups pass `false`), and at least `min_ready` members must be ready.
/// The publish job must be enqueued by the caller after this returns
/// `Triggered`, never inside the critical section.
///
/// # Errors
///
/// Returns [`DbError::LockContention`] when the row lock is contended,
/// or [`DbError::Sqlx`] on query failure.
pub async fn try_mark_group_queued(
    pool: &PgPool,
    group_id: i64,
    min_ready: i64,
    require_full: bool,
) -> Result<TriggerCheck, DbError> {
    let mut tx = pool.begin().await?;

    let group = sqlx::query_as::<_, CarouselGroupRow>(
        "SELECT id, public_id, group_key, account_id, status, target_count, \
                collected_count, scheduled_at, retry_count, error_message, \
                platform_post_id, platform_post_url, created_at, published_at \
         FROM carousel_groups \
         WHERE id = $1 \
         FOR UPDATE NOWAIT",
    )
    .bind(group_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| DbError::from_lock_attempt(e, "carousel_group", group_id))?
    .ok_or(DbError::NotFound)?;

    if group.status != "collecting" {
        return Ok(TriggerCheck::AlreadyTriggered);
    }

    if require_full && group.collected_count < group.target_count {
        return Ok(TriggerCheck::NotFull {
            collected: group.collected_count,
            target: group.target_count,
        });
    }

    let ready = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM social_posts \
         WHERE carousel_group_id = $1 AND status <> 'failed' AND image_ref IS NOT NULL",
    )
    .bind(group_id)
    .fetch_one(&mut *tx)
    .await?;

    if ready < min_ready {
        return Ok(TriggerCheck::NotEnoughReady { ready, min_ready });
    }

    sqlx::query("UPDATE carousel_groups SET status = 'queued' WHERE id = $1 AND status = 'collecting'")
        .bind(group_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(TriggerCheck::Triggered)
}

/// Claims a group for a publish attempt: `queued` or `failed` (retry) →
/// `publishing`.
///
/// Returns `None` when the group is in any other status, which is what
/// makes re-delivered jobs and repeated recovery sweeps no-ops instead of
/// double publishes.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn claim_group_for_publish(
    pool: &PgPool,
    group_id: i64,
) -> Result<Option<CarouselGroupRow>, DbError> {
    let row = sqlx::query_as::<_, CarouselGroupRow>(
        "UPDATE carousel_groups \
         SET status = 'publishing' \
         WHERE id = $1 AND status IN ('queued', 'failed') \
         RETURNING id, public_id, group_key, account_id, status, target_count, \
                   collected_count, scheduled_at, retry_count, error_message, \
                   platform_post_id, platform_post_url, created_at, published_at",
    )
    .bind(group_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Marks a `publishing` group and every non-published member `published`,
/// all carrying the same verified platform identifier. One transaction —
/// a carousel publish has no partial success.
///
/// Returns the number of member posts published.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the group is not
/// `publishing`, or [`DbError::Sqlx`] if any update fails.
pub async fn complete_group_publish(
    pool: &PgPool,
    group_id: i64,
    platform_post_id: &str,
    platform_post_url: Option<&str>,
) -> Result<i64, DbError> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE carousel_groups \
         SET status = 'published', platform_post_id = $1, platform_post_url = $2, \
             published_at = NOW(), error_message = NULL \
         WHERE id = $3 AND status = 'publishing'",
    )
    .bind(platform_post_id)
    .bind(platform_post_url)
    .bind(group_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidTransition {
            entity: "carousel_group",
            id: group_id,
            expected_status: "publishing",
        });
    }

    let members = sqlx::query(
        "UPDATE social_posts \
         SET status = 'published', platform_post_id = $1, platform_post_url = $2, \
             published_at = NOW(), error_message = NULL, updated_at = NOW() \
         WHERE carousel_group_id = $3 AND status <> 'published'",
    )
    .bind(platform_post_id)
    .bind(platform_post_url)
    .bind(group_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    #[allow(clippy::cast_possible_wrap)]
    Ok(members.rows_affected() as i64)
}

/// Records a failed carousel publish: the group and every non-published
/// member go to `failed` with the shared error reference, atomically —
/// a carousel publish has no partial-success outcome. Members failed by a
/// previous attempt are re-stamped so the whole set always carries the
/// latest shared error. Returns the group's new `retry_count`.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the group is not
/// `publishing`, or [`DbError::Sqlx`] if any update fails.
pub async fn fail_group_publish(
    pool: &PgPool,
    group_id: i64,
    error_message: &str,
) -> Result<i32, DbError> {
    let mut tx = pool.begin().await?;

    let retry_count = sqlx::query_scalar::<_, i32>(
        "UPDATE carousel_groups \
         SET status = 'failed', error_message = $1, retry_count = retry_count + 1 \
         WHERE id = $2 AND status = 'publishing' \
         RETURNING retry_count",
    )
    .bind(error_message)
    .bind(group_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(DbError::InvalidTransition {
        entity: "carousel_group",
        id: group_id,
        expected_status: "publishing",
    })?;

    sqlx::query(
        "UPDATE social_posts \
         SET status = 'failed', error_message = $1, updated_at = NOW() \
         WHERE carousel_group_id = $2 AND status <> 'published'",
    )
    .bind(error_message)
    .bind(group_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(retry_count)
}

/// Fetches a single group by its internal `id`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists with the given `id`, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_group(pool: &PgPool, id: i64) -> Result<CarouselGroupRow, DbError> {
    let row = sqlx::query_as::<_, CarouselGroupRow>(
        "SELECT id, public_id, group_key, account_id, status, target_count, \
                collected_count, scheduled_at, retry_count, error_message, \
                platform_post_id, platform_post_url, created_at, published_at \
         FROM carousel_groups \
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Returns collecting scheduled groups whose publish slot has passed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_due_scheduled_groups(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<CarouselGroupRow>, DbError> {
    let rows = sqlx::query_as::<_, CarouselGroupRow>(
        "SELECT id, public_id, group_key, account_id, status, target_count, \
                collected_count, scheduled_at, retry_count, error_message, \
                platform_post_id, platform_post_url, created_at, published_at \
         FROM carousel_groups \
         WHERE status = 'collecting' AND scheduled_at IS NOT NULL AND scheduled_at <= $1 \
         ORDER BY scheduled_at, id \
         LIMIT $2",
    )
    .bind(now)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns collecting batch groups older than `cutoff` that never
/// triggered. A group stalls either full-but-short-on-ready-members or
/// below target because some posts' synchronous render failed and was
/// excluded; both recover the same way (backfill, then the trigger check
/// re-applies the full batch rules), so selection is purely age-based.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_stale_batch_groups(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<CarouselGroupRow>, DbError> {
    let rows = sqlx::query_as::<_, CarouselGroupRow>(
        "SELECT id, public_id, group_key, account_id, status, target_count, \
                collected_count, scheduled_at, retry_count, error_message, \
                platform_post_id, platform_post_url, created_at, published_at \
         FROM carousel_groups \
         WHERE status = 'collecting' AND scheduled_at IS NULL \
           AND created_at < $1 \
         ORDER BY created_at, id \
         LIMIT $2",
    )
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns the most recent groups, optionally filtered by status, for the
/// operator API.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_recent_groups(
    pool: &PgPool,
    status: Option<&str>,
    limit: i64,
) -> Result<Vec<CarouselGroupRow>, DbError> {
    let rows = sqlx::query_as::<_, CarouselGroupRow>(
        "SELECT id, public_id, group_key, account_id, status, target_count, \
                collected_count, scheduled_at, retry_count, error_message, \
                platform_post_id, platform_post_url, created_at, published_at \
         FROM carousel_groups \
         WHERE $1::TEXT IS NULL OR status = $1 \
         ORDER BY created_at DESC, id DESC \
         LIMIT $2",
    )
    .bind(status)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
