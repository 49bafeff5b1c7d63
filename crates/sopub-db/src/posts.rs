//! Database operations for `social_posts`.
//!
//! Every status change is a guarded `UPDATE ... WHERE status = ...`; a
//! transition that finds the row in another state reports
//! [`DbError::InvalidTransition`] instead of silently overwriting. Once a
//! post is assigned to a carousel group it is only mutated again by the
//! worker that publishes that group.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `social_posts` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SocialPostRow {
    pub id: i64,
    pub public_id: Uuid,
    pub account_id: i64,
    pub forum_post_id: i64,
    /// Snapshot of the approved forum post used for (re-)rendering.
    pub title: String,
    pub body: String,
    pub carousel_group_id: Option<i64>,
    /// 0-based position inside the group; assigned under the group's lock.
    pub position_in_carousel: Option<i32>,
    pub status: String,
    pub image_ref: Option<String>,
    pub caption: Option<String>,
    /// Short per-item body used when the post publishes inside a carousel.
    pub caption_fragment: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SocialPostRow {
    /// A post is ready for a carousel when its render succeeded and it has
    /// not failed since.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.image_ref.is_some() && self.status != "failed"
    }
}

/// Creates a `pending` post for `(account_id, forum_post_id)`.
///
/// Returns `None` if a post for that pair already exists — dispatch of an
/// already-dispatched forum post is a no-op, never a duplicate row.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_post(
    pool: &PgPool,
    account_id: i64,
    forum_post_id: i64,
    title: &str,
    body: &str,
) -> Result<Option<SocialPostRow>, DbError> {
    let public_id = Uuid::new_v4();

    let row = sqlx::query_as::<_, SocialPostRow>(
        "INSERT INTO social_posts (public_id, account_id, forum_post_id, title, body, status) \
         VALUES ($1, $2, $3, $4, $5, 'pending') \
         ON CONFLICT (account_id, forum_post_id) DO NOTHING \
         RETURNING id, public_id, account_id, forum_post_id, title, body, carousel_group_id, \
                   position_in_carousel, status, image_ref, caption, caption_fragment, \
                   error_message, retry_count, scheduled_at, published_at, \
                   platform_post_id, platform_post_url, created_at, updated_at",
    )
    .bind(public_id)
    .bind(account_id)
    .bind(forum_post_id)
    .bind(title)
    .bind(body)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Stores a successful render on a post and returns it to `pending`.
///
/// Accepts posts in `pending` (first render) or `failed` (recovery
/// backfill); clears any previous render error.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the post is in any other
/// status, or [`DbError::Sqlx`] if the update fails.
pub async fn set_rendered_content(
    pool: &PgPool,
    id: i64,
    image_ref: &str,
    caption: &str,
    caption_fragment: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE social_posts \
         SET image_ref = $1, caption = $2, caption_fragment = $3, \
             error_message = NULL, status = 'pending', updated_at = NOW() \
         WHERE id = $4 AND status IN ('pending', 'failed')",
    )
    .bind(image_ref)
    .bind(caption)
    .bind(caption_fragment)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidTransition {
            entity: "social_post",
            id,
            expected_status: "pending|failed",
        });
    }

    Ok(())
}

/// Caches a render produced mid-publish without touching the post's status.
///
/// Used by the worker's "ensure render is ready" path, where the post is
/// already `processing` (single publish) or sitting in a `publishing`
/// group's membership.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the post is already
/// `published`, or [`DbError::Sqlx`] if the update fails.
pub async fn cache_rendered_content(
    pool: &PgPool,
    id: i64,
    image_ref: &str,
    caption: &str,
    caption_fragment: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE social_posts \
         SET image_ref = $1, caption = $2, caption_fragment = $3, updated_at = NOW() \
         WHERE id = $4 AND status <> 'published'",
    )
    .bind(image_ref)
    .bind(caption)
    .bind(caption_fragment)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidTransition {
            entity: "social_post",
            id,
            expected_status: "not published",
        });
    }

    Ok(())
}

/// Marks a post `failed` after content generation exhausted its retries.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the post is not `pending`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn mark_post_render_failed(
    pool: &PgPool,
    id: i64,
    error_message: &str,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE social_posts \
         SET status = 'failed', error_message = $1, updated_at = NOW() \
         WHERE id = $2 AND status = 'pending'",
    )
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidTransition {
            entity: "social_post",
            id,
            expected_status: "pending",
        });
    }

    Ok(())
}

/// Moves a rendered post from `pending` to `queued` (immediate trigger path).
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the post is not `pending`, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn mark_post_queued(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE social_posts \
         SET status = 'queued', updated_at = NOW() \
         WHERE id = $1 AND status = 'pending'",
    )
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidTransition {
            entity: "social_post",
            id,
            expected_status: "pending",
        });
    }

    Ok(())
}

/// Claims a post for a publish attempt: `queued` or `failed` (retry) →
/// `processing`.
///
/// Returns `None` when the post is in any other status — a re-delivered or
/// stale job must become a no-op, not a second publish.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn claim_post_for_publish(
    pool: &PgPool,
    id: i64,
) -> Result<Option<SocialPostRow>, DbError> {
    let row = sqlx::query_as::<_, SocialPostRow>(
        "UPDATE social_posts \
         SET status = 'processing', updated_at = NOW() \
         WHERE id = $1 AND status IN ('queued', 'failed') \
         RETURNING id, public_id, account_id, forum_post_id, title, body, carousel_group_id, \
                   position_in_carousel, status, image_ref, caption, caption_fragment, \
                   error_message, retry_count, scheduled_at, published_at, \
                   platform_post_id, platform_post_url, created_at, updated_at",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Marks a `processing` post `published` with its verified platform identifier.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the post is not `processing`,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn mark_post_published(
    pool: &PgPool,
    id: i64,
    platform_post_id: &str,
    platform_post_url: Option<&str>,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE social_posts \
         SET status = 'published', platform_post_id = $1, platform_post_url = $2, \
             published_at = NOW(), error_message = NULL, updated_at = NOW() \
         WHERE id = $3 AND status = 'processing'",
    )
    .bind(platform_post_id)
    .bind(platform_post_url)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidTransition {
            entity: "social_post",
            id,
            expected_status: "processing",
        });
    }

    Ok(())
}

/// Records a failed publish attempt: `processing` → `failed`, incrementing
/// `retry_count`. Returns the new `retry_count` so the caller can decide
/// whether another attempt is allowed.
///
/// # Errors
///
/// Returns [`DbError::InvalidTransition`] if the post is not `processing`,
/// or [`DbError::Sqlx`] if the update fails.
pub async fn record_publish_failure(
    pool: &PgPool,
    id: i64,
    error_message: &str,
) -> Result<i32, DbError> {
    let retry_count = sqlx::query_scalar::<_, i32>(
        "UPDATE social_posts \
         SET status = 'failed', error_message = $1, retry_count = retry_count + 1, \
             updated_at = NOW() \
         WHERE id = $2 AND status = 'processing' \
         RETURNING retry_count",
    )
    .bind(error_message)
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::InvalidTransition {
        entity: "social_post",
        id,
        expected_status: "processing",
    })?;

    Ok(retry_count)
}

/// Fetches a single post by its internal `id`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists with the given `id`, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_post(pool: &PgPool, id: i64) -> Result<SocialPostRow, DbError> {
    let row = sqlx::query_as::<_, SocialPostRow>(
        "SELECT id, public_id, account_id, forum_post_id, title, body, carousel_group_id, \
                position_in_carousel, status, image_ref, caption, caption_fragment, \
                error_message, retry_count, scheduled_at, published_at, \
                platform_post_id, platform_post_url, created_at, updated_at \
         FROM social_posts \
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Returns a group's members ordered by `position_in_carousel`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_group_members(
    pool: &PgPool,
    carousel_group_id: i64,
) -> Result<Vec<SocialPostRow>, DbError> {
    let rows = sqlx::query_as::<_, SocialPostRow>(
        "SELECT id, public_id, account_id, forum_post_id, title, body, carousel_group_id, \
                position_in_carousel, status, image_ref, caption, caption_fragment, \
                error_message, retry_count, scheduled_at, published_at, \
                platform_post_id, platform_post_url, created_at, updated_at \
         FROM social_posts \
         WHERE carousel_group_id = $1 \
         ORDER BY position_in_carousel",
    )
    .bind(carousel_group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns posts whose content generation failed and which are not yet in
/// any group — the recovery sweep's backfill candidates, oldest first.
///
/// Render failures are distinguished from publish failures by the missing
/// `image_ref`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_render_failed_posts(
    pool: &PgPool,
    account_id: i64,
    limit: i64,
) -> Result<Vec<SocialPostRow>, DbError> {
    let rows = sqlx::query_as::<_, SocialPostRow>(
        "SELECT id, public_id, account_id, forum_post_id, title, body, carousel_group_id, \
                position_in_carousel, status, image_ref, caption, caption_fragment, \
                error_message, retry_count, scheduled_at, published_at, \
                platform_post_id, platform_post_url, created_at, updated_at \
         FROM social_posts \
         WHERE account_id = $1 \
           AND status = 'failed' \
           AND carousel_group_id IS NULL \
           AND image_ref IS NULL \
         ORDER BY created_at, id \
         LIMIT $2",
    )
    .bind(account_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns the most recent posts, optionally filtered by status, for the
/// operator API.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_recent_posts(
    pool: &PgPool,
    status: Option<&str>,
    limit: i64,
) -> Result<Vec<SocialPostRow>, DbError> {
    let rows = sqlx::query_as::<_, SocialPostRow>(
        "SELECT id, public_id, account_id, forum_post_id, title, body, carousel_group_id, \
                position_in_carousel, status, image_ref, caption, caption_fragment, \
                error_message, retry_count, scheduled_at, published_at, \
                platform_post_id, platform_post_url, created_at, updated_at \
         FROM social_posts \
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
