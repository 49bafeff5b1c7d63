//! Database operations for `publish_accounts`.
//!
//! Accounts are admin-managed (see the accounts seed file); the engine reads
//! them and only ever writes the publish counters.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `publish_accounts` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub public_id: Uuid,
    pub slug: String,
    pub name: String,
    pub platform: String,
    /// `NULL` for network-wide accounts.
    pub school_id: Option<i64>,
    pub trigger_type: String,
    pub batch_size: i32,
    pub schedule_hour: Option<i16>,
    pub status: String,
    pub default_template_id: i64,
    pub caption_header: Option<String>,
    pub caption_footer: Option<String>,
    pub hashtags: Vec<String>,
    pub posts_published: i32,
    pub last_published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fetches a single account by its internal `id`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists with the given `id`, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_account(pool: &PgPool, id: i64) -> Result<AccountRow, DbError> {
    let row = sqlx::query_as::<_, AccountRow>(
        "SELECT id, public_id, slug, name, platform, school_id, trigger_type, \
                batch_size, schedule_hour, status, default_template_id, caption_header, \
                caption_footer, hashtags, posts_published, last_published_at, \
                created_at, updated_at \
         FROM publish_accounts \
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Returns every account with `status = 'active'`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_active_accounts(pool: &PgPool) -> Result<Vec<AccountRow>, DbError> {
    let rows = sqlx::query_as::<_, AccountRow>(
        "SELECT id, public_id, slug, name, platform, school_id, trigger_type, \
                batch_size, schedule_hour, status, default_template_id, caption_header, \
                caption_footer, hashtags, posts_published, last_published_at, \
                created_at, updated_at \
         FROM publish_accounts \
         WHERE status = 'active' \
         ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns active accounts in scope for an approved post.
///
/// Cross-school announcements match every active account; otherwise an
/// account matches when its `school_id` equals the post's (both possibly
/// `NULL` for district-level posts on network-wide accounts).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_matching_accounts(
    pool: &PgPool,
    school_id: Option<i64>,
    cross_school_announcement: bool,
) -> Result<Vec<AccountRow>, DbError> {
    let rows = sqlx::query_as::<_, AccountRow>(
        "SELECT id, public_id, slug, name, platform, school_id, trigger_type, \
                batch_size, schedule_hour, status, default_template_id, caption_header, \
                caption_footer, hashtags, posts_published, last_published_at, \
                created_at, updated_at \
         FROM publish_accounts \
         WHERE status = 'active' \
           AND ($2 OR school_id IS NOT DISTINCT FROM $1) \
         ORDER BY id",
    )
    .bind(school_id)
    .bind(cross_school_announcement)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Adds `count` to the account's published counter and stamps
/// `last_published_at`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn increment_published(pool: &PgPool, id: i64, count: i32) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE publish_accounts \
         SET posts_published = posts_published + $1, \
             last_published_at = NOW(), \
             updated_at = NOW() \
         WHERE id = $2",
    )
    .bind(count)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}
