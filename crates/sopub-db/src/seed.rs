use sopub_core::accounts::AccountSeed;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// Upsert accounts from the seed file into the database.
///
/// Returns the number of accounts processed (inserted or updated).
/// All upserts run inside a single transaction; if any operation fails
/// the entire batch is rolled back. Engine-owned columns
/// (`posts_published`, `last_published_at`) are never touched here.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any database operation fails.
pub async fn seed_accounts(pool: &PgPool, accounts: &[AccountSeed]) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;
    let mut count = 0usize;

    for account in accounts {
        let slug = account.slug();
        let trigger_type = account.trigger.to_string();
        let status = account.status.to_string();

        sqlx::query(
            "INSERT INTO publish_accounts \
                 (public_id, slug, name, platform, school_id, trigger_type, batch_size, \
                  schedule_hour, status, default_template_id, caption_header, \
                  caption_footer, hashtags) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (slug) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 platform = EXCLUDED.platform, \
                 school_id = EXCLUDED.school_id, \
                 trigger_type = EXCLUDED.trigger_type, \
                 batch_size = EXCLUDED.batch_size, \
                 schedule_hour = EXCLUDED.schedule_hour, \
                 status = EXCLUDED.status, \
                 default_template_id = EXCLUDED.default_template_id, \
                 caption_header = EXCLUDED.caption_header, \
                 caption_footer = EXCLUDED.caption_footer, \
                 hashtags = EXCLUDED.hashtags, \
                 updated_at = NOW()",
        )
        .bind(Uuid::new_v4())
        .bind(&slug)
        .bind(&account.name)
        .bind(&account.platform)
        .bind(account.school_id)
        .bind(&trigger_type)
        .bind(account.batch_size)
        .bind(account.schedule_hour)
        .bind(&status)
        .bind(account.default_template_id)
        .bind(&account.caption_header)
        .bind(&account.caption_footer)
        .bind(&account.hashtags)
        .execute(&mut *tx)
        .await?;

        count += 1;
    }

    tx.commit().await?;
    Ok(count)
}
