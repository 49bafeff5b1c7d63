use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{env, time::Duration};
use thiserror::Error;

mod accounts;
mod groups;
mod posts;
mod seed;

pub use accounts::{
    get_account, increment_published, list_active_accounts, list_matching_accounts, AccountRow,
};
pub use groups::{
    append_post_to_group, claim_group_for_publish, complete_group_publish, count_ready_members,
    fail_group_publish, find_or_create_batch_group, find_or_create_scheduled_group, get_group,
    list_due_scheduled_groups, list_recent_groups, list_stale_batch_groups, try_mark_group_queued,
    AppendOutcome, CarouselGroupRow, TriggerCheck, SCHEDULED_TARGET_COUNT,
};
pub use posts::{
    cache_rendered_content, claim_post_for_publish, create_post, get_post, list_group_members,
    list_recent_posts, list_render_failed_posts, mark_post_published, mark_post_queued,
    mark_post_render_failed, record_publish_failure, set_rendered_content, SocialPostRow,
};
pub use seed::seed_accounts;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

// Path relative to crates/sopub-db/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_connections: read_u32("SOPUB_DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS),
            min_connections: read_u32("SOPUB_DB_MIN_CONNECTIONS", DEFAULT_MIN_CONNECTIONS),
            acquire_timeout_secs: read_u64(
                "SOPUB_DB_ACQUIRE_TIMEOUT_SECS",
                DEFAULT_ACQUIRE_TIMEOUT_SECS,
            ),
        }
    }

    #[must_use]
    pub fn from_app_config(config: &sopub_core::AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,
    #[error("record not found")]
    NotFound,
    /// A guarded status transition found the row in an unexpected state.
    #[error("invalid {entity} transition for id {id}: expected status {expected_status}")]
    InvalidTransition {
        entity: &'static str,
        id: i64,
        expected_status: &'static str,
    },
    /// `FOR UPDATE NOWAIT` lost the race for a group row (SQLSTATE 55P03).
    /// Transient: the critical section is short, callers retry immediately.
    #[error("lock contention on {entity} id {id}")]
    LockContention { entity: &'static str, id: i64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Wrap a sqlx error, converting Postgres `lock_not_available` (55P03,
    /// raised by `FOR UPDATE NOWAIT`) into [`DbError::LockContention`].
    fn from_lock_attempt(err: sqlx::Error, entity: &'static str, id: i64) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.code().as_deref() == Some("55P03") {
                return DbError::LockContention { entity, id };
            }
        }
        DbError::Sqlx(err)
    }

    /// True for errors worth an immediate retry of the whole critical section.
    #[must_use]
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, DbError::LockContention { .. })
    }
}

/// Connect to a Postgres pool using explicit URL and config.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the connection cannot be established.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Connect to a Postgres pool, reading `DATABASE_URL` and pool settings from env.
///
/// # Errors
///
/// Returns [`DbError::MissingDatabaseUrl`] if `DATABASE_URL` is unset, or
/// [`DbError::Sqlx`] if the connection cannot be established.
pub async fn connect_pool_from_env() -> Result<PgPool, DbError> {
    let database_url = env::var("DATABASE_URL").map_err(|_| DbError::MissingDatabaseUrl)?;
    let config = PoolConfig::from_env();
    connect_pool(&database_url, config)
        .await
        .map_err(DbError::from)
}

/// Cheap liveness probe for the ops health endpoint.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the database does not answer.
pub async fn health_check(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Run all pending migrations from `<workspace-root>/migrations/`.
///
/// # Errors
///
/// Returns [`DbError::Migration`] if any migration fails to apply.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

fn read_u32(var: &str, default: u32) -> u32 {
    env::var(var)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn read_u64(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
