//! Maps an account's trigger policy onto the right publish path.
//!
//! `immediate` enqueues a single-publish job and never touches the group
//! manager; `scheduled` and `batch_count` append to the account's
//! collecting group, and the batch policy runs the trigger check when an
//! append fills the group. Carousel jobs are enqueued strictly after the
//! group lock is released.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;

use sopub_core::{next_publish_time, ConfigError, TriggerType};
use sopub_db::{mark_post_queued, AccountRow, DbError, SocialPostRow, TriggerCheck};

use crate::error::EngineError;
use crate::groups::GroupManager;
use crate::queue::{Job, JobQueue};

/// Re-resolve attempts when an append races a concurrent trigger and the
/// group closes under us.
const APPEND_REROUTE_ATTEMPTS: u32 = 3;

/// What routing one rendered post produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A social post for this account and forum post already existed.
    AlreadyDispatched,
    /// Immediate policy: the single-publish job is on the queue.
    QueuedSingle { post_id: i64 },
    /// Appended to a collecting group that is still filling.
    Collected {
        group_id: i64,
        position: i32,
        collected: i32,
        target: i32,
    },
    /// The append filled the group and this call won the trigger: the
    /// carousel job is on the queue.
    Triggered { group_id: i64, collected: i32 },
    /// The group reached its count but has too few ready members; the
    /// recovery sweep will revisit it.
    Waiting {
        group_id: i64,
        ready: i64,
        min_ready: i64,
    },
}

/// Validates and reads an account's trigger policy.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] for an unknown trigger type or a
/// scheduled account without `schedule_hour` — dispatch fails fast before
/// any row is created.
pub fn parse_trigger(account: &AccountRow) -> Result<TriggerType, ConfigError> {
    let trigger = TriggerType::parse(&account.trigger_type).ok_or_else(|| {
        ConfigError::Validation(format!(
            "account '{}': unknown trigger type '{}'",
            account.slug, account.trigger_type
        ))
    })?;

    if trigger == TriggerType::Scheduled && account.schedule_hour.is_none() {
        return Err(ConfigError::Validation(format!(
            "account '{}': scheduled trigger requires schedule_hour",
            account.slug
        )));
    }

    Ok(trigger)
}

/// Routes rendered posts according to the account's policy.
#[derive(Clone)]
pub struct TriggerRouter {
    pool: PgPool,
    groups: GroupManager,
    queue: Arc<dyn JobQueue>,
}

impl TriggerRouter {
    #[must_use]
    pub fn new(pool: PgPool, groups: GroupManager, queue: Arc<dyn JobQueue>) -> Self {
        Self { pool, groups, queue }
    }

    /// Routes one successfully rendered, still-`pending` post.
    ///
    /// # Errors
    ///
    /// [`EngineError::Config`] for invalid trigger config,
    /// [`EngineError::Db`] / [`EngineError::Queue`] from the underlying
    /// operations.
    pub async fn route(
        &self,
        account: &AccountRow,
        post: &SocialPostRow,
    ) -> Result<RouteOutcome, EngineError> {
        match parse_trigger(account)? {
            TriggerType::Immediate => self.route_immediate(post).await,
            TriggerType::Scheduled => self.route_scheduled(account, post).await,
            TriggerType::BatchCount => self.route_batch(account, post).await,
        }
    }

    async fn route_immediate(&self, post: &SocialPostRow) -> Result<RouteOutcome, EngineError> {
        mark_post_queued(&self.pool, post.id).await?;
        self.queue.enqueue(Job::PublishSingle { post_id: post.id }).await?;
        Ok(RouteOutcome::QueuedSingle { post_id: post.id })
    }

    async fn route_scheduled(
        &self,
        account: &AccountRow,
        post: &SocialPostRow,
    ) -> Result<RouteOutcome, EngineError> {
        // parse_trigger already guaranteed the hour is present.
        let hour = account.schedule_hour.unwrap_or(0);
        let slot = next_publish_time(hour, Utc::now());

        let mut attempt = 0u32;
        loop {
            let group = self.groups.resolve_scheduled_group(account.id, slot).await?;
            match self.groups.append(group.id, post.id).await {
                Ok(outcome) => {
                    return Ok(RouteOutcome::Collected {
                        group_id: group.id,
                        position: outcome.position,
                        collected: outcome.collected_count,
                        target: outcome.target_count,
                    });
                }
                Err(DbError::InvalidTransition {
                    entity: "carousel_group",
                    ..
                }) if attempt < APPEND_REROUTE_ATTEMPTS => {
                    // The slot's group was triggered between resolve and
                    // append; a fresh group takes its place.
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn route_batch(
        &self,
        account: &AccountRow,
        post: &SocialPostRow,
    ) -> Result<RouteOutcome, EngineError> {
        let mut attempt = 0u32;
        let (group_id, outcome) = loop {
            let group = self
                .groups
                .resolve_batch_group(account.id, account.batch_size)
                .await?;
            match self.groups.append(group.id, post.id).await {
                Ok(outcome) => break (group.id, outcome),
                Err(DbError::InvalidTransition {
                    entity: "carousel_group",
                    ..
                }) if attempt < APPEND_REROUTE_ATTEMPTS => {
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        if !outcome.reached_target() {
            return Ok(RouteOutcome::Collected {
                group_id,
                position: outcome.position,
                collected: outcome.collected_count,
                target: outcome.target_count,
            });
        }

        match self.groups.try_trigger(group_id, true).await? {
            TriggerCheck::Triggered => {
                // Lock already released; safe to hand the group to a worker.
                self.queue.enqueue(Job::PublishCarousel { group_id }).await?;
                Ok(RouteOutcome::Triggered {
                    group_id,
                    collected: outcome.collected_count,
                })
            }
            TriggerCheck::AlreadyTriggered | TriggerCheck::NotFull { .. } => {
                Ok(RouteOutcome::Collected {
                    group_id,
                    position: outcome.position,
                    collected: outcome.collected_count,
                    target: outcome.target_count,
                })
            }
            TriggerCheck::NotEnoughReady { ready, min_ready } => Ok(RouteOutcome::Waiting {
                group_id,
                ready,
                min_ready,
            }),
        }
    }
}
