//! Periodic recovery sweep.
//!
//! Two kinds of groups get stuck in `collecting`: scheduled groups whose
//! publish slot has passed, and batch groups that reached their target but
//! never triggered because some members' synchronous render failed. The
//! sweep backfills missing renders under a per-sweep call budget, appends
//! the recovered posts, and re-runs the trigger check. Guarded transitions
//! downstream make repeated sweeps over an unchanged group harmless.

use std::sync::Arc;

use chrono::{Duration, Utc};
use sqlx::PgPool;

use sopub_db::{
    get_account, list_due_scheduled_groups, list_render_failed_posts, list_stale_batch_groups,
    set_rendered_content, AccountRow, CarouselGroupRow, DbError, TriggerCheck,
};

use crate::error::EngineError;
use crate::groups::GroupManager;
use crate::prepare::{PreparerWithRetry, RenderInput};
use crate::queue::{Job, JobQueue};

/// Upper bound on groups examined per sweep and per category; anything
/// beyond it waits for the next tick.
const SCAN_LIMIT: i64 = 50;

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Scheduled groups whose slot had passed.
    pub due_scheduled: usize,
    /// Batch groups full-but-untriggered past the staleness window.
    pub stale_batch: usize,
    /// Posts whose render was successfully backfilled and appended.
    pub backfilled: usize,
    /// Groups this sweep moved to `queued` (and enqueued).
    pub triggered: usize,
}

/// The periodic sweep runner.
#[derive(Clone)]
pub struct RecoveryScanner {
    pool: PgPool,
    preparer: PreparerWithRetry,
    groups: GroupManager,
    queue: Arc<dyn JobQueue>,
    /// Age after which a full-but-untriggered batch group is stale.
    staleness_secs: i64,
    /// Render backfill calls allowed per sweep.
    backfill_limit: i64,
}

impl RecoveryScanner {
    #[must_use]
    pub fn new(
        pool: PgPool,
        preparer: PreparerWithRetry,
        groups: GroupManager,
        queue: Arc<dyn JobQueue>,
        staleness_secs: i64,
        backfill_limit: i64,
    ) -> Self {
        Self {
            pool,
            preparer,
            groups,
            queue,
            staleness_secs,
            backfill_limit,
        }
    }

    /// Runs one sweep. Per-group failures are logged and skipped; one stuck
    /// group never blocks the rest of the sweep.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] only if the sweep's own scan queries fail.
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let now = Utc::now();
        let mut report = SweepReport::default();
        let mut budget = self.backfill_limit;

        let due = list_due_scheduled_groups(&self.pool, now, SCAN_LIMIT).await?;
        report.due_scheduled = due.len();
        for group in &due {
            if let Err(e) = self
                .recover_group(group, false, &mut budget, &mut report)
                .await
            {
                tracing::error!(group_id = group.id, error = %e, "recovery failed for due group");
            }
        }

        let cutoff = now - Duration::seconds(self.staleness_secs);
        let stale = list_stale_batch_groups(&self.pool, cutoff, SCAN_LIMIT).await?;
        report.stale_batch = stale.len();
        for group in &stale {
            if let Err(e) = self
                .recover_group(group, true, &mut budget, &mut report)
                .await
            {
                tracing::error!(group_id = group.id, error = %e, "recovery failed for stale group");
            }
        }

        if report != SweepReport::default() {
            tracing::info!(
                due_scheduled = report.due_scheduled,
                stale_batch = report.stale_batch,
                backfilled = report.backfilled,
                triggered = report.triggered,
                "recovery sweep complete"
            );
        }
        Ok(report)
    }

    /// Backfill-then-maybe-trigger for one stuck group.
    async fn recover_group(
        &self,
        group: &CarouselGroupRow,
        require_full: bool,
        budget: &mut i64,
        report: &mut SweepReport,
    ) -> Result<(), EngineError> {
        let account = get_account(&self.pool, group.account_id).await?;

        if *budget > 0 {
            report.backfilled += self.backfill_failed_renders(&account, group, budget).await?;
        }

        match self.groups.try_trigger(group.id, require_full).await? {
            TriggerCheck::Triggered => {
                self.queue
                    .enqueue(Job::PublishCarousel { group_id: group.id })
                    .await?;
                report.triggered += 1;
                tracing::info!(group_id = group.id, "recovery triggered group");
            }
            check => {
                tracing::info!(group_id = group.id, ?check, "group not ready; deferred to next sweep");
            }
        }
        Ok(())
    }

    /// Re-render this account's render-failed posts (bounded by the sweep
    /// budget) and append each success to the group being recovered.
    async fn backfill_failed_renders(
        &self,
        account: &AccountRow,
        group: &CarouselGroupRow,
        budget: &mut i64,
    ) -> Result<usize, EngineError> {
        let candidates = list_render_failed_posts(&self.pool, account.id, *budget).await?;
        let mut recovered = 0usize;

        for post in candidates {
            *budget -= 1;

            let content = match self.preparer.prepare(&RenderInput::for_post(&post, account)).await
            {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!(
                        post_id = post.id,
                        error = %err,
                        "backfill render failed again; next sweep may retry"
                    );
                    continue;
                }
            };

            set_rendered_content(
                &self.pool,
                post.id,
                &content.image_ref,
                &content.caption,
                &content.caption_fragment,
            )
            .await?;

            match self.groups.append(group.id, post.id).await {
                Ok(outcome) => {
                    recovered += 1;
                    tracing::info!(
                        post_id = post.id,
                        group_id = group.id,
                        position = outcome.position,
                        "backfilled post into group"
                    );
                }
                Err(DbError::InvalidTransition { .. }) => {
                    // The group closed while we rendered; the post stays
                    // pending and the dispatcher-side router path owns it
                    // no longer — the next sweep's trigger check will not
                    // count it, which is correct for this group.
                    tracing::warn!(
                        post_id = post.id,
                        group_id = group.id,
                        "group closed during backfill; post left pending"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(recovered)
    }
}
