//! Entry point for approved forum posts.
//!
//! Resolves the active accounts in scope, creates one social post per
//! match, drives content preparation, and hands the rendered post to the
//! trigger router. Per-account failures are isolated: each account gets
//! its own outcome and one account's error never blocks its siblings.

use sqlx::PgPool;

use sopub_core::ApprovedPost;
use sopub_db::{
    create_post, list_matching_accounts, mark_post_render_failed, set_rendered_content, AccountRow,
};

use crate::error::EngineError;
use crate::prepare::{PreparerWithRetry, RenderInput};
use crate::trigger::{parse_trigger, RouteOutcome, TriggerRouter};

/// Per-account result of one dispatch.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub account_id: i64,
    pub account_slug: String,
    pub result: Result<RouteOutcome, EngineError>,
}

/// Drives approval → render → route for every matching account.
#[derive(Clone)]
pub struct Dispatcher {
    pool: PgPool,
    preparer: PreparerWithRetry,
    router: TriggerRouter,
}

impl Dispatcher {
    #[must_use]
    pub fn new(pool: PgPool, preparer: PreparerWithRetry, router: TriggerRouter) -> Self {
        Self {
            pool,
            preparer,
            router,
        }
    }

    /// Dispatches one approved forum post to every matching active account.
    ///
    /// The caller blocks only for content preparation; publishing is fully
    /// asynchronous behind the job queue.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] only if the account scope query itself
    /// fails; per-account errors are captured in the outcome list.
    pub async fn dispatch(&self, post: &ApprovedPost) -> Result<Vec<DispatchOutcome>, EngineError> {
        let accounts = list_matching_accounts(
            &self.pool,
            post.school_id,
            post.cross_school_announcement,
        )
        .await?;

        if accounts.is_empty() {
            tracing::info!(
                forum_post_id = post.forum_post_id,
                "no active accounts in scope; nothing to publish"
            );
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::with_capacity(accounts.len());
        for account in accounts {
            let result = self.dispatch_to_account(&account, post).await;
            match &result {
                Ok(outcome) => {
                    tracing::info!(
                        account = %account.slug,
                        forum_post_id = post.forum_post_id,
                        ?outcome,
                        "dispatched"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        account = %account.slug,
                        forum_post_id = post.forum_post_id,
                        error = %e,
                        "dispatch failed for account"
                    );
                }
            }
            outcomes.push(DispatchOutcome {
                account_id: account.id,
                account_slug: account.slug.clone(),
                result,
            });
        }

        Ok(outcomes)
    }

    async fn dispatch_to_account(
        &self,
        account: &AccountRow,
        post: &ApprovedPost,
    ) -> Result<RouteOutcome, EngineError> {
        // Misconfigured accounts fail before any social post row exists.
        parse_trigger(account)?;

        let Some(row) = create_post(
            &self.pool,
            account.id,
            post.forum_post_id,
            &post.title,
            &post.body,
        )
        .await?
        else {
            return Ok(RouteOutcome::AlreadyDispatched);
        };

        let input = RenderInput::for_post(&row, account);
        let content = match self.preparer.prepare(&input).await {
            Ok(content) => content,
            Err(err) => {
                // Terminal per-post render failure; the recovery sweep may
                // pick it up later. The row keeps the error for operators.
                mark_post_render_failed(&self.pool, row.id, &err.to_string()).await?;
                return Err(err.into());
            }
        };

        set_rendered_content(
            &self.pool,
            row.id,
            &content.image_ref,
            &content.caption,
            &content.caption_fragment,
        )
        .await?;

        self.router.route(account, &row).await
    }
}
