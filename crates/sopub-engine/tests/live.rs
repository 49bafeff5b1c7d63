//! End-to-end engine tests over a live Postgres database
//! (`#[sqlx::test(migrations = "../../migrations")]`), with scripted
//! in-process stand-ins for the render service and the platform API.
//!
//! These cover the engine's externally observable properties: carousel
//! triggering at the batch target, gapless positions under concurrent
//! dispatch, atomic carousel failure fan-out, the retry cap, and recovery
//! sweep idempotence.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use sopub_core::{ApprovedPost, PreparedContent};
use sopub_db::{get_group, get_post, list_group_members, seed_accounts};
use sopub_engine::groups::GroupManager;
use sopub_engine::{
    ContentErrorKind, ContentGenerationError, ContentPreparer, Dispatcher, InMemoryQueue,
    JobStream, PlatformPublisher, PreparerWithRetry, PublishError, PublishWorker, RecoveryScanner,
    RenderInput, RouteOutcome, TriggerRouter, WorkerConfig,
};
use sopub_platform::{CarouselItem, PublishOutcome};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

/// Preparer whose failures are scripted per forum post id.
struct ScriptedPreparer {
    failing: Mutex<HashSet<i64>>,
    calls: Mutex<HashMap<i64, u32>>,
}

impl ScriptedPreparer {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn fail_for(&self, forum_post_id: i64) {
        self.failing.lock().unwrap().insert(forum_post_id);
    }

    fn heal(&self, forum_post_id: i64) {
        self.failing.lock().unwrap().remove(&forum_post_id);
    }

    fn calls_for(&self, forum_post_id: i64) -> u32 {
        *self.calls.lock().unwrap().get(&forum_post_id).unwrap_or(&0)
    }
}

#[async_trait]
impl ContentPreparer for ScriptedPreparer {
    async fn render(&self, input: &RenderInput) -> Result<PreparedContent, ContentGenerationError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(input.forum_post_id)
            .or_insert(0) += 1;

        if self.failing.lock().unwrap().contains(&input.forum_post_id) {
            return Err(ContentGenerationError {
                kind: ContentErrorKind::MissingAsset,
                message: format!("missing asset for forum post {}", input.forum_post_id),
            });
        }
        Ok(PreparedContent {
            image_ref: format!("renders/{}.png", input.forum_post_id),
            caption: format!("caption {}", input.forum_post_id),
            caption_fragment: format!("fragment {}", input.forum_post_id),
        })
    }
}

/// Publisher that records every call and fails on request.
struct RecordingPublisher {
    single_calls: Mutex<Vec<(String, String)>>,
    carousel_calls: Mutex<Vec<(Vec<CarouselItem>, String)>>,
    failures_remaining: AtomicU32,
    fail_always: AtomicBool,
    next_id: AtomicU32,
}

impl RecordingPublisher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            single_calls: Mutex::new(Vec::new()),
            carousel_calls: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(0),
            fail_always: AtomicBool::new(false),
            next_id: AtomicU32::new(1),
        })
    }

    fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    fn fail_always(&self) {
        self.fail_always.store(true, Ordering::SeqCst);
    }

    fn single_count(&self) -> usize {
        self.single_calls.lock().unwrap().len()
    }

    fn carousel_count(&self) -> usize {
        self.carousel_calls.lock().unwrap().len()
    }

    fn last_carousel(&self) -> (Vec<CarouselItem>, String) {
        self.carousel_calls.lock().unwrap().last().cloned().expect("no carousel call recorded")
    }

    fn should_fail(&self) -> bool {
        if self.fail_always.load(Ordering::SeqCst) {
            return true;
        }
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn outcome(&self) -> PublishOutcome {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        PublishOutcome {
            platform_post_id: format!("plat_{n}"),
            platform_post_url: Some(format!("https://platform.example/p/{n}")),
        }
    }
}

#[async_trait]
impl PlatformPublisher for RecordingPublisher {
    async fn publish_single(
        &self,
        image_ref: &str,
        caption: &str,
    ) -> Result<PublishOutcome, PublishError> {
        self.single_calls
            .lock()
            .unwrap()
            .push((image_ref.to_owned(), caption.to_owned()));
        if self.should_fail() {
            return Err(PublishError::new("simulated platform outage"));
        }
        Ok(self.outcome())
    }

    async fn publish_carousel(
        &self,
        items: Vec<CarouselItem>,
        combined_caption: &str,
    ) -> Result<PublishOutcome, PublishError> {
        self.carousel_calls
            .lock()
            .unwrap()
            .push((items, combined_caption.to_owned()));
        if self.should_fail() {
            return Err(PublishError::new("simulated platform outage"));
        }
        Ok(self.outcome())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    pool: PgPool,
    dispatcher: Dispatcher,
    worker: PublishWorker,
    scanner: RecoveryScanner,
    jobs: JobStream,
    preparer: Arc<ScriptedPreparer>,
    publisher: Arc<RecordingPublisher>,
}

/// Wires the engine with scripted collaborators. Retry backoff base is 0 so
/// scheduled retries become consumable immediately; staleness is 0 so batch
/// groups are sweepable as soon as they stall.
fn build_harness(pool: PgPool) -> Harness {
    let preparer = ScriptedPreparer::new();
    let publisher = RecordingPublisher::new();
    let (queue, jobs) = InMemoryQueue::new();

    let retry_preparer =
        PreparerWithRetry::new(Arc::clone(&preparer) as Arc<dyn ContentPreparer>, 2);
    let groups = GroupManager::new(pool.clone(), 2);
    let router = TriggerRouter::new(pool.clone(), groups.clone(), queue.clone());
    let dispatcher = Dispatcher::new(pool.clone(), retry_preparer.clone(), router);
    let worker = PublishWorker::new(
        pool.clone(),
        retry_preparer.clone(),
        Arc::clone(&publisher) as Arc<dyn PlatformPublisher>,
        queue.clone(),
        WorkerConfig {
            max_attempts: 3,
            retry_base_secs: 0,
            min_carousel_items: 2,
        },
    );
    let scanner = RecoveryScanner::new(pool.clone(), retry_preparer, groups, queue, 0, 5);

    Harness {
        pool,
        dispatcher,
        worker,
        scanner,
        jobs,
        preparer,
        publisher,
    }
}

/// Process queued jobs (including zero-delay retries) until the queue goes
/// quiet.
async fn drain_jobs(harness: &mut Harness) {
    while let Ok(Some(job)) =
        tokio::time::timeout(Duration::from_millis(250), harness.jobs.recv()).await
    {
        harness.worker.process(job).await;
    }
}

fn approved(forum_post_id: i64, school_id: i64) -> ApprovedPost {
    ApprovedPost {
        forum_post_id,
        school_id: Some(school_id),
        cross_school_announcement: false,
        title: format!("Forum post {forum_post_id}"),
        body: "Body text.".to_string(),
    }
}

fn seed(trigger: &str, batch_size: i32, schedule_hour: Option<i16>) -> sopub_core::AccountSeed {
    sopub_core::AccountSeed {
        name: format!("Test {trigger} {batch_size}"),
        platform: "instagram".to_string(),
        school_id: Some(12),
        trigger: sopub_core::TriggerType::parse(trigger).expect("valid trigger"),
        batch_size,
        schedule_hour,
        default_template_id: 3,
        status: sopub_core::AccountStatus::Active,
        caption_header: Some("This week".to_string()),
        caption_footer: None,
        hashtags: vec!["#school".to_string()],
    }
}

async fn seed_account(pool: &PgPool, account: &sopub_core::AccountSeed) -> i64 {
    seed_accounts(pool, std::slice::from_ref(account))
        .await
        .expect("seed_accounts");
    sqlx::query_scalar::<_, i64>("SELECT id FROM publish_accounts WHERE slug = $1")
        .bind(account.slug())
        .fetch_one(pool)
        .await
        .expect("seeded account exists")
}

async fn collecting_group_id(pool: &PgPool, account_id: i64) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM carousel_groups WHERE account_id = $1 ORDER BY id DESC LIMIT 1",
    )
    .bind(account_id)
    .fetch_one(pool)
    .await
    .expect("group exists")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn immediate_account_publishes_one_post_per_approval(pool: PgPool) {
    let mut h = build_harness(pool);
    let account_id = seed_account(&h.pool, &seed("immediate", 1, None)).await;

    let outcomes = h.dispatcher.dispatch(&approved(100, 12)).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(
        outcomes[0].result,
        Ok(RouteOutcome::QueuedSingle { .. })
    ));

    drain_jobs(&mut h).await;

    assert_eq!(h.publisher.single_count(), 1);
    let post_id = match outcomes[0].result {
        Ok(RouteOutcome::QueuedSingle { post_id }) => post_id,
        _ => unreachable!(),
    };
    let post = get_post(&h.pool, post_id).await.unwrap();
    assert_eq!(post.status, "published");
    assert_eq!(post.platform_post_id.as_deref(), Some("plat_1"));

    let published_counter = sqlx::query_scalar::<_, i32>(
        "SELECT posts_published FROM publish_accounts WHERE id = $1",
    )
    .bind(account_id)
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!(published_counter, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn re_dispatch_of_same_forum_post_is_a_noop(pool: PgPool) {
    let mut h = build_harness(pool);
    seed_account(&h.pool, &seed("immediate", 1, None)).await;

    let first = h.dispatcher.dispatch(&approved(100, 12)).await.unwrap();
    assert!(matches!(first[0].result, Ok(RouteOutcome::QueuedSingle { .. })));

    let second = h.dispatcher.dispatch(&approved(100, 12)).await.unwrap();
    assert!(matches!(second[0].result, Ok(RouteOutcome::AlreadyDispatched)));

    drain_jobs(&mut h).await;
    assert_eq!(h.publisher.single_count(), 1, "one approval, one publish");
}

/// Spec scenario: batch_size=3, three posts approved back to back, all
/// render fine → one carousel publish with the 3 items in approval order.
#[sqlx::test(migrations = "../../migrations")]
async fn batch_account_triggers_exactly_one_carousel_at_target(pool: PgPool) {
    let mut h = build_harness(pool);
    let account_id = seed_account(&h.pool, &seed("batch_count", 3, None)).await;

    let o1 = h.dispatcher.dispatch(&approved(201, 12)).await.unwrap();
    let o2 = h.dispatcher.dispatch(&approved(202, 12)).await.unwrap();
    assert!(matches!(
        o1[0].result,
        Ok(RouteOutcome::Collected { collected: 1, target: 3, .. })
    ));
    assert!(matches!(
        o2[0].result,
        Ok(RouteOutcome::Collected { collected: 2, target: 3, .. })
    ));

    let o3 = h.dispatcher.dispatch(&approved(203, 12)).await.unwrap();
    assert!(
        matches!(o3[0].result, Ok(RouteOutcome::Triggered { collected: 3, .. })),
        "third append fills the group and wins the trigger: {:?}",
        o3[0].result
    );

    drain_jobs(&mut h).await;

    assert_eq!(h.publisher.carousel_count(), 1, "exactly one publishCarousel call");
    let (items, combined) = h.publisher.last_carousel();
    let image_refs: Vec<&str> = items.iter().map(|i| i.image_ref.as_str()).collect();
    assert_eq!(
        image_refs,
        vec!["renders/201.png", "renders/202.png", "renders/203.png"],
        "items arrive in original approval order"
    );
    assert!(combined.starts_with("This week\n\n1. fragment 201\n2. fragment 202\n3. fragment 203"));

    let group_id = collecting_group_id(&h.pool, account_id).await;
    let group = get_group(&h.pool, group_id).await.unwrap();
    assert_eq!(group.status, "published");
    for member in list_group_members(&h.pool, group_id).await.unwrap() {
        assert_eq!(member.status, "published");
        assert_eq!(member.platform_post_id, group.platform_post_id);
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn concurrent_dispatches_fill_one_group_without_gaps(pool: PgPool) {
    let mut h = build_harness(pool);
    let account_id = seed_account(&h.pool, &seed("batch_count", 3, None)).await;

    let mut handles = Vec::new();
    for forum_post_id in [301, 302, 303] {
        let dispatcher = h.dispatcher.clone();
        handles.push(tokio::spawn(async move {
            dispatcher.dispatch(&approved(forum_post_id, 12)).await
        }));
    }
    for handle in handles {
        let outcomes = handle.await.expect("dispatch task panicked").unwrap();
        assert!(outcomes[0].result.is_ok(), "dispatch failed: {:?}", outcomes[0].result);
    }

    let group_id = collecting_group_id(&h.pool, account_id).await;
    let members = list_group_members(&h.pool, group_id).await.unwrap();
    assert_eq!(members.len(), 3);
    let mut positions: Vec<i32> = members
        .iter()
        .map(|m| m.position_in_carousel.expect("assigned"))
        .collect();
    positions.sort_unstable();
    assert_eq!(positions, vec![0, 1, 2], "contiguous positions, no duplicates");

    drain_jobs(&mut h).await;
    assert_eq!(h.publisher.carousel_count(), 1, "three racing appends, one publish");
}

/// Spec scenario: batch_size=5, 4 renders succeed and 1 fails after 3 total
/// attempts → the group stays collecting at 4 until a sweep backfills.
#[sqlx::test(migrations = "../../migrations")]
async fn render_failure_holds_group_then_sweep_backfills_and_triggers(pool: PgPool) {
    let mut h = build_harness(pool);
    let account_id = seed_account(&h.pool, &seed("batch_count", 5, None)).await;

    h.preparer.fail_for(404);
    for forum_post_id in [401, 402, 403, 404, 405] {
        h.dispatcher.dispatch(&approved(forum_post_id, 12)).await.unwrap();
    }

    assert_eq!(
        h.preparer.calls_for(404),
        3,
        "1 initial render + 2 immediate retries before the post fails"
    );

    let group_id = collecting_group_id(&h.pool, account_id).await;
    let group = get_group(&h.pool, group_id).await.unwrap();
    assert_eq!(group.status, "collecting");
    assert_eq!(group.collected_count, 4, "the failed render never joined the group");

    // Recovery: the asset shows up, the sweep re-renders and triggers.
    h.preparer.heal(404);
    let report = h.scanner.sweep().await.unwrap();
    assert_eq!(report.stale_batch, 1);
    assert_eq!(report.backfilled, 1);
    assert_eq!(report.triggered, 1);

    drain_jobs(&mut h).await;

    assert_eq!(h.publisher.carousel_count(), 1);
    let (items, _) = h.publisher.last_carousel();
    assert_eq!(items.len(), 5, "the recovered post publishes with the rest");
    let group = get_group(&h.pool, group_id).await.unwrap();
    assert_eq!(group.status, "published");
    assert_eq!(group.collected_count, 5);
}

#[sqlx::test(migrations = "../../migrations")]
async fn scheduled_posts_collect_until_their_slot_passes(pool: PgPool) {
    let mut h = build_harness(pool);
    let account_id = seed_account(&h.pool, &seed("scheduled", 1, Some(18))).await;

    let o1 = h.dispatcher.dispatch(&approved(501, 12)).await.unwrap();
    let o2 = h.dispatcher.dispatch(&approved(502, 12)).await.unwrap();
    assert!(matches!(o1[0].result, Ok(RouteOutcome::Collected { .. })));
    assert!(matches!(o2[0].result, Ok(RouteOutcome::Collected { .. })));

    // Slot is in the future: the sweep leaves the group alone.
    let report = h.scanner.sweep().await.unwrap();
    assert_eq!(report.due_scheduled, 0);
    assert_eq!(h.publisher.carousel_count(), 0);

    // Move the slot into the past, as if the hour arrived.
    let group_id = collecting_group_id(&h.pool, account_id).await;
    sqlx::query("UPDATE carousel_groups SET scheduled_at = NOW() - INTERVAL '1 hour' WHERE id = $1")
        .bind(group_id)
        .execute(&h.pool)
        .await
        .unwrap();

    let report = h.scanner.sweep().await.unwrap();
    assert_eq!(report.due_scheduled, 1);
    assert_eq!(report.triggered, 1);

    drain_jobs(&mut h).await;
    assert_eq!(h.publisher.carousel_count(), 1);
    let group = get_group(&h.pool, group_id).await.unwrap();
    assert_eq!(group.status, "published");
}

#[sqlx::test(migrations = "../../migrations")]
async fn carousel_failure_fails_all_members_and_respects_retry_cap(pool: PgPool) {
    let mut h = build_harness(pool);
    let account_id = seed_account(&h.pool, &seed("batch_count", 2, None)).await;
    h.publisher.fail_always();

    h.dispatcher.dispatch(&approved(601, 12)).await.unwrap();
    h.dispatcher.dispatch(&approved(602, 12)).await.unwrap();

    drain_jobs(&mut h).await;

    assert_eq!(
        h.publisher.carousel_count(),
        3,
        "initial attempt plus retries, capped at 3 total"
    );

    let group_id = collecting_group_id(&h.pool, account_id).await;
    let group = get_group(&h.pool, group_id).await.unwrap();
    assert_eq!(group.status, "failed");
    assert_eq!(group.retry_count, 3);
    assert_eq!(group.error_message.as_deref(), Some("simulated platform outage"));

    for member in list_group_members(&h.pool, group_id).await.unwrap() {
        assert_eq!(member.status, "failed", "no member may stay queued or processing");
        assert_eq!(
            member.error_message.as_deref(),
            Some("simulated platform outage"),
            "members share the group's error reference"
        );
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn single_publish_retries_after_transient_failure(pool: PgPool) {
    let mut h = build_harness(pool);
    seed_account(&h.pool, &seed("immediate", 1, None)).await;
    h.publisher.fail_next(1);

    let outcomes = h.dispatcher.dispatch(&approved(700, 12)).await.unwrap();
    let post_id = match outcomes[0].result {
        Ok(RouteOutcome::QueuedSingle { post_id }) => post_id,
        ref other => panic!("expected QueuedSingle, got {other:?}"),
    };

    drain_jobs(&mut h).await;

    assert_eq!(h.publisher.single_count(), 2, "failure then scheduled retry");
    let post = get_post(&h.pool, post_id).await.unwrap();
    assert_eq!(post.status, "published");
    assert_eq!(post.retry_count, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn repeated_sweeps_never_double_publish(pool: PgPool) {
    let mut h = build_harness(pool);
    let account_id = seed_account(&h.pool, &seed("batch_count", 2, None)).await;

    h.dispatcher.dispatch(&approved(801, 12)).await.unwrap();
    h.dispatcher.dispatch(&approved(802, 12)).await.unwrap();
    drain_jobs(&mut h).await;
    assert_eq!(h.publisher.carousel_count(), 1);

    // The group is terminal; unchanged state must survive any number of
    // sweeps without another platform call.
    for _ in 0..3 {
        h.scanner.sweep().await.unwrap();
        drain_jobs(&mut h).await;
    }
    assert_eq!(h.publisher.carousel_count(), 1, "no double publish from recovery");

    let group_id = collecting_group_id(&h.pool, account_id).await;
    let group = get_group(&h.pool, group_id).await.unwrap();
    assert_eq!(group.status, "published");
}

#[sqlx::test(migrations = "../../migrations")]
async fn dispatch_isolates_per_account_failures(pool: PgPool) {
    let mut h = build_harness(pool);

    // Two accounts in the same scope: one healthy, one whose renders fail.
    let healthy = seed_account(&h.pool, &seed("immediate", 1, None)).await;
    let mut broken_seed = seed("batch_count", 3, None);
    broken_seed.name = "Broken Account".to_string();
    seed_account(&h.pool, &broken_seed).await;

    h.preparer.fail_for(900);

    let outcomes = h.dispatcher.dispatch(&approved(900, 12)).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(
        outcomes.iter().all(|o| o.result.is_err()),
        "renders for this forum post fail on both accounts"
    );

    // A later post is unaffected by the earlier per-account failures.
    h.preparer.heal(900);
    let outcomes = h.dispatcher.dispatch(&approved(901, 12)).await.unwrap();
    let for_healthy = outcomes
        .iter()
        .find(|o| o.account_id == healthy)
        .expect("healthy account in outcome list");
    assert!(for_healthy.result.is_ok());

    drain_jobs(&mut h).await;
    assert_eq!(h.publisher.single_count(), 1);
}
