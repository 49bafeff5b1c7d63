//! Operational CLI for the publish scheduler.
//!
//! Everything here drives the same engine the server runs: `dispatch`
//! feeds one approved forum post through the dispatcher (useful for
//! replays and local testing), `sweep` runs a single recovery pass, and
//! the listing commands read the audit trail.

use std::sync::Arc;

use clap::{Parser, Subcommand};

use sopub_core::ApprovedPost;
use sopub_engine::groups::GroupManager;
use sopub_engine::{
    Dispatcher, HttpContentPreparer, HttpPlatformPublisher, InMemoryQueue, JobStream,
    PlatformPublisher, PreparerWithRetry, PublishWorker, RecoveryScanner, TriggerRouter,
    WorkerConfig,
};
use sopub_platform::PlatformClient;
use sopub_render::RenderClient;


#[derive(Debug, Parser)]
#[command(name = "sopub-cli")]
#[command(about = "sopub publish scheduler command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database utilities.
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Dispatch one approved forum post and run its publish jobs to
    /// completion.
    Dispatch {
        #[arg(long)]
        forum_post_id: i64,
        #[arg(long)]
        school_id: Option<i64>,
        /// Treat the post as a cross-school announcement (matches every
        /// active account).
        #[arg(long)]
        announcement: bool,
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
    },
    /// Run one recovery sweep and any publish jobs it triggers.
    Sweep,
    /// List recent social posts.
    Posts {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// List recent carousel groups.
    Groups {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check database connectivity.
    Ping,
    /// Apply pending migrations.
    Migrate,
    /// Upsert accounts from the configured accounts file.
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Db { command }) => run_db(command).await,
        Some(Commands::Dispatch {
            forum_post_id,
            school_id,
            announcement,
            title,
            body,
        }) => {
            let post = ApprovedPost {
                forum_post_id,
                school_id,
                cross_school_announcement: announcement,
                title,
                body,
            };
            run_dispatch(post).await
        }
        Some(Commands::Sweep) => run_sweep().await,
        Some(Commands::Posts { status, limit }) => run_list_posts(status, limit).await,
        Some(Commands::Groups { status, limit }) => run_list_groups(status, limit).await,
        None => {
            println!("sopub-cli: see --help for commands");
            Ok(())
        }
    }
}

async fn run_db(command: DbCommands) -> anyhow::Result<()> {
    let config = sopub_core::load_app_config()?;
    let pool = sopub_db::connect_pool(
        &config.database_url,
        sopub_db::PoolConfig::from_app_config(&config),
    )
    .await?;

    match command {
        DbCommands::Ping => {
            sopub_db::health_check(&pool).await?;
            println!("database ok");
        }
        DbCommands::Migrate => {
            sopub_db::run_migrations(&pool).await?;
            println!("migrations applied");
        }
        DbCommands::Seed => {
            let accounts_file = sopub_core::load_accounts(&config.accounts_path)?;
            let count = sopub_db::seed_accounts(&pool, &accounts_file.accounts).await?;
            println!("seeded {count} accounts from {}", config.accounts_path.display());
        }
    }
    Ok(())
}

/// One engine instance wired from config, with an in-memory queue the CLI
/// drains itself after the command's work is enqueued.
struct CliEngine {
    dispatcher: Dispatcher,
    scanner: RecoveryScanner,
    worker: PublishWorker,
    jobs: JobStream,
    pool: sqlx::PgPool,
}

async fn build_engine() -> anyhow::Result<CliEngine> {
    let config = sopub_core::load_app_config()?;
    let pool = sopub_db::connect_pool(
        &config.database_url,
        sopub_db::PoolConfig::from_app_config(&config),
    )
    .await?;

    let render_client = RenderClient::new(&config.render_base_url, config.render_timeout_secs)?;
    let preparer = PreparerWithRetry::new(
        Arc::new(HttpContentPreparer::new(render_client)),
        config.render_max_retries,
    );
    let platform_client = PlatformClient::new(
        &config.platform_base_url,
        config.platform_token.as_deref(),
        config.platform_timeout_secs,
    )?;
    let publisher: Arc<dyn PlatformPublisher> =
        Arc::new(HttpPlatformPublisher::new(platform_client));

    let (queue, jobs) = InMemoryQueue::new();
    let groups = GroupManager::new(pool.clone(), config.min_carousel_items);
    let router = TriggerRouter::new(pool.clone(), groups.clone(), queue.clone());
    let dispatcher = Dispatcher::new(pool.clone(), preparer.clone(), router);
    let worker = PublishWorker::new(
        pool.clone(),
        preparer.clone(),
        publisher,
        queue.clone(),
        WorkerConfig {
            max_attempts: config.publish_max_attempts,
            retry_base_secs: config.publish_retry_base_secs,
            min_carousel_items: config.min_carousel_items,
        },
    );
    let scanner = RecoveryScanner::new(
        pool.clone(),
        preparer,
        groups,
        queue,
        config.recovery_staleness_secs,
        config.recovery_backfill_limit,
    );

    Ok(CliEngine {
        dispatcher,
        scanner,
        worker,
        jobs,
        pool,
    })
}

/// Process whatever is on the queue right now, then stop. Backoff retries
/// are left for the server's workers; the CLI only runs the first attempt.
async fn drain_current_jobs(worker: &PublishWorker, jobs: &mut JobStream) {
    while let Ok(Some(job)) =
        tokio::time::timeout(std::time::Duration::from_millis(500), jobs.recv()).await
    {
        worker.process(job).await;
    }
}

async fn run_dispatch(post: ApprovedPost) -> anyhow::Result<()> {
    let mut engine = build_engine().await?;

    let outcomes = engine.dispatcher.dispatch(&post).await?;
    if outcomes.is_empty() {
        println!("no active accounts matched the post's scope");
        return Ok(());
    }
    for outcome in &outcomes {
        match &outcome.result {
            Ok(route) => println!("{}: {route:?}", outcome.account_slug),
            Err(e) => println!("{}: FAILED: {e}", outcome.account_slug),
        }
    }

    drain_current_jobs(&engine.worker, &mut engine.jobs).await;
    Ok(())
}

async fn run_sweep() -> anyhow::Result<()> {
    let mut engine = build_engine().await?;

    let report = engine.scanner.sweep().await?;
    println!(
        "sweep: {} due scheduled, {} stale batch, {} backfilled, {} triggered",
        report.due_scheduled, report.stale_batch, report.backfilled, report.triggered
    );

    drain_current_jobs(&engine.worker, &mut engine.jobs).await;
    Ok(())
}

async fn run_list_posts(status: Option<String>, limit: i64) -> anyhow::Result<()> {
    let engine = build_engine().await?;
    let rows = sopub_db::list_recent_posts(&engine.pool, status.as_deref(), limit).await?;

    for row in rows {
        println!(
            "#{} account={} forum_post={} status={} group={} retries={} error={}",
            row.id,
            row.account_id,
            row.forum_post_id,
            row.status,
            row.carousel_group_id
                .map_or_else(|| "-".to_string(), |id| id.to_string()),
            row.retry_count,
            row.error_message.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn run_list_groups(status: Option<String>, limit: i64) -> anyhow::Result<()> {
    let engine = build_engine().await?;
    let rows = sopub_db::list_recent_groups(&engine.pool, status.as_deref(), limit).await?;

    for row in rows {
        println!(
            "#{} key={} account={} status={} collected={}/{} scheduled_at={} error={}",
            row.id,
            row.group_key,
            row.account_id,
            row.status,
            row.collected_count,
            row.target_count,
            row.scheduled_at
                .map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
            row.error_message.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
