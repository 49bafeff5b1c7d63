mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use sopub_engine::groups::GroupManager;
use sopub_engine::{
    Dispatcher, HttpContentPreparer, HttpPlatformPublisher, InMemoryQueue, PlatformPublisher,
    PreparerWithRetry, PublishWorker, RecoveryScanner, TriggerRouter, WorkerConfig,
};
use sopub_platform::PlatformClient;
use sopub_render::RenderClient;

use crate::api::{build_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(sopub_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = sopub_db::PoolConfig::from_app_config(&config);
    let pool = sopub_db::connect_pool(&config.database_url, pool_config).await?;
    sopub_db::run_migrations(&pool).await?;

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

    let worker = Arc::new(PublishWorker::new(
        pool.clone(),
        preparer.clone(),
        publisher,
        queue.clone(),
        WorkerConfig {
            max_attempts: config.publish_max_attempts,
            retry_base_secs: config.publish_retry_base_secs,
            min_carousel_items: config.min_carousel_items,
        },
    ));
    tokio::spawn(Arc::clone(&worker).run(jobs, config.worker_concurrency));

    let scanner = RecoveryScanner::new(
        pool.clone(),
        preparer,
        groups,
        queue,
        config.recovery_staleness_secs,
        config.recovery_backfill_limit,
    );
    let _scheduler = scheduler::build_scheduler(scanner, &config.recovery_cron).await?;

    let app = build_app(AppState { pool, dispatcher });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "sopub server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
