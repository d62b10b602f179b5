use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inflow::breaker::{BreakerConfig, BreakerRegistry};
use inflow::config::Config;
use inflow::db::{self, queries, AppState};
use inflow::handlers;
use inflow::notify::Notifier;
use inflow::queue::EventQueue;
use inflow::rate_limit::RateLimiter;
use inflow::store::{IdempotencyStore, MemoryStore, StateStore};
use inflow::worker;

#[derive(Parser)]
#[command(name = "inflow", about = "Payment webhook processing service")]
struct Cli {
    /// Use a throwaway database, removed on shutdown. For local development.
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inflow=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env();

    if cli.ephemeral {
        config.database_path = format!("inflow-ephemeral-{}.db", std::process::id());
        tracing::info!(path = %config.database_path, "running with ephemeral database");
    }

    let pool = match db::create_pool(&config.database_path) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, path = %config.database_path, "failed to open database");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let queue = Arc::new(EventQueue::new(config.queue_capacity));
    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
    let rate_limiter = Arc::new(RateLimiter::per_minute(
        store.clone(),
        config.rate_limit_per_minute,
    ));
    let idempotency = Arc::new(IdempotencyStore::new(
        store.clone(),
        Duration::from_secs(config.idempotency_ttl_secs),
    ));
    let notifier = Notifier::new(config.notify_url.clone(), breakers.clone());

    let state = AppState::new(
        &config,
        pool,
        queue.clone(),
        breakers,
        rate_limiter,
        idempotency,
        notifier,
    );

    // Startup housekeeping: prune old completed events, then put anything
    // stranded in flight by the previous run back on the queue
    if config.event_retention_days > 0 {
        if let Ok(conn) = state.db.get() {
            match queries::purge_old_events(&conn, config.event_retention_days) {
                Ok(n) if n > 0 => tracing::info!(purged = n, "pruned old events at startup"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "startup event pruning failed"),
            }
        }
    }
    if let Err(e) = worker::recover_stranded(&state) {
        tracing::error!(error = %e, "failed to recover stranded events");
    }

    let workers = worker::spawn_workers(state.clone());
    worker::spawn_cleanup_task(state.clone(), store, config.event_retention_days);

    let app = handlers::create_router(state);
    let addr = config.addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, workers = config.worker_count, "inflow listening");

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        tracing::error!(error = %e, "server error");
    }

    // Drain: stop accepting queue waits, give workers a moment to finish
    tracing::info!("shutting down, draining workers");
    queue.close();
    for handle in workers {
        if tokio::time::timeout(Duration::from_secs(10), handle).await.is_err() {
            tracing::warn!("worker did not drain in time");
        }
    }

    if cli.ephemeral {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", config.database_path, suffix));
        }
        tracing::info!("ephemeral database removed");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
