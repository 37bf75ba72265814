use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use redrx::cache;
use redrx::config::Config;
use redrx::geo::GeoDirectory;
use redrx::limiter::RateLimiter;
use redrx::redirect::{create_redirect_router, RedirectState};
use redrx::resolver::Resolver;
use redrx::storage;
use redrx::telemetry::{AccessPipeline, AuditPipeline};

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.is_production() {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config);
    info!(app_env = %config.app_env, "Loaded configuration");

    let storage = storage::connect(&config.database).await?;
    info!("Database initialized successfully");

    let fast_store = cache::connect(&config.cache).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.per_second,
        config.rate_limit.burst,
    ));
    tasks.push(limiter.start_cleanup_task(
        Duration::from_secs(config.rate_limit.cleanup_interval_secs),
        config.rate_limit.max_keys,
        shutdown_rx.clone(),
    ));

    let geo = Arc::new(GeoDirectory::from_config(&config.geoip));
    tasks.push(geo.start_updater(
        Duration::from_secs(config.geoip.refresh_interval_secs),
        shutdown_rx.clone(),
    ));

    let access = Arc::new(AccessPipeline::access(
        config.telemetry.access_queue_capacity,
        Arc::clone(&geo),
        Arc::clone(&storage),
    ));
    tasks.push(access.start(shutdown_rx.clone()));

    // Consumed by link mutation workflows; the redirect server itself only reads
    let audit = Arc::new(AuditPipeline::audit(
        config.telemetry.audit_queue_capacity,
        Arc::clone(&storage),
    ));
    tasks.push(audit.start(shutdown_rx.clone()));

    let resolver = Resolver::new(fast_store, Arc::clone(&storage), Arc::clone(&access))
        .with_cache_ttl(Duration::from_secs(config.cache.ttl_secs));

    let router = create_redirect_router(Arc::new(RedirectState {
        resolver: Arc::new(resolver),
        limiter,
        trusted_proxy_mode: config.trusted_proxy_mode,
    }));

    let addr = format!(
        "{}:{}",
        config.redirect_server.host, config.redirect_server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 Redirect server listening on http://{}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Redirect server stopped, stopping background tasks");
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_millis(config.shutdown_grace_ms);
    let drain = async {
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Background task failed");
            }
        }
    };

    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(grace_ms = config.shutdown_grace_ms, "Background tasks still running after grace period, abandoning");
    }

    let access_stats = access.stats();
    let audit_stats = audit.stats();
    info!(
        access_persisted = access_stats.persisted,
        access_dropped = access_stats.dropped,
        access_pending = access.queued(),
        audit_persisted = audit_stats.persisted,
        audit_dropped = audit_stats.dropped,
        "Shutdown complete"
    );

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
