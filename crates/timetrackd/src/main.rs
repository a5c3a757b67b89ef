//! timetrackd - The timetrack server
//!
//! This is the main entry point for the timetrackd service.
//! It wires together all the components:
//! - Configuration loading
//! - Document store and login sessions
//! - HTTP router
//! - Periodic maintenance (retention sweep, expired logins)

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use timetrack_config::{Settings, StoreTimings, load_config_or_default};
use timetrack_http::{AppState, AuthConfig, router};
use timetrack_store::{DocumentStore, FileStore, MemorySessionStore, SessionStore, StoreSettings};
use timetrack_util::default_config_path;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// timetrackd - Multi-client time tracking server
#[derive(Parser, Debug)]
#[command(name = "timetrackd")]
#[command(about = "Multi-client time tracking server", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/timetrack/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Listen address override (or set TIMETRACK_BIND env var)
    #[arg(short, long, env = "TIMETRACK_BIND")]
    bind: Option<SocketAddr>,

    /// Data directory override (or set TIMETRACK_DATA_DIR env var)
    #[arg(short, long, env = "TIMETRACK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn store_settings(timings: &StoreTimings) -> StoreSettings {
    StoreSettings {
        client_timeout: timings.client_timeout,
        lock_stale_after: timings.lock_stale_after,
        lock_wait: timings.lock_wait,
        lock_poll_interval: timings.lock_poll_interval,
        retention: timings.retention,
    }
}

/// Main service state
struct Service {
    settings: Settings,
    store: Arc<FileStore>,
    sessions: Arc<MemorySessionStore>,
    listener: TcpListener,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let mut settings = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(config_path = %args.config.display(), "Configuration loaded");

        if let Some(bind) = args.bind {
            settings.server.bind = bind;
        }
        if let Some(data_dir) = &args.data_dir {
            settings.server.data_dir = data_dir.clone();
        }

        let data_dir = &settings.server.data_dir;
        let store = Arc::new(
            FileStore::open(data_dir, store_settings(&settings.store))
                .with_context(|| format!("Failed to open data directory {:?}", data_dir))?,
        );

        let sessions = Arc::new(MemorySessionStore::new(settings.auth.session_lifetime));

        if settings.auth.username == timetrack_config::DEFAULT_USERNAME
            && settings.auth.password == timetrack_config::DEFAULT_PASSWORD
        {
            warn!("Using the default login credentials");
        }

        let listener = TcpListener::bind(settings.server.bind)
            .await
            .with_context(|| format!("Failed to bind {}", settings.server.bind))?;

        info!(addr = %settings.server.bind, "Listening");

        Ok(Self {
            settings,
            store,
            sessions,
            listener,
        })
    }

    async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let maintenance = tokio::spawn(run_maintenance(
            self.store.clone(),
            self.sessions.clone(),
            self.settings.store.cleanup_interval,
            shutdown_rx,
        ));

        let auth = AuthConfig {
            username: self.settings.auth.username.clone(),
            password: self.settings.auth.password.clone(),
            session_lifetime: self.settings.auth.session_lifetime,
        };
        let state = AppState::new(self.store.clone(), self.sessions.clone(), auth);

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

        info!("Service running");

        axum::serve(self.listener, router(state))
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                    _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
                }
            })
            .await
            .context("HTTP server failed")?;

        info!("Shutting down timetrackd");

        let _ = shutdown_tx.send(true);
        if let Err(e) = maintenance.await {
            warn!(error = %e, "Maintenance task ended abnormally");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Periodically sweep expired documents and logins until shutdown
async fn run_maintenance(
    store: Arc<FileStore>,
    sessions: Arc<MemorySessionStore>,
    every: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match store.cleanup_stale().await {
                    Ok(report) if report.removed > 0 || report.skipped > 0 => {
                        info!(
                            scanned = report.scanned,
                            removed = report.removed,
                            skipped = report.skipped,
                            "Retention sweep finished"
                        );
                    }
                    Ok(report) => debug!(scanned = report.scanned, "Retention sweep found nothing to do"),
                    Err(e) => warn!(error = %e, "Retention sweep failed"),
                }

                let expired = sessions.cleanup_expired();
                if expired > 0 {
                    debug!(expired, "Removed expired login sessions");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Maintenance task shutting down");
                    break;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "timetrackd starting"
    );

    if timetrack_util::is_mock_time_active() {
        warn!("Mock time is active, timestamps are shifted");
    }

    let service = Service::new(&args).await?;
    service.run().await
}
