//! HTTP surface: `/health`, `/limits`, `/research`, `/collect` and `/synthesize`.

pub mod handler;

pub use handler::{build_router, client_ip, AppError, AppState, ClientIp, API_KEY_HEADER};

use crate::{Config, Error, Result};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct Server {
    config: Arc<Config>,
}

impl Server {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn listen_addr(&self) -> Result<SocketAddr> {
        let host: IpAddr = self.config.server.host.parse().map_err(|e| Error::InvalidInput {
            field: "server.host".to_string(),
            reason: format!("Invalid listen address '{}': {e}", self.config.server.host),
        })?;
        Ok(SocketAddr::new(host, self.config.server.port))
    }

    /// Serve until Ctrl-C, then drain connections for up to the configured grace period
    pub async fn run(&self) -> Result<()> {
        let state = AppState::from_config(&self.config)?;
        let sweeper = spawn_quota_sweeper(
            state.clone(),
            Duration::from_secs(self.config.quota.sweep_interval_secs.max(1)),
        );

        let app = build_router(state, self.config.server.body_limit_kb);
        let addr = self.listen_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Research orchestrator listening on {}", addr);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_rx.changed().await.ok();
        });
        let mut handle = tokio::spawn(async move { serve.await });

        tokio::select! {
            joined = &mut handle => {
                sweeper.abort();
                return joined
                    .map_err(|e| Error::Service(format!("Server task failed: {e}")))?
                    .map_err(Error::Io);
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received");
            }
        }

        sweeper.abort();
        shutdown_tx.send(true).ok();

        let grace = Duration::from_secs(self.config.server.graceful_shutdown_timeout_secs);
        match tokio::time::timeout(grace, handle).await {
            Ok(joined) => joined
                .map_err(|e| Error::Service(format!("Server task failed: {e}")))?
                .map_err(Error::Io),
            Err(_) => {
                warn!("Connections still open after {:?}; exiting", grace);
                Ok(())
            }
        }
    }
}

/// Periodically evict expired quota entries
fn spawn_quota_sweeper(state: AppState, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = state.access.quota().sweep_expired();
            if removed > 0 {
                debug!("Swept {} expired quota entries", removed);
            }
        }
    })
}
