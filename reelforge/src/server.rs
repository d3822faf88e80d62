//! Server lifecycle management
//!
//! Owns the HTTP listener and the background sweeper, and coordinates
//! their shutdown.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use reelforge_api::{create_router, AppState};

/// Upper bound on waiting for the sweeper to finish its current pass.
const SWEEPER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ReelforgeServer {
    state: AppState,
    http_address: String,
}

impl ReelforgeServer {
    pub fn new(state: AppState) -> Self {
        let http_address = state.config.http_address();
        Self {
            state,
            http_address,
        }
    }

    /// Start all components and block until a shutdown signal arrives
    pub async fn start(self) -> anyhow::Result<()> {
        info!("Starting Reelforge server...");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sweeper = self
            .state
            .lifecycle
            .sweeper()
            .with_jobs(self.state.jobs.store().clone())
            .with_rate_limiter(self.state.rate_limiter.clone());
        let sweep_interval = self.state.lifecycle.sweep_interval();
        let sweeper_handle = sweeper.spawn(sweep_interval, shutdown_rx.clone());
        info!(
            interval_secs = sweep_interval.as_secs(),
            "Resource sweeper started"
        );

        let http_handle = self.start_http_server(shutdown_rx).await?;

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        let _ = shutdown_tx.send(true);

        match tokio::time::timeout(SWEEPER_STOP_TIMEOUT, sweeper_handle).await {
            Ok(Ok(())) => info!("Resource sweeper stopped"),
            Ok(Err(e)) => error!("Resource sweeper task failed: {}", e),
            Err(_) => warn!("Resource sweeper did not stop within {:?}", SWEEPER_STOP_TIMEOUT),
        }

        info!("Reelforge server shut down");
        Ok(())
    }

    /// Start HTTP server with graceful shutdown support
    async fn start_http_server(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let http_addr: SocketAddr = self
            .http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{}': {e}", self.http_address))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;
        info!("HTTP server listening on {}", http_addr);

        let router = create_router(self.state.clone());

        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            // Client addresses feed the per-IP quota.
            let service = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
