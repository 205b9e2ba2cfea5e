//! Test server management

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tracing::{info, warn};

use secretstack_core::AccountRegionKey;
use secretstack_secretsmanager::{handle_request, SecretsManagerState};

use crate::client::{ClientError, RegionMode, SecretsManagerClient};
use crate::probe::Probe;
use crate::STARTUP_TIMEOUT_SECS;

/// A SecretStack server running inside the test process on an ephemeral port
pub struct TestServer {
    port: u16,
    base_url: String,
    state: Arc<SecretsManagerState>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a server with the default account and region
    pub async fn start() -> Result<Self, TestError> {
        Self::start_with_defaults(AccountRegionKey::default()).await
    }

    /// Start a server whose fallback scope is `defaults`
    pub async fn start_with_defaults(defaults: AccountRegionKey) -> Result<Self, TestError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let base_url = format!("http://127.0.0.1:{}", port);

        info!(port = port, defaults = %defaults, "Starting SecretStack test server");

        let state = Arc::new(SecretsManagerState::with_defaults(defaults));
        let router = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/", post(handle_request))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "Test server exited with an error");
            }
        });

        let server = Self {
            port,
            base_url,
            state,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        };
        server.wait_ready().await?;
        Ok(server)
    }

    async fn wait_ready(&self) -> Result<(), TestError> {
        let health_url = format!("{}/health", self.base_url);
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_secs(STARTUP_TIMEOUT_SECS) {
            if let Ok(response) = reqwest::get(&health_url).await {
                if response.status().is_success() {
                    info!(port = self.port, "SecretStack ready");
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        Err(TestError::StartupTimeout)
    }

    /// Get the base URL
    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// Get the port
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &Arc<SecretsManagerState> {
        &self.state
    }

    /// Drop every secret in every scope
    pub fn reset(&self) {
        self.state.reset();
    }

    /// Build a fresh client for this server
    pub fn client(&self, region_mode: RegionMode) -> Result<SecretsManagerClient, ClientError> {
        SecretsManagerClient::builder(self.base_url.clone())
            .region_mode(region_mode)
            .build()
    }

    /// Probe bound to this server, with the ambient region taken from the environment
    pub fn probe(&self) -> Probe {
        Probe::new(self.base_url.clone())
    }

    /// Stop the server and wait for it to finish
    pub async fn stop(&mut self) {
        info!("Stopping SecretStack test server");
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("SecretStack test server stopped");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Errors that can occur with test server
#[derive(Debug, Error)]
pub enum TestError {
    #[error("Failed to bind test server: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Server startup timed out")]
    StartupTimeout,
}
