//! SecretStack - local AWS Secrets Manager emulator
//!
//! Serves the Secrets Manager JSON protocol with per-account, per-region
//! state so SDK clients can be pointed at it during development and testing.

mod config;
mod cors;
mod router;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use secretstack_auth::is_valid_region;
use secretstack_secretsmanager::SecretsManagerState;

#[derive(Parser, Debug)]
#[command(name = "secretstack")]
#[command(about = "Local AWS Secrets Manager emulator", long_about = None)]
struct Args {
    /// Port to listen on [default: 4566]
    #[arg(short, long, env = "SECRETSTACK_PORT")]
    port: Option<u16>,

    /// Host to bind to [default: 0.0.0.0]
    #[arg(long, env = "SECRETSTACK_HOST")]
    host: Option<String>,

    /// Configuration file (toml, yaml or json)
    #[arg(short, long, env = "SECRETSTACK_CONFIG")]
    config: Option<PathBuf>,

    /// Region used when a request does not name one [default: us-east-1]
    #[arg(long, env = "SECRETSTACK_DEFAULT_REGION")]
    default_region: Option<String>,

    /// Account used when the access key is not an account id [default: 000000000000]
    #[arg(long, env = "SECRETSTACK_ACCOUNT_ID")]
    account_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SECRETSTACK_LOG_LEVEL")]
    log_level: String,

    /// Extra origins allowed to make cross-origin requests, comma separated
    #[arg(long, env = "SECRETSTACK_CORS_ALLOWED_ORIGINS", value_delimiter = ',')]
    cors_allowed_origins: Vec<String>,

    /// Disable CORS headers
    #[arg(long, env = "SECRETSTACK_NO_CORS")]
    no_cors: bool,

    /// Accept requests from any origin
    #[arg(long, env = "SECRETSTACK_NO_CORS_CHECKS")]
    no_cors_checks: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "secretstack={level},secretstack_secretsmanager={level},tower_http=debug",
                    level = args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = config::Config::load(args.config.as_deref())?;
    config.apply(config::Overrides {
        port: args.port,
        host: args.host,
        default_region: args.default_region,
        account_id: args.account_id,
        cors_allowed_origins: args.cors_allowed_origins,
        no_cors: args.no_cors,
        no_cors_checks: args.no_cors_checks,
    });

    if !is_valid_region(&config.secretsmanager.default_region) {
        anyhow::bail!(
            "invalid default region '{}'",
            config.secretsmanager.default_region
        );
    }

    let defaults = config.secretsmanager.default_scope();
    info!("Starting SecretStack...");
    info!("  Default scope: {}", defaults);
    let cors = cors::CorsPolicy::from_config(&config.server);
    info!(
        "  CORS headers: {}, origin checks: {}",
        if cors.headers_enabled { "enabled" } else { "disabled" },
        if cors.checks_enabled { "enabled" } else { "disabled" }
    );
    info!("  Allowed origins: {}", cors.allowed_origins().join(", "));

    let state = Arc::new(SecretsManagerState::with_defaults(defaults));
    let app = router::create_router(state, cors);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("SecretStack stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
