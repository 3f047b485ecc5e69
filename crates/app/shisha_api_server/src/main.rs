//! Shisha API server binary.
//!
//! Loads configuration from the environment (and `.env`), migrates the
//! database, starts the background sweepers and serves the HTTP API until
//! Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use shisha_api::AppState;
use shisha_api::config::ApiConfig;
use shisha_core::session::SessionService;
use shisha_core::store::{PgPrincipalStore, PgSecretStore};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "info,shisha_api=debug,shisha_core=debug";

/// CLI arguments. Anything not given here comes from the environment.
#[derive(Parser, Debug)]
#[command(name = "shisha_api_server", about = "Shisha session API server")]
struct Args {
    /// Address to listen on; overrides `BIND_ADDR`.
    #[arg(long)]
    bind_addr: Option<String>,

    /// PostgreSQL connection URL; overrides `DATABASE_URL`.
    #[arg(long)]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let args = Args::parse();

    let mut config =
        ApiConfig::from_env().inspect_err(|e| error!(error = %e, "invalid configuration"))?;
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(database_url) = args.database_url {
        config.pg_connection_url = database_url;
    }

    info!(
        bind_addr = %config.bind_addr,
        secure_cookies = config.secure_cookies,
        max_connections = args.max_connections,
        "starting shisha_api_server"
    );

    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.pg_connection_url)
        .await?;

    info!("running database migrations");
    shisha_core::migrate::migrate(&pool).await?;

    let state = AppState::new(
        config.clone(),
        Arc::new(PgPrincipalStore::new(pool.clone())),
        Arc::new(PgSecretStore::new(pool)),
    )?;

    let shutdown = CancellationToken::new();
    let limiter_sweeper = state.limiter.spawn_sweeper(config.rate_limit_sweep);
    let token_sweeper = spawn_token_sweeper(
        state.session.clone(),
        config.token_sweep,
        shutdown.clone(),
    );

    let app = shisha_api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let api_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
        }
    })
    .await;

    shutdown.cancel();
    limiter_sweeper.abort();
    let _ = token_sweeper.await;
    info!("server stopped");

    api_result?;
    Ok(())
}

/// Periodically delete expired refresh tokens until `shutdown` fires.
fn spawn_token_sweeper(
    session: SessionService,
    every: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                // Failures are logged by the service; the next tick retries.
                _ = ticker.tick() => { let _ = session.sweep_expired().await; }
            }
        }
    })
}
