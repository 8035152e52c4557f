// src/main.rs

use std::{str::FromStr, sync::Arc, time::Duration};

use exam_portal::{
    config::Config,
    routes,
    state::{AppState, CatalogHub},
    utils::clock::SystemClock,
};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DB_CONNECT_ATTEMPTS: u32 = 5;
const DB_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Stdout plus a daily log file under `logs/`. Keep the guard alive for the
/// lifetime of the process or buffered file output is lost.
fn init_tracing(config: &Config) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", "exam-portal.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::new(&config.rust_log))
        .with(fmt::layer().with_writer(std::io::stdout).with_target(false))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    guard
}

async fn open_pool(config: &Config) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let mut attempt = 1;
    loop {
        let connected = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect_with(options.clone())
            .await;
        match connected {
            Ok(pool) => return Ok(pool),
            Err(e) if attempt < DB_CONNECT_ATTEMPTS => {
                tracing::warn!(attempt, error = %e, "database not ready, retrying in {:?}", DB_RETRY_DELAY);
                attempt += 1;
                tokio::time::sleep(DB_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    let _log_guard = init_tracing(&config);

    let pool = match open_pool(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, database_url = %config.database_url, "could not open database");
            std::process::exit(1);
        }
    };

    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        tracing::error!(error = %e, "database migrations failed");
        std::process::exit(1);
    }
    tracing::info!("database ready");

    let catalog = CatalogHub::new();
    if let Err(e) = catalog.refresh(&pool).await {
        tracing::error!("Failed to load exam catalog: {:?}", e);
    }

    let state = AppState {
        pool,
        config: config.clone(),
        clock: Arc::new(SystemClock),
        catalog,
    };
    let app = routes::create_router(state);

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.bind_addr, "could not bind");
            std::process::exit(1);
        }
    };
    tracing::info!(
        addr = %config.bind_addr,
        utc_offset = %config.utc_offset,
        "exam portal listening"
    );

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server stopped");
    }
}
