// src/main.rs

use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use exam_runtime::config::Config;
use exam_runtime::routes;
use exam_runtime::services::proctoring::InMemoryProctoringRegistry;
use exam_runtime::state::{AppState, Backends};
use exam_runtime::store::{
    AllowAllLicenses, LicenseGate,
    postgres::{PgAuditLog, PgExamCatalog, PgLicenseGate, PgSessionStore},
};
use exam_runtime::utils::clock::SystemClock;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenv().ok();

    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    // Initialize Database Pool with Retry
    let mut retry_count = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    panic!("Failed to connect to database after 5 retries: {}", e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    };

    tracing::info!("Database connected...");

    tracing::info!("Running migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Migrations applied successfully.");

    let licenses: Arc<dyn LicenseGate> = if config.require_license {
        Arc::new(PgLicenseGate::new(pool.clone()))
    } else {
        tracing::warn!("License checks disabled, every candidate may start any active exam");
        Arc::new(AllowAllLicenses)
    };

    let backends = Backends {
        sessions: Arc::new(PgSessionStore::new(pool.clone())),
        catalog: Arc::new(PgExamCatalog::new(pool.clone())),
        licenses,
        audit: Arc::new(PgAuditLog::new(pool.clone())),
        registry: Arc::new(InMemoryProctoringRegistry::new()),
    };

    let addr = config.bind_addr;
    let state = AppState::build(config, backends, Arc::new(SystemClock));
    let app = routes::create_router(state);

    tracing::info!("Exam runtime listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listening address");

    axum::serve(listener, app).await.expect("Server error");
}
