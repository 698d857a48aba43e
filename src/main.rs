use std::sync::Arc;
use std::time::Duration;

use diesel::r2d2::{ConnectionManager, Pool};
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing_subscriber::EnvFilter;

use lotto_realtime::auth::JwtVerifier;
use lotto_realtime::config::Config;
use lotto_realtime::realtime::RealtimeHub;
use lotto_realtime::store::{IdentityStore, MemoryIdentityStore, PgIdentityStore};
use lotto_realtime::AppState;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let store = identity_store(&config)?;
    let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret));

    let hub = RealtimeHub::new(store, verifier)?;
    hub.initialize();
    hub.spawn_stale_sweep(config.ping_timeout(), STALE_SWEEP_INTERVAL);

    let app = lotto_realtime::with_http_layers(
        lotto_realtime::router(AppState { hub: hub.clone() }),
        &config.frontend_url,
    );

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    hub.shutdown();
    Ok(())
}

fn identity_store(config: &Config) -> Result<Arc<dyn IdentityStore>, BoxError> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, online status is kept in memory only");
        return Ok(Arc::new(MemoryIdentityStore::new()));
    };
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder().build(manager)?;
    pool.get()?.run_pending_migrations(MIGRATIONS)?;
    Ok(Arc::new(PgIdentityStore::new(pool)))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
