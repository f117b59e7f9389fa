mod repl;

use std::sync::Arc;
use std::time::Duration;

use gaia_core::AgentCore;
use gaia_core::config::GaiaCfg;
use gaia_core::memory::{InMemorySessionStore, PgSessionStore, SessionStore};
use gaia_core::models::ModelPool;
use gaia_core::runtime::{ShutdownGuard, spawn_idle_loop};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DB_CONNECT_TIMEOUT_SECS: u64 = 3;
const DEFAULT_LOG_FILE: &str = "/tmp/gaia.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Log to a file only; stderr would interleave with the prompt.
    if std::env::var("RUST_LOG").is_ok() {
        let path = std::env::var("GAIA_LOG_FILE").unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string());
        let file = std::fs::File::create(path)?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init();
    }

    let mut startup_notice: Option<String> = None;
    let db = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let mut fallback = |reason: String| {
                tracing::warn!(%reason, "falling back to ephemeral mode");
                startup_notice = Some(format!("Note: {reason}. Running in ephemeral mode; this session will not be saved."));
            };
            match tokio::time::timeout(
                Duration::from_secs(DB_CONNECT_TIMEOUT_SECS),
                sqlx::postgres::PgPoolOptions::new().max_connections(8).connect(&url),
            )
            .await
            {
                Ok(Ok(db)) => match sqlx::migrate!("../../migrations").run(&db).await {
                    Ok(()) => {
                        tracing::info!("database connected and migrations applied");
                        Some(db)
                    }
                    Err(e) => {
                        fallback(format!("database migration failed ({e})"));
                        None
                    }
                },
                Ok(Err(e)) => {
                    fallback(format!("could not connect to DATABASE_URL ({e})"));
                    None
                }
                Err(_) => {
                    fallback(format!("database connect timed out after {DB_CONNECT_TIMEOUT_SECS}s"));
                    None
                }
            }
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set, running in ephemeral mode");
            None
        }
    };

    let cfg = match &db {
        Some(db) => GaiaCfg::load(db).await?,
        None => GaiaCfg::default(),
    };
    let cfg = Arc::new(cfg);

    let sessions: Arc<dyn SessionStore> = match db {
        Some(db) => Arc::new(PgSessionStore::new(db)),
        None => Arc::new(InMemorySessionStore::new()),
    };

    let pool = ModelPool::from_env();
    if pool.names().is_empty() {
        startup_notice.get_or_insert_with(|| {
            "Note: no models configured. Set GAIA_LITE_MODEL and/or GAIA_PRIME_MODEL.".to_string()
        });
    }

    let agent = AgentCore::new(pool.clone(), sessions, Arc::clone(&cfg));
    let shutdown = ShutdownGuard::new();
    shutdown.spawn_signal_listener();
    let idle = spawn_idle_loop(pool, agent.seeds().clone(), agent.clock().clone(), cfg, shutdown.token());

    let session_id = std::env::var("GAIA_SESSION").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
    tracing::info!(%session_id, "session started");

    let result = repl::run(&agent, &session_id, shutdown.token(), startup_notice).await;
    shutdown.shutdown();
    let _ = idle.await;
    result
}
