use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use workshop_assist::app::{AppServices, app_router, restore_session};
use workshop_assist::config::WorkshopConfig;
use workshop_assist::error::ConfigError;
use workshop_assist::llm::{LlmBackend, LlmConfig, create_provider};
use workshop_assist::session::SessionRegistry;
use workshop_assist::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = WorkshopConfig::from_env()?;

    // Held for the process lifetime so buffered log lines are flushed.
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()))?;

    eprintln!("🎨 Workshop Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!(
        "   Turn budget: {} (AI may conclude from turn {})",
        config.turn_budget, config.min_turns
    );
    eprintln!("   Group size: {}", config.target_group_size);
    eprintln!("   API: http://0.0.0.0:{}", config.port);

    // ── LLM ──────────────────────────────────────────────────────────────
    let llm = create_provider(&LlmConfig {
        backend: LlmBackend::OpenAi,
        api_key: secrecy::SecretString::from(api_key),
        model: config.model.clone(),
        base_url: config.api_base_url.clone(),
        timeout: config.llm_timeout,
    })?;

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Session ──────────────────────────────────────────────────────────
    let session = restore_session(db.as_ref()).await?;
    eprintln!("   Session: {}", session.id);
    let sessions = Arc::new(SessionRegistry::new(session));

    // ── HTTP ─────────────────────────────────────────────────────────────
    let services = AppServices::new(db, llm, sessions, &config);
    let app = app_router(&services);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Workshop server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}

/// Stderr logging filtered by `RUST_LOG` (default `info`), plus a daily
/// rolling file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "workshop-assist.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}
