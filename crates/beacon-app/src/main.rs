//! Beacon application binary - composition root.
//!
//! 1. Parse CLI flags and load configuration from TOML
//! 2. Open the SQLite store
//! 3. Register action handlers and build the engine
//! 4. Serve the control API until Ctrl-C, then drain in-flight executions

mod cli;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use beacon_api::state::AppState;
use beacon_core::BeaconConfig;
use beacon_engine::{ActionRegistry, Engine, HandlerDeps};
use beacon_storage::{Database, ExecutionRepository, RuleRepository};

use cli::{expand_home, CliArgs};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let config = BeaconConfig::load_or_default(&config_file);

    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting Beacon v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");
    config.validate()?;

    // Storage.
    let data_dir = expand_home(&args.resolve_data_dir(&config.general.data_dir));
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db = Arc::new(Database::new(&data_dir.join("beacon.db"))?);
    let rules = Arc::new(RuleRepository::new(Arc::clone(&db)));
    let executions = Arc::new(ExecutionRepository::new(db));

    // Handlers.
    let deps = HandlerDeps::in_memory(Duration::from_secs(config.engine.webhook_timeout_secs));
    tracing::warn!(
        "Workspace actions and outgoing messages use in-process stores; \
         they are lost on restart and only the most recent entries are kept"
    );
    let mut notifications = deps.notifications.subscribe();
    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            tracing::info!(
                title = %notification.title,
                chat_id = %notification.chat_id,
                "Notification"
            );
        }
    });
    let registry = ActionRegistry::with_defaults(&deps);
    tracing::info!(action_types = registry.registered_types().len(), "Action handlers registered");

    // Engine.
    let engine = Arc::new(Engine::new(
        rules.clone(),
        executions.clone(),
        registry,
        &config.engine,
    ));
    let state = AppState::new(Arc::clone(&engine), rules, executions);

    // API server.
    let port = args.resolve_port(config.server.port);
    let addr = format!("{}:{}", config.server.host, port);
    let shutdown_engine = Arc::clone(&engine);
    let result = beacon_api::start_server(&addr, state, async move {
        shutdown_signal().await;
        shutdown_engine.shutdown();
    })
    .await;

    if let Err(e) = &result {
        tracing::error!(addr = %addr, error = %e, "API server failed");
    }

    engine.shutdown();
    let grace = Duration::from_secs(config.engine.shutdown_grace_secs);
    if engine.drain(grace).await {
        tracing::info!("All in-flight executions recorded");
    }

    result.map_err(Into::into)
}
