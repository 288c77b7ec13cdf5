use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use tf_domain::config::{Config, ConfigSeverity};
use tf_engine::{Engine, EngineSettings};
use tf_gateway::api;
use tf_gateway::cli::{Cli, Command, ConfigCommand, EntropyCommand};
use tf_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _path) = tf_gateway::cli::load_config(cli.config.as_ref())?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Entropy { command }) => {
            init_tracing();
            let (config, _path) = tf_gateway::cli::load_config(cli.config.as_ref())?;
            run_entropy(&config, command)
        }
        Some(Command::Config { command }) => {
            let (config, path) = tf_gateway::cli::load_config(cli.config.as_ref())?;
            match command {
                ConfigCommand::Validate => {
                    let issues = config.validate();
                    for issue in &issues {
                        eprintln!("{:?}: {issue}", issue.severity);
                    }
                    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                        anyhow::bail!("config {} is invalid", path.display());
                    }
                    println!("config {} is valid", path.display());
                }
                ConfigCommand::Show => {
                    println!("{}", toml::to_string_pretty(&config)?);
                }
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("turnforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured tracing for the long-running commands.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tf_gateway=debug")),
        )
        .init();
}

/// Operator entropy tooling, the only way the stream grows.
fn run_entropy(config: &Config, command: EntropyCommand) -> anyhow::Result<()> {
    let storage = tf_storage::open_storage(config).context("opening storage")?;
    let engine = Engine::new(storage, EngineSettings::from_config(config));

    match command {
        EntropyCommand::Extend { count, seed } => {
            let seed = seed.unwrap_or(config.entropy.seed);
            let new_length = engine.entropy().extend(seed, count)?;
            println!("entropy stream extended to {new_length} entries");
        }
        EntropyCommand::Peek { limit } => {
            let length = engine.entropy().length()?;
            println!("stream length: {length}");
            for entry in engine.entropy().peek(limit)? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }
    Ok(())
}

/// Start the service with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("turnforge starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Single-instance guard ────────────────────────────────────────
    let _instance = tf_gateway::instance::InstanceGuard::acquire(&config.storage.data_root)?;

    // ── Storage & engine ─────────────────────────────────────────────
    let storage = tf_storage::open_storage(&config).context("opening storage")?;
    tracing::info!(backend = ?config.storage.backend, "storage ready");

    let engine = Arc::new(Engine::new(
        storage.clone(),
        EngineSettings::from_config(&config),
    ));
    engine
        .entropy()
        .bootstrap_if_empty(config.entropy.seed, config.entropy.bootstrap_entries)
        .context("seeding entropy stream")?;
    tracing::info!(
        entries = engine.entropy().length().unwrap_or(0),
        "entropy stream ready"
    );

    // ── Shared write key ─────────────────────────────────────────────
    let api_token_hash = api::auth::token_hash_from_env(&config.server.api_token_env);

    let state = AppState {
        config: config.clone(),
        engine,
        storage,
        api_token_hash,
    };

    // ── Router ───────────────────────────────────────────────────────
    let cors = build_cors(&config.server.allowed_origins);
    let app = api::router(state.clone())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("turnforge stopped");
    Ok(())
}

fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "skipping unparseable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
    } else {
        tracing::info!("shutdown signal received");
    }
}
