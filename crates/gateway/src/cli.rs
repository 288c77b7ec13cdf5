//! Command-line interface and config loading.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use tf_domain::Config;

#[derive(Debug, Parser)]
#[command(name = "turnforge", about = "Deterministic turn engine for tabletop sessions")]
pub struct Cli {
    /// Config file path. Falls back to `TF_CONFIG`, then `./turnforge.toml`.
    #[arg(long, global = true, env = "TF_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP service (default).
    Serve,
    /// Operator tools for the global entropy stream.
    Entropy {
        #[command(subcommand)]
        command: EntropyCommand,
    },
    /// Config inspection.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum EntropyCommand {
    /// Deterministically append entries to the stream.
    Extend {
        #[arg(long, default_value_t = 256)]
        count: u64,
        /// Override the configured seed.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Show the first entries of the stream.
    Peek {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate and report issues; non-zero exit on errors.
    Validate,
    /// Print the effective configuration.
    Show,
}

/// Load the config file (missing file = defaults), then apply env
/// overrides.
pub fn load_config(path: Option<&PathBuf>) -> anyhow::Result<(Config, PathBuf)> {
    let path = path
        .cloned()
        .unwrap_or_else(|| PathBuf::from("./turnforge.toml"));

    let mut config: Config = if path.is_file() {
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?
    } else {
        Config::default()
    };

    config.apply_env_overrides();
    Ok((config, path))
}
