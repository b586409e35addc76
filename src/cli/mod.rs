//! CLI argument structures and command routing

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use crate::config::GenerationConfig;
use crate::generation::HttpGenerationClient;
use crate::progress::ConsoleReporter;
use crate::registry::ResourceRegistries;
use crate::state::SongRequest;
use crate::workflow::Engine;

/// Generate fully specified songs from a high-level request
#[derive(Parser)]
#[command(name = "songforge")]
#[command(about = "AI song-composition workflow engine", long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full generation workflow for a request
    Generate {
        /// Path to the song request JSON file
        #[arg(short, long)]
        request: PathBuf,

        /// Path to a resource registry JSON file (defaults to the
        /// built-in library)
        #[arg(long)]
        registry: Option<PathBuf>,

        /// Path to a songforge.toml configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Overall run deadline in seconds (overrides config)
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Write the song JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the built-in resource registry as JSON
    Registry,
}

pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Generate {
            request,
            registry,
            config,
            deadline_secs,
            output,
        } => run_generate(request, registry, config, deadline_secs, output).await,
        Commands::Registry => {
            println!(
                "{}",
                serde_json::to_string_pretty(&ResourceRegistries::builtin())?
            );
            Ok(())
        }
    }
}

async fn run_generate(
    request_path: PathBuf,
    registry_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    deadline_secs: Option<u64>,
    output: Option<PathBuf>,
) -> Result<()> {
    let raw = std::fs::read_to_string(&request_path)
        .with_context(|| format!("failed to read request file {}", request_path.display()))?;
    let request: SongRequest = serde_json::from_str(&raw)
        .with_context(|| format!("invalid request file {}", request_path.display()))?;

    let registries = match registry_path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read registry file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid registry file {}", path.display()))?
        }
        None => ResourceRegistries::builtin(),
    };

    let config = GenerationConfig::load(config_path.as_deref())?;
    let api_key = config.api_key()?;
    let client = Arc::new(HttpGenerationClient::new(&config, api_key)?);

    let mut engine = Engine::new(client, Arc::new(ConsoleReporter), &config);
    if let Some(secs) = deadline_secs {
        engine = engine.with_deadline(Duration::from_secs(secs));
    }
    debug!(request = %request_path.display(), "starting generation");

    match engine.generate(request, Arc::new(registries)).await {
        Ok(song) => {
            let json = serde_json::to_string_pretty(&song)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    eprintln!("Song written to {}", path.display());
                }
                None => println!("{json}"),
            }
            Ok(())
        }
        Err(failure) => {
            eprintln!("{}", serde_json::to_string_pretty(&failure)?);
            anyhow::bail!("{failure}")
        }
    }
}
