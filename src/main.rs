//! semblance CLI: instance store and matching over a pluggable dispatcher.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use semblance::client::{SemblanceClient, discover_server};
use semblance::config::Config;
use semblance::dispatch::{ActionCategory, ActionType, Request, Response};
use semblance::engine::Engine;
use semblance::paths::SemblancePaths;
use semblance::schema::MemorySchema;

#[derive(Parser)]
#[command(name = "semblance", version, about = "Instance store with pluggable matching")]
struct Cli {
    /// Data directory for persistent storage.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Config file (defaults to the XDG config location).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Force a local in-process engine even if a server is running.
    #[arg(long, global = true)]
    local: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a semblance data directory.
    Init,

    /// Store an instance from a JSON document.
    Add {
        /// Path to a JSON file holding the instance (`-` for stdin).
        file: PathBuf,
        /// Fail instead of replacing when the identity is already stored.
        #[arg(long)]
        strict: bool,
    },

    /// Fetch a stored instance by identity.
    Get {
        identity: String,
    },

    /// Remove a stored instance by identity.
    Remove {
        identity: String,
    },

    /// Match a query instance against the store.
    Query {
        /// Path to a JSON file holding the query instance (`-` for stdin).
        file: PathBuf,
    },

    /// Test one stored instance against a query instance.
    Matches {
        identity: String,
        /// Path to a JSON file holding the query instance (`-` for stdin).
        file: PathBuf,
    },

    /// Show engine info and statistics.
    Info,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let paths = SemblancePaths::resolve().into_diagnostic()?;

    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());
    let mut config = Config::load_or_default(&config_path).into_diagnostic()?;
    if cli.data_dir.is_some() {
        config.store.data_dir = cli.data_dir.clone();
    }

    match cli.command {
        Commands::Init => {
            paths.ensure_dirs().into_diagnostic()?;
            let mut config = config;
            config.store.data_dir = Some(
                cli.data_dir.unwrap_or_else(|| paths.store_dir()),
            );
            let engine = Engine::new(config, Arc::new(MemorySchema::new()))?;
            println!("Initialized semblance");
            println!("{}", engine.info());
        }

        Commands::Add { file, strict } => {
            let mut config = config;
            if strict {
                config.store.strict_insert = true;
            }
            let client = connect(&paths, config, cli.local)?;
            let body = read_json(&file)?;
            let response = client
                .dispatch(&Request::new(ActionCategory::Store, ActionType::Add, body))
                .into_diagnostic()?;
            print_response(&response)?;
        }

        Commands::Get { identity } => {
            let client = connect(&paths, config, cli.local)?;
            let response = client
                .dispatch(&Request::new(
                    ActionCategory::Store,
                    ActionType::Get,
                    serde_json::json!({ "identity": identity }),
                ))
                .into_diagnostic()?;
            print_response(&response)?;
        }

        Commands::Remove { identity } => {
            let client = connect(&paths, config, cli.local)?;
            let response = client
                .dispatch(&Request::new(
                    ActionCategory::Store,
                    ActionType::Remove,
                    serde_json::json!({ "identity": identity }),
                ))
                .into_diagnostic()?;
            print_response(&response)?;
        }

        Commands::Query { file } => {
            let client = connect(&paths, config, cli.local)?;
            let body = read_json(&file)?;
            let response = client
                .dispatch(&Request::new(ActionCategory::Match, ActionType::Query, body))
                .into_diagnostic()?;
            print_response(&response)?;
        }

        Commands::Matches { identity, file } => {
            let client = connect(&paths, config, cli.local)?;
            let query = read_json(&file)?;
            let response = client
                .dispatch(&Request::new(
                    ActionCategory::Match,
                    ActionType::Matches,
                    serde_json::json!({ "identity": identity, "query": query }),
                ))
                .into_diagnostic()?;
            print_response(&response)?;
        }

        Commands::Info => {
            let engine = Engine::new(config, Arc::new(MemorySchema::new()))?;
            println!("{}", engine.info());
        }
    }

    Ok(())
}

/// Prefer a running server; otherwise spin up a local engine.
fn connect(paths: &SemblancePaths, config: Config, force_local: bool) -> Result<SemblanceClient> {
    if !force_local {
        if let Some(info) = discover_server(paths) {
            tracing::debug!(url = %info.base_url(), "using running server");
            return Ok(SemblanceClient::remote(&info));
        }
    }
    let engine = Engine::new(config, Arc::new(MemorySchema::new()))?;
    Ok(SemblanceClient::local(Arc::new(engine.dispatcher())))
}

fn read_json(path: &PathBuf) -> Result<serde_json::Value> {
    let raw = if path.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).into_diagnostic()?
    } else {
        std::fs::read_to_string(path).into_diagnostic()?
    };
    serde_json::from_str(&raw).into_diagnostic()
}

fn print_response(response: &Response) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(response).into_diagnostic()?
    );
    if response.ok {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
