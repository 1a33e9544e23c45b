//! planloop CLI: the main entry point.
//!
//! Commands:
//! - `run`    : Take one request through plan → execute → critique
//! - `roles`  : Show the role table
//! - `config` : Show the effective configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "planloop",
    about = "planloop: plan, execute, critique, repeat",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging and progress output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task to completion
    Run {
        /// The initial request, e.g. "list top 5 security incidents this month"
        input: String,

        /// Config file (defaults to ~/.planloop/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override orchestrator.max_iterations
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Print the full outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the five roles with their goals and instructions
    Roles {
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration (credentials redacted)
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the built-in defaults instead
        #[arg(long)]
        default_toml: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }

    match cli.command {
        Commands::Run {
            input,
            config,
            max_iterations,
            json,
        } => {
            let options = commands::run::RunOptions {
                config_path: config,
                max_iterations,
                json,
                progress: cli.verbose,
            };
            if !commands::run::run(&input, options).await? {
                std::process::exit(1);
            }
        }
        Commands::Roles { json } => commands::roles::run(json)?,
        Commands::Config {
            config,
            default_toml,
        } => commands::config_cmd::show(config, default_toml)?,
    }

    Ok(())
}
