//! SteerClaw CLI: the main entry point.
//!
//! Commands:
//! - `route`    : pick a model for a task from the model table
//! - `plan`     : decide whether a prompt needs a plan, and draft one
//! - `compress` : compact a saved conversation to the token budget
//! - `config`   : show, locate or validate the configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use steerclaw_config::AppConfig;
use steerclaw_providers::RoutingPriority;

mod commands;

#[derive(Parser)]
#[command(
    name = "steerclaw",
    about = "SteerClaw: steerable assistant runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Pick the best model for a task
    Route {
        /// Estimated prompt tokens
        #[arg(long, default_value_t = 1000)]
        input_tokens: usize,

        /// Estimated answer tokens
        #[arg(long, default_value_t = 512)]
        output_tokens: usize,

        /// Require tool calling
        #[arg(long)]
        tools: bool,

        /// Require image input
        #[arg(long)]
        vision: bool,

        /// local, cost or quality
        #[arg(short, long, default_value = "local")]
        priority: RoutingPriority,

        /// Print the selection as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether a prompt needs a plan and draft one
    Plan {
        /// The prompt to analyse
        prompt: String,

        /// System prompt counted against the budget
        #[arg(long, default_value = "")]
        system: String,
    },

    /// Compact a conversation history file (JSON array of messages)
    Compress {
        /// Path to the history file
        file: PathBuf,

        /// System prompt counted against the budget
        #[arg(long, default_value = "")]
        system: String,

        /// Budget for this model instead of the configured one
        #[arg(long)]
        model: Option<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Load and validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Route {
            input_tokens,
            output_tokens,
            tools,
            vision,
            priority,
            json,
        } => {
            let config = AppConfig::load()?;
            let task = steerclaw_providers::ModelTask {
                estimated_input_tokens: input_tokens,
                estimated_output_tokens: output_tokens,
                needs_tools: tools,
                needs_vision: vision,
                priority,
            };
            commands::route::run(&config, &task, json).await?
        }
        Commands::Plan { prompt, system } => {
            let config = AppConfig::load()?;
            commands::plan::run(&config, &prompt, &system).await?
        }
        Commands::Compress {
            file,
            system,
            model,
            json,
        } => {
            let config = AppConfig::load()?;
            commands::compress::run(&config, &file, &system, model.as_deref(), json).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
        },
    }

    Ok(())
}
