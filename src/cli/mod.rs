use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use crate::signals::PositionSide;

pub mod commands;

#[derive(Parser)]
#[command(
    name = "llm-advisory",
    about = "Multi-advisor LLM signal engine for trading strategies",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one advisory cycle over a market state and print the combined decision
    Analyze {
        /// Market state JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Preset advisors to run (defaults to all presets)
        #[arg(short, long = "advisor")]
        advisors: Vec<String>,

        /// JSON file with additional advisor definitions
        #[arg(long)]
        advisors_file: Option<PathBuf>,

        /// Current net position, used to derive trade advice
        #[arg(short, long, default_value = "flat")]
        position: PositionSide,

        /// Cycle deadline in seconds (defaults to ADVISORY_STEP_TIMEOUT_SECONDS)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Run a single preset advisor and print its signal
    Advise {
        /// Market state JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Preset advisor name
        #[arg(short, long)]
        advisor: String,
    },

    /// Print the prompts advisors would send, without calling a backend
    Render {
        /// Market state JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Preset advisors to render (defaults to all presets)
        #[arg(short, long = "advisor")]
        advisors: Vec<String>,
    },

    /// List the built-in advisors
    Advisors,

    /// Check that the configured inference backend is reachable
    Health,
}

/// Execute CLI command
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Analyze {
            input,
            advisors,
            advisors_file,
            position,
            timeout,
        } => {
            info!("Running advisory cycle on {}", input.display());
            commands::analyze(input, advisors, advisors_file, position, timeout).await?;
        }
        Commands::Advise { input, advisor } => {
            info!("Running advisor '{}' on {}", advisor, input.display());
            commands::advise(input, advisor).await?;
        }
        Commands::Render { input, advisors } => {
            commands::render(input, advisors).await?;
        }
        Commands::Advisors => {
            commands::list_advisors();
        }
        Commands::Health => {
            commands::health().await?;
        }
    }
    Ok(())
}
