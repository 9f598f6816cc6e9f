//! Filter Class Predictor CLI
//!
//! A command-line client for training the predictor and asking it for
//! filter classes.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{batch, predict, train};
use std::path::PathBuf;
use std::time::Duration;

/// Filter Class Predictor CLI
#[derive(Parser)]
#[command(name = "clfctl")]
#[command(author, version, about = "CLI for the Filter Class Predictor", long_about = None)]
pub struct Cli {
    /// Predictor address (can also be set via CLF_ADDR env var)
    #[arg(long, env = "CLF_ADDR", default_value = "127.0.0.1:9090")]
    pub addr: String,

    /// Connect and response timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout: u64,

    /// Output format
    #[arg(long, short, default_value = "plain")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Retrain from a dataset under the server's dataset root
    Train {
        /// Dataset file name, relative to the dataset root
        token: String,
    },

    /// Predict the filter class of one feature row
    Predict {
        /// Integer feature values
        #[arg(required = true, allow_negative_numbers = true)]
        features: Vec<i64>,
    },

    /// Predict every row of a CSV file over one connection
    Batch {
        /// CSV with a header row; Target and Count columns are ignored
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let timeout = Duration::from_secs(cli.timeout);

    let result = match &cli.command {
        Commands::Train { token } => train::train(&cli.addr, token, timeout, cli.verbose).await,
        Commands::Predict { features } => {
            predict::predict(&cli.addr, features, timeout, cli.format).await
        }
        Commands::Batch { path } => batch::batch(&cli.addr, path, timeout, cli.format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
