//! talos-ci CLI library

pub mod commands;
pub mod config;
pub mod error;
pub mod outputs;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// talos-ci - readiness checks for ephemeral Talos clusters in CI
#[derive(Parser, Debug)]
#[command(name = "talos-ci")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Wait until the cluster is ready and export its credentials
    Verify(commands::verify::VerifyArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Verify(args) => commands::verify::run(args).await,
        }
    }
}
