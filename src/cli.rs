use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "swap-quote-relay",
    version,
    about = "Preview and submit pasted swap quotes through a connected wallet"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Normalize a quote and print the decoded transaction
    Preview {
        /// Read the quote JSON from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Normalize a quote, then submit the approval (if any) and main transaction
    Execute {
        /// Read the quote JSON from this file instead of stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Run the HTTP API server
    Serve {
        /// Override bind address, e.g. 0.0.0.0:8080
        #[arg(long)]
        addr: Option<String>,
    },
}
