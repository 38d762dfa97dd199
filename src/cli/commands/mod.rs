//! CLI parser and command dispatch.

mod config_cmd;
mod fetch;
mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "xacquire")]
#[command(about = "Timeline acquisition through Nitter mirrors")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Bind address: port, host, or host:port (defaults to settings)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Fetch one timeline and write it to disk
    Fetch {
        /// Account handle, without the @
        username: String,
        /// Number of items to collect
        #[arg(short, long)]
        limit: Option<usize>,
        /// Delay between pages in milliseconds
        #[arg(short, long)]
        delay: Option<u64>,
        /// Retries per page
        #[arg(short, long)]
        retries: Option<u32>,
        /// Also write the result to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| settings.bind.clone());
            serve::cmd_serve(&settings, &bind).await
        }
        Commands::Fetch {
            username,
            limit,
            delay,
            retries,
            output,
        } => {
            let overrides = fetch::FetchOverrides {
                limit,
                delay_ms: delay,
                retries,
            };
            fetch::cmd_fetch(&settings, &username, overrides, output.as_deref()).await
        }
        Commands::Config => config_cmd::cmd_config_show(&settings),
    }
}
