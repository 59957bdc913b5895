use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "worksync", version, about = "Incremental work item sync")]
pub struct Cli {
    /// SQLite database file (overrides WORKSYNC_DATABASE_PATH).
    #[arg(long, global = true, env = "WORKSYNC_DATABASE_PATH")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default if no subcommand given).
    Serve {
        /// Listen address, e.g. 127.0.0.1:8080.
        #[arg(long, env = "WORKSYNC_HTTP_ADDR")]
        addr: Option<String>,
    },

    /// Print the configured connection and its sync state as JSON.
    Status,

    /// Create or replace the tracker connection.
    Configure {
        #[arg(long)]
        organization: String,

        #[arg(long)]
        project: String,

        /// Area path filter; leave empty to use the team's default area path.
        #[arg(long, default_value = "")]
        area_path: String,

        #[arg(long)]
        team_name: Option<String>,

        #[arg(long)]
        team_id: Option<String>,

        /// Store the connection but keep scheduled and manual passes from running.
        #[arg(long)]
        disabled: bool,

        /// Tracker base URL (defaults to https://dev.azure.com).
        #[arg(long)]
        base_url: Option<String>,
    },
}
