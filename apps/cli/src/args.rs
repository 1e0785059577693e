//! Command-line arguments

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use horizon_log::Format;
use horizon_rotation::{DeploymentRole, WalId};

/// Horizon secrets backend daemon
#[derive(Parser, Debug)]
#[command(name = "horizond", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log filter directives, e.g. `info` or `horizon_rotation=debug,info`
    #[arg(long, global = true, env = "HORIZON_LOG")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, global = true, env = "HORIZON_LOG_FORMAT")]
    pub log_format: Option<Format>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the backend until interrupted
    Run {
        #[command(flatten)]
        store: StoreArgs,

        /// Override the deployment role from the settings file
        #[arg(long, env = "HORIZON_DEPLOYMENT_ROLE")]
        role: Option<DeploymentRole>,
    },

    /// List pending and quarantined rotation intents
    Wal {
        #[command(flatten)]
        store: StoreArgs,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the rotation queue that would be built at startup
    Queue {
        #[command(flatten)]
        store: StoreArgs,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Drop a quarantined intent so its instance rotates again
    Release {
        #[command(flatten)]
        store: StoreArgs,

        /// Id of the quarantined intent
        id: WalId,
    },
}

/// Where the backend keeps its state
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Settings file (TOML); defaults apply when omitted
    #[arg(long, env = "HORIZON_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Data directory of the file storage
    #[arg(long, env = "HORIZON_DATA_DIR", default_value = "./horizon-data")]
    pub data_dir: PathBuf,
}
