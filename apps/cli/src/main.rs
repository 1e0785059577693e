//! `horizond` entry point

mod args;
mod commands;

use anyhow::Result;
use clap::Parser;
use horizon_log::{Config, Format, LoggerBuilder};

use crate::args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logging = Config::from_env();
    if let Some(level) = &cli.log_level {
        logging.level.clone_from(level);
    }
    if let Some(format) = cli.log_format {
        logging.format = format;
        logging.ansi = format != Format::Json;
    }
    let _guard = LoggerBuilder::from_config(logging).init()?;

    commands::run(cli.command).await
}
