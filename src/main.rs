//! confmap - persistent key=value configuration store
//!
//! Binary entry point: parses arguments, initializes logging, and hands the
//! command to the CLI glue.

use clap::Parser;
use confmap::cli::{self, ConfmapCli};
use confmap::logging::{init_logging, LogConfig, LogLevel};
use confmap::Result;

fn main() -> Result<()> {
    let args = ConfmapCli::parse();

    let mut log_config = LogConfig::from_env();
    if args.verbose {
        log_config.level = LogLevel::Debug;
    }
    init_logging(&log_config)?;

    if let Err(err) = cli::run(args) {
        eprintln!("confmap: {:#}", err);
        std::process::exit(1);
    }

    Ok(())
}
