//! reelseed - stream-first movie acquisition over BitTorrent
//!
//! # Usage
//!
//! ```bash
//! reelseed sources tt0111161
//! reelseed prepare tt0111161 --simulate --json
//! reelseed config
//! ```

use clap::Parser;

use reelseed::cli::{Cli, Command, ExitCode, Output};
use reelseed::commands;
use reelseed::config::Config;
use reelseed::logging;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    run_cli(cli).await.into()
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);

    let config = match &cli.config {
        Some(path) => match Config::load_from(path) {
            Ok(config) => config,
            Err(e) => return output.error(format!("{:#}", e), ExitCode::InvalidArgs),
        },
        None => Config::load(),
    };

    match cli.command {
        Command::Sources(cmd) => commands::sources_cmd(cmd, &config, &output).await,
        Command::Prepare(cmd) => commands::prepare_cmd(cmd, &config, &output).await,
        Command::Config(cmd) => commands::config_cmd(cmd, &config, &output),
    }
}
