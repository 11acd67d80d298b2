//! Process entrypoint: parses the CLI, wires up logging,
//! loads configuration, and dispatches to the `serve`/`digest` subcommand.

use std::process::ExitCode;

use clap::Parser;
use log::{error, LevelFilter};

use procksy::cli::{Cli, Command};
use procksy::{auth, config::ServerConfig, TerminationSignal};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Digest => run_digest(),
        Command::Serve(args) => {
            let config = match &cli.config {
                Some(path) => match ServerConfig::from_required_filepath(path) {
                    Ok(config) => config,
                    Err(err) => {
                        error!("{err}");
                        return ExitCode::FAILURE;
                    }
                },
                None => ServerConfig::from_default_locations(),
            };
            run_serve(config, args).await
        }
    }
}

/// `-v` raises the floor to debug, `-vv` (or more) to trace. `RUST_LOG`
/// always wins if set, matching the layering `env_logger` itself supports.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run_digest() -> ExitCode {
    let secret = match rpassword::prompt_password("Secret: ") {
        Ok(secret) => secret,
        Err(err) => {
            error!("failed to read secret: {err}");
            return ExitCode::FAILURE;
        }
    };
    match auth::hash_password(secret.as_bytes()) {
        Ok(digest) => {
            println!("{digest}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("failed to hash secret: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run_serve(mut config: ServerConfig, args: procksy::cli::ServeArgs) -> ExitCode {
    config.apply_cli(&args);

    let signal = TerminationSignal::new();
    signal.spawn_signal_handler();

    match procksy::acceptor::serve(config, signal).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
