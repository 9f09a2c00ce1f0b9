use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use dotenv::dotenv;
use tracing_subscriber::EnvFilter;

use gsc_lib::{cli, Cli, Command};

fn main() -> ExitCode {
    // Lets GSC_CONFIG_DIR and RUST_LOG come from a local .env file
    dotenv().ok();

    let cli = Cli::parse();
    let debug = matches!(&cli.command, Command::Search(args) if args.debug);
    init_tracing(debug);

    match cli::run(cli) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("{} {}", "[Error]".bright_red(), e);
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

/// `--debug` turns on gsc's own debug logs, otherwise `RUST_LOG` decides (default: warn).
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("warn,gsc=debug,gsc_lib=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
