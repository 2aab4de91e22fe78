mod application;
mod presentation {
    pub mod cli;
}

use std::process::ExitCode;

use clap::Parser;
use time::UtcOffset;
use tracing_subscriber::EnvFilter;

use presentation::cli::Cli;

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    // must happen before any thread is spawned
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match application::run(cli, offset) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let (code, category) = application::classify(&e);
            tracing::debug!(error = ?e, "command failed");
            eprintln!("error[{category}]: {}", application::describe(&e));
            ExitCode::from(code)
        }
    }
}
