use std::process::ExitCode;

use clap::Parser;
use common_tracing::{flush_tracing, init_tracing, should_enable_chrome_trace};
use sieve_cli::{execute, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.chrome_trace || should_enable_chrome_trace()) {
        eprintln!("Failed to initialize tracing: {e}");
    }

    let result = execute(cli, &mut std::io::stdout().lock());
    flush_tracing();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
