#![forbid(unsafe_code)]

//! tvla-run: TVLA batch runner entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = cli_app::Cli::parse();
    if let Err(e) = cli_app::run(&args) {
        eprintln!("tvla-run: {e}");
        std::process::exit(e.exit_code());
    }
}
