//! CLI entry point for mediaprobe.

use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

mod app;
mod cli;

use app::ProcessExit;
use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // RUST_LOG is honored unless -v/-q was given
    let force_cli_level = cli.verbose > 0 || cli.quiet;
    let no_color = app::should_disable_color(
        cli.no_color,
        app::no_color_env_requested(),
        app::is_dumb_terminal(),
    );
    app::init_tracing(
        app::default_log_level(cli.verbose, cli.quiet),
        force_cli_level,
        no_color,
    );
    debug!(?cli, "CLI arguments parsed");

    match app::run(cli).await {
        Ok(exit) => exit.into(),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ProcessExit::Fatal.into()
        }
    }
}
