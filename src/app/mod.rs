//! Application layer: config loading, signal handling and run dispatch.

mod config_file;
mod config_runtime;
mod exit;
mod progress;
mod runtime;
mod terminal;

use std::io::IsTerminal;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cli::{Cli, Command};

pub(crate) use config_runtime::default_log_level;
pub(crate) use exit::ProcessExit;
pub(crate) use terminal::{init_tracing, is_dumb_terminal, no_color_env_requested, should_disable_color};

/// Loads configuration and runs the selected subcommand.
pub(crate) async fn run(cli: Cli) -> Result<ProcessExit> {
    let file_config = config_file::load_file_config(cli.config.as_deref())?;
    debug!(loaded = file_config.is_some(), "config file");
    let settings = config_runtime::RunSettings::resolve(&cli, file_config.as_ref());
    debug!(?settings, "resolved settings");

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let show_progress = terminal::should_show_progress(
        std::io::stderr().is_terminal(),
        cli.quiet,
        is_dumb_terminal(),
    );

    match &cli.command {
        Command::Discover(args) => {
            runtime::run_discover(&settings, args, &cancel, show_progress).await
        }
        Command::Archive(args) => {
            let settings = settings.with_archive_args(args);
            runtime::run_archive(&settings, &cancel, show_progress).await
        }
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight items");
            cancel.cancel();
        }
    });
}
