//! Discovery and archive runs wired from resolved settings.

use std::io::IsTerminal;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use mediaprobe_core::{
    ArchiveAssembler, CandidateProber, GateController, HttpSessionFactory, OutputStore,
    ResourceSink, Scheduler, SessionFactory, discover, load_identifiers,
};

use super::config_runtime::RunSettings;
use super::exit::{ProcessExit, determine_exit_outcome};
use super::progress::{spawn_progress_ui, stop_progress_ui};
use crate::cli::DiscoverArgs;

/// Reads the identifier listing from `input`, or stdin for `-`/none.
/// Returns `None` when stdin is an interactive terminal.
async fn read_listing(input: Option<&Path>) -> Result<Option<String>> {
    match input {
        Some(path) if path != Path::new("-") => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read input file '{}'", path.display()))?;
            Ok(Some(text))
        }
        _ => {
            if std::io::stdin().is_terminal() {
                return Ok(None);
            }
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read identifiers from stdin")?;
            Ok(Some(text))
        }
    }
}

fn build_scheduler(
    settings: &RunSettings,
    seed_url: String,
    cancel: &CancellationToken,
) -> Result<Scheduler> {
    debug!(seed = %seed_url, "gate seed");
    let factory: Arc<dyn SessionFactory> =
        Arc::new(HttpSessionFactory::new(settings.session_config()));
    let gate = Arc::new(GateController::new(
        settings.gate_signals(),
        settings.gate_policy(seed_url),
    ));
    Scheduler::new(settings.scheduler_config(), factory, gate, cancel.clone())
        .context("Invalid worker configuration")
}

pub(crate) async fn run_discover(
    settings: &RunSettings,
    args: &DiscoverArgs,
    cancel: &CancellationToken,
    show_progress: bool,
) -> Result<ProcessExit> {
    let Some(text) = read_listing(args.input.as_deref()).await? else {
        info!("No input provided. Pass a listing file or pipe identifiers via stdin.");
        info!("Example: cat listing.txt | mediaprobe discover");
        return Ok(ProcessExit::Success);
    };

    let identifiers = load_identifiers(
        &text,
        args.select.as_ref(),
        settings.strip_suffix.as_deref(),
    )
    .context("Invalid identifier selection")?;
    if identifiers.is_empty() {
        info!("No identifiers to probe");
        return Ok(ProcessExit::Success);
    }

    let store = Arc::new(OutputStore::open(&settings.store_path).await.with_context(|| {
        format!(
            "Failed to open output store '{}'",
            settings.store_path.display()
        )
    })?);
    let Some(seed_url) = settings.seed_url_for(&store.urls()) else {
        store.close().await;
        bail!(
            "No seed URL to clear the gate with: the output store is empty. \
             Pass --seed-url or set `seed_url` in the config file to a resource known to exist"
        );
    };
    let scheduler = build_scheduler(settings, seed_url, cancel)?;
    let prober = Arc::new(CandidateProber::new(
        settings.extension_candidates(),
        settings.consent_marker.clone(),
        settings.probe_timeout,
        settings.probe_mode,
    ));

    let already_stored = store.len();
    info!(
        identifiers = identifiers.len(),
        extensions = prober.extensions().len(),
        workers = settings.workers,
        partition = %settings.partition,
        stored = already_stored,
        "starting discovery"
    );

    let (progress, stop) = spawn_progress_ui(show_progress, scheduler.stats(), "probing");
    let sink: Arc<dyn ResourceSink> = store.clone();
    let result = discover(&scheduler, prober, sink, identifiers).await;
    stop_progress_ui(progress, &stop).await;
    store.close().await;
    let summary = result.context("Discovery could not start")?;

    info!(
        processed = summary.processed,
        found = summary.found,
        skipped = summary.skipped,
        failed = summary.failed,
        abandoned = summary.abandoned,
        appended = store.len().saturating_sub(already_stored),
        interrupted = summary.interrupted,
        "discovery finished"
    );
    Ok(determine_exit_outcome(&summary))
}

pub(crate) async fn run_archive(
    settings: &RunSettings,
    cancel: &CancellationToken,
    show_progress: bool,
) -> Result<ProcessExit> {
    let urls = OutputStore::load(&settings.store_path)
        .await
        .with_context(|| {
            format!(
                "Failed to read output store '{}'",
                settings.store_path.display()
            )
        })?;
    if urls.is_empty() {
        info!(store = %settings.store_path.display(), "Output store is empty; nothing to archive");
        return Ok(ProcessExit::Success);
    }

    let Some(seed_url) = settings.seed_url_for(&urls) else {
        bail!("No seed URL available");
    };
    let scheduler = build_scheduler(settings, seed_url, cancel)?;
    let assembler = ArchiveAssembler::new(
        &settings.archive_path,
        settings.compression,
        settings.direct_extensions.clone(),
        settings.wrapper_timeout(),
    );

    let (progress, stop) = spawn_progress_ui(show_progress, scheduler.stats(), "archiving");
    let result = assembler.run(urls, &scheduler).await;
    stop_progress_ui(progress, &stop).await;
    let summary = result.with_context(|| {
        format!(
            "Failed to assemble archive '{}'",
            settings.archive_path.display()
        )
    })?;

    info!(
        processed = summary.run.processed,
        added = summary.added,
        carried = summary.carried,
        already_archived = summary.already_archived,
        skipped = summary.run.skipped,
        failed = summary.run.failed,
        unnamed = summary.unnamed,
        replaced = summary.replaced,
        interrupted = summary.run.interrupted,
        "archive finished"
    );
    Ok(determine_exit_outcome(&summary.run))
}
