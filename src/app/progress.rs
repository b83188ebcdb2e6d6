//! Progress bar for worker runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use mediaprobe_core::RunStats;

/// Spawns the progress bar when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `show` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    show: bool,
    stats: Arc<RunStats>,
    label: &'static str,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !show {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_bar(stats, label, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_bar(
    stats: Arc<RunStats>,
    label: &'static str,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{msg} {bar:40} {pos}/{len} [{elapsed_precise}]")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(label);

        while !stop.load(Ordering::SeqCst) {
            bar.set_length(stats.total() as u64);
            bar.set_position(stats.settled() as u64);
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        bar.finish_and_clear();
    })
}

/// Signals the bar to stop and waits for it to clear.
pub(crate) async fn stop_progress_ui(
    handle: Option<tokio::task::JoinHandle<()>>,
    stop: &AtomicBool,
) {
    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = handle {
        let _ = handle.await;
    }
}
