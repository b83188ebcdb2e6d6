//! Retrieval-mode orchestration: plan, fetch in parallel, append serially.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use super::{
    AppendOutcome, ArchiveError, ArchiveManifest, Compression, ContainerWriter, PayloadRetriever,
    classify_stored_url, entry_name_for_url,
};
use crate::probe::{Classification, ValidatedResource};
use crate::scheduler::{
    ItemOutcome, ResourceSink, RunSummary, Scheduler, SinkError, SinkOutcome, WorkHandler,
    WorkerContext,
};
use crate::session::Session;

/// A recorded URL that still has to be archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Recorded resource URL.
    pub url: String,
    /// Container entry name.
    pub name: String,
    /// Retrieval strategy.
    pub classification: Classification,
    /// Position in the store, used as the logical timestamp.
    pub position: u64,
}

/// Retrieves resources and hands them to the container writer.
#[derive(Debug)]
pub struct ArchiveSink {
    retriever: PayloadRetriever,
    writer: Arc<ContainerWriter>,
    manifest: Arc<ArchiveManifest>,
}

impl ArchiveSink {
    /// Creates a sink writing into `writer`, skipping names in `manifest`.
    #[must_use]
    pub fn new(
        retriever: PayloadRetriever,
        writer: Arc<ContainerWriter>,
        manifest: Arc<ArchiveManifest>,
    ) -> Self {
        Self {
            retriever,
            writer,
            manifest,
        }
    }
}

#[async_trait]
impl ResourceSink for ArchiveSink {
    async fn accept(
        &self,
        session: &dyn Session,
        resource: ValidatedResource,
    ) -> Result<SinkOutcome, SinkError> {
        let name = entry_name_for_url(&resource.url).ok_or_else(|| ArchiveError::InvalidEntryName {
            url: resource.url.clone(),
        })?;
        if self.manifest.contains(&name) {
            return Ok(SinkOutcome::AlreadyPresent);
        }
        let payload = self.retriever.fetch(session, &resource, &name).await?;
        match self.writer.append(&name, &payload.path).await? {
            AppendOutcome::Added => Ok(SinkOutcome::Recorded),
            AppendOutcome::AlreadyArchived => Ok(SinkOutcome::AlreadyPresent),
        }
    }

    fn already_recorded(&self, url: &str) -> bool {
        entry_name_for_url(url).is_some_and(|name| self.manifest.contains(&name))
    }
}

/// Worker-side handling of one pending entry.
#[derive(Debug)]
pub struct ArchiveHandler {
    sink: Arc<ArchiveSink>,
}

impl ArchiveHandler {
    /// Creates a handler around `sink`.
    #[must_use]
    pub fn new(sink: Arc<ArchiveSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl WorkHandler<PendingEntry> for ArchiveHandler {
    async fn handle(&self, context: &WorkerContext, entry: PendingEntry) -> ItemOutcome {
        let resource = ValidatedResource {
            url: entry.url,
            classification: entry.classification,
            sequence: entry.position,
        };
        let url = resource.url.clone();
        match self.sink.accept(context.session.as_ref(), resource).await {
            Ok(SinkOutcome::Recorded) => {
                info!(worker = context.worker_id, name = %entry.name, "archived");
                ItemOutcome::Found(1)
            }
            Ok(SinkOutcome::AlreadyPresent) => ItemOutcome::Skipped,
            Err(error) => {
                warn!(url = %url, error = %error, "retrieval failed; left for a later run");
                ItemOutcome::Failed
            }
        }
    }
}

/// Counts reported by an archive run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssemblySummary {
    /// Worker counts for the retrieved entries.
    pub run: RunSummary,
    /// Recorded URLs whose name was already archived.
    pub already_archived: usize,
    /// Recorded URLs without a usable entry name.
    pub unnamed: usize,
    /// Entries copied from the previous container.
    pub carried: usize,
    /// Entries added by this run.
    pub added: usize,
    /// Whether the container file was rewritten.
    pub replaced: bool,
}

/// Rebuilds the container from the output store.
#[derive(Debug, Clone)]
pub struct ArchiveAssembler {
    archive_path: PathBuf,
    compression: Compression,
    direct_extensions: Vec<String>,
    wrapper_timeout: Duration,
}

impl ArchiveAssembler {
    /// Creates an assembler for `archive_path`.
    #[must_use]
    pub fn new(
        archive_path: impl Into<PathBuf>,
        compression: Compression,
        direct_extensions: Vec<String>,
        wrapper_timeout: Duration,
    ) -> Self {
        Self {
            archive_path: archive_path.into(),
            compression,
            direct_extensions,
            wrapper_timeout,
        }
    }

    /// Container path.
    #[must_use]
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Directory holding in-flight payloads: `<archive>.spool`.
    #[must_use]
    pub fn spool_dir(&self) -> PathBuf {
        let mut name = self
            .archive_path
            .file_name()
            .unwrap_or_default()
            .to_os_string();
        name.push(".spool");
        self.archive_path.with_file_name(name)
    }

    /// Splits recorded URLs into entries to fetch, skipping names already in
    /// `manifest` and repeated names. Returns `(pending, already_archived, unnamed)`.
    #[must_use]
    pub fn plan(&self, urls: &[String], manifest: &ArchiveManifest) -> (Vec<PendingEntry>, usize, usize) {
        let mut pending = Vec::new();
        let mut seen = HashSet::new();
        let mut already_archived = 0;
        let mut unnamed = 0;

        for (position, url) in urls.iter().enumerate() {
            let Some(name) = entry_name_for_url(url) else {
                warn!(url = %url, "cannot derive an entry name; skipping");
                unnamed += 1;
                continue;
            };
            if manifest.contains(&name) {
                already_archived += 1;
                continue;
            }
            if !seen.insert(name.clone()) {
                continue;
            }
            pending.push(PendingEntry {
                classification: classify_stored_url(url, &self.direct_extensions),
                url: url.clone(),
                name,
                position: position as u64,
            });
        }
        (pending, already_archived, unnamed)
    }

    /// Archives every recorded URL not yet in the container.
    ///
    /// Individual retrieval failures are counted and skipped. The container
    /// is replaced only after a successful finish.
    ///
    /// # Errors
    ///
    /// Reading the existing container, creating the partial container,
    /// starting the worker pool and finishing the container are fatal.
    #[instrument(level = "debug", skip(self, urls, scheduler), fields(archive = %self.archive_path.display()))]
    pub async fn run(
        &self,
        urls: Vec<String>,
        scheduler: &Scheduler,
    ) -> Result<AssemblySummary, ArchiveError> {
        let manifest = ArchiveManifest::load(&self.archive_path)?;
        let (pending, already_archived, unnamed) = self.plan(&urls, &manifest);
        info!(
            recorded = urls.len(),
            archived = manifest.len(),
            pending = pending.len(),
            "archive plan"
        );

        let mut summary = AssemblySummary {
            already_archived,
            unnamed,
            carried: manifest.len(),
            ..AssemblySummary::default()
        };
        if pending.is_empty() {
            info!("archive already contains every recorded resource");
            return Ok(summary);
        }

        let writer = Arc::new(ContainerWriter::create(&self.archive_path, self.compression).await?);
        let spool_dir = self.spool_dir();
        let sink = Arc::new(ArchiveSink::new(
            PayloadRetriever::new(&spool_dir, self.wrapper_timeout),
            Arc::clone(&writer),
            Arc::new(manifest),
        ));
        let handler: Arc<dyn WorkHandler<PendingEntry>> = Arc::new(ArchiveHandler::new(sink));

        let run = scheduler.run(pending, handler).await;
        let run = match run {
            Ok(run) => run,
            Err(error) => {
                writer.abort().await;
                remove_spool_dir(&spool_dir).await;
                return Err(error.into());
            }
        };

        let finished = writer.finish().await;
        remove_spool_dir(&spool_dir).await;
        let stats = finished?;

        summary.run = run;
        summary.carried = stats.carried;
        summary.added = stats.added;
        summary.replaced = true;
        Ok(summary)
    }
}

async fn remove_spool_dir(path: &Path) {
    if let Err(error) = tokio::fs::remove_dir_all(path).await
        && error.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %error, "failed to remove spool directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> ArchiveAssembler {
        ArchiveAssembler::new(
            "/out/media_archive.zip",
            Compression::Stored,
            vec![".avi".to_string(), ".mov".to_string()],
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_spool_dir_sits_next_to_archive() {
        assert_eq!(
            assembler().spool_dir(),
            PathBuf::from("/out/media_archive.zip.spool")
        );
    }

    #[test]
    fn test_plan_skips_archived_duplicates_and_unnamed() {
        let urls: Vec<String> = [
            "https://h/a/A.mp4",
            "https://h/b/B.avi",
            "https://h/c/B.avi",
            "https://h/dir/",
            "https://h/C.m4a",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        let manifest = ArchiveManifest::from_names(["A.mp4"]);

        let (pending, already, unnamed) = assembler().plan(&urls, &manifest);
        let names: Vec<&str> = pending.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["B.avi", "C.m4a"]);
        assert_eq!(pending[0].classification, Classification::DirectDownload);
        assert_eq!(pending[1].classification, Classification::EmbeddedStream);
        assert_eq!(pending[1].position, 4);
        assert_eq!(already, 1);
        assert_eq!(unnamed, 1);
    }
}
