//! Single serializing appender for the container.
//!
//! The ZIP writer lives on one blocking thread and receives commands over a
//! channel, so workers retrieving in parallel never interleave entry data.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use super::{ArchiveError, Compression};

const COMMAND_QUEUE_DEPTH: usize = 8;

/// What an append did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The entry was written.
    Added,
    /// An entry with this name already exists; the payload was discarded.
    AlreadyArchived,
}

/// Entry counts of a finished container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerStats {
    /// Entries copied from the previous container.
    pub carried: usize,
    /// Entries added in this run.
    pub added: usize,
}

/// Temporary path the container is built under: `<archive>.partial`.
#[must_use]
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    target.with_file_name(name)
}

enum Command {
    Append {
        name: String,
        spool: PathBuf,
        ack: oneshot::Sender<Result<AppendOutcome, ArchiveError>>,
    },
    Finish {
        ack: oneshot::Sender<Result<ContainerStats, ArchiveError>>,
    },
    Abort {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to the container being rebuilt.
///
/// Dropping the handle without [`finish`](Self::finish) discards the
/// partial file and leaves the previous container untouched. After
/// `finish` or [`abort`](Self::abort), appends fail with
/// [`ArchiveError::WriterClosed`].
#[derive(Debug)]
pub struct ContainerWriter {
    target: PathBuf,
    carried: usize,
    sender: mpsc::Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ContainerWriter {
    /// Starts a rebuild of `target`, copying over every entry it already has.
    ///
    /// # Errors
    ///
    /// Fails if the partial file cannot be created or the existing
    /// container cannot be read. The existing container is never modified.
    #[instrument(level = "debug", fields(target = %target.display()))]
    pub async fn create(target: &Path, compression: Compression) -> Result<Self, ArchiveError> {
        let (sender, receiver) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (ready, opened) = oneshot::channel();
        let owned_target = target.to_path_buf();

        let worker = tokio::task::spawn_blocking(move || {
            match BlockingContainer::open(owned_target, compression) {
                Ok(container) => {
                    let _ = ready.send(Ok(container.carried));
                    container.serve(receiver);
                }
                Err(error) => {
                    let _ = ready.send(Err(error));
                }
            }
        });

        let carried = opened.await.map_err(|_| ArchiveError::WriterClosed)??;
        Ok(Self {
            target: target.to_path_buf(),
            carried,
            sender,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Container path that will be replaced on finish.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Entries carried over from the previous container.
    #[must_use]
    pub fn carried(&self) -> usize {
        self.carried
    }

    /// Moves the spooled payload at `spool` into the container as `name`.
    ///
    /// The spool file is removed in both outcomes.
    ///
    /// # Errors
    ///
    /// Returns an error if the spool cannot be read or the entry cannot be
    /// written. A failure after the entry was started makes the container
    /// unusable and [`finish`](Self::finish) will refuse to install it.
    pub async fn append(&self, name: &str, spool: &Path) -> Result<AppendOutcome, ArchiveError> {
        let (ack, response) = oneshot::channel();
        self.sender
            .send(Command::Append {
                name: name.to_string(),
                spool: spool.to_path_buf(),
                ack,
            })
            .await
            .map_err(|_| ArchiveError::WriterClosed)?;
        response.await.map_err(|_| ArchiveError::WriterClosed)?
    }

    /// Writes the central directory, fsyncs and renames over the target.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal for the run; the previous container stays
    /// in place.
    pub async fn finish(&self) -> Result<ContainerStats, ArchiveError> {
        let (ack, response) = oneshot::channel();
        self.sender
            .send(Command::Finish { ack })
            .await
            .map_err(|_| ArchiveError::WriterClosed)?;
        let result = response.await.map_err(|_| ArchiveError::WriterClosed)?;
        self.join_worker().await;
        result
    }

    /// Discards the partial container.
    pub async fn abort(&self) {
        let (ack, response) = oneshot::channel();
        if self.sender.send(Command::Abort { ack }).await.is_ok() {
            let _ = response.await;
        }
        self.join_worker().await;
    }

    async fn join_worker(&self) {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle
            && let Err(error) = handle.await
        {
            warn!(error = %error, "container writer thread ended abnormally");
        }
    }
}

struct BlockingContainer {
    target: PathBuf,
    partial: PathBuf,
    zip: ZipWriter<BufWriter<File>>,
    names: HashSet<String>,
    compression: Compression,
    carried: usize,
    added: usize,
    broken: Option<String>,
}

impl BlockingContainer {
    fn open(target: PathBuf, compression: Compression) -> Result<Self, ArchiveError> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ArchiveError::io(parent, source))?;
        }
        let partial = partial_path(&target);
        let file = File::create(&partial).map_err(|source| ArchiveError::io(&partial, source))?;
        let mut container = Self {
            target,
            partial,
            zip: ZipWriter::new(BufWriter::new(file)),
            names: HashSet::new(),
            compression,
            carried: 0,
            added: 0,
            broken: None,
        };
        if let Err(error) = container.carry_over() {
            container.discard();
            return Err(error);
        }
        Ok(container)
    }

    fn carry_over(&mut self) -> Result<(), ArchiveError> {
        let source = match File::open(&self.target) {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => return Err(ArchiveError::io(&self.target, source)),
        };
        let target = self.target.clone();
        let mut previous =
            ZipArchive::new(BufReader::new(source)).map_err(|e| ArchiveError::zip(&target, e))?;

        for index in 0..previous.len() {
            let entry = previous
                .by_index_raw(index)
                .map_err(|e| ArchiveError::zip(&target, e))?;
            let name = entry.name().to_string();
            if !self.names.insert(name) {
                continue;
            }
            self.zip
                .raw_copy_file(entry)
                .map_err(|e| ArchiveError::zip(&self.partial, e))?;
            self.carried += 1;
        }
        info!(entries = self.carried, "carried over existing archive entries");
        Ok(())
    }

    fn serve(mut self, mut receiver: mpsc::Receiver<Command>) {
        while let Some(command) = receiver.blocking_recv() {
            match command {
                Command::Append { name, spool, ack } => {
                    let result = self.append(&name, &spool);
                    remove_spool(&spool);
                    let _ = ack.send(result);
                }
                Command::Finish { ack } => {
                    let _ = ack.send(self.finish());
                    return;
                }
                Command::Abort { ack } => {
                    self.discard();
                    let _ = ack.send(());
                    return;
                }
            }
        }
        debug!(partial = %self.partial.display(), "container writer dropped; discarding");
        self.discard();
    }

    fn append(&mut self, name: &str, spool: &Path) -> Result<AppendOutcome, ArchiveError> {
        if let Some(reason) = &self.broken {
            return Err(ArchiveError::Corrupted {
                path: self.partial.clone(),
                reason: reason.clone(),
            });
        }
        if self.names.contains(name) {
            return Ok(AppendOutcome::AlreadyArchived);
        }

        let mut payload = File::open(spool).map_err(|source| ArchiveError::io(spool, source))?;
        let size = payload
            .metadata()
            .map_err(|source| ArchiveError::io(spool, source))?
            .len();
        let options = SimpleFileOptions::default()
            .compression_method(self.compression.method())
            .large_file(size > u64::from(u32::MAX));

        if let Err(source) = self.zip.start_file(name, options) {
            self.broken = Some(source.to_string());
            return Err(ArchiveError::zip(&self.partial, source));
        }
        if let Err(source) = std::io::copy(&mut payload, &mut self.zip) {
            self.broken = Some(source.to_string());
            return Err(ArchiveError::io(&self.partial, source));
        }

        self.names.insert(name.to_string());
        self.added += 1;
        debug!(name = %name, bytes = size, "archived entry");
        Ok(AppendOutcome::Added)
    }

    fn finish(self) -> Result<ContainerStats, ArchiveError> {
        if let Some(reason) = self.broken.clone() {
            let path = self.partial.clone();
            self.discard();
            return Err(ArchiveError::Corrupted { path, reason });
        }

        let Self {
            target,
            partial,
            zip,
            carried,
            added,
            ..
        } = self;
        let outcome = (|| {
            let buffered = zip
                .finish()
                .map_err(|source| ArchiveError::zip(&partial, source))?;
            let file = buffered
                .into_inner()
                .map_err(|error| ArchiveError::io(&partial, error.into_error()))?;
            file.sync_all()
                .map_err(|source| ArchiveError::io(&partial, source))?;
            drop(file);
            std::fs::rename(&partial, &target)
                .map_err(|source| ArchiveError::io(&target, source))
        })();

        if let Err(error) = outcome {
            let _ = std::fs::remove_file(&partial);
            return Err(error);
        }
        sync_parent_dir(&target);
        info!(target = %target.display(), carried, added, "archive container replaced");
        Ok(ContainerStats { carried, added })
    }

    fn discard(self) {
        let partial = self.partial.clone();
        drop(self.zip);
        if let Err(error) = std::fs::remove_file(&partial)
            && error.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %partial.display(), error = %error, "failed to remove partial container");
        }
    }
}

fn remove_spool(spool: &Path) {
    if let Err(error) = std::fs::remove_file(spool)
        && error.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %spool.display(), error = %error, "failed to remove spool file");
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return;
    };
    if let Err(error) = File::open(parent).and_then(|dir| dir.sync_all()) {
        debug!(path = %parent.display(), error = %error, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    fn spool(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(format!("{name}.part"));
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut bytes = Vec::new();
                entry.read_to_end(&mut bytes).unwrap();
                (entry.name().to_string(), bytes)
            })
            .collect()
    }

    #[test]
    fn test_partial_path_appends_suffix() {
        assert_eq!(
            partial_path(Path::new("/out/media_archive.zip")),
            PathBuf::from("/out/media_archive.zip.partial")
        );
    }

    #[tokio::test]
    async fn test_fresh_container_gets_new_entries() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.zip");
        let writer = ContainerWriter::create(&target, Compression::Stored).await.unwrap();
        assert_eq!(writer.carried(), 0);

        let outcome = writer.append("a.mp4", &spool(&dir, "a", b"AAAA")).await.unwrap();
        assert_eq!(outcome, AppendOutcome::Added);
        let stats = writer.finish().await.unwrap();

        assert_eq!(stats, ContainerStats { carried: 0, added: 1 });
        assert_eq!(read_entries(&target), vec![("a.mp4".to_string(), b"AAAA".to_vec())]);
        assert!(!partial_path(&target).exists());
        assert!(!dir.path().join("a.part").exists());
    }

    #[tokio::test]
    async fn test_existing_entries_are_carried_and_duplicates_discarded() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.zip");
        {
            let mut zip = ZipWriter::new(File::create(&target).unwrap());
            let options =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
            zip.start_file("a.mp4", options).unwrap();
            zip.write_all(&[7u8; 4096]).unwrap();
            zip.finish().unwrap();
        }

        let writer = ContainerWriter::create(&target, Compression::Stored).await.unwrap();
        assert_eq!(writer.carried(), 1);
        let dup = writer.append("a.mp4", &spool(&dir, "dup", b"new")).await.unwrap();
        assert_eq!(dup, AppendOutcome::AlreadyArchived);
        writer.append("b.avi", &spool(&dir, "b", b"BB")).await.unwrap();
        let stats = writer.finish().await.unwrap();

        assert_eq!(stats, ContainerStats { carried: 1, added: 1 });
        let entries = read_entries(&target);
        assert_eq!(entries[0], ("a.mp4".to_string(), vec![7u8; 4096]));
        assert_eq!(entries[1], ("b.avi".to_string(), b"BB".to_vec()));

        let mut archive = ZipArchive::new(File::open(&target).unwrap()).unwrap();
        let carried = archive.by_name("a.mp4").unwrap();
        assert_eq!(carried.compression(), zip::CompressionMethod::Deflated);
    }

    #[tokio::test]
    async fn test_dropping_writer_keeps_original() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.zip");
        let writer = ContainerWriter::create(&target, Compression::Stored).await.unwrap();
        writer.append("a.mp4", &spool(&dir, "a", b"A")).await.unwrap();
        writer.finish().await.unwrap();
        let original = std::fs::read(&target).unwrap();

        let writer = ContainerWriter::create(&target, Compression::Stored).await.unwrap();
        writer.append("b.mp4", &spool(&dir, "b", b"B")).await.unwrap();
        writer.abort().await;

        assert_eq!(std::fs::read(&target).unwrap(), original);
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn test_leftover_partial_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.zip");
        std::fs::write(partial_path(&target), b"garbage from a crashed run").unwrap();

        let writer = ContainerWriter::create(&target, Compression::Deflated).await.unwrap();
        writer.append("c.m4a", &spool(&dir, "c", b"CCC")).await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(read_entries(&target), vec![("c.m4a".to_string(), b"CCC".to_vec())]);
    }

    #[tokio::test]
    async fn test_corrupt_existing_container_is_not_replaced() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.zip");
        std::fs::write(&target, b"not a zip").unwrap();

        let result = ContainerWriter::create(&target, Compression::Stored).await;
        assert!(matches!(result, Err(ArchiveError::Zip { .. })));
        assert_eq!(std::fs::read(&target).unwrap(), b"not a zip");
        assert!(!partial_path(&target).exists());
    }

    #[tokio::test]
    async fn test_append_after_finish_fails() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.zip");
        let writer = ContainerWriter::create(&target, Compression::Stored).await.unwrap();
        writer.finish().await.unwrap();
        assert!(matches!(
            writer.append("late.mp4", &spool(&dir, "late", b"L")).await,
            Err(ArchiveError::WriterClosed)
        ));
    }

    #[tokio::test]
    async fn test_missing_spool_is_an_error_but_not_fatal() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("out.zip");
        let writer = ContainerWriter::create(&target, Compression::Stored).await.unwrap();

        let result = writer.append("x.mp4", &dir.path().join("missing.part")).await;
        assert!(matches!(result, Err(ArchiveError::Io { .. })));
        writer.append("y.mp4", &spool(&dir, "y", b"Y")).await.unwrap();
        assert_eq!(writer.finish().await.unwrap().added, 1);
    }
}
