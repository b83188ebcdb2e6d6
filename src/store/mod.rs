//! Append-only, deduplicated record of validated resource URLs.
//!
//! The store file is the crash-recovery boundary of discovery: once
//! [`OutputStore::append`] returns `Ok(true)` the URL is on disk (written,
//! flushed and fsynced) and a later run will not probe it again.
//!
//! All writes go through one writer task fed by a channel, so concurrent
//! workers never interleave partial lines. Membership is checked by the
//! writer itself right before writing, which keeps check-then-append atomic.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const WRITE_QUEUE_DEPTH: usize = 64;

/// Errors raised by the output store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the store file failed.
    #[error("store IO error on {path}: {source}")]
    Io {
        /// Store file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The URL cannot be stored as a single line.
    #[error("refusing to store invalid entry {url:?}")]
    InvalidEntry {
        /// Offending value.
        url: String,
    },

    /// The writer task has stopped.
    #[error("store writer is no longer running")]
    WriterClosed,
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    order: Vec<String>,
    members: HashSet<String>,
}

impl StoreState {
    fn from_urls(urls: Vec<String>) -> Self {
        let members = urls.iter().cloned().collect();
        Self {
            order: urls,
            members,
        }
    }
}

#[derive(Debug)]
struct WriteRequest {
    url: String,
    ack: oneshot::Sender<Result<bool, StoreError>>,
}

/// Handle to an open store. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct OutputStore {
    path: PathBuf,
    state: Arc<RwLock<StoreState>>,
    sender: RwLock<Option<mpsc::Sender<WriteRequest>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl OutputStore {
    /// Reads the URLs recorded by previous runs, in file order.
    ///
    /// A missing file is an empty store. Blank lines and repeats are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read.
    pub async fn load(path: &Path) -> Result<Vec<String>, StoreError> {
        Ok(read_store_file(path).await?.0)
    }

    /// Opens (creating if needed) the store and starts its writer task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read or opened for append.
    #[instrument(level = "debug", fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let (urls, missing_newline) = read_store_file(path).await?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::io(path, source))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|source| StoreError::io(path, source))?;

        info!(path = %path.display(), entries = urls.len(), "opened output store");
        let state = Arc::new(RwLock::new(StoreState::from_urls(urls)));
        let (sender, receiver) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let writer = StoreWriter {
            path: path.to_path_buf(),
            file,
            state: Arc::clone(&state),
            missing_newline,
        };
        let handle = tokio::spawn(writer.run(receiver));

        Ok(Self {
            path: path.to_path_buf(),
            state,
            sender: RwLock::new(Some(sender)),
            writer: Mutex::new(Some(handle)),
        })
    }

    /// Returns the store file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if `url` is already recorded.
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.read_state().members.contains(url.trim())
    }

    /// Number of recorded URLs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_state().order.len()
    }

    /// Returns true when nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of recorded URLs in append order.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.read_state().order.clone()
    }

    /// Durably appends `url` unless it is already present.
    ///
    /// Returns `Ok(true)` when a line was written, `Ok(false)` for a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidEntry`] for blank or multi-line values,
    /// [`StoreError::Io`] if the write or fsync fails, and
    /// [`StoreError::WriterClosed`] after [`close`](Self::close).
    pub async fn append(&self, url: &str) -> Result<bool, StoreError> {
        let url = url.trim();
        if url.is_empty() || url.contains(['\n', '\r']) {
            return Err(StoreError::InvalidEntry {
                url: url.to_string(),
            });
        }
        let sender = self
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StoreError::WriterClosed)?;
        let (ack, response) = oneshot::channel();
        sender
            .send(WriteRequest {
                url: url.to_string(),
                ack,
            })
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        response.await.map_err(|_| StoreError::WriterClosed)?
    }

    /// Stops the writer after draining queued appends.
    ///
    /// Later appends fail with [`StoreError::WriterClosed`].
    pub async fn close(&self) {
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let handle = self.writer.lock().await.take();
        if let Some(handle) = handle
            && let Err(error) = handle.await
        {
            warn!(error = %error, "store writer task failed");
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

struct StoreWriter {
    path: PathBuf,
    file: File,
    state: Arc<RwLock<StoreState>>,
    missing_newline: bool,
}

impl StoreWriter {
    async fn run(mut self, mut receiver: mpsc::Receiver<WriteRequest>) {
        while let Some(request) = receiver.recv().await {
            let result = self.write(&request.url).await;
            if let Err(error) = &result {
                warn!(url = %request.url, error = %error, "store append failed");
            }
            let _ = request.ack.send(result);
        }
        debug!(path = %self.path.display(), "store writer stopped");
    }

    async fn write(&mut self, url: &str) -> Result<bool, StoreError> {
        if self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .members
            .contains(url)
        {
            return Ok(false);
        }

        let mut line = String::with_capacity(url.len() + 2);
        if self.missing_newline {
            line.push('\n');
        }
        line.push_str(url);
        line.push('\n');

        if let Err(source) = self.write_durable(line.as_bytes()).await {
            // Part of the line may have reached the file.
            self.missing_newline = true;
            return Err(StoreError::io(&self.path, source));
        }
        self.missing_newline = false;

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.members.insert(url.to_string());
        state.order.push(url.to_string());
        debug!(url = %url, "recorded resource");
        Ok(true)
    }

    async fn write_durable(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes).await?;
        self.file.flush().await?;
        self.file.sync_data().await
    }
}

/// Returns the deduplicated URLs and whether the file lacks a final newline.
async fn read_store_file(path: &Path) -> Result<(Vec<String>, bool), StoreError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(source) => return Err(StoreError::io(path, source)),
    };
    let mut seen = HashSet::new();
    let urls = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .map(ToString::to_string)
        .collect();
    Ok((urls, !text.is_empty() && !text.ends_with('\n')))
}
