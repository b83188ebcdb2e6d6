//! Retrieval mode: fetch recorded resources into one resumable ZIP container.
//!
//! A run rebuilds the container as `<archive>.partial`: entries of the
//! previous container are copied over raw (no re-fetch, no recompression),
//! newly retrieved payloads are appended by a single writer, and the partial
//! file replaces the original only after it is complete and fsynced.

mod assembler;
mod manifest;
mod retrieve;
mod writer;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

pub use assembler::{ArchiveAssembler, ArchiveHandler, ArchiveSink, AssemblySummary, PendingEntry};
pub use manifest::ArchiveManifest;
pub use retrieve::{PayloadRetriever, SpooledPayload, resolve_media_source};
pub use writer::{AppendOutcome, ContainerStats, ContainerWriter, partial_path};

use crate::probe::Classification;
use crate::scheduler::SchedulerError;
use crate::session::SessionError;

/// Errors raised while assembling the container.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Filesystem failure.
    #[error("archive IO error on {path}: {source}")]
    Io {
        /// Affected path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The ZIP layer rejected a read or write.
    #[error("zip error on {path}: {source}")]
    Zip {
        /// Container path.
        path: PathBuf,
        /// Underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// Fetching the payload failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The wrapper page exposed no media source.
    #[error("no media source found on wrapper page {url}")]
    MissingSource {
        /// Wrapper page URL.
        url: String,
    },

    /// The transfer completed without any bytes.
    #[error("empty payload from {url}")]
    EmptyPayload {
        /// Source URL.
        url: String,
    },

    /// No usable entry name can be derived from the URL.
    #[error("cannot derive an entry name from {url}")]
    InvalidEntryName {
        /// Offending URL.
        url: String,
    },

    /// A previous write left the container unusable.
    #[error("container {path} is unusable after a failed write: {reason}")]
    Corrupted {
        /// Partial container path.
        path: PathBuf,
        /// First failure.
        reason: String,
    },

    /// The writer thread is gone.
    #[error("container writer is no longer running")]
    WriterClosed,

    /// The worker pool could not start.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl ArchiveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn zip(path: impl Into<PathBuf>, source: zip::result::ZipError) -> Self {
        Self::Zip {
            path: path.into(),
            source,
        }
    }
}

/// Compression applied to newly added entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Store bytes as is; media payloads are already compressed.
    #[default]
    Stored,
    /// Deflate.
    Deflated,
}

impl Compression {
    pub(crate) fn method(self) -> zip::CompressionMethod {
        match self {
            Self::Stored => zip::CompressionMethod::Stored,
            Self::Deflated => zip::CompressionMethod::Deflated,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stored => write!(f, "stored"),
            Self::Deflated => write!(f, "deflated"),
        }
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stored" | "store" | "none" => Ok(Self::Stored),
            "deflated" | "deflate" => Ok(Self::Deflated),
            other => Err(format!(
                "unknown compression '{other}' (expected stored or deflated)"
            )),
        }
    }
}

/// Container entry name for a resource URL: its last path segment, as
/// written in the URL, without query or fragment.
#[must_use]
pub fn entry_name_for_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = match path.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("", |slash| &rest[slash..]),
        None => path,
    };
    let name = path.rsplit('/').next().unwrap_or_default();
    (!name.is_empty() && name != "." && name != "..").then(|| name.to_string())
}

/// Retrieval strategy for a recorded URL: direct when its name ends with
/// one of `direct_extensions`, otherwise through the player page.
#[must_use]
pub fn classify_stored_url<S: AsRef<str>>(url: &str, direct_extensions: &[S]) -> Classification {
    let name = entry_name_for_url(url)
        .unwrap_or_default()
        .to_ascii_lowercase();
    let direct = direct_extensions.iter().any(|extension| {
        let extension = extension.as_ref().trim().to_ascii_lowercase();
        !extension.is_empty() && name.ends_with(&extension)
    });
    if direct {
        Classification::DirectDownload
    } else {
        Classification::EmbeddedStream
    }
}
