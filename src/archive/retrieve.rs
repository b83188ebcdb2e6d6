//! Payload retrieval through a cleared session.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use regex::Regex;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::ArchiveError;
use crate::probe::{Classification, ValidatedResource};
use crate::session::Session;

fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

static VIDEO_ELEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"(?is)<video\b([^>]*)>(?:(.*?)</video>)?"));

static SOURCE_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)<source\b[^>]*?\bsrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
});

static SRC_ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)(?:^|\s)src\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
});

/// Finds the media URL behind a player page: the first `<source src>` of
/// the first `<video>`, else that video's own `src`, resolved against
/// `page_url`.
#[must_use]
pub fn resolve_media_source(html: &str, page_url: &str) -> Option<String> {
    let video = VIDEO_ELEMENT_RE.captures(html)?;
    let from_source = video
        .get(2)
        .and_then(|inner| SOURCE_SRC_RE.captures(inner.as_str()))
        .and_then(|captures| first_group(&captures));
    let raw = from_source.or_else(|| {
        video
            .get(1)
            .and_then(|attrs| SRC_ATTR_RE.captures(attrs.as_str()))
            .and_then(|captures| first_group(&captures))
    })?;

    let raw = raw.trim().replace("&amp;", "&");
    if raw.is_empty() || raw.starts_with("blob:") {
        return None;
    }
    match Url::parse(page_url) {
        Ok(base) => base.join(&raw).ok().map(String::from),
        Err(_) => Url::parse(&raw).ok().map(String::from),
    }
}

fn first_group(captures: &regex::Captures<'_>) -> Option<String> {
    (1..=3)
        .find_map(|group| captures.get(group))
        .map(|value| value.as_str().to_string())
}

/// A payload streamed to disk, waiting for the container writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpooledPayload {
    /// Spool file path.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
    /// URL the bytes came from.
    pub source_url: String,
}

/// Fetches payload bytes into spool files.
#[derive(Debug)]
pub struct PayloadRetriever {
    spool_dir: PathBuf,
    wrapper_timeout: Duration,
    counter: AtomicU64,
}

impl PayloadRetriever {
    /// Creates a retriever spooling into `spool_dir`.
    #[must_use]
    pub fn new(spool_dir: impl Into<PathBuf>, wrapper_timeout: Duration) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            wrapper_timeout,
            counter: AtomicU64::new(0),
        }
    }

    /// Returns the spool directory.
    #[must_use]
    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    /// Resolves the byte source for `resource` and streams it to a spool file.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::MissingSource`] when a player page has no
    /// media element, [`ArchiveError::EmptyPayload`] for a zero-byte
    /// transfer, and session or IO errors otherwise. No spool file is left
    /// behind on error.
    #[instrument(level = "debug", skip(self, session, resource), fields(url = %resource.url))]
    pub async fn fetch(
        &self,
        session: &dyn Session,
        resource: &ValidatedResource,
        name: &str,
    ) -> Result<SpooledPayload, ArchiveError> {
        let source_url = self.source_url(session, resource).await?;
        let spool = self.spool_path(name);
        match self.stream_to_spool(session, &source_url, &spool).await {
            Ok(0) => {
                remove_quietly(&spool).await;
                Err(ArchiveError::EmptyPayload { url: source_url })
            }
            Ok(bytes) => {
                debug!(url = %source_url, bytes, "payload spooled");
                Ok(SpooledPayload {
                    path: spool,
                    bytes,
                    source_url,
                })
            }
            Err(error) => {
                remove_quietly(&spool).await;
                Err(error)
            }
        }
    }

    async fn source_url(
        &self,
        session: &dyn Session,
        resource: &ValidatedResource,
    ) -> Result<String, ArchiveError> {
        match resource.classification {
            Classification::DirectDownload | Classification::Absent => Ok(resource.url.clone()),
            Classification::EmbeddedStream => {
                let navigation = session.navigate(&resource.url, self.wrapper_timeout).await;
                if let Some(transfer) = navigation.transfer {
                    debug!(url = %transfer.url, "player page served the payload directly");
                    return Ok(transfer.url);
                }
                let document = navigation.document?;
                resolve_media_source(&document.body, &document.url).ok_or_else(|| {
                    ArchiveError::MissingSource {
                        url: resource.url.clone(),
                    }
                })
            }
        }
    }

    async fn stream_to_spool(
        &self,
        session: &dyn Session,
        url: &str,
        spool: &Path,
    ) -> Result<u64, ArchiveError> {
        tokio::fs::create_dir_all(&self.spool_dir)
            .await
            .map_err(|source| ArchiveError::io(&self.spool_dir, source))?;
        let mut stream = session.open_stream(url).await?;
        let file = File::create(spool)
            .await
            .map_err(|source| ArchiveError::io(spool, source))?;
        let mut writer = BufWriter::new(file);

        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|source| ArchiveError::io(spool, source))?;
            written += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|source| ArchiveError::io(spool, source))?;
        Ok(written)
    }

    fn spool_path(&self, name: &str) -> PathBuf {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.spool_dir.join(format!("{sequence:06}-{safe}.part"))
    }
}

async fn remove_quietly(path: &Path) {
    let _ = tokio::fs::remove_file(path).await;
}
