//! Candidate probing and classification.
//!
//! For one identifier, extension candidates are tried in priority order on a
//! cleared session. A forced file transfer means the resource downloads
//! directly; a page showing the media marker means it is wrapped in a
//! player; anything else (including timeouts and errors) means absent.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use tracing::{debug, trace, warn};

use crate::input::CandidateIdentifier;
use crate::session::{Navigation, Session};

/// How a candidate URL was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// No resource behind the URL.
    Absent,
    /// The server forces a binary transfer.
    DirectDownload,
    /// A page exposes the media through a playable element.
    EmbeddedStream,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::DirectDownload => write!(f, "direct-download"),
            Self::EmbeddedStream => write!(f, "embedded-stream"),
        }
    }
}

/// A filename suffix hypothesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionCandidate {
    /// Suffix including the leading dot.
    pub suffix: String,
    /// Position in the probe order (0 first).
    pub priority: usize,
}

impl ExtensionCandidate {
    /// Builds an ordered candidate list, adding a leading dot where missing
    /// and dropping blanks and repeats.
    #[must_use]
    pub fn ordered<S: AsRef<str>>(suffixes: &[S]) -> Vec<Self> {
        let mut seen: Vec<String> = Vec::new();
        for suffix in suffixes {
            let suffix = suffix.as_ref().trim();
            if suffix.is_empty() {
                continue;
            }
            let suffix = if suffix.starts_with('.') {
                suffix.to_string()
            } else {
                format!(".{suffix}")
            };
            if !seen.contains(&suffix) {
                seen.push(suffix);
            }
        }
        seen.into_iter()
            .enumerate()
            .map(|(priority, suffix)| Self { suffix, priority })
            .collect()
    }
}

/// Outcome of one (identifier, extension) probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Probed URL.
    pub url: String,
    /// Classification of that URL.
    pub classification: Classification,
}

/// Whether probing stops at the first hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMode {
    /// Stop at the first non-absent candidate.
    #[default]
    FirstMatch,
    /// Try every candidate and keep every hit.
    Exhaustive,
}

impl FromStr for ProbeMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "first-match" | "first" => Ok(Self::FirstMatch),
            "exhaustive" | "all" => Ok(Self::Exhaustive),
            other => Err(format!(
                "unknown probe mode '{other}' (expected first-match or exhaustive)"
            )),
        }
    }
}

/// A confirmed resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedResource {
    /// Resource URL.
    pub url: String,
    /// Never [`Classification::Absent`].
    pub classification: Classification,
    /// Logical discovery timestamp, increasing across the run.
    pub sequence: u64,
}

/// Probes identifiers on a session.
#[derive(Debug)]
pub struct CandidateProber {
    extensions: Vec<ExtensionCandidate>,
    media_marker: String,
    timeout: Duration,
    mode: ProbeMode,
    clock: AtomicU64,
}

impl CandidateProber {
    /// Creates a prober.
    #[must_use]
    pub fn new(
        extensions: Vec<ExtensionCandidate>,
        media_marker: impl Into<String>,
        timeout: Duration,
        mode: ProbeMode,
    ) -> Self {
        Self {
            extensions,
            media_marker: media_marker.into(),
            timeout,
            mode,
            clock: AtomicU64::new(0),
        }
    }

    /// Returns the candidate list.
    #[must_use]
    pub fn extensions(&self) -> &[ExtensionCandidate] {
        &self.extensions
    }

    /// Returns the probe mode.
    #[must_use]
    pub fn mode(&self) -> ProbeMode {
        self.mode
    }

    /// Candidate URLs for `identifier` in probe order.
    #[must_use]
    pub fn candidate_urls(&self, identifier: &CandidateIdentifier) -> Vec<String> {
        self.extensions
            .iter()
            .map(|extension| identifier.candidate_url(&extension.suffix))
            .collect()
    }

    /// Classifies a completed navigation.
    #[must_use]
    pub fn classify(&self, navigation: &Navigation) -> Classification {
        if navigation.transfer.is_some() {
            Classification::DirectDownload
        } else if navigation.has_marker(&self.media_marker) {
            Classification::EmbeddedStream
        } else {
            Classification::Absent
        }
    }

    /// Probes one URL. Never fails: errors and panics classify as absent.
    pub async fn probe_candidate(&self, session: &dyn Session, url: &str) -> ProbeResult {
        let outcome = AssertUnwindSafe(session.navigate(url, self.timeout))
            .catch_unwind()
            .await;
        let classification = match outcome {
            Ok(navigation) => {
                if let Err(error) = &navigation.document
                    && navigation.transfer.is_none()
                {
                    trace!(url = %url, error = %error, "navigation failed");
                }
                self.classify(&navigation)
            }
            Err(_) => {
                warn!(url = %url, session = %session.label(), "probe panicked; treating as absent");
                Classification::Absent
            }
        };
        debug!(url = %url, classification = %classification, "probed candidate");
        ProbeResult {
            url: url.to_string(),
            classification,
        }
    }

    /// Probes `identifier` against every candidate in priority order.
    ///
    /// In first-match mode the result holds at most one resource.
    pub async fn probe(
        &self,
        session: &dyn Session,
        identifier: &CandidateIdentifier,
    ) -> Vec<ValidatedResource> {
        self.probe_urls(session, self.candidate_urls(identifier)).await
    }

    /// Probes an explicit URL list in order, honoring the probe mode.
    pub async fn probe_urls(
        &self,
        session: &dyn Session,
        urls: impl IntoIterator<Item = String>,
    ) -> Vec<ValidatedResource> {
        let mut found = Vec::new();
        for url in urls {
            let result = self.probe_candidate(session, &url).await;
            if result.classification == Classification::Absent {
                continue;
            }
            found.push(ValidatedResource {
                url: result.url,
                classification: result.classification,
                sequence: self.clock.fetch_add(1, Ordering::Relaxed),
            });
            if self.mode == ProbeMode::FirstMatch {
                break;
            }
        }
        found
    }
}
