//! Error types for browsing sessions.

use thiserror::Error;

use crate::auth::CookieError;

/// Errors surfaced by a [`Session`](super::Session).
///
/// During probing most of these are expected outcomes and get folded into
/// an absent classification. During retrieval they are reported and the
/// item is left for a later run.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The request did not complete within its timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// Requested URL.
        url: String,
    },

    /// Connection, TLS or protocol failure.
    #[error("network error requesting {url}: {source}")]
    Network {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Status code.
        status: u16,
    },

    /// The URL could not be parsed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The offending input.
        url: String,
    },

    /// Navigation ended because the server forced a file transfer.
    #[error("navigation to {url} turned into a file transfer")]
    TransferStarted {
        /// Requested URL.
        url: String,
    },

    /// Importing the clearance cookie file failed.
    #[error("cookie import failed: {source}")]
    Cookies {
        /// Underlying parse or IO error.
        #[source]
        source: CookieError,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Build {
        /// Underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl SessionError {
    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a transfer-started error.
    pub fn transfer_started(url: impl Into<String>) -> Self {
        Self::TransferStarted { url: url.into() }
    }

    /// Maps a client error, keeping timeouts distinguishable.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network { url, source }
        }
    }

    /// Returns true for timeouts.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
