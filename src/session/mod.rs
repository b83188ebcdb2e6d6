//! Browsing sessions against the gated endpoint.
//!
//! A [`Session`] is the unit that holds gate state: its cookies, pacing and
//! connection pool belong to one worker (or to every worker in shared mode).
//! The trait reports navigations the way a browser page would: a file
//! transfer may start instead of, or before, a document loading.

mod error;
mod http;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

pub use error::SessionError;
pub use http::{BROWSER_USER_AGENT, HttpSession, HttpSessionConfig, HttpSessionFactory};

/// Incremental payload bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, SessionError>> + Send>>;

/// A forced binary transfer observed during navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    /// URL whose response started the transfer.
    pub url: String,
    /// Declared content type, if any.
    pub content_type: Option<String>,
    /// Filename from `Content-Disposition`, if any.
    pub suggested_filename: Option<String>,
}

/// A loaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Final URL after redirects.
    pub url: String,
    /// Response status code.
    pub status: u16,
    /// Response body text (empty for error statuses).
    pub body: String,
}

impl Document {
    /// Returns true if this is a successful page containing `marker`
    /// (ASCII case-insensitive). An empty marker never matches.
    #[must_use]
    pub fn contains_marker(&self, marker: &str) -> bool {
        if marker.is_empty() || !(200..300).contains(&self.status) {
            return false;
        }
        self.body
            .to_ascii_lowercase()
            .contains(&marker.to_ascii_lowercase())
    }
}

/// Result of one navigation.
#[derive(Debug)]
pub struct Navigation {
    /// Transfer event, if the server forced one.
    pub transfer: Option<TransferEvent>,
    /// The loaded document, or why none loaded.
    pub document: Result<Document, SessionError>,
}

impl Navigation {
    /// Navigation that became a file transfer.
    #[must_use]
    pub fn transfer(event: TransferEvent) -> Self {
        let url = event.url.clone();
        Self {
            transfer: Some(event),
            document: Err(SessionError::transfer_started(url)),
        }
    }

    /// Navigation that loaded a document.
    #[must_use]
    pub fn document(document: Document) -> Self {
        Self {
            transfer: None,
            document: Ok(document),
        }
    }

    /// Navigation that failed without a transfer.
    #[must_use]
    pub fn failed(error: SessionError) -> Self {
        Self {
            transfer: None,
            document: Err(error),
        }
    }

    /// Returns true if the loaded document contains `marker`.
    #[must_use]
    pub fn has_marker(&self, marker: &str) -> bool {
        self.document
            .as_ref()
            .is_ok_and(|document| document.contains_marker(marker))
    }
}

/// One browsing session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Short name used in logs (e.g. `worker-3`).
    fn label(&self) -> &str;

    /// Navigates to `url`, waiting at most `timeout`.
    ///
    /// Never fails as a call: timeouts and network errors are reported in
    /// [`Navigation::document`].
    async fn navigate(&self, url: &str, timeout: Duration) -> Navigation;

    /// Names of the cookies this session would send to `url`.
    fn cookie_names(&self, url: &str) -> Vec<String>;

    /// Re-imports externally supplied credentials, returning how many
    /// cookies were loaded. Sessions without such a source return `Ok(0)`.
    async fn refresh_credentials(&self) -> Result<usize, SessionError>;

    /// Opens an authenticated byte stream for `url`.
    async fn open_stream(&self, url: &str) -> Result<ByteStream, SessionError>;
}

/// Creates sessions for workers.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Creates a fresh session with its own credentials.
    async fn create(&self, label: &str) -> Result<Arc<dyn Session>, SessionError>;
}
