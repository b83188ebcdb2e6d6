//! Deterministic in-process sessions for scheduler and archive tests.
//!
//! A [`Catalog`] describes what the fake endpoint serves. Every session
//! created by [`MockSessionFactory`] shares the catalog and appends each
//! navigation and stream to one visit log, so tests can assert which session touched
//! which URL.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mediaprobe_core::session::{ByteStream, Document, Navigation, TransferEvent};
use mediaprobe_core::{Session, SessionError, SessionFactory};

/// Cookie every unblocked mock session carries.
pub const CLEARANCE_COOKIE: &str = "__cf_bm";

#[derive(Debug, Clone)]
enum Page {
    Transfer,
    Player(String),
}

/// What the fake endpoint serves.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    seed: String,
    pages: HashMap<String, Page>,
    payloads: HashMap<String, Vec<u8>>,
}

impl Catalog {
    pub fn new(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            ..Self::default()
        }
    }

    /// A resource whose navigation starts a transfer of `bytes`.
    pub fn with_direct(mut self, url: &str, bytes: &[u8]) -> Self {
        self.pages.insert(url.to_string(), Page::Transfer);
        self.payloads.insert(url.to_string(), bytes.to_vec());
        self
    }

    /// A player page at `url` whose `<video>` points at `media_url`.
    pub fn with_embedded(mut self, url: &str, media_url: &str, bytes: &[u8]) -> Self {
        let html = format!(
            "<html><body><video controls><source src=\"{media_url}\" type=\"video/mp4\"></video></body></html>"
        );
        self.pages.insert(url.to_string(), Page::Player(html));
        self.payloads.insert(media_url.to_string(), bytes.to_vec());
        self
    }

    /// A resource that probes as present but whose bytes cannot be fetched.
    pub fn with_broken_direct(mut self, url: &str) -> Self {
        self.pages.insert(url.to_string(), Page::Transfer);
        self
    }
}

/// One navigation or stream opened by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visit {
    pub session: String,
    pub url: String,
}

pub struct MockSession {
    label: String,
    catalog: Arc<Catalog>,
    visits: Arc<Mutex<Vec<Visit>>>,
    blocked: bool,
}

impl MockSession {
    fn record(&self, url: &str) {
        self.visits.lock().unwrap().push(Visit {
            session: self.label.clone(),
            url: url.to_string(),
        });
    }
}

#[async_trait]
impl Session for MockSession {
    fn label(&self) -> &str {
        &self.label
    }

    async fn navigate(&self, url: &str, _timeout: Duration) -> Navigation {
        self.record(url);
        tokio::task::yield_now().await;

        if url == self.catalog.seed {
            return Navigation::document(Document {
                url: url.to_string(),
                status: 200,
                body: "<video src=\"seed.mp4\"></video>".to_string(),
            });
        }
        match self.catalog.pages.get(url) {
            Some(Page::Transfer) => Navigation::transfer(TransferEvent {
                url: url.to_string(),
                content_type: Some("video/x-msvideo".to_string()),
                suggested_filename: None,
            }),
            Some(Page::Player(html)) => Navigation::document(Document {
                url: url.to_string(),
                status: 200,
                body: html.clone(),
            }),
            None => Navigation::document(Document {
                url: url.to_string(),
                status: 404,
                body: String::new(),
            }),
        }
    }

    fn cookie_names(&self, _url: &str) -> Vec<String> {
        if self.blocked {
            Vec::new()
        } else {
            vec![CLEARANCE_COOKIE.to_string()]
        }
    }

    async fn refresh_credentials(&self) -> Result<usize, SessionError> {
        Ok(0)
    }

    async fn open_stream(&self, url: &str) -> Result<ByteStream, SessionError> {
        self.record(url);
        let Some(bytes) = self.catalog.payloads.get(url) else {
            return Err(SessionError::http_status(url, 404));
        };
        let chunks: Vec<Result<Vec<u8>, SessionError>> = bytes
            .chunks(7)
            .map(|chunk| Ok(chunk.to_vec()))
            .collect();
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

pub struct MockSessionFactory {
    catalog: Arc<Catalog>,
    visits: Arc<Mutex<Vec<Visit>>>,
    created: AtomicUsize,
    blocked: HashSet<String>,
}

impl MockSessionFactory {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
            visits: Arc::new(Mutex::new(Vec::new())),
            created: AtomicUsize::new(0),
            blocked: HashSet::new(),
        }
    }

    /// Sessions with this label never receive the clearance cookie.
    pub fn block(mut self, label: &str) -> Self {
        self.blocked.insert(label.to_string());
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn visits(&self) -> Vec<Visit> {
        self.visits.lock().unwrap().clone()
    }

    /// Navigations and streams of `url` by any session.
    pub fn visits_to(&self, url: &str) -> Vec<Visit> {
        self.visits()
            .into_iter()
            .filter(|visit| visit.url == url)
            .collect()
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn create(&self, label: &str) -> Result<Arc<dyn Session>, SessionError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockSession {
            label: label.to_string(),
            catalog: Arc::clone(&self.catalog),
            visits: Arc::clone(&self.visits),
            blocked: self.blocked.contains(label),
        }))
    }
}
