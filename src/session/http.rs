//! reqwest-backed session.
//!
//! Each session owns a cookie jar, so challenge cookies set on the seed
//! navigation are attached to every later probe and retrieval of the same
//! session and never leak to another worker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, ClientBuilder};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};
use url::Url;

use super::{ByteStream, Document, Navigation, Session, SessionError, SessionFactory, TransferEvent};
use crate::auth::{CookieError, cookie_names, import_into_jar, parse_netscape_cookies};
use crate::constants::{CONNECT_TIMEOUT, READ_TIMEOUT};

/// Browser User-Agent sent by every session; the gated endpoint serves its
/// interstitials to browsers only.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Settings shared by every session a factory creates.
#[derive(Debug, Clone)]
pub struct HttpSessionConfig {
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Idle read timeout for retrieval streams.
    pub read_timeout: Duration,
    /// Minimum delay between two requests of one session.
    pub pace: Duration,
    /// Netscape cookie file re-imported by [`Session::refresh_credentials`].
    pub cookies_file: Option<PathBuf>,
}

impl Default for HttpSessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            pace: Duration::ZERO,
            cookies_file: None,
        }
    }
}

/// Enforces a minimum gap between consecutive requests.
#[derive(Debug)]
struct Pacer {
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Pacer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_request: Mutex::new(None),
        }
    }

    async fn acquire(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                let wait = self.delay - elapsed;
                trace!(wait_ms = wait.as_millis(), "pacing request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// A session driven by a cookie-aware HTTP client.
#[derive(Debug)]
pub struct HttpSession {
    label: String,
    client: Client,
    jar: Arc<Jar>,
    pacer: Pacer,
    cookies_file: Option<PathBuf>,
}

impl HttpSession {
    /// Creates a session with an empty cookie jar.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Build`] if the HTTP client cannot be built.
    pub fn new(label: impl Into<String>, config: &HttpSessionConfig) -> Result<Self, SessionError> {
        let jar = Arc::new(Jar::default());
        let client = build_client(Arc::clone(&jar), config)?;
        Ok(Self {
            label: label.into(),
            client,
            jar,
            pacer: Pacer::new(config.pace),
            cookies_file: config.cookies_file.clone(),
        })
    }

    /// Returns the session's cookie jar.
    #[must_use]
    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }
}

fn build_client(jar: Arc<Jar>, config: &HttpSessionConfig) -> Result<Client, SessionError> {
    ClientBuilder::new()
        .cookie_provider(jar)
        .user_agent(BROWSER_USER_AGENT)
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .gzip(true)
        .build()
        .map_err(|source| SessionError::Build { source })
}

#[async_trait]
impl Session for HttpSession {
    fn label(&self) -> &str {
        &self.label
    }

    #[instrument(level = "trace", skip(self), fields(session = %self.label))]
    async fn navigate(&self, url: &str, timeout: Duration) -> Navigation {
        if Url::parse(url).is_err() {
            return Navigation::failed(SessionError::invalid_url(url));
        }
        self.pacer.acquire().await;

        let deadline = Instant::now() + timeout;
        let response = match tokio::time::timeout_at(deadline, self.client.get(url).send()).await {
            Err(_) => return Navigation::failed(SessionError::timeout(url)),
            Ok(Err(source)) => return Navigation::failed(SessionError::from_reqwest(url, source)),
            Ok(Ok(response)) => response,
        };

        let final_url = response.url().to_string();
        let status = response.status();
        if let Some(event) = detect_transfer(&final_url, response.headers()) {
            debug!(url = %final_url, content_type = ?event.content_type, "navigation started a transfer");
            return Navigation::transfer(event);
        }

        if status.is_success()
            && let Some(body) = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .and_then(|content_type| media_viewer_page(&final_url, content_type))
        {
            debug!(url = %final_url, "navigation opened inline media");
            return Navigation::document(Document {
                url: final_url,
                status: status.as_u16(),
                body,
            });
        }

        if !status.is_success() {
            return Navigation::document(Document {
                url: final_url,
                status: status.as_u16(),
                body: String::new(),
            });
        }

        match tokio::time::timeout_at(deadline, response.text()).await {
            Err(_) => Navigation::failed(SessionError::timeout(url)),
            Ok(Err(source)) => Navigation::failed(SessionError::from_reqwest(url, source)),
            Ok(Ok(body)) => Navigation::document(Document {
                url: final_url,
                status: status.as_u16(),
                body,
            }),
        }
    }

    fn cookie_names(&self, url: &str) -> Vec<String> {
        match Url::parse(url) {
            Ok(url) => cookie_names(self.jar.as_ref(), &url),
            Err(_) => Vec::new(),
        }
    }

    async fn refresh_credentials(&self) -> Result<usize, SessionError> {
        let Some(path) = &self.cookies_file else {
            return Ok(0);
        };
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SessionError::Cookies {
                source: CookieError::Io {
                    path: path.clone(),
                    source,
                },
            })?;
        let cookies = parse_netscape_cookies(std::io::Cursor::new(text), path)
            .map_err(|source| SessionError::Cookies { source })?;
        let imported = import_into_jar(&self.jar, &cookies);
        debug!(session = %self.label, imported, "re-imported clearance cookies");
        Ok(imported)
    }

    #[instrument(level = "debug", skip(self), fields(session = %self.label))]
    async fn open_stream(&self, url: &str) -> Result<ByteStream, SessionError> {
        if Url::parse(url).is_err() {
            return Err(SessionError::invalid_url(url));
        }
        self.pacer.acquire().await;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| SessionError::from_reqwest(url, source))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::http_status(url, status.as_u16()));
        }

        let owned_url = url.to_string();
        let stream = response.bytes_stream().map(move |chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|source| SessionError::from_reqwest(owned_url.clone(), source))
        });
        Ok(Box::pin(stream))
    }
}

/// Builds independent [`HttpSession`]s.
#[derive(Debug, Clone, Default)]
pub struct HttpSessionFactory {
    config: HttpSessionConfig,
}

impl HttpSessionFactory {
    /// Creates a factory handing `config` to every session.
    #[must_use]
    pub fn new(config: HttpSessionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn create(&self, label: &str) -> Result<Arc<dyn Session>, SessionError> {
        Ok(Arc::new(HttpSession::new(label, &self.config)?))
    }
}

/// Decides from response headers whether the server forced a file transfer.
fn detect_transfer(url: &str, headers: &HeaderMap) -> Option<TransferEvent> {
    let disposition = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|value| value.to_str().ok());
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    let attachment = disposition.is_some_and(|value| {
        value
            .split(';')
            .next()
            .is_some_and(|kind| kind.trim().eq_ignore_ascii_case("attachment"))
    });
    let forced = content_type
        .is_some_and(|value| is_binary_content_type(value) && !is_inline_media(value));
    if !attachment && !forced {
        return None;
    }

    Some(TransferEvent {
        url: url.to_string(),
        content_type: content_type.map(ToString::to_string),
        suggested_filename: disposition.and_then(disposition_filename),
    })
}

/// Media types a browser plays in place instead of downloading.
const INLINE_MEDIA_TYPES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/ogg",
    "video/x-m4v",
    "audio/mpeg",
    "audio/mp4",
    "audio/x-m4a",
    "audio/aac",
    "audio/ogg",
    "audio/wav",
    "audio/x-wav",
    "audio/webm",
    "audio/flac",
];

fn content_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_binary_content_type(content_type: &str) -> bool {
    let essence = content_essence(content_type);
    if essence.is_empty() || essence.starts_with("text/") {
        return false;
    }
    !["html", "xml", "json", "javascript"]
        .iter()
        .any(|textual| essence.contains(textual))
}

fn is_inline_media(content_type: &str) -> bool {
    INLINE_MEDIA_TYPES.contains(&content_essence(content_type).as_str())
}

/// The player page a browser wraps around inline media, so the media
/// element is visible to marker checks without downloading the body.
fn media_viewer_page(url: &str, content_type: &str) -> Option<String> {
    is_inline_media(content_type).then(|| {
        format!(
            "<html><body><video controls autoplay name=\"media\"><source src=\"{url}\" type=\"{}\"></video></body></html>",
            content_essence(content_type)
        )
    })
}

fn disposition_filename(disposition: &str) -> Option<String> {
    disposition.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then(|| value.to_string())
    })
}
