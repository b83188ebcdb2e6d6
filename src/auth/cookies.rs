//! Netscape cookie file import for handing gate clearance to a session.
//!
//! An operator who solved the challenge/consent interstitial in a real
//! browser exports its cookies (7 TAB-separated fields per line). The
//! session re-imports that file while it waits for the gate, so the
//! clearance cookies end up in the same jar the session sends requests with.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use reqwest::cookie::{CookieStore, Jar};
use tracing::{debug, instrument, warn};
use url::Url;

/// A single cookie from a Netscape-format cookie file.
///
/// The value is redacted in `Debug` output; clearance tokens are credentials.
#[derive(Clone)]
pub struct CookieLine {
    /// Cookie domain (e.g. `.example.com`).
    pub domain: String,
    /// Whether subdomains match.
    pub tailmatch: bool,
    /// URL path scope.
    pub path: String,
    /// HTTPS only.
    pub secure: bool,
    /// Unix expiry timestamp (0 = session cookie).
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    value: String,
}

impl CookieLine {
    /// Creates a cookie entry.
    #[must_use]
    pub fn new(
        domain: impl Into<String>,
        path: impl Into<String>,
        secure: bool,
        expires: u64,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let domain = domain.into();
        Self {
            tailmatch: domain.starts_with('.'),
            domain,
            path: path.into(),
            secure,
            expires,
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns the cookie value. Never log it.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for CookieLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieLine")
            .field("domain", &self.domain)
            .field("tailmatch", &self.tailmatch)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Errors raised while importing a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// A data line did not have the expected shape.
    #[error("line {line_number}: {reason}")]
    InvalidLine {
        /// 1-based line number.
        line_number: usize,
        /// Description of the problem (never includes the value).
        reason: String,
    },

    /// The cookie file could not be read.
    #[error("failed to read cookie file {path}: {source}")]
    Io {
        /// Cookie file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file had data lines but none of them parsed.
    #[error("no valid cookies found ({malformed_count} lines failed to parse)")]
    NoCookiesFound {
        /// Number of malformed lines.
        malformed_count: usize,
    },
}

/// Parses Netscape cookie lines from a reader.
///
/// Comment and blank lines are skipped; malformed lines are logged and
/// skipped as long as at least one cookie parses.
///
/// # Errors
///
/// Returns [`CookieError::NoCookiesFound`] when every data line is malformed,
/// or [`CookieError::Io`] on read failure (reported against `origin`).
pub fn parse_netscape_cookies(
    reader: impl BufRead,
    origin: &Path,
) -> Result<Vec<CookieLine>, CookieError> {
    let mut cookies = Vec::new();
    let mut malformed_count = 0;

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result.map_err(|source| CookieError::Io {
            path: origin.to_path_buf(),
            source,
        })?;
        let line = line.trim_end();

        // `#HttpOnly_` prefixed lines are real cookies exported by curl/browsers.
        let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_cookie_line(line, line_number) {
            Ok(cookie) => cookies.push(cookie),
            Err(error) => {
                warn!(line = line_number, reason = %error, "skipping malformed cookie line");
                malformed_count += 1;
            }
        }
    }

    if cookies.is_empty() && malformed_count > 0 {
        return Err(CookieError::NoCookiesFound { malformed_count });
    }
    Ok(cookies)
}

fn parse_cookie_line(line: &str, line_number: usize) -> Result<CookieLine, CookieError> {
    let invalid = |reason: String| CookieError::InvalidLine {
        line_number,
        reason,
    };

    let fields: Vec<&str> = line.split('\t').collect();
    let [domain, tailmatch, path, secure, expires, name, value] = fields[..] else {
        return Err(invalid(format!(
            "expected 7 TAB-separated fields, found {}",
            fields.len()
        )));
    };

    let parse_flag = |field: &str, label: &str| match field {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        other => Err(invalid(format!("{label} must be TRUE or FALSE, got '{other}'"))),
    };
    let tailmatch = parse_flag(tailmatch, "tailmatch")?;
    let secure = parse_flag(secure, "secure")?;
    let expires = expires
        .parse::<u64>()
        .map_err(|_| invalid(format!("expires must be a non-negative integer, got '{expires}'")))?;

    if domain.is_empty() {
        return Err(invalid("domain field is empty".to_string()));
    }
    if name.is_empty() {
        return Err(invalid("cookie name field is empty".to_string()));
    }

    Ok(CookieLine {
        domain: domain.to_string(),
        tailmatch,
        path: path.to_string(),
        secure,
        expires,
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Reads and parses a cookie file from disk.
///
/// # Errors
///
/// Returns [`CookieError::Io`] if the file cannot be opened, plus any parse error.
#[instrument(level = "debug", fields(path = %path.display()))]
pub fn read_cookie_file(path: &Path) -> Result<Vec<CookieLine>, CookieError> {
    let file = File::open(path).map_err(|source| CookieError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_netscape_cookies(BufReader::new(file), path)
}

/// Adds cookies to an existing jar, returning how many were accepted.
pub fn import_into_jar(jar: &Jar, cookies: &[CookieLine]) -> usize {
    let mut imported = 0;
    for cookie in cookies {
        let origin = build_origin_url(cookie);
        match origin.parse::<Url>() {
            Ok(url) => {
                jar.add_cookie_str(&build_set_cookie_string(cookie), &url);
                debug!(domain = %cookie.domain, name = %cookie.name, "imported cookie");
                imported += 1;
            }
            Err(_) => {
                warn!(domain = %cookie.domain, name = %cookie.name, "skipping cookie with unparseable domain");
            }
        }
    }
    imported
}

/// Lists the names of the cookies a store would send to `url`.
#[must_use]
pub fn cookie_names(store: &dyn CookieStore, url: &Url) -> Vec<String> {
    let Some(header) = store.cookies(url) else {
        return Vec::new();
    };
    let Ok(header) = header.to_str() else {
        return Vec::new();
    };
    header
        .split(';')
        .filter_map(|pair| pair.split_once('=').map(|(name, _)| name.trim()))
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn build_set_cookie_string(cookie: &CookieLine) -> String {
    let mut parts = vec![
        format!("{}={}", cookie.name, cookie.value),
        format!("Domain={}", cookie.domain),
        format!("Path={}", cookie.path),
    ];
    if cookie.secure {
        parts.push("Secure".to_string());
    }
    if cookie.expires > 0
        && let Some(expires) = unix_to_http_date(cookie.expires)
    {
        parts.push(format!("Expires={expires}"));
    }
    parts.join("; ")
}

fn build_origin_url(cookie: &CookieLine) -> String {
    let scheme = if cookie.secure { "https" } else { "http" };
    let domain = cookie.domain.strip_prefix('.').unwrap_or(&cookie.domain);
    format!("{scheme}://{domain}{}", cookie.path)
}

fn unix_to_http_date(timestamp: u64) -> Option<String> {
    use std::time::{Duration, UNIX_EPOCH};

    let time = UNIX_EPOCH.checked_add(Duration::from_secs(timestamp))?;
    Some(httpdate::fmt_http_date(time))
}
