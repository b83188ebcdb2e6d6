//! Built-in defaults shared by the library and the CLI.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 5;

/// Minimum allowed worker count.
pub const MIN_WORKERS: usize = 1;

/// Maximum allowed worker count.
pub const MAX_WORKERS: usize = 32;

/// Steady-state probe timeout. The endpoint answers quickly when content exists.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Timeout for seed navigations issued while clearing the gate.
pub const DEFAULT_FIRST_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Delay between gate clearance polls.
pub const DEFAULT_GATE_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// HTTP connect timeout for session clients.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle read timeout for payload retrieval streams.
pub const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for loading an embedded-stream wrapper page during retrieval.
pub const WRAPPER_PAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cookie name fragments that indicate a cleared anti-bot challenge.
pub const DEFAULT_CHALLENGE_COOKIE_MARKERS: [&str; 3] = ["cf", "bm", "ak"];

/// Page marker that only renders once the consent interstitial is accepted.
pub const DEFAULT_CONSENT_MARKER: &str = "<video";

/// Suffix stripped from listing lines to obtain the base identifier.
pub const DEFAULT_STRIP_SUFFIX: &str = ".pdf";

/// Suffixes retrieved as direct downloads in archive mode.
pub const DEFAULT_DIRECT_EXTENSIONS: [&str; 2] = [".avi", ".mov"];

/// Default discovery output file.
pub const DEFAULT_STORE_FILE: &str = "valid_media.txt";

/// Default archive container file.
pub const DEFAULT_ARCHIVE_FILE: &str = "media_archive.zip";

/// Extension candidate presets, ordered by probe priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coverage {
    /// Covers most resources with two probes per identifier.
    Fast,
    /// Covers nearly every resource.
    #[default]
    Full,
    /// Also tries formats that rarely exist.
    Paranoid,
}

impl Coverage {
    /// Returns the ordered suffix list for this preset.
    #[must_use]
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Fast => &[".mp4", ".avi"],
            Self::Full => &[".mp4", ".avi", ".m4a", ".m4v"],
            Self::Paranoid => &[".mp4", ".avi", ".m4a", ".m4v", ".wav", ".mov", ".wmv"],
        }
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Full => write!(f, "full"),
            Self::Paranoid => write!(f, "paranoid"),
        }
    }
}

impl FromStr for Coverage {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "full" => Ok(Self::Full),
            "paranoid" => Ok(Self::Paranoid),
            other => Err(format!(
                "unknown coverage preset '{other}' (expected fast, full or paranoid)"
            )),
        }
    }
}
