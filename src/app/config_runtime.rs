//! Merges command line, config file and built-in defaults into run settings.
//!
//! Precedence: command line > config file > defaults.

use std::path::PathBuf;
use std::time::Duration;

use mediaprobe_core::constants::{
    CONNECT_TIMEOUT, DEFAULT_ARCHIVE_FILE, DEFAULT_CHALLENGE_COOKIE_MARKERS,
    DEFAULT_CONSENT_MARKER, DEFAULT_DIRECT_EXTENSIONS, DEFAULT_FIRST_PROBE_TIMEOUT,
    DEFAULT_GATE_POLL_INTERVAL, DEFAULT_PROBE_TIMEOUT, DEFAULT_STORE_FILE, DEFAULT_STRIP_SUFFIX,
    DEFAULT_WORKERS, READ_TIMEOUT, WRAPPER_PAGE_TIMEOUT,
};
use mediaprobe_core::{
    Compression, ExtensionCandidate, GatePolicy, GateSignals,
    HttpSessionConfig, Partition, ProbeMode, SchedulerConfig, SessionMode,
};

use super::config_file::FileConfig;
use crate::cli::{ArchiveArgs, Cli};

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RunSettings {
    pub(crate) workers: usize,
    pub(crate) extensions: Vec<String>,
    pub(crate) probe_timeout: Duration,
    pub(crate) first_probe_timeout: Duration,
    pub(crate) probe_mode: ProbeMode,
    pub(crate) partition: Partition,
    pub(crate) session_mode: SessionMode,
    pub(crate) store_path: PathBuf,
    pub(crate) archive_path: PathBuf,
    pub(crate) seed_url: Option<String>,
    pub(crate) challenge_cookie_markers: Vec<String>,
    pub(crate) consent_marker: String,
    pub(crate) cookies_file: Option<PathBuf>,
    pub(crate) gate_poll_interval: Duration,
    pub(crate) gate_timeout: Option<Duration>,
    pub(crate) pace: Duration,
    pub(crate) strip_suffix: Option<String>,
    pub(crate) direct_extensions: Vec<String>,
    pub(crate) compression: Compression,
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

impl RunSettings {
    /// Resolves every setting from `cli`, then `file`, then the defaults.
    pub(crate) fn resolve(cli: &Cli, file: Option<&FileConfig>) -> Self {
        let default_file = FileConfig::default();
        let file = file.unwrap_or(&default_file);

        let coverage = cli.coverage.or(file.coverage).unwrap_or_default();
        let extensions = cli
            .extensions
            .clone()
            .filter(|list| !list.is_empty())
            .or_else(|| file.extensions.clone())
            .unwrap_or_else(|| owned(coverage.extensions()));

        let workers = cli
            .workers
            .or(file.workers)
            .map_or(DEFAULT_WORKERS, usize::from);

        let exhaustive = cli.exhaustive || file.exhaustive.unwrap_or(false);
        let gate_timeout_secs = cli.gate_timeout_secs.or(file.gate_timeout_secs).unwrap_or(0);

        Self {
            workers,
            extensions,
            probe_timeout: cli
                .probe_timeout_ms
                .or(file.probe_timeout_ms)
                .map_or(DEFAULT_PROBE_TIMEOUT, Duration::from_millis),
            first_probe_timeout: cli
                .first_probe_timeout_ms
                .or(file.first_probe_timeout_ms)
                .map_or(DEFAULT_FIRST_PROBE_TIMEOUT, Duration::from_millis),
            probe_mode: if exhaustive {
                ProbeMode::Exhaustive
            } else {
                ProbeMode::FirstMatch
            },
            partition: cli.partition.or(file.partition).unwrap_or_default(),
            session_mode: cli.session_mode.or(file.session_mode).unwrap_or_default(),
            store_path: cli
                .store
                .clone()
                .or_else(|| file.store_path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE)),
            archive_path: cli
                .archive
                .clone()
                .or_else(|| file.archive_path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ARCHIVE_FILE)),
            seed_url: cli.seed_url.clone().or_else(|| file.seed_url.clone()),
            challenge_cookie_markers: file
                .challenge_cookie_markers
                .clone()
                .unwrap_or_else(|| owned(&DEFAULT_CHALLENGE_COOKIE_MARKERS)),
            consent_marker: file
                .consent_marker
                .clone()
                .unwrap_or_else(|| DEFAULT_CONSENT_MARKER.to_string()),
            cookies_file: cli.cookies.clone().or_else(|| file.cookies_file.clone()),
            gate_poll_interval: file
                .gate_poll_ms
                .map_or(DEFAULT_GATE_POLL_INTERVAL, Duration::from_millis),
            gate_timeout: (gate_timeout_secs > 0).then(|| Duration::from_secs(gate_timeout_secs)),
            pace: Duration::from_millis(cli.pace_ms.or(file.pace_ms).unwrap_or(0)),
            strip_suffix: Some(
                file.strip_suffix
                    .clone()
                    .unwrap_or_else(|| DEFAULT_STRIP_SUFFIX.to_string()),
            )
            .filter(|suffix| !suffix.is_empty()),
            direct_extensions: file
                .direct_extensions
                .clone()
                .unwrap_or_else(|| owned(&DEFAULT_DIRECT_EXTENSIONS)),
            compression: file.compression.unwrap_or_default(),
        }
    }

    /// Applies `archive`-only command line options.
    pub(crate) fn with_archive_args(mut self, args: &ArchiveArgs) -> Self {
        if let Some(compression) = args.compression {
            self.compression = compression;
        }
        self
    }

    pub(crate) fn extension_candidates(&self) -> Vec<ExtensionCandidate> {
        ExtensionCandidate::ordered(&self.extensions)
    }

    pub(crate) fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            workers: self.workers,
            partition: self.partition,
            session_mode: self.session_mode,
        }
    }

    pub(crate) fn session_config(&self) -> HttpSessionConfig {
        HttpSessionConfig {
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            pace: self.pace,
            cookies_file: self.cookies_file.clone(),
        }
    }

    pub(crate) fn gate_signals(&self) -> GateSignals {
        GateSignals {
            challenge_cookie_markers: self.challenge_cookie_markers.clone(),
            consent_marker: self.consent_marker.clone(),
        }
    }

    /// Gate policy around `seed_url`.
    pub(crate) fn gate_policy(&self, seed_url: String) -> GatePolicy {
        GatePolicy {
            seed_url,
            poll_interval: self.gate_poll_interval,
            timeout: self.gate_timeout,
            seed_timeout: self.first_probe_timeout,
        }
    }

    /// Configured seed URL, else the first URL already recorded in the store.
    pub(crate) fn seed_url_for(&self, stored: &[String]) -> Option<String> {
        self.seed_url.clone().or_else(|| stored.first().cloned())
    }

    pub(crate) fn wrapper_timeout(&self) -> Duration {
        WRAPPER_PAGE_TIMEOUT.max(self.probe_timeout)
    }
}

/// Default tracing level from the verbosity flags.
pub(crate) fn default_log_level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use mediaprobe_core::Coverage;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["mediaprobe"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_without_file() {
        let settings = RunSettings::resolve(&cli(&["discover"]), None);
        assert_eq!(settings.workers, DEFAULT_WORKERS);
        assert_eq!(settings.extensions, owned(Coverage::Full.extensions()));
        assert_eq!(settings.probe_timeout, DEFAULT_PROBE_TIMEOUT);
        assert_eq!(settings.probe_mode, ProbeMode::FirstMatch);
        assert_eq!(settings.partition, Partition::Dynamic);
        assert_eq!(settings.session_mode, SessionMode::Isolated);
        assert_eq!(settings.store_path, PathBuf::from(DEFAULT_STORE_FILE));
        assert_eq!(settings.gate_timeout, None);
        assert_eq!(settings.strip_suffix.as_deref(), Some(".pdf"));
        assert_eq!(settings.direct_extensions, vec![".avi", ".mov"]);
        assert_eq!(settings.compression, Compression::Stored);
    }

    #[test]
    fn test_file_fills_unset_cli_values() {
        let file = FileConfig {
            workers: Some(9),
            coverage: Some(Coverage::Fast),
            exhaustive: Some(true),
            gate_timeout_secs: Some(30),
            strip_suffix: Some(String::new()),
            ..FileConfig::default()
        };
        let settings = RunSettings::resolve(&cli(&["discover"]), Some(&file));
        assert_eq!(settings.workers, 9);
        assert_eq!(settings.extensions, vec![".mp4", ".avi"]);
        assert_eq!(settings.probe_mode, ProbeMode::Exhaustive);
        assert_eq!(settings.gate_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.strip_suffix, None);
    }

    #[test]
    fn test_cli_wins_over_file() {
        let file = FileConfig {
            workers: Some(9),
            extensions: Some(vec![".wav".to_string()]),
            store_path: Some(PathBuf::from("file.txt")),
            gate_timeout_secs: Some(30),
            ..FileConfig::default()
        };
        let settings = RunSettings::resolve(
            &cli(&[
                "discover",
                "-w",
                "2",
                "--extensions",
                ".m4v",
                "--store",
                "cli.txt",
                "--gate-timeout-secs",
                "0",
            ]),
            Some(&file),
        );
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.extensions, vec![".m4v"]);
        assert_eq!(settings.store_path, PathBuf::from("cli.txt"));
        assert_eq!(settings.gate_timeout, None);
    }

    #[test]
    fn test_explicit_extensions_beat_coverage() {
        let settings = RunSettings::resolve(
            &cli(&["discover", "--coverage", "paranoid", "--extensions", ".mp4"]),
            None,
        );
        assert_eq!(settings.extensions, vec![".mp4"]);
    }

    #[test]
    fn test_archive_compression_override() {
        let file = FileConfig {
            compression: Some(Compression::Stored),
            ..FileConfig::default()
        };
        let settings = RunSettings::resolve(&cli(&["archive"]), Some(&file)).with_archive_args(
            &ArchiveArgs {
                compression: Some(Compression::Deflated),
            },
        );
        assert_eq!(settings.compression, Compression::Deflated);
    }

    #[test]
    fn test_seed_defaults_to_first_stored_url() {
        let settings = RunSettings::resolve(&cli(&["discover"]), None);
        let stored = vec![
            "https://h/files/B.avi".to_string(),
            "https://h/files/C.mp4".to_string(),
        ];
        assert_eq!(
            settings.seed_url_for(&stored).as_deref(),
            Some("https://h/files/B.avi")
        );
        assert_eq!(settings.seed_url_for(&[]), None);
    }

    #[test]
    fn test_configured_seed_wins() {
        let settings =
            RunSettings::resolve(&cli(&["archive", "--seed-url", "https://h/seed.mp4"]), None);
        let stored = vec!["https://h/files/B.avi".to_string()];
        assert_eq!(
            settings.seed_url_for(&stored).as_deref(),
            Some("https://h/seed.mp4")
        );
    }

    #[test]
    fn test_default_log_level() {
        assert_eq!(default_log_level(0, false), "info");
        assert_eq!(default_log_level(1, false), "debug");
        assert_eq!(default_log_level(3, false), "trace");
        assert_eq!(default_log_level(0, true), "error");
    }
}
