//! CLI argument definitions using clap derive macros.
//!
//! Options that can also come from the config file are `Option`s here so the
//! merge in `app::config_runtime` can tell "given on the command line" from
//! "left to the file or the built-in default".

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use mediaprobe_core::{Compression, Coverage, Partition, Selection, SessionMode};

/// Discover and archive media resources behind a gated web endpoint.
///
/// `discover` probes every identifier of a listing with several extension
/// candidates and records the resources that exist. `archive` fetches every
/// recorded resource into a resumable ZIP container.
#[derive(Parser, Debug)]
#[command(name = "mediaprobe")]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored log output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Read defaults from this config file instead of the XDG location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Number of concurrent workers (1-32)
    #[arg(short = 'w', long, global = true, value_parser = clap::value_parser!(u8).range(1..=32))]
    pub workers: Option<u8>,

    /// Extension candidates in priority order, e.g. `.mp4,.avi`
    #[arg(long, global = true, value_delimiter = ',', value_name = "EXT")]
    pub extensions: Option<Vec<String>>,

    /// Extension preset used when no explicit list is given (fast, full, paranoid)
    #[arg(long, global = true)]
    pub coverage: Option<Coverage>,

    /// Per-candidate probe timeout in milliseconds (50-60000)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(50..=60_000))]
    pub probe_timeout_ms: Option<u64>,

    /// Timeout of the seed navigation while clearing the gate (100-120000)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(100..=120_000))]
    pub first_probe_timeout_ms: Option<u64>,

    /// Record every extension that exists instead of stopping at the first
    #[arg(long, global = true)]
    pub exhaustive: bool,

    /// Work distribution across workers (static, dynamic)
    #[arg(long, global = true)]
    pub partition: Option<Partition>,

    /// One session per worker or one shared session (isolated, shared)
    #[arg(long, global = true)]
    pub session_mode: Option<SessionMode>,

    /// Output store file of recorded resource URLs
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    /// ZIP container written by `archive`
    #[arg(long, global = true, value_name = "PATH")]
    pub archive: Option<PathBuf>,

    /// Known-good resource URL used to clear the gate
    #[arg(long, global = true, value_name = "URL")]
    pub seed_url: Option<String>,

    /// Netscape cookie file re-imported while waiting at the gate
    #[arg(long, global = true, value_name = "PATH")]
    pub cookies: Option<PathBuf>,

    /// Give up clearing the gate after this many seconds (0 waits forever)
    #[arg(long, global = true)]
    pub gate_timeout_secs: Option<u64>,

    /// Minimum delay between requests of one session in milliseconds (max 60000)
    #[arg(long, global = true, value_parser = clap::value_parser!(u64).range(0..=60_000))]
    pub pace_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Probe identifiers and record the resources that exist
    Discover(DiscoverArgs),
    /// Fetch every recorded resource into the ZIP container
    Archive(ArchiveArgs),
}

#[derive(Args, Debug, Default)]
pub struct DiscoverArgs {
    /// Identifier listing, one per line (`-` or omitted reads stdin)
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// 1-based positions to process, e.g. `3`, `5-9` or `1,4-6`
    #[arg(long, value_name = "SPEC")]
    pub select: Option<Selection>,
}

#[derive(Args, Debug, Default)]
pub struct ArchiveArgs {
    /// Compression for newly added entries (stored, deflated)
    #[arg(long)]
    pub compression: Option<Compression>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_discover_defaults() {
        let cli = Cli::try_parse_from(["mediaprobe", "discover"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
        assert!(cli.workers.is_none());
        assert!(!cli.exhaustive);
        let Command::Discover(args) = cli.command else {
            panic!("expected discover");
        };
        assert!(args.input.is_none());
        assert!(args.select.is_none());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        let err = Cli::try_parse_from(["mediaprobe"]).unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let cli = Cli::try_parse_from(["mediaprobe", "-vv", "archive"]).unwrap();
        assert_eq!(cli.verbose, 2);

        let cli = Cli::try_parse_from(["mediaprobe", "archive", "--verbose"]).unwrap();
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_cli_quiet_conflicts_with_verbose() {
        let err = Cli::try_parse_from(["mediaprobe", "-q", "-v", "archive"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_cli_workers_range() {
        let cli = Cli::try_parse_from(["mediaprobe", "discover", "-w", "32"]).unwrap();
        assert_eq!(cli.workers, Some(32));

        for bad in ["0", "33"] {
            let err = Cli::try_parse_from(["mediaprobe", "discover", "-w", bad]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_extensions_split_on_comma() {
        let cli =
            Cli::try_parse_from(["mediaprobe", "discover", "--extensions", ".mp4,.avi"]).unwrap();
        assert_eq!(
            cli.extensions,
            Some(vec![".mp4".to_string(), ".avi".to_string()])
        );
    }

    #[test]
    fn test_cli_parses_enumerated_options() {
        let cli = Cli::try_parse_from([
            "mediaprobe",
            "discover",
            "--coverage",
            "paranoid",
            "--partition",
            "static",
            "--session-mode",
            "shared",
        ])
        .unwrap();
        assert_eq!(cli.coverage, Some(Coverage::Paranoid));
        assert_eq!(cli.partition, Some(Partition::Static));
        assert_eq!(cli.session_mode, Some(SessionMode::Shared));
    }

    #[test]
    fn test_cli_rejects_unknown_coverage() {
        let err =
            Cli::try_parse_from(["mediaprobe", "discover", "--coverage", "ultra"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_discover_input_and_selection() {
        let cli = Cli::try_parse_from([
            "mediaprobe",
            "discover",
            "ids.txt",
            "--select",
            "1,4-6",
        ])
        .unwrap();
        let Command::Discover(args) = cli.command else {
            panic!("expected discover");
        };
        assert_eq!(args.input, Some(PathBuf::from("ids.txt")));
        let selection = args.select.unwrap();
        assert!(selection.contains(5));
        assert!(!selection.contains(3));
    }

    #[test]
    fn test_cli_rejects_reversed_selection() {
        let err =
            Cli::try_parse_from(["mediaprobe", "discover", "--select", "9-5"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_archive_compression() {
        let cli =
            Cli::try_parse_from(["mediaprobe", "archive", "--compression", "deflated"]).unwrap();
        let Command::Archive(args) = cli.command else {
            panic!("expected archive");
        };
        assert_eq!(args.compression, Some(Compression::Deflated));
    }

    #[test]
    fn test_cli_probe_timeout_bounds() {
        let err = Cli::try_parse_from(["mediaprobe", "discover", "--probe-timeout-ms", "10"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);

        let cli = Cli::try_parse_from(["mediaprobe", "discover", "--probe-timeout-ms", "250"])
            .unwrap();
        assert_eq!(cli.probe_timeout_ms, Some(250));
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Cli::try_parse_from(["mediaprobe", "discover", "--bogus"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
