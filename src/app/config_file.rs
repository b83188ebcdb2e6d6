//! Config file loading for CLI defaults.
//!
//! The file is a flat list of `key = value` lines. Values are integers,
//! booleans, double-quoted strings or arrays of double-quoted strings.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use mediaprobe_core::{Compression, Coverage, Partition, SessionMode};

/// File configuration; every field is optional and only fills in what the
/// command line left unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FileConfig {
    pub(crate) workers: Option<u8>,
    pub(crate) extensions: Option<Vec<String>>,
    pub(crate) coverage: Option<Coverage>,
    pub(crate) probe_timeout_ms: Option<u64>,
    pub(crate) first_probe_timeout_ms: Option<u64>,
    pub(crate) exhaustive: Option<bool>,
    pub(crate) partition: Option<Partition>,
    pub(crate) session_mode: Option<SessionMode>,
    pub(crate) store_path: Option<PathBuf>,
    pub(crate) archive_path: Option<PathBuf>,
    pub(crate) seed_url: Option<String>,
    pub(crate) challenge_cookie_markers: Option<Vec<String>>,
    pub(crate) consent_marker: Option<String>,
    pub(crate) cookies_file: Option<PathBuf>,
    pub(crate) gate_poll_ms: Option<u64>,
    pub(crate) gate_timeout_secs: Option<u64>,
    pub(crate) pace_ms: Option<u64>,
    pub(crate) strip_suffix: Option<String>,
    pub(crate) direct_extensions: Option<Vec<String>>,
    pub(crate) compression: Option<Compression>,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/mediaprobe/config.toml`
/// 2. `$HOME/.config/mediaprobe/config.toml`
pub(crate) fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("mediaprobe")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("mediaprobe")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist; the default location is optional.
pub(crate) fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return read_config_file(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => read_config_file(&path).map(Some),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

pub(crate) fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_number = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_number}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();

        apply_entry(&mut cfg, key, value)
            .with_context(|| format!("Invalid `{key}` value on line {line_number}"))?;
    }
    Ok(cfg)
}

fn apply_entry(cfg: &mut FileConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "workers" => {
            let workers = parse_bounded(value, 1, 32)?;
            cfg.workers = Some(u8::try_from(workers)?);
        }
        "extensions" => cfg.extensions = Some(parse_non_empty_array(value)?),
        "coverage" => cfg.coverage = Some(parse_enum(value)?),
        "probe_timeout_ms" => cfg.probe_timeout_ms = Some(parse_bounded(value, 50, 60_000)?),
        "first_probe_timeout_ms" => {
            cfg.first_probe_timeout_ms = Some(parse_bounded(value, 100, 120_000)?);
        }
        "exhaustive" => cfg.exhaustive = Some(parse_boolean(value)?),
        "partition" => cfg.partition = Some(parse_enum(value)?),
        "session_mode" => cfg.session_mode = Some(parse_enum(value)?),
        "store_path" => cfg.store_path = Some(PathBuf::from(parse_string_literal(value)?)),
        "archive_path" => cfg.archive_path = Some(PathBuf::from(parse_string_literal(value)?)),
        "seed_url" => cfg.seed_url = Some(parse_string_literal(value)?),
        "challenge_cookie_markers" => cfg.challenge_cookie_markers = Some(parse_array(value)?),
        "consent_marker" => cfg.consent_marker = Some(parse_string_literal(value)?),
        "cookies_file" => cfg.cookies_file = Some(PathBuf::from(parse_string_literal(value)?)),
        "gate_poll_ms" => cfg.gate_poll_ms = Some(parse_bounded(value, 100, 600_000)?),
        "gate_timeout_secs" => cfg.gate_timeout_secs = Some(parse_integer_u64(value)?),
        "pace_ms" => cfg.pace_ms = Some(parse_bounded(value, 0, 60_000)?),
        "strip_suffix" => cfg.strip_suffix = Some(parse_string_literal(value)?),
        "direct_extensions" => cfg.direct_extensions = Some(parse_array(value)?),
        "compression" => cfg.compression = Some(parse_enum(value)?),
        unknown => bail!("Unknown configuration key: '{unknown}'"),
    }
    Ok(())
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    let raw_value = raw_value.trim();
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_array(raw_value: &str) -> Result<Vec<String>> {
    let Some(inner) = raw_value
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        bail!("Expected an array of double-quoted strings");
    };
    let inner = inner.trim();
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(parse_string_literal)
        .collect()
}

fn parse_non_empty_array(raw_value: &str) -> Result<Vec<String>> {
    let items = parse_array(raw_value)?;
    if items.is_empty() {
        bail!("Expected at least one entry");
    }
    Ok(items)
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_bounded(raw_value: &str, min: u64, max: u64) -> Result<u64> {
    let value = parse_integer_u64(raw_value)?;
    if !(min..=max).contains(&value) {
        bail!("{value} is out of range. Expected range: {min}..={max}");
    }
    Ok(value)
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}

fn parse_enum<T>(raw_value: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let label = parse_string_literal(raw_value)?;
    label.parse::<T>().map_err(anyhow::Error::msg)
}
