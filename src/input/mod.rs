//! Identifier listing input.
//!
//! A listing is newline-delimited text with one URL or path-like string per
//! line. Each selected line becomes a [`CandidateIdentifier`] whose base has
//! the listing's document suffix (e.g. `.pdf`) removed, so extension
//! candidates can be appended to it.
//!
//! # Example
//!
//! ```
//! use mediaprobe_core::input::{Selection, load_identifiers};
//!
//! let listing = "https://host/a.pdf\n\nhttps://host/b.pdf\nhttps://host/c.pdf\n";
//! let selection: Selection = "2-3".parse().unwrap();
//! let ids = load_identifiers(listing, Some(&selection), Some(".pdf")).unwrap();
//! assert_eq!(ids[0].base, "https://host/b");
//! assert_eq!(ids[0].index, 2);
//! ```

mod error;
mod selection;

pub use error::InputError;
pub use selection::Selection;

use tracing::debug;

/// A base resource name from which candidate URLs are derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateIdentifier {
    /// Base string with the listing suffix removed.
    pub base: String,
    /// 1-based position of the entry among non-blank listing lines.
    pub index: usize,
}

impl CandidateIdentifier {
    /// Builds the candidate URL for one extension suffix.
    #[must_use]
    pub fn candidate_url(&self, suffix: &str) -> String {
        format!("{}{suffix}", self.base)
    }
}

/// Splits a listing into trimmed, non-blank entries (CRLF tolerant).
#[must_use]
pub fn parse_listing(text: &str) -> Vec<&str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

/// Removes `suffix` from the end of `entry`, ignoring ASCII case.
#[must_use]
pub fn strip_suffix_ignore_case<'a>(entry: &'a str, suffix: &str) -> &'a str {
    if suffix.is_empty() || entry.len() < suffix.len() {
        return entry;
    }
    let split = entry.len() - suffix.len();
    match (entry.get(..split), entry.get(split..)) {
        (Some(head), Some(tail)) if tail.eq_ignore_ascii_case(suffix) => head,
        _ => entry,
    }
}

/// Turns listing text into ordered candidate identifiers.
///
/// # Errors
///
/// Returns [`InputError::OutOfRange`] when the selection names a position
/// past the end of the listing.
pub fn load_identifiers(
    text: &str,
    selection: Option<&Selection>,
    strip_suffix: Option<&str>,
) -> Result<Vec<CandidateIdentifier>, InputError> {
    let entries = parse_listing(text);
    if let Some(selection) = selection {
        selection.validate(entries.len())?;
    }

    let identifiers: Vec<CandidateIdentifier> = entries
        .into_iter()
        .enumerate()
        .map(|(offset, entry)| (offset + 1, entry))
        .filter(|(index, _)| selection.is_none_or(|s| s.contains(*index)))
        .map(|(index, entry)| CandidateIdentifier {
            base: strip_suffix.map_or(entry, |suffix| strip_suffix_ignore_case(entry, suffix))
                .to_string(),
            index,
        })
        .collect();

    debug!(count = identifiers.len(), "loaded candidate identifiers");
    Ok(identifiers)
}
