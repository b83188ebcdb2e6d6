//! Error types for identifier listing input.

use thiserror::Error;

/// Errors raised while turning a listing into candidate identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    /// The selection expression could not be parsed.
    #[error("invalid selection '{spec}': {reason}")]
    InvalidSelection {
        /// The raw selection expression.
        spec: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A selected position does not exist in the listing.
    #[error("selection index {index} is out of range (listing has {len} entries)")]
    OutOfRange {
        /// The 1-based position that was requested.
        index: usize,
        /// Number of non-blank entries in the listing.
        len: usize,
    },
}

impl InputError {
    /// Creates an invalid selection error.
    pub fn invalid_selection(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSelection {
            spec: spec.into(),
            reason: reason.into(),
        }
    }
}
