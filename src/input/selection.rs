//! 1-based index/range selection over a listing (`3`, `5-9`, `1,4-6`).

use std::ops::RangeInclusive;
use std::str::FromStr;

use super::InputError;

/// A set of 1-based positions selected from the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    ranges: Vec<RangeInclusive<usize>>,
}

impl Selection {
    /// Returns true if the 1-based `position` is selected.
    #[must_use]
    pub fn contains(&self, position: usize) -> bool {
        self.ranges.iter().any(|range| range.contains(&position))
    }

    /// Checks every selected position against the listing length.
    ///
    /// # Errors
    ///
    /// Returns [`InputError::OutOfRange`] for the first position past `len`.
    pub fn validate(&self, len: usize) -> Result<(), InputError> {
        match self.ranges.iter().map(|range| *range.end()).max() {
            Some(index) if index > len => Err(InputError::OutOfRange { index, len }),
            _ => Ok(()),
        }
    }
}

impl FromStr for Selection {
    type Err = InputError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut ranges = Vec::new();

        for part in spec.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(InputError::invalid_selection(spec, "empty element"));
            }

            let range = match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_position(spec, start)?;
                    let end = parse_position(spec, end)?;
                    if start > end {
                        return Err(InputError::invalid_selection(
                            spec,
                            format!("range start {start} exceeds end {end}"),
                        ));
                    }
                    start..=end
                }
                None => {
                    let position = parse_position(spec, part)?;
                    position..=position
                }
            };
            ranges.push(range);
        }

        Ok(Self { ranges })
    }
}

fn parse_position(spec: &str, token: &str) -> Result<usize, InputError> {
    let token = token.trim();
    let position = token.parse::<usize>().map_err(|_| {
        InputError::invalid_selection(spec, format!("'{token}' is not a positive integer"))
    })?;
    if position == 0 {
        return Err(InputError::invalid_selection(
            spec,
            "positions are 1-based; 0 is not allowed",
        ));
    }
    Ok(position)
}
