//! Hand-curated lookup tables consulted by the station matcher.
//!
//! Both tables are plain data loaded from a [`CityProfile`](crate::profile::CityProfile);
//! the matcher borrows them and never mutates them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maps the suffix of a ridership label (the part after the last `-` or `/`)
/// to the service line it implies, e.g. `"O'Hare" -> "Blue"`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineHints(HashMap<String, String>);

impl LineHints {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self(entries)
    }

    /// Infers a line from a label suffix.
    ///
    /// Tries the whole suffix first, then each space-separated token in order.
    /// Lookups are case-sensitive, matching how the table is curated.
    pub fn infer(&self, suffix: &str) -> Option<&str> {
        if suffix.is_empty() {
            return None;
        }

        if let Some(line) = self.0.get(suffix) {
            return Some(line);
        }

        suffix
            .split(' ')
            .find_map(|part| self.0.get(part))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ridership labels known to name a canonical station that normalization and
/// line inference cannot reach, e.g. `"Medical Center" -> ["Illinois Medical District"]`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecialCases(HashMap<String, Vec<String>>);

impl SpecialCases {
    pub fn new(entries: HashMap<String, Vec<String>>) -> Self {
        Self(entries)
    }

    /// Canonical labels listed for an exact raw label, if any.
    pub fn candidates(&self, raw_label: &str) -> Option<&[String]> {
        self.0.get(raw_label).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
