//! Per-city configuration.
//!
//! A [`CityProfile`] bundles everything that is specific to one transit
//! agency: the matcher's lookup tables, the curated alias list, how to read
//! rail stations and lines out of its GTFS feed, and where its ridership
//! dataset lives. Profiles are plain JSON:
//!
//! ```json
//! {
//!   "code": "chicago",
//!   "name": "Chicago CTA",
//!   "socrata_url": "https://data.cityofchicago.org/resource/5neh-572f.json",
//!   "rail_stop_prefixes": ["3", "4"],
//!   "line_codes": [["Brn", "Brown"]],
//!   "line_hints": { "O'Hare": "Blue" },
//!   "special_cases": { "Midway Airport": ["Midway"] },
//!   "aliases": [{ "ridership_name": "Homan", "canonical_name": "Kedzie-Homan" }]
//! }
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::tables::{LineHints, SpecialCases};

const CHICAGO: &str = include_str!("../profiles/chicago.json");

/// A curated (ridership label, canonical label) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AliasPair {
    pub ridership_name: String,
    pub canonical_name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CityProfile {
    pub code: String,
    pub name: String,
    /// Socrata endpoint for daily station entries.
    #[serde(default)]
    pub socrata_url: Option<String>,
    /// GTFS `stop_id` prefixes that identify rail stops.
    #[serde(default)]
    pub rail_stop_prefixes: Vec<String>,
    /// `(code, line name)` pairs looked up in GTFS `stop_desc`, in priority order.
    #[serde(default)]
    pub line_codes: Vec<(String, String)>,
    #[serde(default)]
    pub line_hints: LineHints,
    #[serde(default)]
    pub special_cases: SpecialCases,
    #[serde(default)]
    pub aliases: Vec<AliasPair>,
}

impl CityProfile {
    /// Returns the profile compiled into the binary for `code`.
    pub fn builtin(code: &str) -> Result<Self> {
        let source = match code {
            "chicago" => CHICAGO,
            other => bail!("Unsupported city: {other}"),
        };
        serde_json::from_str(source).with_context(|| format!("built-in profile '{code}' is invalid"))
    }

    /// Loads a profile from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read profile {path}"))?;
        serde_json::from_str(&content).with_context(|| format!("failed to parse profile {path}"))
    }

    /// Loads `path` when given, otherwise the built-in profile for `code`.
    ///
    /// A file profile must describe the requested city.
    pub fn resolve(code: &str, path: Option<&str>) -> Result<Self> {
        let profile = match path {
            Some(path) => Self::load(path)?,
            None => Self::builtin(code)?,
        };
        if profile.code != code {
            bail!(
                "profile is for city '{}' but '{}' was requested",
                profile.code,
                code
            );
        }
        Ok(profile)
    }

    /// Returns `true` if a GTFS `stop_id` names a rail stop.
    pub fn is_rail_stop(&self, stop_id: &str) -> bool {
        stop_id.len() >= 5
            && self
                .rail_stop_prefixes
                .iter()
                .any(|prefix| stop_id.starts_with(prefix.as_str()))
    }

    /// Lines mentioned in a GTFS `stop_desc`, in `line_codes` order.
    ///
    /// A code matches a whole alphanumeric token of the description, so the
    /// single-letter code `G` does not fire on every word containing a "G".
    pub fn lines_in_description(&self, desc: &str) -> Vec<String> {
        let tokens: Vec<&str> = desc
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut lines: Vec<String> = Vec::new();
        for (code, name) in &self.line_codes {
            let mentioned = tokens.iter().any(|t| t == code || t == name)
                || (name.contains(' ') && desc.contains(name.as_str()));
            if mentioned && !lines.contains(name) {
                lines.push(name.clone());
            }
        }
        lines
    }
}
