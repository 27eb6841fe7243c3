//! Resolves ridership-dataset station references to canonical stations.
//!
//! Resolution order, first hit wins:
//!
//! 1. **Direct identifier**: the raw identifier was learned from an earlier
//!    match, or equals a station's GTFS id.
//! 2. **Special case**: the raw label is listed in the [`SpecialCases`] table
//!    (or equals a station's full display name). Ranked above everything
//!    name-based, see [`SPECIAL_CASE_SCORE`].
//! 3. **Alias cache**: the normalized label, or else its normalized base
//!    name, is a known alias of exactly one station.
//! 4. **Scored candidates**: stations whose normalized base name equals the
//!    label's, ranked by line compatibility.
//!
//! A successful name-based match teaches the matcher the raw identifier, so
//! the next row for the same station resolves directly.

use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use crate::model::{CityId, Station, StationAlias, StationId};
use crate::normalize::normalize;
use crate::store::{StationStore, StoreResult};
use crate::tables::{LineHints, SpecialCases};

/// Candidate serves the line inferred from the label suffix.
pub const LINE_MATCH_SCORE: u8 = 3;
/// Candidate has no recorded lines, so it cannot contradict the suffix.
pub const UNKNOWN_LINES_SCORE: u8 = 2;
/// The label suffix implied no line.
pub const NO_INFERENCE_SCORE: u8 = 1;
/// Curated override; strictly above every candidate score.
pub const SPECIAL_CASE_SCORE: u8 = 4;

/// How a station was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchTier {
    /// The raw identifier was learned from a previous match.
    LearnedId,
    /// The raw identifier equals the station's GTFS id.
    ExternalId,
    SpecialCase,
    Alias,
    /// Name match ranked by line compatibility, with the winning score.
    Scored(u8),
}

impl MatchTier {
    pub fn is_direct(&self) -> bool {
        matches!(self, MatchTier::LearnedId | MatchTier::ExternalId)
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchTier::LearnedId => f.write_str("learned id"),
            MatchTier::ExternalId => f.write_str("external id"),
            MatchTier::SpecialCase => f.write_str("special case"),
            MatchTier::Alias => f.write_str("alias"),
            MatchTier::Scored(score) => write!(f, "name (score {score})"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched { station_id: StationId, tier: MatchTier },
    Unmatched { reason: String },
}

impl MatchOutcome {
    pub fn station_id(&self) -> Option<&StationId> {
        match self {
            MatchOutcome::Matched { station_id, .. } => Some(station_id),
            MatchOutcome::Unmatched { .. } => None,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }

    /// Flattens the outcome into `(station, matched, diagnostic)`.
    pub fn into_parts(self) -> (Option<StationId>, bool, String) {
        match self {
            MatchOutcome::Matched { station_id, tier } => {
                (Some(station_id), true, format!("matched by {tier}"))
            }
            MatchOutcome::Unmatched { reason } => (None, false, reason),
        }
    }
}

/// Splits a ridership label into `(base, suffix)` at the last `-`, or the
/// last `/` when there is no hyphen. A separator in first position does not
/// count.
///
/// ```
/// use ghost_stops::matcher::split_label;
///
/// assert_eq!(split_label("Addison-O'Hare"), ("Addison", "O'Hare"));
/// assert_eq!(split_label("California/Milwaukee"), ("California", "Milwaukee"));
/// assert_eq!(split_label("Jefferson Park"), ("Jefferson Park", ""));
/// ```
pub fn split_label(label: &str) -> (&str, &str) {
    for sep in ['-', '/'] {
        if let Some(idx) = label.rfind(sep) {
            if idx > 0 {
                return (label[..idx].trim(), label[idx + 1..].trim());
            }
        }
    }
    (label.trim(), "")
}

/// Drops a trailing parenthetical qualifier: `"Halsted (Green)"` -> `"Halsted"`.
pub fn strip_qualifier(name: &str) -> &str {
    match name.rfind('(') {
        Some(idx) if idx > 0 => name[..idx].trim(),
        _ => name,
    }
}

/// Normalized alias key -> stations, loaded once per run.
#[derive(Debug, Default)]
pub struct AliasCache {
    entries: HashMap<String, Vec<StationId>>,
}

impl AliasCache {
    pub fn from_aliases(aliases: &[StationAlias]) -> Self {
        let mut entries: HashMap<String, Vec<StationId>> = HashMap::new();
        for alias in aliases {
            let ids = entries.entry(alias.normalized.clone()).or_default();
            if !ids.contains(&alias.station_id) {
                ids.push(alias.station_id.clone());
            }
        }
        for ids in entries.values_mut() {
            ids.sort();
        }
        Self { entries }
    }

    /// The station for `key`, if exactly one station carries that alias.
    pub fn get(&self, key: &str) -> Option<&StationId> {
        match self.entries.get(key).map(Vec::as_slice) {
            Some([only]) => Some(only),
            _ => None,
        }
    }

    pub fn is_ambiguous(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|ids| ids.len() > 1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
struct Candidate {
    station: Station,
    normalized_base: String,
    normalized_full: String,
}

impl Candidate {
    fn new(station: Station) -> Self {
        Self {
            normalized_base: normalize(strip_qualifier(&station.name)),
            normalized_full: normalize(&station.name),
            station,
        }
    }

    fn score(&self, inferred_line: Option<&str>) -> u8 {
        match inferred_line {
            Some(line) if self.station.serves(line) => LINE_MATCH_SCORE,
            _ if self.station.lines.is_empty() => UNKNOWN_LINES_SCORE,
            None => NO_INFERENCE_SCORE,
            Some(_) => 0,
        }
    }
}

/// Matches ridership station references for one city.
///
/// Candidates are kept in station-id order. Equal scores are broken by that
/// order, so the result is deterministic for a given registry.
pub struct StationMatcher<'a, S: ?Sized> {
    store: &'a S,
    line_hints: &'a LineHints,
    special_cases: &'a SpecialCases,
    candidates: Vec<Candidate>,
    aliases: AliasCache,
    learned: HashMap<String, StationId>,
    external: HashMap<String, StationId>,
}

impl<'a, S: StationStore + ?Sized> StationMatcher<'a, S> {
    /// Loads the city's stations and aliases from `store`.
    pub fn load(
        store: &'a S,
        city: &CityId,
        line_hints: &'a LineHints,
        special_cases: &'a SpecialCases,
    ) -> StoreResult<Self> {
        let stations = store.stations(city)?;
        let aliases = store.aliases(city)?;
        debug!(
            stations = stations.len(),
            aliases = aliases.len(),
            "Loaded matcher registry"
        );
        Ok(Self::new(store, stations, &aliases, line_hints, special_cases))
    }

    pub fn new(
        store: &'a S,
        mut stations: Vec<Station>,
        aliases: &[StationAlias],
        line_hints: &'a LineHints,
        special_cases: &'a SpecialCases,
    ) -> Self {
        stations.sort_by(|a, b| a.id.cmp(&b.id));

        let mut learned = HashMap::new();
        let mut external = HashMap::new();
        for station in &stations {
            if let Some(raw_id) = station.ridership_source_id.as_deref().filter(|id| !id.is_empty()) {
                if let Some(existing) = learned.get(raw_id) {
                    warn!(
                        raw_id,
                        kept = %existing,
                        ignored = %station.id,
                        "Ridership id learned by two stations"
                    );
                } else {
                    learned.insert(raw_id.to_string(), station.id.clone());
                }
            }
            if let Some(external_id) = station.external_id.as_deref().filter(|id| !id.is_empty()) {
                external
                    .entry(external_id.to_string())
                    .or_insert_with(|| station.id.clone());
            }
        }

        Self {
            store,
            line_hints,
            special_cases,
            candidates: stations.into_iter().map(Candidate::new).collect(),
            aliases: AliasCache::from_aliases(aliases),
            learned,
            external,
        }
    }

    pub fn station_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }

    /// Resolves a ridership station reference and remembers the raw
    /// identifier on a name-based hit.
    ///
    /// The learned identifier is persisted best-effort: a store failure is
    /// logged and the match still succeeds.
    pub fn match_station(&mut self, raw_id: &str, raw_name: &str) -> MatchOutcome {
        let outcome = self.resolve(raw_id, raw_name);
        if let MatchOutcome::Matched { station_id, tier } = &outcome {
            if !tier.is_direct() && !raw_id.is_empty() {
                self.learn(station_id, raw_id);
            }
        }
        outcome
    }

    fn learn(&mut self, station_id: &StationId, raw_id: &str) {
        if self.learned.get(raw_id) == Some(station_id) {
            return;
        }
        self.learned.insert(raw_id.to_string(), station_id.clone());

        match self.store.set_ridership_source_id(station_id, raw_id) {
            Ok(()) => debug!(station_id = %station_id, raw_id, "Learned ridership id"),
            Err(e) => warn!(
                station_id = %station_id,
                raw_id,
                error = %e,
                "Failed to persist learned ridership id"
            ),
        }
    }

    /// Resolves without side effects.
    pub fn resolve(&self, raw_id: &str, raw_name: &str) -> MatchOutcome {
        if !raw_id.is_empty() {
            if let Some(id) = self.learned.get(raw_id) {
                return matched(id, MatchTier::LearnedId);
            }
            if let Some(id) = self.external.get(raw_id) {
                return matched(id, MatchTier::ExternalId);
            }
        }

        let (base, suffix) = split_label(raw_name);
        let normalized_base = normalize(base);
        if normalized_base.is_empty() {
            return MatchOutcome::Unmatched {
                reason: format!("Station name {raw_name:?} is empty after normalization"),
            };
        }

        if let Some(candidate) = self.special_case(raw_name) {
            return matched(&candidate.station.id, MatchTier::SpecialCase);
        }

        // Curated aliases are keyed by the whole label, GTFS self-aliases by name.
        for key in [normalize(raw_name), normalized_base.clone()] {
            if let Some(id) = self.aliases.get(&key) {
                return matched(id, MatchTier::Alias);
            }
            if self.aliases.is_ambiguous(&key) {
                debug!(key = %key, "Alias maps to several stations, ranking candidates");
            }
        }

        let inferred_line = self.line_hints.infer(suffix);
        if let Some((candidate, score)) = self.best_candidate(&normalized_base, inferred_line) {
            return matched(&candidate.station.id, MatchTier::Scored(score));
        }

        MatchOutcome::Unmatched {
            reason: self.unmatched_reason(&normalized_base, inferred_line),
        }
    }

    fn special_case(&self, raw_name: &str) -> Option<&Candidate> {
        let normalized_label = normalize(raw_name);
        if let Some(candidate) = self
            .candidates
            .iter()
            .find(|c| c.normalized_full == normalized_label)
        {
            return Some(candidate);
        }

        self.special_cases
            .candidates(raw_name)?
            .iter()
            .map(|value| normalize(value))
            .find_map(|value| {
                self.candidates
                    .iter()
                    .find(|c| c.normalized_full == value || c.normalized_base == value)
            })
    }

    fn best_candidate(
        &self,
        normalized_base: &str,
        inferred_line: Option<&str>,
    ) -> Option<(&Candidate, u8)> {
        let mut best: Option<(&Candidate, u8)> = None;
        for candidate in self
            .candidates
            .iter()
            .filter(|c| c.normalized_base == normalized_base)
        {
            let score = candidate.score(inferred_line);
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((candidate, score));
            }
        }
        best
    }

    fn unmatched_reason(&self, normalized_base: &str, inferred_line: Option<&str>) -> String {
        if let Some(line) = inferred_line {
            if let Some(candidate) = self
                .candidates
                .iter()
                .find(|c| c.normalized_base == normalized_base && !c.station.serves(line))
            {
                return format!(
                    "Base name matches '{}' but line mismatch (expected: {}, found: {:?})",
                    candidate.station.name, line, candidate.station.lines
                );
            }
        }
        format!("No station found with matching base name '{normalized_base}'")
    }
}

fn matched(id: &StationId, tier: MatchTier) -> MatchOutcome {
    MatchOutcome::Matched {
        station_id: id.clone(),
        tier,
    }
}
