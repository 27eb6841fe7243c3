//! Curated ridership-label aliases.

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{CityId, Station, StationId};
use crate::normalize::normalize;
use crate::profile::AliasPair;
use crate::store::StationStore;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AliasReport {
    pub created: usize,
    pub existing: usize,
    pub not_found: usize,
    pub failed: usize,
}

/// Finds the station a canonical label refers to.
///
/// An exact normalized-name match wins; otherwise the first station (by id)
/// whose normalized name starts with the label as a whole word, so `Belmont`
/// finds `Belmont (Red/Brown/Purple)`.
pub fn find_station<'s>(stations: &'s [Station], canonical_name: &str) -> Option<&'s Station> {
    let key = normalize(canonical_name);
    if key.is_empty() {
        return None;
    }
    let prefix = format!("{key} ");

    let normalized: Vec<(String, &Station)> =
        stations.iter().map(|s| (normalize(&s.name), s)).collect();

    normalized
        .iter()
        .find(|(name, _)| *name == key)
        .or_else(|| normalized.iter().find(|(name, _)| name.starts_with(&prefix)))
        .map(|(_, s)| *s)
}

/// Registers each `(ridership label, canonical label)` pair as an alias of
/// the canonical station. Pairs whose station cannot be found are logged and
/// counted.
#[tracing::instrument(skip(store, pairs), fields(pairs = pairs.len()))]
pub fn populate_aliases<S: StationStore + ?Sized>(
    store: &S,
    city: &CityId,
    pairs: &[AliasPair],
) -> Result<AliasReport> {
    let mut stations = store.stations(city)?;
    stations.sort_by(|a, b| a.id.cmp(&b.id));

    let mut report = AliasReport::default();
    for pair in pairs {
        let Some(station) = find_station(&stations, &pair.canonical_name) else {
            warn!(
                ridership_name = %pair.ridership_name,
                canonical_name = %pair.canonical_name,
                "Station not found for alias"
            );
            report.not_found += 1;
            continue;
        };

        let normalized = normalize(&pair.ridership_name);
        match store.create_alias(&station.id, &pair.ridership_name, &normalized) {
            Ok(true) => {
                debug!(alias = %pair.ridership_name, %normalized, station = %station.name, "Created alias");
                report.created += 1;
            }
            Ok(false) => report.existing += 1,
            Err(e) => {
                warn!(alias = %pair.ridership_name, error = %e, "Failed to create alias");
                report.failed += 1;
            }
        }
    }

    info!(
        created = report.created,
        existing = report.existing,
        not_found = report.not_found,
        failed = report.failed,
        "Alias population finished"
    );
    Ok(report)
}

/// Ids of stations sharing a normalized display name, for diagnostics.
pub fn duplicate_names(stations: &[Station]) -> Vec<(String, Vec<StationId>)> {
    let mut groups: std::collections::BTreeMap<String, Vec<StationId>> = Default::default();
    for station in stations {
        groups
            .entry(normalize(&station.name))
            .or_default()
            .push(station.id.clone());
    }
    groups.into_iter().filter(|(_, ids)| ids.len() > 1).collect()
}
