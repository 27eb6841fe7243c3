//! Canonical stations from a GTFS feed.
//!
//! Only `stops.txt` is read. Rail platforms are folded into their parent
//! station, and the lines serving a station are collected from the
//! platforms' `stop_desc`.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::{EtlError, Result};
use crate::model::{CityId, NewStation};
use crate::normalize::normalize;
use crate::profile::CityProfile;
use crate::store::StationStore;

const REQUIRED_COLUMNS: &[&str] = &["stop_id", "stop_name", "stop_lat", "stop_lon"];

/// One row of `stops.txt`.
#[derive(Debug, Clone, Deserialize)]
pub struct GtfsStop {
    pub stop_id: String,
    pub stop_name: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub stop_lat: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub stop_lon: Option<f64>,
    #[serde(default)]
    pub stop_desc: Option<String>,
    #[serde(default)]
    pub parent_station: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GtfsReport {
    pub stops: usize,
    pub stations: usize,
    pub aliases_created: usize,
    pub failed: usize,
}

/// Extracts `stops.txt` from a GTFS zip archive.
///
/// The file may sit at the archive root or inside a single top-level folder.
pub fn read_stops(archive: &[u8]) -> Result<Vec<GtfsStop>> {
    let mut zip = ZipArchive::new(Cursor::new(archive))?;

    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        let name = file.name().to_string();
        if name == "stops.txt" || name.ends_with("/stops.txt") {
            debug!(entry = %name, size = file.size(), "Found stops.txt");
            let mut content = String::new();
            file.read_to_string(&mut content)?;
            return parse_stops(content.as_bytes());
        }
    }
    Err(EtlError::StopsNotFound)
}

/// Parses `stops.txt` content.
pub fn parse_stops<R: Read>(reader: R) -> Result<Vec<GtfsStop>> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = csv.headers()?.clone();
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == *column) {
            return Err(EtlError::MissingColumn {
                source_name: "stops.txt",
                column,
                found: headers.iter().map(String::from).collect(),
            });
        }
    }

    let mut stops = Vec::new();
    for row in csv.deserialize::<GtfsStop>() {
        stops.push(row?);
    }
    Ok(stops)
}

/// Folds rail stops into one [`NewStation`] per parent station.
///
/// A platform contributes its lines to its parent; the parent's own row, when
/// present, provides the station's name and coordinates. Output is ordered by
/// external id.
pub fn extract_stations(profile: &CityProfile, stops: &[GtfsStop]) -> Vec<NewStation> {
    let by_id: HashMap<&str, &GtfsStop> = stops.iter().map(|s| (s.stop_id.as_str(), s)).collect();
    let mut stations: BTreeMap<&str, NewStation> = BTreeMap::new();

    for stop in stops.iter().filter(|s| profile.is_rail_stop(&s.stop_id)) {
        let parent_id = stop
            .parent_station
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(stop.stop_id.as_str());

        let station = stations.entry(parent_id).or_insert_with(|| {
            let source = by_id.get(parent_id).copied().unwrap_or(stop);
            NewStation {
                external_id: parent_id.to_string(),
                name: source.stop_name.trim().to_string(),
                latitude: source.stop_lat.or(stop.stop_lat).unwrap_or(0.0),
                longitude: source.stop_lon.or(stop.stop_lon).unwrap_or(0.0),
                lines: Vec::new(),
            }
        });

        if let Some(desc) = stop.stop_desc.as_deref() {
            for line in profile.lines_in_description(desc) {
                if !station.lines.contains(&line) {
                    station.lines.push(line);
                }
            }
        }
    }

    stations.into_values().collect()
}

/// Loads the rail stations of a GTFS archive into `store`.
///
/// Every station also gets its own normalized display name as an alias. A
/// station that fails to write is logged and skipped.
#[tracing::instrument(skip(store, profile, archive), fields(bytes = archive.len()))]
pub fn ingest_gtfs<S: StationStore + ?Sized>(
    store: &S,
    city: &CityId,
    profile: &CityProfile,
    archive: &[u8],
) -> Result<GtfsReport> {
    let stops = read_stops(archive)?;
    let stations = extract_stations(profile, &stops);
    info!(stops = stops.len(), stations = stations.len(), "Parsed GTFS stops");

    let mut report = GtfsReport {
        stops: stops.len(),
        ..Default::default()
    };

    for station in &stations {
        let id = match store.upsert_station(city, station) {
            Ok(id) => id,
            Err(e) => {
                warn!(station = %station.name, error = %e, "Failed to upsert station");
                report.failed += 1;
                continue;
            }
        };
        report.stations += 1;

        match store.create_alias(&id, &station.name, &normalize(&station.name)) {
            Ok(true) => report.aliases_created += 1,
            Ok(false) => {}
            Err(e) => warn!(station = %station.name, error = %e, "Failed to create station alias"),
        }
    }

    info!(
        stations = report.stations,
        aliases_created = report.aliases_created,
        failed = report.failed,
        "GTFS ingestion finished"
    );
    Ok(report)
}
