//! Ridership CSV ingestion.
//!
//! Exports of the daily station entries dataset have used several header
//! spellings over the years, so columns are located by name from a list of
//! known variants.

use csv::StringRecord;
use std::io::Read;
use tracing::info;

use crate::error::{EtlError, Result};
use crate::ingest::{RidershipLoader, RidershipOutcome};
use crate::model::CityId;
use crate::profile::CityProfile;
use crate::store::StationStore;

const STATION_NAME_COLUMNS: &[&str] = &["stationname", "station_name", "station"];
const STATION_ID_COLUMNS: &[&str] = &["station_id"];
const DATE_COLUMNS: &[&str] = &["service_date", "date"];
const RIDES_COLUMNS: &[&str] = &["rides", "total_rides", "entries"];

/// Column positions of the fields ingestion reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RidershipColumns {
    /// Optional: older exports carry only the station name.
    pub station_id: Option<usize>,
    pub station_name: usize,
    pub date: usize,
    pub rides: usize,
}

impl RidershipColumns {
    pub fn detect(headers: &StringRecord) -> Result<Self> {
        let find = |candidates: &[&str]| {
            candidates
                .iter()
                .find_map(|c| headers.iter().position(|h| h.trim() == *c))
        };
        let require = |candidates: &[&str], column: &'static str| {
            find(candidates).ok_or_else(|| EtlError::MissingColumn {
                source_name: "ridership CSV",
                column,
                found: headers.iter().map(String::from).collect(),
            })
        };

        Ok(Self {
            station_id: find(STATION_ID_COLUMNS),
            station_name: require(STATION_NAME_COLUMNS, "station name")?,
            date: require(DATE_COLUMNS, "service date")?,
            rides: require(RIDES_COLUMNS, "rides")?,
        })
    }
}

/// Reads a ridership CSV and loads every matched row into `store`.
///
/// Records that cannot be decoded (invalid UTF-8, for example) are counted
/// as malformed like rows with an unparseable field.
#[tracing::instrument(skip(store, profile, reader))]
pub fn ingest_ridership_csv<S, R>(
    store: &S,
    city: &CityId,
    profile: &CityProfile,
    reader: R,
) -> Result<RidershipOutcome>
where
    S: StationStore + ?Sized,
    R: Read,
{
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let columns = RidershipColumns::detect(csv.headers()?)?;
    info!(?columns, "Detected ridership columns");

    let mut loader = RidershipLoader::new(store, city, profile)?;
    for result in csv.records() {
        // A bad record is skipped; only a failing reader ends the run.
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                loader.skip_malformed(&e);
                continue;
            }
        };
        let field = |i: usize| record.get(i).unwrap_or("");
        loader.push(
            columns.station_id.map_or("", field),
            field(columns.station_name),
            field(columns.date),
            field(columns.rides),
        )?;
    }
    loader.finish()
}
