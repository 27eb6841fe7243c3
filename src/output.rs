//! Reports written after ingestion and scoring.
//!
//! Supports the unmatched-station reports (Markdown and CSV) and a
//! serializable station listing for the CLI.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::ingest::UnmatchedStation;
use crate::scoring::types::RidershipAggregate;
use csv::WriterBuilder;

/// One line of `list-stations` output.
#[derive(Debug, Serialize)]
pub struct StationRow<'a> {
    pub station_id: &'a str,
    pub name: &'a str,
    pub ghost_score: i32,
    pub rolling_30d_avg: f64,
    pub rolling_90d_avg: f64,
    pub last_day_entries: u32,
    pub service_date_max: Option<String>,
    pub data_status: &'static str,
}

impl<'a> From<&'a RidershipAggregate> for StationRow<'a> {
    fn from(a: &'a RidershipAggregate) -> Self {
        Self {
            station_id: a.station_id.as_str(),
            name: &a.name,
            ghost_score: a.ghost_score.map_or(-1, |s| s.as_i32()),
            rolling_30d_avg: a.rolling_30d_avg,
            rolling_90d_avg: a.rolling_90d_avg,
            last_day_entries: a.last_day_entries,
            service_date_max: a.service_date_max.map(|d| d.format("%Y-%m-%d").to_string()),
            data_status: a.data_status.as_str(),
        }
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    Ok(())
}

/// Writes the Markdown report of ridership labels that matched no station.
///
/// Replaces any previous report at `path`.
pub fn write_unmatched_markdown(
    path: &Path,
    city_name: &str,
    unmatched: &[UnmatchedStation],
) -> Result<()> {
    ensure_parent(path)?;
    let mut out = String::new();

    out.push_str(&format!("# {city_name} Unmatched Stations Report\n\n"));
    out.push_str(
        "The following station names from the ridership data could not be matched to GTFS stations:\n\n",
    );
    out.push_str("| Station ID | Station Name | Occurrences | Reason |\n");
    out.push_str("|------------|--------------|-------------|--------|\n");
    for u in unmatched {
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            u.raw_id,
            u.raw_name.replace('|', "\\|"),
            u.occurrences,
            u.reason.replace('|', "\\|"),
        ));
    }
    out.push_str("\n## Resolution Steps\n\n");
    out.push_str("1. Check if these are old or renamed stations\n");
    out.push_str("2. Add an alias pair or special case to the city profile\n");
    out.push_str("3. Some may be bus terminals or non-rail stations\n");

    let mut file =
        fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(out.as_bytes())?;

    info!(path = %path.display(), stations = unmatched.len(), "Wrote unmatched stations report");
    Ok(())
}

#[derive(Serialize)]
struct UnmatchedRow<'a> {
    station_id: &'a str,
    stationname: &'a str,
    date: String,
    rides: u32,
    occurrences: usize,
}

/// Writes unmatched ridership references as CSV, one row per distinct
/// `(station_id, stationname)` with its first-seen date and ride count.
pub fn write_unmatched_csv(path: &Path, unmatched: &[UnmatchedStation]) -> Result<()> {
    ensure_parent(path)?;
    debug!(path = %path.display(), rows = unmatched.len(), "Writing unmatched CSV");

    let mut writer = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    for u in unmatched {
        writer.serialize(UnmatchedRow {
            station_id: &u.raw_id,
            stationname: &u.raw_name,
            date: u.first_date.format("%Y-%m-%d").to_string(),
            rides: u.first_rides,
            occurrences: u.occurrences,
        })?;
    }
    writer.flush()?;

    info!(path = %path.display(), stations = unmatched.len(), "Wrote unmatched stations CSV");
    Ok(())
}

/// Writes station rows as CSV to any writer.
pub fn write_station_rows<W: Write>(out: W, metrics: &[RidershipAggregate]) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(out);
    for m in metrics {
        writer.serialize(StationRow::from(m))?;
    }
    writer.flush()?;
    Ok(())
}

/// Serializes station rows as pretty-printed JSON.
pub fn station_rows_json(metrics: &[RidershipAggregate]) -> Result<String> {
    let rows: Vec<StationRow> = metrics.iter().map(StationRow::from).collect();
    Ok(serde_json::to_string_pretty(&rows)?)
}
