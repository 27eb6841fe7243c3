//! Loading data into a [`StationStore`].
//!
//! * [`gtfs`]: canonical stations from a GTFS `stops.txt`.
//! * [`aliases`]: curated ridership-label aliases from the city profile.
//! * [`ridership`]: daily entries from a ridership CSV export.
//! * [`sync`]: daily entries from the Socrata API, plus retention pruning.
//!
//! The two ridership paths share [`RidershipLoader`], which validates each
//! row, resolves its station through the [`StationMatcher`] and writes rows
//! in batches.

pub mod aliases;
pub mod gtfs;
pub mod ridership;
pub mod sync;

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::{EtlError, Result};
use crate::matcher::{MatchOutcome, StationMatcher};
use crate::model::{CityId, RidershipRecord, StationId};
use crate::profile::CityProfile;
use crate::store::StationStore;

/// Daily rows are written in transactions of this many records.
pub const BATCH_SIZE: usize = 1000;

/// Counts for one ridership ingestion run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Rows read from the source.
    pub processed: usize,
    /// Rows written to the store.
    pub inserted: usize,
    /// Rows skipped because a field could not be parsed.
    pub malformed: usize,
    /// Rows skipped because no station matched.
    pub unmatched: usize,
    /// Distinct stations that received at least one row.
    pub stations: usize,
}

/// A ridership station reference that could not be matched, with the first
/// row it appeared in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnmatchedStation {
    pub raw_id: String,
    pub raw_name: String,
    pub first_date: NaiveDate,
    pub first_rides: u32,
    pub occurrences: usize,
    pub reason: String,
}

#[derive(Debug)]
pub struct RidershipOutcome {
    pub report: IngestReport,
    /// Ordered by occurrences, most frequent first.
    pub unmatched: Vec<UnmatchedStation>,
}

/// Accepts `MM/DD/YYYY`, `YYYY-MM-DD` and Socrata's
/// `YYYY-MM-DDTHH:MM:SS.fff` timestamps.
pub fn parse_service_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    let parsed = if value.contains('/') {
        NaiveDate::parse_from_str(value, "%m/%d/%Y")
    } else {
        let day = value.split_once('T').map_or(value, |(day, _)| day);
        NaiveDate::parse_from_str(day, "%Y-%m-%d")
    };
    parsed.map_err(|_| EtlError::InputMalformed {
        field: "service_date",
        value: value.to_string(),
    })
}

pub fn parse_entries(value: &str) -> Result<u32> {
    value.trim().parse().map_err(|_| EtlError::InputMalformed {
        field: "rides",
        value: value.to_string(),
    })
}

/// Validates, matches and batches ridership rows for one city.
pub struct RidershipLoader<'a, S: ?Sized> {
    store: &'a S,
    matcher: StationMatcher<'a, S>,
    batch: Vec<RidershipRecord>,
    report: IngestReport,
    stations: HashSet<StationId>,
    unmatched: BTreeMap<(String, String), UnmatchedStation>,
}

impl<'a, S: StationStore + ?Sized> RidershipLoader<'a, S> {
    pub fn new(store: &'a S, city: &CityId, profile: &'a CityProfile) -> Result<Self> {
        let matcher =
            StationMatcher::load(store, city, &profile.line_hints, &profile.special_cases)?;
        info!(
            stations = matcher.station_count(),
            aliases = matcher.alias_count(),
            "Loaded station registry"
        );
        Ok(Self {
            store,
            matcher,
            batch: Vec::with_capacity(BATCH_SIZE),
            report: IngestReport::default(),
            stations: HashSet::new(),
            unmatched: BTreeMap::new(),
        })
    }

    /// Handles one source row. Malformed and unmatched rows are counted and
    /// skipped; only a failed batch write is an error.
    pub fn push(&mut self, raw_id: &str, raw_name: &str, date: &str, rides: &str) -> Result<()> {
        self.report.processed += 1;

        let parsed = parse_service_date(date).and_then(|d| Ok((d, parse_entries(rides)?)));
        let (service_date, entries) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(raw_name, error = %e, "Skipping malformed ridership row");
                self.report.malformed += 1;
                return Ok(());
            }
        };

        let station_id = match self.matcher.match_station(raw_id, raw_name) {
            MatchOutcome::Matched { station_id, .. } => station_id,
            MatchOutcome::Unmatched { reason } => {
                self.report.unmatched += 1;
                self.unmatched
                    .entry((raw_id.to_string(), raw_name.to_string()))
                    .or_insert_with(|| UnmatchedStation {
                        raw_id: raw_id.to_string(),
                        raw_name: raw_name.to_string(),
                        first_date: service_date,
                        first_rides: entries,
                        occurrences: 0,
                        reason,
                    })
                    .occurrences += 1;
                return Ok(());
            }
        };

        self.stations.insert(station_id.clone());
        self.batch.push(RidershipRecord {
            station_id,
            service_date,
            entries,
        });
        if self.batch.len() >= BATCH_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    /// Counts a source row that could not be decoded at all.
    pub fn skip_malformed(&mut self, error: impl fmt::Display) {
        self.report.processed += 1;
        self.report.malformed += 1;
        warn!(error = %error, "Skipping undecodable ridership row");
    }

    fn flush(&mut self) -> Result<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        self.store
            .insert_ridership_batch(&self.batch)
            .map_err(|source| EtlError::Persistence {
                what: format!("ridership batch of {} rows", self.batch.len()),
                source,
            })?;
        self.report.inserted += self.batch.len();
        debug!(rows = self.batch.len(), total = self.report.inserted, "Wrote ridership batch");
        self.batch.clear();
        Ok(())
    }

    /// Writes the final partial batch and returns the run's counts.
    pub fn finish(mut self) -> Result<RidershipOutcome> {
        self.flush()?;
        self.report.stations = self.stations.len();

        let mut unmatched: Vec<_> = self.unmatched.into_values().collect();
        unmatched.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));

        info!(
            processed = self.report.processed,
            inserted = self.report.inserted,
            malformed = self.report.malformed,
            unmatched = self.report.unmatched,
            stations = self.report.stations,
            unmatched_names = unmatched.len(),
            "Ridership ingestion finished"
        );
        Ok(RidershipOutcome {
            report: self.report,
            unmatched,
        })
    }
}
