//! Data types used by the scoring pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::StationId;

/// Whether a station had any ridership rows in the lookback window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataStatus {
    Normal,
    Missing,
}

impl DataStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataStatus::Normal => "normal",
            DataStatus::Missing => "missing",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "normal" => Some(DataStatus::Normal),
            "missing" => Some(DataStatus::Missing),
            _ => None,
        }
    }
}

/// Comparative ranking of a station within one city.
///
/// Persisted as an integer: `0..=100` for ranked stations, `-1` for stations
/// without data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GhostScore {
    /// Higher means lower relative ridership.
    Ranked(u8),
    /// No ridership in the window, so the station is not comparable.
    NotComparable,
}

impl GhostScore {
    pub const SENTINEL: i32 = -1;

    /// Builds a ranked score, clamping into `0..=100`.
    pub fn ranked(value: i64) -> Self {
        GhostScore::Ranked(value.clamp(0, 100) as u8)
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            GhostScore::Ranked(v) => i32::from(*v),
            GhostScore::NotComparable => Self::SENTINEL,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        if value < 0 {
            GhostScore::NotComparable
        } else {
            GhostScore::ranked(i64::from(value))
        }
    }
}

impl fmt::Display for GhostScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// Recent-ridership summary for one station.
#[derive(Clone, Debug, PartialEq)]
pub struct RidershipAggregate {
    pub station_id: StationId,
    pub name: String,
    /// Entries on the station's most recent service date.
    pub last_day_entries: u32,
    pub rolling_30d_avg: f64,
    pub rolling_90d_avg: f64,
    pub service_date_max: Option<NaiveDate>,
    pub data_status: DataStatus,
    /// `None` until the ghost score engine has run.
    pub ghost_score: Option<GhostScore>,
}

impl RidershipAggregate {
    /// An aggregate for a station that has no ridership rows at all.
    pub fn missing(station_id: StationId, name: impl Into<String>) -> Self {
        Self {
            station_id,
            name: name.into(),
            last_day_entries: 0,
            rolling_30d_avg: 0.0,
            rolling_90d_avg: 0.0,
            service_date_max: None,
            data_status: DataStatus::Missing,
            ghost_score: None,
        }
    }
}

/// Counts produced by one scoring run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScoreReport {
    pub total: usize,
    pub with_data: usize,
    pub missing: usize,
    /// Stations whose score could not be written back.
    pub write_failures: usize,
}
