//! Canonical station data shared by the matcher, the store and ingestion.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! impl_identifier {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

impl_identifier!(StationId);
impl_identifier!(CityId);

/// A canonical station, as built from the GTFS feed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Serving lines in feed order.
    pub lines: Vec<String>,
    /// GTFS `stop_id` of the parent station.
    pub external_id: Option<String>,
    /// Identifier the ridership dataset uses for this station, learned by the matcher.
    pub ridership_source_id: Option<String>,
}

impl Station {
    /// Returns `true` if the station serves `line` (ASCII case-insensitive).
    pub fn serves(&self, line: &str) -> bool {
        self.lines.iter().any(|l| l.eq_ignore_ascii_case(line))
    }
}

/// Station fields as read from the GTFS feed, before the store assigns an id.
#[derive(Clone, Debug, PartialEq)]
pub struct NewStation {
    pub external_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub lines: Vec<String>,
}

/// A known alternate spelling of a station.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StationAlias {
    pub station_id: StationId,
    pub alias_name: String,
    pub normalized: String,
}

/// One day of ridership for one station.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RidershipRecord {
    pub station_id: StationId,
    pub service_date: NaiveDate,
    pub entries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_ordering_is_lexical() {
        let mut ids = vec![StationId::new("b"), StationId::new("a"), StationId::new("c")];
        ids.sort();
        assert_eq!(ids, vec![StationId::new("a"), StationId::new("b"), StationId::new("c")]);
    }

    #[test]
    fn test_identifier_display() {
        let id: CityId = "chicago".into();
        assert_eq!(format!("{}", id), "chicago");
    }

    #[test]
    fn test_serves_ignores_case() {
        let station = Station {
            id: StationId::new("s1"),
            name: "Clark/Lake".to_string(),
            latitude: 41.88,
            longitude: -87.63,
            lines: vec!["Blue".to_string(), "Green".to_string()],
            external_id: Some("40380".to_string()),
            ridership_source_id: None,
        };
        assert!(station.serves("green"));
        assert!(station.serves("Blue"));
        assert!(!station.serves("Red"));
    }
}
