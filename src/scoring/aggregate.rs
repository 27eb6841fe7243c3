use crate::model::{RidershipRecord, Station, StationId};
use crate::scoring::types::{DataStatus, RidershipAggregate};
use crate::scoring::utility::mean;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

/// Short lookback window; also decides [`DataStatus`].
pub const SHORT_WINDOW_DAYS: i64 = 30;
pub const LONG_WINDOW_DAYS: i64 = 90;

/// Rolls daily ridership rows up into one [`RidershipAggregate`] per station.
///
/// Windows are anchored on the most recent service date across all `rows`,
/// not on today, so a dataset that lags by a few weeks still produces
/// comparable averages. A station is `missing` when it has no row on or
/// after `anchor - 30 days`.
///
/// Output follows the order of `stations`; rows for unknown stations are
/// ignored.
pub fn compute_aggregates(
    stations: &[Station],
    rows: &[RidershipRecord],
) -> Vec<RidershipAggregate> {
    let Some(anchor) = rows.iter().map(|r| r.service_date).max() else {
        return stations
            .iter()
            .map(|s| RidershipAggregate::missing(s.id.clone(), &s.name))
            .collect();
    };

    let short_start = anchor - Duration::days(SHORT_WINDOW_DAYS);
    let long_start = anchor - Duration::days(LONG_WINDOW_DAYS);

    let mut by_station: HashMap<&StationId, Vec<(NaiveDate, u32)>> = HashMap::new();
    for row in rows {
        by_station
            .entry(&row.station_id)
            .or_default()
            .push((row.service_date, row.entries));
    }

    stations
        .iter()
        .map(|station| {
            let series = by_station.get(&station.id).map(Vec::as_slice).unwrap_or(&[]);
            // Rows are unique per date, so the max date has exactly one entry count.
            let Some((last_date, last_entries)) =
                series.iter().copied().max_by_key(|(date, _)| *date)
            else {
                return RidershipAggregate::missing(station.id.clone(), &station.name);
            };

            let window = |start: NaiveDate| -> Vec<f64> {
                series
                    .iter()
                    .filter(|(date, _)| *date >= start)
                    .map(|(_, entries)| f64::from(*entries))
                    .collect()
            };
            let short = window(short_start);
            let long = window(long_start);

            RidershipAggregate {
                station_id: station.id.clone(),
                name: station.name.clone(),
                last_day_entries: last_entries,
                rolling_30d_avg: mean(&short),
                rolling_90d_avg: mean(&long),
                service_date_max: Some(last_date),
                data_status: if short.is_empty() {
                    DataStatus::Missing
                } else {
                    DataStatus::Normal
                },
                ghost_score: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str, name: &str) -> Station {
        Station {
            id: StationId::new(id),
            name: name.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            lines: vec![],
            external_id: None,
            ridership_source_id: None,
        }
    }

    fn row(id: &str, date: &str, entries: u32) -> RidershipRecord {
        RidershipRecord {
            station_id: StationId::new(id),
            service_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            entries,
        }
    }

    #[test]
    fn test_windows_are_anchored_on_latest_service_date() {
        let stations = [station("a", "Austin"), station("b", "Belmont")];
        let rows = [
            row("a", "2024-03-31", 100),
            row("a", "2024-03-30", 300),
            row("a", "2024-02-15", 1000),
            row("a", "2023-11-01", 5000),
            row("b", "2024-03-01", 40),
        ];

        let aggs = compute_aggregates(&stations, &rows);

        assert_eq!(aggs[0].station_id, StationId::new("a"));
        assert_eq!(aggs[0].last_day_entries, 100);
        assert_eq!(aggs[0].rolling_30d_avg, 200.0);
        assert_eq!(aggs[0].rolling_90d_avg, 1400.0 / 3.0);
        assert_eq!(aggs[0].data_status, DataStatus::Normal);
        assert_eq!(
            aggs[0].service_date_max,
            NaiveDate::from_ymd_opt(2024, 3, 31)
        );

        // 2024-03-01 is exactly anchor - 30 days, inside the window.
        assert_eq!(aggs[1].rolling_30d_avg, 40.0);
        assert_eq!(aggs[1].data_status, DataStatus::Normal);
    }

    #[test]
    fn test_station_outside_short_window_is_missing() {
        let stations = [station("a", "Austin"), station("b", "Belmont")];
        let rows = [row("a", "2024-03-31", 10), row("b", "2024-02-01", 70)];

        let aggs = compute_aggregates(&stations, &rows);

        assert_eq!(aggs[1].data_status, DataStatus::Missing);
        assert_eq!(aggs[1].rolling_30d_avg, 0.0);
        assert_eq!(aggs[1].rolling_90d_avg, 70.0);
        assert_eq!(aggs[1].last_day_entries, 70);
    }

    #[test]
    fn test_no_rows_marks_every_station_missing() {
        let stations = [station("a", "Austin"), station("b", "Belmont")];
        let aggs = compute_aggregates(&stations, &[]);
        assert!(aggs.iter().all(|a| a.data_status == DataStatus::Missing));
        assert!(aggs.iter().all(|a| a.service_date_max.is_none()));
    }

    #[test]
    fn test_rows_for_unknown_stations_are_ignored() {
        let stations = [station("a", "Austin")];
        let rows = [row("a", "2024-03-31", 10), row("zzz", "2024-04-30", 999)];
        let aggs = compute_aggregates(&stations, &rows);
        assert_eq!(aggs.len(), 1);
        // The anchor still comes from all rows.
        assert_eq!(aggs[0].data_status, DataStatus::Missing);
    }
}
