//! Percentile ranking of stations by recent ridership.

use tracing::{info, warn};

use crate::error::{EtlError, Result};
use crate::model::CityId;
use crate::scoring::aggregate::compute_aggregates;
use crate::scoring::types::{DataStatus, GhostScore, RidershipAggregate, ScoreReport};
use crate::store::StationStore;

const SUMMARY_MISSING_LIMIT: usize = 10;
const SUMMARY_TOP_LIMIT: usize = 5;

/// Assigns a ghost score to every aggregate.
///
/// Stations with data are sorted ascending by 30-day average (stable, so
/// equal averages keep their input order) and the station at rank `i` of `n`
/// scores `round(100 - 100 * (i + 1) / n)`. The quietest station therefore
/// gets the highest score and the busiest gets 0. Stations flagged
/// [`DataStatus::Missing`] are not compared and get [`GhostScore::NotComparable`].
///
/// Returns ranked stations in ascending average order followed by missing
/// stations in input order.
pub fn score(aggregates: Vec<RidershipAggregate>) -> Result<Vec<RidershipAggregate>> {
    if aggregates.is_empty() {
        return Err(EtlError::EmptyInput("empty aggregate set".to_string()));
    }

    let (mut with_data, mut missing): (Vec<_>, Vec<_>) = aggregates
        .into_iter()
        .partition(|a| a.data_status == DataStatus::Normal);

    with_data.sort_by(|a, b| a.rolling_30d_avg.total_cmp(&b.rolling_30d_avg));

    let n = with_data.len() as f64;
    for (i, aggregate) in with_data.iter_mut().enumerate() {
        let percentile = (i + 1) as f64 / n;
        aggregate.ghost_score = Some(GhostScore::ranked(
            (100.0 - percentile * 100.0).round() as i64,
        ));
    }
    for aggregate in &mut missing {
        aggregate.ghost_score = Some(GhostScore::NotComparable);
    }

    with_data.append(&mut missing);
    Ok(with_data)
}

/// Recomputes and persists the ghost scores of every station in `city`.
///
/// Each station is written back independently. A failed write is logged and
/// counted in [`ScoreReport::write_failures`]; the remaining stations are
/// still written.
#[tracing::instrument(skip(store))]
pub fn compute_ghost_scores<S: StationStore + ?Sized>(
    store: &S,
    city: &CityId,
) -> Result<ScoreReport> {
    let stations = store.stations(city)?;
    let rows = store.ridership(city)?;
    info!(
        stations = stations.len(),
        rows = rows.len(),
        "Computing station aggregates"
    );

    let scored = score(compute_aggregates(&stations, &rows))?;

    let mut report = ScoreReport {
        total: scored.len(),
        ..Default::default()
    };
    for aggregate in &scored {
        match aggregate.data_status {
            DataStatus::Normal => report.with_data += 1,
            DataStatus::Missing => report.missing += 1,
        }
        if let Err(e) = store.upsert_metrics(aggregate) {
            warn!(
                station_id = %aggregate.station_id,
                error = %e,
                "Failed to write station metrics"
            );
            report.write_failures += 1;
        }
    }

    log_summary(&scored, &report);
    Ok(report)
}

fn log_summary(scored: &[RidershipAggregate], report: &ScoreReport) {
    info!(
        total = report.total,
        with_data = report.with_data,
        missing = report.missing,
        write_failures = report.write_failures,
        "Ghost scores computed"
    );

    let missing: Vec<&str> = scored
        .iter()
        .filter(|a| a.data_status == DataStatus::Missing)
        .map(|a| a.name.as_str())
        .collect();
    if !missing.is_empty() {
        let shown = &missing[..missing.len().min(SUMMARY_MISSING_LIMIT)];
        info!(
            count = missing.len(),
            stations = ?shown,
            "Stations without recent ridership"
        );
    }

    let ranked: Vec<&RidershipAggregate> = scored
        .iter()
        .filter(|a| a.data_status == DataStatus::Normal)
        .collect();
    for a in ranked.iter().take(SUMMARY_TOP_LIMIT) {
        info!(
            station = %a.name,
            ghost_score = %a.ghost_score.unwrap_or(GhostScore::NotComparable),
            rolling_30d_avg = format!("{:.0}", a.rolling_30d_avg),
            "Top ghost station"
        );
    }
    for a in ranked.iter().rev().take(SUMMARY_TOP_LIMIT) {
        info!(
            station = %a.name,
            ghost_score = %a.ghost_score.unwrap_or(GhostScore::NotComparable),
            rolling_30d_avg = format!("{:.0}", a.rolling_30d_avg),
            "Busiest station"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RidershipRecord, Station, StationId};
    use crate::store::MemoryStore;
    use chrono::NaiveDate;

    fn agg(name: &str, avg: f64) -> RidershipAggregate {
        RidershipAggregate {
            station_id: StationId::new(name),
            name: name.to_string(),
            last_day_entries: avg as u32,
            rolling_30d_avg: avg,
            rolling_90d_avg: avg,
            service_date_max: NaiveDate::from_ymd_opt(2024, 3, 31),
            data_status: DataStatus::Normal,
            ghost_score: None,
        }
    }

    fn score_of(scored: &[RidershipAggregate], name: &str) -> i32 {
        scored
            .iter()
            .find(|a| a.name == name)
            .and_then(|a| a.ghost_score)
            .map(|s| s.as_i32())
            .unwrap()
    }

    #[test]
    fn test_percentile_scores() {
        let input = vec![
            agg("a", 100.0),
            agg("b", 50.0),
            agg("c", 200.0),
            agg("d", 10.0),
            agg("e", 75.0),
        ];
        let scored = score(input).unwrap();

        let scores: Vec<i32> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|n| score_of(&scored, n))
            .collect();
        assert_eq!(scores, vec![20, 60, 0, 80, 40]);

        let order: Vec<&str> = scored.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(order, vec!["d", "b", "e", "a", "c"]);
    }

    #[test]
    fn test_lower_average_never_scores_lower() {
        let input: Vec<_> = [3.0, 9.0, 1.0, 4.0, 1.5, 9.0, 2.6, 5.0]
            .iter()
            .enumerate()
            .map(|(i, avg)| agg(&format!("s{i}"), *avg))
            .collect();
        let scored = score(input).unwrap();

        for pair in scored.windows(2) {
            assert!(pair[0].rolling_30d_avg <= pair[1].rolling_30d_avg);
            assert!(pair[0].ghost_score.unwrap().as_i32() >= pair[1].ghost_score.unwrap().as_i32());
        }
        assert!(scored
            .iter()
            .all(|a| (0..=100).contains(&a.ghost_score.unwrap().as_i32())));
    }

    #[test]
    fn test_single_station_scores_zero() {
        let scored = score(vec![agg("only", 42.0)]).unwrap();
        assert_eq!(scored[0].ghost_score, Some(GhostScore::Ranked(0)));
    }

    #[test]
    fn test_missing_stations_get_sentinel_and_come_last() {
        let input = vec![
            RidershipAggregate::missing(StationId::new("m1"), "m1"),
            agg("a", 10.0),
            RidershipAggregate::missing(StationId::new("m2"), "m2"),
            agg("b", 20.0),
        ];
        let scored = score(input).unwrap();

        let order: Vec<&str> = scored.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "m1", "m2"]);
        assert_eq!(score_of(&scored, "m1"), GhostScore::SENTINEL);
        assert_eq!(score_of(&scored, "a"), 50);
        assert_eq!(score_of(&scored, "b"), 0);
    }

    #[test]
    fn test_all_missing_skips_ranking() {
        let input = vec![
            RidershipAggregate::missing(StationId::new("m1"), "m1"),
            RidershipAggregate::missing(StationId::new("m2"), "m2"),
        ];
        let scored = score(input).unwrap();
        assert!(scored
            .iter()
            .all(|a| a.ghost_score == Some(GhostScore::NotComparable)));
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(matches!(score(vec![]), Err(EtlError::EmptyInput(_))));
    }

    #[test]
    fn test_equal_averages_keep_input_order() {
        let scored = score(vec![agg("first", 5.0), agg("second", 5.0)]).unwrap();
        assert_eq!(scored[0].name, "first");
        assert_eq!(score_of(&scored, "first"), 50);
        assert_eq!(score_of(&scored, "second"), 0);
    }

    fn seeded_store() -> (MemoryStore, CityId) {
        let store = MemoryStore::new();
        let city = store.city_id("chicago", "Chicago CTA").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let mut rows = Vec::new();
        for (id, entries) in [("s1", Some(100)), ("s2", Some(5)), ("s3", None)] {
            store.insert_station(
                &city,
                Station {
                    id: StationId::new(id),
                    name: id.to_uppercase(),
                    latitude: 0.0,
                    longitude: 0.0,
                    lines: vec![],
                    external_id: None,
                    ridership_source_id: None,
                },
            );
            if let Some(entries) = entries {
                rows.push(RidershipRecord {
                    station_id: StationId::new(id),
                    service_date: date,
                    entries,
                });
            }
        }
        store.insert_ridership_batch(&rows).unwrap();
        (store, city)
    }

    #[test]
    fn test_compute_ghost_scores_writes_metrics() {
        let (store, city) = seeded_store();

        let report = compute_ghost_scores(&store, &city).unwrap();
        assert_eq!(
            report,
            ScoreReport { total: 3, with_data: 2, missing: 1, write_failures: 0 }
        );

        let metrics = store.metrics(&city).unwrap();
        let names: Vec<&str> = metrics.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["S2", "S1", "S3"]);
        assert_eq!(metrics[0].ghost_score, Some(GhostScore::Ranked(50)));
        assert_eq!(metrics[2].ghost_score, Some(GhostScore::NotComparable));
    }

    #[test]
    fn test_failed_write_back_does_not_stop_the_run() {
        let (store, city) = seeded_store();
        store.reject_writes_for(&StationId::new("s2"));

        let report = compute_ghost_scores(&store, &city).unwrap();
        assert_eq!(report.write_failures, 1);
        assert_eq!(store.metrics(&city).unwrap().len(), 2);
    }

    #[test]
    fn test_city_without_stations_is_empty_input() {
        let store = MemoryStore::new();
        let city = store.city_id("chicago", "").unwrap();
        assert!(matches!(
            compute_ghost_scores(&store, &city),
            Err(EtlError::EmptyInput(_))
        ));
    }
}
