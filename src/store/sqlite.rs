use chrono::NaiveDate;
use rusqlite::{Connection, params};
use tracing::{debug, warn};

use super::{StationStore, StoreResult, prune_cutoff};
use crate::error::StoreError;
use crate::model::{CityId, NewStation, RidershipRecord, Station, StationAlias, StationId};
use crate::scoring::types::{DataStatus, GhostScore, RidershipAggregate};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS City (
    id   TEXT PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS Station (
    id                TEXT PRIMARY KEY,
    cityId            TEXT NOT NULL REFERENCES City(id),
    externalId        TEXT,
    name              TEXT NOT NULL,
    latitude          REAL NOT NULL,
    longitude         REAL NOT NULL,
    lines             TEXT NOT NULL DEFAULT '[]',
    ridershipSourceId TEXT,
    UNIQUE (cityId, externalId)
);
CREATE TABLE IF NOT EXISTS StationAlias (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    stationId  TEXT NOT NULL REFERENCES Station(id),
    aliasName  TEXT NOT NULL,
    normalized TEXT NOT NULL,
    UNIQUE (stationId, normalized)
);
CREATE INDEX IF NOT EXISTS StationAlias_normalized ON StationAlias(normalized);
CREATE TABLE IF NOT EXISTS RidershipDaily (
    stationId   TEXT NOT NULL REFERENCES Station(id),
    serviceDate TEXT NOT NULL,
    entries     INTEGER NOT NULL,
    PRIMARY KEY (stationId, serviceDate)
);
CREATE TABLE IF NOT EXISTS StationMetrics (
    stationId      TEXT PRIMARY KEY REFERENCES Station(id),
    lastDayEntries INTEGER NOT NULL,
    rolling30dAvg  REAL NOT NULL,
    rolling90dAvg  REAL NOT NULL,
    ghostScore     INTEGER NOT NULL,
    dataStatus     TEXT NOT NULL,
    serviceDateMax TEXT,
    lastUpdated    TEXT NOT NULL DEFAULT (datetime('now'))
);
";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// [`StationStore`] backed by a SQLite database.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) the database at `database_url` and applies the schema.
    ///
    /// Prisma-style `file:` URLs are accepted.
    pub fn open(database_url: &str) -> StoreResult<Self> {
        let path = database_url.strip_prefix("file:").unwrap_or(database_url);
        debug!(path, "Opening SQLite store");
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }
}

fn parse_date(value: &str) -> StoreResult<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| StoreError::Date(value.to_string()))
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

impl StationStore for SqliteStore {
    fn city_id(&self, code: &str, name: &str) -> StoreResult<CityId> {
        self.conn.execute(
            "INSERT INTO City (id, code, name) VALUES (lower(hex(randomblob(16))), ?1, ?2)
             ON CONFLICT(code) DO NOTHING",
            params![code, name],
        )?;
        let id: String =
            self.conn
                .query_row("SELECT id FROM City WHERE code = ?1", params![code], |row| {
                    row.get(0)
                })?;
        Ok(CityId::new(id))
    }

    fn upsert_station(&self, city: &CityId, station: &NewStation) -> StoreResult<StationId> {
        let lines = serde_json::to_string(&station.lines)?;
        let id: String = self.conn.query_row(
            "INSERT INTO Station (id, cityId, externalId, name, latitude, longitude, lines)
             VALUES (lower(hex(randomblob(16))), ?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(cityId, externalId) DO UPDATE SET
                name = excluded.name,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                lines = excluded.lines
             RETURNING id",
            params![
                city.as_str(),
                station.external_id,
                station.name,
                station.latitude,
                station.longitude,
                lines
            ],
            |row| row.get(0),
        )?;
        Ok(StationId::new(id))
    }

    fn stations(&self, city: &CityId) -> StoreResult<Vec<Station>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, latitude, longitude, lines, externalId, ridershipSourceId
             FROM Station WHERE cityId = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![city.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(|(id, name, latitude, longitude, lines, external_id, ridership_source_id)| {
                let lines = serde_json::from_str(&lines).unwrap_or_else(|e| {
                    warn!(station_id = %id, error = %e, "Unreadable station lines, treating as none");
                    Vec::new()
                });
                Station {
                    id: StationId::new(id),
                    name,
                    latitude,
                    longitude,
                    lines,
                    external_id,
                    ridership_source_id,
                }
            })
            .collect())
    }

    fn create_alias(
        &self,
        station: &StationId,
        alias_name: &str,
        normalized: &str,
    ) -> StoreResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO StationAlias (stationId, aliasName, normalized)
             VALUES (?1, ?2, ?3)",
            params![station.as_str(), alias_name, normalized],
        )?;
        Ok(inserted > 0)
    }

    fn aliases(&self, city: &CityId) -> StoreResult<Vec<StationAlias>> {
        let mut stmt = self.conn.prepare(
            "SELECT sa.stationId, sa.aliasName, sa.normalized
             FROM StationAlias sa
             JOIN Station s ON s.id = sa.stationId
             WHERE s.cityId = ?1
             ORDER BY sa.id",
        )?;
        let aliases = stmt
            .query_map(params![city.as_str()], |row| {
                Ok(StationAlias {
                    station_id: StationId::new(row.get::<_, String>(0)?),
                    alias_name: row.get(1)?,
                    normalized: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(aliases)
    }

    fn set_ridership_source_id(&self, station: &StationId, raw_id: &str) -> StoreResult<()> {
        let updated = self.conn.execute(
            "UPDATE Station SET ridershipSourceId = ?1 WHERE id = ?2",
            params![raw_id, station.as_str()],
        )?;
        if updated == 0 {
            return Err(StoreError::StationNotFound(station.clone()));
        }
        Ok(())
    }

    fn insert_ridership_batch(&self, records: &[RidershipRecord]) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO RidershipDaily (stationId, serviceDate, entries)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(stationId, serviceDate) DO UPDATE SET entries = excluded.entries",
            )?;
            for r in records {
                stmt.execute(params![
                    r.station_id.as_str(),
                    format_date(r.service_date),
                    r.entries
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn ridership(&self, city: &CityId) -> StoreResult<Vec<RidershipRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT rd.stationId, rd.serviceDate, rd.entries
             FROM RidershipDaily rd
             JOIN Station s ON s.id = rd.stationId
             WHERE s.cityId = ?1
             ORDER BY rd.stationId, rd.serviceDate",
        )?;
        let rows = stmt
            .query_map(params![city.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(station_id, date, entries)| -> StoreResult<RidershipRecord> {
                Ok(RidershipRecord {
                    station_id: StationId::new(station_id),
                    service_date: parse_date(&date)?,
                    entries,
                })
            })
            .collect()
    }

    fn ridership_count(&self, city: &CityId) -> StoreResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM RidershipDaily rd
             JOIN Station s ON s.id = rd.stationId
             WHERE s.cityId = ?1",
            params![city.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn ridership_date_range(&self, city: &CityId) -> StoreResult<Option<(NaiveDate, NaiveDate)>> {
        let (min, max): (Option<String>, Option<String>) = self.conn.query_row(
            "SELECT MIN(rd.serviceDate), MAX(rd.serviceDate)
             FROM RidershipDaily rd
             JOIN Station s ON s.id = rd.stationId
             WHERE s.cityId = ?1",
            params![city.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        match (min, max) {
            (Some(min), Some(max)) => Ok(Some((parse_date(&min)?, parse_date(&max)?))),
            _ => Ok(None),
        }
    }

    fn prune_ridership(&self, city: &CityId, retention_days: i64) -> StoreResult<usize> {
        let latest = self.ridership_date_range(city)?.map(|(_, max)| max);
        let Some(cutoff) = prune_cutoff(latest, retention_days) else {
            return Ok(0);
        };
        let deleted = self.conn.execute(
            "DELETE FROM RidershipDaily
             WHERE serviceDate < ?1
             AND stationId IN (SELECT id FROM Station WHERE cityId = ?2)",
            params![format_date(cutoff), city.as_str()],
        )?;
        Ok(deleted)
    }

    fn upsert_metrics(&self, aggregate: &RidershipAggregate) -> StoreResult<()> {
        let score = aggregate
            .ghost_score
            .unwrap_or(GhostScore::NotComparable)
            .as_i32();
        self.conn.execute(
            "INSERT INTO StationMetrics (
                stationId, lastDayEntries, rolling30dAvg, rolling90dAvg,
                ghostScore, dataStatus, serviceDateMax, lastUpdated
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
             ON CONFLICT(stationId) DO UPDATE SET
                lastDayEntries = excluded.lastDayEntries,
                rolling30dAvg = excluded.rolling30dAvg,
                rolling90dAvg = excluded.rolling90dAvg,
                ghostScore = excluded.ghostScore,
                dataStatus = excluded.dataStatus,
                serviceDateMax = excluded.serviceDateMax,
                lastUpdated = excluded.lastUpdated",
            params![
                aggregate.station_id.as_str(),
                aggregate.last_day_entries,
                aggregate.rolling_30d_avg,
                aggregate.rolling_90d_avg,
                score,
                aggregate.data_status.as_str(),
                aggregate.service_date_max.map(format_date),
            ],
        )?;
        Ok(())
    }

    fn metrics(&self, city: &CityId) -> StoreResult<Vec<RidershipAggregate>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.stationId, s.name, m.lastDayEntries, m.rolling30dAvg, m.rolling90dAvg,
                    m.serviceDateMax, m.dataStatus, m.ghostScore
             FROM StationMetrics m
             JOIN Station s ON s.id = m.stationId
             WHERE s.cityId = ?1
             ORDER BY m.ghostScore DESC, s.name",
        )?;
        let rows = stmt
            .query_map(params![city.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i32>(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, name, last_day, avg30, avg90, date_max, status, score)| -> StoreResult<RidershipAggregate> {
                Ok(RidershipAggregate {
                    station_id: StationId::new(id),
                    name,
                    last_day_entries: last_day,
                    rolling_30d_avg: avg30,
                    rolling_90d_avg: avg90,
                    service_date_max: date_max.as_deref().map(parse_date).transpose()?,
                    data_status: DataStatus::parse(&status).unwrap_or(DataStatus::Missing),
                    ghost_score: Some(GhostScore::from_i32(score)),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(external_id: &str, name: &str, lines: &[&str]) -> NewStation {
        NewStation {
            external_id: external_id.to_string(),
            name: name.to_string(),
            latitude: 41.88,
            longitude: -87.63,
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_city_id_is_stable() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = store.city_id("chicago", "Chicago CTA").unwrap();
        let second = store.city_id("chicago", "").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_upsert_station_keeps_id_and_learned_identifier() {
        let store = SqliteStore::open_in_memory().unwrap();
        let city = store.city_id("chicago", "Chicago CTA").unwrap();

        let id = store
            .upsert_station(&city, &station("40380", "Clark/Lake", &["Blue"]))
            .unwrap();
        store.set_ridership_source_id(&id, "40380").unwrap();

        let again = store
            .upsert_station(&city, &station("40380", "Clark/Lake", &["Blue", "Green"]))
            .unwrap();
        assert_eq!(id, again);

        let stations = store.stations(&city).unwrap();
        assert_eq!(stations.len(), 1);
        assert_eq!(stations[0].lines, vec!["Blue", "Green"]);
        assert_eq!(stations[0].ridership_source_id.as_deref(), Some("40380"));
    }

    #[test]
    fn test_corrupt_lines_do_not_hide_the_station() {
        let store = SqliteStore::open_in_memory().unwrap();
        let city = store.city_id("chicago", "Chicago CTA").unwrap();
        store
            .upsert_station(&city, &station("40380", "Clark/Lake", &["Blue"]))
            .unwrap();
        store
            .upsert_station(&city, &station("41290", "Kimball", &["Brown"]))
            .unwrap();
        store
            .conn
            .execute("UPDATE Station SET lines = 'Blue,Green' WHERE externalId = '40380'", [])
            .unwrap();

        let mut stations = store.stations(&city).unwrap();
        stations.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(stations.len(), 2);
        assert!(stations[0].lines.is_empty());
        assert_eq!(stations[1].lines, vec!["Brown"]);
    }

    #[test]
    fn test_alias_insert_or_ignore() {
        let store = SqliteStore::open_in_memory().unwrap();
        let city = store.city_id("chicago", "Chicago CTA").unwrap();
        let id = store
            .upsert_station(&city, &station("40890", "O'Hare", &["Blue"]))
            .unwrap();

        assert!(store.create_alias(&id, "O'Hare Airport", "ohare airport").unwrap());
        assert!(!store.create_alias(&id, "O'Hare Airport", "ohare airport").unwrap());
        assert_eq!(store.aliases(&city).unwrap().len(), 1);
    }

    #[test]
    fn test_set_ridership_source_id_unknown_station() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .set_ridership_source_id(&StationId::new("nope"), "1")
            .unwrap_err();
        assert!(matches!(err, StoreError::StationNotFound(_)));
    }

    #[test]
    fn test_ridership_upsert_range_and_prune() {
        let store = SqliteStore::open_in_memory().unwrap();
        let city = store.city_id("chicago", "Chicago CTA").unwrap();
        let id = store
            .upsert_station(&city, &station("40380", "Clark/Lake", &["Blue"]))
            .unwrap();

        let rows: Vec<_> = ["2024-01-01", "2024-01-20", "2024-02-01"]
            .iter()
            .map(|d| RidershipRecord {
                station_id: id.clone(),
                service_date: date(d),
                entries: 100,
            })
            .collect();
        store.insert_ridership_batch(&rows).unwrap();
        store
            .insert_ridership_batch(&[RidershipRecord {
                station_id: id.clone(),
                service_date: date("2024-02-01"),
                entries: 250,
            }])
            .unwrap();

        assert_eq!(store.ridership_count(&city).unwrap(), 3);
        assert_eq!(
            store.ridership_date_range(&city).unwrap(),
            Some((date("2024-01-01"), date("2024-02-01")))
        );
        let latest = store
            .ridership(&city)
            .unwrap()
            .into_iter()
            .find(|r| r.service_date == date("2024-02-01"))
            .unwrap();
        assert_eq!(latest.entries, 250);

        assert_eq!(store.prune_ridership(&city, 15).unwrap(), 1);
        assert_eq!(store.ridership_count(&city).unwrap(), 2);
    }

    #[test]
    fn test_prune_without_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        let city = store.city_id("chicago", "Chicago CTA").unwrap();
        assert_eq!(store.prune_ridership(&city, 30).unwrap(), 0);
        assert_eq!(store.ridership_date_range(&city).unwrap(), None);
    }

    #[test]
    fn test_metrics_round_trip_with_sentinel() {
        let store = SqliteStore::open_in_memory().unwrap();
        let city = store.city_id("chicago", "Chicago CTA").unwrap();
        let busy = store
            .upsert_station(&city, &station("40380", "Clark/Lake", &["Blue"]))
            .unwrap();
        let quiet = store
            .upsert_station(&city, &station("40890", "O'Hare", &["Blue"]))
            .unwrap();

        let mut scored = RidershipAggregate::missing(quiet.clone(), "O'Hare");
        scored.ghost_score = Some(GhostScore::NotComparable);
        store.upsert_metrics(&scored).unwrap();

        let ranked = RidershipAggregate {
            station_id: busy.clone(),
            name: "Clark/Lake".to_string(),
            last_day_entries: 900,
            rolling_30d_avg: 850.0,
            rolling_90d_avg: 800.0,
            service_date_max: Some(date("2024-02-01")),
            data_status: DataStatus::Normal,
            ghost_score: Some(GhostScore::Ranked(0)),
        };
        store.upsert_metrics(&ranked).unwrap();
        store.upsert_metrics(&ranked).unwrap();

        let metrics = store.metrics(&city).unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0], ranked);
        assert_eq!(metrics[1].ghost_score, Some(GhostScore::NotComparable));
        assert_eq!(metrics[1].data_status, DataStatus::Missing);
    }
}
