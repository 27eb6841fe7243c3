use chrono::NaiveDate;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::{StationStore, StoreResult, prune_cutoff};
use crate::error::StoreError;
use crate::model::{CityId, NewStation, RidershipRecord, Station, StationAlias, StationId};
use crate::scoring::types::RidershipAggregate;

#[derive(Default)]
struct Inner {
    cities: HashMap<String, CityId>,
    stations: BTreeMap<StationId, (CityId, Station)>,
    aliases: Vec<StationAlias>,
    ridership: BTreeMap<(StationId, NaiveDate), u32>,
    metrics: HashMap<StationId, RidershipAggregate>,
    rejected: HashSet<StationId>,
    next_id: usize,
}

impl Inner {
    fn city_of(&self, station: &StationId) -> Option<&CityId> {
        self.stations.get(station).map(|(city, _)| city)
    }

    fn check_writable(&self, station: &StationId) -> StoreResult<()> {
        if self.rejected.contains(station) {
            return Err(StoreError::Rejected(station.clone()));
        }
        Ok(())
    }
}

/// In-process [`StationStore`].
///
/// Station ids are assigned as `station-0001`, `station-0002`, ... in
/// insertion order.
#[derive(Default)]
pub struct MemoryStore {
    inner: RefCell<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later per-station write for `station` fail.
    pub fn reject_writes_for(&self, station: &StationId) {
        self.inner.borrow_mut().rejected.insert(station.clone());
    }

    /// Adds a station with a chosen id.
    pub fn insert_station(&self, city: &CityId, station: Station) {
        self.inner
            .borrow_mut()
            .stations
            .insert(station.id.clone(), (city.clone(), station));
    }

    pub fn station(&self, id: &StationId) -> Option<Station> {
        self.inner
            .borrow()
            .stations
            .get(id)
            .map(|(_, station)| station.clone())
    }
}

impl StationStore for MemoryStore {
    fn city_id(&self, code: &str, _name: &str) -> StoreResult<CityId> {
        let mut inner = self.inner.borrow_mut();
        Ok(inner
            .cities
            .entry(code.to_string())
            .or_insert_with(|| CityId::new(format!("city-{code}")))
            .clone())
    }

    fn upsert_station(&self, city: &CityId, station: &NewStation) -> StoreResult<StationId> {
        let mut inner = self.inner.borrow_mut();

        let existing = inner.stations.values_mut().find(|(c, s)| {
            c == city && s.external_id.as_deref() == Some(station.external_id.as_str())
        });
        if let Some((_, s)) = existing {
            s.name = station.name.clone();
            s.latitude = station.latitude;
            s.longitude = station.longitude;
            s.lines = station.lines.clone();
            return Ok(s.id.clone());
        }

        inner.next_id += 1;
        let id = StationId::new(format!("station-{:04}", inner.next_id));
        inner.stations.insert(
            id.clone(),
            (
                city.clone(),
                Station {
                    id: id.clone(),
                    name: station.name.clone(),
                    latitude: station.latitude,
                    longitude: station.longitude,
                    lines: station.lines.clone(),
                    external_id: Some(station.external_id.clone()),
                    ridership_source_id: None,
                },
            ),
        );
        Ok(id)
    }

    fn stations(&self, city: &CityId) -> StoreResult<Vec<Station>> {
        Ok(self
            .inner
            .borrow()
            .stations
            .values()
            .filter(|(c, _)| c == city)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn create_alias(
        &self,
        station: &StationId,
        alias_name: &str,
        normalized: &str,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.borrow_mut();
        if inner.city_of(station).is_none() {
            return Err(StoreError::StationNotFound(station.clone()));
        }
        if inner
            .aliases
            .iter()
            .any(|a| &a.station_id == station && a.normalized == normalized)
        {
            return Ok(false);
        }
        inner.aliases.push(StationAlias {
            station_id: station.clone(),
            alias_name: alias_name.to_string(),
            normalized: normalized.to_string(),
        });
        Ok(true)
    }

    fn aliases(&self, city: &CityId) -> StoreResult<Vec<StationAlias>> {
        let inner = self.inner.borrow();
        Ok(inner
            .aliases
            .iter()
            .filter(|a| inner.city_of(&a.station_id) == Some(city))
            .cloned()
            .collect())
    }

    fn set_ridership_source_id(&self, station: &StationId, raw_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.borrow_mut();
        inner.check_writable(station)?;
        let (_, s) = inner
            .stations
            .get_mut(station)
            .ok_or_else(|| StoreError::StationNotFound(station.clone()))?;
        s.ridership_source_id = Some(raw_id.to_string());
        Ok(())
    }

    fn insert_ridership_batch(&self, records: &[RidershipRecord]) -> StoreResult<()> {
        let mut inner = self.inner.borrow_mut();
        for r in records {
            inner.check_writable(&r.station_id)?;
        }
        for r in records {
            inner
                .ridership
                .insert((r.station_id.clone(), r.service_date), r.entries);
        }
        Ok(())
    }

    fn ridership(&self, city: &CityId) -> StoreResult<Vec<RidershipRecord>> {
        let inner = self.inner.borrow();
        Ok(inner
            .ridership
            .iter()
            .filter(|((station, _), _)| inner.city_of(station) == Some(city))
            .map(|((station, date), entries)| RidershipRecord {
                station_id: station.clone(),
                service_date: *date,
                entries: *entries,
            })
            .collect())
    }

    fn ridership_count(&self, city: &CityId) -> StoreResult<usize> {
        Ok(self.ridership(city)?.len())
    }

    fn ridership_date_range(&self, city: &CityId) -> StoreResult<Option<(NaiveDate, NaiveDate)>> {
        let rows = self.ridership(city)?;
        let min = rows.iter().map(|r| r.service_date).min();
        let max = rows.iter().map(|r| r.service_date).max();
        Ok(min.zip(max))
    }

    fn prune_ridership(&self, city: &CityId, retention_days: i64) -> StoreResult<usize> {
        let latest = self.ridership_date_range(city)?.map(|(_, max)| max);
        let Some(cutoff) = prune_cutoff(latest, retention_days) else {
            return Ok(0);
        };

        let mut inner = self.inner.borrow_mut();
        let stale: Vec<_> = inner
            .ridership
            .keys()
            .filter(|(station, date)| *date < cutoff && inner.city_of(station) == Some(city))
            .cloned()
            .collect();
        for key in &stale {
            inner.ridership.remove(key);
        }
        Ok(stale.len())
    }

    fn upsert_metrics(&self, aggregate: &RidershipAggregate) -> StoreResult<()> {
        let mut inner = self.inner.borrow_mut();
        inner.check_writable(&aggregate.station_id)?;
        inner
            .metrics
            .insert(aggregate.station_id.clone(), aggregate.clone());
        Ok(())
    }

    fn metrics(&self, city: &CityId) -> StoreResult<Vec<RidershipAggregate>> {
        let inner = self.inner.borrow();
        let mut metrics: Vec<_> = inner
            .metrics
            .values()
            .filter(|m| inner.city_of(&m.station_id) == Some(city))
            .cloned()
            .collect();
        metrics.sort_by(|a, b| {
            let score = |m: &RidershipAggregate| m.ghost_score.map(|s| s.as_i32()).unwrap_or(-1);
            score(b).cmp(&score(a)).then_with(|| a.name.cmp(&b.name))
        });
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_station(external_id: &str, name: &str) -> NewStation {
        NewStation {
            external_id: external_id.to_string(),
            name: name.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            lines: vec![],
        }
    }

    #[test]
    fn test_upsert_is_keyed_by_external_id() {
        let store = MemoryStore::new();
        let city = store.city_id("chicago", "Chicago CTA").unwrap();
        let a = store.upsert_station(&city, &new_station("40380", "Clark")).unwrap();
        let b = store.upsert_station(&city, &new_station("40380", "Clark/Lake")).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.stations(&city).unwrap()[0].name, "Clark/Lake");
    }

    #[test]
    fn test_stations_are_scoped_by_city() {
        let store = MemoryStore::new();
        let chicago = store.city_id("chicago", "").unwrap();
        let boston = store.city_id("boston", "").unwrap();
        store.upsert_station(&chicago, &new_station("1", "A")).unwrap();
        store.upsert_station(&boston, &new_station("1", "B")).unwrap();
        assert_eq!(store.stations(&chicago).unwrap().len(), 1);
        assert_eq!(store.stations(&boston).unwrap()[0].name, "B");
    }

    #[test]
    fn test_rejected_station_fails_writes() {
        let store = MemoryStore::new();
        let city = store.city_id("chicago", "").unwrap();
        let id = store.upsert_station(&city, &new_station("1", "A")).unwrap();
        store.reject_writes_for(&id);
        assert!(matches!(
            store.set_ridership_source_id(&id, "x"),
            Err(StoreError::Rejected(_))
        ));
        assert!(store
            .upsert_metrics(&RidershipAggregate::missing(id.clone(), "A"))
            .is_err());
    }
}
