//! Persistence for stations, aliases, daily ridership and scores.
//!
//! [`StationStore`] is the narrow contract the pipeline needs from a system of
//! record. [`SqliteStore`] is the implementation the CLI uses; unit tests run
//! against an in-process store.

#[cfg(test)]
mod memory;
mod sqlite;

#[cfg(test)]
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::NaiveDate;

use crate::error::StoreError;
use crate::model::{CityId, NewStation, RidershipRecord, Station, StationAlias, StationId};
use crate::scoring::types::RidershipAggregate;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait StationStore {
    /// Returns the id of the city with `code`, creating it if necessary.
    fn city_id(&self, code: &str, name: &str) -> StoreResult<CityId>;

    /// Creates or updates the station keyed by `(city, external_id)` and returns its id.
    ///
    /// A learned ridership-source identifier survives the update.
    fn upsert_station(&self, city: &CityId, station: &NewStation) -> StoreResult<StationId>;

    /// All stations of a city, ordered by id.
    fn stations(&self, city: &CityId) -> StoreResult<Vec<Station>>;

    /// Records an alias; returns `false` if the station already had that normalized key.
    fn create_alias(
        &self,
        station: &StationId,
        alias_name: &str,
        normalized: &str,
    ) -> StoreResult<bool>;

    fn aliases(&self, city: &CityId) -> StoreResult<Vec<StationAlias>>;

    /// Stores the identifier the ridership dataset uses for a station. Idempotent.
    fn set_ridership_source_id(&self, station: &StationId, raw_id: &str) -> StoreResult<()>;

    /// Upserts daily rows keyed by `(station, service_date)`, all or nothing.
    fn insert_ridership_batch(&self, records: &[RidershipRecord]) -> StoreResult<()>;

    fn ridership(&self, city: &CityId) -> StoreResult<Vec<RidershipRecord>>;

    fn ridership_count(&self, city: &CityId) -> StoreResult<usize>;

    /// Earliest and latest service dates, or `None` without rows.
    fn ridership_date_range(&self, city: &CityId) -> StoreResult<Option<(NaiveDate, NaiveDate)>>;

    /// Deletes rows older than `retention_days` before the latest service
    /// date and returns how many were removed.
    fn prune_ridership(&self, city: &CityId, retention_days: i64) -> StoreResult<usize>;

    /// Upserts the scored aggregate keyed by station.
    fn upsert_metrics(&self, aggregate: &RidershipAggregate) -> StoreResult<()>;

    /// Persisted aggregates of a city, ordered by ghost score descending.
    fn metrics(&self, city: &CityId) -> StoreResult<Vec<RidershipAggregate>>;
}

/// The cutoff date for a retention prune, or `None` if there is nothing to prune.
pub(crate) fn prune_cutoff(latest: Option<NaiveDate>, retention_days: i64) -> Option<NaiveDate> {
    latest.and_then(|latest| latest.checked_sub_signed(chrono::Duration::days(retention_days)))
}
