//! Incremental ridership sync from the Socrata open-data API.
//!
//! Fetches every row newer than the latest stored service date, loads the
//! rows through the shared [`RidershipLoader`] and finally prunes rows that
//! fall out of the retention window.

use anyhow::Context;
use chrono::{Duration, NaiveDate};
use reqwest::Url;
use serde::Deserialize;
use tracing::info;

use crate::error::Result;
use crate::fetch::HttpClient;
use crate::ingest::{RidershipLoader, RidershipOutcome};
use crate::model::CityId;
use crate::profile::CityProfile;
use crate::store::StationStore;

/// Days to look back when the store has no ridership yet.
pub const EMPTY_STORE_LOOKBACK_DAYS: i64 = 7;

/// One row of the daily station entries dataset. Socrata sends every field
/// as a string.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct SocrataRecord {
    #[serde(default)]
    pub station_id: String,
    #[serde(default)]
    pub stationname: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub rides: String,
}

/// Rows fetched from Socrata. A row that does not decode as a
/// [`SocrataRecord`] is kept as its error so it can be counted as malformed.
#[derive(Clone, Debug, Default)]
pub struct FetchedRecords {
    pub records: Vec<SocrataRecord>,
    pub rejected: Vec<String>,
}

impl FetchedRecords {
    pub fn len(&self) -> usize {
        self.records.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn extend(&mut self, other: FetchedRecords) {
        self.records.extend(other.records);
        self.rejected.extend(other.rejected);
    }
}

#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Rows older than this many days before the newest row are deleted.
    pub retention_days: i64,
    /// Fetch rows strictly after this date instead of the latest stored one.
    pub since: Option<NaiveDate>,
    /// Socrata page size.
    pub page_size: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retention_days: 365,
            since: None,
            page_size: 50_000,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub rows_before: usize,
    pub deleted: usize,
    pub rows_after: usize,
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

#[derive(Debug)]
pub struct SyncReport {
    pub since: NaiveDate,
    pub fetched: usize,
    pub ridership: Option<RidershipOutcome>,
    pub prune: PruneReport,
}

/// The date after which rows are fetched: the override, else the latest
/// stored service date, else a week before `today`.
pub fn since_date<S: StationStore + ?Sized>(
    store: &S,
    city: &CityId,
    since: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<NaiveDate> {
    if let Some(since) = since {
        return Ok(since);
    }
    Ok(match store.ridership_date_range(city)? {
        Some((_, latest)) => latest,
        None => today - Duration::days(EMPTY_STORE_LOOKBACK_DAYS),
    })
}

/// Builds the SoQL query for one page of rows newer than `since`.
pub fn page_url(base: &str, since: NaiveDate, limit: usize, offset: usize) -> anyhow::Result<Url> {
    let filter = format!("date > '{}T00:00:00.000'", since.format("%Y-%m-%d"));
    Url::parse_with_params(
        base,
        &[
            ("$where", filter),
            ("$order", "date,station_id".to_string()),
            ("$limit", limit.to_string()),
            ("$offset", offset.to_string()),
        ],
    )
    .with_context(|| format!("invalid Socrata URL {base}"))
}

/// Decodes one response page row by row.
///
/// Only a body that is not a JSON array fails; a row of the wrong shape is
/// returned in [`FetchedRecords::rejected`].
pub fn decode_page(body: &[u8]) -> anyhow::Result<FetchedRecords> {
    let rows: Vec<serde_json::Value> =
        serde_json::from_slice(body).context("failed to decode Socrata response")?;

    let mut page = FetchedRecords::default();
    for row in rows {
        match serde_json::from_value::<SocrataRecord>(row) {
            Ok(record) => page.records.push(record),
            Err(e) => page.rejected.push(e.to_string()),
        }
    }
    Ok(page)
}

/// Pages through the dataset until an empty or short page.
pub async fn fetch_records<C: HttpClient + ?Sized>(
    client: &C,
    base: &str,
    since: NaiveDate,
    page_size: usize,
) -> anyhow::Result<FetchedRecords> {
    anyhow::ensure!(page_size > 0, "page size must be positive");

    let mut fetched = FetchedRecords::default();
    let mut offset = 0;
    loop {
        let url = page_url(base, since, page_size, offset)?;
        info!(%url, "Fetching ridership page");

        let body = crate::fetch::fetch_bytes(client, url.as_str())
            .await
            .context("Socrata request failed")?;
        let page = decode_page(&body)?;

        let rows = page.len();
        fetched.extend(page);
        info!(
            page = rows,
            total = fetched.len(),
            rejected = fetched.rejected.len(),
            "Fetched ridership page"
        );

        if rows < page_size {
            break;
        }
        offset += page_size;
    }
    Ok(fetched)
}

/// Loads fetched rows into `store`.
pub fn load_records<S: StationStore + ?Sized>(
    store: &S,
    city: &CityId,
    profile: &CityProfile,
    fetched: &FetchedRecords,
) -> Result<RidershipOutcome> {
    let mut loader = RidershipLoader::new(store, city, profile)?;
    for error in &fetched.rejected {
        loader.skip_malformed(error);
    }
    for r in &fetched.records {
        loader.push(&r.station_id, &r.stationname, &r.date, &r.rides)?;
    }
    loader.finish()
}

/// Deletes rows outside the retention window, logging counts around it.
#[tracing::instrument(skip(store))]
pub fn prune<S: StationStore + ?Sized>(
    store: &S,
    city: &CityId,
    retention_days: i64,
) -> Result<PruneReport> {
    let rows_before = store.ridership_count(city)?;
    let deleted = store.prune_ridership(city, retention_days)?;
    let rows_after = store.ridership_count(city)?;
    let date_range = store.ridership_date_range(city)?;

    match date_range {
        Some((min, max)) => info!(
            rows_before,
            deleted,
            rows_after,
            from = %min,
            to = %max,
            "Pruned ridership"
        ),
        None => info!(rows_before, deleted, rows_after, "Pruned ridership, no rows left"),
    }
    Ok(PruneReport {
        rows_before,
        deleted,
        rows_after,
        date_range,
    })
}

/// Fetches, loads and prunes. Loading is skipped when nothing new was
/// published; pruning always runs.
#[tracing::instrument(skip(store, profile, client))]
pub async fn sync_ridership<S, C>(
    store: &S,
    city: &CityId,
    profile: &CityProfile,
    client: &C,
    options: &SyncOptions,
    today: NaiveDate,
) -> anyhow::Result<SyncReport>
where
    S: StationStore + ?Sized,
    C: HttpClient + ?Sized,
{
    let base = profile
        .socrata_url
        .as_deref()
        .with_context(|| format!("profile '{}' has no socrata_url", profile.code))?;

    let since = since_date(store, city, options.since, today)?;
    info!(%since, "Fetching ridership published after");

    let fetched = fetch_records(client, base, since, options.page_size).await?;
    let ridership = if fetched.is_empty() {
        info!("No new ridership data found");
        None
    } else {
        Some(load_records(store, city, profile, &fetched)?)
    };

    let pruned = prune(store, city, options.retention_days)?;
    Ok(SyncReport {
        since,
        fetched: fetched.len(),
        ridership,
        prune: pruned,
    })
}
