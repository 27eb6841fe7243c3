//! Error types for the matching and scoring pipeline.

use crate::model::StationId;

/// Failures raised by a [`StationStore`](crate::store::StationStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to decode stored lines: {0}")]
    Lines(#[from] serde_json::Error),

    #[error("invalid stored date {0:?}")]
    Date(String),

    #[error("station not found: {0}")]
    StationNotFound(StationId),

    #[error("write rejected for station {0}")]
    Rejected(StationId),
}

/// Pipeline errors.
///
/// An unmatched station is not an error: it is reported through
/// [`MatchOutcome::Unmatched`](crate::matcher::MatchOutcome::Unmatched) and
/// counted by the ingestion reports.
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    /// Nothing to score for a city.
    #[error("no stations to score: {0}")]
    EmptyInput(String),

    /// A single record carried an unparseable field.
    #[error("malformed {field} value {value:?}")]
    InputMalformed { field: &'static str, value: String },

    /// A best-effort write failed.
    #[error("failed to persist {what}: {source}")]
    Persistence {
        what: String,
        #[source]
        source: StoreError,
    },

    /// An input file lacks a column the ingester cannot do without.
    #[error("{source_name} has no {column} column (found: {found:?})")]
    MissingColumn {
        source_name: &'static str,
        column: &'static str,
        found: Vec<String>,
    },

    #[error("stops.txt not found in GTFS archive")]
    StopsNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EtlError>;
