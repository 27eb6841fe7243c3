//! CLI entry point for ghost_stops.
//!
//! Provides subcommands for loading GTFS stations and ridership into the
//! database, syncing ridership from Socrata, computing ghost scores and
//! inspecting the results.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use ghost_stops::{
    fetch::{BasicClient, auth::AppToken, load_source},
    ingest::{
        RidershipOutcome,
        aliases::{duplicate_names, populate_aliases},
        gtfs::ingest_gtfs,
        ridership::ingest_ridership_csv,
        sync::{SyncOptions, sync_ridership},
    },
    matcher::StationMatcher,
    model::CityId,
    output::{station_rows_json, write_station_rows, write_unmatched_csv, write_unmatched_markdown},
    profile::CityProfile,
    scoring::ghost::compute_ghost_scores,
    store::{SqliteStore, StationStore},
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const SOCRATA_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "ghost_stops")]
#[command(about = "Match rail ridership to GTFS stations and compute ghost scores", long_about = None)]
struct Cli {
    /// City profile JSON overriding the built-in one
    #[arg(long, global = true, value_name = "FILE")]
    profile: Option<String>,

    /// SQLite database path (defaults to $DATABASE_URL)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load rail stations from a GTFS zip file or URL
    Gtfs {
        #[arg(short, long, default_value = "chicago")]
        city: String,

        /// Path or URL of the GTFS zip
        #[arg(short, long, value_name = "FILE_OR_URL")]
        source: String,
    },
    /// Load daily ridership from a CSV file or URL
    Ridership {
        #[arg(short, long, default_value = "chicago")]
        city: String,

        /// Path or URL of the ridership CSV
        #[arg(short, long, value_name = "FILE_OR_URL")]
        source: String,

        /// Directory for the unmatched stations report
        #[arg(long, default_value = "docs")]
        report_dir: PathBuf,
    },
    /// Compute ghost scores from stored ridership
    Compute {
        #[arg(short, long, default_value = "chicago")]
        city: String,
    },
    /// Run gtfs, ridership and compute in sequence
    All {
        #[arg(short, long, default_value = "chicago")]
        city: String,

        #[arg(long, value_name = "FILE_OR_URL")]
        gtfs: String,

        #[arg(long, value_name = "FILE_OR_URL")]
        ridership: String,

        #[arg(long, default_value = "docs")]
        report_dir: PathBuf,
    },
    /// Fetch new ridership from Socrata and prune old rows
    SyncRidership {
        #[arg(short, long, default_value = "chicago")]
        city: String,

        /// Retention window in days
        #[arg(long, default_value_t = 365)]
        days: i64,

        /// Fetch rows after this date (YYYY-MM-DD) instead of the latest stored one
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Socrata page size
        #[arg(long, default_value_t = 50_000)]
        limit: usize,

        #[arg(long, default_value = "docs")]
        report_dir: PathBuf,
    },
    /// List stations with their latest scores
    ListStations {
        #[arg(short, long, default_value = "chicago")]
        city: String,

        #[arg(short, long, value_enum, default_value_t = Format::Log)]
        format: Format,
    },
    /// Add the profile's curated ridership aliases
    PopulateAliases {
        #[arg(short, long, default_value = "chicago")]
        city: String,
    },
    /// Show how a ridership label resolves, without learning it
    Match {
        #[arg(short, long, default_value = "chicago")]
        city: String,

        /// Ridership station label, e.g. "Cicero-Lake"
        #[arg(short, long)]
        name: String,

        /// Ridership station id
        #[arg(long, default_value = "")]
        id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Log,
    Csv,
    Json,
}

/// Everything a subcommand needs for one city.
struct CityContext {
    store: SqliteStore,
    profile: CityProfile,
    city: CityId,
}

impl CityContext {
    fn open(cli: &Cli, city: &str) -> Result<Self> {
        let database = match &cli.database {
            Some(db) => db.clone(),
            None => std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
        };
        let store = SqliteStore::open(&database)
            .with_context(|| format!("failed to open database {database}"))?;
        let profile = CityProfile::resolve(city, cli.profile.as_deref())?;
        let city = store.city_id(&profile.code, &profile.name)?;
        info!(city = %profile.name, database = %database, "Opened store");
        Ok(Self {
            store,
            profile,
            city,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/ghost_stops.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("ghost_stops.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Gtfs { city, source } => {
            let ctx = CityContext::open(&cli, city)?;
            load_gtfs(&ctx, source).await?;
        }
        Commands::Ridership {
            city,
            source,
            report_dir,
        } => {
            let ctx = CityContext::open(&cli, city)?;
            load_ridership(&ctx, source, report_dir).await?;
        }
        Commands::Compute { city } => {
            let ctx = CityContext::open(&cli, city)?;
            compute_ghost_scores(&ctx.store, &ctx.city)?;
        }
        Commands::All {
            city,
            gtfs,
            ridership,
            report_dir,
        } => {
            let ctx = CityContext::open(&cli, city)?;
            load_gtfs(&ctx, gtfs).await?;
            populate_aliases(&ctx.store, &ctx.city, &ctx.profile.aliases)?;
            load_ridership(&ctx, ridership, report_dir).await?;
            compute_ghost_scores(&ctx.store, &ctx.city)?;
        }
        Commands::SyncRidership {
            city,
            days,
            since,
            limit,
            report_dir,
        } => {
            let ctx = CityContext::open(&cli, city)?;
            let token = std::env::var("CHICAGO_DATA_APP_TOKEN").unwrap_or_default();
            let client = AppToken::new(BasicClient::with_timeout(SOCRATA_TIMEOUT)?, &token)
                .context("CHICAGO_DATA_APP_TOKEN is not a valid header value")?;
            if !client.has_token() {
                warn!("CHICAGO_DATA_APP_TOKEN not set, Socrata requests will be throttled");
            }

            let options = SyncOptions {
                retention_days: *days,
                since: *since,
                page_size: *limit,
            };
            let report = sync_ridership(
                &ctx.store,
                &ctx.city,
                &ctx.profile,
                &client,
                &options,
                Utc::now().date_naive(),
            )
            .await?;

            if let Some(outcome) = &report.ridership {
                if !outcome.unmatched.is_empty() {
                    let path = report_dir.join("unmatched_socrata.csv");
                    if let Err(e) = write_unmatched_csv(&path, &outcome.unmatched) {
                        warn!(error = %e, "Failed to write unmatched stations CSV");
                    }
                }
            }
            info!(
                since = %report.since,
                fetched = report.fetched,
                pruned = report.prune.deleted,
                rows = report.prune.rows_after,
                "Ridership sync completed"
            );
        }
        Commands::ListStations { city, format } => {
            let ctx = CityContext::open(&cli, city)?;
            list_stations(&ctx, *format)?;
        }
        Commands::PopulateAliases { city } => {
            let ctx = CityContext::open(&cli, city)?;
            populate_aliases(&ctx.store, &ctx.city, &ctx.profile.aliases)?;
        }
        Commands::Match { city, name, id } => {
            let ctx = CityContext::open(&cli, city)?;
            let matcher = StationMatcher::load(
                &ctx.store,
                &ctx.city,
                &ctx.profile.line_hints,
                &ctx.profile.special_cases,
            )?;
            let (station, matched, diagnostic) = matcher.resolve(id, name).into_parts();
            let station_name = station
                .as_ref()
                .and_then(|s| ctx.store.stations(&ctx.city).ok()?.into_iter().find(|st| &st.id == s))
                .map(|s| s.name);
            info!(
                label = %name,
                raw_id = %id,
                matched,
                station_id = station.as_ref().map(|s| s.as_str()).unwrap_or("-"),
                station = station_name.as_deref().unwrap_or("-"),
                %diagnostic,
                "Match result"
            );
        }
    }

    Ok(())
}

/// Loads GTFS stations and reports names shared by several stations.
#[tracing::instrument(skip(ctx))]
async fn load_gtfs(ctx: &CityContext, source: &str) -> Result<()> {
    let bytes = load_source(&BasicClient::new(), source).await?;
    ingest_gtfs(&ctx.store, &ctx.city, &ctx.profile, &bytes)?;

    for (name, ids) in duplicate_names(&ctx.store.stations(&ctx.city)?) {
        warn!(name = %name, count = ids.len(), "Stations share a display name, matching relies on lines");
    }
    Ok(())
}

#[tracing::instrument(skip(ctx))]
async fn load_ridership(ctx: &CityContext, source: &str, report_dir: &Path) -> Result<RidershipOutcome> {
    let bytes = load_source(&BasicClient::new(), source).await?;
    let outcome = ingest_ridership_csv(&ctx.store, &ctx.city, &ctx.profile, bytes.as_slice())?;

    if !outcome.unmatched.is_empty() {
        let path = report_dir.join(format!("{}-unmatched-stations.md", ctx.profile.code));
        if let Err(e) = write_unmatched_markdown(&path, &ctx.profile.name, &outcome.unmatched) {
            warn!(error = %e, "Failed to write unmatched stations report");
        }
    }
    Ok(outcome)
}

fn list_stations(ctx: &CityContext, format: Format) -> Result<()> {
    let metrics = ctx.store.metrics(&ctx.city)?;
    if metrics.is_empty() {
        warn!("No station metrics stored, run `compute` first");
        return Ok(());
    }

    match format {
        Format::Log => {
            for m in &metrics {
                info!(
                    station_id = %m.station_id,
                    name = %m.name,
                    ghost_score = m.ghost_score.map_or(-1, |s| s.as_i32()),
                    rolling_30d_avg = format!("{:.1}", m.rolling_30d_avg),
                    status = m.data_status.as_str(),
                    "Station"
                );
            }
            info!(total = metrics.len(), "Station list");
        }
        Format::Csv => write_station_rows(std::io::stdout().lock(), &metrics)?,
        Format::Json => println!("{}", station_rows_json(&metrics)?),
    }
    Ok(())
}
