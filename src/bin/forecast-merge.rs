use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use solar_forecast_merge::historical::{HistoricalExporter, HistoricalRequest};
use solar_forecast_merge::site_feed::{FeedQuery, SiteFeed};
use solar_forecast_merge::{
    write_export, AbortSignal, ExportOutcome, FileSource, ForecastConfig, ForecastExporter,
    ForecastRequest, PgSiteDirectory, RequestParams, SiteDirectory, SliceSource, SourceKind,
    StaticSiteDirectory, TableSource,
};

#[derive(Parser)]
#[command(name = "forecast-merge")]
#[command(about = "Solar forecast merge and export tool", long_about = None)]
struct Cli {
    /// Write the CSV here instead of stdout
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge forecast slices over a date range
    Merge {
        #[arg(long)]
        client: String,

        #[arg(long)]
        site: String,

        /// e.g. "Mon Jan 01 2024 00:00:00 GMT+0530 (India Standard Time)" or 2024-01-01
        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        /// Daily | Monthly | Forecast
        #[arg(long)]
        timeframe: Option<String>,
    },

    /// Export the historical file of a site
    Historical {
        #[arg(long)]
        client: String,

        #[arg(long)]
        site: String,

        #[arg(long)]
        timeframe: String,
    },

    /// Export the live feed of a site
    Feed {
        #[arg(long)]
        site_id: String,

        /// Keep only the last N rows
        #[arg(long)]
        last_n: Option<String>,

        /// "today" or YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();
    let config = ForecastConfig::from_env().context("failed to load configuration")?;
    let writer = open_output(cli.out.as_ref())?;

    let not_found = match cli.cmd {
        Commands::Merge {
            client,
            site,
            start,
            end,
            timeframe,
        } => {
            let params = RequestParams {
                client: Some(client),
                site: Some(site),
                start_date: Some(start),
                end_date: Some(end),
                timeframe,
            };
            let request = ForecastRequest::from_params(&params, &config)?;
            let exporter = build_exporter(&config).await?;
            let summary = exporter
                .export_to(&request, Utc::now(), &AbortSignal::new(), writer)
                .await?;
            info!(
                status = summary.status_code(),
                rows = summary.report.rows_written,
                completed = summary.report.completed,
                "Export written"
            );
            summary.is_not_found()
        }
        Commands::Historical {
            client,
            site,
            timeframe,
        } => {
            let params = RequestParams {
                client: Some(client),
                site: Some(site),
                timeframe: Some(timeframe),
                ..RequestParams::default()
            };
            let request = HistoricalRequest::from_params(&params, &config)?;
            let outcome = HistoricalExporter::new(&config)
                .export(&request, &mut StdRng::from_entropy())
                .await?;
            emit(&outcome, writer)?
        }
        Commands::Feed {
            site_id,
            last_n,
            date,
        } => {
            let query =
                FeedQuery::from_params(Some(site_id.as_str()), last_n.as_deref(), date.as_deref())?;
            let outcome = SiteFeed::new(&config).export(&query, Utc::now()).await?;
            emit(&outcome, writer)?
        }
    };

    if not_found {
        std::process::exit(2);
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn build_exporter(config: &ForecastConfig) -> Result<ForecastExporter> {
    let pool = match (config.source, config.database_url.as_deref()) {
        (_, Some(url)) => Some(connect(url).await?),
        (SourceKind::Table, None) => {
            anyhow::bail!("DATABASE_URL is required for the table source")
        }
        (SourceKind::File, None) => None,
    };

    let source: Box<dyn SliceSource> = match (config.source, pool.clone()) {
        (SourceKind::Table, Some(pool)) => Box::new(TableSource::new(pool, config)),
        _ => Box::new(FileSource::new(config)),
    };
    let sites: Box<dyn SiteDirectory> = match pool {
        Some(pool) => Box::new(PgSiteDirectory::new(pool)),
        None => Box::new(StaticSiteDirectory::new()),
    };

    info!(source = source.name(), "Forecast source ready");
    Ok(ForecastExporter::new(config.clone(), source, sites))
}

async fn connect(url: &str) -> Result<sqlx::PgPool> {
    PgPoolOptions::new()
        .max_connections(4)
        .connect(url)
        .await
        .context("failed to connect to Postgres")
}

fn open_output(out: Option<&PathBuf>) -> Result<Box<dyn Write>> {
    let writer: Box<dyn Write> = match out {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    Ok(writer)
}

/// Write a single-file export; true when it was the not-found sentinel
fn emit(outcome: &ExportOutcome, writer: Box<dyn Write>) -> Result<bool> {
    let report = write_export(outcome, writer, &AbortSignal::new())?;
    info!(
        status = outcome.status_code(),
        rows = report.rows_written,
        completed = report.completed,
        "Export written"
    );
    Ok(outcome.is_not_found())
}
