//! Solar Forecast Merge - forecast reconciliation and merge engine
//!
//! Serves time-series solar forecasts and measurements to dashboards, read
//! either from one CSV file per site and day or from a long-format forecast
//! table in Postgres.
//!
//! # Features
//! - Schema unification across day files whose revision columns drift
//! - `Final` resolution from numbered revisions (highest non-null wins)
//! - Long → wide pivot of the forecast table with ground-truth join
//! - Demo perturbation and future masking
//! - Historical and live-feed single-file exports
//!
//! # Pipeline
//!
//! ```text
//! SliceSource ──► SchemaUnifier ──► Revision Resolver ──► PerturbationFilter ──► MergeOperation ──► encoder
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use solar_forecast_merge::{
//!     AbortSignal, FileSource, ForecastConfig, ForecastExporter, ForecastRequest,
//!     RequestParams, StaticSiteDirectory,
//! };
//!
//! # async fn run() -> Result<(), solar_forecast_merge::ForecastError> {
//! let config = ForecastConfig::from_env()?;
//! let exporter = ForecastExporter::new(
//!     config.clone(),
//!     Box::new(FileSource::new(&config)),
//!     Box::new(StaticSiteDirectory::new()),
//! );
//!
//! let params = RequestParams {
//!     client: Some("Acme".to_string()),
//!     site: Some("Plant1".to_string()),
//!     start_date: Some("Mon Jan 01 2024 00:00:00 GMT+0530 (India Standard Time)".to_string()),
//!     end_date: Some("Sun Jan 07 2024 00:00:00 GMT+0530 (India Standard Time)".to_string()),
//!     timeframe: None,
//! };
//! let request = ForecastRequest::from_params(&params, &config)?;
//!
//! let outcome = exporter.export(&request, Utc::now(), &AbortSignal::new()).await?;
//! solar_forecast_merge::write_export(&outcome, std::io::stdout(), &AbortSignal::new())?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod csv_parser;
pub mod csv_utils;
pub mod encoder;
mod error;
pub mod historical;
pub mod merge;
pub mod perturb;
pub mod request;
pub mod revision;
pub mod schema;
pub mod site_feed;
pub mod source;
pub mod table_source;
pub mod transformations;
mod types;

// Re-export public types for easier access
pub use config::{ForecastConfig, JitterBand, SourceKind};
pub use encoder::{stream_csv, StreamReport};
pub use error::{ForecastError, InputError, ParseError, SourceError};
pub use merge::{AbortSignal, MergeOperation, MergeOutcome, MergeState};
pub use perturb::{DemoContext, PerturbationFilter};
pub use request::{ForecastRequest, RequestParams};
pub use source::{FileSource, SiteDirectory, SiteMetadata, SliceKey, SliceSource, StaticSiteDirectory};
pub use table_source::{PgSiteDirectory, TableSource};
pub use types::{
    ExportOutcome, Granularity, MergedTable, Row, Slice, BLOCK_COLUMN, FILES_NOT_FOUND,
    FILE_NOT_FOUND, TIME_COLUMN,
};

use std::io::Write;

use chrono::{DateTime, Utc};
use tracing::info;

// ============================================================================
// Forecast Export
// ============================================================================

/// Forecast merge over one configured source
///
/// Holds no per-request state; every call to [`ForecastExporter::export`]
/// builds its own [`MergeOperation`].
pub struct ForecastExporter {
    config: ForecastConfig,
    source: Box<dyn SliceSource>,
    sites: Box<dyn SiteDirectory>,
}

impl ForecastExporter {
    pub fn new(
        config: ForecastConfig,
        source: Box<dyn SliceSource>,
        sites: Box<dyn SiteDirectory>,
    ) -> Self {
        Self {
            config,
            source,
            sites,
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Perturbation filter for a request (pass-through unless demo)
    pub fn filter_for(&self, request: &ForecastRequest) -> PerturbationFilter {
        PerturbationFilter::new(
            DemoContext::from_config(&self.config, request.is_demo),
            self.config.forecast_jitter,
            self.config.offset(),
        )
    }

    /// Merge every slice of the request
    pub async fn export(
        &self,
        request: &ForecastRequest,
        now: DateTime<Utc>,
        abort: &AbortSignal,
    ) -> Result<ExportOutcome, ForecastError> {
        let mut filter = self.filter_for(request);
        self.export_with_filter(request, &mut filter, now, abort)
            .await
    }

    /// Same as [`ForecastExporter::export`] with a caller-supplied filter
    pub async fn export_with_filter(
        &self,
        request: &ForecastRequest,
        filter: &mut PerturbationFilter,
        now: DateTime<Utc>,
        abort: &AbortSignal,
    ) -> Result<ExportOutcome, ForecastError> {
        let mut merge = self.merge(request, filter, now, abort).await?;

        match merge.finish() {
            MergeOutcome::NotFound => Ok(ExportOutcome::NotFound(FILES_NOT_FOUND)),
            MergeOutcome::Ready(table) => Ok(ExportOutcome::Csv {
                filename: self.source.filename(request),
                table,
            }),
        }
    }

    /// Merge a request and write it straight into `writer`
    ///
    /// Drives the merge operation through to `Streamed` (or `Empty` when
    /// the sentinel was written).
    pub async fn export_to<W: Write>(
        &self,
        request: &ForecastRequest,
        now: DateTime<Utc>,
        abort: &AbortSignal,
        writer: W,
    ) -> Result<ExportSummary, ForecastError> {
        let mut filter = self.filter_for(request);
        let mut merge = self.merge(request, &mut filter, now, abort).await?;

        let (filename, report) = match merge.finish() {
            MergeOutcome::NotFound => (None, write_sentinel(FILES_NOT_FOUND, writer)?),
            MergeOutcome::Ready(table) => {
                let report = merge.stream(&table, writer, abort)?;
                (Some(self.source.filename(request)), report)
            }
        };

        Ok(ExportSummary {
            filename,
            state: merge.state().clone(),
            report,
        })
    }

    async fn merge(
        &self,
        request: &ForecastRequest,
        filter: &mut PerturbationFilter,
        now: DateTime<Utc>,
        abort: &AbortSignal,
    ) -> Result<MergeOperation, ForecastError> {
        info!(
            client = %request.client,
            site = %request.site,
            source = self.source.name(),
            demo = request.is_demo,
            "Forecast export started"
        );

        let site = self.sites.lookup(&request.client, &request.site).await?;
        let today = now.with_timezone(&self.config.offset()).date_naive();
        let keys = self.source.plan(request, &site, today);

        let mut merge = MergeOperation::new(request.granularity.clone());
        let report = merge
            .accumulate(self.source.as_ref(), &keys, filter, now, abort)
            .await?;
        info!(
            client = %request.client,
            site = %request.site,
            merged = report.merged,
            skipped = report.skipped,
            aborted = report.aborted,
            "Slices accumulated"
        );

        Ok(merge)
    }
}

/// Result of [`ForecastExporter::export_to`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    /// Attachment filename, absent when the sentinel was written
    pub filename: Option<String>,
    pub state: MergeState,
    pub report: StreamReport,
}

impl ExportSummary {
    pub fn is_not_found(&self) -> bool {
        self.state == MergeState::Empty
    }

    /// HTTP status for the routing layer (404 for the not-found sentinel)
    pub fn status_code(&self) -> u16 {
        if self.is_not_found() {
            404
        } else {
            200
        }
    }
}

/// Write an export: the CSV table, or the sentinel text
pub fn write_export<W: Write>(
    outcome: &ExportOutcome,
    writer: W,
    abort: &AbortSignal,
) -> Result<StreamReport, ForecastError> {
    match outcome {
        ExportOutcome::Csv { table, .. } => stream_csv(table, writer, abort),
        ExportOutcome::NotFound(sentinel) => write_sentinel(sentinel, writer),
    }
}

fn write_sentinel<W: Write>(sentinel: &str, mut writer: W) -> Result<StreamReport, ForecastError> {
    writer
        .write_all(sentinel.as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| SourceError::Stream(e.to_string()))?;
    Ok(StreamReport {
        rows_written: 0,
        completed: true,
    })
}

// ============================================================================
// TESTS
// ============================================================================
