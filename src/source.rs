//! Row Source Adapter
//!
//! A merge asks a [`SliceSource`] for the keys covering a request, then loads
//! each key in order. Two variants exist:
//!
//! - [`FileSource`]: one CSV file per calendar day (this module)
//! - [`TableSource`](crate::table_source::TableSource): one pivoted range query
//!
//! Site metadata (forecast folder, database id) comes from a
//! [`SiteDirectory`] and is looked up once per request, before planning.
//!
//! # File layout
//!
//! ```text
//! {data_root}/{client}/{folder}/{client}_{site}_{granularity}_{date}.csv
//! ```
//!
//! `folder` is the site's live forecast folder for today's file on
//! production requests, and `ml_forecasts` otherwise.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate};
use tracing::debug;

use crate::config::ForecastConfig;
use crate::csv_parser::parse_slice_csv;
use crate::error::{ForecastError, SourceError};
use crate::request::ForecastRequest;
use crate::types::{Granularity, Slice};

// ============================================================================
// Data Structures
// ============================================================================

/// Identifies one slice to load
#[derive(Debug, Clone, PartialEq)]
pub struct SliceKey {
    pub client: String,
    pub site: String,

    /// Logical date of the slice
    pub date: NaiveDate,

    /// Range covered (a single day for file slices)
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,

    pub granularity: Granularity,

    /// Sub-folder holding the file (file variant only)
    pub folder: String,

    /// Database id of the site (table variant only)
    pub site_id: Option<i64>,
}

/// Per-site metadata needed to locate slices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteMetadata {
    pub site_id: Option<i64>,

    /// Folder holding today's live forecast file
    pub forecast_folder: Option<String>,
}

// ============================================================================
// Traits
// ============================================================================

#[async_trait]
pub trait SliceSource: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Keys covering the request, in ascending date order
    fn plan(
        &self,
        request: &ForecastRequest,
        site: &SiteMetadata,
        today: NaiveDate,
    ) -> Vec<SliceKey>;

    /// Load one slice
    ///
    /// `Ok(None)` means the slice does not exist and is skipped by the merge.
    async fn load(&self, key: &SliceKey) -> Result<Option<Slice>, ForecastError>;

    /// Attachment filename for a merge over `request`
    fn filename(&self, request: &ForecastRequest) -> String {
        request.merged_filename()
    }
}

/// Lookup of site metadata by (company, site name)
#[async_trait]
pub trait SiteDirectory: Send + Sync {
    /// Unknown sites yield empty metadata, not an error
    async fn lookup(&self, client: &str, site: &str) -> Result<SiteMetadata, ForecastError>;
}

/// In-memory site directory
#[derive(Debug, Clone, Default)]
pub struct StaticSiteDirectory {
    sites: HashMap<(String, String), SiteMetadata>,
}

impl StaticSiteDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_site(
        mut self,
        client: impl Into<String>,
        site: impl Into<String>,
        metadata: SiteMetadata,
    ) -> Self {
        self.sites.insert((client.into(), site.into()), metadata);
        self
    }
}

#[async_trait]
impl SiteDirectory for StaticSiteDirectory {
    async fn lookup(&self, client: &str, site: &str) -> Result<SiteMetadata, ForecastError> {
        Ok(self
            .sites
            .get(&(client.to_string(), site.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Path Templates
// ============================================================================

/// Substitute `{name}` placeholders in a path template
///
/// # Examples
///
/// ```
/// # use solar_forecast_merge::source::render_template;
/// let path = render_template(
///     "{client}/{folder}/{client}_{site}.csv",
///     &[("client", "Acme"), ("folder", "ml_forecasts"), ("site", "Plant1")],
/// );
/// assert_eq!(path, "Acme/ml_forecasts/Acme_Plant1.csv");
/// ```
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |path, (name, value)| {
            path.replace(&format!("{{{}}}", name), value)
        })
}

// ============================================================================
// File Variant
// ============================================================================

/// One CSV file per calendar day
#[derive(Debug, Clone)]
pub struct FileSource {
    data_root: PathBuf,
    layout: String,
    default_folder: String,
}

impl FileSource {
    pub fn new(config: &ForecastConfig) -> Self {
        Self {
            data_root: config.data_root.clone(),
            layout: config.forecast_layout.clone(),
            default_folder: config.default_forecast_folder.clone(),
        }
    }

    /// Location of the day file for a key
    pub fn path_for(&self, key: &SliceKey) -> PathBuf {
        let date = key.date.format("%Y-%m-%d").to_string();
        let label = key.granularity.label();
        let lower = label.to_lowercase();
        let relative = render_template(
            &self.layout,
            &[
                ("client", key.client.as_str()),
                ("site", key.site.as_str()),
                ("granularity_lower", lower.as_str()),
                ("granularity", label),
                ("folder", key.folder.as_str()),
                ("date", date.as_str()),
            ],
        );
        self.data_root.join(relative)
    }

    fn folder_for(
        &self,
        request: &ForecastRequest,
        site: &SiteMetadata,
        date: NaiveDate,
        today: NaiveDate,
    ) -> String {
        if !request.is_demo && date == today {
            if let Some(folder) = site.forecast_folder.as_deref().filter(|f| !f.is_empty()) {
                return folder.to_string();
            }
        }
        self.default_folder.clone()
    }
}

#[async_trait]
impl SliceSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn plan(
        &self,
        request: &ForecastRequest,
        site: &SiteMetadata,
        today: NaiveDate,
    ) -> Vec<SliceKey> {
        request
            .dates()
            .into_iter()
            .map(|date| SliceKey {
                client: request.client.clone(),
                site: request.site.clone(),
                date,
                start: request.start,
                end: request.end,
                granularity: request.granularity.clone(),
                folder: self.folder_for(request, site, date, today),
                site_id: site.site_id,
            })
            .collect()
    }

    async fn load(&self, key: &SliceKey) -> Result<Option<Slice>, ForecastError> {
        let path = self.path_for(key);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), date = %key.date, "Day file not found");
                return Ok(None);
            }
            Err(e) => {
                return Err(SourceError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
                .into())
            }
        };

        let slice = parse_slice_csv(&content, key.date)?;
        debug!(
            path = %path.display(),
            rows = slice.rows.len(),
            columns = slice.headers.len(),
            "Day file loaded"
        );
        Ok(Some(slice))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestParams;
    use std::fs;

    fn request(client: &str, site: &str, start: &str, end: &str) -> ForecastRequest {
        let params = RequestParams {
            client: Some(client.to_string()),
            site: Some(site.to_string()),
            start_date: Some(start.to_string()),
            end_date: Some(end.to_string()),
            timeframe: None,
        };
        ForecastRequest::from_params(&params, &ForecastConfig::default()).unwrap()
    }

    fn config_at(root: &std::path::Path) -> ForecastConfig {
        ForecastConfig {
            data_root: root.to_path_buf(),
            ..ForecastConfig::default()
        }
    }

    fn live_site() -> SiteMetadata {
        SiteMetadata {
            site_id: Some(7),
            forecast_folder: Some("live".to_string()),
        }
    }

    #[test]
    fn test_plan_one_key_per_date() {
        let source = FileSource::new(&ForecastConfig::default());
        let req = request("Acme", "Plant1", "2024-01-01", "2024-01-03");
        let today = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();

        let keys = source.plan(&req, &live_site(), today);

        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0].folder, "ml_forecasts");
        assert_eq!(keys[1].folder, "ml_forecasts");
        assert_eq!(keys[2].folder, "live");
        assert!(keys.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_plan_demo_never_uses_live_folder() {
        let source = FileSource::new(&ForecastConfig::default());
        let req = request("Demo", "Demo-Site", "2024-01-03", "2024-01-03");
        let today = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();

        let keys = source.plan(&req, &live_site(), today);
        assert_eq!(keys[0].folder, "ml_forecasts");
    }

    #[test]
    fn test_path_for() {
        let source = FileSource::new(&ForecastConfig::default());
        let req = request("Acme", "Plant1", "2024-01-01", "2024-01-01");
        let today = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let key = source.plan(&req, &SiteMetadata::default(), today).remove(0);

        assert_eq!(
            source.path_for(&key),
            PathBuf::from("/home/Forecast/Acme/ml_forecasts/Acme_Plant1_Forecast_2024-01-01.csv")
        );
    }

    #[tokio::test]
    async fn test_load_existing_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("Acme").join("ml_forecasts");
        fs::create_dir_all(&folder).unwrap();
        fs::write(
            folder.join("Acme_Plant1_Forecast_2024-01-01.csv"),
            "Time,GHI Rev0\n2024-01-01 06:00:00+05:30,10\n",
        )
        .unwrap();

        let source = FileSource::new(&config_at(dir.path()));
        let req = request("Acme", "Plant1", "2024-01-01", "2024-01-02");
        let today = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let keys = source.plan(&req, &SiteMetadata::default(), today);

        let first = source.load(&keys[0]).await.unwrap().unwrap();
        assert_eq!(first.headers, vec!["Time", "GHI Rev0"]);
        assert_eq!(first.rows[0].get("GHI Rev0"), Some("10"));

        assert!(source.load(&keys[1]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("Acme").join("ml_forecasts");
        fs::create_dir_all(&folder).unwrap();
        fs::write(
            folder.join("Acme_Plant1_Forecast_2024-01-01.csv"),
            "Date,GHI Rev0\n2024-01-01,10\n",
        )
        .unwrap();

        let source = FileSource::new(&config_at(dir.path()));
        let req = request("Acme", "Plant1", "2024-01-01", "2024-01-01");
        let today = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let keys = source.plan(&req, &SiteMetadata::default(), today);

        let err = source.load(&keys[0]).await.unwrap_err();
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_static_directory() {
        let directory = StaticSiteDirectory::new().with_site("Acme", "Plant1", live_site());

        assert_eq!(directory.lookup("Acme", "Plant1").await.unwrap(), live_site());
        assert_eq!(
            directory.lookup("Acme", "Unknown").await.unwrap(),
            SiteMetadata::default()
        );
    }
}
