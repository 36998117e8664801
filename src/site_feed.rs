//! Per-site live feed export
//!
//! Each site has one continuously appended CSV at `feed_layout`
//! (default `feeds/site_{site_id}.csv`). Callers may ask for the last N rows
//! or for the rows of one date. The bookkeeping `ENTRY_TIME` column is never
//! exported.

use std::io::ErrorKind;
use std::path::PathBuf;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use tracing::{debug, info};

use crate::config::ForecastConfig;
use crate::csv_parser::parse_table_csv;
use crate::error::{ForecastError, InputError, SourceError};
use crate::source::render_template;
use crate::transformations::parse_row_timestamp;
use crate::types::{ExportOutcome, Granularity, MergedTable, Row, FILE_NOT_FOUND, TIME_COLUMN};

/// Ingestion timestamp column dropped from every feed export
pub const ENTRY_TIME_COLUMN: &str = "ENTRY_TIME";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedDate {
    /// Today at the site offset; rows after now are left out
    Today,
    On(NaiveDate),
}

impl FeedDate {
    /// Parse `today` or `YYYY-MM-DD`
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("today") {
            return Ok(FeedDate::Today);
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(FeedDate::On)
            .map_err(|_| InputError::InvalidDate(raw.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub site_id: String,

    /// Keep only the last N rows (takes precedence over `date`)
    pub last_n: Option<usize>,

    pub date: Option<FeedDate>,
}

impl FeedQuery {
    pub fn from_params(
        site_id: Option<&str>,
        last_n: Option<&str>,
        date: Option<&str>,
    ) -> Result<Self, InputError> {
        let site_id = site_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(InputError::MissingParameter("site_id"))?;
        if !site_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(InputError::InvalidParameter {
                name: "site_id",
                value: site_id.to_string(),
            });
        }

        let last_n = match last_n.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.parse::<usize>().map_err(|_| InputError::InvalidParameter {
                name: "last_n",
                value: raw.to_string(),
            })?),
            None => None,
        };

        let date = match date.map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(FeedDate::parse(raw)?),
            None => None,
        };

        Ok(Self {
            site_id: site_id.to_string(),
            last_n,
            date,
        })
    }

    pub fn filename(&self) -> String {
        format!("site_{}.csv", self.site_id)
    }
}

/// Apply the query's row selection and drop `ENTRY_TIME`
pub fn select_feed_rows(
    mut header: Vec<String>,
    rows: Vec<Row>,
    query: &FeedQuery,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> (Vec<String>, Vec<Row>) {
    let mut selected: Vec<Row> = if let Some(n) = query.last_n {
        let skip = rows.len().saturating_sub(n);
        rows.into_iter().skip(skip).collect()
    } else if let Some(date) = query.date {
        let (day, skip_future) = match date {
            FeedDate::Today => (now.with_timezone(&offset).date_naive(), true),
            FeedDate::On(day) => (day, false),
        };
        let needle = day.format("%Y-%m-%d").to_string();
        rows.into_iter()
            .filter(|row| {
                let Some(time) = row.get(TIME_COLUMN) else {
                    return false;
                };
                if !time.contains(&needle) {
                    return false;
                }
                !(skip_future && is_after(time, now, offset))
            })
            .collect()
    } else {
        rows
    };

    header.retain(|column| column != ENTRY_TIME_COLUMN);
    for row in selected.iter_mut() {
        row.remove(ENTRY_TIME_COLUMN);
    }

    (header, selected)
}

fn is_after(time: &str, now: DateTime<Utc>, offset: FixedOffset) -> bool {
    parse_row_timestamp(time, offset)
        .map(|ts| ts.with_timezone(&Utc) > now)
        .unwrap_or(false)
}

pub struct SiteFeed {
    data_root: PathBuf,
    layout: String,
    offset: FixedOffset,
}

impl SiteFeed {
    pub fn new(config: &ForecastConfig) -> Self {
        Self {
            data_root: config.data_root.clone(),
            layout: config.feed_layout.clone(),
            offset: config.offset(),
        }
    }

    pub fn path_for(&self, query: &FeedQuery) -> PathBuf {
        self.data_root.join(render_template(
            &self.layout,
            &[("site_id", query.site_id.as_str())],
        ))
    }

    pub async fn export(
        &self,
        query: &FeedQuery,
        now: DateTime<Utc>,
    ) -> Result<ExportOutcome, ForecastError> {
        let path = self.path_for(query);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Site feed not found");
                return Ok(ExportOutcome::NotFound(FILE_NOT_FOUND));
            }
            Err(e) => {
                return Err(SourceError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
                .into())
            }
        };

        let (header, rows) = parse_table_csv(&content)?;
        let (header, rows) = select_feed_rows(header, rows, query, now, self.offset);
        info!(site = %query.site_id, rows = rows.len(), "Site feed export ready");

        Ok(ExportOutcome::Csv {
            filename: query.filename(),
            table: MergedTable {
                header,
                rows,
                granularity: Granularity::default(),
            },
        })
    }
}
