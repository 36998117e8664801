//! Table variant of the Row Source Adapter
//!
//! Forecasts are stored in long format in `forecast_prod`, one row per
//! `(site, time, block, variable, revision)`, with times in UTC. A request
//! becomes ONE range query joined against the `ground_data` measurements;
//! the result is pivoted into wide rows by
//! [`pivot_long_rows`](crate::revision::pivot_long_rows).
//!
//! ```text
//! forecast_prod (long)        ground_data
//!   block, time, site_id,       time, site_id,
//!   forecast_variable,          ground_generation,
//!   revision_number, value      ground_ghi, ground_poa
//!            \                     /
//!             LEFT JOIN on (time, site_id)
//!                       |
//!            pivot by (time, block) → wide Slice
//! ```

use async_trait::async_trait;
use chrono::{FixedOffset, NaiveDate, NaiveDateTime};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row as _};
use tracing::debug;

use crate::config::ForecastConfig;
use crate::error::ForecastError;
use crate::request::ForecastRequest;
use crate::revision::{pivot_long_rows, GroundReading, LongRow, RevisionFamily};
use crate::source::{SiteDirectory, SiteMetadata, SliceKey, SliceSource};
use crate::types::Slice;

/// Long rows of one site in a time range, with the joined measurements
pub const RANGE_QUERY: &str = r#"
    select
      f.block::bigint as block,
      f.time::timestamp as time,
      f.forecast_variable::text as forecast_variable,
      f.revision_number::text as revision_number,
      f.value::float8 as value,
      g.ground_generation::float8 as ground_generation,
      g.ground_ghi::float8 as ground_ghi,
      g.ground_poa::float8 as ground_poa
    from forecast_prod f
    left join ground_data g
      on g.time = f.time
     and g.site_id = f.site_id
    where f.site_id = $1
      and f.time >= $2
      and f.time <= $3
    order by f.time asc, f.block asc
    "#;

/// Site id and live forecast folder by (site name, company)
pub const SITE_QUERY: &str = r#"
    select
      id::bigint as id,
      forecast_type
    from utility_sites
    where sitename = $1
      and company = $2
    "#;

/// One range query per request against the long-format forecast table
#[derive(Debug, Clone)]
pub struct TableSource {
    pool: PgPool,
    families: Vec<RevisionFamily>,
    offset: FixedOffset,
}

impl TableSource {
    pub fn new(pool: PgPool, config: &ForecastConfig) -> Self {
        Self {
            pool,
            families: RevisionFamily::from_config(config),
            offset: config.offset(),
        }
    }

    /// Stored (UTC) bounds of a key's range
    ///
    /// The instants keep the caller's own offset, so the configured site
    /// offset plays no part here.
    pub fn bounds(&self, key: &SliceKey) -> (NaiveDateTime, NaiveDateTime) {
        (key.start.naive_utc(), key.end.naive_utc())
    }

    async fn fetch_long_rows(
        &self,
        site_id: i64,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<LongRow>, ForecastError> {
        let rows = sqlx::query(RANGE_QUERY)
            .bind(site_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in &rows {
            out.push(decode_long_row(r)?);
        }
        Ok(out)
    }
}

fn decode_long_row(r: &PgRow) -> Result<LongRow, sqlx::Error> {
    Ok(LongRow {
        block: r.try_get::<i64, _>("block")?,
        time: r.try_get::<NaiveDateTime, _>("time")?,
        variable: r.try_get::<String, _>("forecast_variable")?,
        revision: r.try_get::<String, _>("revision_number")?,
        value: r.try_get::<Option<f64>, _>("value")?,
        ground: GroundReading {
            generation: r.try_get::<Option<f64>, _>("ground_generation")?,
            ghi: r.try_get::<Option<f64>, _>("ground_ghi")?,
            poa: r.try_get::<Option<f64>, _>("ground_poa")?,
        },
    })
}

/// Key covering the whole request range, if the range is not empty
pub fn plan_range(request: &ForecastRequest, site: &SiteMetadata) -> Vec<SliceKey> {
    let Some(first) = request.dates().first().copied() else {
        return Vec::new();
    };

    vec![SliceKey {
        client: request.client.clone(),
        site: request.site.clone(),
        date: first,
        start: request.start,
        end: request.end,
        granularity: request.granularity.clone(),
        folder: String::new(),
        site_id: site.site_id,
    }]
}

#[async_trait]
impl SliceSource for TableSource {
    fn name(&self) -> &'static str {
        "table"
    }

    fn plan(
        &self,
        request: &ForecastRequest,
        site: &SiteMetadata,
        _today: NaiveDate,
    ) -> Vec<SliceKey> {
        plan_range(request, site)
    }

    async fn load(&self, key: &SliceKey) -> Result<Option<Slice>, ForecastError> {
        let site_id = key.site_id.ok_or_else(|| {
            ForecastError::NotFound(format!("site '{}' of '{}'", key.site, key.client))
        })?;

        let (start, end) = self.bounds(key);
        let long_rows = self.fetch_long_rows(site_id, start, end).await?;
        debug!(
            site_id,
            start = %start,
            end = %end,
            rows = long_rows.len(),
            "Range query returned"
        );

        if long_rows.is_empty() {
            return Ok(None);
        }

        let (headers, rows) = pivot_long_rows(&long_rows, &self.families, self.offset);
        Ok(Some(Slice::new(key.date, headers, rows)))
    }

    fn filename(&self, request: &ForecastRequest) -> String {
        request.range_filename()
    }
}

/// Site directory backed by `utility_sites`
#[derive(Debug, Clone)]
pub struct PgSiteDirectory {
    pool: PgPool,
}

impl PgSiteDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SiteDirectory for PgSiteDirectory {
    async fn lookup(&self, client: &str, site: &str) -> Result<SiteMetadata, ForecastError> {
        let row = sqlx::query(SITE_QUERY)
            .bind(site)
            .bind(client)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(SiteMetadata {
                site_id: Some(r.try_get::<i64, _>("id")?),
                forecast_folder: r.try_get::<Option<String>, _>("forecast_type")?,
            }),
            None => {
                debug!(client, site, "Site not registered");
                Ok(SiteMetadata::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestParams;
    use sqlx::postgres::PgPoolOptions;

    fn request(start: &str, end: &str) -> ForecastRequest {
        let params = RequestParams {
            client: Some("Acme".to_string()),
            site: Some("Plant1".to_string()),
            start_date: Some(start.to_string()),
            end_date: Some(end.to_string()),
            timeframe: None,
        };
        ForecastRequest::from_params(&params, &ForecastConfig::default()).unwrap()
    }

    fn lazy_source() -> TableSource {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://forecast@localhost/forecast")
            .unwrap();
        TableSource::new(pool, &ForecastConfig::default())
    }

    #[test]
    fn test_range_query_shape() {
        assert!(RANGE_QUERY.contains("left join ground_data g"));
        assert!(RANGE_QUERY.contains("g.site_id = f.site_id"));
        assert!(RANGE_QUERY.contains("f.time >= $2"));
        assert!(RANGE_QUERY.contains("f.time <= $3"));
        assert!(RANGE_QUERY.contains("order by f.time asc, f.block asc"));
        assert!(SITE_QUERY.contains("from utility_sites"));
    }

    #[test]
    fn test_plan_single_key() {
        let site = SiteMetadata {
            site_id: Some(12),
            forecast_folder: None,
        };
        let keys = plan_range(&request("2024-01-01", "2024-01-05"), &site);

        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(keys[0].site_id, Some(12));
    }

    #[test]
    fn test_plan_reversed_range_is_empty() {
        let keys = plan_range(&request("2024-01-05", "2024-01-01"), &SiteMetadata::default());
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn test_bounds_shift_to_utc() {
        let source = lazy_source();
        let keys = plan_range(
            &request(
                "Mon Jan 01 2024 00:00:00 GMT+0530 (India Standard Time)",
                "Mon Jan 01 2024 23:59:59 GMT+0530 (India Standard Time)",
            ),
            &SiteMetadata::default(),
        );

        let (start, end) = source.bounds(&keys[0]);
        assert_eq!(start.to_string(), "2023-12-31 18:30:00");
        assert_eq!(end.to_string(), "2024-01-01 18:29:59");
    }

    #[tokio::test]
    async fn test_bounds_use_caller_offset() {
        let source = lazy_source();
        let keys = plan_range(
            &request(
                "Mon Jan 01 2024 00:00:00 GMT-0500 (Eastern Standard Time)",
                "Tue Jan 02 2024 00:00:00 GMT-0500 (Eastern Standard Time)",
            ),
            &SiteMetadata::default(),
        );

        let (start, end) = source.bounds(&keys[0]);
        assert_eq!(start.to_string(), "2024-01-01 05:00:00");
        assert_eq!(end.to_string(), "2024-01-02 05:00:00");
    }

    #[tokio::test]
    async fn test_missing_site_id_is_not_found() {
        let source = lazy_source();
        let keys = plan_range(&request("2024-01-01", "2024-01-01"), &SiteMetadata::default());

        let err = source.load(&keys[0]).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_range_filename() {
        let source = lazy_source();
        assert_eq!(
            source.filename(&request("2024-01-01", "2024-01-02")),
            "Acme_Plant1_Forecast_2024-01-01_2024-01-02.csv"
        );
    }
}
