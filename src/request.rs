//! Request parameter validation
//!
//! Turns the raw query parameters handed over by the routing layer into a
//! [`ForecastRequest`]. Everything here runs before any slice is read, so a
//! bad date never costs a file open or a query.
//!
//! # Example
//!
//! ```rust
//! use solar_forecast_merge::config::ForecastConfig;
//! use solar_forecast_merge::request::{ForecastRequest, RequestParams};
//!
//! let params = RequestParams {
//!     client: Some("Demo".to_string()),
//!     site: Some("Demo-Site".to_string()),
//!     start_date: Some("Mon Jan 01 2024 00:00:00 GMT+0530 (India Standard Time)".to_string()),
//!     end_date: Some("Wed Jan 03 2024 00:00:00 GMT+0530 (India Standard Time)".to_string()),
//!     timeframe: None,
//! };
//!
//! let request = ForecastRequest::from_params(&params, &ForecastConfig::default()).unwrap();
//! assert!(request.is_demo);
//! assert_eq!(request.client, "Demo");
//! assert_eq!(request.dates().len(), 3);
//! ```

use chrono::{DateTime, FixedOffset, NaiveDate};

use crate::config::ForecastConfig;
use crate::error::InputError;
use crate::transformations::parse_request_timestamp;
use crate::types::Granularity;

/// Placeholder client name used by the public demo dashboard
pub const DEMO_CLIENT_ALIAS: &str = "Demo";

/// Placeholder site name used by the public demo dashboard
pub const DEMO_SITE_ALIAS: &str = "Demo-Site";

/// Raw request parameters, as received
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParams {
    pub client: Option<String>,
    pub site: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub timeframe: Option<String>,
}

/// Validated forecast merge request
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRequest {
    /// Company name after demo substitution
    pub client: String,

    /// Site name after demo substitution
    pub site: String,

    /// Range start, in the offset the caller sent
    pub start: DateTime<FixedOffset>,

    /// Range end (inclusive), in the offset the caller sent
    pub end: DateTime<FixedOffset>,

    pub granularity: Granularity,

    /// Perturbation and future masking apply
    pub is_demo: bool,
}

impl ForecastRequest {
    /// Validate parameters and apply the demo client/site substitution
    ///
    /// # Errors
    ///
    /// * `InputError::MissingParameter` - `client`, `site`, `startDate` or `endDate` absent or blank
    /// * `InputError::InvalidTimestamp` - a date parameter could not be parsed
    pub fn from_params(
        params: &RequestParams,
        config: &ForecastConfig,
    ) -> Result<Self, InputError> {
        let client = required(&params.client, "client")?;
        let site = required(&params.site, "site")?;
        let start_raw = required(&params.start_date, "startDate")?;
        let end_raw = required(&params.end_date, "endDate")?;

        let offset = config.offset();
        let start = parse_request_timestamp(start_raw, offset)?;
        let end = parse_request_timestamp(end_raw, offset)?;

        let granularity = params
            .timeframe
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .map(Granularity::parse)
            .unwrap_or_default();

        let (client, site, is_demo) = resolve_demo_identity(client, site, config);

        Ok(Self {
            client,
            site,
            start,
            end,
            granularity,
            is_demo,
        })
    }

    /// Calendar dates covered by the request, ascending and inclusive
    ///
    /// Each bound contributes its own local date. A start after the end
    /// yields no dates.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let first = self.start.date_naive();
        let last = self.end.date_naive();

        first
            .iter_days()
            .take_while(|date| *date <= last)
            .collect()
    }

    /// Attachment filename for a merge over this request
    pub fn merged_filename(&self) -> String {
        format!(
            "{}_{}_{}_Merged.csv",
            self.client,
            self.site,
            self.granularity.label()
        )
    }

    /// Attachment filename for a range query over this request
    pub fn range_filename(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}.csv",
            self.client,
            self.site,
            self.granularity.label(),
            self.start.format("%Y-%m-%d"),
            self.end.format("%Y-%m-%d")
        )
    }
}

/// Map the demo aliases onto the configured demo company and site
///
/// Returns `(client, site, is_demo)`. Either alias marks the request as demo.
pub fn resolve_demo_identity(
    client: &str,
    site: &str,
    config: &ForecastConfig,
) -> (String, String, bool) {
    let demo_client = client == DEMO_CLIENT_ALIAS;
    let demo_site = site == DEMO_SITE_ALIAS;

    let client = if demo_client {
        config.demo_company.clone()
    } else {
        client.to_string()
    };
    let site = if demo_site {
        config.demo_site.clone()
    } else {
        site.to_string()
    };

    (client, site, demo_client || demo_site)
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, InputError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(InputError::MissingParameter(name)),
    }
}
