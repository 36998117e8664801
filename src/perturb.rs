//! Perturbation & Future Masking Filter
//!
//! Demo tenants see real forecast files, so values of the designated columns
//! are scaled by a random factor and anything that has not happened yet is
//! zeroed. Non-demo requests pass through untouched.
//!
//! Designated columns are described by patterns rather than names, so every
//! `GHI Rev<N>` is covered whatever the revision count:
//!
//! - `Revision("GHI")` matches `GHI Rev0` .. `GHI Rev<N>`
//! - `Final("GHI")` matches `GHI Final`
//! - `Exact("AC_POWER_SUM")` matches that column only
//!
//! A row draws ONE factor, shared by all of its designated columns, so a
//! `Final` stays equal to the revision it was resolved from.

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{ForecastConfig, JitterBand};
use crate::revision::ColumnKind;
use crate::transformations::{format_rounded, parse_decimal, parse_row_timestamp};
use crate::types::{Row, TIME_COLUMN};

/// Value written into masked columns for rows in the future
pub const MASKED_VALUE: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnPattern {
    Exact(String),
    Revision(String),
    Final(String),
}

impl ColumnPattern {
    pub fn matches(&self, column: &str) -> bool {
        match self {
            ColumnPattern::Exact(name) => column == name,
            ColumnPattern::Revision(variable) => matches!(
                ColumnKind::classify(column),
                ColumnKind::Revision { variable: ref v, .. } if v == variable
            ),
            ColumnPattern::Final(variable) => matches!(
                ColumnKind::classify(column),
                ColumnKind::Final { variable: ref v } if v == variable
            ),
        }
    }
}

/// Whether a request is perturbed, and which columns are affected
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DemoContext {
    pub enabled: bool,
    pub designated: Vec<ColumnPattern>,
}

impl DemoContext {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Revision and Final columns of every masked variable, plus the ground columns
    pub fn from_config(config: &ForecastConfig, enabled: bool) -> Self {
        let mut designated = Vec::new();
        for variable in &config.masked_variables {
            designated.push(ColumnPattern::Revision(variable.clone()));
            designated.push(ColumnPattern::Final(variable.clone()));
        }
        for column in &config.ground_columns {
            designated.push(ColumnPattern::Exact(column.clone()));
        }
        Self {
            enabled,
            designated,
        }
    }

    pub fn is_designated(&self, column: &str) -> bool {
        self.designated.iter().any(|p| p.matches(column))
    }
}

/// Scale a raw value by `factor`, rounded to 2 decimals
///
/// Null and non-numeric values yield `None` and are left as they are.
pub fn jitter_value(raw: &str, factor: f64) -> Option<String> {
    match parse_decimal(raw) {
        Ok(Some(value)) => Some(format_rounded(value * factor)),
        _ => None,
    }
}

pub struct PerturbationFilter {
    context: DemoContext,
    band: JitterBand,
    offset: FixedOffset,
    rng: StdRng,
}

impl PerturbationFilter {
    /// Filter seeded from OS entropy
    pub fn new(context: DemoContext, band: JitterBand, offset: FixedOffset) -> Self {
        Self::with_rng(context, band, offset, StdRng::from_entropy())
    }

    pub fn with_rng(
        context: DemoContext,
        band: JitterBand,
        offset: FixedOffset,
        rng: StdRng,
    ) -> Self {
        Self {
            context,
            band,
            offset,
            rng,
        }
    }

    /// Filter that never changes a row
    pub fn passthrough(offset: FixedOffset) -> Self {
        Self::new(DemoContext::disabled(), JitterBand::new(1.0, 1.0), offset)
    }

    pub fn is_enabled(&self) -> bool {
        self.context.enabled
    }

    /// Apply jitter or future masking to one row
    ///
    /// `header` lists the columns the row belongs to. The row instant is its
    /// parsed `Time`, or midnight of `slice_date` when `Time` is absent or
    /// unparseable. Rows strictly after `now` get every designated column set
    /// to `0`.
    pub fn apply(
        &mut self,
        row: &mut Row,
        header: &[String],
        slice_date: NaiveDate,
        now: DateTime<Utc>,
    ) {
        if !self.context.enabled {
            return;
        }

        let designated: Vec<&String> = header
            .iter()
            .filter(|column| self.context.is_designated(column))
            .collect();
        if designated.is_empty() {
            return;
        }

        if self.row_instant(row, slice_date) > now {
            for column in designated {
                row.set(column.as_str(), MASKED_VALUE);
            }
            return;
        }

        let factor = self.draw();
        for column in designated {
            let jittered = row.get(column).and_then(|raw| jitter_value(raw, factor));
            if let Some(value) = jittered {
                row.set(column.as_str(), value);
            }
        }
    }

    /// One factor from the jitter band
    pub fn draw(&mut self) -> f64 {
        if self.band.low >= self.band.high {
            return self.band.low;
        }
        self.rng.gen_range(self.band.low..=self.band.high)
    }

    fn row_instant(&self, row: &Row, slice_date: NaiveDate) -> DateTime<Utc> {
        row.get(TIME_COLUMN)
            .and_then(|raw| parse_row_timestamp(raw, self.offset).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(|| self.start_of_day(slice_date))
    }

    fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        self.offset
            .from_local_datetime(&midnight)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn names(columns: &[&str]) -> Vec<String> {
        columns.iter().map(|c| c.to_string()).collect()
    }

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(19_800).unwrap()
    }

    fn demo_filter(seed: u64) -> PerturbationFilter {
        let config = ForecastConfig::default();
        PerturbationFilter::with_rng(
            DemoContext::from_config(&config, true),
            config.forecast_jitter,
            ist(),
            StdRng::seed_from_u64(seed),
        )
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn noon_jan_02() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_pattern_matching() {
        let context = DemoContext::from_config(&ForecastConfig::default(), true);
        assert!(context.is_designated("GHI Rev0"));
        assert!(context.is_designated("Gen Rev41"));
        assert!(context.is_designated("POA Final"));
        assert!(context.is_designated("AC_POWER_SUM"));
        assert!(context.is_designated("Ground GHI"));
        assert!(!context.is_designated("Time"));
        assert!(!context.is_designated("Block"));
        assert!(!context.is_designated("Temperature Rev0"));
    }

    #[test]
    fn test_disabled_filter_passes_through() {
        let mut filter = PerturbationFilter::passthrough(ist());
        let header = names(&["Time", "GHI Rev0"]);
        let mut row: Row = vec![("Time", "2099-01-01 00:00:00"), ("GHI Rev0", "10.123")]
            .into_iter()
            .collect();
        let before = row.clone();

        filter.apply(&mut row, &header, date(), noon_jan_02());
        assert_eq!(row, before);
    }

    #[test]
    fn test_jitter_stays_in_band_with_shared_draw() {
        let header = names(&["Time", "GHI Rev0", "GHI Final", "Block"]);
        for seed in 0..50 {
            let mut filter = demo_filter(seed);
            let mut row: Row = vec![
                ("Time", "2024-01-01 10:00:00+05:30"),
                ("GHI Rev0", "100"),
                ("GHI Final", "100"),
                ("Block", "41"),
            ]
            .into_iter()
            .collect();

            filter.apply(&mut row, &header, date(), noon_jan_02());

            let rev: f64 = row.get("GHI Rev0").unwrap().parse().unwrap();
            assert!((90.0..=110.0).contains(&rev), "out of band: {}", rev);
            assert_eq!(row.get("GHI Final"), row.get("GHI Rev0"));
            assert_eq!(row.get("Block"), Some("41"));
            assert_eq!(row.get("Time"), Some("2024-01-01 10:00:00+05:30"));
        }
    }

    #[test]
    fn test_null_and_text_pass_through() {
        let mut filter = demo_filter(7);
        let header = names(&["Time", "GHI Rev0", "GHI Rev1"]);
        let mut row: Row = vec![
            ("Time", "2024-01-01 10:00:00+05:30"),
            ("GHI Rev0", ""),
            ("GHI Rev1", "n/a"),
        ]
        .into_iter()
        .collect();

        filter.apply(&mut row, &header, date(), noon_jan_02());
        assert_eq!(row.get("GHI Rev0"), Some(""));
        assert_eq!(row.get("GHI Rev1"), Some("n/a"));
    }

    #[test]
    fn test_future_rows_are_zeroed() {
        let mut filter = demo_filter(1);
        let header = names(&["Time", "Gen Rev0", "AC_POWER_SUM", "Temperature"]);
        let mut row: Row = vec![
            ("Time", "2024-01-03 06:00:00+05:30"),
            ("Gen Rev0", "12.5"),
            ("Temperature", "21"),
        ]
        .into_iter()
        .collect();

        filter.apply(&mut row, &header, date(), noon_jan_02());

        assert_eq!(row.get("Gen Rev0"), Some("0"));
        assert_eq!(row.get("AC_POWER_SUM"), Some("0"));
        assert_eq!(row.get("Temperature"), Some("21"));
    }

    #[test]
    fn test_row_without_time_uses_slice_date() {
        let mut filter = demo_filter(1);
        let header = names(&["GHI Rev0"]);
        let mut row: Row = vec![("GHI Rev0", "5")].into_iter().collect();
        let future_day = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();

        filter.apply(&mut row, &header, future_day, noon_jan_02());
        assert_eq!(row.get("GHI Rev0"), Some("0"));
    }

    #[test]
    fn test_degenerate_band() {
        let config = ForecastConfig::default();
        let mut filter = PerturbationFilter::with_rng(
            DemoContext::from_config(&config, true),
            JitterBand::new(1.0, 1.0),
            ist(),
            StdRng::seed_from_u64(3),
        );
        assert_eq!(filter.draw(), 1.0);
    }

    #[test]
    fn test_jitter_value() {
        assert_eq!(jitter_value("10", 1.05), Some("10.50".to_string()));
        assert_eq!(jitter_value("NaN", 1.05), None);
        assert_eq!(jitter_value("abc", 1.05), None);
    }
}
