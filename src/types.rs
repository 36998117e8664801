//! Data structures shared by every stage of a merge
//!
//! A `Slice` is one source unit (a day file or one pivoted query result), a
//! `Row` is one record inside it. Rows keep raw strings exactly as read so
//! that non-demo output is byte-identical to the source.

use std::collections::HashMap;

use chrono::NaiveDate;

/// Name of the timestamp column every row carries
pub const TIME_COLUMN: &str = "Time";

/// Name of the block index column carried by table-sourced rows
pub const BLOCK_COLUMN: &str = "Block";

/// Sentinel body for a merge where no slice exists for any requested date
pub const FILES_NOT_FOUND: &str = "Files not found";

/// Sentinel body for single-file exports whose file is absent
pub const FILE_NOT_FOUND: &str = "File not found";

/// One record of a slice, keyed by column name
///
/// A column missing from the map is null/absent and renders as an empty
/// field. Present values are kept verbatim; whether a present value counts
/// as null is decided by the consumer (see `transformations::is_null_value`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: HashMap<String, String>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value of a column, if present
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.values.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<String> {
        self.values.remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.values.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values ordered by `header`, missing columns rendered as ""
    pub fn project<'a>(&'a self, header: &'a [String]) -> impl Iterator<Item = &'a str> + 'a {
        header
            .iter()
            .map(move |column| self.get(column).unwrap_or(""))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Row {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// One source unit of data
///
/// Either one calendar day's forecast file for a (client, site) pair or one
/// pivoted query result for a time range. Constructed per request, consumed
/// once by the merge, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    /// Logical date of the slice (the day file's date, or the range start)
    pub date: NaiveDate,

    /// Column names in source order
    pub headers: Vec<String>,

    /// Records in source order
    pub rows: Vec<Row>,
}

impl Slice {
    pub fn new(date: NaiveDate, headers: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            date,
            headers,
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Output granularity of a request
///
/// Parsed from the `timeframe` parameter. Drives the path/filename token and
/// the one-time relabel of the `Time` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Granularity {
    /// Daily aggregates, `Time` is shown as `Date`
    Daily,
    /// Monthly aggregates, `Time` is shown as `Month`
    Monthly,
    /// Any other token (e.g. "Forecast"), `Time` is kept
    Raw(String),
}

impl Granularity {
    /// Parse a timeframe token
    ///
    /// # Examples
    ///
    /// ```
    /// # use solar_forecast_merge::Granularity;
    /// assert_eq!(Granularity::parse("daily"), Granularity::Daily);
    /// assert_eq!(Granularity::parse("Monthly"), Granularity::Monthly);
    /// assert_eq!(Granularity::parse("Forecast"), Granularity::Raw("Forecast".to_string()));
    /// ```
    pub fn parse(token: &str) -> Self {
        let trimmed = token.trim();
        if trimmed.eq_ignore_ascii_case("daily") {
            Granularity::Daily
        } else if trimmed.eq_ignore_ascii_case("monthly") {
            Granularity::Monthly
        } else {
            Granularity::Raw(trimmed.to_string())
        }
    }

    /// Token used in paths and filenames
    pub fn label(&self) -> &str {
        match self {
            Granularity::Daily => "Daily",
            Granularity::Monthly => "Monthly",
            Granularity::Raw(token) => token,
        }
    }

    /// Output name of the `Time` column, if it gets relabelled
    pub fn time_label(&self) -> Option<&'static str> {
        match self {
            Granularity::Daily => Some("Date"),
            Granularity::Monthly => Some("Month"),
            Granularity::Raw(_) => None,
        }
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Granularity::Raw("Forecast".to_string())
    }
}

/// Table ready to be encoded as CSV
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTable {
    /// Unified header (source names, before relabelling)
    pub header: Vec<String>,

    /// Rows in output order
    pub rows: Vec<Row>,

    /// Granularity that decides the `Time` relabel at emission
    pub granularity: Granularity,
}

/// Result of an export request
///
/// Either a table to encode, or the sentinel text for "nothing to return".
#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Csv {
        /// Attachment filename for Content-Disposition
        filename: String,
        table: MergedTable,
    },
    NotFound(&'static str),
}

impl ExportOutcome {
    /// HTTP status for the routing layer (404 for the not-found sentinel)
    pub fn status_code(&self) -> u16 {
        match self {
            ExportOutcome::Csv { .. } => 200,
            ExportOutcome::NotFound(_) => 404,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportOutcome::Csv { .. } => "text/csv",
            ExportOutcome::NotFound(_) => "text/plain",
        }
    }

    /// Content-Disposition header value, for CSV payloads only
    pub fn content_disposition(&self) -> Option<String> {
        match self {
            ExportOutcome::Csv { filename, .. } => {
                Some(format!("attachment; filename={}", filename))
            }
            ExportOutcome::NotFound(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ExportOutcome::NotFound(_))
    }
}
