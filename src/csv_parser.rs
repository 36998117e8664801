//! CSV parser for forecast day files and site feeds
//!
//! Turns the text of one CSV document into a header list plus [`Row`]s,
//! keeping every value exactly as written.
//!
//! # CSV Format
//!
//! - **Delimiter:** Comma (`,`)
//! - **Encoding:** UTF-8 (a leading BOM is ignored)
//! - **Header Row:** Always present
//! - **Ragged rows:** Allowed; missing trailing fields are absent (rendered empty)
//!
//! # Examples
//!
//! ```rust
//! use chrono::NaiveDate;
//! use solar_forecast_merge::csv_parser::parse_slice_csv;
//!
//! let csv = "Time,GHI Rev0,GHI Rev1\n2024-01-01 06:00:00,10,12\n";
//! let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//!
//! let slice = parse_slice_csv(csv, date).unwrap();
//! assert_eq!(slice.headers, vec!["Time", "GHI Rev0", "GHI Rev1"]);
//! assert_eq!(slice.rows[0].get("GHI Rev1"), Some("12"));
//! ```

use chrono::NaiveDate;
use csv::ReaderBuilder;

use crate::csv_utils::{header_names, record_to_row};
use crate::error::{ForecastError, ParseError};
use crate::types::{Row, Slice, TIME_COLUMN};

/// Parse a CSV document into its header and rows
///
/// An empty document yields no header and no rows.
///
/// # Returns
///
/// * `Ok((headers, rows))` - Columns in source order and rows in source order
/// * `Err(ForecastError::Parse)` - Malformed CSV (e.g. invalid UTF-8)
pub fn parse_table_csv(csv_content: &str) -> Result<(Vec<String>, Vec<Row>), ForecastError> {
    if csv_content.trim().is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut reader = ReaderBuilder::new()
        .delimiter(b',')
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_content.as_bytes());

    let headers = header_names(reader.headers().map_err(|e| {
        ParseError::CsvFormat(format!("Failed to read CSV headers: {}", e))
    })?);

    let mut rows = Vec::new();
    for result in reader.records() {
        let record =
            result.map_err(|e| ParseError::CsvFormat(format!("CSV parse error: {}", e)))?;
        rows.push(record_to_row(&headers, &record));
    }

    Ok((headers, rows))
}

/// Parse a forecast day file into a [`Slice`]
///
/// # Arguments
///
/// * `csv_content` - Raw file content
/// * `date` - Logical date of the day file
///
/// # Returns
///
/// * `Ok(Slice)` - Parsed slice (empty for an empty file)
/// * `Err(ForecastError::Parse)` - Malformed CSV, or a header without `Time`
pub fn parse_slice_csv(csv_content: &str, date: NaiveDate) -> Result<Slice, ForecastError> {
    let (headers, rows) = parse_table_csv(csv_content)?;

    if !headers.is_empty() && !headers.iter().any(|h| h == TIME_COLUMN) {
        return Err(ParseError::MissingColumn(TIME_COLUMN.to_string()).into());
    }

    Ok(Slice::new(date, headers, rows))
}

// ============================================================================
// TESTS
// ============================================================================
