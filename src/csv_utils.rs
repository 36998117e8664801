//! Shared CSV utilities for the slice parsers
//!
//! Helpers that turn `csv` crate records into [`Row`] values, used by both
//! the day-file parser and the site feed parser.

use crate::types::Row;

/// Column names of a header record, with a leading UTF-8 BOM removed
pub fn header_names(headers: &csv::StringRecord) -> Vec<String> {
    headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if i == 0 {
                h.trim_start_matches('\u{feff}').to_string()
            } else {
                h.to_string()
            }
        })
        .collect()
}

/// Build a [`Row`] from one record
///
/// Values are kept verbatim. Fields past the end of `headers` are dropped;
/// columns past the end of a short record are left absent.
pub fn record_to_row(headers: &[String], record: &csv::StringRecord) -> Row {
    headers
        .iter()
        .zip(record.iter())
        .map(|(name, value)| (name.clone(), value.to_string()))
        .collect()
}
