//! Error types for the forecast merge engine
//!
//! Provides error handling for every failure mode of a merge request:
//! - Invalid request input (missing or unparseable dates, bad timeframe)
//! - Source read errors (unreadable day file, failed range query)
//! - CSV parsing errors (malformed day file)
//! - Slice absence (recovered by the merge loop, never fatal on its own)

use std::fmt;

/// Top-level error type for the forecast merge engine
///
/// Supports automatic conversion from specific error types via From trait
#[derive(Debug)]
pub enum ForecastError {
    /// Request parameters rejected before any slice processing
    Input(InputError),

    /// I/O or query failure while reading a slice
    Source(SourceError),

    /// Malformed slice content
    Parse(ParseError),

    /// Requested slice, file or site does not exist
    ///
    /// The merge loop skips slices that fail with this variant.
    NotFound(String),

    /// Invalid or unreadable configuration
    Config(String),
}

impl ForecastError {
    /// True for slice-level absence, which callers recover from
    pub fn is_not_found(&self) -> bool {
        matches!(self, ForecastError::NotFound(_))
    }
}

impl fmt::Display for ForecastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastError::Input(e) => write!(f, "Invalid input: {}", e),
            ForecastError::Source(e) => write!(f, "Source read error: {}", e),
            ForecastError::Parse(e) => write!(f, "Parse error: {}", e),
            ForecastError::NotFound(what) => write!(f, "Not found: {}", what),
            ForecastError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ForecastError {}

impl From<InputError> for ForecastError {
    fn from(err: InputError) -> Self {
        ForecastError::Input(err)
    }
}

impl From<SourceError> for ForecastError {
    fn from(err: SourceError) -> Self {
        ForecastError::Source(err)
    }
}

impl From<ParseError> for ForecastError {
    fn from(err: ParseError) -> Self {
        ForecastError::Parse(err)
    }
}

impl From<csv::Error> for ForecastError {
    fn from(err: csv::Error) -> Self {
        ForecastError::Parse(ParseError::CsvFormat(err.to_string()))
    }
}

impl From<sqlx::Error> for ForecastError {
    fn from(err: sqlx::Error) -> Self {
        ForecastError::Source(SourceError::Query(err.to_string()))
    }
}

/// Request input errors
///
/// Raised while validating request parameters, before any slice is read
#[derive(Debug, Clone, PartialEq)]
pub enum InputError {
    /// Required request parameter is absent or blank
    ///
    /// Example: no `startDate` on a forecast merge request
    MissingParameter(&'static str),

    /// Timestamp parameter could not be parsed
    ///
    /// Example: "Mon Foo 01 2024" (unknown month)
    InvalidTimestamp(String),

    /// Feed date filter is neither "today" nor YYYY-MM-DD
    InvalidDate(String),

    /// Parameter present but not acceptable (e.g. a non-numeric `last_n`)
    InvalidParameter { name: &'static str, value: String },
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::MissingParameter(name) => {
                write!(f, "Missing required parameter: '{}'", name)
            }
            InputError::InvalidTimestamp(val) => {
                write!(
                    f,
                    "Invalid timestamp: '{}' (expected 'Www Mon DD YYYY HH:mm:ss GMT+HHmm (zone)')",
                    val
                )
            }
            InputError::InvalidDate(val) => {
                write!(f, "Invalid date filter: '{}' (expected 'today' or YYYY-MM-DD)", val)
            }
            InputError::InvalidParameter { name, value } => {
                write!(f, "Invalid value for '{}': '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for InputError {}

/// Slice read errors
///
/// Fatal for the request while no output has been committed
#[derive(Debug, Clone)]
pub enum SourceError {
    /// Day file exists but could not be read
    Io { path: String, message: String },

    /// Range query against the forecast table failed
    Query(String),

    /// Output sink failed while streaming
    Stream(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Io { path, message } => {
                write!(f, "Failed to read '{}': {}", path, message)
            }
            SourceError::Query(msg) => write!(f, "Query failed: {}", msg),
            SourceError::Stream(msg) => write!(f, "Output stream failed: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// CSV and value parsing errors
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// CSV format error (unterminated quote, invalid UTF-8, ragged row)
    CsvFormat(String),

    /// Row timestamp could not be parsed
    ///
    /// Example: "2024-13-01 00:00:00" (invalid month)
    InvalidTimestamp(String),

    /// Numeric value could not be parsed
    InvalidDecimal(String),

    /// Required CSV column is missing
    ///
    /// Example: day file without a "Time" column
    MissingColumn(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::CsvFormat(msg) => write!(f, "CSV format error: {}", msg),
            ParseError::InvalidTimestamp(val) => {
                write!(
                    f,
                    "Invalid timestamp format: '{}' (expected YYYY-MM-DD HH:MM:SS[+HH:MM])",
                    val
                )
            }
            ParseError::InvalidDecimal(val) => write!(f, "Invalid decimal value: '{}'", val),
            ParseError::MissingColumn(col) => write!(f, "Missing required column: '{}'", col),
        }
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_error_conversion() {
        let err = InputError::MissingParameter("startDate");
        let forecast_err: ForecastError = err.into();

        match forecast_err {
            ForecastError::Input(InputError::MissingParameter(name)) => {
                assert_eq!(name, "startDate");
            }
            _ => panic!("Expected Input error"),
        }
    }

    #[test]
    fn test_parse_error_conversion() {
        let err = ParseError::MissingColumn("Time".to_string());
        let forecast_err: ForecastError = err.into();
        assert!(matches!(
            forecast_err,
            ForecastError::Parse(ParseError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_not_found_is_recoverable() {
        assert!(ForecastError::NotFound("site".to_string()).is_not_found());
        assert!(!ForecastError::Config("bad band".to_string()).is_not_found());
        assert!(!ForecastError::from(SourceError::Query("timeout".to_string())).is_not_found());
    }

    #[test]
    fn test_source_error_formatting() {
        let err = SourceError::Io {
            path: "/data/Acme/ml_forecasts/day.csv".to_string(),
            message: "permission denied".to_string(),
        };
        let msg = format!("{}", ForecastError::from(err));
        assert!(msg.contains("Source read error"));
        assert!(msg.contains("day.csv"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_error_display_formatting() {
        let err = InputError::InvalidTimestamp("yesterday".to_string());
        let msg = format!("{}", err);
        assert!(msg.contains("Invalid timestamp"));
        assert!(msg.contains("yesterday"));
    }
}
