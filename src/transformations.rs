//! Value and timestamp transformations
//!
//! Helpers shared by the parsers, the resolver and the perturbation filter:
//!
//! 1. **Null detection**: `""`, `"null"`, `"NaN"`, `"N.A."` → null
//! 2. **Decimal parsing**: `"12.5"` → `Some(12.5)`, null tokens → `None`
//! 3. **Rounding**: `12.3456` → `"12.35"`
//! 4. **Row timestamps**: `"2023-10-07 23:45:00+05:30"` → `DateTime<FixedOffset>`
//! 5. **Request timestamps**: `"Mon Jan 01 2024 00:00:00 GMT+0530 (India Standard Time)"`
//! 6. **Table time shifting**: wall-clock ↔ stored UTC using a fixed offset
//!
//! # Example
//!
//! ```rust
//! use solar_forecast_merge::transformations::*;
//!
//! assert_eq!(parse_decimal("12.5").unwrap(), Some(12.5));
//! assert_eq!(parse_decimal("").unwrap(), None);
//! assert_eq!(format_rounded(12.3456), "12.35");
//!
//! let offset = fixed_offset(330).unwrap();
//! let ts = parse_row_timestamp("2023-10-07 23:45:00+05:30", offset).unwrap();
//! assert_eq!(ts.to_rfc3339(), "2023-10-07T23:45:00+05:30");
//! ```

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};

use crate::error::{InputError, ParseError};

/// Tokens treated as null when a value is interpreted
const NULL_TOKENS: [&str; 6] = ["null", "nan", "undefined", "n.a.", "na", "none"];

/// Naive timestamp layouts accepted in day files (interpreted at the site offset)
const NAIVE_LAYOUTS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Offset-carrying timestamp layouts accepted in day files
const OFFSET_LAYOUTS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%#z", "%Y-%m-%d %H:%M%#z"];

/// Browser `Date.toString()` layout, after the "(zone name)" suffix is dropped
const REQUEST_LAYOUT: &str = "%a %b %d %Y %H:%M:%S GMT%z";

// ============================================================================
// Transformation 1: Null Detection
// ============================================================================

/// Check whether a raw value represents null
///
/// # Examples
///
/// ```
/// # use solar_forecast_merge::transformations::is_null_value;
/// assert!(is_null_value(""));
/// assert!(is_null_value("  "));
/// assert!(is_null_value("NaN"));
/// assert!(is_null_value("null"));
/// assert!(!is_null_value("0"));
/// assert!(!is_null_value("0.0"));
/// ```
pub fn is_null_value(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || NULL_TOKENS
            .iter()
            .any(|token| trimmed.eq_ignore_ascii_case(token))
}

// ============================================================================
// Transformation 2: Decimal Parsing
// ============================================================================

/// Parse a numeric cell
///
/// # Returns
///
/// * `Ok(None)` - For null tokens (see [`is_null_value`])
/// * `Ok(Some(f64))` - For valid numbers
/// * `Err(ParseError::InvalidDecimal)` - For anything else
///
/// # Examples
///
/// ```
/// # use solar_forecast_merge::transformations::parse_decimal;
/// assert_eq!(parse_decimal("532.75").unwrap(), Some(532.75));
/// assert_eq!(parse_decimal("-1").unwrap(), Some(-1.0));
/// assert_eq!(parse_decimal("NaN").unwrap(), None);
/// assert!(parse_decimal("abc").is_err());
/// ```
pub fn parse_decimal(value: &str) -> Result<Option<f64>, ParseError> {
    if is_null_value(value) {
        return Ok(None);
    }

    value
        .trim()
        .parse::<f64>()
        .map(Some)
        .map_err(|_| ParseError::InvalidDecimal(value.to_string()))
}

// ============================================================================
// Transformation 3: Number Formatting
// ============================================================================

/// Format a value rounded to 2 decimal places
///
/// # Examples
///
/// ```
/// # use solar_forecast_merge::transformations::format_rounded;
/// assert_eq!(format_rounded(10.0), "10.00");
/// assert_eq!(format_rounded(0.125), "0.13");
/// assert_eq!(format_rounded(-3.14159), "-3.14");
/// ```
pub fn format_rounded(value: f64) -> String {
    format!("{:.2}", (value * 100.0).round() / 100.0)
}

/// Format a value fetched from the database
///
/// Integral values print without a fractional part.
///
/// # Examples
///
/// ```
/// # use solar_forecast_merge::transformations::format_number;
/// assert_eq!(format_number(0.0), "0");
/// assert_eq!(format_number(12.5), "12.5");
/// ```
pub fn format_number(value: f64) -> String {
    format!("{}", value)
}

// ============================================================================
// Transformation 4: Offsets and Row Timestamps
// ============================================================================

/// Build a fixed offset from minutes east of UTC
///
/// Returns `None` when the offset is outside ±24h.
pub fn fixed_offset(minutes: i32) -> Option<FixedOffset> {
    FixedOffset::east_opt(minutes.checked_mul(60)?)
}

/// Parse the `Time` value of a row
///
/// Accepts:
/// - `2023-10-07 23:45:00+05:30` (offset kept)
/// - RFC 3339 (`2023-10-07T23:45:00Z`)
/// - naive `2023-10-07 23:45:00` (interpreted at `offset`)
/// - `2023-10-07` (midnight at `offset`)
/// - `2023-10` (first of month, midnight at `offset`)
///
/// # Examples
///
/// ```
/// # use solar_forecast_merge::transformations::{fixed_offset, parse_row_timestamp};
/// let ist = fixed_offset(330).unwrap();
/// let ts = parse_row_timestamp("2024-01-01 06:00:00", ist).unwrap();
/// assert_eq!(ts.to_rfc3339(), "2024-01-01T06:00:00+05:30");
///
/// let month = parse_row_timestamp("2024-02", ist).unwrap();
/// assert_eq!(month.to_rfc3339(), "2024-02-01T00:00:00+05:30");
///
/// assert!(parse_row_timestamp("tomorrow", ist).is_err());
/// ```
pub fn parse_row_timestamp(
    raw: &str,
    offset: FixedOffset,
) -> Result<DateTime<FixedOffset>, ParseError> {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt);
    }

    for layout in OFFSET_LAYOUTS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, layout) {
            return Ok(dt);
        }
    }

    for layout in NAIVE_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, layout) {
            return localize(naive, offset, raw);
        }
    }

    let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01", trimmed), "%Y-%m-%d"))
        .map_err(|_| ParseError::InvalidTimestamp(raw.to_string()))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ParseError::InvalidTimestamp(raw.to_string()))?;
    localize(midnight, offset, raw)
}

fn localize(
    naive: NaiveDateTime,
    offset: FixedOffset,
    raw: &str,
) -> Result<DateTime<FixedOffset>, ParseError> {
    offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| ParseError::InvalidTimestamp(raw.to_string()))
}

// ============================================================================
// Transformation 5: Request Timestamps
// ============================================================================

/// Parse a request date parameter
///
/// The dashboard sends `Date.toString()` output, e.g.
/// `Mon Jan 01 2024 00:00:00 GMT+0530 (India Standard Time)`. The zone name
/// in parentheses is ignored. A `+` that was decoded to a space by the query
/// string layer (`GMT 0530`) is restored. Row timestamp layouts are accepted
/// as a fallback (see [`parse_row_timestamp`]).
///
/// # Examples
///
/// ```
/// # use solar_forecast_merge::transformations::{fixed_offset, parse_request_timestamp};
/// let ist = fixed_offset(330).unwrap();
/// let ts = parse_request_timestamp(
///     "Mon Jan 01 2024 00:00:00 GMT+0530 (India Standard Time)",
///     ist,
/// ).unwrap();
/// assert_eq!(ts.to_rfc3339(), "2024-01-01T00:00:00+05:30");
///
/// let iso = parse_request_timestamp("2024-01-02", ist).unwrap();
/// assert_eq!(iso.to_rfc3339(), "2024-01-02T00:00:00+05:30");
///
/// assert!(parse_request_timestamp("Foo Bar", ist).is_err());
/// ```
pub fn parse_request_timestamp(
    raw: &str,
    offset: FixedOffset,
) -> Result<DateTime<FixedOffset>, InputError> {
    let without_zone_name = raw.split(" (").next().unwrap_or(raw).trim();
    let restored = without_zone_name.replace("GMT ", "GMT+");

    if let Ok(dt) = DateTime::parse_from_str(&restored, REQUEST_LAYOUT) {
        return Ok(dt);
    }

    parse_row_timestamp(without_zone_name, offset)
        .map_err(|_| InputError::InvalidTimestamp(raw.to_string()))
}

// ============================================================================
// Transformation 6: Table Time Shifting
// ============================================================================

/// Format a stored UTC time for display at `offset`
///
/// # Examples
///
/// ```
/// # use chrono::NaiveDate;
/// # use solar_forecast_merge::transformations::{fixed_offset, format_table_time};
/// let ist = fixed_offset(330).unwrap();
/// let stored = NaiveDate::from_ymd_opt(2023, 10, 7).unwrap().and_hms_opt(18, 15, 0).unwrap();
/// assert_eq!(format_table_time(stored, ist), "2023-10-07 23:45:00+05:30");
/// ```
pub fn format_table_time(stored: NaiveDateTime, offset: FixedOffset) -> String {
    offset
        .from_utc_datetime(&stored)
        .format("%Y-%m-%d %H:%M:%S%:z")
        .to_string()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ist() -> FixedOffset {
        fixed_offset(330).unwrap()
    }

    #[test]
    fn test_null_tokens() {
        for token in ["", " ", "null", "NULL", "NaN", "undefined", "N.A.", "None"] {
            assert!(is_null_value(token), "{:?} should be null", token);
        }
        for value in ["0", "0.0", "-1", "12.5", "abc"] {
            assert!(!is_null_value(value), "{:?} should not be null", value);
        }
    }

    #[test]
    fn test_parse_decimal_trims_whitespace() {
        assert_eq!(parse_decimal(" 42.5 ").unwrap(), Some(42.5));
    }

    #[test]
    fn test_parse_decimal_invalid() {
        let err = parse_decimal("12,5a").unwrap_err();
        assert_eq!(err, ParseError::InvalidDecimal("12,5a".to_string()));
    }

    #[test]
    fn test_format_rounded_half_up() {
        assert_eq!(format_rounded(1.005 * 1000.0), "1005.00");
        assert_eq!(format_rounded(2.6789), "2.68");
        assert_eq!(format_rounded(0.0), "0.00");
    }

    #[test]
    fn test_fixed_offset_bounds() {
        assert_eq!(fixed_offset(330).unwrap().local_minus_utc(), 19_800);
        assert_eq!(fixed_offset(-300).unwrap().local_minus_utc(), -18_000);
        assert!(fixed_offset(24 * 60).is_none());
    }

    #[test]
    fn test_parse_row_timestamp_with_offset() {
        let ts = parse_row_timestamp("2023-10-07 23:45:00+05:30", ist()).unwrap();
        assert_eq!(ts.to_rfc3339(), "2023-10-07T23:45:00+05:30");

        let compact = parse_row_timestamp("2023-10-07 23:45:00+0530", ist()).unwrap();
        assert_eq!(compact, ts);
    }

    #[test]
    fn test_parse_row_timestamp_rfc3339() {
        let ts = parse_row_timestamp("2023-10-07T18:15:00Z", ist()).unwrap();
        assert_eq!(ts.with_timezone(&ist()).to_rfc3339(), "2023-10-07T23:45:00+05:30");
    }

    #[test]
    fn test_parse_row_timestamp_naive_uses_offset() {
        let ts = parse_row_timestamp("2023-10-07 06:15", ist()).unwrap();
        assert_eq!(ts.offset().local_minus_utc(), 19_800);
        assert_eq!(ts.format("%H:%M").to_string(), "06:15");
    }

    #[test]
    fn test_parse_row_timestamp_invalid() {
        assert!(parse_row_timestamp("2024-13-01 00:00:00", ist()).is_err());
        assert!(parse_row_timestamp("", ist()).is_err());
    }

    #[test]
    fn test_parse_request_timestamp_browser_format() {
        let ts = parse_request_timestamp(
            "Tue Jan 02 2024 15:30:00 GMT+0530 (India Standard Time)",
            ist(),
        )
        .unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-02T15:30:00+05:30");
    }

    #[test]
    fn test_parse_request_timestamp_decoded_plus() {
        let ts = parse_request_timestamp(
            "Tue Jan 02 2024 15:30:00 GMT 0530 (India Standard Time)",
            ist(),
        )
        .unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-01-02T15:30:00+05:30");
    }

    #[test]
    fn test_parse_request_timestamp_negative_offset() {
        let ts = parse_request_timestamp(
            "Tue Jan 02 2024 15:30:00 GMT-0500 (Eastern Standard Time)",
            ist(),
        )
        .unwrap();
        assert_eq!(ts.offset().local_minus_utc(), -18_000);
    }

    #[test]
    fn test_parse_request_timestamp_invalid() {
        let err = parse_request_timestamp("not a date", ist()).unwrap_err();
        assert_eq!(err, InputError::InvalidTimestamp("not a date".to_string()));
    }

    #[test]
    fn test_table_time_display_follows_offset() {
        let stored = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(5, 0, 0)
            .unwrap();
        assert_eq!(format_table_time(stored, ist()), "2024-01-01 10:30:00+05:30");
        assert_eq!(
            format_table_time(stored, fixed_offset(-300).unwrap()),
            "2024-01-01 00:00:00-05:00"
        );
    }
}
