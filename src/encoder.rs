//! CSV output encoder
//!
//! Writes a [`MergedTable`] as one header line followed by one line per row.
//! The header is relabelled for the granularity and flushed before any row,
//! which is the commit point of a response: a failure before it is returned
//! to the caller, a failure after it is only logged.

use std::io::Write;

use tracing::{info, warn};

use crate::error::{ForecastError, SourceError};
use crate::merge::AbortSignal;
use crate::schema::relabel_time;
use crate::types::MergedTable;

/// What happened while streaming one table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    pub rows_written: usize,

    /// False when the stream stopped early (abort or write failure)
    pub completed: bool,
}

/// Stream a table as CSV
///
/// # Errors
///
/// `SourceError::Stream` when the header cannot be written. Later failures
/// end the stream early and are reported through [`StreamReport`].
pub fn stream_csv<W: Write>(
    table: &MergedTable,
    writer: W,
    abort: &AbortSignal,
) -> Result<StreamReport, ForecastError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut report = StreamReport::default();

    let header = relabel_time(&table.header, &table.granularity);
    csv_writer
        .write_record(&header)
        .and_then(|_| csv_writer.flush().map_err(csv::Error::from))
        .map_err(|e| SourceError::Stream(format!("Failed to write CSV header: {}", e)))?;

    for row in &table.rows {
        if abort.is_aborted() {
            info!(rows = report.rows_written, "Output aborted by receiver");
            return Ok(report);
        }
        if let Err(e) = csv_writer.write_record(row.project(&table.header)) {
            warn!(rows = report.rows_written, error = %e, "CSV row write failed after header");
            return Ok(report);
        }
        report.rows_written += 1;
    }

    if let Err(e) = csv_writer.flush() {
        warn!(rows = report.rows_written, error = %e, "CSV flush failed after header");
        return Ok(report);
    }

    report.completed = true;
    Ok(report)
}

/// Encode a table into an in-memory CSV document
pub fn encode_csv(table: &MergedTable) -> Result<String, ForecastError> {
    let mut buffer = Vec::new();
    stream_csv(table, &mut buffer, &AbortSignal::new())?;
    String::from_utf8(buffer)
        .map_err(|e| SourceError::Stream(format!("CSV output is not UTF-8: {}", e)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Granularity, Row};
    use std::io;

    fn table(granularity: Granularity) -> MergedTable {
        let rows: Vec<Row> = vec![
            vec![("Time", "2024-01-01"), ("GHI Rev0", "1"), ("GHI Rev1", "2")]
                .into_iter()
                .collect(),
            vec![("Time", "2024-01-02"), ("GHI Rev0", "3")]
                .into_iter()
                .collect(),
        ];
        MergedTable {
            header: vec![
                "Time".to_string(),
                "GHI Rev0".to_string(),
                "GHI Rev1".to_string(),
            ],
            rows,
            granularity,
        }
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn test_encode_missing_values_as_empty() {
        let csv = encode_csv(&table(Granularity::default())).unwrap();
        assert_eq!(
            csv,
            "Time,GHI Rev0,GHI Rev1\n2024-01-01,1,2\n2024-01-02,3,\n"
        );
    }

    #[test]
    fn test_header_relabelled_once() {
        let csv = encode_csv(&table(Granularity::Daily)).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Date,GHI Rev0,GHI Rev1"));
        assert_eq!(lines.next(), Some("2024-01-01,1,2"));
    }

    #[test]
    fn test_abort_stops_after_header() {
        let abort = AbortSignal::new();
        abort.abort();
        let mut buffer = Vec::new();

        let report = stream_csv(&table(Granularity::Monthly), &mut buffer, &abort).unwrap();

        assert_eq!(report.rows_written, 0);
        assert!(!report.completed);
        assert_eq!(String::from_utf8(buffer).unwrap(), "Month,GHI Rev0,GHI Rev1\n");
    }

    #[test]
    fn test_header_failure_is_error() {
        let result = stream_csv(&table(Granularity::default()), FailingWriter, &AbortSignal::new());
        assert!(matches!(
            result,
            Err(ForecastError::Source(SourceError::Stream(_)))
        ));
    }
}
