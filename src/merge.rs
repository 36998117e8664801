//! Stream Merge Assembler
//!
//! A [`MergeOperation`] owns all per-request state: the schema unifier, the
//! accumulated rows and the state machine below. Nothing is shared between
//! requests.
//!
//! ```text
//! Init ──► Accumulating{cursor} ──► Empty ──────────────► (sentinel)
//!               │                 └► Ready ──► Streamed
//!               │                          └─(header write error)─► Failed
//!               └──(read error)──► Failed
//! ```
//!
//! Slices are visited in key order (ascending dates). A slice that does not
//! exist is skipped; any other error fails the whole merge, since nothing has
//! been written yet.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};

use crate::encoder::{stream_csv, StreamReport};
use crate::error::ForecastError;
use crate::perturb::PerturbationFilter;
use crate::revision::resolve_slice_finals;
use crate::schema::SchemaUnifier;
use crate::source::{SliceKey, SliceSource};
use crate::types::{Granularity, MergedTable, Row, Slice};

/// Cancellation flag shared with the output side
///
/// Set when the receiving connection goes away; checked before each slice
/// and each emitted row.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeState {
    Init,
    Accumulating { cursor: NaiveDate },
    /// No row was accumulated
    Empty,
    Ready,
    Streamed,
    Failed,
}

/// Counters of one accumulation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulateReport {
    pub merged: usize,
    pub skipped: usize,
    pub aborted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    NotFound,
    Ready(MergedTable),
}

#[derive(Debug)]
pub struct MergeOperation {
    unifier: SchemaUnifier,
    rows: Vec<Row>,
    granularity: Granularity,
    state: MergeState,
}

impl MergeOperation {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            unifier: SchemaUnifier::new(),
            rows: Vec::new(),
            granularity,
            state: MergeState::Init,
        }
    }

    pub fn state(&self) -> &MergeState {
        &self.state
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn unified_header(&self) -> Vec<String> {
        self.unifier.current()
    }

    /// Load every key in order and append its rows
    ///
    /// # Errors
    ///
    /// Any slice error other than not-found moves the operation to
    /// [`MergeState::Failed`] and is returned.
    pub async fn accumulate(
        &mut self,
        source: &dyn SliceSource,
        keys: &[SliceKey],
        filter: &mut PerturbationFilter,
        now: DateTime<Utc>,
        abort: &AbortSignal,
    ) -> Result<AccumulateReport, ForecastError> {
        let mut report = AccumulateReport::default();

        for key in keys {
            if abort.is_aborted() {
                info!(
                    client = %key.client,
                    site = %key.site,
                    date = %key.date,
                    "Merge aborted by receiver"
                );
                report.aborted = true;
                break;
            }

            self.state = MergeState::Accumulating { cursor: key.date };

            match source.load(key).await {
                Ok(Some(slice)) => {
                    self.push_slice(slice, filter, now);
                    report.merged += 1;
                }
                Ok(None) => {
                    debug!(source = source.name(), date = %key.date, "Slice absent, skipped");
                    report.skipped += 1;
                }
                Err(e) if e.is_not_found() => {
                    debug!(source = source.name(), date = %key.date, error = %e, "Slice not found, skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(source = source.name(), date = %key.date, error = %e, "Slice read failed");
                    self.state = MergeState::Failed;
                    return Err(e);
                }
            }
        }

        Ok(report)
    }

    /// Observe a slice's header, resolve its finals, perturb and append its rows
    pub fn push_slice(
        &mut self,
        mut slice: Slice,
        filter: &mut PerturbationFilter,
        now: DateTime<Utc>,
    ) {
        if self.unifier.observe(&slice.headers) {
            debug!(
                date = %slice.date,
                columns = self.unifier.width(),
                "Unified header widened"
            );
        }

        resolve_slice_finals(&mut slice);

        if filter.is_enabled() {
            for row in slice.rows.iter_mut() {
                filter.apply(row, &slice.headers, slice.date, now);
            }
        }

        debug!(
            date = %slice.date,
            rows = slice.rows.len(),
            columns = slice.headers.len(),
            "Slice merged"
        );
        self.rows.append(&mut slice.rows);
    }

    /// Close accumulation
    ///
    /// Hands out the merged table, or `NotFound` when no row was collected.
    pub fn finish(&mut self) -> MergeOutcome {
        if self.state == MergeState::Failed {
            return MergeOutcome::NotFound;
        }

        if self.rows.is_empty() {
            self.state = MergeState::Empty;
            info!("Merge finished with no rows");
            return MergeOutcome::NotFound;
        }

        self.state = MergeState::Ready;
        let table = MergedTable {
            header: self.unifier.current(),
            rows: std::mem::take(&mut self.rows),
            granularity: self.granularity.clone(),
        };
        info!(
            rows = table.rows.len(),
            columns = table.header.len(),
            "Merge finished"
        );
        MergeOutcome::Ready(table)
    }

    /// Write the finished table, ending in `Streamed` or `Failed`
    ///
    /// A failure before the header is flushed moves the operation to
    /// [`MergeState::Failed`] and is returned. Once the header is out the
    /// operation is `Streamed`, even when the report says it stopped early.
    pub fn stream<W: Write>(
        &mut self,
        table: &MergedTable,
        writer: W,
        abort: &AbortSignal,
    ) -> Result<StreamReport, ForecastError> {
        match stream_csv(table, writer, abort) {
            Ok(report) => {
                self.state = MergeState::Streamed;
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Merged table could not be written");
                self.state = MergeState::Failed;
                Err(e)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
