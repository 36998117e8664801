//! Revision Resolver
//!
//! Forecast variables (`GHI`, `Gen`, ...) are produced in numbered passes:
//! `GHI Rev0` is the earliest, `GHI Rev9` the most informed. The `Final`
//! value of a variable is the highest-index revision that is not null.
//!
//! Columns are classified by name shape, so the number of revisions is a
//! configuration value rather than a fixed list of names:
//!
//! | Column | Kind |
//! |--------|------|
//! | `Time` | [`ColumnKind::Time`] |
//! | `Block` | [`ColumnKind::Block`] |
//! | `GHI Rev3` | [`ColumnKind::Revision`] |
//! | `GHI Final` | [`ColumnKind::Final`] |
//! | anything else | [`ColumnKind::Other`] |
//!
//! # Example
//!
//! ```rust
//! use solar_forecast_merge::revision::resolve;
//! use solar_forecast_merge::Row;
//!
//! let header: Vec<String> = ["Time", "GHI Rev0", "GHI Rev1", "GHI Rev2"]
//!     .iter().map(|c| c.to_string()).collect();
//! let row: Row = vec![("GHI Rev0", "10"), ("GHI Rev1", ""), ("GHI Rev2", "15")]
//!     .into_iter().collect();
//!
//! assert_eq!(resolve(&row, &header, "GHI"), Some("15".to_string()));
//! ```

use std::collections::BTreeMap;

use chrono::{FixedOffset, NaiveDateTime};

use crate::config::ForecastConfig;
use crate::transformations::{format_number, format_table_time, is_null_value};
use crate::types::{Row, Slice, BLOCK_COLUMN, TIME_COLUMN};

/// Measured generation column appended by the ground-truth join
pub const GROUND_GENERATION_COLUMN: &str = "AC_POWER_SUM";

/// Measured irradiance column appended by the ground-truth join
pub const GROUND_GHI_COLUMN: &str = "Ground GHI";

/// Measured plane-of-array irradiance column appended by the ground-truth join
pub const GROUND_POA_COLUMN: &str = "Ground POA";

const REVISION_MARKER: &str = "Rev";
const FINAL_MARKER: &str = "Final";

// ============================================================================
// Column Classification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    Time,
    Block,
    /// `<variable> Rev<index>`
    Revision { variable: String, index: usize },
    /// `<variable> Final`
    Final { variable: String },
    Other,
}

impl ColumnKind {
    /// Classify a column by its name
    ///
    /// # Examples
    ///
    /// ```
    /// # use solar_forecast_merge::revision::ColumnKind;
    /// assert_eq!(
    ///     ColumnKind::classify("Gen Rev12"),
    ///     ColumnKind::Revision { variable: "Gen".to_string(), index: 12 }
    /// );
    /// assert_eq!(
    ///     ColumnKind::classify("GHI Final"),
    ///     ColumnKind::Final { variable: "GHI".to_string() }
    /// );
    /// assert_eq!(ColumnKind::classify("Ground GHI"), ColumnKind::Other);
    /// ```
    pub fn classify(name: &str) -> Self {
        if name == TIME_COLUMN {
            return ColumnKind::Time;
        }
        if name == BLOCK_COLUMN {
            return ColumnKind::Block;
        }

        let Some((variable, suffix)) = name.rsplit_once(' ') else {
            return ColumnKind::Other;
        };
        if variable.is_empty() {
            return ColumnKind::Other;
        }

        if suffix == FINAL_MARKER {
            return ColumnKind::Final {
                variable: variable.to_string(),
            };
        }

        match parse_revision_label(suffix) {
            Some(index) if suffix.starts_with(REVISION_MARKER) => ColumnKind::Revision {
                variable: variable.to_string(),
                index,
            },
            _ => ColumnKind::Other,
        }
    }
}

/// Parse a revision label (`Rev7` or `7`) into its index
pub fn parse_revision_label(label: &str) -> Option<usize> {
    let digits = label.trim().strip_prefix(REVISION_MARKER).unwrap_or(label.trim());
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Revision column name for a variable and index
pub fn revision_column(variable: &str, index: usize) -> String {
    format!("{} {}{}", variable, REVISION_MARKER, index)
}

/// Final column name for a variable
pub fn final_column(variable: &str) -> String {
    format!("{} {}", variable, FINAL_MARKER)
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve the Final value of `variable` for one row
///
/// Scans the revision columns of `header` for `variable` from the highest
/// index down and returns the first non-null value. `None` when every
/// revision is null or absent, or when the header has no revision column for
/// the variable.
pub fn resolve(row: &Row, header: &[String], variable: &str) -> Option<String> {
    let mut revisions: Vec<(usize, &str)> = header
        .iter()
        .filter_map(|column| match ColumnKind::classify(column) {
            ColumnKind::Revision { variable: v, index } if v == variable => {
                Some((index, column.as_str()))
            }
            _ => None,
        })
        .collect();
    revisions.sort_by(|a, b| b.0.cmp(&a.0));

    revisions
        .into_iter()
        .filter_map(|(_, column)| row.get(column))
        .find(|value| !is_null_value(value))
        .map(str::to_string)
}

/// Recompute every `<Var> Final` column of a slice from its revisions
///
/// Only variables with at least one revision column in the header are
/// touched; a Final column without revisions passes through. A Final that
/// resolves to null is removed from the row.
pub fn resolve_slice_finals(slice: &mut Slice) {
    let variables: Vec<String> = slice
        .headers
        .iter()
        .filter_map(|column| match ColumnKind::classify(column) {
            ColumnKind::Final { variable } => Some(variable),
            _ => None,
        })
        .filter(|variable| has_revisions(&slice.headers, variable))
        .collect();

    if variables.is_empty() {
        return;
    }

    let header = &slice.headers;
    for row in slice.rows.iter_mut() {
        for variable in &variables {
            let column = final_column(variable);
            match resolve(row, header, variable) {
                Some(value) => row.set(column, value),
                None => {
                    row.remove(&column);
                }
            }
        }
    }
}

fn has_revisions(header: &[String], variable: &str) -> bool {
    header.iter().any(|column| {
        matches!(
            ColumnKind::classify(column),
            ColumnKind::Revision { variable: ref v, .. } if v == variable
        )
    })
}

// ============================================================================
// Long → Wide Pivot
// ============================================================================

/// A forecast variable with its configured number of revision slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionFamily {
    pub variable: String,
    pub revisions: usize,
}

impl RevisionFamily {
    pub fn new(variable: impl Into<String>, revisions: usize) -> Self {
        Self {
            variable: variable.into(),
            revisions,
        }
    }

    /// `<Var> Rev0` .. `<Var> Rev<N-1>`
    pub fn revision_columns(&self) -> Vec<String> {
        (0..self.revisions)
            .map(|index| revision_column(&self.variable, index))
            .collect()
    }

    pub fn final_column(&self) -> String {
        final_column(&self.variable)
    }

    /// Families for every configured forecast variable
    pub fn from_config(config: &ForecastConfig) -> Vec<Self> {
        config
            .forecast_variables
            .iter()
            .map(|variable| Self::new(variable.clone(), config.revision_count))
            .collect()
    }
}

/// Measured values joined onto a forecast row
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GroundReading {
    pub generation: Option<f64>,
    pub ghi: Option<f64>,
    pub poa: Option<f64>,
}

/// One long-format forecast record with its joined measurement
#[derive(Debug, Clone, PartialEq)]
pub struct LongRow {
    pub block: i64,
    /// Stored (UTC) timestamp
    pub time: NaiveDateTime,
    pub variable: String,
    /// Revision label as stored, e.g. `Rev3`
    pub revision: String,
    pub value: Option<f64>,
    pub ground: GroundReading,
}

#[derive(Default)]
struct PivotGroup {
    values: BTreeMap<(usize, usize), f64>,
    ground: GroundReading,
}

/// Header produced by [`pivot_long_rows`] for the given families
pub fn pivot_header(families: &[RevisionFamily]) -> Vec<String> {
    let mut header = vec![BLOCK_COLUMN.to_string(), TIME_COLUMN.to_string()];
    for family in families {
        header.extend(family.revision_columns());
    }
    for family in families {
        header.push(family.final_column());
    }
    header.extend(
        [GROUND_GENERATION_COLUMN, GROUND_GHI_COLUMN, GROUND_POA_COLUMN]
            .iter()
            .map(|c| c.to_string()),
    );
    header
}

/// Pivot long-format rows into one wide row per `(time, block)`
///
/// Rows come out ordered by time, then block. Duplicate
/// `(block, time, variable, revision)` records keep the maximum value.
/// Records for unknown variables or revisions outside the family's range
/// are ignored. `Time` is rendered at `offset`.
pub fn pivot_long_rows(
    rows: &[LongRow],
    families: &[RevisionFamily],
    offset: FixedOffset,
) -> (Vec<String>, Vec<Row>) {
    let header = pivot_header(families);
    let mut groups: BTreeMap<(NaiveDateTime, i64), PivotGroup> = BTreeMap::new();

    for long in rows {
        let group = groups.entry((long.time, long.block)).or_default();
        merge_ground(&mut group.ground, &long.ground);

        let Some(family_idx) = families.iter().position(|f| f.variable == long.variable) else {
            continue;
        };
        let Some(revision) = parse_revision_label(&long.revision) else {
            continue;
        };
        if revision >= families[family_idx].revisions {
            continue;
        }
        if let Some(value) = long.value {
            group
                .values
                .entry((family_idx, revision))
                .and_modify(|current| *current = current.max(value))
                .or_insert(value);
        }
    }

    let wide_rows = groups
        .into_iter()
        .map(|((time, block), group)| {
            let mut row = Row::new();
            row.set(BLOCK_COLUMN, block.to_string());
            row.set(TIME_COLUMN, format_table_time(time, offset));

            for ((family_idx, revision), value) in &group.values {
                let family = &families[*family_idx];
                row.set(revision_column(&family.variable, *revision), format_number(*value));
            }
            for family in families {
                if let Some(value) = resolve(&row, &header, &family.variable) {
                    row.set(family.final_column(), value);
                }
            }

            set_optional(&mut row, GROUND_GENERATION_COLUMN, group.ground.generation);
            set_optional(&mut row, GROUND_GHI_COLUMN, group.ground.ghi);
            set_optional(&mut row, GROUND_POA_COLUMN, group.ground.poa);
            row
        })
        .collect();

    (header, wide_rows)
}

fn merge_ground(target: &mut GroundReading, incoming: &GroundReading) {
    target.generation = target.generation.or(incoming.generation);
    target.ghi = target.ghi.or(incoming.ghi);
    target.poa = target.poa.or(incoming.poa);
}

fn set_optional(row: &mut Row, column: &str, value: Option<f64>) {
    if let Some(v) = value {
        row.set(column, format_number(v));
    }
}

// ============================================================================
// TESTS
// ============================================================================
