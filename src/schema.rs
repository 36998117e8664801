//! Schema Unifier
//!
//! Day files gain revision columns over time, so each slice of a merge may
//! carry a different header. The unifier keeps the widest header seen so far
//! (first one on ties) and frames the whole output with it. Column names
//! that only appear in a narrower header are appended after the widest one,
//! so the unified header always covers every slice header by name.

use std::collections::HashSet;

use crate::types::{Granularity, TIME_COLUMN};

#[derive(Debug, Clone, Default)]
pub struct SchemaUnifier {
    widest: Vec<String>,
    extras: Vec<String>,
    /// Every column name observed, in first-seen order
    seen: Vec<String>,
    known: HashSet<String>,
}

impl SchemaUnifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the header of one slice
    ///
    /// Returns true when the unified header changed.
    pub fn observe(&mut self, header: &[String]) -> bool {
        let mut changed = false;

        for column in header {
            if self.known.insert(column.clone()) {
                self.seen.push(column.clone());
                changed = true;
            }
        }

        if header.len() > self.widest.len() {
            self.widest = header.to_vec();
            changed = true;
        }

        if changed {
            let widest = &self.widest;
            self.extras = self
                .seen
                .iter()
                .filter(|c| !widest.contains(c))
                .cloned()
                .collect();
        }

        changed
    }

    /// Unified header: the widest header, then columns it lacks
    pub fn current(&self) -> Vec<String> {
        self.widest
            .iter()
            .chain(self.extras.iter())
            .cloned()
            .collect()
    }

    /// Number of columns in the unified header
    pub fn width(&self) -> usize {
        self.widest.len() + self.extras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widest.is_empty()
    }
}

/// Output header with `Time` renamed for the granularity
///
/// Only the header line is renamed; rows keep `Time` as their key.
pub fn relabel_time(header: &[String], granularity: &Granularity) -> Vec<String> {
    match granularity.time_label() {
        Some(label) => header
            .iter()
            .map(|column| {
                if column == TIME_COLUMN {
                    label.to_string()
                } else {
                    column.clone()
                }
            })
            .collect(),
        None => header.to_vec(),
    }
}
