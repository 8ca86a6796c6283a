use chrono::Utc;
use dashmap::DashMap;
use gridsync_engine::engine::{CellRef, CellSource, Dependency, Value, extract_dependencies};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::presence::ConnectionId;

/// Unix time in milliseconds.
pub type Timestamp = i64;

/// Default cap on dependent recomputations triggered by one mutation.
pub const DEFAULT_RECOMPUTE_LIMIT: usize = 10_000;

/// Default ceiling on how far writes and insertions may grow a grid.
pub const DEFAULT_MAX_ROWS: usize = 100_000;
pub const DEFAULT_MAX_COLS: usize = 1_000;

/// Current server time.
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// One cell's stored state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellRecord {
    pub raw_value: String,
    pub computed_value: Value,
    pub last_updated: Timestamp,
    pub last_updated_by: Option<ConnectionId>,
    /// References parsed from `raw_value` (not serialized).
    #[serde(skip)]
    pub depends_on: Vec<Dependency>,
}

impl CellRecord {
    /// The implicit record of a cell nobody has written.
    pub fn empty() -> CellRecord {
        CellRecord {
            raw_value: String::new(),
            computed_value: Value::empty(),
            last_updated: Timestamp::MIN,
            last_updated_by: None,
            depends_on: Vec::new(),
        }
    }

    pub(crate) fn written(raw: &str, timestamp: Timestamp, writer: Option<ConnectionId>) -> CellRecord {
        CellRecord {
            raw_value: raw.to_string(),
            // Provisional until the store recomputes it.
            computed_value: Value::Text(raw.to_string()),
            last_updated: timestamp,
            last_updated_by: writer,
            depends_on: extract_dependencies(raw),
        }
    }

    pub fn is_populated(&self) -> bool {
        !self.raw_value.is_empty()
    }

    /// Same write (raw text, time and author), ignoring the computed value.
    pub(crate) fn same_write(&self, other: &CellRecord) -> bool {
        self.raw_value == other.raw_value
            && self.last_updated == other.last_updated
            && self.last_updated_by == other.last_updated_by
    }
}

/// Logical grid bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dimensions {
    pub total_rows: usize,
    pub total_cols: usize,
}

impl Dimensions {
    pub fn new(total_rows: usize, total_cols: usize) -> Dimensions {
        Dimensions {
            total_rows: total_rows.max(1),
            total_cols: total_cols.max(1),
        }
    }

    pub fn contains(&self, cell: &CellRef) -> bool {
        cell.row < self.total_rows && cell.col < self.total_cols
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Dimensions::new(100, 26)
    }
}

/// Sparse cell storage.
pub type Grid = DashMap<CellRef, CellRecord>;

/// Point-in-time copy of a grid for initial sync.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridSnapshot {
    /// Populated cells only.
    pub cells: BTreeMap<CellRef, CellRecord>,
    pub dimensions: Dimensions,
}

/// Authoritative state of one grid.
///
/// All mutation goes through the methods in `ops` and `sort`; callers that
/// share a store across tasks serialize access to it.
pub struct GridStore {
    pub(crate) grid: Grid,
    pub(crate) dimensions: Dimensions,
    pub(crate) recompute_limit: usize,
    pub(crate) limits: Dimensions,
}

impl GridStore {
    pub fn new(dimensions: Dimensions) -> Self {
        GridStore {
            grid: DashMap::new(),
            dimensions,
            recompute_limit: DEFAULT_RECOMPUTE_LIMIT,
            limits: Dimensions::new(DEFAULT_MAX_ROWS, DEFAULT_MAX_COLS),
        }
    }

    pub fn with_recompute_limit(mut self, limit: usize) -> Self {
        self.recompute_limit = limit.max(1);
        self
    }

    /// Cap growth at `limits`. A grid already larger keeps its size.
    pub fn with_limits(mut self, limits: Dimensions) -> Self {
        self.limits = limits;
        self
    }

    pub fn limits(&self) -> Dimensions {
        self.limits
    }

    /// Whether a write to `(row, col)` fits the grid or the room it may grow into.
    pub fn within_limits(&self, row: usize, col: usize) -> bool {
        let max_rows = self.limits.total_rows.max(self.dimensions.total_rows);
        let max_cols = self.limits.total_cols.max(self.dimensions.total_cols);
        row < max_rows && col < max_cols
    }

    /// Seed a store from a persisted snapshot. Computed values are taken as
    /// given; dependencies are re-derived from the raw text.
    pub fn from_snapshot(snapshot: GridSnapshot) -> Self {
        let store = GridStore::new(snapshot.dimensions);
        for (cell, mut record) in snapshot.cells {
            if !snapshot.dimensions.contains(&cell) {
                continue;
            }
            record.depends_on = extract_dependencies(&record.raw_value);
            store.grid.insert(cell, record);
        }
        store
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Copy of a cell's record: the implicit empty record for unwritten
    /// in-bounds cells, `None` outside the grid.
    pub fn cell(&self, cell: &CellRef) -> Option<CellRecord> {
        if !self.dimensions.contains(cell) {
            return None;
        }
        Some(
            self.grid
                .get(cell)
                .map(|r| r.clone())
                .unwrap_or_else(CellRecord::empty),
        )
    }

    /// Grow (never shrink) the bounds. Returns true if they changed.
    pub fn ensure_dimensions(&mut self, min_rows: usize, min_cols: usize) -> bool {
        let grown = Dimensions {
            total_rows: self.dimensions.total_rows.max(min_rows),
            total_cols: self.dimensions.total_cols.max(min_cols),
        };
        let changed = grown != self.dimensions;
        self.dimensions = grown;
        changed
    }

    pub fn snapshot(&self) -> GridSnapshot {
        let cells = self
            .grid
            .iter()
            .filter(|entry| entry.value().is_populated() && self.dimensions.contains(entry.key()))
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        GridSnapshot {
            cells,
            dimensions: self.dimensions,
        }
    }

    /// Number of populated cells.
    pub fn populated_len(&self) -> usize {
        self.grid.iter().filter(|e| e.value().is_populated()).count()
    }
}

impl CellSource for GridStore {
    fn raw_value(&self, cell: &CellRef) -> Option<String> {
        if !self.dimensions.contains(cell) {
            return None;
        }
        self.grid
            .get(cell)
            .map(|r| r.raw_value.clone())
            .filter(|raw| !raw.is_empty())
    }
}
