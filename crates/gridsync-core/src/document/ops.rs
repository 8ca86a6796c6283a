use super::state::{CellRecord, Dimensions, GridStore, Timestamp};
use crate::error::{GridsyncError, Result};
use crate::presence::ConnectionId;
use gridsync_engine::engine::{CellRef, Value, is_formula, try_evaluate_cell};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use tracing::{debug, warn};

/// Axis for row/column operations
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Axis {
    Row,
    Column,
}

impl Axis {
    /// Get the coordinate value from a CellRef for this axis
    pub(crate) fn get_coord(&self, cell_ref: &CellRef) -> usize {
        match self {
            Axis::Row => cell_ref.row,
            Axis::Column => cell_ref.col,
        }
    }

    fn len(&self, dims: &Dimensions) -> usize {
        match self {
            Axis::Row => dims.total_rows,
            Axis::Column => dims.total_cols,
        }
    }

    fn len_mut<'a>(&self, dims: &'a mut Dimensions) -> &'a mut usize {
        match self {
            Axis::Row => &mut dims.total_rows,
            Axis::Column => &mut dims.total_cols,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::Row => f.write_str("row"),
            Axis::Column => f.write_str("column"),
        }
    }
}

/// A cell whose computed value changed, with its new record.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangedCell {
    pub cell: CellRef,
    pub record: CellRecord,
}

/// Result of [`GridStore::write_cell`].
#[derive(Clone, Debug)]
pub struct WriteOutcome {
    pub applied: bool,
    /// The cell's record after the call (unchanged if the write was rejected).
    pub record: CellRecord,
    /// The written cell first, then every dependent whose value changed.
    pub changed: Vec<ChangedCell>,
    /// The write landed outside the old bounds and grew the grid.
    pub dimensions_changed: bool,
}

/// A write that passed the conflict check but has not been recomputed.
#[derive(Clone, Debug)]
pub struct Accepted {
    pub cell: CellRef,
    pub previous: Option<CellRecord>,
    pub record: CellRecord,
    pub dimensions_changed: bool,
}

/// Result of a row/column insertion or deletion.
#[derive(Clone, Debug)]
pub struct StructuralOutcome {
    pub dimensions: Dimensions,
    /// Cells whose value changed because referenced cells were removed.
    pub changed: Vec<ChangedCell>,
}

impl GridStore {
    /// Write raw text under last-write-wins and recompute everything it affects.
    ///
    /// The write applies iff `timestamp >= lastUpdated` of the stored record.
    pub fn write_cell(
        &mut self,
        cell: CellRef,
        raw: &str,
        timestamp: Timestamp,
        writer: Option<ConnectionId>,
    ) -> WriteOutcome {
        match self.accept(cell, raw, timestamp, writer) {
            Ok(accepted) => {
                let changed = self.recompute_from(cell);
                let record = self
                    .grid
                    .get(&cell)
                    .map(|r| r.clone())
                    .unwrap_or(accepted.record);
                WriteOutcome {
                    applied: true,
                    record,
                    changed,
                    dimensions_changed: accepted.dimensions_changed,
                }
            }
            Err(err) => {
                debug!(%cell, "write rejected: {}", err);
                WriteOutcome {
                    applied: false,
                    record: self.cell(&cell).unwrap_or_else(CellRecord::empty),
                    changed: Vec::new(),
                    dimensions_changed: false,
                }
            }
        }
    }

    /// Conflict check and raw store, without recomputation. The stored
    /// computed value is the raw text until [`recompute_from`] runs.
    ///
    /// [`recompute_from`]: GridStore::recompute_from
    pub fn accept(
        &mut self,
        cell: CellRef,
        raw: &str,
        timestamp: Timestamp,
        writer: Option<ConnectionId>,
    ) -> Result<Accepted> {
        if !self.within_limits(cell.row, cell.col) {
            return Err(GridsyncError::CellOutOfRange {
                row: cell.row,
                col: cell.col,
            });
        }
        let previous = self.grid.get(&cell).map(|r| r.clone());
        if let Some(current) = &previous
            && timestamp < current.last_updated
        {
            return Err(GridsyncError::ConflictRejected {
                cell,
                incoming: timestamp,
                current: current.last_updated,
            });
        }

        let dimensions_changed = self.ensure_dimensions(cell.row + 1, cell.col + 1);
        let record = CellRecord::written(raw, timestamp, writer);
        self.grid.insert(cell, record.clone());

        Ok(Accepted {
            cell,
            previous,
            record,
            dimensions_changed,
        })
    }

    /// Authoritatively compute `origin` and every transitive dependent.
    /// `origin` is always reported; dependents only if their value changed.
    pub fn recompute_from(&mut self, origin: CellRef) -> Vec<ChangedCell> {
        self.propagate(&[origin], true)
    }

    /// Undo an accepted write if nothing newer replaced it since.
    /// Returns the resulting changes, or `None` if the write was superseded.
    pub fn revert(&mut self, accepted: &Accepted) -> Option<Vec<ChangedCell>> {
        let still_current = self
            .grid
            .get(&accepted.cell)
            .is_some_and(|r| r.same_write(&accepted.record));
        if !still_current {
            return None;
        }

        match &accepted.previous {
            Some(previous) => {
                self.grid.insert(accepted.cell, previous.clone());
            }
            None => {
                self.grid.remove(&accepted.cell);
            }
        }
        Some(self.recompute_from(accepted.cell))
    }

    /// Append an empty row.
    pub fn insert_row(&mut self) -> Result<StructuralOutcome> {
        self.insert_axis(Axis::Row)
    }

    /// Remove the last row.
    pub fn delete_row(&mut self) -> Result<StructuralOutcome> {
        self.delete_axis(Axis::Row)
    }

    /// Append an empty column.
    pub fn insert_column(&mut self) -> Result<StructuralOutcome> {
        self.insert_axis(Axis::Column)
    }

    /// Remove the last column.
    pub fn delete_column(&mut self) -> Result<StructuralOutcome> {
        self.delete_axis(Axis::Column)
    }

    /// New coordinates read as empty until written.
    fn insert_axis(&mut self, axis: Axis) -> Result<StructuralOutcome> {
        if axis.len(&self.dimensions) >= axis.len(&self.limits) {
            return Err(GridsyncError::DimensionLimit(axis));
        }
        *axis.len_mut(&mut self.dimensions) += 1;
        Ok(StructuralOutcome {
            dimensions: self.dimensions,
            changed: Vec::new(),
        })
    }

    fn delete_axis(&mut self, axis: Axis) -> Result<StructuralOutcome> {
        let len = axis.len(&self.dimensions);
        if len <= 1 {
            return Err(GridsyncError::DimensionUnderflow(axis));
        }
        let last = len - 1;

        // Collect cells at the deleted coordinate
        let removed: Vec<CellRef> = self
            .grid
            .iter()
            .filter(|entry| axis.get_coord(entry.key()) >= last)
            .map(|entry| *entry.key())
            .collect();
        for cell in &removed {
            self.grid.remove(cell);
        }
        *axis.len_mut(&mut self.dimensions) = last;

        let changed = self.propagate(&removed, false);
        Ok(StructuralOutcome {
            dimensions: self.dimensions,
            changed,
        })
    }

    /// Recompute `origins`, then walk dependents breadth-first, re-evaluating
    /// each at most once and only expanding from cells whose value changed.
    pub(crate) fn propagate(&mut self, origins: &[CellRef], report_origins: bool) -> Vec<ChangedCell> {
        let mut changed = Vec::new();
        let mut seen: HashSet<CellRef> = origins.iter().copied().collect();
        let mut queue: VecDeque<CellRef> = VecDeque::new();

        for &origin in origins {
            match self.recompute_cell(origin) {
                Some(update) => {
                    if report_origins {
                        changed.push(update);
                    }
                }
                None if report_origins => {
                    let record = self.cell(&origin).unwrap_or_else(CellRecord::empty);
                    changed.push(ChangedCell {
                        cell: origin,
                        record,
                    });
                }
                None => {}
            }
            queue.push_back(origin);
        }

        let mut recomputed = 0usize;
        while let Some(source) = queue.pop_front() {
            for dependent in self.dependents_of(&source) {
                if !seen.insert(dependent) {
                    continue;
                }
                if recomputed >= self.recompute_limit {
                    warn!(
                        limit = self.recompute_limit,
                        "recompute limit reached; remaining dependents left stale"
                    );
                    return changed;
                }
                recomputed += 1;
                if let Some(update) = self.recompute_cell(dependent) {
                    changed.push(update);
                    queue.push_back(dependent);
                }
            }
        }

        changed
    }

    /// Cells whose formula reads `cell`, in row-major order.
    fn dependents_of(&self, cell: &CellRef) -> Vec<CellRef> {
        let mut dependents: Vec<CellRef> = self
            .grid
            .iter()
            .filter(|entry| entry.value().depends_on.iter().any(|dep| dep.covers(cell)))
            .map(|entry| *entry.key())
            .collect();
        dependents.sort();
        dependents
    }

    /// Re-evaluate one cell. Returns the new record if its value changed.
    fn recompute_cell(&mut self, cell: CellRef) -> Option<ChangedCell> {
        let raw = self.grid.get(&cell)?.raw_value.clone();
        let computed = self.compute(cell, &raw);

        let mut entry = self.grid.get_mut(&cell)?;
        if entry.computed_value == computed {
            return None;
        }
        entry.computed_value = computed;
        Some(ChangedCell {
            cell,
            record: entry.clone(),
        })
    }

    fn compute(&self, cell: CellRef, raw: &str) -> Value {
        match try_evaluate_cell(cell, raw, self) {
            Ok(value) => value,
            Err(reason) => {
                if is_formula(raw) {
                    debug!(%cell, raw, "formula evaluated to #ERR: {}", reason);
                }
                Value::Error
            }
        }
    }
}
