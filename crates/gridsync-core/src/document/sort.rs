use super::ops::{Axis, ChangedCell};
use super::state::{CellRecord, GridStore, Timestamp};
use crate::presence::ConnectionId;
use gridsync_engine::engine::{CellRef, parse_number};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Sort key: numbers, then text, then blanks.
#[derive(Debug, PartialEq)]
enum SortKey<'a> {
    Number(f64),
    Text(&'a str),
    Blank,
}

impl<'a> SortKey<'a> {
    fn of(raw: &'a str) -> Self {
        if raw.trim().is_empty() {
            SortKey::Blank
        } else if let Some(n) = parse_number(raw) {
            SortKey::Number(n)
        } else {
            SortKey::Text(raw)
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Number(_) => 0,
            SortKey::Text(_) => 1,
            SortKey::Blank => 2,
        }
    }

    fn compare(&self, other: &Self, direction: SortDirection) -> Ordering {
        let ordering = match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            _ => return self.rank().cmp(&other.rank()),
        };
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

impl GridStore {
    /// Reorder the raw values of column `col` from top to bottom.
    pub fn sort_column(
        &mut self,
        col: usize,
        direction: SortDirection,
        timestamp: Timestamp,
        writer: Option<ConnectionId>,
    ) -> Vec<ChangedCell> {
        if col >= self.dimensions.total_cols {
            return Vec::new();
        }
        self.sort_line(Axis::Column, col, direction, timestamp, writer)
    }

    /// Reorder the raw values of row `row` from left to right.
    pub fn sort_row(
        &mut self,
        row: usize,
        direction: SortDirection,
        timestamp: Timestamp,
        writer: Option<ConnectionId>,
    ) -> Vec<ChangedCell> {
        if row >= self.dimensions.total_rows {
            return Vec::new();
        }
        self.sort_line(Axis::Row, row, direction, timestamp, writer)
    }

    /// Sort the line at `index` along `axis`. Only stored cells are visited:
    /// non-empty values pack into the leading positions, so every position
    /// that can change is either stored or below the number of values.
    fn sort_line(
        &mut self,
        axis: Axis,
        index: usize,
        direction: SortDirection,
        timestamp: Timestamp,
        writer: Option<ConnectionId>,
    ) -> Vec<ChangedCell> {
        let at = |position: usize| match axis {
            Axis::Column => CellRef::new(position, index),
            Axis::Row => CellRef::new(index, position),
        };
        let position_of = |cell: &CellRef| match axis {
            Axis::Column => cell.row,
            Axis::Row => cell.col,
        };

        let mut stored: Vec<(usize, String)> = self
            .grid
            .iter()
            .filter(|entry| axis.get_coord(entry.key()) == index)
            .map(|entry| (position_of(entry.key()), entry.value().raw_value.clone()))
            .collect();
        stored.sort_by_key(|(position, _)| *position);

        let mut sorted: Vec<&str> = stored
            .iter()
            .map(|(_, raw)| raw.as_str())
            .filter(|raw| !raw.is_empty())
            .collect();
        // Vec::sort_by is stable
        sorted.sort_by(|a, b| SortKey::of(a).compare(&SortKey::of(b), direction));

        let current: BTreeMap<usize, &str> = stored
            .iter()
            .map(|(position, raw)| (*position, raw.as_str()))
            .collect();
        let mut positions: BTreeSet<usize> = current.keys().copied().collect();
        positions.extend(0..sorted.len());

        let mut updates: Vec<(CellRef, String)> = Vec::new();
        for position in positions {
            let before = current.get(&position).copied().unwrap_or("");
            let after = sorted.get(position).copied().unwrap_or("");
            if before != after {
                updates.push((at(position), after.to_string()));
            }
        }

        let mut moved = Vec::with_capacity(updates.len());
        for (cell, after) in updates {
            let existing = self
                .grid
                .get(&cell)
                .map(|r| r.last_updated)
                .unwrap_or(Timestamp::MIN);
            // Blanked cells keep a record so older writes still lose to the sort.
            let record = CellRecord::written(&after, timestamp.max(existing), writer);
            self.grid.insert(cell, record);
            moved.push(cell);
        }

        if !moved.is_empty() {
            tracing::debug!(%axis, index, moved = moved.len(), "sorted line");
        }
        self.propagate(&moved, true)
    }
}
