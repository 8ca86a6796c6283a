//! Cell reference parsing and formatting.
//!
//! Provides bidirectional conversion between spreadsheet-style cell references
//! (e.g., "A1", "B2", "AA100") and zero-indexed row/column coordinates, plus the
//! `"{row}-{col}"` cell id form used on the wire.
//!
//! # Examples
//!
//! ```
//! use gridsync_engine::engine::CellRef;
//!
//! let cell: CellRef = "B3".parse().unwrap();
//! assert_eq!(cell.col, 1); // 0-indexed
//! assert_eq!(cell.row, 2);
//! assert_eq!(cell.to_string(), "B3");
//! assert_eq!(cell.to_cell_id(), "2-1");
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use super::RefError;

/// A reference to a cell by row and column indices (0-indexed).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub fn new(row: usize, col: usize) -> CellRef {
        CellRef { row, col }
    }

    /// Parse a reference in A1 notation. Column letters must be upper case and
    /// the row must not have a leading zero.
    pub fn parse_a1(name: &str) -> Result<CellRef, RefError> {
        let malformed = || RefError::MalformedReference(name.to_string());
        let caps = a1_re().captures(name).ok_or_else(malformed)?;
        let letters = &caps["letters"];
        let numbers = &caps["numbers"];

        let mut col_acc = 0usize;
        for c in letters.bytes() {
            let digit = (c - b'A') as usize + 1;
            col_acc = col_acc
                .checked_mul(26)
                .and_then(|acc| acc.checked_add(digit))
                .ok_or_else(malformed)?;
        }
        let col = col_acc - 1;
        let row = numbers
            .parse::<usize>()
            .map_err(|_| malformed())?
            .checked_sub(1)
            .ok_or_else(malformed)?;

        Ok(CellRef::new(row, col))
    }

    /// Convert column index to spreadsheet-style letters (0 -> A, 25 -> Z, 26 -> AA).
    pub fn col_to_letters(col: usize) -> String {
        let mut result = String::new();
        let mut n = col as u128 + 1;
        while n > 0 {
            n -= 1;
            result.insert(0, (b'A' + (n % 26) as u8) as char);
            n /= 26;
        }
        result
    }

    /// Wire-level id: `"{row}-{col}"`.
    pub fn to_cell_id(&self) -> String {
        format!("{}-{}", self.row, self.col)
    }

    pub fn from_cell_id(id: &str) -> Result<CellRef, RefError> {
        let malformed = || RefError::MalformedCellId(id.to_string());
        let (row, col) = id.split_once('-').ok_or_else(malformed)?;
        let row = row.trim().parse::<usize>().map_err(|_| malformed())?;
        let col = col.trim().parse::<usize>().map_err(|_| malformed())?;
        Ok(CellRef::new(row, col))
    }
}

/// Encode signed coordinates as an A1 reference.
pub fn to_reference(row: i64, col: i64) -> Result<String, RefError> {
    if row < 0 || col < 0 {
        return Err(RefError::InvalidCoordinate { row, col });
    }
    Ok(CellRef::new(row as usize, col as usize).to_string())
}

/// Decode an A1 reference into `(row, col)`.
pub fn from_reference(text: &str) -> Result<(usize, usize), RefError> {
    let cell = CellRef::parse_a1(text)?;
    Ok((cell.row, cell.col))
}

/// Expand `start:end` into every covered coordinate, row-major.
pub fn expand_range(start: &str, end: &str) -> Result<Vec<CellRef>, RefError> {
    let range = CellRange::parse_parts(start, end)?;
    Ok(range.cells().collect())
}

impl std::str::FromStr for CellRef {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_a1(s)
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CellRef::col_to_letters(self.col), self.row as u128 + 1)
    }
}

/// An inclusive rectangle of cells with `start` as the top-left corner.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    /// Build a range from two corners in any order.
    pub fn new(a: CellRef, b: CellRef) -> CellRange {
        CellRange {
            start: CellRef::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellRef::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    /// Parse `"A1:B5"`, or a lone `"A1"` as a single-cell range.
    pub fn parse(text: &str) -> Result<CellRange, RefError> {
        let text = text.trim();
        match text.split_once(':') {
            Some((start, end)) => Self::parse_parts(start, end),
            None => CellRef::parse_a1(text)
                .map(|cell| CellRange::new(cell, cell))
                .map_err(|_| RefError::MalformedRange(text.to_string())),
        }
    }

    fn parse_parts(start: &str, end: &str) -> Result<CellRange, RefError> {
        let malformed = || RefError::MalformedRange(format!("{}:{}", start, end));
        let a = CellRef::parse_a1(start.trim()).map_err(|_| malformed())?;
        let b = CellRef::parse_a1(end.trim()).map_err(|_| malformed())?;
        Ok(CellRange::new(a, b))
    }

    pub fn contains(&self, cell: &CellRef) -> bool {
        (self.start.row..=self.end.row).contains(&cell.row)
            && (self.start.col..=self.end.col).contains(&cell.col)
    }

    /// Number of cells covered, saturating on overflow.
    pub fn len(&self) -> usize {
        let rows = self.end.row - self.start.row + 1;
        let cols = self.end.col - self.start.col + 1;
        rows.saturating_mul(cols)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Covered cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellRef> + use<> {
        let CellRange { start, end } = *self;
        (start.row..=end.row)
            .flat_map(move |row| (start.col..=end.col).map(move |col| CellRef::new(row, col)))
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

fn a1_re() -> &'static Regex {
    static A1_RE: OnceLock<Regex> = OnceLock::new();
    A1_RE.get_or_init(|| {
        Regex::new(r"^(?<letters>[A-Z]+)(?<numbers>[1-9][0-9]*)$")
            .expect("cell reference regex must compile")
    })
}
