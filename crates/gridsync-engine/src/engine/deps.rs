//! Dependency extraction from formula strings.
//!
//! Parses formula text to find the cells (e.g., `A1`) and ranges (e.g.,
//! `B2:C5`) a formula reads. The store uses this to find which cells must be
//! recomputed when another cell changes.
//!
//! Ranges are kept as rectangles rather than expanded, so a formula such as
//! `SUM(A1:A1000000)` costs one entry.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::cell_ref::{CellRange, CellRef};

/// Something a formula reads.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Dependency {
    Cell(CellRef),
    Range(CellRange),
}

impl Dependency {
    /// True if a change to `cell` can affect a formula holding this dependency.
    pub fn covers(&self, cell: &CellRef) -> bool {
        match self {
            Dependency::Cell(c) => c == cell,
            Dependency::Range(r) => r.contains(cell),
        }
    }
}

/// Extract all references from raw cell text. Non-formula text has none.
pub fn extract_dependencies(raw: &str) -> Vec<Dependency> {
    let Some(body) = raw.strip_prefix('=') else {
        return Vec::new();
    };

    let mut deps = Vec::new();

    // Ranges first, then blank them out so their corners aren't counted twice.
    for caps in range_re().captures_iter(body) {
        if let (Ok(start), Ok(end)) = (caps[1].parse::<CellRef>(), caps[2].parse::<CellRef>()) {
            deps.push(Dependency::Range(CellRange::new(start, end)));
        }
    }
    let without_ranges = range_re().replace_all(body, " ");

    for caps in cell_ref_re().captures_iter(&without_ranges) {
        if let Ok(cell) = caps[1].parse::<CellRef>() {
            deps.push(Dependency::Cell(cell));
        }
    }

    deps
}

/// True if `raw` syntactically references `cell`, directly or through a range.
pub fn references(raw: &str, cell: &CellRef) -> bool {
    extract_dependencies(raw).iter().any(|dep| dep.covers(cell))
}

pub(crate) fn range_re() -> &'static Regex {
    static RANGE_RE: OnceLock<Regex> = OnceLock::new();
    RANGE_RE.get_or_init(|| {
        Regex::new(r"\b([A-Z]+[0-9]+)\s*:\s*([A-Z]+[0-9]+)\b")
            .expect("dependency range regex must compile")
    })
}

pub(crate) fn cell_ref_re() -> &'static Regex {
    static CELL_RE: OnceLock<Regex> = OnceLock::new();
    CELL_RE.get_or_init(|| {
        Regex::new(r"\b([A-Z]+[0-9]+)\b").expect("dependency cell reference regex must compile")
    })
}
