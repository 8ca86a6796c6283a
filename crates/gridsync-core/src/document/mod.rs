//! Authoritative grid state (UI-agnostic).

mod ops;
mod sort;
mod state;

pub use ops::{Accepted, Axis, ChangedCell, StructuralOutcome, WriteOutcome};
pub use sort::SortDirection;
pub use state::{
    CellRecord, DEFAULT_MAX_COLS, DEFAULT_MAX_ROWS, DEFAULT_RECOMPUTE_LIMIT, Dimensions, Grid,
    GridSnapshot, GridStore, Timestamp, now_millis,
};
