//! Spreadsheet engine API.
//!
//! This module provides the computation side of the grid:
//!
//! - [`CellRef`], [`CellRange`] - Cell reference codec (A1 notation ↔ row/col indices)
//! - [`extract_dependencies`] - Find the cells and ranges a formula reads
//! - [`evaluate`], [`evaluate_cell`] - Turn raw cell text into a [`Value`]
//! - [`format_number`] - Format values for display

mod arith;
mod cell_ref;
mod deps;
mod error;
mod eval;
mod value;

pub use arith::{ArithError, evaluate_arithmetic};
pub use cell_ref::{CellRange, CellRef, expand_range, from_reference, to_reference};
pub use deps::{Dependency, extract_dependencies, references};
pub use error::RefError;
pub use eval::{
    CellSource, FORMULA_SIGIL, MAX_EVAL_DEPTH, evaluate, evaluate_cell, is_formula,
    try_evaluate_cell,
};
pub use value::{ERROR_MARKER, Value, format_number, parse_number};
