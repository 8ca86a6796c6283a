//! Error types for Gridsync core.

use thiserror::Error;

use gridsync_engine::engine::{CellRef, RefError};

use crate::document::{Axis, Timestamp};

/// Errors that can occur while mutating or serving grid state.
#[derive(Error, Debug)]
pub enum GridsyncError {
    #[error("Write to {cell} at {incoming} is older than the stored write at {current}")]
    ConflictRejected {
        cell: CellRef,
        incoming: Timestamp,
        current: Timestamp,
    },

    #[error("Cannot delete the last remaining {0}")]
    DimensionUnderflow(Axis),

    #[error("Grid already has the maximum number of {0}s")]
    DimensionLimit(Axis),

    #[error("Cell {row}-{col} is outside the maximum grid size")]
    CellOutOfRange { row: usize, col: usize },

    #[error("No grid selected")]
    NoGridSelected,

    #[error("Set a display name first")]
    NameRequired,

    #[error("Grid name must not be empty")]
    InvalidGridName,

    #[error("Unknown grid: {0}")]
    UnknownGrid(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error(transparent)]
    Reference(#[from] RefError),
}

pub type Result<T> = std::result::Result<T, GridsyncError>;
