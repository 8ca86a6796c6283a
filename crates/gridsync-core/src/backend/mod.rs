//! Boundary to the persistent store and compute service.
//!
//! The synchronization server treats this collaborator as slow and fallible:
//! every call is async and any failure surfaces as
//! [`GridsyncError::UpstreamUnavailable`](crate::GridsyncError) (or a more
//! specific error when the collaborator rejects the request). Cells cross this
//! boundary in A1 form.

mod local;

use chrono::{DateTime, Utc};
use gridsync_engine::engine::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

use crate::document::{Dimensions, GridSnapshot, Timestamp};
use crate::error::Result;
use crate::presence::ConnectionId;

pub use local::LocalBackend;

/// Identifier of a persisted grid.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridId(String);

impl GridId {
    pub fn new(id: impl Into<String>) -> Self {
        GridId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GridId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Grid metadata as listed to clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridMeta {
    pub id: GridId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub dimensions: Dimensions,
}

/// A cell whose value the collaborator changed, by A1 reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellChange {
    pub cell_ref: String,
    pub raw_value: String,
    pub computed_value: Value,
}

/// Persistent store + compute service.
pub trait Backend: Send + Sync + 'static {
    fn list_grids(&self) -> impl Future<Output = Result<Vec<GridMeta>>> + Send;

    fn create_grid(&self, name: &str) -> impl Future<Output = Result<GridMeta>> + Send;

    fn get_grid_data(&self, grid: &GridId) -> impl Future<Output = Result<GridSnapshot>> + Send;

    /// Persist a cell write and return every cell whose value changed.
    /// A write older than the stored one changes nothing.
    fn update_cell(
        &self,
        grid: &GridId,
        cell_ref: &str,
        raw_value: &str,
        timestamp: Timestamp,
        writer: Option<ConnectionId>,
    ) -> impl Future<Output = Result<Vec<CellChange>>> + Send;

    fn add_row(&self, grid: &GridId) -> impl Future<Output = Result<Dimensions>> + Send;

    fn delete_row(&self, grid: &GridId) -> impl Future<Output = Result<Dimensions>> + Send;

    fn add_column(&self, grid: &GridId) -> impl Future<Output = Result<Dimensions>> + Send;

    fn delete_column(&self, grid: &GridId) -> impl Future<Output = Result<Dimensions>> + Send;
}
