//! Wire protocol.
//!
//! Every frame is a JSON object whose `type` field selects the message kind.
//! Cells are addressed on the wire by `"{row}-{col}"` ids.

use gridsync_core::backend::{GridId, GridMeta};
use gridsync_core::document::{ChangedCell, SortDirection, Timestamp};
use gridsync_core::presence::{ConnectionId, Position, VisibleUser};
use gridsync_core::{CellRecord, Dimensions, GridSnapshot};
use gridsync_engine::engine::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Client to server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum InboundMessage {
    SetName {
        name: String,
    },
    ListGrids,
    CreateGrid {
        name: String,
    },
    SelectGrid {
        grid_id: GridId,
    },
    CellEdit {
        cell_id: String,
        value: String,
        #[serde(default)]
        timestamp: Option<Timestamp>,
    },
    UserCellPositionChange {
        #[serde(default)]
        position: Option<Position>,
    },
    AddRow,
    DeleteRow,
    AddCol,
    DeleteCol,
    SortColumn {
        col: usize,
        #[serde(default)]
        direction: SortDirection,
    },
    SortRow {
        row: usize,
        #[serde(default)]
        direction: SortDirection,
    },
}

/// What changed the grid bounds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DimensionOperation {
    AddRow,
    DeleteRow,
    AddCol,
    DeleteCol,
    /// A write landed outside the old bounds.
    Expand,
}

/// Server to client(s).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum OutboundMessage {
    Init {
        user_id: ConnectionId,
        color: String,
    },
    UserList {
        users: Vec<VisibleUser>,
        timestamp: Timestamp,
    },
    GridList {
        grids: Vec<GridMeta>,
    },
    GridCreated {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        grid: Option<GridMeta>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    FullGrid {
        grid: BTreeMap<String, CellRecord>,
        grid_id: GridId,
        dimensions: Dimensions,
        timestamp: Timestamp,
    },
    CellUpdate {
        cell_id: String,
        raw_value: String,
        computed_value: Value,
        last_updated_by: Option<ConnectionId>,
        timestamp: Timestamp,
        /// Set on the optimistic broadcast sent before recomputation.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        provisional: bool,
    },
    UserPositionUpdate {
        user_id: ConnectionId,
        position: Option<Position>,
        timestamp: Timestamp,
    },
    UserLeave {
        user_id: ConnectionId,
        timestamp: Timestamp,
    },
    GridDimensionsChanged {
        grid_id: GridId,
        new_dimensions: Dimensions,
        operation: DimensionOperation,
        timestamp: Timestamp,
    },
    GridDimensionError {
        error: String,
        timestamp: Timestamp,
    },
    Error {
        error: String,
        timestamp: Timestamp,
    },
}

impl OutboundMessage {
    pub fn full_grid(grid_id: GridId, snapshot: GridSnapshot, timestamp: Timestamp) -> Self {
        let grid = snapshot
            .cells
            .into_iter()
            .map(|(cell, record)| (cell.to_cell_id(), record))
            .collect();
        OutboundMessage::FullGrid {
            grid,
            grid_id,
            dimensions: snapshot.dimensions,
            timestamp,
        }
    }

    pub fn cell_update(change: &ChangedCell, provisional: bool) -> Self {
        OutboundMessage::CellUpdate {
            cell_id: change.cell.to_cell_id(),
            raw_value: change.record.raw_value.clone(),
            computed_value: change.record.computed_value.clone(),
            last_updated_by: change.record.last_updated_by,
            timestamp: change.record.last_updated,
            provisional,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Init { .. } => "init",
            OutboundMessage::UserList { .. } => "user-list",
            OutboundMessage::GridList { .. } => "grid-list",
            OutboundMessage::GridCreated { .. } => "grid-created",
            OutboundMessage::FullGrid { .. } => "full-grid",
            OutboundMessage::CellUpdate { .. } => "cell-update",
            OutboundMessage::UserPositionUpdate { .. } => "user-position-update",
            OutboundMessage::UserLeave { .. } => "user-leave",
            OutboundMessage::GridDimensionsChanged { .. } => "grid-dimensions-changed",
            OutboundMessage::GridDimensionError { .. } => "grid-dimension-error",
            OutboundMessage::Error { .. } => "error",
        }
    }
}

pub fn decode(text: &str) -> serde_json::Result<InboundMessage> {
    serde_json::from_str(text)
}

pub fn encode(message: &OutboundMessage) -> serde_json::Result<String> {
    serde_json::to_string(message)
}
