//! gridsync-core - grid state store, presence tracking and the storage/compute boundary.

pub mod backend;
pub mod document;
pub mod error;
pub mod presence;

pub use backend::{Backend, CellChange, GridId, GridMeta, LocalBackend};
pub use document::{CellRecord, Dimensions, GridSnapshot, GridStore, Timestamp};
pub use error::{GridsyncError, Result};
pub use presence::{ConnectionId, PresenceTracker};

pub use gridsync_engine::engine::CellRef;
