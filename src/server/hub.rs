//! Message routing between connections, grid rooms and the backend.
//!
//! Each selected grid gets a room holding the authoritative [`GridStore`]
//! behind an async mutex; every mutation takes that lock, so edits to one grid
//! are applied one at a time. Backend calls are made without holding it.

use dashmap::DashMap;
use gridsync_core::backend::{Backend, GridId};
use gridsync_core::document::{
    Accepted, Axis, ChangedCell, DEFAULT_MAX_COLS, DEFAULT_MAX_ROWS, DEFAULT_RECOMPUTE_LIMIT,
    SortDirection, Timestamp, now_millis,
};
use gridsync_core::presence::{ConnectionId, Position, PresenceTracker, random_color};
use gridsync_core::{CellRef, Dimensions, GridStore, GridsyncError, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use super::registry::Registry;
use super::session::Session;
use crate::protocol::{self, DimensionOperation, InboundMessage, OutboundMessage};

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub palette: Vec<String>,
    pub recompute_limit: usize,
    /// Largest size a grid may grow to through edits or insertions.
    pub limits: Dimensions,
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            palette: Vec::new(),
            recompute_limit: DEFAULT_RECOMPUTE_LIMIT,
            limits: Dimensions::new(DEFAULT_MAX_ROWS, DEFAULT_MAX_COLS),
        }
    }
}

struct Room {
    store: Mutex<GridStore>,
}

pub struct Hub<B> {
    backend: Arc<B>,
    registry: Arc<Registry>,
    presence: Arc<PresenceTracker>,
    rooms: Arc<DashMap<GridId, Arc<Room>>>,
    config: Arc<HubConfig>,
}

impl<B> Clone for Hub<B> {
    fn clone(&self) -> Self {
        Hub {
            backend: Arc::clone(&self.backend),
            registry: Arc::clone(&self.registry),
            presence: Arc::clone(&self.presence),
            rooms: Arc::clone(&self.rooms),
            config: Arc::clone(&self.config),
        }
    }
}

impl<B: Backend> Hub<B> {
    pub fn new(backend: Arc<B>, config: HubConfig) -> Self {
        Hub {
            backend,
            registry: Arc::new(Registry::new()),
            presence: Arc::new(PresenceTracker::new()),
            rooms: Arc::new(DashMap::new()),
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Register a new connection and greet it with `init`.
    pub fn connect(&self, tx: UnboundedSender<OutboundMessage>) -> Session {
        let id = ConnectionId::new();
        let color = random_color(&self.config.palette);
        self.presence.register(id, color.clone());
        self.registry.add(id, tx);
        self.registry
            .send_to(id, OutboundMessage::Init { user_id: id, color });
        info!(connection = %id, connections = self.registry.len(), "connection opened");
        Session::new(id)
    }

    /// Tear down a connection and tell everyone it left.
    pub fn disconnect(&self, session: &mut Session) {
        if session.is_closed() {
            return;
        }
        session.close();
        self.presence.remove(session.id);
        self.registry.remove(session.id);
        self.registry.broadcast(&OutboundMessage::UserLeave {
            user_id: session.id,
            timestamp: now_millis(),
        });
        self.broadcast_users();
        info!(connection = %session.id, connections = self.registry.len(), "connection closed");
    }

    /// Decode and route one text frame. Undecodable frames are dropped.
    pub async fn handle_text(&self, session: &mut Session, text: &str) {
        match protocol::decode(text) {
            Ok(message) => self.handle(session, message).await,
            Err(err) => warn!(connection = %session.id, "ignoring malformed message: {}", err),
        }
    }

    pub async fn handle(&self, session: &mut Session, message: InboundMessage) {
        if session.is_closed() {
            return;
        }
        debug!(connection = %session.id, ?message, "inbound");

        let structural = matches!(
            message,
            InboundMessage::AddRow
                | InboundMessage::DeleteRow
                | InboundMessage::AddCol
                | InboundMessage::DeleteCol
        );
        let result = match message {
            InboundMessage::SetName { name } => self.set_name(session, &name),
            InboundMessage::ListGrids => self.list_grids(session).await,
            InboundMessage::CreateGrid { name } => self.create_grid(session, &name).await,
            InboundMessage::SelectGrid { grid_id } => self.select_grid(session, grid_id).await,
            InboundMessage::CellEdit {
                cell_id,
                value,
                timestamp,
            } => {
                self.cell_edit(session, &cell_id, value, timestamp.unwrap_or_else(now_millis))
                    .await
            }
            InboundMessage::UserCellPositionChange { position } => {
                self.move_cursor(session, position);
                Ok(())
            }
            InboundMessage::AddRow => self.structural(session, Axis::Row, true).await,
            InboundMessage::DeleteRow => self.structural(session, Axis::Row, false).await,
            InboundMessage::AddCol => self.structural(session, Axis::Column, true).await,
            InboundMessage::DeleteCol => self.structural(session, Axis::Column, false).await,
            InboundMessage::SortColumn { col, direction } => {
                self.sort(session, Axis::Column, col, direction).await
            }
            InboundMessage::SortRow { row, direction } => {
                self.sort(session, Axis::Row, row, direction).await
            }
        };

        if let Err(err) = result {
            debug!(connection = %session.id, "request failed: {}", err);
            let timestamp = now_millis();
            let error = err.to_string();
            let reply = if structural {
                OutboundMessage::GridDimensionError { error, timestamp }
            } else {
                OutboundMessage::Error { error, timestamp }
            };
            self.registry.send_to(session.id, reply);
        }
    }

    fn set_name(&self, session: &mut Session, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GridsyncError::NameRequired);
        }
        self.presence.set_name(session.id, name);
        session.identify();
        info!(connection = %session.id, name, "user named");
        self.broadcast_users();
        Ok(())
    }

    fn broadcast_users(&self) {
        self.registry.broadcast(&OutboundMessage::UserList {
            users: self.presence.list_visible(),
            timestamp: now_millis(),
        });
    }

    /// Unnamed connections are not listed, so their cursor stays private too.
    fn move_cursor(&self, session: &Session, position: Option<Position>) {
        self.presence.set_position(session.id, position);
        if !self.presence.has_name(session.id) {
            return;
        }
        self.registry.broadcast(&OutboundMessage::UserPositionUpdate {
            user_id: session.id,
            position,
            timestamp: now_millis(),
        });
    }

    async fn list_grids(&self, session: &Session) -> Result<()> {
        session.require_name()?;
        let grids = self.backend.list_grids().await?;
        self.registry
            .send_to(session.id, OutboundMessage::GridList { grids });
        Ok(())
    }

    async fn create_grid(&self, session: &Session, name: &str) -> Result<()> {
        session.require_name()?;
        let reply = match self.backend.create_grid(name).await {
            Ok(meta) => {
                info!(connection = %session.id, grid = %meta.id, "grid created");
                OutboundMessage::GridCreated {
                    grid: Some(meta),
                    error: None,
                }
            }
            Err(err) => {
                warn!(connection = %session.id, "create-grid failed: {}", err);
                OutboundMessage::GridCreated {
                    grid: None,
                    error: Some(err.to_string()),
                }
            }
        };
        self.registry.send_to(session.id, reply);
        Ok(())
    }

    async fn select_grid(&self, session: &mut Session, grid: GridId) -> Result<()> {
        session.require_name()?;
        let room = self.room(&grid).await?;
        let snapshot = room.store.lock().await.snapshot();

        session.select(grid.clone())?;
        self.registry.set_grid(session.id, grid.clone());
        info!(connection = %session.id, %grid, cells = snapshot.cells.len(), "grid selected");
        self.registry.send_to(
            session.id,
            OutboundMessage::full_grid(grid, snapshot, now_millis()),
        );
        Ok(())
    }

    /// Load a grid's room, fetching its cells from the backend on first use.
    async fn room(&self, grid: &GridId) -> Result<Arc<Room>> {
        let existing = self.rooms.get(grid).map(|room| Arc::clone(room.value()));
        if let Some(room) = existing {
            return Ok(room);
        }

        let snapshot = self.backend.get_grid_data(grid).await?;
        let store = GridStore::from_snapshot(snapshot)
            .with_recompute_limit(self.config.recompute_limit)
            .with_limits(self.config.limits);
        // Another connection may have loaded it meanwhile; first one wins.
        let room = Arc::clone(
            self.rooms
                .entry(grid.clone())
                .or_insert_with(|| {
                    Arc::new(Room {
                        store: Mutex::new(store),
                    })
                })
                .value(),
        );
        Ok(room)
    }

    /// Two-phase edit: accept and broadcast provisionally, then confirm with
    /// the backend in the background and broadcast the authoritative values
    /// (or revert).
    async fn cell_edit(
        &self,
        session: &Session,
        cell_id: &str,
        value: String,
        timestamp: Timestamp,
    ) -> Result<()> {
        let grid = session.grid()?.clone();
        let cell = CellRef::from_cell_id(cell_id)?;
        let room = self.room(&grid).await?;

        let (accepted, dimensions) = {
            let mut store = room.store.lock().await;
            match store.accept(cell, &value, timestamp, Some(session.id)) {
                Ok(accepted) => (accepted, store.dimensions()),
                Err(err @ GridsyncError::ConflictRejected { .. }) => {
                    debug!(connection = %session.id, "{}", err);
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        };

        if accepted.dimensions_changed {
            self.registry.broadcast_grid(
                &grid,
                &OutboundMessage::GridDimensionsChanged {
                    grid_id: grid.clone(),
                    new_dimensions: dimensions,
                    operation: DimensionOperation::Expand,
                    timestamp: now_millis(),
                },
            );
        }
        let provisional = ChangedCell {
            cell,
            record: accepted.record.clone(),
        };
        self.registry
            .broadcast_grid(&grid, &OutboundMessage::cell_update(&provisional, true));

        let hub = self.clone();
        tokio::spawn(async move { hub.confirm_edit(grid, room, accepted).await });
        Ok(())
    }

    async fn confirm_edit(&self, grid: GridId, room: Arc<Room>, accepted: Accepted) {
        let record = &accepted.record;
        let upstream = self
            .backend
            .update_cell(
                &grid,
                &accepted.cell.to_string(),
                &record.raw_value,
                record.last_updated,
                record.last_updated_by,
            )
            .await;

        match upstream {
            Ok(_) => {
                let changed = room.store.lock().await.recompute_from(accepted.cell);
                self.broadcast_changes(&grid, &changed);
            }
            Err(err) => {
                warn!(%grid, cell = %accepted.cell, "upstream rejected edit: {}", err);
                let reverted = room.store.lock().await.revert(&accepted);
                if let Some(changed) = reverted {
                    self.broadcast_changes(&grid, &changed);
                }
                if let Some(writer) = record.last_updated_by {
                    self.registry.send_to(
                        writer,
                        OutboundMessage::Error {
                            error: err.to_string(),
                            timestamp: now_millis(),
                        },
                    );
                }
            }
        }
    }

    async fn structural(&self, session: &Session, axis: Axis, insert: bool) -> Result<()> {
        let grid = session.grid()?.clone();
        let room = self.room(&grid).await?;

        let (dimensions, limits) = {
            let store = room.store.lock().await;
            (store.dimensions(), store.limits())
        };
        let (len, max) = match axis {
            Axis::Row => (dimensions.total_rows, limits.total_rows),
            Axis::Column => (dimensions.total_cols, limits.total_cols),
        };
        if insert && len >= max {
            return Err(GridsyncError::DimensionLimit(axis));
        }
        if !insert && len <= 1 {
            return Err(GridsyncError::DimensionUnderflow(axis));
        }

        let operation = match (axis, insert) {
            (Axis::Row, true) => {
                self.backend.add_row(&grid).await?;
                DimensionOperation::AddRow
            }
            (Axis::Row, false) => {
                self.backend.delete_row(&grid).await?;
                DimensionOperation::DeleteRow
            }
            (Axis::Column, true) => {
                self.backend.add_column(&grid).await?;
                DimensionOperation::AddCol
            }
            (Axis::Column, false) => {
                self.backend.delete_column(&grid).await?;
                DimensionOperation::DeleteCol
            }
        };

        let outcome = {
            let mut store = room.store.lock().await;
            match (axis, insert) {
                (Axis::Row, true) => store.insert_row(),
                (Axis::Row, false) => store.delete_row(),
                (Axis::Column, true) => store.insert_column(),
                (Axis::Column, false) => store.delete_column(),
            }
        }?;

        info!(%grid, ?operation, rows = outcome.dimensions.total_rows, cols = outcome.dimensions.total_cols, "dimensions changed");
        self.registry.broadcast_grid(
            &grid,
            &OutboundMessage::GridDimensionsChanged {
                grid_id: grid.clone(),
                new_dimensions: outcome.dimensions,
                operation,
                timestamp: now_millis(),
            },
        );
        self.broadcast_changes(&grid, &outcome.changed);
        Ok(())
    }

    async fn sort(
        &self,
        session: &Session,
        axis: Axis,
        index: usize,
        direction: SortDirection,
    ) -> Result<()> {
        let grid = session.grid()?.clone();
        let room = self.room(&grid).await?;
        let timestamp = now_millis();

        let changed = {
            let mut store = room.store.lock().await;
            match axis {
                Axis::Column => store.sort_column(index, direction, timestamp, Some(session.id)),
                Axis::Row => store.sort_row(index, direction, timestamp, Some(session.id)),
            }
        };
        if changed.is_empty() {
            return Ok(());
        }
        self.broadcast_changes(&grid, &changed);

        let hub = self.clone();
        let writer = session.id;
        tokio::spawn(async move { hub.persist_changes(grid, writer, changed).await });
        Ok(())
    }

    /// Write locally computed changes through to the backend.
    async fn persist_changes(&self, grid: GridId, writer: ConnectionId, changed: Vec<ChangedCell>) {
        for change in changed {
            let record = change.record;
            if let Err(err) = self
                .backend
                .update_cell(
                    &grid,
                    &change.cell.to_string(),
                    &record.raw_value,
                    record.last_updated,
                    record.last_updated_by,
                )
                .await
            {
                warn!(%grid, cell = %change.cell, "failed to persist sorted cell: {}", err);
                self.registry.send_to(
                    writer,
                    OutboundMessage::Error {
                        error: err.to_string(),
                        timestamp: now_millis(),
                    },
                );
                return;
            }
        }
    }

    fn broadcast_changes(&self, grid: &GridId, changed: &[ChangedCell]) {
        for change in changed {
            self.registry
                .broadcast_grid(grid, &OutboundMessage::cell_update(change, false));
        }
    }
}
