//! Connection registry: who is connected, which grid each one watches, and
//! the channel that reaches its socket writer.

use dashmap::DashMap;
use gridsync_core::backend::GridId;
use gridsync_core::presence::ConnectionId;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::protocol::OutboundMessage;

struct Connection {
    tx: UnboundedSender<OutboundMessage>,
    grid: Option<GridId>,
}

#[derive(Default)]
pub struct Registry {
    connections: DashMap<ConnectionId, Connection>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: ConnectionId, tx: UnboundedSender<OutboundMessage>) {
        self.connections.insert(id, Connection { tx, grid: None });
    }

    pub fn remove(&self, id: ConnectionId) -> bool {
        self.connections.remove(&id).is_some()
    }

    pub fn set_grid(&self, id: ConnectionId, grid: GridId) {
        if let Some(mut connection) = self.connections.get_mut(&id) {
            connection.grid = Some(grid);
        }
    }

    pub fn grid_of(&self, id: ConnectionId) -> Option<GridId> {
        self.connections.get(&id).and_then(|c| c.grid.clone())
    }

    /// Send to one connection. A closed channel is not an error: the
    /// connection's own task tears it down.
    pub fn send_to(&self, id: ConnectionId, message: OutboundMessage) {
        if let Some(connection) = self.connections.get(&id)
            && connection.tx.send(message).is_err()
        {
            debug!(connection = %id, "send to closed channel dropped");
        }
    }

    /// Send to every connection, including the originator.
    pub fn broadcast(&self, message: &OutboundMessage) {
        for connection in self.connections.iter() {
            let _ = connection.tx.send(message.clone());
        }
    }

    /// Send to every connection that selected `grid`.
    pub fn broadcast_grid(&self, grid: &GridId, message: &OutboundMessage) {
        for connection in self.connections.iter() {
            if connection.grid.as_ref() == Some(grid) {
                let _ = connection.tx.send(message.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
