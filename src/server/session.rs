//! Per-connection protocol state.

use gridsync_core::backend::GridId;
use gridsync_core::presence::ConnectionId;
use gridsync_core::{GridsyncError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Channel open, no display name yet.
    Connecting,
    /// Named, no grid selected.
    Identified,
    GridSelected(GridId),
    Closed,
}

#[derive(Debug)]
pub struct Session {
    pub id: ConnectionId,
    state: SessionState,
}

impl Session {
    pub fn new(id: ConnectionId) -> Self {
        Session {
            id,
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Naming never leaves a selected grid.
    pub fn identify(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Identified;
        }
    }

    pub fn require_name(&self) -> Result<()> {
        match self.state {
            SessionState::Identified | SessionState::GridSelected(_) => Ok(()),
            SessionState::Connecting | SessionState::Closed => Err(GridsyncError::NameRequired),
        }
    }

    pub fn select(&mut self, grid: GridId) -> Result<()> {
        self.require_name()?;
        self.state = SessionState::GridSelected(grid);
        Ok(())
    }

    pub fn grid(&self) -> Result<&GridId> {
        match &self.state {
            SessionState::GridSelected(grid) => Ok(grid),
            _ => Err(GridsyncError::NoGridSelected),
        }
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}
