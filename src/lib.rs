//! gridsync - real-time collaborative grid synchronization server.

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use gridsync_core::{Backend, LocalBackend};
pub use error::{Result, ServerError};
pub use server::{Hub, HubConfig};
