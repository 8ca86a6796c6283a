//! Startup errors for the gridsync server binary.

use std::net::AddrParseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid bind address '{addr}': {source}")]
    InvalidBindAddress {
        addr: String,
        #[source]
        source: AddrParseError,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid log filter '{0}'")]
    LogFilter(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
