use std::time::Duration;

use thiserror::Error;

use crate::wire::{ServerError, WireError};

/// Failures of the connection itself, as opposed to a statement the server rejected
/// during inference.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("server error: {0}")]
    Server(ServerError),

    #[error("unexpected {found} while waiting for {expected}")]
    Unexpected {
        expected: &'static str,
        found: String,
    },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed by server")]
    Closed,

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
}
