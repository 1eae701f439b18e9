use thiserror::Error;

use super::types::ParseError;
use crate::db::SessionError;
use crate::wire::WireError;

#[derive(Debug, Error)]
pub enum InferError {
    /// The server rejected the statement. Affects this query only.
    #[error("{0}")]
    Parse(ParseError),

    /// The probe reported an OID the type catalog does not know.
    #[error("no catalog entry for type OID {oid}")]
    MissingType { oid: u32 },

    #[error("malformed catalog row: {0}")]
    Catalog(String),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl InferError {
    /// Whether the connection can still be used for further queries.
    pub fn is_fatal(&self) -> bool {
        matches!(self, InferError::Session(_) | InferError::Wire(_))
    }
}
