//! Type inference: describe a statement over the wire, then resolve the
//! reported OIDs and columns against the system catalog.
pub mod catalog;
mod engine;
mod error;
pub mod probe;
mod types;

pub use engine::{infer, infer_all};
pub use error::InferError;
pub use probe::probe;
pub use types::*;
