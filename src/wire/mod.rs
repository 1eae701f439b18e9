//! Pattern-driven codec for the PostgreSQL v3 wire protocol.
//!
//! ```text
//!  ClientMessage<P> + params --encode--> framed bytes --> server
//!  server --> framed bytes --decode(MessageDescriptor)--> ParseResult
//! ```
//!
//! Messages are described declaratively as ordered field patterns
//! ([`MessagePattern`]); the codec walks the pattern and dispatches each field
//! to the encoder or decoder of its [`FieldCodec`] kind.
pub mod backend;
pub mod codec;
pub mod error;
pub mod field;
pub mod frontend;

pub use codec::{
    decode, decode_one_of, encode, scan, ClientMessage, MessageDescriptor, ParseResult,
    ServerError, ERROR_RESPONSE_INDICATOR,
};
pub use error::WireError;
pub use field::{encode_fields, FieldCodec, FieldValue, MessagePattern, Record};
