use thiserror::Error;

/// Failures raised while encoding or decoding a framed message.
///
/// A message that simply is not the one the caller asked for is not an error;
/// see [`ParseResult::Mismatch`](super::ParseResult::Mismatch).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The buffer ends before the declared message boundary.
    #[error("buffer truncated: message at offset {offset} needs {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// The decoded fields did not land exactly on the declared message boundary.
    #[error("framing error in {message}: cursor at {cursor}, message ends at {end}")]
    Framing {
        message: &'static str,
        cursor: usize,
        end: usize,
    },

    /// A fixed byte sequence inside the message did not match.
    #[error("field mismatch inside {message}: `{field}` does not match the expected bytes")]
    FieldMismatch {
        message: &'static str,
        field: &'static str,
    },

    #[error("invalid UTF-8 in field `{field}`")]
    InvalidUtf8 { field: &'static str },

    /// The value supplied for encoding does not fit the field's codec.
    #[error("value for field `{field}` does not match its codec")]
    ValueMismatch { field: &'static str },

    /// A field was absent from a decoded record or had another kind than requested.
    #[error("field `{field}` is missing or has an unexpected type")]
    MissingField { field: String },
}
