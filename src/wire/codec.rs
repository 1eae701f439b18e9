//! Framing: turning descriptors plus values into length-prefixed messages and back.
//!
//! A frame is `indicator (1 byte, optional) | length (int32, counts itself) | body`.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use super::backend::ERROR_RESPONSE;
use super::error::WireError;
use super::field::{decode_field, encode_fields, MessagePattern, Reader, Record};

/// Indicator of the backend's ErrorResponse message.
pub const ERROR_RESPONSE_INDICATOR: u8 = b'E';

/// A message kind that can be decoded from a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub name: &'static str,
    /// `None` for the few frontend messages sent without a tag (startup packet).
    pub indicator: Option<u8>,
    pub pattern: MessagePattern,
}

impl MessageDescriptor {
    /// Encodes `data` laid out by this descriptor's pattern.
    pub fn encode(&self, data: &Record) -> Result<Bytes, WireError> {
        Ok(frame(self.indicator, &encode_fields(self.pattern, data)?))
    }
}

/// A frontend message kind together with its serializer.
pub struct ClientMessage<P> {
    pub name: &'static str,
    pub indicator: Option<u8>,
    pub pattern: fn(&P) -> Result<Vec<Bytes>, WireError>,
}

/// The server rejected something; carried by [`ParseResult::ServerError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub severity: String,
    pub message: String,
    /// Every error field, keyed by its one-character code.
    pub fields: BTreeMap<String, String>,
    pub buffer_offset: usize,
}

impl ServerError {
    pub fn field(&self, code: char) -> Option<&str> {
        let mut key = [0u8; 4];
        self.fields
            .get(code.encode_utf8(&mut key) as &str)
            .map(String::as_str)
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

/// Outcome of one decode attempt. Exactly one variant per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseResult {
    Payload {
        data: Record,
        message_name: &'static str,
        buffer_offset: usize,
    },
    /// The buffer holds another message kind; scanning resumes at `buffer_offset`.
    Mismatch {
        message_name: String,
        buffer_offset: usize,
    },
    ServerError(ServerError),
}

impl ParseResult {
    pub fn buffer_offset(&self) -> usize {
        match self {
            ParseResult::Payload { buffer_offset, .. }
            | ParseResult::Mismatch { buffer_offset, .. } => *buffer_offset,
            ParseResult::ServerError(err) => err.buffer_offset,
        }
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, ParseResult::Mismatch { .. })
    }
}

fn read_length(buf: &[u8], at: usize) -> Result<u32, WireError> {
    match buf.get(at..at + 4) {
        Some(b) => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(WireError::Truncated {
            offset: at,
            needed: 4,
            available: buf.len().saturating_sub(at),
        }),
    }
}

/// Decodes the message starting at `offset` as `message`.
///
/// An ErrorResponse found where another message was expected always decodes
/// as [`ParseResult::ServerError`].
pub fn decode(message: &MessageDescriptor, buf: &[u8], offset: usize) -> Result<ParseResult, WireError> {
    let (indicator, header) = match message.indicator {
        Some(_) => {
            let Some(&byte) = buf.get(offset) else {
                return Err(WireError::Truncated {
                    offset,
                    needed: 1,
                    available: 0,
                });
            };
            (Some(byte), offset + 1)
        }
        None => (None, offset),
    };

    let length = read_length(buf, header)? as usize;
    let message_end = header + length;

    let is_error = indicator == Some(ERROR_RESPONSE_INDICATOR)
        && message.indicator != Some(ERROR_RESPONSE_INDICATOR);

    if indicator != message.indicator && !is_error {
        return Ok(ParseResult::Mismatch {
            message_name: message.name.to_string(),
            buffer_offset: message_end,
        });
    }

    if message_end > buf.len() {
        return Err(WireError::Truncated {
            offset,
            needed: message_end - offset,
            available: buf.len() - offset,
        });
    }

    let body = if is_error { &ERROR_RESPONSE } else { message };
    if length < 4 {
        return Err(WireError::Framing {
            message: body.name,
            cursor: header + 4,
            end: message_end,
        });
    }

    let mut reader = Reader::new(buf, header + 4, message_end, body.name);
    let mut data = Record::new();
    for &(name, codec) in body.pattern.iter() {
        if reader.at_end() {
            break;
        }
        data.push(name, decode_field(name, &codec, &mut reader)?);
    }
    if !reader.at_end() {
        return Err(WireError::Framing {
            message: body.name,
            cursor: reader.position(),
            end: message_end,
        });
    }
    let buffer_offset = reader.position();

    if is_error {
        let fields = data.dict("fields")?.clone();
        let get = |code: &str| fields.get(code).cloned().unwrap_or_default();
        return Ok(ParseResult::ServerError(ServerError {
            severity: get("S"),
            message: get("M"),
            fields,
            buffer_offset,
        }));
    }

    Ok(ParseResult::Payload {
        data,
        message_name: message.name,
        buffer_offset,
    })
}

/// Tries each descriptor in order and returns the first result that is not a mismatch.
///
/// When every attempt mismatches, the combined mismatch carries the offset
/// reported by the last descriptor tried.
pub fn decode_one_of(
    messages: &[&MessageDescriptor],
    buf: &[u8],
    offset: usize,
) -> Result<ParseResult, WireError> {
    let message_name = messages
        .iter()
        .map(|m| m.name)
        .collect::<Vec<_>>()
        .join(" | ");
    let mut last_offset = 0;
    for message in messages {
        let result = decode(message, buf, offset)?;
        if !result.is_mismatch() {
            return Ok(result);
        }
        last_offset = result.buffer_offset();
    }
    Ok(ParseResult::Mismatch {
        message_name,
        buffer_offset: last_offset,
    })
}

/// Walks a buffer of consecutive frames and returns every message that decodes
/// against one of `messages`, in buffer order. Other frames are skipped.
pub fn scan(messages: &[&MessageDescriptor], buf: &[u8]) -> Result<Vec<ParseResult>, WireError> {
    let mut found = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let result = decode_one_of(messages, buf, offset)?;
        let next = result.buffer_offset();
        if next <= offset {
            return Err(WireError::Framing {
                message: "frame",
                cursor: next,
                end: offset,
            });
        }
        offset = next;
        if !result.is_mismatch() {
            found.push(result);
        }
    }
    Ok(found)
}

fn frame(indicator: Option<u8>, buffers: &[Bytes]) -> Bytes {
    let indicator_len = usize::from(indicator.is_some());
    let size = indicator_len + 4 + buffers.iter().map(Bytes::len).sum::<usize>();
    let mut out = BytesMut::with_capacity(size);
    if let Some(indicator) = indicator {
        out.put_u8(indicator);
    }
    out.put_u32((size - indicator_len) as u32);
    for buffer in buffers {
        out.put_slice(buffer);
    }
    out.freeze()
}

/// Serializes one frontend message.
pub fn encode<P>(message: &ClientMessage<P>, params: &P) -> Result<Bytes, WireError> {
    let buffers = (message.pattern)(params)?;
    Ok(frame(message.indicator, &buffers))
}
