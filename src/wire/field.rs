//! Field codecs: the closed set of value shapes a message pattern is built from.
//!
//! Every kind has exactly one encoder and one decoder, selected by a `match`
//! over [`FieldCodec`]. Patterns are plain `&'static` slices so that message
//! descriptors can live in `const` items.

use std::collections::BTreeMap;

use bytes::{BufMut, Bytes, BytesMut};

use super::error::WireError;

/// Ordered `(field name, codec)` pairs. Fields are decoded strictly in this order.
pub type MessagePattern = &'static [(&'static str, FieldCodec)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCodec {
    /// Exact byte sequence, e.g. the protocol version in the startup packet.
    Fixed(&'static [u8]),
    /// A single character code.
    Byte1,
    /// Null-terminated UTF-8 string.
    CString,
    /// Int32 length followed by that many bytes; a length of -1 is NULL.
    ByteN,
    Int16,
    Int32,
    /// One-byte keys mapped to null-terminated strings, closed by a zero byte.
    ByteDict,
    /// Null-terminated keys mapped to null-terminated strings, closed by an empty key.
    CStringDict,
    /// Int16 element count followed by that many repetitions of the sub-pattern.
    Array(MessagePattern),
    /// Opaque bytes running up to the end of the message.
    Remainder,
}

/// A decoded (or to-be-encoded) field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Fixed,
    Char(u8),
    Str(String),
    Bytes(Bytes),
    Null,
    Int16(i16),
    Int32(i32),
    Dict(BTreeMap<String, String>),
    Array(Vec<Record>),
}

/// Named field values of one message body, in pattern order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(&'static str, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: FieldValue) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: &'static str, value: FieldValue) {
        self.fields.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (*name, value))
    }

    pub fn str(&self, name: &str) -> Result<&str, WireError> {
        match self.get(name) {
            Some(FieldValue::Str(s)) => Ok(s),
            _ => Err(missing(name)),
        }
    }

    pub fn char(&self, name: &str) -> Result<u8, WireError> {
        match self.get(name) {
            Some(FieldValue::Char(c)) => Ok(*c),
            _ => Err(missing(name)),
        }
    }

    pub fn int16(&self, name: &str) -> Result<i16, WireError> {
        match self.get(name) {
            Some(FieldValue::Int16(v)) => Ok(*v),
            _ => Err(missing(name)),
        }
    }

    pub fn int32(&self, name: &str) -> Result<i32, WireError> {
        match self.get(name) {
            Some(FieldValue::Int32(v)) => Ok(*v),
            _ => Err(missing(name)),
        }
    }

    /// Returns `None` for a SQL NULL or for a trailing field the message did not carry.
    pub fn bytes(&self, name: &str) -> Result<Option<&Bytes>, WireError> {
        match self.get(name) {
            Some(FieldValue::Bytes(b)) => Ok(Some(b)),
            Some(FieldValue::Null) | None => Ok(None),
            _ => Err(missing(name)),
        }
    }

    pub fn dict(&self, name: &str) -> Result<&BTreeMap<String, String>, WireError> {
        match self.get(name) {
            Some(FieldValue::Dict(d)) => Ok(d),
            _ => Err(missing(name)),
        }
    }

    pub fn array(&self, name: &str) -> Result<&[Record], WireError> {
        match self.get(name) {
            Some(FieldValue::Array(items)) => Ok(items),
            _ => Err(missing(name)),
        }
    }
}

fn missing(name: &str) -> WireError {
    WireError::MissingField {
        field: name.to_string(),
    }
}

/// Bounded cursor over one message body.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    end: usize,
    message: &'static str,
}

impl<'a> Reader<'a> {
    /// `end` must not exceed `buf.len()`.
    pub(crate) fn new(buf: &'a [u8], pos: usize, end: usize, message: &'static str) -> Self {
        Self {
            buf,
            pos,
            end,
            message,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos == self.end
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let next = self.pos.checked_add(n).filter(|next| *next <= self.end);
        let Some(next) = next else {
            return Err(WireError::Framing {
                message: self.message,
                cursor: self.pos.saturating_add(n),
                end: self.end,
            });
        };
        let buf: &'a [u8] = self.buf;
        let slice = &buf[self.pos..next];
        self.pos = next;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn i16(&mut self) -> Result<i16, WireError> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, WireError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstring(&mut self, field: &'static str) -> Result<String, WireError> {
        let buf: &'a [u8] = self.buf;
        let rest = &buf[self.pos..self.end];
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return Err(WireError::Framing {
                message: self.message,
                cursor: self.end + 1,
                end: self.end,
            });
        };
        let raw = self.take(nul)?;
        self.pos += 1;
        String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8 { field })
    }
}

/// Decodes one field at the reader's cursor.
pub(crate) fn decode_field(
    field: &'static str,
    codec: &FieldCodec,
    reader: &mut Reader<'_>,
) -> Result<FieldValue, WireError> {
    let value = match codec {
        FieldCodec::Fixed(expected) => {
            if reader.take(expected.len())? != *expected {
                return Err(WireError::FieldMismatch {
                    message: reader.message,
                    field,
                });
            }
            FieldValue::Fixed
        }
        FieldCodec::Byte1 => FieldValue::Char(reader.u8()?),
        FieldCodec::CString => FieldValue::Str(reader.cstring(field)?),
        FieldCodec::ByteN => {
            let len = reader.i32()?;
            if len < 0 {
                FieldValue::Null
            } else {
                FieldValue::Bytes(Bytes::copy_from_slice(reader.take(len as usize)?))
            }
        }
        FieldCodec::Int16 => FieldValue::Int16(reader.i16()?),
        FieldCodec::Int32 => FieldValue::Int32(reader.i32()?),
        FieldCodec::ByteDict => {
            let mut dict = BTreeMap::new();
            loop {
                let key = reader.u8()?;
                if key == 0 {
                    break;
                }
                let value = reader.cstring(field)?;
                dict.insert(char::from(key).to_string(), value);
            }
            FieldValue::Dict(dict)
        }
        FieldCodec::CStringDict => {
            let mut dict = BTreeMap::new();
            loop {
                let key = reader.cstring(field)?;
                if key.is_empty() {
                    break;
                }
                let value = reader.cstring(field)?;
                dict.insert(key, value);
            }
            FieldValue::Dict(dict)
        }
        FieldCodec::Array(pattern) => {
            let count = reader.i16()?.max(0) as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                let mut item = Record::new();
                for &(name, sub) in pattern.iter() {
                    item.push(name, decode_field(name, &sub, reader)?);
                }
                items.push(item);
            }
            FieldValue::Array(items)
        }
        FieldCodec::Remainder => {
            let rest = reader.end - reader.pos;
            FieldValue::Bytes(Bytes::copy_from_slice(reader.take(rest)?))
        }
    };
    Ok(value)
}

/// Appends one field to `out`.
pub(crate) fn encode_field(
    field: &'static str,
    codec: &FieldCodec,
    value: &FieldValue,
    out: &mut BytesMut,
) -> Result<(), WireError> {
    match (codec, value) {
        (FieldCodec::Fixed(bytes), FieldValue::Fixed) => out.put_slice(bytes),
        (FieldCodec::Byte1, FieldValue::Char(c)) => out.put_u8(*c),
        (FieldCodec::CString, FieldValue::Str(s)) => put_cstring(out, s, field)?,
        (FieldCodec::ByteN, FieldValue::Bytes(b)) => {
            let len = i32::try_from(b.len()).map_err(|_| WireError::ValueMismatch { field })?;
            out.put_i32(len);
            out.put_slice(b);
        }
        (FieldCodec::ByteN, FieldValue::Null) => out.put_i32(-1),
        (FieldCodec::Int16, FieldValue::Int16(v)) => out.put_i16(*v),
        (FieldCodec::Int32, FieldValue::Int32(v)) => out.put_i32(*v),
        (FieldCodec::ByteDict, FieldValue::Dict(dict)) => {
            for (key, value) in dict {
                let &[code] = key.as_bytes() else {
                    return Err(WireError::ValueMismatch { field });
                };
                out.put_u8(code);
                put_cstring(out, value, field)?;
            }
            out.put_u8(0);
        }
        (FieldCodec::CStringDict, FieldValue::Dict(dict)) => {
            for (key, value) in dict {
                if key.is_empty() {
                    return Err(WireError::ValueMismatch { field });
                }
                put_cstring(out, key, field)?;
                put_cstring(out, value, field)?;
            }
            out.put_u8(0);
        }
        (FieldCodec::Array(pattern), FieldValue::Array(items)) => {
            let count = i16::try_from(items.len()).map_err(|_| WireError::ValueMismatch { field })?;
            out.put_i16(count);
            for item in items {
                encode_into(*pattern, item, out)?;
            }
        }
        (FieldCodec::Remainder, FieldValue::Bytes(b)) => out.put_slice(b),
        _ => return Err(WireError::ValueMismatch { field }),
    }
    Ok(())
}

fn put_cstring(out: &mut BytesMut, s: &str, field: &'static str) -> Result<(), WireError> {
    // An interior NUL would silently cut the string short on the other side.
    if s.as_bytes().contains(&0) {
        return Err(WireError::ValueMismatch { field });
    }
    out.put_slice(s.as_bytes());
    out.put_u8(0);
    Ok(())
}

fn encode_into(pattern: MessagePattern, record: &Record, out: &mut BytesMut) -> Result<(), WireError> {
    for &(name, codec) in pattern.iter() {
        let value = record.get(name).ok_or_else(|| missing(name))?;
        encode_field(name, &codec, value, out)?;
    }
    Ok(())
}

/// Encodes every field of `pattern` from `record`, one buffer per field.
pub fn encode_fields(pattern: MessagePattern, record: &Record) -> Result<Vec<Bytes>, WireError> {
    pattern
        .iter()
        .map(|&(name, codec)| {
            let value = record.get(name).ok_or_else(|| missing(name))?;
            let mut out = BytesMut::new();
            encode_field(name, &codec, value, &mut out)?;
            Ok(out.freeze())
        })
        .collect()
}
