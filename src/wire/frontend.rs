//! Frontend (client to server) messages.
//!
//! Each message has a declarative layout and a pattern function mapping its
//! parameters onto that layout, so the bytes are produced by the same field
//! encoders the decoder mirrors.

use std::collections::BTreeMap;

use bytes::Bytes;

use super::codec::{ClientMessage, MessageDescriptor};
use super::error::WireError;
use super::field::FieldCodec::*;
use super::field::{encode_fields, FieldValue, MessagePattern, Record};

/// Protocol version 3.0.
pub const PROTOCOL_VERSION: &[u8] = &[0, 3, 0, 0];

pub const STARTUP_LAYOUT: MessagePattern = &[
    ("protocolVersion", Fixed(PROTOCOL_VERSION)),
    ("parameters", CStringDict),
];
pub const PASSWORD_LAYOUT: MessagePattern = &[("password", CString)];
pub const SASL_INITIAL_RESPONSE_LAYOUT: MessagePattern =
    &[("mechanism", CString), ("data", ByteN)];
pub const SASL_RESPONSE_LAYOUT: MessagePattern = &[("data", Remainder)];
pub const QUERY_LAYOUT: MessagePattern = &[("query", CString)];
pub const PARSE_LAYOUT: MessagePattern = &[
    ("name", CString),
    ("query", CString),
    ("dataTypes", Array(&[("oid", Int32)])),
];
pub const BIND_LAYOUT: MessagePattern = &[
    ("portal", CString),
    ("statement", CString),
    ("parameterFormats", Array(&[("format", Int16)])),
    ("parameters", Array(&[("value", ByteN)])),
    ("resultFormats", Array(&[("format", Int16)])),
];
pub const DESCRIBE_LAYOUT: MessagePattern = &[("kind", Byte1), ("name", CString)];
pub const EXECUTE_LAYOUT: MessagePattern = &[("portal", CString), ("maxRows", Int32)];

/// Startup packet. Sent without an indicator byte.
#[derive(Debug, Clone, Default)]
pub struct Startup {
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Password {
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct SaslInitialResponse {
    pub mechanism: String,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
pub struct SaslResponse {
    pub data: Bytes,
}

/// Simple query.
#[derive(Debug, Clone)]
pub struct Query {
    pub query: String,
}

#[derive(Debug, Clone, Default)]
pub struct Parse {
    /// Empty for the unnamed statement.
    pub name: String,
    pub query: String,
    /// Parameter type hints; zero or missing entries let the server infer.
    pub param_types: Vec<u32>,
}

/// Bind with every parameter and result column in text format.
#[derive(Debug, Clone, Default)]
pub struct Bind {
    pub portal: String,
    pub statement: String,
    pub params: Vec<Option<Bytes>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescribeTarget {
    Statement,
    Portal,
}

impl DescribeTarget {
    pub fn as_byte(self) -> u8 {
        match self {
            DescribeTarget::Statement => b'S',
            DescribeTarget::Portal => b'P',
        }
    }
}

#[derive(Debug, Clone)]
pub struct Describe {
    pub target: DescribeTarget,
    pub name: String,
}

impl Describe {
    pub fn statement(name: impl Into<String>) -> Self {
        Self {
            target: DescribeTarget::Statement,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Execute {
    pub portal: String,
    /// Zero fetches every row.
    pub max_rows: i32,
}

fn str_value(s: &str) -> FieldValue {
    FieldValue::Str(s.to_string())
}

fn startup_pattern(p: &Startup) -> Result<Vec<Bytes>, WireError> {
    let record = Record::new()
        .with("protocolVersion", FieldValue::Fixed)
        .with("parameters", FieldValue::Dict(p.parameters.clone()));
    encode_fields(STARTUP_LAYOUT, &record)
}

fn password_pattern(p: &Password) -> Result<Vec<Bytes>, WireError> {
    encode_fields(
        PASSWORD_LAYOUT,
        &Record::new().with("password", str_value(&p.password)),
    )
}

fn sasl_initial_response_pattern(p: &SaslInitialResponse) -> Result<Vec<Bytes>, WireError> {
    let record = Record::new()
        .with("mechanism", str_value(&p.mechanism))
        .with("data", FieldValue::Bytes(p.data.clone()));
    encode_fields(SASL_INITIAL_RESPONSE_LAYOUT, &record)
}

fn sasl_response_pattern(p: &SaslResponse) -> Result<Vec<Bytes>, WireError> {
    encode_fields(
        SASL_RESPONSE_LAYOUT,
        &Record::new().with("data", FieldValue::Bytes(p.data.clone())),
    )
}

fn query_pattern(p: &Query) -> Result<Vec<Bytes>, WireError> {
    encode_fields(QUERY_LAYOUT, &Record::new().with("query", str_value(&p.query)))
}

fn parse_pattern(p: &Parse) -> Result<Vec<Bytes>, WireError> {
    let data_types = p
        .param_types
        .iter()
        .map(|oid| Record::new().with("oid", FieldValue::Int32(*oid as i32)))
        .collect();
    let record = Record::new()
        .with("name", str_value(&p.name))
        .with("query", str_value(&p.query))
        .with("dataTypes", FieldValue::Array(data_types));
    encode_fields(PARSE_LAYOUT, &record)
}

fn bind_pattern(p: &Bind) -> Result<Vec<Bytes>, WireError> {
    let params = p
        .params
        .iter()
        .map(|value| {
            let value = match value {
                Some(bytes) => FieldValue::Bytes(bytes.clone()),
                None => FieldValue::Null,
            };
            Record::new().with("value", value)
        })
        .collect();
    let record = Record::new()
        .with("portal", str_value(&p.portal))
        .with("statement", str_value(&p.statement))
        .with("parameterFormats", FieldValue::Array(Vec::new()))
        .with("parameters", FieldValue::Array(params))
        .with("resultFormats", FieldValue::Array(Vec::new()));
    encode_fields(BIND_LAYOUT, &record)
}

fn describe_pattern(p: &Describe) -> Result<Vec<Bytes>, WireError> {
    let record = Record::new()
        .with("kind", FieldValue::Char(p.target.as_byte()))
        .with("name", str_value(&p.name));
    encode_fields(DESCRIBE_LAYOUT, &record)
}

fn execute_pattern(p: &Execute) -> Result<Vec<Bytes>, WireError> {
    let record = Record::new()
        .with("portal", str_value(&p.portal))
        .with("maxRows", FieldValue::Int32(p.max_rows));
    encode_fields(EXECUTE_LAYOUT, &record)
}

fn empty_pattern(_: &()) -> Result<Vec<Bytes>, WireError> {
    Ok(Vec::new())
}

pub const STARTUP: ClientMessage<Startup> = ClientMessage {
    name: "StartupMessage",
    indicator: None,
    pattern: startup_pattern,
};

pub const PASSWORD: ClientMessage<Password> = ClientMessage {
    name: "PasswordMessage",
    indicator: Some(b'p'),
    pattern: password_pattern,
};

pub const SASL_INITIAL_RESPONSE: ClientMessage<SaslInitialResponse> = ClientMessage {
    name: "SASLInitialResponse",
    indicator: Some(b'p'),
    pattern: sasl_initial_response_pattern,
};

pub const SASL_RESPONSE: ClientMessage<SaslResponse> = ClientMessage {
    name: "SASLResponse",
    indicator: Some(b'p'),
    pattern: sasl_response_pattern,
};

pub const QUERY: ClientMessage<Query> = ClientMessage {
    name: "Query",
    indicator: Some(b'Q'),
    pattern: query_pattern,
};

pub const PARSE: ClientMessage<Parse> = ClientMessage {
    name: "Parse",
    indicator: Some(b'P'),
    pattern: parse_pattern,
};

pub const BIND: ClientMessage<Bind> = ClientMessage {
    name: "Bind",
    indicator: Some(b'B'),
    pattern: bind_pattern,
};

pub const DESCRIBE: ClientMessage<Describe> = ClientMessage {
    name: "Describe",
    indicator: Some(b'D'),
    pattern: describe_pattern,
};

pub const EXECUTE: ClientMessage<Execute> = ClientMessage {
    name: "Execute",
    indicator: Some(b'E'),
    pattern: execute_pattern,
};

pub const SYNC: ClientMessage<()> = ClientMessage {
    name: "Sync",
    indicator: Some(b'S'),
    pattern: empty_pattern,
};

pub const TERMINATE: ClientMessage<()> = ClientMessage {
    name: "Terminate",
    indicator: Some(b'X'),
    pattern: empty_pattern,
};

/// Decoding view of a frontend message, for servers and test doubles that
/// need to read what a client sent.
pub const fn layout(name: &'static str, indicator: Option<u8>, pattern: MessagePattern) -> MessageDescriptor {
    MessageDescriptor {
        name,
        indicator,
        pattern,
    }
}
