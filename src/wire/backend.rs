//! Backend (server to client) message descriptors.

use super::codec::MessageDescriptor;
use super::field::FieldCodec::*;
use super::field::MessagePattern;

/// Authentication request. `code` selects the method; `data` carries the
/// MD5 salt or SASL payload and is absent for the bodiless variants.
pub const AUTHENTICATION: MessageDescriptor = MessageDescriptor {
    name: "Authentication",
    indicator: Some(b'R'),
    pattern: &[("code", Int32), ("data", Remainder)],
};

pub const PARAMETER_STATUS: MessageDescriptor = MessageDescriptor {
    name: "ParameterStatus",
    indicator: Some(b'S'),
    pattern: &[("name", CString), ("value", CString)],
};

pub const BACKEND_KEY_DATA: MessageDescriptor = MessageDescriptor {
    name: "BackendKeyData",
    indicator: Some(b'K'),
    pattern: &[("processId", Int32), ("secretKey", Int32)],
};

pub const READY_FOR_QUERY: MessageDescriptor = MessageDescriptor {
    name: "ReadyForQuery",
    indicator: Some(b'Z'),
    pattern: &[("status", Byte1)],
};

pub const PARSE_COMPLETE: MessageDescriptor = MessageDescriptor {
    name: "ParseComplete",
    indicator: Some(b'1'),
    pattern: &[],
};

pub const BIND_COMPLETE: MessageDescriptor = MessageDescriptor {
    name: "BindComplete",
    indicator: Some(b'2'),
    pattern: &[],
};

pub const PARAMETER_DESCRIPTION: MessageDescriptor = MessageDescriptor {
    name: "ParameterDescription",
    indicator: Some(b't'),
    pattern: &[("dataTypes", Array(&[("oid", Int32)]))],
};

/// Layout of one column entry inside RowDescription.
pub const ROW_FIELD: MessagePattern = &[
    ("name", CString),
    ("tableOID", Int32),
    ("columnAttrNumber", Int16),
    ("typeOID", Int32),
    ("typeSize", Int16),
    ("typeModifier", Int32),
    ("formatCode", Int16),
];

pub const ROW_DESCRIPTION: MessageDescriptor = MessageDescriptor {
    name: "RowDescription",
    indicator: Some(b'T'),
    pattern: &[("fields", Array(ROW_FIELD))],
};

pub const NO_DATA: MessageDescriptor = MessageDescriptor {
    name: "NoData",
    indicator: Some(b'n'),
    pattern: &[],
};

pub const DATA_ROW: MessageDescriptor = MessageDescriptor {
    name: "DataRow",
    indicator: Some(b'D'),
    pattern: &[("columns", Array(&[("value", ByteN)]))],
};

pub const COMMAND_COMPLETE: MessageDescriptor = MessageDescriptor {
    name: "CommandComplete",
    indicator: Some(b'C'),
    pattern: &[("tag", CString)],
};

pub const EMPTY_QUERY_RESPONSE: MessageDescriptor = MessageDescriptor {
    name: "EmptyQueryResponse",
    indicator: Some(b'I'),
    pattern: &[],
};

pub const NOTICE_RESPONSE: MessageDescriptor = MessageDescriptor {
    name: "NoticeResponse",
    indicator: Some(b'N'),
    pattern: &[("fields", ByteDict)],
};

pub const ERROR_RESPONSE: MessageDescriptor = MessageDescriptor {
    name: "ErrorResponse",
    indicator: Some(b'E'),
    pattern: &[("fields", ByteDict)],
};

/// Authentication method codes carried in [`AUTHENTICATION`].
pub mod auth_code {
    pub const OK: i32 = 0;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}
