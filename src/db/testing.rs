//! In-memory session for tests: replays a scripted protocol reply and answers
//! catalog queries by matching a substring of the SQL.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use super::error::SessionError;
use super::session::{CatalogParam, CatalogQuery, CatalogRow, ProtocolChannel};
use crate::wire::backend::{
    ERROR_RESPONSE, NO_DATA, PARAMETER_DESCRIPTION, READY_FOR_QUERY, ROW_DESCRIPTION,
};
use crate::wire::{FieldValue, Record};

#[derive(Debug, Default)]
pub(crate) struct FakeSession {
    pub reply: Bytes,
    /// Number of upcoming exchanges that fail with [`SessionError::Closed`].
    pub failing_exchanges: usize,
    pub requests: Vec<Bytes>,
    pub queries: Vec<(String, Vec<CatalogParam>)>,
    routes: Vec<(&'static str, Vec<CatalogRow>)>,
}

impl FakeSession {
    pub fn replying(frames: &[Bytes]) -> Self {
        let mut reply = BytesMut::new();
        for frame in frames {
            reply.extend_from_slice(frame);
        }
        Self {
            reply: reply.freeze(),
            ..Self::default()
        }
    }

    /// Rows returned for any query whose SQL contains `needle`.
    pub fn route(mut self, needle: &'static str, rows: Vec<Vec<Option<&str>>>) -> Self {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.map(str::to_string)).collect())
            .collect();
        self.routes.push((needle, rows));
        self
    }
}

impl ProtocolChannel for FakeSession {
    async fn send_and_receive(&mut self, request: Bytes) -> Result<Bytes, SessionError> {
        self.requests.push(request);
        if self.failing_exchanges > 0 {
            self.failing_exchanges -= 1;
            return Err(SessionError::Closed);
        }
        Ok(self.reply.clone())
    }
}

impl CatalogQuery for FakeSession {
    async fn query(
        &mut self,
        sql: &str,
        params: &[CatalogParam],
    ) -> Result<Vec<CatalogRow>, SessionError> {
        self.queries.push((sql.to_string(), params.to_vec()));
        Ok(self
            .routes
            .iter()
            .find(|(needle, _)| sql.contains(needle))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}

// --- reply frames ---

pub(crate) fn ready() -> Bytes {
    READY_FOR_QUERY
        .encode(&Record::new().with("status", FieldValue::Char(b'I')))
        .unwrap()
}

pub(crate) fn no_data() -> Bytes {
    NO_DATA.encode(&Record::new()).unwrap()
}

pub(crate) fn parameter_description(oids: &[i32]) -> Bytes {
    let items = oids
        .iter()
        .map(|oid| Record::new().with("oid", FieldValue::Int32(*oid)))
        .collect();
    PARAMETER_DESCRIPTION
        .encode(&Record::new().with("dataTypes", FieldValue::Array(items)))
        .unwrap()
}

/// Columns as `(name, table oid, attribute number, type oid)`.
pub(crate) fn row_description(columns: &[(&str, i32, i16, i32)]) -> Bytes {
    let items = columns
        .iter()
        .map(|&(name, table, attnum, type_oid)| {
            Record::new()
                .with("name", FieldValue::Str(name.to_string()))
                .with("tableOID", FieldValue::Int32(table))
                .with("columnAttrNumber", FieldValue::Int16(attnum))
                .with("typeOID", FieldValue::Int32(type_oid))
                .with("typeSize", FieldValue::Int16(-1))
                .with("typeModifier", FieldValue::Int32(-1))
                .with("formatCode", FieldValue::Int16(0))
        })
        .collect();
    ROW_DESCRIPTION
        .encode(&Record::new().with("fields", FieldValue::Array(items)))
        .unwrap()
}

pub(crate) fn error_response(fields: &[(&str, &str)]) -> Bytes {
    let dict: BTreeMap<String, String> = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ERROR_RESPONSE
        .encode(&Record::new().with("fields", FieldValue::Dict(dict)))
        .unwrap()
}
