use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use super::error::InferError;
use super::types::{Describe, ParamDescriptor, ParseError, TypeField};
use crate::db::ProtocolChannel;
use crate::wire::backend::{PARAMETER_DESCRIPTION, ROW_DESCRIPTION};
use crate::wire::frontend::{self, Parse, DESCRIBE, PARSE, SYNC};
use crate::wire::{encode, scan, ParseResult, Record, ServerError, WireError};

/// Asks the server to describe `query` as the unnamed statement without running it.
///
/// A statement the server rejects comes back as [`InferError::Parse`]. The
/// request always ends in Sync; if the exchange itself fails, a standalone
/// Sync is still attempted so the session is left ready for the next call.
pub async fn probe<C>(query: &str, channel: &mut C) -> Result<Describe, InferError>
where
    C: ProtocolChannel + ?Sized,
{
    let parse = Parse {
        query: query.to_string(),
        ..Parse::default()
    };
    let mut request = BytesMut::new();
    request.extend_from_slice(&encode(&PARSE, &parse)?);
    request.extend_from_slice(&encode(&DESCRIBE, &frontend::Describe::statement(""))?);
    request.extend_from_slice(&encode(&SYNC, &())?);

    let reply = match channel.send_and_receive(request.freeze()).await {
        Ok(reply) => reply,
        Err(err) => {
            resync(channel).await;
            return Err(err.into());
        }
    };

    let describe = read_describe(&reply)?;
    debug!(
        params = describe.params.len(),
        fields = describe.fields.len(),
        "statement described"
    );
    Ok(describe)
}

async fn resync<C>(channel: &mut C)
where
    C: ProtocolChannel + ?Sized,
{
    let sync = match encode(&SYNC, &()) {
        Ok(sync) => sync,
        Err(err) => {
            warn!("could not encode Sync: {}", err);
            return;
        }
    };
    if let Err(err) = channel.send_and_receive(sync).await {
        warn!("Sync after failed describe was not acknowledged: {}", err);
    }
}

/// Picks ParameterDescription and RowDescription out of the reply batch.
/// NoData (or no RowDescription at all) means the statement returns no rows.
fn read_describe(reply: &Bytes) -> Result<Describe, InferError> {
    let mut describe = Describe::default();
    for message in scan(&[&PARAMETER_DESCRIPTION, &ROW_DESCRIPTION], reply)? {
        match message {
            ParseResult::Payload {
                data, message_name, ..
            } => {
                if message_name == PARAMETER_DESCRIPTION.name {
                    describe.params = read_params(&data)?;
                } else {
                    describe.fields = read_fields(&data)?;
                }
            }
            ParseResult::ServerError(err) => return Err(InferError::Parse(parse_error(err))),
            ParseResult::Mismatch { .. } => {}
        }
    }
    Ok(describe)
}

fn read_params(data: &Record) -> Result<Vec<ParamDescriptor>, WireError> {
    data.array("dataTypes")?
        .iter()
        .map(|item| -> Result<_, WireError> {
            Ok(ParamDescriptor {
                oid: item.int32("oid")? as u32,
            })
        })
        .collect()
}

fn read_fields(data: &Record) -> Result<Vec<TypeField>, WireError> {
    data.array("fields")?
        .iter()
        .map(|item| -> Result<_, WireError> {
            Ok(TypeField {
                name: item.str("name")?.to_string(),
                table_oid: item.int32("tableOID")? as u32,
                column_attr_number: item.int16("columnAttrNumber")?,
                type_oid: item.int32("typeOID")? as u32,
                type_size: item.int16("typeSize")?,
                type_modifier: item.int32("typeModifier")?,
                format_code: item.int16("formatCode")?,
            })
        })
        .collect()
}

fn parse_error(err: ServerError) -> ParseError {
    ParseError {
        error_code: err.field('C').unwrap_or_default().to_string(),
        hint: err.field('H').map(str::to_string),
        position: err.field('P').map(str::to_string),
        message: err.message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::{
        error_response, no_data, parameter_description, ready, row_description, FakeSession,
    };
    use crate::db::SessionError;
    use crate::wire::backend::PARSE_COMPLETE;
    use crate::wire::decode;
    use crate::wire::frontend::{layout, DESCRIBE_LAYOUT, PARSE_LAYOUT};

    fn parse_complete() -> Bytes {
        PARSE_COMPLETE.encode(&Record::new()).unwrap()
    }

    #[tokio::test]
    async fn test_request_is_parse_describe_sync() {
        let mut session = FakeSession::replying(&[
            parse_complete(),
            parameter_description(&[]),
            no_data(),
            ready(),
        ]);
        probe("SELECT 1", &mut session).await.unwrap();

        assert_eq!(session.requests.len(), 1);
        let request = &session.requests[0];
        let parse = decode(&layout("Parse", Some(b'P'), PARSE_LAYOUT), request, 0).unwrap();
        let ParseResult::Payload { data, buffer_offset, .. } = parse else {
            panic!("expected Parse first");
        };
        assert_eq!(data.str("name").unwrap(), "");
        assert_eq!(data.str("query").unwrap(), "SELECT 1");
        assert!(data.array("dataTypes").unwrap().is_empty());

        let describe = decode(
            &layout("Describe", Some(b'D'), DESCRIBE_LAYOUT),
            request,
            buffer_offset,
        )
        .unwrap();
        let ParseResult::Payload { data, buffer_offset, .. } = describe else {
            panic!("expected Describe second");
        };
        assert_eq!(data.char("kind").unwrap(), b'S');
        assert_eq!(&request[buffer_offset..], &[b'S', 0, 0, 0, 4]);
    }

    #[tokio::test]
    async fn test_reads_params_and_fields() {
        let mut session = FakeSession::replying(&[
            parse_complete(),
            parameter_description(&[23]),
            row_description(&[("id", 16384, 1, 23), ("status", 16384, 3, 16000)]),
            ready(),
        ]);
        let describe = probe("SELECT id, status FROM orders WHERE id = $1", &mut session)
            .await
            .unwrap();
        assert_eq!(describe.params, vec![ParamDescriptor { oid: 23 }]);
        assert_eq!(describe.fields.len(), 2);
        assert_eq!(describe.fields[1].name, "status");
        assert_eq!(describe.fields[1].table_oid, 16384);
        assert_eq!(describe.fields[1].column_attr_number, 3);
        assert_eq!(describe.fields[1].type_oid, 16000);
    }

    #[tokio::test]
    async fn test_no_data_means_no_fields() {
        let mut session = FakeSession::replying(&[
            parse_complete(),
            parameter_description(&[25]),
            no_data(),
            ready(),
        ]);
        let describe = probe("DELETE FROM t WHERE name = $1", &mut session)
            .await
            .unwrap();
        assert_eq!(describe.params.len(), 1);
        assert!(describe.fields.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_becomes_parse_error() {
        let mut session = FakeSession::replying(&[
            error_response(&[
                ("S", "ERROR"),
                ("C", "42601"),
                ("M", "syntax error at or near \"FORM\""),
                ("P", "10"),
                ("H", "check the FROM clause"),
            ]),
            ready(),
        ]);
        let err = probe("SELECT 1 FORM t", &mut session).await.unwrap_err();
        let InferError::Parse(err) = err else {
            panic!("expected a parse error, got {err:?}");
        };
        assert_eq!(
            err,
            ParseError {
                error_code: "42601".into(),
                hint: Some("check the FROM clause".into()),
                message: "syntax error at or near \"FORM\"".into(),
                position: Some("10".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_exchange_sends_standalone_sync() {
        let mut session = FakeSession::replying(&[ready()]);
        session.failing_exchanges = 1;
        let err = probe("SELECT 1", &mut session).await.unwrap_err();
        assert!(matches!(err, InferError::Session(SessionError::Closed)));
        assert_eq!(session.requests.len(), 2);
        assert_eq!(&session.requests[1][..], &[b'S', 0, 0, 0, 4]);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_wire_error() {
        // RowDescription claiming one column but carrying none.
        let truncated_row_description = Bytes::from_static(&[b'T', 0, 0, 0, 6, 0, 1]);
        let mut session = FakeSession::replying(&[
            parameter_description(&[23]),
            truncated_row_description,
            ready(),
        ]);
        let err = probe("SELECT 1", &mut session).await.unwrap_err();
        assert!(matches!(err, InferError::Wire(WireError::Framing { .. })));
    }
}
