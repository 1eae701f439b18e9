//! Sessions: the two capabilities inference needs from a connection, and a
//! tokio implementation speaking the wire protocol through [`crate::wire`].

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::auth::Authenticator;
use super::connection::ConnectionConfig;
use super::error::SessionError;
use crate::wire::backend::{
    AUTHENTICATION, BACKEND_KEY_DATA, COMMAND_COMPLETE, DATA_ROW, EMPTY_QUERY_RESPONSE,
    NOTICE_RESPONSE, PARAMETER_STATUS, READY_FOR_QUERY,
};
use crate::wire::frontend::{
    Bind, Execute, Parse, Query, Startup, BIND, EXECUTE, PARSE, QUERY, STARTUP, SYNC, TERMINATE,
};
use crate::wire::{decode_one_of, encode, scan, MessageDescriptor, ParseResult, WireError};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// One catalog row, in select-list order. Every column is text or NULL.
pub type CatalogRow = Vec<Option<String>>;

/// A bind parameter of a catalog query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogParam {
    OidArray(Vec<u32>),
    Int4Array(Vec<i32>),
}

impl CatalogParam {
    /// Type OID of the array (`oid[]` or `int4[]`).
    pub fn type_oid(&self) -> u32 {
        match self {
            CatalogParam::OidArray(_) => 1028,
            CatalogParam::Int4Array(_) => 1007,
        }
    }

    /// Text-format array literal, e.g. `{23,16000}`.
    pub fn to_text(&self) -> String {
        fn literal<T: ToString>(items: &[T]) -> String {
            let items: Vec<String> = items.iter().map(ToString::to_string).collect();
            format!("{{{}}}", items.join(","))
        }
        match self {
            CatalogParam::OidArray(items) => literal(items),
            CatalogParam::Int4Array(items) => literal(items),
        }
    }
}

/// Raw protocol exchange.
pub trait ProtocolChannel {
    /// Writes `request` and returns every reply frame up to and including
    /// ReadyForQuery, back to back in one buffer.
    fn send_and_receive(
        &mut self,
        request: Bytes,
    ) -> impl Future<Output = Result<Bytes, SessionError>> + Send;
}

/// Row-returning catalog queries with positional parameters.
pub trait CatalogQuery {
    fn query(
        &mut self,
        sql: &str,
        params: &[CatalogParam],
    ) -> impl Future<Output = Result<Vec<CatalogRow>, SessionError>> + Send;
}

/// Everything an inference call needs from its connection.
pub trait Session: ProtocolChannel + CatalogQuery {}

impl<T: ProtocolChannel + CatalogQuery + ?Sized> Session for T {}

const STARTUP_REPLIES: &[&MessageDescriptor] = &[
    &AUTHENTICATION,
    &PARAMETER_STATUS,
    &BACKEND_KEY_DATA,
    &NOTICE_RESPONSE,
    &READY_FOR_QUERY,
];

/// A protocol session over any byte stream (a TCP socket in practice).
pub struct WireSession<S = TcpStream> {
    stream: S,
    buffer: BytesMut,
    server_parameters: HashMap<String, String>,
    backend_key: Option<(i32, i32)>,
}

impl WireSession<TcpStream> {
    /// Opens a TCP connection and completes startup and authentication.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, SessionError> {
        info!("connecting to {}", config.display_string());
        let stream = tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| SessionError::Timeout(CONNECT_TIMEOUT))??;
        stream.set_nodelay(true)?;

        tokio::time::timeout(CONNECT_TIMEOUT, Self::startup(stream, config))
            .await
            .map_err(|_| SessionError::Timeout(CONNECT_TIMEOUT))?
    }
}

impl<S> WireSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Sends the startup packet on an already-open stream and answers the
    /// server until it reports ReadyForQuery.
    pub async fn startup(stream: S, config: &ConnectionConfig) -> Result<Self, SessionError> {
        let mut session = Self {
            stream,
            buffer: BytesMut::with_capacity(8192),
            server_parameters: HashMap::new(),
            backend_key: None,
        };

        let mut parameters = BTreeMap::new();
        parameters.insert("user".to_string(), config.username.clone());
        parameters.insert("database".to_string(), config.database.clone());
        parameters.insert("client_encoding".to_string(), "UTF8".to_string());
        if !config.application_name.is_empty() {
            parameters.insert(
                "application_name".to_string(),
                config.application_name.clone(),
            );
        }
        session
            .write(encode(&STARTUP, &Startup { parameters })?)
            .await?;

        let mut authenticator = Authenticator::new(&config.username, &config.password);
        loop {
            let frame = session.read_frame().await?;
            match decode_one_of(STARTUP_REPLIES, &frame, 0)? {
                ParseResult::Payload {
                    data, message_name, ..
                } => match message_name {
                    name if name == AUTHENTICATION.name => {
                        if let Some(reply) = authenticator.respond(&data)? {
                            session.write(reply).await?;
                        }
                    }
                    name if name == PARAMETER_STATUS.name => {
                        session
                            .server_parameters
                            .insert(data.str("name")?.to_string(), data.str("value")?.to_string());
                    }
                    name if name == BACKEND_KEY_DATA.name => {
                        session.backend_key =
                            Some((data.int32("processId")?, data.int32("secretKey")?));
                    }
                    name if name == NOTICE_RESPONSE.name => {
                        debug!(notice = ?data.dict("fields")?, "notice during startup");
                    }
                    _ => break,
                },
                ParseResult::Mismatch { message_name, .. } => {
                    return Err(SessionError::Unexpected {
                        expected: "startup reply",
                        found: format!("{:?} (indicator {:?})", message_name, char::from(frame[0])),
                    });
                }
                ParseResult::ServerError(err) => return Err(SessionError::Server(err)),
            }
        }

        info!(
            server_version = session.server_parameter("server_version").unwrap_or("unknown"),
            "session ready"
        );
        Ok(session)
    }

    pub fn server_parameter(&self, name: &str) -> Option<&str> {
        self.server_parameters.get(name).map(String::as_str)
    }

    /// Process id and secret key announced in BackendKeyData.
    pub fn backend_key(&self) -> Option<(i32, i32)> {
        self.backend_key
    }

    /// Runs `sql` through the simple query protocol, discarding any rows.
    /// Multiple statements are allowed.
    pub async fn execute(&mut self, sql: &str) -> Result<(), SessionError> {
        let request = encode(
            &QUERY,
            &Query {
                query: sql.to_string(),
            },
        )?;
        let reply = self.send_and_receive(request).await?;
        for message in scan(&[&COMMAND_COMPLETE, &EMPTY_QUERY_RESPONSE], &reply)? {
            match message {
                ParseResult::ServerError(err) => return Err(SessionError::Server(err)),
                ParseResult::Payload { data, .. } => {
                    if let Ok(tag) = data.str("tag") {
                        debug!(tag, "statement executed");
                    }
                }
                ParseResult::Mismatch { .. } => {}
            }
        }
        Ok(())
    }

    /// Sends Terminate and drops the connection.
    pub async fn close(mut self) -> Result<(), SessionError> {
        self.write(encode(&TERMINATE, &())?).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn write(&mut self, bytes: Bytes) -> Result<(), SessionError> {
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Reads exactly one backend frame (indicator, length, body).
    async fn read_frame(&mut self) -> Result<Bytes, SessionError> {
        loop {
            if self.buffer.len() >= 5 {
                let b = &self.buffer;
                let length = u32::from_be_bytes([b[1], b[2], b[3], b[4]]) as usize;
                if length < 4 {
                    return Err(WireError::Framing {
                        message: "frame",
                        cursor: 5,
                        end: 1 + length,
                    }
                    .into());
                }
                if self.buffer.len() >= 1 + length {
                    return Ok(self.buffer.split_to(1 + length).freeze());
                }
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(SessionError::Closed);
            }
        }
    }
}

impl<S> ProtocolChannel for WireSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_and_receive(&mut self, request: Bytes) -> Result<Bytes, SessionError> {
        self.write(request).await?;
        let mut reply = BytesMut::new();
        loop {
            let frame = self.read_frame().await?;
            reply.extend_from_slice(&frame);
            if frame[0] == READY_FOR_QUERY.indicator.unwrap_or(b'Z') {
                return Ok(reply.freeze());
            }
        }
    }
}

impl<S> CatalogQuery for WireSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Parse, Bind, Execute and Sync in one round trip on the unnamed
    /// statement and portal. Parameters and results use text format.
    async fn query(
        &mut self,
        sql: &str,
        params: &[CatalogParam],
    ) -> Result<Vec<CatalogRow>, SessionError> {
        let parse = Parse {
            query: sql.to_string(),
            param_types: params.iter().map(CatalogParam::type_oid).collect(),
            ..Parse::default()
        };
        let bind = Bind {
            params: params
                .iter()
                .map(|p| Some(Bytes::from(p.to_text())))
                .collect(),
            ..Bind::default()
        };

        let mut request = BytesMut::new();
        request.extend_from_slice(&encode(&PARSE, &parse)?);
        request.extend_from_slice(&encode(&BIND, &bind)?);
        request.extend_from_slice(&encode(&EXECUTE, &Execute::default())?);
        request.extend_from_slice(&encode(&SYNC, &())?);

        let reply = self.send_and_receive(request.freeze()).await?;
        let mut rows = Vec::new();
        for message in scan(&[&DATA_ROW], &reply)? {
            match message {
                ParseResult::Payload { data, .. } => {
                    let row = data
                        .array("columns")?
                        .iter()
                        .map(|column| match column.bytes("value")? {
                            Some(value) => String::from_utf8(value.to_vec())
                                .map(Some)
                                .map_err(|_| WireError::InvalidUtf8 { field: "value" }),
                            None => Ok(None),
                        })
                        .collect::<Result<CatalogRow, WireError>>()?;
                    rows.push(row);
                }
                ParseResult::ServerError(err) => return Err(SessionError::Server(err)),
                ParseResult::Mismatch { .. } => {}
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::backend::{ERROR_RESPONSE, PARSE_COMPLETE, BIND_COMPLETE};
    use crate::wire::frontend::{layout, BIND_LAYOUT, PARSE_LAYOUT, STARTUP_LAYOUT};
    use crate::wire::{decode, FieldValue, Record};
    use tokio::io::{duplex, DuplexStream};

    fn frame(descriptor: &MessageDescriptor, record: Record) -> Bytes {
        descriptor.encode(&record).unwrap()
    }

    fn ready() -> Bytes {
        frame(&READY_FOR_QUERY, Record::new().with("status", FieldValue::Char(b'I')))
    }

    /// Authentication request without a payload (ok, cleartext).
    fn auth(code: i32) -> Bytes {
        frame(
            &AUTHENTICATION,
            Record::new()
                .with("code", FieldValue::Int32(code))
                .with("data", FieldValue::Bytes(Bytes::new())),
        )
    }

    fn parameter_status(name: &str, value: &str) -> Bytes {
        frame(
            &PARAMETER_STATUS,
            Record::new()
                .with("name", FieldValue::Str(name.into()))
                .with("value", FieldValue::Str(value.into())),
        )
    }

    fn data_row(values: &[Option<&str>]) -> Bytes {
        let columns = values
            .iter()
            .map(|v| {
                let value = match v {
                    Some(s) => FieldValue::Bytes(Bytes::copy_from_slice(s.as_bytes())),
                    None => FieldValue::Null,
                };
                Record::new().with("value", value)
            })
            .collect();
        frame(&DATA_ROW, Record::new().with("columns", FieldValue::Array(columns)))
    }

    fn command_complete(tag: &str) -> Bytes {
        frame(&COMMAND_COMPLETE, Record::new().with("tag", FieldValue::Str(tag.into())))
    }

    fn error(code: &str, message: &str) -> Bytes {
        let mut fields = BTreeMap::new();
        fields.insert("S".to_string(), "ERROR".to_string());
        fields.insert("C".to_string(), code.to_string());
        fields.insert("M".to_string(), message.to_string());
        frame(&ERROR_RESPONSE, Record::new().with("fields", FieldValue::Dict(fields)))
    }

    fn concat(frames: &[Bytes]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.iter().copied()).collect()
    }

    /// Reads one client message; the startup packet has no indicator.
    async fn read_client_message(server: &mut DuplexStream, tagged: bool) -> Vec<u8> {
        let mut head = vec![0u8; if tagged { 5 } else { 4 }];
        server.read_exact(&mut head).await.unwrap();
        let at = head.len() - 4;
        let length = u32::from_be_bytes([head[at], head[at + 1], head[at + 2], head[at + 3]]);
        let mut body = vec![0u8; length as usize - 4];
        server.read_exact(&mut body).await.unwrap();
        head.extend_from_slice(&body);
        head
    }

    async fn connected() -> (WireSession<DuplexStream>, DuplexStream) {
        let (client, mut server) = duplex(64 * 1024);
        let config = ConnectionConfig::default();
        let handshake = tokio::spawn(async move {
            let startup = read_client_message(&mut server, false).await;
            server
                .write_all(&concat(&[
                    auth(0),
                    parameter_status("server_version", "16.2"),
                    ready(),
                ]))
                .await
                .unwrap();
            (startup, server)
        });
        let session = WireSession::startup(client, &config).await.unwrap();
        let (_, server) = handshake.await.unwrap();
        (session, server)
    }

    // --- startup ---

    #[test]
    fn test_bodiless_authentication_frame() {
        let buf = auth(0);
        assert_eq!(&buf[..], &[b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
        let ParseResult::Payload { data, .. } = decode(&AUTHENTICATION, &buf, 0).unwrap() else {
            panic!("expected a payload");
        };
        assert_eq!(data.int32("code").unwrap(), 0);
        assert_eq!(data.bytes("data").unwrap(), None);
    }

    #[tokio::test]
    async fn test_startup_sends_parameters() {
        let (client, mut server) = duplex(64 * 1024);
        let config = ConnectionConfig {
            username: "app".into(),
            database: "orders".into(),
            ..ConnectionConfig::default()
        };
        let server_task = tokio::spawn(async move {
            let startup = read_client_message(&mut server, false).await;
            server
                .write_all(&concat(&[
                    auth(0),
                    parameter_status("server_version", "16.2"),
                    ready(),
                ]))
                .await
                .unwrap();
            startup
        });

        let session = WireSession::startup(client, &config).await.unwrap();
        let startup = server_task.await.unwrap();

        let descriptor = layout("StartupMessage", None, STARTUP_LAYOUT);
        let ParseResult::Payload { data, .. } = decode(&descriptor, &startup, 0).unwrap() else {
            panic!("expected a startup packet");
        };
        let parameters = data.dict("parameters").unwrap();
        assert_eq!(parameters.get("user").map(String::as_str), Some("app"));
        assert_eq!(parameters.get("database").map(String::as_str), Some("orders"));
        assert_eq!(parameters.get("client_encoding").map(String::as_str), Some("UTF8"));
        assert_eq!(session.server_parameter("server_version"), Some("16.2"));
    }

    #[tokio::test]
    async fn test_startup_cleartext_password() {
        let (client, mut server) = duplex(64 * 1024);
        let config = ConnectionConfig {
            password: "secret".into(),
            ..ConnectionConfig::default()
        };
        let server_task = tokio::spawn(async move {
            read_client_message(&mut server, false).await;
            server.write_all(&auth(3)).await.unwrap();
            let password = read_client_message(&mut server, true).await;
            server.write_all(&concat(&[auth(0), ready()])).await.unwrap();
            password
        });

        WireSession::startup(client, &config).await.unwrap();
        let password = server_task.await.unwrap();
        assert_eq!(password[0], b'p');
        assert_eq!(&password[5..], b"secret\0");
    }

    #[tokio::test]
    async fn test_startup_server_error() {
        let (client, mut server) = duplex(64 * 1024);
        tokio::spawn(async move {
            read_client_message(&mut server, false).await;
            server
                .write_all(&error("3D000", "database \"nope\" does not exist"))
                .await
                .unwrap();
            server
        });
        let err = WireSession::startup(client, &ConnectionConfig::default())
            .await
            .err()
            .unwrap();
        let SessionError::Server(err) = err else {
            panic!("expected a server error, got {err:?}");
        };
        assert_eq!(err.field('C'), Some("3D000"));
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let (client, server) = duplex(1024);
        drop(server);
        let err = WireSession::startup(client, &ConnectionConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Closed | SessionError::Io(_)));
    }

    // --- exchange ---

    #[tokio::test]
    async fn test_send_and_receive_stops_at_ready_for_query() {
        let (mut session, mut server) = connected().await;
        let reply_frames = concat(&[frame(&PARSE_COMPLETE, Record::new()), ready()]);
        let expected = reply_frames.clone();
        let server_task = tokio::spawn(async move {
            let sync = read_client_message(&mut server, true).await;
            // Split the reply to exercise partial reads.
            let (first, rest) = reply_frames.split_at(3);
            server.write_all(first).await.unwrap();
            server.write_all(rest).await.unwrap();
            sync
        });

        let reply = session
            .send_and_receive(encode(&SYNC, &()).unwrap())
            .await
            .unwrap();
        assert_eq!(&reply[..], &expected[..]);
        assert_eq!(server_task.await.unwrap(), vec![b'S', 0, 0, 0, 4]);
    }

    #[tokio::test]
    async fn test_query_binds_array_params_and_collects_rows() {
        let (mut session, mut server) = connected().await;
        let server_task = tokio::spawn(async move {
            let parse = read_client_message(&mut server, true).await;
            let bind = read_client_message(&mut server, true).await;
            read_client_message(&mut server, true).await;
            read_client_message(&mut server, true).await;
            server
                .write_all(&concat(&[
                    frame(&PARSE_COMPLETE, Record::new()),
                    frame(&BIND_COMPLETE, Record::new()),
                    data_row(&[Some("23"), Some("int4")]),
                    data_row(&[Some("16000"), None]),
                    command_complete("SELECT 2"),
                    ready(),
                ]))
                .await
                .unwrap();
            (parse, bind)
        });

        let rows = session
            .query(
                "SELECT oid::text, typname::text FROM pg_type WHERE oid = ANY($1::oid[])",
                &[CatalogParam::OidArray(vec![23, 16000])],
            )
            .await
            .unwrap();
        assert_eq!(
            rows,
            vec![
                vec![Some("23".to_string()), Some("int4".to_string())],
                vec![Some("16000".to_string()), None],
            ]
        );

        let (parse, bind) = server_task.await.unwrap();
        let ParseResult::Payload { data, .. } =
            decode(&layout("Parse", Some(b'P'), PARSE_LAYOUT), &parse, 0).unwrap()
        else {
            panic!("expected Parse");
        };
        assert_eq!(data.array("dataTypes").unwrap()[0].int32("oid").unwrap(), 1028);
        let ParseResult::Payload { data, .. } =
            decode(&layout("Bind", Some(b'B'), BIND_LAYOUT), &bind, 0).unwrap()
        else {
            panic!("expected Bind");
        };
        let value = data.array("parameters").unwrap()[0].bytes("value").unwrap().cloned();
        assert_eq!(value, Some(Bytes::from_static(b"{23,16000}")));
    }

    #[tokio::test]
    async fn test_query_server_error() {
        let (mut session, mut server) = connected().await;
        tokio::spawn(async move {
            for _ in 0..4 {
                read_client_message(&mut server, true).await;
            }
            server
                .write_all(&concat(&[error("42P01", "relation does not exist"), ready()]))
                .await
                .unwrap();
            server
        });
        let err = session.query("SELECT * FROM nope", &[]).await.unwrap_err();
        assert!(matches!(err, SessionError::Server(_)));
    }

    #[tokio::test]
    async fn test_execute_simple_query() {
        let (mut session, mut server) = connected().await;
        let server_task = tokio::spawn(async move {
            let query = read_client_message(&mut server, true).await;
            server
                .write_all(&concat(&[command_complete("CREATE TYPE"), ready()]))
                .await
                .unwrap();
            query
        });
        session
            .execute("CREATE TYPE mood AS ENUM ('sad', 'ok', 'happy')")
            .await
            .unwrap();
        let query = server_task.await.unwrap();
        assert_eq!(query[0], b'Q');
        assert!(query.ends_with(b"'happy')\0"));
    }

    // --- params ---

    #[test]
    fn test_catalog_param_text() {
        assert_eq!(CatalogParam::OidArray(vec![23, 16000]).to_text(), "{23,16000}");
        assert_eq!(CatalogParam::Int4Array(vec![1, -2]).to_text(), "{1,-2}");
        assert_eq!(CatalogParam::Int4Array(vec![]).to_text(), "{}");
        assert_eq!(CatalogParam::OidArray(vec![]).type_oid(), 1028);
        assert_eq!(CatalogParam::Int4Array(vec![]).type_oid(), 1007);
    }
}
