use bytes::Bytes;
use postgres_protocol::authentication::md5_hash;
use postgres_protocol::authentication::sasl::{ChannelBinding, ScramSha256, SCRAM_SHA_256};
use tracing::debug;

use super::error::SessionError;
use crate::wire::backend::auth_code;
use crate::wire::frontend::{
    Password, SaslInitialResponse, SaslResponse, PASSWORD, SASL_INITIAL_RESPONSE, SASL_RESPONSE,
};
use crate::wire::{encode, Record};

/// Answers the server's Authentication requests during startup.
pub(crate) struct Authenticator<'a> {
    user: &'a str,
    password: &'a str,
    scram: Option<ScramSha256>,
}

impl<'a> Authenticator<'a> {
    pub(crate) fn new(user: &'a str, password: &'a str) -> Self {
        Self {
            user,
            password,
            scram: None,
        }
    }

    /// Returns the message to send back, or `None` when the request needs no reply.
    pub(crate) fn respond(&mut self, request: &Record) -> Result<Option<Bytes>, SessionError> {
        let code = request.int32("code")?;
        let data = request.bytes("data")?.cloned().unwrap_or_default();

        match code {
            auth_code::OK => {
                debug!("authentication accepted");
                Ok(None)
            }
            auth_code::CLEARTEXT_PASSWORD => {
                let password = self.require_password()?.to_string();
                Ok(Some(encode(&PASSWORD, &Password { password })?))
            }
            auth_code::MD5_PASSWORD => {
                let &[a, b, c, d] = &data[..] else {
                    return Err(SessionError::Auth(format!(
                        "MD5 salt must be 4 bytes, got {}",
                        data.len()
                    )));
                };
                let password = md5_hash(
                    self.user.as_bytes(),
                    self.require_password()?.as_bytes(),
                    [a, b, c, d],
                );
                Ok(Some(encode(&PASSWORD, &Password { password })?))
            }
            auth_code::SASL => {
                let mechanisms: Vec<&[u8]> =
                    data.split(|&b| b == 0).filter(|m| !m.is_empty()).collect();
                if !mechanisms.iter().any(|m| *m == SCRAM_SHA_256.as_bytes()) {
                    let offered: Vec<String> = mechanisms
                        .iter()
                        .map(|m| String::from_utf8_lossy(m).into_owned())
                        .collect();
                    return Err(SessionError::Auth(format!(
                        "server requires unsupported SASL mechanisms: {:?}",
                        offered
                    )));
                }
                let scram = ScramSha256::new(
                    self.require_password()?.as_bytes(),
                    ChannelBinding::unsupported(),
                );
                let message = SaslInitialResponse {
                    mechanism: SCRAM_SHA_256.to_string(),
                    data: Bytes::copy_from_slice(scram.message()),
                };
                self.scram = Some(scram);
                Ok(Some(encode(&SASL_INITIAL_RESPONSE, &message)?))
            }
            auth_code::SASL_CONTINUE => {
                let scram = self.scram_in_progress()?;
                scram
                    .update(&data)
                    .map_err(|e| SessionError::Auth(e.to_string()))?;
                let message = SaslResponse {
                    data: Bytes::copy_from_slice(scram.message()),
                };
                Ok(Some(encode(&SASL_RESPONSE, &message)?))
            }
            auth_code::SASL_FINAL => {
                let mut scram = self.scram.take().ok_or_else(no_exchange)?;
                scram
                    .finish(&data)
                    .map_err(|e| SessionError::Auth(e.to_string()))?;
                Ok(None)
            }
            other => Err(SessionError::Auth(format!(
                "unsupported authentication method (code {})",
                other
            ))),
        }
    }

    fn require_password(&self) -> Result<&'a str, SessionError> {
        if self.password.is_empty() {
            return Err(SessionError::Auth(format!(
                "server requested a password for user {:?} but none was given",
                self.user
            )));
        }
        Ok(self.password)
    }

    fn scram_in_progress(&mut self) -> Result<&mut ScramSha256, SessionError> {
        self.scram.as_mut().ok_or_else(no_exchange)
    }
}

fn no_exchange() -> SessionError {
    SessionError::Auth("SASL message received before the exchange started".to_string())
}
