//! Client side of a TLS handshake, as far as it can go without public-key
//! cryptography: the ClientHello is sent and the server's reply is followed
//! until it asks for a key exchange, at which point the session fails with
//! `TlsError::CryptoMissing`.

use crate::log::TaggedLogger;
use crate::random::Xorshift32;

use super::error::TlsError;
use super::protocol::ipv4::Ipv4Address;
use super::protocol::tls::{
    handshake_types, write_client_hello, Record, Records, HANDSHAKE_CERTIFICATE,
    HANDSHAKE_SERVER_HELLO, HANDSHAKE_SERVER_HELLO_DONE, RANDOM_SIZE, RECORD_ALERT,
    RECORD_HANDSHAKE,
};

const LOGGER: TaggedLogger = TaggedLogger::new("TLS");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsState {
    Closed,
    Handshake,
    Connected,
    Error,
}

pub struct TlsSession {
    state: TlsState,
    remote_ip: Ipv4Address,
    remote_port: u16,
}

impl TlsSession {
    pub fn new(remote_ip: Ipv4Address, remote_port: u16) -> Self {
        Self {
            state: TlsState::Handshake,
            remote_ip,
            remote_port,
        }
    }

    pub fn state(&self) -> TlsState {
        self.state
    }

    /// Write a ClientHello for `host` into `buffer`. The client random is
    /// the low 32 bits of the clock followed by 28 bytes from the PRNG.
    pub fn create_client_hello(
        &self,
        host: &str,
        now_ms: u64,
        rng: &mut Xorshift32,
        buffer: &mut [u8],
    ) -> Result<usize, TlsError> {
        let mut random = [0u8; RANDOM_SIZE];
        random[..4].copy_from_slice(&(now_ms as u32).to_le_bytes());
        for chunk in random[4..].chunks_exact_mut(4) {
            chunk.copy_from_slice(&rng.next_u32().to_le_bytes());
        }
        write_client_hello(host, &random, buffer)
    }

    /// Feed bytes received from the server. Incomplete trailing records are
    /// ignored.
    pub fn handle_rx(&mut self, data: &[u8]) -> Result<(), TlsError> {
        for record in Records::new(data) {
            let (content_type, body) = match record {
                Record::Complete { content_type, body } => (content_type, body),
                Record::Fragment => return Ok(()),
            };
            match content_type {
                RECORD_HANDSHAKE => {
                    for kind in handshake_types(body) {
                        LOGGER.debug(format_args!(
                            "Handshake msg type: {} len: {}",
                            kind,
                            body.len()
                        ));
                        match kind {
                            HANDSHAKE_SERVER_HELLO => {
                                LOGGER.log(format_args!(
                                    "Server Hello received from {}:{}",
                                    self.remote_ip, self.remote_port
                                ));
                            }
                            HANDSHAKE_CERTIFICATE => {
                                LOGGER.log(format_args!("Certificate received"));
                            }
                            HANDSHAKE_SERVER_HELLO_DONE => {
                                LOGGER.log(format_args!("Server Hello Done"));
                                LOGGER.error(format_args!(
                                    "No RSA/ECC implementation to proceed with key exchange"
                                ));
                                self.state = TlsState::Error;
                                return Err(TlsError::CryptoMissing);
                            }
                            _ => (),
                        }
                    }
                }
                RECORD_ALERT => {
                    let (level, description) = match body {
                        [level, description, ..] => (*level, *description),
                        _ => return Err(TlsError::Malformed),
                    };
                    LOGGER.warn(format_args!("Alert: Level={} Desc={}", level, description));
                    self.state = TlsState::Error;
                    return Err(TlsError::Alert { level, description });
                }
                _ => (),
            }
        }
        Ok(())
    }
}
