//! TLS record framing and the ClientHello message. Only what is needed to
//! open a handshake and follow the server's first flight is encoded here.

use super::super::error::TlsError;

pub const RECORD_CHANGE_CIPHER_SPEC: u8 = 20;
pub const RECORD_ALERT: u8 = 21;
pub const RECORD_HANDSHAKE: u8 = 22;
pub const RECORD_APPLICATION_DATA: u8 = 23;

pub const HANDSHAKE_HELLO_REQUEST: u8 = 0;
pub const HANDSHAKE_CLIENT_HELLO: u8 = 1;
pub const HANDSHAKE_SERVER_HELLO: u8 = 2;
pub const HANDSHAKE_CERTIFICATE: u8 = 11;
pub const HANDSHAKE_SERVER_KEY_EXCHANGE: u8 = 12;
pub const HANDSHAKE_CERTIFICATE_REQUEST: u8 = 13;
pub const HANDSHAKE_SERVER_HELLO_DONE: u8 = 14;

/// Record layer version; TLS 1.0 for middlebox compatibility
pub const RECORD_VERSION: [u8; 2] = [0x03, 0x01];
/// Version offered inside the ClientHello; TLS 1.2
pub const CLIENT_VERSION: [u8; 2] = [0x03, 0x03];

/// TLS_RSA_WITH_AES_128_CBC_SHA, TLS_RSA_WITH_AES_256_CBC_SHA,
/// TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
pub const CIPHER_SUITES: [u16; 3] = [0x002f, 0x0035, 0xc013];

pub const RECORD_HEADER_SIZE: usize = 5;
pub const HANDSHAKE_HEADER_SIZE: usize = 4;
pub const RANDOM_SIZE: usize = 32;
/// Callers must provide at least this much room for a ClientHello
pub const MIN_HELLO_BUFFER: usize = 128;

const EXTENSION_SERVER_NAME: u16 = 0;
const NAME_TYPE_HOST: u8 = 0;

/// Size of a ClientHello for the given host name, record header included
pub fn client_hello_len(host: &str) -> usize {
    let body = 2 + RANDOM_SIZE + 1 + 2 + CIPHER_SUITES.len() * 2 + 2 + 2;
    let sni = if host.is_empty() { 0 } else { 2 + 2 + 2 + 1 + 2 + host.len() };
    RECORD_HEADER_SIZE + HANDSHAKE_HEADER_SIZE + body + sni
}

struct Writer<'a> {
    buffer: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn put(&mut self, bytes: &[u8]) {
        self.buffer[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn put_u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    fn put_u16(&mut self, value: u16) {
        self.put(&value.to_be_bytes());
    }

    /// Leave room for a length field and return where it starts
    fn reserve(&mut self, len: usize) -> usize {
        let at = self.pos;
        self.pos += len;
        at
    }

    fn fill_u16(&mut self, at: usize, value: usize) {
        self.buffer[at..at + 2].copy_from_slice(&(value as u16).to_be_bytes());
    }

    fn fill_u24(&mut self, at: usize, value: usize) {
        self.buffer[at] = (value >> 16) as u8;
        self.buffer[at + 1] = (value >> 8) as u8;
        self.buffer[at + 2] = value as u8;
    }
}

/// Write a complete ClientHello record into `buffer`, returning its length.
/// An SNI extension is included when `host` is not empty.
pub fn write_client_hello(
    host: &str,
    random: &[u8; RANDOM_SIZE],
    buffer: &mut [u8],
) -> Result<usize, TlsError> {
    let total = client_hello_len(host);
    if buffer.len() < MIN_HELLO_BUFFER || buffer.len() < total || host.len() > u16::MAX as usize {
        return Err(TlsError::BufferTooSmall);
    }
    let mut w = Writer { buffer, pos: 0 };

    w.put_u8(RECORD_HANDSHAKE);
    w.put(&RECORD_VERSION);
    let record_len_at = w.reserve(2);

    let handshake_start = w.pos;
    w.put_u8(HANDSHAKE_CLIENT_HELLO);
    let handshake_len_at = w.reserve(3);

    w.put(&CLIENT_VERSION);
    w.put(random);
    w.put_u8(0); // empty session id
    w.put_u16((CIPHER_SUITES.len() * 2) as u16);
    for suite in CIPHER_SUITES {
        w.put_u16(suite);
    }
    w.put(&[1, 0]); // null compression only

    let extensions_len_at = w.reserve(2);
    let extensions_start = w.pos;
    if !host.is_empty() {
        w.put_u16(EXTENSION_SERVER_NAME);
        w.put_u16((2 + 1 + 2 + host.len()) as u16);
        w.put_u16((1 + 2 + host.len()) as u16);
        w.put_u8(NAME_TYPE_HOST);
        w.put_u16(host.len() as u16);
        w.put(host.as_bytes());
    }
    let end = w.pos;

    w.fill_u16(extensions_len_at, end - extensions_start);
    w.fill_u24(handshake_len_at, end - handshake_start - HANDSHAKE_HEADER_SIZE);
    w.fill_u16(record_len_at, end - RECORD_HEADER_SIZE);
    Ok(end)
}

/// One record pulled out of a receive buffer
#[derive(Debug, PartialEq, Eq)]
pub enum Record<'a> {
    Complete { content_type: u8, body: &'a [u8] },
    /// The buffer ends partway through this record
    Fragment,
}

/// Iterates over the back-to-back records in a buffer
pub struct Records<'a> {
    data: &'a [u8],
}

impl<'a> Records<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < RECORD_HEADER_SIZE {
            return None;
        }
        let content_type = self.data[0];
        let length = u16::from_be_bytes([self.data[3], self.data[4]]) as usize;
        let rest = &self.data[RECORD_HEADER_SIZE..];
        if rest.len() < length {
            self.data = &[];
            return Some(Record::Fragment);
        }
        self.data = &rest[length..];
        Some(Record::Complete {
            content_type,
            body: &rest[..length],
        })
    }
}

/// Handshake message types carried in one handshake record body
pub fn handshake_types(mut body: &[u8]) -> impl Iterator<Item = u8> + '_ {
    core::iter::from_fn(move || {
        if body.len() < HANDSHAKE_HEADER_SIZE {
            return None;
        }
        let kind = body[0];
        let length = ((body[1] as usize) << 16) | ((body[2] as usize) << 8) | body[3] as usize;
        let rest = &body[HANDSHAKE_HEADER_SIZE..];
        body = rest.get(length..).unwrap_or(&[]);
        Some(kind)
    })
}
