//! Client-side TCP flows. A flow is created for each outbound connection and
//! registered with the stack under its `FlowKey`; the receive path hands it
//! every segment from the matching remote endpoint, and sends whatever
//! segments the flow produces in response.
//!
//! There is no retransmission queue or window management: the flow follows
//! the server's sequence numbers, acknowledges everything it sees, and
//! collects the payload into a single buffer.

use alloc::{string::String, vec::Vec};

use crate::log::TaggedLogger;
use crate::random::Xorshift32;

use super::protocol::{ipv4::Ipv4Address, tcp::TcpFlags};
use super::tls::{TlsSession, TlsState};

const LOGGER: TaggedLogger = TaggedLogger::new("TCP");

/// Upper bound on payload collected by one flow
pub const MAX_RECEIVE_SIZE: usize = 4 * 1024 * 1024;

/// Space reserved for the ClientHello sent after the handshake
const CLIENT_HELLO_BUFFER: usize = 512;

/// Identifies a flow from the local side: our port plus the remote endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FlowKey {
    pub local_port: u16,
    pub remote_ip: Ipv4Address,
    pub remote_port: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowState {
    Closed,
    /// SYN sent, waiting for SYN+ACK
    SynSent,
    Established,
    /// Connected, and the ClientHello has been sent
    TlsHandshake,
    /// We sent a FIN; data may still arrive
    FinWait,
}

/// An inbound segment, already stripped of its IP and TCP headers
pub struct TcpSegment<'a> {
    pub src_ip: Ipv4Address,
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: TcpFlags,
    pub seq: u32,
    pub ack: u32,
    pub payload: &'a [u8],
}

/// A segment the flow wants sent to its remote endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingSegment {
    pub seq: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    pub data: Vec<u8>,
}

impl OutgoingSegment {
    fn control(seq: u32, ack: u32, flags: TcpFlags) -> Self {
        Self {
            seq,
            ack,
            flags,
            data: Vec::new(),
        }
    }
}

pub struct TcpFlow {
    key: FlowKey,
    state: FlowState,
    /// Next sequence number we will send
    my_seq: u32,
    /// Next sequence number expected from the server
    server_seq: u32,
    /// Host name for SNI. Present only for TLS connections.
    tls_host: Option<String>,
    tls: Option<TlsSession>,
    received: Vec<u8>,
    complete: bool,
    reset: bool,
}

impl TcpFlow {
    pub fn connect(key: FlowKey, initial_seq: u32, tls_host: Option<&str>) -> Self {
        Self {
            key,
            state: FlowState::SynSent,
            my_seq: initial_seq,
            server_seq: 0,
            tls_host: tls_host.map(String::from),
            tls: None,
            received: Vec::new(),
            complete: false,
            reset: false,
        }
    }

    pub fn key(&self) -> FlowKey {
        self.key
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// True once a SYN+ACK has been seen and the flow has not closed
    pub fn is_connected(&self) -> bool {
        matches!(self.state, FlowState::Established | FlowState::TlsHandshake)
    }

    /// The server sent its FIN
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn was_reset(&self) -> bool {
        self.reset
    }

    pub fn tls_state(&self) -> TlsState {
        self.tls.as_ref().map_or(TlsState::Closed, |tls| tls.state())
    }

    pub fn received(&self) -> &[u8] {
        &self.received
    }

    pub fn take_received(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.received)
    }

    pub fn syn(&self) -> OutgoingSegment {
        OutgoingSegment::control(self.my_seq, 0, TcpFlags::SYN)
    }

    /// Queue application data for sending. There is no retransmission, so the
    /// sequence number advances immediately.
    pub fn send_data(&mut self, data: &[u8]) -> OutgoingSegment {
        let segment = OutgoingSegment {
            seq: self.my_seq,
            ack: self.server_seq,
            flags: TcpFlags::ACK | TcpFlags::PSH,
            data: Vec::from(data),
        };
        self.my_seq = self.my_seq.wrapping_add(data.len() as u32);
        segment
    }

    /// Start closing from our side. Returns `None` if there is nothing to
    /// close.
    pub fn close(&mut self) -> Option<OutgoingSegment> {
        if !self.is_connected() {
            return None;
        }
        let segment =
            OutgoingSegment::control(self.my_seq, self.server_seq, TcpFlags::FIN | TcpFlags::ACK);
        self.my_seq = self.my_seq.wrapping_add(1);
        self.state = FlowState::FinWait;
        Some(segment)
    }

    fn ack(&self) -> OutgoingSegment {
        OutgoingSegment::control(self.my_seq, self.server_seq, TcpFlags::ACK)
    }

    /// Advance the flow with a segment from the remote endpoint, returning
    /// the segments to send back.
    pub fn on_segment(
        &mut self,
        segment: &TcpSegment,
        now_ms: u64,
        rng: &mut Xorshift32,
    ) -> Vec<OutgoingSegment> {
        let mut replies = Vec::new();
        if segment.src_ip != self.key.remote_ip || segment.dst_port != self.key.local_port {
            return replies;
        }

        if segment.flags.contains(TcpFlags::RST) {
            LOGGER.warn(format_args!(
                "Connection to {}:{} reset",
                self.key.remote_ip, self.key.remote_port
            ));
            self.state = FlowState::Closed;
            self.reset = true;
            self.complete = true;
            return replies;
        }

        match self.state {
            FlowState::SynSent => {
                if segment.flags.contains(TcpFlags::SYN | TcpFlags::ACK) {
                    self.server_seq = segment.seq.wrapping_add(1);
                    self.my_seq = segment.ack;
                    replies.push(self.ack());
                    match self.tls_host.clone() {
                        Some(host) => {
                            self.state = FlowState::TlsHandshake;
                            if let Some(hello) = self.start_tls(&host, now_ms, rng) {
                                replies.push(hello);
                            }
                        }
                        None => self.state = FlowState::Established,
                    }
                }
            }
            FlowState::TlsHandshake => {
                if !segment.payload.is_empty() {
                    self.server_seq = segment.seq.wrapping_add(segment.payload.len() as u32);
                    if let Some(tls) = self.tls.as_mut() {
                        if let Err(err) = tls.handle_rx(segment.payload) {
                            LOGGER.warn(format_args!("{}", err));
                        }
                    }
                    replies.push(self.ack());
                }
            }
            FlowState::Established | FlowState::FinWait => {
                if !segment.payload.is_empty() {
                    if self.received.len() + segment.payload.len() < MAX_RECEIVE_SIZE {
                        self.received.extend_from_slice(segment.payload);
                    }
                    self.server_seq = segment.seq.wrapping_add(segment.payload.len() as u32);
                    replies.push(self.ack());
                }
                if segment.flags.contains(TcpFlags::FIN) {
                    self.server_seq = self.server_seq.wrapping_add(1);
                    replies.push(self.ack());
                    self.state = FlowState::Closed;
                    self.complete = true;
                }
            }
            FlowState::Closed => (),
        }
        replies
    }

    fn start_tls(&mut self, host: &str, now_ms: u64, rng: &mut Xorshift32) -> Option<OutgoingSegment> {
        LOGGER.log(format_args!("Connected. Starting TLS handshake with {}", host));
        let tls = TlsSession::new(self.key.remote_ip, self.key.remote_port);
        let mut buffer = [0u8; CLIENT_HELLO_BUFFER];
        let hello = tls.create_client_hello(host, now_ms, rng, &mut buffer);
        self.tls = Some(tls);
        match hello {
            Ok(len) => Some(self.send_data(&buffer[..len])),
            Err(err) => {
                LOGGER.error(format_args!("Could not build ClientHello: {}", err));
                None
            }
        }
    }
}
