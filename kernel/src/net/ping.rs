use crate::executor::timeout_at;
use crate::log::TaggedLogger;
use crate::time::Deadline;

use super::error::NetError;
use super::protocol::ipv4::Ipv4Address;
use super::stack::NetEvent;
use super::{run, send_resolving, wait_for, NetHandle};

const LOGGER: TaggedLogger = TaggedLogger::new("PING");

pub const ECHO_IDENTIFIER: u16 = 1;
pub const ECHO_SEQUENCE: u16 = 1;
pub const PAYLOAD_SIZE: usize = 32;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const MAX_TIMEOUT_SECS: u64 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PingReply {
    pub from: Ipv4Address,
    pub sequence: u16,
    /// Measured from the first send attempt, so ARP resolution is included
    pub rtt_ms: u64,
}

/// Send one echo request and wait for its reply. The timeout is clamped to
/// between 1 and 60 seconds.
pub fn ping(net: &NetHandle, dest: Ipv4Address, timeout_secs: u64) -> Result<PingReply, NetError> {
    run(net, echo(net.clone(), dest, timeout_secs))
}

pub async fn echo(net: NetHandle, dest: Ipv4Address, timeout_secs: u64) -> Result<PingReply, NetError> {
    let timeout_ms = timeout_secs.clamp(1, MAX_TIMEOUT_SECS) * 1000;
    let clock = net.lock().clock();
    let start = clock.now_ms();
    let deadline = Deadline::after(&*clock, timeout_ms);

    let mut payload = [0u8; PAYLOAD_SIZE];
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte = i as u8;
    }

    LOGGER.log(format_args!("Pinging {}...", dest));
    send_resolving(&net, dest, deadline, |stack| {
        stack.icmp_send_echo(dest, ECHO_IDENTIFIER, ECHO_SEQUENCE, &payload)
    })
    .await?;

    let reply = wait_for(&net, NetEvent::IcmpEcho(ECHO_IDENTIFIER), |stack| {
        stack.take_echo_reply(ECHO_IDENTIFIER)
    });
    match timeout_at(clock, deadline, reply).await {
        Ok(reply) => {
            let rtt_ms = reply.received_at_ms.saturating_sub(start);
            LOGGER.log(format_args!(
                "Reply from {}: icmp_seq={} time={} ms",
                reply.from,
                reply.sequence,
                rtt_ms
            ));
            Ok(PingReply {
                from: reply.from,
                sequence: reply.sequence,
                rtt_ms,
            })
        }
        Err(_) => {
            LOGGER.log(format_args!("Request timed out."));
            Err(NetError::TimedOut)
        }
    }
}
