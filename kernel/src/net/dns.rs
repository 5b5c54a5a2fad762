//! Name resolution over UDP. One A query is sent to the primary device's
//! name server, and the first usable answer wins.

use crate::executor::timeout;
use crate::log::TaggedLogger;
use crate::time::Deadline;

use super::error::{DnsError, NetError};
use super::protocol::dns::{build_query, parse_response, DNS_PORT};
use super::protocol::ipv4::Ipv4Address;
use super::stack::NetEvent;
use super::{run, send_resolving, wait_for, NetHandle};

const LOGGER: TaggedLogger = TaggedLogger::new("DNS");

pub const SOURCE_PORT: u16 = 55555;
pub const QUERY_ID: u16 = 0x00AB;
/// Used when the device has no configured name server
pub const FALLBACK_SERVER: Ipv4Address = Ipv4Address([8, 8, 8, 8]);
/// Time allowed for the server's MAC to resolve so the query can leave
pub const SEND_TIMEOUT_MS: u64 = 2000;
pub const RESPONSE_TIMEOUT_MS: u64 = 3000;

/// Resolve `name` to an address. Dotted quads are returned as-is.
pub fn dns_resolve(net: &NetHandle, name: &str) -> Result<Ipv4Address, DnsError> {
    if let Some(ip) = Ipv4Address::parse(name) {
        return Ok(ip);
    }
    run(net, resolve(net.clone(), name))
}

pub async fn resolve(net: NetHandle, name: &str) -> Result<Ipv4Address, DnsError> {
    if let Some(ip) = Ipv4Address::parse(name) {
        return Ok(ip);
    }
    let query = build_query(QUERY_ID, name)?;

    let server = {
        let mut stack = net.lock();
        let device = stack.primary_device().ok_or(NetError::NoNetDevice)?;
        let server = if device.dns_server.is_unspecified() {
            LOGGER.log(format_args!("No DNS server configured, using {}", FALLBACK_SERVER));
            FALLBACK_SERVER
        } else {
            device.dns_server
        };
        stack.udp_bind(SOURCE_PORT)?;
        server
    };

    let result = exchange(&net, name, server, &query).await;
    net.lock().udp_unbind(SOURCE_PORT);
    result
}

async fn exchange(
    net: &NetHandle,
    name: &str,
    server: Ipv4Address,
    query: &[u8],
) -> Result<Ipv4Address, DnsError> {
    LOGGER.debug(format_args!("Querying {} for {}", server, name));
    let clock = net.lock().clock();
    let send_deadline = Deadline::after(&*clock, SEND_TIMEOUT_MS);
    let sent = send_resolving(net, server, send_deadline, |stack| {
        stack.udp_send(SOURCE_PORT, server, DNS_PORT, query)
    })
    .await;
    match sent {
        Ok(()) => (),
        Err(NetError::TimedOut) => {
            LOGGER.warn(format_args!("Could not reach {}", server));
            return Err(DnsError::SendFailed);
        }
        Err(err) => return Err(err.into()),
    }

    // datagrams that do not parse are skipped; an answer from the server,
    // even a negative one, ends the wait
    let response = wait_for(net, NetEvent::UdpReceived(SOURCE_PORT), move |stack| {
        while let Some(datagram) = stack.udp_recv(SOURCE_PORT) {
            if datagram.src_ip != server || datagram.src_port != DNS_PORT {
                continue;
            }
            match parse_response(&datagram.payload) {
                Err(DnsError::Malformed) => continue,
                result => return Some(result),
            }
        }
        None
    });
    match timeout(clock, RESPONSE_TIMEOUT_MS, response).await {
        Ok(Ok(ip)) => {
            LOGGER.log(format_args!("{} is {}", name, ip));
            Ok(ip)
        }
        Ok(Err(err)) => Err(err),
        Err(_) => Err(DnsError::TimedOut),
    }
}
