//! DHCP client. `DhcpClient` is the negotiation state machine; it only
//! accepts replies that belong to its own transaction and arrive in the
//! order the protocol expects. `dhcp_discover` drives it over the primary
//! device and installs the resulting lease.

use alloc::vec::Vec;

use crate::executor::timeout;
use crate::log::TaggedLogger;

use super::error::{DhcpError, NetError};
use super::hardware::HardwareAddress;
use super::protocol::dhcp::{
    build_message, parse_message, DhcpMessageType, CLIENT_PORT, SERVER_PORT,
};
use super::protocol::ipv4::Ipv4Address;
use super::stack::NetEvent;
use super::{run, wait_for, NetHandle};

const LOGGER: TaggedLogger = TaggedLogger::new("DHCP");

pub const MAX_ATTEMPTS: usize = 10;
/// Time given to the server to answer each attempt
pub const ATTEMPT_TIMEOUT_MS: u64 = 1000;
const XID_MIX: u32 = 0xDEADBEEF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpState {
    Idle,
    /// DISCOVER sent, waiting for an OFFER
    Discovering,
    /// REQUEST sent, waiting for an ACK
    Requesting,
    Bound,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lease {
    pub ip: Ipv4Address,
    pub subnet: Ipv4Address,
    pub gateway: Ipv4Address,
    pub dns: Ipv4Address,
    pub server: Ipv4Address,
    /// Seconds, when the server supplied one
    pub lease_time: Option<u32>,
}

pub struct DhcpClient {
    mac: HardwareAddress,
    xid: u32,
    state: DhcpState,
    offered_ip: Ipv4Address,
    server_ip: Ipv4Address,
    lease: Option<Lease>,
}

impl DhcpClient {
    pub fn new(mac: HardwareAddress) -> Self {
        Self {
            mac,
            xid: 0,
            state: DhcpState::Idle,
            offered_ip: Ipv4Address::UNSPECIFIED,
            server_ip: Ipv4Address::UNSPECIFIED,
            lease: None,
        }
    }

    /// Begin a new transaction
    pub fn start(&mut self, xid: u32) {
        self.xid = xid;
        self.state = DhcpState::Discovering;
        self.offered_ip = Ipv4Address::UNSPECIFIED;
        self.server_ip = Ipv4Address::UNSPECIFIED;
        self.lease = None;
    }

    pub fn state(&self) -> DhcpState {
        self.state
    }

    pub fn xid(&self) -> u32 {
        self.xid
    }

    pub fn lease(&self) -> Option<Lease> {
        self.lease
    }

    /// The message to broadcast for the current state, if any
    pub fn outgoing(&self) -> Option<Vec<u8>> {
        match self.state {
            DhcpState::Discovering => {
                Some(build_message(self.mac, self.xid, DhcpMessageType::Discover, None))
            }
            DhcpState::Requesting => Some(build_message(
                self.mac,
                self.xid,
                DhcpMessageType::Request,
                Some((self.offered_ip, self.server_ip)),
            )),
            DhcpState::Idle | DhcpState::Bound => None,
        }
    }

    /// Process a datagram received on the client port. Replies not from the
    /// server port, with a foreign transaction ID, a bad cookie, or arriving
    /// in the wrong state are ignored.
    pub fn handle_reply(&mut self, src_ip: Ipv4Address, src_port: u16, data: &[u8]) {
        if src_port != SERVER_PORT {
            return;
        }
        let (packet, options) = match parse_message(data) {
            Some(parsed) => parsed,
            None => return,
        };
        if packet.xid != self.xid {
            LOGGER.debug(format_args!("Ignoring reply for transaction {:#x}", packet.xid));
            return;
        }

        match (options.message_type, self.state) {
            (Some(DhcpMessageType::Offer), DhcpState::Discovering) => {
                self.offered_ip = packet.yiaddr;
                self.server_ip = options.server_id.unwrap_or(src_ip);
                LOGGER.log(format_args!(
                    "Offer {} from {}",
                    self.offered_ip, self.server_ip
                ));
                self.state = DhcpState::Requesting;
            }
            (Some(DhcpMessageType::Ack), DhcpState::Requesting) => {
                let lease = Lease {
                    ip: packet.yiaddr,
                    subnet: options.subnet_mask.unwrap_or(Ipv4Address::UNSPECIFIED),
                    gateway: options.router.unwrap_or(src_ip),
                    dns: options.dns.unwrap_or(src_ip),
                    server: self.server_ip,
                    lease_time: options.lease_time,
                };
                self.lease = Some(lease);
                self.state = DhcpState::Bound;
            }
            (Some(DhcpMessageType::Nak), _) => {
                LOGGER.warn(format_args!("NAK from {}, restarting", src_ip));
                self.offered_ip = Ipv4Address::UNSPECIFIED;
                self.server_ip = Ipv4Address::UNSPECIFIED;
                self.state = DhcpState::Discovering;
            }
            _ => (),
        }
    }
}

/// Obtain a lease for the primary device and apply it
pub fn dhcp_discover(net: &NetHandle) -> Result<Lease, DhcpError> {
    run(net, discover(net.clone()))
}

pub async fn discover(net: NetHandle) -> Result<Lease, DhcpError> {
    let (mac, clock) = {
        let mut stack = net.lock();
        let mac = stack.primary_device().map(|device| device.mac);
        let mac = mac.ok_or(NetError::NoNetDevice)?;
        stack.udp_bind(CLIENT_PORT)?;
        (mac, stack.clock())
    };

    let mut client = DhcpClient::new(mac);
    client.start((clock.now_ms() as u32) ^ XID_MIX);
    LOGGER.log(format_args!("Sending DISCOVER, xid={:#x}", client.xid()));

    for _ in 0..MAX_ATTEMPTS {
        let message = match client.outgoing() {
            Some(message) => message,
            None => break,
        };
        let sent = net
            .lock()
            .udp_send(CLIENT_PORT, Ipv4Address::BROADCAST, SERVER_PORT, &message);
        if let Err(err) = sent {
            LOGGER.warn(format_args!("Send failed: {}", err));
        }

        let before = client.state();
        let client_ref = &mut client;
        let changed = wait_for(&net, NetEvent::UdpReceived(CLIENT_PORT), move |stack| {
            while let Some(datagram) = stack.udp_recv(CLIENT_PORT) {
                client_ref.handle_reply(datagram.src_ip, datagram.src_port, &datagram.payload);
            }
            (client_ref.state() != before).then_some(())
        });
        let _ = timeout(clock.clone(), ATTEMPT_TIMEOUT_MS, changed).await;

        if client.state() == DhcpState::Bound {
            break;
        }
    }

    let mut stack = net.lock();
    stack.udp_unbind(CLIENT_PORT);
    let lease = client.lease().ok_or(DhcpError::TimedOut)?;
    if let Some(device) = stack.primary_device_mut() {
        device.ip = lease.ip;
        device.subnet = lease.subnet;
        device.gateway = lease.gateway;
        device.dns_server = lease.dns;
        LOGGER.log(format_args!(
            "Bound {}: IP={} GW={} DNS={}",
            device.name, lease.ip, lease.gateway, lease.dns
        ));
    }
    Ok(lease)
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::{DhcpClient, DhcpState};
    use crate::net::hardware::HardwareAddress;
    use crate::net::protocol::dhcp::{
        DhcpPacket, MAGIC_COOKIE, OPTION_DNS, OPTION_END, OPTION_LEASE_TIME,
        OPTION_MESSAGE_TYPE, OPTION_ROUTER, OPTION_SERVER_ID, OPTION_SUBNET_MASK, SERVER_PORT,
    };
    use crate::net::protocol::{ipv4::Ipv4Address, packet::PacketHeader};

    const MAC: HardwareAddress = HardwareAddress([0x52, 0x54, 0, 0x12, 0x34, 0x56]);
    const SERVER: Ipv4Address = Ipv4Address([10, 0, 2, 2]);

    fn reply(xid: u32, message_type: u8, options: &[u8]) -> Vec<u8> {
        let mut packet = DhcpPacket::boot_request(MAC, xid);
        packet.op = DhcpPacket::REPLY_OP;
        packet.yiaddr = Ipv4Address([10, 0, 2, 15]);
        packet.magic = MAGIC_COOKIE;
        let mut data = packet.to_vec();
        data.extend_from_slice(&[OPTION_MESSAGE_TYPE, 1, message_type]);
        data.extend_from_slice(options);
        data.push(OPTION_END);
        data
    }

    #[test]
    fn offer_then_ack() {
        let mut client = DhcpClient::new(MAC);
        client.start(0x1234);
        assert!(client.outgoing().is_some());

        client.handle_reply(SERVER, SERVER_PORT, &reply(0x1234, 2, &[OPTION_SERVER_ID, 4, 10, 0, 2, 4]));
        assert_eq!(client.state(), DhcpState::Requesting);
        let request = client.outgoing().unwrap();
        let options = &request[DhcpPacket::SIZE..];
        assert_eq!(&options[..3], &[53, 1, 3]);
        assert_eq!(&options[3..9], &[50, 4, 10, 0, 2, 15]);
        assert_eq!(&options[9..15], &[54, 4, 10, 0, 2, 4]);

        let ack = reply(
            0x1234,
            5,
            &[
                OPTION_SUBNET_MASK, 4, 255, 255, 255, 0,
                OPTION_ROUTER, 4, 10, 0, 2, 1,
                OPTION_DNS, 4, 10, 0, 2, 3,
                OPTION_LEASE_TIME, 4, 0, 0, 0x0e, 0x10,
            ],
        );
        client.handle_reply(SERVER, SERVER_PORT, &ack);
        assert_eq!(client.state(), DhcpState::Bound);
        let lease = client.lease().unwrap();
        assert_eq!(lease.ip, Ipv4Address([10, 0, 2, 15]));
        assert_eq!(lease.subnet, Ipv4Address([255, 255, 255, 0]));
        assert_eq!(lease.gateway, Ipv4Address([10, 0, 2, 1]));
        assert_eq!(lease.dns, Ipv4Address([10, 0, 2, 3]));
        assert_eq!(lease.server, Ipv4Address([10, 0, 2, 4]));
        assert_eq!(lease.lease_time, Some(3600));
        assert!(client.outgoing().is_none());
    }

    #[test]
    fn router_and_dns_default_to_sender() {
        let mut client = DhcpClient::new(MAC);
        client.start(7);
        client.handle_reply(SERVER, SERVER_PORT, &reply(7, 2, &[]));
        client.handle_reply(SERVER, SERVER_PORT, &reply(7, 5, &[]));
        let lease = client.lease().unwrap();
        assert_eq!(lease.gateway, SERVER);
        assert_eq!(lease.dns, SERVER);
        assert_eq!(lease.server, SERVER);
    }

    #[test]
    fn foreign_transactions_ignored() {
        let mut client = DhcpClient::new(MAC);
        client.start(7);
        client.handle_reply(SERVER, SERVER_PORT, &reply(8, 2, &[]));
        assert_eq!(client.state(), DhcpState::Discovering);
        client.handle_reply(SERVER, 1067, &reply(7, 2, &[]));
        assert_eq!(client.state(), DhcpState::Discovering);

        let mut bad_cookie = reply(7, 2, &[]);
        bad_cookie[236] = 0;
        client.handle_reply(SERVER, SERVER_PORT, &bad_cookie);
        assert_eq!(client.state(), DhcpState::Discovering);
    }

    #[test]
    fn out_of_order_replies_ignored() {
        let mut client = DhcpClient::new(MAC);
        client.start(7);
        client.handle_reply(SERVER, SERVER_PORT, &reply(7, 5, &[]));
        assert_eq!(client.state(), DhcpState::Discovering);
        client.handle_reply(SERVER, SERVER_PORT, &reply(7, 2, &[]));
        client.handle_reply(SERVER, SERVER_PORT, &reply(7, 2, &[]));
        assert_eq!(client.state(), DhcpState::Requesting);
    }

    #[test]
    fn nak_restarts() {
        let mut client = DhcpClient::new(MAC);
        client.start(7);
        client.handle_reply(SERVER, SERVER_PORT, &reply(7, 2, &[]));
        client.handle_reply(SERVER, SERVER_PORT, &reply(7, 6, &[]));
        assert_eq!(client.state(), DhcpState::Discovering);
        assert!(client.lease().is_none());
    }
}
