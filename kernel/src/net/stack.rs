//! The network stack context. `NetStack` owns every piece of protocol state:
//! devices, the ARP cache, bound UDP ports, TCP flows and ICMP echo replies.
//! Inbound frames are pulled from the device drivers by `poll`, unwrapped
//! layer by layer, and handed to whichever socket or flow is interested.
//! Anything waiting on that traffic is woken through the `WakerRegistry`.

use alloc::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    vec::Vec,
};

use crate::executor::WakerRegistry;
use crate::log::TaggedLogger;
use crate::random::Xorshift32;
use crate::time::Clock;

use super::arp::ArpCache;
use super::device::NetDevice;
use super::error::NetError;
use super::hardware::HardwareAddress;
use super::protocol::{
    arp::ArpPacket,
    checksum::is_valid,
    ethernet::EthernetFrameHeader,
    icmp::{echo_reply_for, IcmpEchoHeader},
    ipv4::{IpProtocolType, Ipv4Address, Ipv4Header},
    packet::PacketHeader,
    tcp::{self, TcpFlags, TcpHeader},
    udp,
};
use super::tcp::{FlowKey, OutgoingSegment, TcpFlow, TcpSegment};

const LOGGER: TaggedLogger = TaggedLogger::new("NET");

/// Datagrams held per bound port before new arrivals are dropped
pub const UDP_QUEUE_LIMIT: usize = 32;

pub type NetHandle = Arc<spin::Mutex<NetStack>>;

/// Things a future can wait on. Each is notified from the receive path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NetEvent {
    /// A mapping for this IP entered the ARP cache
    ArpResolved(Ipv4Address),
    /// A datagram was queued on this local port
    UdpReceived(u16),
    /// A segment was delivered to this flow
    TcpSegment(FlowKey),
    /// An echo reply with this identifier arrived
    IcmpEcho(u16),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub src_ip: Ipv4Address,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EchoReply {
    pub from: Ipv4Address,
    pub identifier: u16,
    pub sequence: u16,
    pub received_at_ms: u64,
}

pub struct NetStack {
    devices: Vec<NetDevice>,
    arp: ArpCache,
    udp_sockets: BTreeMap<u16, VecDeque<Datagram>>,
    tcp_flows: BTreeMap<FlowKey, TcpFlow>,
    echo_replies: BTreeMap<u16, EchoReply>,
    rng: Xorshift32,
    clock: Arc<dyn Clock>,
    wakers: WakerRegistry<NetEvent>,
}

impl NetStack {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            devices: Vec::new(),
            arp: ArpCache::new(),
            udp_sockets: BTreeMap::new(),
            tcp_flows: BTreeMap::new(),
            echo_replies: BTreeMap::new(),
            rng: Xorshift32::default(),
            clock,
            wakers: WakerRegistry::new(),
        }
    }

    pub fn into_handle(self) -> NetHandle {
        Arc::new(spin::Mutex::new(self))
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn wakers(&self) -> WakerRegistry<NetEvent> {
        self.wakers.clone()
    }

    pub fn rng(&mut self) -> &mut Xorshift32 {
        &mut self.rng
    }

    /// Add a device, returning its index. The first device registered
    /// becomes the primary device that all traffic leaves through.
    pub fn register_device(&mut self, device: NetDevice) -> usize {
        LOGGER.log(format_args!("Registered {} ({})", device.name, device.mac));
        self.devices.push(device);
        if self.devices.len() == 1 {
            LOGGER.log(format_args!("Primary device set to {}", self.devices[0].name));
        }
        self.devices.len() - 1
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn primary_device(&self) -> Option<&NetDevice> {
        self.devices.first()
    }

    pub fn primary_device_mut(&mut self) -> Option<&mut NetDevice> {
        self.devices.first_mut()
    }

    pub fn arp_cache(&self) -> &ArpCache {
        &self.arp
    }

    /// The host a packet to `dest` is physically addressed to
    pub fn next_hop(&self, dest: Ipv4Address) -> Result<Ipv4Address, NetError> {
        let device = self.primary_device().ok_or(NetError::NoNetDevice)?;
        Ok(device.next_hop(dest))
    }

    /// Wrap `payload` in an Ethernet header and send it through device `dev`
    pub fn eth_send(
        &mut self,
        dev: usize,
        dest_mac: HardwareAddress,
        ethertype: u16,
        payload: &[u8],
    ) -> Result<(), NetError> {
        let device = self.devices.get_mut(dev).ok_or(NetError::NoNetDevice)?;
        let frame = EthernetFrameHeader::new(device.mac, dest_mac, ethertype).build_frame(payload);
        device.send_frame(&frame)
    }

    /// Drain every device's receive queue, dispatching each frame. Returns
    /// the number of frames processed.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;
        for dev in 0..self.devices.len() {
            while let Some(frame) = self.devices[dev].receive_frame() {
                self.handle_frame(dev, &frame);
                handled += 1;
            }
        }
        handled
    }

    pub fn handle_frame(&mut self, dev: usize, frame: &[u8]) {
        let header = match EthernetFrameHeader::try_from_u8_buffer(frame) {
            Some(header) => header,
            None => {
                LOGGER.debug(format_args!("Runt frame ({} bytes)", frame.len()));
                return;
            }
        };
        let payload = &frame[EthernetFrameHeader::SIZE..];
        match header.get_ethertype() {
            EthernetFrameHeader::ETHERTYPE_ARP => self.handle_arp(dev, payload),
            EthernetFrameHeader::ETHERTYPE_IP => self.handle_ipv4(dev, payload),
            _ => (),
        }
    }

    // ARP

    fn handle_arp(&mut self, dev: usize, payload: &[u8]) {
        let packet = match ArpPacket::try_from_u8_buffer(payload) {
            Some(packet) => packet,
            None => return,
        };
        let sender_ip = packet.source_protocol_addr;
        let sender_mac = packet.source_hardware_addr;
        if !sender_ip.is_unspecified() {
            self.arp.update(sender_ip, sender_mac);
            self.wakers.notify_event(&NetEvent::ArpResolved(sender_ip));
        }

        if !packet.is_request() {
            return;
        }
        let (own_mac, own_ip) = match self.devices.get(dev) {
            Some(device) => (device.mac, device.ip),
            None => return,
        };
        if own_ip.is_unspecified() || packet.dest_protocol_addr != own_ip {
            return;
        }
        if let Some(reply) = ArpPacket::respond_to(&packet, own_mac, own_ip) {
            LOGGER.debug(format_args!("Answering ARP request from {}", sender_ip));
            if let Err(err) = self.eth_send(dev, sender_mac, EthernetFrameHeader::ETHERTYPE_ARP, &reply.to_vec()) {
                LOGGER.warn(format_args!("ARP reply failed: {}", err));
            }
        }
    }

    fn arp_send_request(&mut self, lookup: Ipv4Address) -> Result<(), NetError> {
        let device = self.primary_device().ok_or(NetError::NoNetDevice)?;
        let request = ArpPacket::request(device.mac, device.ip, lookup);
        self.eth_send(0, HardwareAddress::BROADCAST, EthernetFrameHeader::ETHERTYPE_ARP, &request.to_vec())
    }

    // IPv4

    /// Send an IP packet through the primary device. If the next hop's MAC
    /// is not cached yet, a single ARP request goes out instead and the call
    /// fails with `ArpMiss`; the caller retries once the cache is filled.
    pub fn ipv4_send(
        &mut self,
        dest: Ipv4Address,
        protocol: IpProtocolType,
        payload: &[u8],
    ) -> Result<(), NetError> {
        if payload.len() > Ipv4Header::MAX_PAYLOAD {
            return Err(NetError::PayloadTooLarge);
        }
        let device = self.primary_device().ok_or(NetError::NoNetDevice)?;
        let source = device.ip;
        let dest_mac = if dest.is_broadcast() {
            HardwareAddress::BROADCAST
        } else {
            let hop = device.next_hop(dest);
            match self.arp.lookup(hop) {
                Some(mac) => mac,
                None => {
                    LOGGER.debug(format_args!("ARP miss for {}", hop));
                    self.arp_send_request(hop)?;
                    return Err(NetError::ArpMiss);
                }
            }
        };

        let header = Ipv4Header::new(source, dest, payload.len() as u16, Ipv4Header::DEFAULT_TTL, protocol);
        let mut packet = header.to_vec();
        packet.extend_from_slice(payload);
        self.eth_send(0, dest_mac, EthernetFrameHeader::ETHERTYPE_IP, &packet)
    }

    fn handle_ipv4(&mut self, dev: usize, payload: &[u8]) {
        let header = match Ipv4Header::try_from_u8_buffer(payload) {
            Some(header) => header,
            None => return,
        };
        let header_len = header.header_len();
        let total_len = header.total_length as usize;
        if total_len < header_len || total_len > payload.len() {
            LOGGER.debug(format_args!("Bad IPv4 length {} from {}", total_len, header.source));
            return;
        }
        if !is_valid(&payload[..header_len]) {
            LOGGER.debug(format_args!("Bad IPv4 checksum from {}", header.source));
            return;
        }
        // frames are padded to the Ethernet minimum; trust the IP length
        let content = &payload[header_len..total_len];
        match header.protocol_type() {
            Some(IpProtocolType::Icmp) => self.handle_icmp(dev, &header, content),
            Some(IpProtocolType::Udp) => self.handle_udp(&header, content),
            Some(IpProtocolType::Tcp) => self.handle_tcp(&header, content),
            None => (),
        }
    }

    // ICMP

    /// Send an echo request with the given identifiers. Any earlier reply
    /// recorded for `identifier` is discarded.
    pub fn icmp_send_echo(
        &mut self,
        dest: Ipv4Address,
        identifier: u16,
        sequence: u16,
        data: &[u8],
    ) -> Result<(), NetError> {
        self.echo_replies.remove(&identifier);
        let message = IcmpEchoHeader::request(identifier, sequence).create_message(data);
        self.ipv4_send(dest, IpProtocolType::Icmp, &message)
    }

    pub fn take_echo_reply(&mut self, identifier: u16) -> Option<EchoReply> {
        self.echo_replies.remove(&identifier)
    }

    fn handle_icmp(&mut self, dev: usize, ip: &Ipv4Header, content: &[u8]) {
        let header = match IcmpEchoHeader::try_from_u8_buffer(content) {
            Some(header) => header,
            None => return,
        };
        if header.is_echo_request() {
            let own_ip = self.devices.get(dev).map(|device| device.ip);
            if own_ip != Some(ip.dest) || ip.dest.is_unspecified() {
                return;
            }
            if let Some(reply) = echo_reply_for(content) {
                LOGGER.debug(format_args!("Echo request from {}", ip.source));
                if let Err(err) = self.ipv4_send(ip.source, IpProtocolType::Icmp, &reply) {
                    LOGGER.debug(format_args!("Echo reply to {} not sent: {}", ip.source, err));
                }
            }
        } else if header.is_echo_reply() {
            LOGGER.log(format_args!(
                "Reply from {}: seq={}",
                ip.source, header.sequence
            ));
            let reply = EchoReply {
                from: ip.source,
                identifier: header.identifier,
                sequence: header.sequence,
                received_at_ms: self.clock.now_ms(),
            };
            self.echo_replies.insert(header.identifier, reply);
            self.wakers.notify_event(&NetEvent::IcmpEcho(header.identifier));
        }
    }

    // UDP

    pub fn udp_send(
        &mut self,
        src_port: u16,
        dest: Ipv4Address,
        dest_port: u16,
        payload: &[u8],
    ) -> Result<(), NetError> {
        let source = self.primary_device().ok_or(NetError::NoNetDevice)?.ip;
        let segment = udp::create_segment(source, src_port, dest, dest_port, payload)?;
        self.ipv4_send(dest, IpProtocolType::Udp, &segment)
    }

    pub fn udp_bind(&mut self, port: u16) -> Result<(), NetError> {
        if self.udp_sockets.contains_key(&port) {
            return Err(NetError::PortAlreadyInUse);
        }
        self.udp_sockets.insert(port, VecDeque::new());
        Ok(())
    }

    pub fn udp_unbind(&mut self, port: u16) {
        self.udp_sockets.remove(&port);
    }

    pub fn udp_recv(&mut self, port: u16) -> Option<Datagram> {
        self.udp_sockets.get_mut(&port)?.pop_front()
    }

    fn handle_udp(&mut self, ip: &Ipv4Header, content: &[u8]) {
        let (header, data) = match udp::parse_segment(content) {
            Some(parsed) => parsed,
            None => return,
        };
        let queue = match self.udp_sockets.get_mut(&header.dest_port) {
            Some(queue) => queue,
            None => {
                LOGGER.debug(format_args!("UDP to unbound port {} dropped", header.dest_port));
                return;
            }
        };
        if queue.len() >= UDP_QUEUE_LIMIT {
            LOGGER.debug(format_args!("UDP queue for port {} full", header.dest_port));
            return;
        }
        queue.push_back(Datagram {
            src_ip: ip.source,
            src_port: header.source_port,
            dst_port: header.dest_port,
            payload: Vec::from(data),
        });
        self.wakers.notify_event(&NetEvent::UdpReceived(header.dest_port));
    }

    // TCP

    #[allow(clippy::too_many_arguments)]
    pub fn tcp_send_packet(
        &mut self,
        dest: Ipv4Address,
        src_port: u16,
        dest_port: u16,
        seq: u32,
        ack: u32,
        flags: TcpFlags,
        data: &[u8],
    ) -> Result<(), NetError> {
        let source = self.primary_device().ok_or(NetError::NoNetDevice)?.ip;
        let header = TcpHeader::new(src_port, dest_port, seq, ack, flags);
        let segment = tcp::create_segment(source, dest, &header, data)?;
        self.ipv4_send(dest, IpProtocolType::Tcp, &segment)
    }

    pub fn tcp_register(&mut self, flow: TcpFlow) -> Result<(), NetError> {
        let key = flow.key();
        if self.tcp_flows.contains_key(&key) {
            return Err(NetError::PortAlreadyInUse);
        }
        self.tcp_flows.insert(key, flow);
        Ok(())
    }

    pub fn tcp_flow(&self, key: &FlowKey) -> Option<&TcpFlow> {
        self.tcp_flows.get(key)
    }

    pub fn tcp_flow_mut(&mut self, key: &FlowKey) -> Option<&mut TcpFlow> {
        self.tcp_flows.get_mut(key)
    }

    pub fn tcp_remove(&mut self, key: &FlowKey) -> Option<TcpFlow> {
        self.tcp_flows.remove(key)
    }

    /// Send a segment produced by a registered flow
    pub fn tcp_send_segment(&mut self, key: &FlowKey, segment: &OutgoingSegment) -> Result<(), NetError> {
        if !self.tcp_flows.contains_key(key) {
            return Err(NetError::NoSuchFlow);
        }
        self.tcp_send_packet(
            key.remote_ip,
            key.local_port,
            key.remote_port,
            segment.seq,
            segment.ack,
            segment.flags,
            &segment.data,
        )
    }

    fn handle_tcp(&mut self, ip: &Ipv4Header, content: &[u8]) {
        let (header, payload) = match tcp::parse_segment(content) {
            Some(parsed) => parsed,
            None => return,
        };
        let key = FlowKey {
            local_port: header.dest_port,
            remote_ip: ip.source,
            remote_port: header.source_port,
        };
        let segment = TcpSegment {
            src_ip: ip.source,
            src_port: header.source_port,
            dst_port: header.dest_port,
            flags: header.flags,
            seq: header.sequence_number,
            ack: header.ack_number,
            payload,
        };
        let now = self.clock.now_ms();
        let replies = match self.tcp_flows.get_mut(&key) {
            Some(flow) => flow.on_segment(&segment, now, &mut self.rng),
            None => {
                LOGGER.debug(format_args!(
                    "TCP segment for unknown flow {}:{} -> {}",
                    ip.source, header.source_port, header.dest_port
                ));
                return;
            }
        };
        for reply in replies {
            if let Err(err) = self.tcp_send_segment(&key, &reply) {
                LOGGER.debug(format_args!("TCP reply not sent: {}", err));
            }
        }
        self.wakers.notify_event(&NetEvent::TcpSegment(key));
    }
}
