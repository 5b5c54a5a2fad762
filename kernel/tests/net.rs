mod common;

use std::sync::{Arc, Mutex};

use chrysalis_kernel::net::device::NetDevice;
use chrysalis_kernel::net::dhcp::dhcp_discover;
use chrysalis_kernel::net::dns::{dns_resolve, SOURCE_PORT};
use chrysalis_kernel::net::error::{DhcpError, DnsError, HttpError, NetError};
use chrysalis_kernel::net::http::fetch;
use chrysalis_kernel::net::ping::ping;
use chrysalis_kernel::net::protocol::dhcp::{
    parse_message, DhcpMessageType, DhcpPacket, CLIENT_PORT, MAGIC_COOKIE, OPTION_DNS, OPTION_END,
    OPTION_LEASE_TIME, OPTION_MESSAGE_TYPE, OPTION_ROUTER, OPTION_SERVER_ID, OPTION_SUBNET_MASK,
    SERVER_PORT,
};
use chrysalis_kernel::net::protocol::dns::DNS_PORT;
use chrysalis_kernel::net::protocol::ethernet::EthernetFrameHeader;
use chrysalis_kernel::net::protocol::icmp::echo_reply_for;
use chrysalis_kernel::net::protocol::ipv4::{IpProtocolType, Ipv4Address};
use chrysalis_kernel::net::protocol::packet::PacketHeader;
use chrysalis_kernel::net::protocol::tcp::{self, TcpFlags, TcpHeader};
use chrysalis_kernel::net::protocol::udp;
use chrysalis_kernel::net::stack::NetStack;
use chrysalis_kernel::net::tls::TlsState;
use chrysalis_kernel::net::NetHandle;

use common::{
    arp_reply, configured_device, ethertype, ipv4_frame, parse_arp, parse_ipv4, MockNic,
    Responder, StepClock, Wire, DNS_IP, GATEWAY_IP, LOCAL_IP, LOCAL_MAC, NETMASK,
};

const EXAMPLE_IP: Ipv4Address = Ipv4Address([93, 184, 216, 34]);

fn stack_with(device: NetDevice) -> NetHandle {
    let mut stack = NetStack::new(StepClock::new());
    stack.register_device(device);
    stack.into_handle()
}

fn configured(responder: Responder) -> (NetHandle, Arc<Mutex<Wire>>) {
    let (nic, wire) = MockNic::new(responder);
    (stack_with(configured_device(nic)), wire)
}

fn udp_frame(
    src: (Ipv4Address, u16),
    dst: (Ipv4Address, u16),
    payload: &[u8],
) -> Vec<u8> {
    let segment = udp::create_segment(src.0, src.1, dst.0, dst.1, payload).unwrap();
    ipv4_frame(src.0, dst.0, IpProtocolType::Udp, &segment)
}

/// Source port and payload of a UDP frame sent to `port`
fn udp_to(frame: &[u8], port: u16) -> Option<(u16, Vec<u8>)> {
    let (ip, payload) = parse_ipv4(frame)?;
    if ip.protocol_type()? != IpProtocolType::Udp {
        return None;
    }
    let (header, data) = udp::parse_segment(&payload)?;
    (header.dest_port == port).then(|| (header.source_port, data.to_vec()))
}

// DNS

fn dns_answer(query: &[u8], address: Ipv4Address) -> Vec<u8> {
    let mut response = query.to_vec();
    response[2] = 0x81;
    response[3] = 0x80;
    response[7] = 1;
    response.extend_from_slice(&[0xc0, 0x0c, 0, 1, 0, 1, 0, 0, 0x0e, 0x10, 0, 4]);
    response.extend_from_slice(&address.0);
    response
}

fn name_server(answer: fn(&[u8]) -> Vec<u8>) -> Responder {
    Box::new(move |frame: &[u8]| {
        if let Some(reply) = arp_reply(frame) {
            return vec![reply];
        }
        match udp_to(frame, DNS_PORT) {
            Some((port, query)) => vec![udp_frame((DNS_IP, DNS_PORT), (LOCAL_IP, port), &answer(&query))],
            None => Vec::new(),
        }
    })
}

#[test]
fn resolves_through_the_name_server() {
    let (net, wire) = configured(name_server(|query| dns_answer(query, EXAMPLE_IP)));
    assert_eq!(dns_resolve(&net, "example.com"), Ok(EXAMPLE_IP));

    let wire = wire.lock().unwrap();
    // an ARP request for the server, then the query itself
    let request = parse_arp(&wire.sent[0]).unwrap();
    assert_eq!(request.dest_protocol_addr, DNS_IP);
    let (port, query) = udp_to(&wire.sent[1], DNS_PORT).unwrap();
    assert_eq!(port, SOURCE_PORT);
    assert_eq!(&query[12..25], b"\x07example\x03com\x00");
    assert_eq!(wire.sent.len(), 2);

    assert_eq!(net.lock().arp_cache().len(), 1);
}

#[test]
fn negative_answer_ends_the_wait() {
    let (net, _wire) = configured(name_server(|query| {
        let mut response = query.to_vec();
        response[2] = 0x81;
        response[3] = 0x83;
        response
    }));
    assert_eq!(dns_resolve(&net, "nowhere.invalid"), Err(DnsError::NoAnswer));
    // the source port is released again
    assert!(net.lock().udp_bind(SOURCE_PORT).is_ok());
}

#[test]
fn unanswered_query_times_out() {
    let (net, _wire) = configured(Box::new(|frame: &[u8]| arp_reply(frame).into_iter().collect()));
    assert_eq!(dns_resolve(&net, "example.com"), Err(DnsError::TimedOut));
}

// ARP

#[test]
fn arp_miss_sends_one_request() {
    let (nic, wire) = MockNic::silent();
    let net = stack_with(configured_device(nic));

    let result = net
        .lock()
        .udp_send(40000, EXAMPLE_IP, 7, b"hello");
    assert_eq!(result, Err(NetError::ArpMiss));

    let wire = wire.lock().unwrap();
    assert_eq!(wire.sent.len(), 1);
    let frame = &wire.sent[0];
    assert_eq!(&frame[..6], &[0xff; 6]);
    assert_eq!(ethertype(frame), Some(EthernetFrameHeader::ETHERTYPE_ARP));
    let request = parse_arp(frame).unwrap();
    // off-subnet traffic resolves the gateway
    assert_eq!(request.dest_protocol_addr, GATEWAY_IP);
    assert_eq!(request.source_protocol_addr, LOCAL_IP);
    assert_eq!(request.source_hardware_addr, LOCAL_MAC);
}

#[test]
fn answers_arp_for_own_address() {
    let (nic, wire) = MockNic::silent();
    let net = stack_with(configured_device(nic));
    let request = chrysalis_kernel::net::protocol::arp::ArpPacket::request(
        common::PEER_MAC,
        GATEWAY_IP,
        LOCAL_IP,
    );
    let frame = EthernetFrameHeader::broadcast_arp(common::PEER_MAC).build_frame(&request.to_vec());
    wire.lock().unwrap().inbound.push_back(frame);
    net.lock().poll();

    let wire = wire.lock().unwrap();
    let reply = parse_arp(&wire.sent[0]).unwrap();
    assert!(reply.is_reply());
    assert_eq!(reply.source_hardware_addr, LOCAL_MAC);
    assert_eq!(reply.source_protocol_addr, LOCAL_IP);
    assert_eq!(net.lock().arp_cache().lookup(GATEWAY_IP), Some(common::PEER_MAC));
}

// DHCP

const SERVER_IP: Ipv4Address = Ipv4Address([10, 0, 2, 2]);

fn dhcp_reply(xid: u32, kind: DhcpMessageType, yiaddr: Ipv4Address, options: &[u8]) -> Vec<u8> {
    let mut packet = DhcpPacket::boot_request(LOCAL_MAC, xid);
    packet.op = DhcpPacket::REPLY_OP;
    packet.yiaddr = yiaddr;
    packet.magic = MAGIC_COOKIE;
    let mut data = packet.to_vec();
    data.extend_from_slice(&[OPTION_MESSAGE_TYPE, 1, kind as u8]);
    data.extend_from_slice(&[OPTION_SERVER_ID, 4]);
    data.extend_from_slice(&SERVER_IP.0);
    data.extend_from_slice(options);
    data.push(OPTION_END);
    udp_frame(
        (SERVER_IP, SERVER_PORT),
        (Ipv4Address::BROADCAST, CLIENT_PORT),
        &data,
    )
}

fn dhcp_server(seen: Arc<Mutex<Vec<(DhcpMessageType, Vec<u8>)>>>) -> Responder {
    Box::new(move |frame: &[u8]| {
        let Some((_, message)) = udp_to(frame, SERVER_PORT) else {
            return Vec::new();
        };
        let Some((packet, options)) = parse_message(&message) else {
            return Vec::new();
        };
        let Some(kind) = options.message_type else {
            return Vec::new();
        };
        seen.lock().unwrap().push((kind, message.clone()));
        match kind {
            DhcpMessageType::Discover => vec![
                // an offer for somebody else's transaction comes first
                dhcp_reply(packet.xid ^ 1, DhcpMessageType::Offer, Ipv4Address([10, 0, 2, 99]), &[]),
                dhcp_reply(packet.xid, DhcpMessageType::Offer, LOCAL_IP, &[]),
            ],
            DhcpMessageType::Request => {
                let mut options = vec![OPTION_SUBNET_MASK, 4];
                options.extend_from_slice(&NETMASK.0);
                options.extend_from_slice(&[OPTION_ROUTER, 4]);
                options.extend_from_slice(&GATEWAY_IP.0);
                options.extend_from_slice(&[OPTION_DNS, 4]);
                options.extend_from_slice(&DNS_IP.0);
                options.extend_from_slice(&[OPTION_LEASE_TIME, 4, 0, 0, 0x0e, 0x10]);
                vec![
                    dhcp_reply(packet.xid ^ 1, DhcpMessageType::Nak, Ipv4Address::UNSPECIFIED, &[]),
                    dhcp_reply(packet.xid, DhcpMessageType::Ack, LOCAL_IP, &options),
                ]
            }
            _ => Vec::new(),
        }
    })
}

#[test]
fn full_lease() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (nic, wire) = MockNic::new(dhcp_server(seen.clone()));
    let net = stack_with(NetDevice::new("eth0", LOCAL_MAC, Box::new(nic)));

    let lease = dhcp_discover(&net).unwrap();
    assert_eq!(lease.ip, LOCAL_IP);
    assert_eq!(lease.subnet, NETMASK);
    assert_eq!(lease.gateway, GATEWAY_IP);
    assert_eq!(lease.dns, DNS_IP);
    assert_eq!(lease.server, SERVER_IP);
    assert_eq!(lease.lease_time, Some(3600));

    {
        let stack = net.lock();
        let device = stack.primary_device().unwrap();
        assert_eq!(device.ip, LOCAL_IP);
        assert_eq!(device.gateway, GATEWAY_IP);
        assert_eq!(device.dns_server, DNS_IP);
    }

    let seen = seen.lock().unwrap();
    let kinds: Vec<DhcpMessageType> = seen.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(kinds, [DhcpMessageType::Discover, DhcpMessageType::Request]);
    let request = &seen[1].1;
    let options = &request[DhcpPacket::SIZE..];
    assert_eq!(&options[3..9], &[50, 4, 10, 0, 2, 15]);
    assert_eq!(&options[9..15], &[54, 4, 10, 0, 2, 2]);

    // DISCOVER and REQUEST are broadcast from 0.0.0.0
    let wire = wire.lock().unwrap();
    for frame in &wire.sent {
        assert_eq!(&frame[..6], &[0xff; 6]);
        let (ip, _) = parse_ipv4(frame).unwrap();
        assert_eq!(ip.source, Ipv4Address::UNSPECIFIED);
        assert_eq!(ip.dest, Ipv4Address::BROADCAST);
    }
}

#[test]
fn silent_server_exhausts_attempts() {
    let (nic, wire) = MockNic::silent();
    let net = stack_with(NetDevice::new("eth0", LOCAL_MAC, Box::new(nic)));
    assert_eq!(dhcp_discover(&net), Err(DhcpError::TimedOut));
    assert_eq!(wire.lock().unwrap().sent.len(), 10);
    assert!(net.lock().primary_device().unwrap().ip.is_unspecified());
}

// ICMP

#[test]
fn ping_the_gateway() {
    let (net, _wire) = configured(Box::new(|frame: &[u8]| {
        if let Some(reply) = arp_reply(frame) {
            return vec![reply];
        }
        let Some((ip, payload)) = parse_ipv4(frame) else {
            return Vec::new();
        };
        match echo_reply_for(&payload) {
            Some(reply) => vec![ipv4_frame(ip.dest, ip.source, IpProtocolType::Icmp, &reply)],
            None => Vec::new(),
        }
    }));

    let reply = ping(&net, GATEWAY_IP, 1).unwrap();
    assert_eq!(reply.from, GATEWAY_IP);
    assert_eq!(reply.sequence, 1);
    assert!(reply.rtt_ms > 0);
}

#[test]
fn ping_without_reply() {
    let (net, _wire) = configured(Box::new(|frame: &[u8]| arp_reply(frame).into_iter().collect()));
    assert_eq!(ping(&net, GATEWAY_IP, 1), Err(NetError::TimedOut));
}

// TCP and HTTP

const SERVER_ISN: u32 = 7000;
const PAGE: &[u8] = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nhello from the gateway";

fn tcp_frame(to: &TcpHeader, flags: TcpFlags, seq: u32, ack: u32, data: &[u8]) -> Vec<u8> {
    let header = TcpHeader::new(to.dest_port, to.source_port, seq, ack, flags);
    let segment = tcp::create_segment(GATEWAY_IP, LOCAL_IP, &header, data).unwrap();
    ipv4_frame(GATEWAY_IP, LOCAL_IP, IpProtocolType::Tcp, &segment)
}

/// A server on the gateway that answers the SYN, and answers the first
/// data segment with `reply` followed by FIN
fn web_server(
    reply: &'static [u8],
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
) -> Responder {
    Box::new(move |frame: &[u8]| {
        if let Some(answer) = arp_reply(frame) {
            return vec![answer];
        }
        let Some((ip, payload)) = parse_ipv4(frame) else {
            return Vec::new();
        };
        if ip.protocol_type() != Some(IpProtocolType::Tcp) {
            return Vec::new();
        }
        let Some((header, data)) = tcp::parse_segment(&payload) else {
            return Vec::new();
        };
        if header.flags.contains(TcpFlags::SYN) {
            let ack = header.sequence_number.wrapping_add(1);
            return vec![tcp_frame(&header, TcpFlags::SYN | TcpFlags::ACK, SERVER_ISN, ack, &[])];
        }
        if data.is_empty() {
            return Vec::new();
        }
        requests.lock().unwrap().push(data.to_vec());
        let ack = header.sequence_number.wrapping_add(data.len() as u32);
        vec![tcp_frame(
            &header,
            TcpFlags::ACK | TcpFlags::PSH | TcpFlags::FIN,
            SERVER_ISN + 1,
            ack,
            reply,
        )]
    })
}

fn tcp_segments(wire: &Wire) -> Vec<(TcpHeader, Vec<u8>)> {
    wire.sent
        .iter()
        .filter_map(|frame| {
            let (_, payload) = parse_ipv4(frame)?;
            let (header, data) = tcp::parse_segment(&payload)?;
            Some((header, data.to_vec()))
        })
        .collect()
}

#[test]
fn http_fetch() {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let (net, wire) = configured(web_server(PAGE, requests.clone()));

    let response = fetch(&net, "http://10.0.2.2/hello.txt").unwrap();
    assert_eq!(response.status_code(), Some(200));
    assert_eq!(response.body(), b"hello from the gateway");

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with(b"GET /hello.txt HTTP/1.0\r\nHost: 10.0.2.2\r\n"));

    let wire = wire.lock().unwrap();
    let segments = tcp_segments(&wire);
    let (syn, _) = &segments[0];
    assert_eq!(syn.flags, TcpFlags::SYN);
    assert_eq!(syn.dest_port, 80);
    assert!((40000..50000).contains(&syn.source_port));

    // handshake ACK, then the request
    let (handshake_ack, _) = &segments[1];
    assert_eq!(handshake_ack.flags, TcpFlags::ACK);
    assert_eq!(handshake_ack.ack_number, SERVER_ISN + 1);
    assert_eq!(handshake_ack.sequence_number, syn.sequence_number.wrapping_add(1));
    let (request, data) = &segments[2];
    assert_eq!(request.flags, TcpFlags::ACK | TcpFlags::PSH);
    assert_eq!(data, &requests[0]);

    // the server's data and FIN are both acknowledged
    let (last, _) = segments.last().unwrap();
    assert_eq!(last.ack_number, SERVER_ISN + 1 + PAGE.len() as u32 + 1);
    assert!(net.lock().tcp_flow(&chrysalis_kernel::net::tcp::FlowKey {
        local_port: syn.source_port,
        remote_ip: GATEWAY_IP,
        remote_port: 80,
    }).is_none());
}

#[test]
fn refused_connection() {
    let (net, _wire) = configured(Box::new(|frame: &[u8]| {
        if let Some(answer) = arp_reply(frame) {
            return vec![answer];
        }
        let Some((_, payload)) = parse_ipv4(frame) else {
            return Vec::new();
        };
        match tcp::parse_segment(&payload) {
            Some((header, _)) if header.flags.contains(TcpFlags::SYN) => {
                let ack = header.sequence_number.wrapping_add(1);
                vec![tcp_frame(&header, TcpFlags::RST | TcpFlags::ACK, 0, ack, &[])]
            }
            _ => Vec::new(),
        }
    }));
    assert_eq!(
        fetch(&net, "http://10.0.2.2:8080/").unwrap_err(),
        HttpError::ConnectionReset
    );
}

#[test]
fn nobody_listening() {
    let (net, wire) = configured(Box::new(|frame: &[u8]| arp_reply(frame).into_iter().collect()));
    assert_eq!(
        fetch(&net, "http://10.0.2.2/").unwrap_err(),
        HttpError::ConnectTimedOut
    );
    // one SYN per retry interval
    let syns = tcp_segments(&wire.lock().unwrap()).len();
    assert!((3..=5).contains(&syns), "{} SYNs", syns);
}

#[test]
fn https_stops_after_server_hello_done() {
    // ServerHello followed by ServerHelloDone in one record
    const FLIGHT: &[u8] = &[
        22, 3, 3, 0, 12, //
        2, 0, 0, 4, 3, 3, 0, 0, //
        14, 0, 0, 0,
    ];
    let requests = Arc::new(Mutex::new(Vec::new()));
    let (net, _wire) = configured(web_server(FLIGHT, requests.clone()));

    assert_eq!(
        fetch(&net, "https://10.0.2.2/").unwrap_err(),
        HttpError::TlsUnsupported(TlsState::Error)
    );
    let requests = requests.lock().unwrap();
    // the only data sent was the ClientHello
    assert_eq!(requests.len(), 1);
    assert_eq!(&requests[0][..3], &[22, 3, 1]);
    assert_eq!(requests[0][5], 1);
}
