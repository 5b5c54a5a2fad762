//! Wire formats. Each header type implements `PacketHeader`, reading and
//! writing its fields in network byte order.

pub mod arp;
pub mod checksum;
pub mod dhcp;
pub mod dns;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod packet;
pub mod tcp;
pub mod tls;
pub mod udp;
