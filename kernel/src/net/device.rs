use alloc::{boxed::Box, string::String, vec::Vec};

use crate::config::KernelConfig;

use super::{error::NetError, hardware::HardwareAddress, protocol::ipv4::Ipv4Address};

/// Interface to a NIC driver. `receive` hands back one complete Ethernet
/// frame per call, or `None` when the receive queue is empty.
pub trait NetDriver: Send {
    fn send(&mut self, frame: &[u8]) -> Result<(), NetError>;

    fn receive(&mut self) -> Option<Vec<u8>>;
}

pub struct NetDevice {
    pub name: String,
    /// The MAC address of the network device
    pub mac: HardwareAddress,
    /// Local address, unspecified until DHCP or static configuration
    pub ip: Ipv4Address,
    /// Gateway IP for exiting the local network.
    /// When a packet needs to be sent outside the local network, the MAC
    /// address of the gateway is used for the outgoing packet.
    pub gateway: Ipv4Address,
    /// Subnet mask for identifying IPs on the local network
    pub subnet: Ipv4Address,
    pub dns_server: Ipv4Address,
    driver: Box<dyn NetDriver>,
}

impl NetDevice {
    pub fn new(name: &str, mac: HardwareAddress, driver: Box<dyn NetDriver>) -> Self {
        Self {
            name: String::from(name),
            mac,
            ip: Ipv4Address::UNSPECIFIED,
            gateway: Ipv4Address::UNSPECIFIED,
            subnet: Ipv4Address::UNSPECIFIED,
            dns_server: Ipv4Address::UNSPECIFIED,
            driver,
        }
    }

    pub fn send_frame(&mut self, frame: &[u8]) -> Result<(), NetError> {
        self.driver.send(frame)
    }

    pub fn receive_frame(&mut self) -> Option<Vec<u8>> {
        self.driver.receive()
    }

    /// Determine if an IP address is on the local network, based on the subnet mask
    pub fn is_local(&self, other_ip: Ipv4Address) -> bool {
        (other_ip & self.subnet) == (self.ip & self.subnet)
    }

    /// The host whose MAC a packet to `dest` must be addressed to
    pub fn next_hop(&self, dest: Ipv4Address) -> Ipv4Address {
        if self.is_local(dest) {
            dest
        } else {
            self.gateway
        }
    }

    /// Copy any static addressing from the boot configuration
    pub fn apply_config(&mut self, config: &KernelConfig) {
        if let Some(ip) = config.address {
            self.ip = ip;
        }
        if let Some(mask) = config.netmask {
            self.subnet = mask;
        }
        if let Some(gateway) = config.gateway {
            self.gateway = gateway;
        }
        if let Some(dns) = config.nameserver {
            self.dns_server = dns;
        }
    }
}

impl core::fmt::Display for NetDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Device: {}", self.name)?;
        writeln!(f, "MAC: {}", self.mac)?;
        writeln!(f, "IP: {}", self.ip)?;
        writeln!(f, "GW: {}", self.gateway)?;
        write!(f, "DNS: {}", self.dns_server)
    }
}
