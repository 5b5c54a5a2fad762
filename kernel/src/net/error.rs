use core::fmt;

use super::tls::TlsState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetError {
    NoNetDevice,
    DeviceDriverError,

    InvalidChecksum,
    IncompletePacket,

    /// The next hop's MAC is unknown. A request has been sent; retry later.
    ArpMiss,
    /// Local port is already bound to another socket
    PortAlreadyInUse,
    /// No TCP flow is registered for that endpoint pair
    NoSuchFlow,
    BufferTooSmall,
    /// Payload does not fit the 16-bit length fields of IPv4, UDP or TCP
    PayloadTooLarge,
    TimedOut,
    /// The device has no IP address yet
    NotConfigured,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::NoNetDevice => "no network device",
            Self::DeviceDriverError => "network driver error",
            Self::InvalidChecksum => "invalid checksum",
            Self::IncompletePacket => "incomplete packet",
            Self::ArpMiss => "hardware address not resolved yet",
            Self::PortAlreadyInUse => "port already in use",
            Self::NoSuchFlow => "no such connection",
            Self::BufferTooSmall => "buffer too small",
            Self::PayloadTooLarge => "payload too large",
            Self::TimedOut => "timed out",
            Self::NotConfigured => "device has no address",
        };
        f.write_str(message)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpError {
    Net(NetError),
    /// No ACK after every attempt, including negotiations reset by a NAK
    TimedOut,
}

impl From<NetError> for DhcpError {
    fn from(err: NetError) -> Self {
        Self::Net(err)
    }
}

impl fmt::Display for DhcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Net(err) => write!(f, "DHCP: {}", err),
            Self::TimedOut => f.write_str("DHCP: failed (timeout or NAK)"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DnsError {
    Net(NetError),
    InvalidName,
    /// The query never left: the server's MAC could not be resolved
    SendFailed,
    TimedOut,
    /// The response carried no usable A record
    NoAnswer,
    Malformed,
}

impl From<NetError> for DnsError {
    fn from(err: NetError) -> Self {
        Self::Net(err)
    }
}

impl fmt::Display for DnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Net(err) => write!(f, "DNS: {}", err),
            Self::InvalidName => f.write_str("DNS: invalid name"),
            Self::SendFailed => f.write_str("DNS: failed to send query (ARP timeout?)"),
            Self::TimedOut => f.write_str("DNS: no response"),
            Self::NoAnswer => f.write_str("DNS: no address in response"),
            Self::Malformed => f.write_str("DNS: malformed response"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsError {
    /// The server is waiting for a key exchange that cannot be computed
    CryptoMissing,
    Alert { level: u8, description: u8 },
    BufferTooSmall,
    Malformed,
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CryptoMissing => f.write_str("TLS: key exchange not supported"),
            Self::Alert { level, description } => {
                write!(f, "TLS: alert level={} desc={}", level, description)
            }
            Self::BufferTooSmall => f.write_str("TLS: buffer too small"),
            Self::Malformed => f.write_str("TLS: malformed record"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpError {
    InvalidUrl,
    Dns(DnsError),
    Net(NetError),
    /// No SYN+ACK within the connect window
    ConnectTimedOut,
    /// The server answered the connection attempt with a reset
    ConnectionReset,
    /// Connected, but nothing arrived before the download deadline
    NoData,
    /// The handshake was observed but a secure session cannot be completed
    TlsUnsupported(TlsState),
}

impl From<DnsError> for HttpError {
    fn from(err: DnsError) -> Self {
        Self::Dns(err)
    }
}

impl From<NetError> for HttpError {
    fn from(err: NetError) -> Self {
        Self::Net(err)
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl => f.write_str("invalid URL"),
            Self::Dns(err) => write!(f, "{}", err),
            Self::Net(err) => write!(f, "network: {}", err),
            Self::ConnectTimedOut => f.write_str("connection timed out"),
            Self::ConnectionReset => f.write_str("connection reset by peer"),
            Self::NoData => f.write_str("no data received"),
            Self::TlsUnsupported(state) => {
                write!(f, "HTTPS not supported (TLS state {:?})", state)
            }
        }
    }
}
