use alloc::string::String;
use alloc::vec::Vec;

use ::log::LevelFilter;

use crate::log::TaggedLogger;
use crate::net::protocol::ipv4::Ipv4Address;

const LOGGER: TaggedLogger = TaggedLogger::new("CONFIG");

#[derive(Debug, PartialEq, Eq)]
pub enum Directive {
    /// Bring up a built-in storage driver by name (ahci, ata)
    Driver(String),
    /// Configure the primary network device with DHCP at boot
    Dhcp(bool),
    /// Static addressing for the primary network device
    Address(Ipv4Address),
    Netmask(Ipv4Address),
    Gateway(Ipv4Address),
    Nameserver(Ipv4Address),
    /// Maximum level written to the serial log
    LogLevel(LevelFilter),
}

/// Parse the boot configuration, one directive per line. Unknown or
/// malformed lines are logged and skipped.
pub fn parse_config(text: &str) -> Vec<Directive> {
    let mut directives = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let argument = parts.get(1).copied();

        let directive = match (parts[0], argument) {
            ("driver", Some(name)) => Some(Directive::Driver(String::from(name))),
            ("dhcp", Some("on")) => Some(Directive::Dhcp(true)),
            ("dhcp", Some("off")) => Some(Directive::Dhcp(false)),
            ("address", Some(ip)) => Ipv4Address::parse(ip).map(Directive::Address),
            ("netmask", Some(ip)) => Ipv4Address::parse(ip).map(Directive::Netmask),
            ("gateway", Some(ip)) => Ipv4Address::parse(ip).map(Directive::Gateway),
            ("nameserver", Some(ip)) => Ipv4Address::parse(ip).map(Directive::Nameserver),
            ("loglevel", Some(level)) => parse_level(level).map(Directive::LogLevel),
            ("driver" | "dhcp" | "address" | "netmask" | "gateway" | "nameserver" | "loglevel", _) => {
                LOGGER.log(format_args!("Config: invalid or missing argument: {}", line));
                continue;
            }
            _ => {
                LOGGER.log(format_args!("Config: unknown directive: {}", line));
                continue;
            }
        };

        match directive {
            Some(directive) => directives.push(directive),
            None => LOGGER.log(format_args!("Config: invalid value: {}", line)),
        }
    }

    directives
}

fn parse_level(s: &str) -> Option<LevelFilter> {
    match s {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// Boot settings after folding every directive; later lines win
#[derive(Debug, PartialEq, Eq)]
pub struct KernelConfig {
    pub drivers: Vec<String>,
    pub dhcp: bool,
    pub address: Option<Ipv4Address>,
    pub netmask: Option<Ipv4Address>,
    pub gateway: Option<Ipv4Address>,
    pub nameserver: Option<Ipv4Address>,
    pub log_level: LevelFilter,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            drivers: Vec::new(),
            dhcp: true,
            address: None,
            netmask: None,
            gateway: None,
            nameserver: None,
            log_level: LevelFilter::Info,
        }
    }
}

impl KernelConfig {
    pub fn from_directives(directives: &[Directive]) -> Self {
        let mut config = Self::default();
        for directive in directives {
            match directive {
                Directive::Driver(name) => {
                    if !config.drivers.contains(name) {
                        config.drivers.push(name.clone());
                    }
                }
                Directive::Dhcp(enabled) => config.dhcp = *enabled,
                Directive::Address(ip) => config.address = Some(*ip),
                Directive::Netmask(ip) => config.netmask = Some(*ip),
                Directive::Gateway(ip) => config.gateway = Some(*ip),
                Directive::Nameserver(ip) => config.nameserver = Some(*ip),
                Directive::LogLevel(level) => config.log_level = *level,
            }
        }
        config
    }

    pub fn parse(text: &str) -> Self {
        Self::from_directives(&parse_config(text))
    }

    pub fn wants_driver(&self, name: &str) -> bool {
        self.drivers.iter().any(|d| d == name)
    }
}
