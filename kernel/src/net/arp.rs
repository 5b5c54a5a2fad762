//! IP to MAC mappings learned from ARP traffic. The cache is a small fixed
//! table: when every slot is taken, a new address replaces a victim chosen
//! round-robin.

use super::{hardware::HardwareAddress, protocol::ipv4::Ipv4Address};

pub const ARP_CACHE_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: Ipv4Address,
    pub mac: HardwareAddress,
    pub valid: bool,
}

impl ArpEntry {
    const EMPTY: Self = Self {
        ip: Ipv4Address::UNSPECIFIED,
        mac: HardwareAddress::ZERO,
        valid: false,
    };
}

pub struct ArpCache {
    entries: [ArpEntry; ARP_CACHE_SIZE],
    next_victim: usize,
}

impl ArpCache {
    pub const fn new() -> Self {
        Self {
            entries: [ArpEntry::EMPTY; ARP_CACHE_SIZE],
            next_victim: 0,
        }
    }

    pub fn lookup(&self, ip: Ipv4Address) -> Option<HardwareAddress> {
        self.entries
            .iter()
            .find(|entry| entry.valid && entry.ip == ip)
            .map(|entry| entry.mac)
    }

    /// Record a mapping. An existing entry for the IP is updated in place;
    /// otherwise the last free slot is used, and only a full table evicts.
    /// Returns the slot that was written.
    pub fn update(&mut self, ip: Ipv4Address, mac: HardwareAddress) -> usize {
        let mut slot = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.valid && entry.ip == ip {
                slot = Some(index);
                break;
            }
            if !entry.valid {
                slot = Some(index);
            }
        }
        let slot = slot.unwrap_or_else(|| {
            let victim = self.next_victim;
            self.next_victim = (self.next_victim + 1) % ARP_CACHE_SIZE;
            victim
        });
        self.entries[slot] = ArpEntry {
            ip,
            mac,
            valid: true,
        };
        slot
    }

    pub fn entries(&self) -> impl Iterator<Item = &ArpEntry> {
        self.entries.iter().filter(|entry| entry.valid)
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ArpCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "ARP Cache:")?;
        for entry in self.entries() {
            writeln!(f, "  {}  ->  {}", entry.ip, entry.mac)?;
        }
        Ok(())
    }
}
