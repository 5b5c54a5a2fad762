use alloc::string::String;

/// ATA opcodes used by both the AHCI and the PIO drivers
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum AtaCommand {
    ReadSectors = 0x20,
    ReadDmaExt = 0x25,
    WriteSectors = 0x30,
    WriteDmaExt = 0x35,
    ReadDma = 0xc8,
    WriteDma = 0xca,
    FlushCache = 0xe7,
    Identify = 0xec,
}

pub const SECTOR_SIZE: usize = 512;

/// Highest sector count a single LBA28 command can carry
pub const LBA28_MAX_SECTORS: u32 = 256;
pub const LBA28_LIMIT: u64 = 1 << 28;

/// Each pair of bytes in an ATA string is "swapped": the first character is
/// the high byte of each word. Trailing padding is removed.
pub fn extract_ata_string(words: &[u16]) -> String {
    let mut converted = String::with_capacity(words.len() * 2);

    for pair in words.iter() {
        let low = *pair as u8;
        let high = (pair >> 8) as u8;
        converted.push(high as char);
        converted.push(low as char);
    }
    let trimmed = converted.trim_end_matches(|c| c == ' ' || c == '\0').len();
    converted.truncate(trimmed);
    converted
}

/// The fields this kernel cares about from the 256-word IDENTIFY block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentifyData {
    pub model: String,
    pub lba28_sectors: u32,
    pub lba48_sectors: u64,
    pub supports_lba48: bool,
}

impl IdentifyData {
    /// Decode the block as it arrives from the device: 256 little-endian words
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < SECTOR_SIZE {
            return None;
        }
        let mut words = [0u16; 256];
        for (i, word) in words.iter_mut().enumerate() {
            *word = u16::from_le_bytes([raw[i * 2], raw[i * 2 + 1]]);
        }
        Some(Self::from_words(&words))
    }

    pub fn from_words(words: &[u16; 256]) -> Self {
        let lba28_sectors = (words[60] as u32) | ((words[61] as u32) << 16);
        let lba48_sectors = (words[100] as u64)
            | ((words[101] as u64) << 16)
            | ((words[102] as u64) << 32)
            | ((words[103] as u64) << 48);
        Self {
            model: extract_ata_string(&words[27..47]),
            lba28_sectors,
            lba48_sectors,
            supports_lba48: words[83] & (1 << 10) != 0,
        }
    }

    /// Addressable sectors, preferring the 48-bit count when it is supported
    pub fn sector_count(&self) -> u64 {
        if self.supports_lba48 && self.lba48_sectors != 0 {
            self.lba48_sectors
        } else {
            self.lba28_sectors as u64
        }
    }
}

impl core::fmt::Display for IdentifyData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "\"{}\", {} sectors ({} MiB){}",
            self.model,
            self.sector_count(),
            self.sector_count() * SECTOR_SIZE as u64 / (1024 * 1024),
            if self.supports_lba48 { ", LBA48" } else { "" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_ata_string, IdentifyData};

    fn encode(model: &str, words: &mut [u16; 256]) {
        let bytes = model.as_bytes();
        for i in 0..20 {
            let high = *bytes.get(i * 2).unwrap_or(&b' ') as u16;
            let low = *bytes.get(i * 2 + 1).unwrap_or(&b' ') as u16;
            words[27 + i] = (high << 8) | low;
        }
    }

    #[test]
    fn swapped_strings() {
        assert_eq!(extract_ata_string(&[0x5145, 0x4d55, 0x2020]), "QEMU");
    }

    #[test]
    fn prefers_lba48() {
        let mut words = [0u16; 256];
        encode("QEMU HARDDISK", &mut words);
        words[60] = 0xffff;
        words[61] = 0x0fff;
        words[83] = 1 << 10;
        words[100] = 0x0000;
        words[101] = 0x1000;
        let data = IdentifyData::from_words(&words);
        assert_eq!(data.model, "QEMU HARDDISK");
        assert_eq!(data.lba28_sectors, 0x0fff_ffff);
        assert_eq!(data.sector_count(), 0x1000_0000);

        words[83] = 0;
        assert_eq!(IdentifyData::from_words(&words).sector_count(), 0x0fff_ffff);
    }

    #[test]
    fn bytes_are_little_endian_words() {
        let mut raw = [0u8; 512];
        raw[120] = 0x00;
        raw[121] = 0x08;
        let data = IdentifyData::from_bytes(&raw).unwrap();
        assert_eq!(data.sector_count(), 0x800);
        assert!(IdentifyData::from_bytes(&raw[..100]).is_none());
    }
}
