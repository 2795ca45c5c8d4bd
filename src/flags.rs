//! Device flags and element widths.

use bitflags::bitflags;

bitflags! {
    /// Per-device behavior flags.
    ///
    /// `BLOCK_MODE` and the swap flags are mutually exclusive at creation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DeviceFlags: u32 {
        /// Large aligned transfers may use the bus DMA engine.
        const ALLOW_DMA = 0x0000_0001;
        /// Device is published as a block device.
        const BLOCK_MODE = 0x0000_0002;
        /// Block device exposes its window directly.
        const MAP_DEVICE = 0x0000_0004;
        const READ_ONLY = 0x0000_0080;
        const SWAP_BYTE_PAIRS = 0x0000_0100;
        const SWAP_WORD_PAIRS = 0x0000_0200;
        const SWAP_DWORD_PAIRS = 0x0000_0400;
    }
}

impl DeviceFlags {
    /// All flags that rotate data on read.
    pub const SWAP_ANY: Self = Self::SWAP_BYTE_PAIRS
        .union(Self::SWAP_WORD_PAIRS)
        .union(Self::SWAP_DWORD_PAIRS);

    /// Short names used by device reports.
    pub(crate) fn abbreviations(&self) -> impl Iterator<Item = &'static str> + '_ {
        [
            (Self::ALLOW_DMA, "dma"),
            (Self::READ_ONLY, "ro"),
            (Self::SWAP_BYTE_PAIRS, "sb"),
            (Self::SWAP_WORD_PAIRS, "sw"),
            (Self::SWAP_DWORD_PAIRS, "sd"),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
    }
}

/// Width of one transferred element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum AccessWidth {
    Byte = 1,
    Word = 2,
    Dword = 4,
    Qword = 8,
}

impl AccessWidth {
    /// Size of one element in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        self as usize
    }

    /// Mask covering all bits of one element.
    #[inline]
    pub const fn full_mask(self) -> u64 {
        match self {
            Self::Byte => 0xff,
            Self::Word => 0xffff,
            Self::Dword => 0xffff_ffff,
            Self::Qword => u64::MAX,
        }
    }
}

impl TryFrom<usize> for AccessWidth {
    type Error = usize;

    fn try_from(bytes: usize) -> Result<Self, Self::Error> {
        match bytes {
            1 => Ok(Self::Byte),
            2 => Ok(Self::Word),
            4 => Ok(Self::Dword),
            8 => Ok(Self::Qword),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_width_from_bytes() {
        assert_eq!(AccessWidth::try_from(4), Ok(AccessWidth::Dword));
        assert_eq!(AccessWidth::try_from(8).unwrap().size(), 8);
        assert_eq!(AccessWidth::try_from(3), Err(3));
    }

    #[test]
    fn test_flag_abbreviations() {
        let flags = DeviceFlags::ALLOW_DMA | DeviceFlags::READ_ONLY | DeviceFlags::SWAP_WORD_PAIRS;
        let names: Vec<_> = flags.abbreviations().collect();
        assert_eq!(names, ["dma", "ro", "sw"]);
    }

    #[test]
    fn test_swap_any() {
        assert!(DeviceFlags::SWAP_ANY.contains(DeviceFlags::SWAP_BYTE_PAIRS));
        assert!(DeviceFlags::SWAP_ANY.intersects(DeviceFlags::SWAP_DWORD_PAIRS));
        assert!(!DeviceFlags::SWAP_ANY.contains(DeviceFlags::BLOCK_MODE));
    }
}
