//! Device creation descriptor and engine tunables.
//!
//! Besides the typed [`DeviceConfig`] this module understands the textual
//! address-space notation used by startup scripts:
//!
//! ```text
//! sim                      simulation on allocated memory
//! csr | 16 | 24 | 32       bus address space (+100: allow DMA, +200: block mode)
//! /dev/uio0&SwapDWords     file or character device plus flags
//! ```

use core::any::Any;
use core::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{RegDevError, RegDevResult};
use crate::flags::DeviceFlags;
use crate::notify::AckHandler;
use crate::platform::BusSpace;

/// File mapped when the address space string names nothing else.
pub const DEFAULT_MAP_FILE: &str = "/dev/mem";

/// Where a device window lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpace {
    /// Zero-filled heap memory.
    Simulation,
    Bus(BusSpace),
    /// A regular file or mappable character device.
    File(PathBuf),
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulation => f.write_str("sim"),
            Self::Bus(space) => f.write_str(space.name()),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Default interrupt source of a device.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IntrSource {
    #[default]
    None,
    /// Bus vector; values above 0xff carry the level in the upper byte.
    Vector(u32),
    /// Character device whose type decides the interrupt mechanism.
    Device(PathBuf),
}

impl IntrSource {
    /// Parses a numeric vector, otherwise treats the text as a device path.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::None;
        }
        match parse_c_integer(text) {
            Some(vector) if vector >= 0 => Self::Vector(vector as u32),
            Some(_) => Self::None,
            None => Self::Device(PathBuf::from(text)),
        }
    }
}

impl fmt::Display for IntrSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Vector(v) => write!(f, "{v:#x}"),
            Self::Device(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Everything needed to create one device.
#[derive(Clone)]
pub struct DeviceConfig {
    pub name: String,
    /// Base address inside the address space (or file offset).
    pub base: u64,
    /// Window size in bytes; zero creates an interrupt-only device.
    pub size: usize,
    pub space: AddressSpace,
    pub flags: DeviceFlags,
    pub intr_source: IntrSource,
    /// Bus interrupt level, 0 if none was given.
    pub intr_level: u8,
    pub ack: Option<Arc<dyn AckHandler>>,
    pub user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>, base: u64, size: usize, space: AddressSpace) -> Self {
        Self {
            name: name.into(),
            base,
            size,
            space,
            flags: DeviceFlags::empty(),
            intr_source: IntrSource::None,
            intr_level: 0,
            ack: None,
            user_data: None,
        }
    }

    /// Simulation device of `size` bytes.
    pub fn simulation(name: impl Into<String>, size: usize) -> Self {
        Self::new(name, 0, size, AddressSpace::Simulation)
    }

    /// Builds a descriptor from the textual address-space notation.
    pub fn parse(
        name: impl Into<String>,
        base: u64,
        size: usize,
        addrspace: &str,
    ) -> RegDevResult<Self> {
        let name = name.into();
        let (space, flags) = parse_addrspace(&name, addrspace)?;
        Ok(Self::new(name, base, size, space).with_flags(flags))
    }

    pub fn with_flags(mut self, flags: DeviceFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_interrupt(mut self, source: IntrSource, level: u8) -> Self {
        self.intr_source = source;
        self.intr_level = level;
        self
    }

    pub fn with_ack_handler(mut self, ack: Arc<dyn AckHandler>) -> Self {
        self.ack = Some(ack);
        self
    }

    pub fn with_user_data(mut self, data: Arc<dyn Any + Send + Sync>) -> Self {
        self.user_data = Some(data);
        self
    }

    /// Checks flag combinations that can never work together.
    pub fn validate(&self) -> RegDevResult {
        if self.name.is_empty() {
            return Err(RegDevError::invalid("", "device name must not be empty"));
        }
        if self.flags.contains(DeviceFlags::BLOCK_MODE) && self.flags.intersects(DeviceFlags::SWAP_ANY) {
            return Err(RegDevError::invalid(
                &self.name,
                "swapping is incompatible with block mode",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("name", &self.name)
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .field("space", &self.space)
            .field("flags", &self.flags)
            .field("intr_source", &self.intr_source)
            .field("intr_level", &self.intr_level)
            .field("ack", &self.ack.is_some())
            .finish()
    }
}

/// Tunables of the transfer engine and interrupt discovery.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Smallest element count for which DMA is attempted.
    pub dma_min_elements: usize,
    /// How long to wait for a DMA completion before cancelling.
    pub dma_timeout: Duration,
    /// Directory searched for userspace interrupt devices.
    pub uio_dir: PathBuf,
    /// Table translating character device majors to driver names.
    pub proc_devices: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dma_min_elements: 1024,
            dma_timeout: Duration::from_secs(1),
            uio_dir: PathBuf::from("/dev"),
            proc_devices: PathBuf::from("/proc/devices"),
        }
    }
}

/// Splits an address-space string into the space and its modifier flags.
pub fn parse_addrspace(device: &str, text: &str) -> RegDevResult<(AddressSpace, DeviceFlags)> {
    let mut parts = text.splitn(2, '&');
    let space_text = parts.next().unwrap_or("").trim();
    let mut flags = DeviceFlags::empty();

    if let Some(rest) = parts.next() {
        for token in rest
            .split(|c| matches!(c, '&' | '|' | ',' | ';' | '+' | ' '))
            .filter(|t| !t.is_empty())
        {
            match parse_flag(token) {
                Some(FlagToken::Toggle(f)) => flags ^= f,
                Some(FlagToken::Set(f)) => flags |= f,
                None => warn!("{device}: unknown flag {token}"),
            }
        }
    }

    let space = if space_text.is_empty() {
        AddressSpace::File(PathBuf::from(DEFAULT_MAP_FILE))
    } else if space_text.eq_ignore_ascii_case("sim") {
        AddressSpace::Simulation
    } else if space_text.eq_ignore_ascii_case("csr") {
        AddressSpace::Bus(BusSpace::Csr)
    } else if let Some(number) = parse_c_integer(space_text).filter(|n| *n > 0) {
        if number / 100 & 1 != 0 {
            flags |= DeviceFlags::ALLOW_DMA;
        }
        if number / 100 & 2 != 0 {
            flags |= DeviceFlags::BLOCK_MODE;
        }
        let space = match number % 100 {
            0xc => BusSpace::Csr,
            16 => BusSpace::A16,
            24 => BusSpace::A24,
            32 => BusSpace::A32,
            _ => {
                return Err(RegDevError::invalid(
                    device,
                    format!("invalid bus address space {space_text}, must be 0xc, 16, 24 or 32"),
                ));
            }
        };
        AddressSpace::Bus(space)
    } else {
        AddressSpace::File(PathBuf::from(space_text))
    };

    Ok((space, flags))
}

enum FlagToken {
    Toggle(DeviceFlags),
    Set(DeviceFlags),
}

fn parse_flag(token: &str) -> Option<FlagToken> {
    let lower = token.to_ascii_lowercase();
    let token = match lower.as_str() {
        "swapdwordpairs" => FlagToken::Toggle(DeviceFlags::SWAP_DWORD_PAIRS),
        "swapwordpairs" => FlagToken::Toggle(DeviceFlags::SWAP_WORD_PAIRS),
        "swapbytepairs" | "swapwords" => FlagToken::Toggle(DeviceFlags::SWAP_BYTE_PAIRS),
        "swapdwords" => FlagToken::Toggle(DeviceFlags::SWAP_BYTE_PAIRS | DeviceFlags::SWAP_WORD_PAIRS),
        "swapqwords" => FlagToken::Toggle(DeviceFlags::SWAP_ANY),
        "dma" => FlagToken::Set(DeviceFlags::ALLOW_DMA),
        "block" => FlagToken::Set(DeviceFlags::BLOCK_MODE),
        "map" => FlagToken::Set(DeviceFlags::MAP_DEVICE | DeviceFlags::BLOCK_MODE),
        _ => return None,
    };
    Some(token)
}

/// Integer in C notation: `0x` hex, leading `0` octal, otherwise decimal.
fn parse_c_integer(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}
