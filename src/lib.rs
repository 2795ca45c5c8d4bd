//! # Register-Mapped Device Access
//!
//! This crate provides uniform register access for control-system field
//! devices behind memory-mapped transports, bridges their interrupts to scan
//! tokens, and moves bulk data by DMA with a synchronous fallback.
//!
//! ## Architecture
//!
//! The crate is organized into layers, leaves first:
//!
//! ### Address-Space Mapper
//! - [`MappedWindow`]: Byte-addressable window over simulation memory, an
//!   `mmap` of a file or character device, or a bus window
//! - [`BusPlatform`]: Bus bridge services (mapping, vectors, [`DmaEngine`])
//!
//! ### Device Handle
//! - [`RegDevice`]: Window, flags, default interrupt and DMA state of one device
//! - [`DeviceConfig`]: Creation descriptor, also parsed from address-space strings
//! - [`DeviceDirectory`]: Publication of devices by name
//!
//! ### Interrupt Management
//! - [`InterruptManager`]: Lazily created, process-lifetime registration per
//!   [`IntrIdentity`]
//! - [`ScanToken`]: What interrupt delivery raises to wake consumers
//! - [`AckHandler`]: Optional per-device acknowledge that may suppress a scan
//!
//! ### Transfer Engine
//! - [`RegDevice::read`] / [`RegDevice::write`]: Direct map, DMA with speed
//!   downgrade, or element-wise copy, plus byte-order correction on read
//!
//! ## Examples
//!
//! ### Simulation Device
//!
//! ```rust,ignore
//! use axregmap::{AccessWidth, DeviceConfig, HostContext};
//!
//! let host = HostContext::without_bus();
//! let device = host.configure(DeviceConfig::simulation("sim0", 0x1000))?;
//!
//! device.write(0x10, AccessWidth::Dword, 1, &0xdead_beefu32.to_ne_bytes(), None)?;
//!
//! let mut value = [0u8; 4];
//! device.read(0x10, AccessWidth::Dword, 1, &mut value)?;
//! ```
//!
//! ### Bus Device with Interrupt
//!
//! ```rust,ignore
//! use axregmap::{DeviceConfig, HostContext, IntrSource, SetBits16};
//!
//! let host = HostContext::new(Arc::new(MyBridge::open()?), EngineConfig::default());
//! let config = DeviceConfig::parse("adc", 0x0020_0000, 0x1000, "132&SwapWordPairs")?
//!     .with_interrupt(IntrSource::Vector(0x40), 3)
//!     .with_ack_handler(Arc::new(SetBits16 { offset: 0x0e, bits: 0x0001 }));
//! let device = host.configure(config)?;
//!
//! let token = device.scan_token(None)?;
//! let seen = token.raised();
//! token.wait_beyond(seen, Duration::from_secs(1));
//! ```

extern crate alloc;
#[macro_use]
extern crate log;

mod config;
mod device;
mod error;
mod flags;
mod host;
mod notify;
mod platform;
mod registry;
mod stats;
mod transfer;
mod window;

pub use config::{parse_addrspace, AddressSpace, DeviceConfig, EngineConfig, IntrSource, DEFAULT_MAP_FILE};
pub use device::{RegDevice, DEVICE_MAGIC};
pub use error::{RegDevError, RegDevResult};
pub use flags::{AccessWidth, DeviceFlags};
pub use host::{global_host, init_global_host, HostContext};
pub use platform::{
    BusPlatform, BusSpace, DmaAddrMode, DmaCompletion, DmaDirection, DmaEngine, DmaHandle, DmaRejected,
    DmaRequest, DmaStatus, NoBus, SpeedTier, VectorHandler,
};
pub use registry::{DeviceDirectory, DirectoryEntry, RegisterAccess};
pub use stats::TransferStats;
pub use transfer::{swap_byte_pairs, swap_dword_pairs, swap_word_pairs};
pub use window::{page_size, MapOutcome, MappedWindow, UIO_DRIVER_CLASS};

// Interrupt registry and delivery
pub use notify::{
    AckHandler, AckOutcome, ClearBits16, InterruptManager, IntrIdentity, IntrLevel, IntrRegistration,
    RegistrationState, ScanListener, ScanToken, SetBits16,
};
