//! Platform collaborators: bus address mapping, bus interrupt vectors and the
//! DMA engine.
//!
//! The crate never talks to a bus bridge directly. Everything bus specific goes
//! through a [`BusPlatform`] supplied at device creation, so hosts without a
//! bus bridge use [`NoBus`] and tests plug in their own implementation.

use core::fmt;
use core::ptr::NonNull;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use axerrno::{ax_err, AxResult};

use crate::flags::AccessWidth;

/// Bus address spaces a device window can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusSpace {
    /// CR/CSR configuration space.
    Csr,
    A16,
    A24,
    A32,
}

impl BusSpace {
    /// Address mode used by the DMA engine for this space, if any.
    pub const fn dma_addr_mode(self) -> Option<DmaAddrMode> {
        match self {
            Self::Csr => None,
            Self::A16 => Some(DmaAddrMode::A16),
            Self::A24 => Some(DmaAddrMode::A24),
            Self::A32 => Some(DmaAddrMode::A32),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Csr => "CR/CSR",
            Self::A16 => "A16",
            Self::A24 => "A24",
            Self::A32 => "A32",
        }
    }
}

/// Handler the platform invokes when a bus interrupt vector fires.
pub type VectorHandler = Arc<dyn Fn() + Send + Sync>;

/// Bus bridge services.
pub trait BusPlatform: Send + Sync {
    /// Maps `size` bytes at `base` of a bus address space into the process.
    fn map_bus(&self, space: BusSpace, base: u64, size: usize) -> AxResult<NonNull<u8>>;

    /// Installs `handler` for a bus interrupt vector.
    fn connect_vector(&self, vector: u8, handler: VectorHandler) -> AxResult;

    /// Enables delivery of a bus interrupt level.
    fn enable_level(&self, level: u8) -> AxResult;

    /// DMA engine attached to the bus, if there is one.
    fn dma(&self) -> Option<&dyn DmaEngine> {
        None
    }
}

/// Platform without any bus bridge. Only simulation and file windows work.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBus;

impl BusPlatform for NoBus {
    fn map_bus(&self, _space: BusSpace, _base: u64, _size: usize) -> AxResult<NonNull<u8>> {
        ax_err!(Unsupported, "no bus support found on this machine")
    }

    fn connect_vector(&self, _vector: u8, _handler: VectorHandler) -> AxResult {
        ax_err!(Unsupported, "no bus interrupt support")
    }

    fn enable_level(&self, _level: u8) -> AxResult {
        ax_err!(Unsupported, "no bus interrupt support")
    }
}

/// DMA transfer protocols, slowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i8)]
pub enum SpeedTier {
    Blt = 0,
    Mblt = 1,
    TwoEVme = 2,
    TwoESst160 = 3,
    TwoESst267 = 4,
    TwoESst320 = 5,
}

impl SpeedTier {
    /// All tiers, slowest first.
    pub const ALL: [SpeedTier; 6] = [
        Self::Blt,
        Self::Mblt,
        Self::TwoEVme,
        Self::TwoESst160,
        Self::TwoESst267,
        Self::TwoESst320,
    ];

    /// Tier for a stored index; negative or unknown indices mean DMA is off.
    pub fn from_index(index: i8) -> Option<Self> {
        usize::try_from(index).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    #[inline]
    pub const fn index(self) -> i8 {
        self as i8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Blt => "BLT",
            Self::Mblt => "MBLT",
            Self::TwoEVme => "2eVME",
            Self::TwoESst160 => "2eSST160",
            Self::TwoESst267 => "2eSST267",
            Self::TwoESst320 => "2eSST320",
        }
    }
}

impl fmt::Display for SpeedTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaAddrMode {
    A16,
    A24,
    A32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Bus window to local buffer.
    BusToCpu,
    /// Local buffer to bus window.
    CpuToBus,
}

/// One DMA submission.
#[derive(Debug, Clone, Copy)]
pub struct DmaRequest {
    pub direction: DmaDirection,
    pub addr_mode: DmaAddrMode,
    pub tier: SpeedTier,
    /// Address inside the mapped device window.
    pub window: *mut u8,
    /// Address of the caller's buffer.
    pub buffer: *mut u8,
    /// Transfer length in bytes.
    pub len: usize,
    pub element_width: AccessWidth,
}

/// Completion status reported by the DMA engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaStatus {
    Done,
    ProtocolError,
    BusError,
    ControllerError,
    Stopped,
    Unknown(u32),
}

impl DmaStatus {
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::ProtocolError => "protocol",
            Self::BusError => "bus",
            Self::ControllerError => "controller",
            Self::Stopped => "timeout",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Reasons a DMA request is refused at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaRejected {
    NotConfigured,
    QueueFull,
    Unaligned,
}

/// Identifies an in-flight request for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmaHandle(pub u64);

/// DMA engine of the bus bridge.
pub trait DmaEngine: Send + Sync {
    /// Whether the engine can run transfers at `tier`.
    fn protocol_supported(&self, tier: SpeedTier) -> bool;

    /// Queues a transfer. The engine reports the final status through
    /// `completion`.
    ///
    /// # Safety
    ///
    /// `request.window` and `request.buffer` must stay valid for `request.len`
    /// bytes until the completion fires or [`DmaEngine::cancel`] returns.
    unsafe fn submit(
        &self,
        request: &DmaRequest,
        completion: Arc<DmaCompletion>,
    ) -> Result<DmaHandle, DmaRejected>;

    /// Cancels an in-flight request, blocking until the engine acknowledges.
    fn cancel(&self, handle: DmaHandle);
}

/// Completion signal shared between a device and its DMA engine.
#[derive(Debug, Default)]
pub struct DmaCompletion {
    status: Mutex<Option<DmaStatus>>,
    cond: Condvar,
}

impl DmaCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears any stale status before a new submission.
    pub(crate) fn arm(&self) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Called by the engine when a transfer finishes.
    pub fn complete(&self, status: DmaStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = Some(status);
        self.cond.notify_all();
    }

    /// Waits for the engine to report a status, `None` on timeout.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<DmaStatus> {
        let guard = self.status.lock().unwrap_or_else(|e| e.into_inner());
        let (mut guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |status| status.is_none())
            .unwrap_or_else(|e| e.into_inner());
        guard.take()
    }
}
