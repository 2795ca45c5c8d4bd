//! Device handle.
//!
//! A [`RegDevice`] aggregates the mapped window, the backing address space,
//! the flags, the default interrupt and the DMA state of one register-mapped
//! device. Devices are created once at configuration time and live for the
//! rest of the process.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::any::Any;
use core::fmt::Write as _;
use core::sync::atomic::{AtomicI8, Ordering};
use std::sync::Mutex;

use crate::config::{AddressSpace, DeviceConfig, IntrSource};
use crate::error::{RegDevError, RegDevResult};
use crate::flags::{AccessWidth, DeviceFlags};
use crate::host::HostContext;
use crate::notify::{AckHandler, AckOutcome, IntrLevel, ScanToken};
use crate::platform::{DmaCompletion, SpeedTier};
use crate::registry::{DirectoryEntry, RegisterAccess};
use crate::stats::TransferStats;
use crate::window::{map_window, probe_uio_device, MappedWindow};

/// Validity tag carried by every live device.
pub const DEVICE_MAGIC: u32 = 2661166104;

/// Per-device DMA state.
pub(crate) struct DmaState {
    /// Index of the current [`SpeedTier`], -1 when DMA is disabled.
    pub(crate) tier: AtomicI8,
    pub(crate) completion: Arc<DmaCompletion>,
    /// Serializes large transfers so one completion signal suffices.
    pub(crate) serial: Mutex<()>,
}

/// A register-mapped device.
pub struct RegDevice {
    magic: u32,
    name: String,
    window: Option<MappedWindow>,
    space: AddressSpace,
    base: u64,
    size: usize,
    flags: DeviceFlags,
    intr_source: IntrSource,
    intr_level: IntrLevel,
    intr_vector: Option<u32>,
    ack: Option<Arc<dyn AckHandler>>,
    user_data: Option<Arc<dyn Any + Send + Sync>>,
    pub(crate) dma: DmaState,
    pub(crate) stats: TransferStats,
    host: Arc<HostContext>,
    this: Weak<RegDevice>,
}

impl RegDevice {
    /// Maps the window, fills in the device and publishes it in the host's
    /// directory.
    ///
    /// Nothing is published if any step fails.
    pub fn create(host: Arc<HostContext>, config: DeviceConfig) -> RegDevResult<Arc<Self>> {
        if let Err(err) = config.validate() {
            error!("{err}");
            return Err(err);
        }
        let DeviceConfig {
            name,
            base,
            size,
            space,
            mut flags,
            intr_source,
            intr_level,
            ack,
            user_data,
        } = config;

        let (mut level, mut vector) = match &intr_source {
            IntrSource::None => (IntrLevel::Bus(intr_level.into()), None),
            IntrSource::Vector(vector) => (IntrLevel::Bus(intr_level.into()), Some(*vector)),
            IntrSource::Device(path) => {
                match probe_uio_device(path, &host.config().proc_devices) {
                    Ok(Some(minor)) => {
                        debug!("{name}: interrupts from {} (uio{minor})", path.display());
                        (IntrLevel::Userspace, Some(minor))
                    }
                    Ok(None) => {
                        error!("{name}: {} has no interrupt support", path.display());
                        return Err(RegDevError::invalid(
                            &name,
                            format!("{} has no interrupt support", path.display()),
                        ));
                    }
                    Err(err) => {
                        error!("{name}: {}: {err}", path.display());
                        return Err(RegDevError::invalid(
                            &name,
                            format!("interrupt source {}: {err}", path.display()),
                        ));
                    }
                }
            }
        };

        let outcome = map_window(&name, &space, base, size, host.bus(), host.config())?;
        if outcome.read_only {
            flags |= DeviceFlags::READ_ONLY;
        }
        if let Some(minor) = outcome.uio_minor {
            if !matches!(intr_source, IntrSource::Device(_)) {
                level = IntrLevel::Userspace;
                vector = vector.or(Some(minor));
            }
        }

        let tier = probe_speed_tier(&name, &space, &host);

        let device = Arc::new_cyclic(|this| Self {
            magic: DEVICE_MAGIC,
            name,
            window: outcome.window,
            space,
            base,
            size: outcome.size,
            flags,
            intr_source,
            intr_level: level,
            intr_vector: vector,
            ack,
            user_data,
            dma: DmaState {
                tier: AtomicI8::new(tier),
                completion: Arc::new(DmaCompletion::new()),
                serial: Mutex::new(()),
            },
            stats: TransferStats::new(),
            host: Arc::clone(&host),
            this: this.clone(),
        });

        let entry = DirectoryEntry {
            name: device.name.clone(),
            device: Arc::clone(&device) as Arc<dyn RegisterAccess>,
            size: device.size,
            block: device.flags.contains(DeviceFlags::BLOCK_MODE),
            direct_map: device.flags.contains(DeviceFlags::MAP_DEVICE),
        };
        if let Err(cause) = host.directory().register(entry) {
            error!("{}: cannot publish device: {cause:?}", device.name);
            return Err(RegDevError::Publish {
                device: device.name.clone(),
                cause,
            });
        }
        debug!("{}: created {}", device.name, device.report(0));
        Ok(device)
    }

    /// Checks the validity tag.
    #[inline]
    pub fn validate(&self) -> bool {
        self.magic == DEVICE_MAGIC
    }

    /// Opaque pointer for a foreign boundary.
    pub fn as_raw(self: &Arc<Self>) -> *const RegDevice {
        Arc::as_ptr(self)
    }

    /// Turns an opaque pointer back into a device reference.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to readable memory at least as large as a
    /// `RegDevice`. If the tag matches, the device must outlive `'a`.
    pub unsafe fn from_raw<'a>(ptr: *const RegDevice) -> RegDevResult<&'a RegDevice> {
        // SAFETY: guaranteed by the caller; the tag is checked before use.
        let device = unsafe { ptr.as_ref() }.ok_or(RegDevError::InvalidHandle)?;
        if !device.validate() {
            error!("invalid device handle {ptr:p}");
            return Err(RegDevError::InvalidHandle);
        }
        Ok(device)
    }

    /// Runs the acknowledge handler for one interrupt.
    pub fn acknowledge(&self) -> AckOutcome {
        match &self.ack {
            Some(ack) => ack.acknowledge(self),
            None => AckOutcome::NotifyConsumer,
        }
    }

    #[inline]
    pub fn has_ack_handler(&self) -> bool {
        self.ack.is_some()
    }

    /// Scan token for an interrupt of this device.
    ///
    /// `vector` overrides the default interrupt given at creation.
    pub fn scan_token(&self, vector: Option<u32>) -> RegDevResult<ScanToken> {
        if !self.validate() {
            error!("scan token: invalid device handle");
            return Err(RegDevError::InvalidHandle);
        }
        let this = self.this.upgrade().ok_or(RegDevError::InvalidHandle)?;
        self.host.interrupts().resolve(&this, vector)
    }

    /// Diagnostic summary.
    ///
    /// Level 0 shows the mapping and flags, level 1 adds interrupt counters,
    /// level 2 adds raw flags and transfer statistics.
    pub fn report(&self, level: u32) -> String {
        if !self.validate() {
            return String::from("invalid device handle");
        }
        let mut out = format!("{}: {} {:#x}", self.name, self.space, self.base);
        match &self.window {
            Some(window) => {
                let _ = write!(out, " @{:p} size {:#x}", window.as_ptr(), self.size);
            }
            None => out.push_str(" (no map)"),
        }
        if self.intr_source != IntrSource::None || self.intr_vector.is_some() {
            let _ = write!(out, " intr {}", self.intr_source);
            if let Some(vector) = self.intr_vector {
                match self.intr_level {
                    IntrLevel::Userspace => {
                        let _ = write!(out, " (uio{vector})");
                    }
                    IntrLevel::Bus(level) => {
                        let _ = write!(out, " (vector {vector:#x} level {level})");
                    }
                }
            }
        }
        for abbreviation in self.flags.abbreviations() {
            out.push(' ');
            out.push_str(abbreviation);
        }
        if let Some(tier) = self.speed_tier() {
            let _ = write!(out, " {tier}");
        }

        if level >= 1 {
            for registration in self.host.interrupts().registrations_of(self) {
                let _ = write!(
                    out,
                    "\n  interrupt {}: {} received",
                    registration.identity(),
                    registration.received()
                );
                if registration.identity().is_userspace() {
                    let _ = write!(out, ", {} missed", registration.missed());
                }
            }
        }
        if level >= 2 {
            let _ = write!(
                out,
                "\n  flags {:#06x}, {} reads, {} writes, {} errors, {} dma, {} dma fallbacks",
                self.flags.bits(),
                self.stats.reads(),
                self.stats.writes(),
                self.stats.errors(),
                self.stats.dma_transfers(),
                self.stats.dma_fallbacks()
            );
        }
        out
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn flags(&self) -> DeviceFlags {
        self.flags
    }

    /// Effective window size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn base(&self) -> u64 {
        self.base
    }

    #[inline]
    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    #[inline]
    pub fn window(&self) -> Option<&MappedWindow> {
        self.window.as_ref()
    }

    /// Address of `offset` inside the window, if mapped and in range.
    pub fn window_ptr(&self, offset: usize) -> Option<*mut u8> {
        self.window.as_ref()?.range_ptr(offset, 0)
    }

    /// Current DMA tier, `None` when DMA is disabled.
    pub fn speed_tier(&self) -> Option<SpeedTier> {
        SpeedTier::from_index(self.dma.tier.load(Ordering::Acquire))
    }

    #[inline]
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn user_data(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.user_data.as_ref()
    }

    #[inline]
    pub fn intr_source(&self) -> &IntrSource {
        &self.intr_source
    }

    #[inline]
    pub fn intr_level(&self) -> IntrLevel {
        self.intr_level
    }

    /// Default interrupt vector (or userspace index).
    #[inline]
    pub fn intr_vector(&self) -> Option<u32> {
        self.intr_vector
    }

    #[inline]
    pub fn host(&self) -> &Arc<HostContext> {
        &self.host
    }
}

/// Fastest tier the bus DMA engine supports for this space, or -1.
fn probe_speed_tier(name: &str, space: &AddressSpace, host: &HostContext) -> i8 {
    let AddressSpace::Bus(bus_space) = space else {
        return -1;
    };
    if bus_space.dma_addr_mode().is_none() {
        return -1;
    }
    let Some(engine) = host.bus().dma() else {
        debug!("{name}: no DMA engine");
        return -1;
    };
    match SpeedTier::ALL
        .iter()
        .rev()
        .find(|tier| engine.protocol_supported(**tier))
    {
        Some(tier) => {
            debug!("{name}: fastest DMA protocol {tier}");
            tier.index()
        }
        None => {
            debug!("{name}: DMA engine supports no protocol");
            -1
        }
    }
}

impl RegisterAccess for RegDevice {
    fn name(&self) -> &str {
        RegDevice::name(self)
    }

    fn report(&self, level: u32) -> String {
        RegDevice::report(self, level)
    }

    fn scan_token(&self, vector: Option<u32>) -> RegDevResult<ScanToken> {
        RegDevice::scan_token(self, vector)
    }

    fn read(&self, offset: usize, width: AccessWidth, count: usize, dest: &mut [u8]) -> RegDevResult {
        RegDevice::read(self, offset, width, count, dest)
    }

    fn write(
        &self,
        offset: usize,
        width: AccessWidth,
        count: usize,
        src: &[u8],
        mask: Option<u64>,
    ) -> RegDevResult {
        RegDevice::write(self, offset, width, count, src, mask)
    }
}

impl core::fmt::Debug for RegDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegDevice")
            .field("name", &self.name)
            .field("space", &self.space)
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .field("flags", &self.flags)
            .field("window", &self.window)
            .field("intr_level", &self.intr_level)
            .field("intr_vector", &self.intr_vector)
            .field("speed_tier", &self.speed_tier())
            .finish()
    }
}
