//! Bus DMA with speed downgrade and synchronous fallback.

use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::config::AddressSpace;
use crate::device::RegDevice;
use crate::error::{RegDevError, RegDevResult};
use crate::flags::{AccessWidth, DeviceFlags};
use crate::platform::{DmaDirection, DmaRequest, DmaStatus, SpeedTier};

/// Element count, alignment and device flags all allow DMA.
pub(crate) fn eligible(device: &RegDevice, window: *const u8, buffer: *const u8, count: usize) -> bool {
    count >= device.host().config().dma_min_elements
        && device.flags().contains(DeviceFlags::ALLOW_DMA)
        && (window as usize | buffer as usize) & 7 == 0
        && device.speed_tier().is_some()
}

/// Tries to move `count` elements between `window` and `buffer` by DMA.
///
/// Returns `Ok(true)` if the engine completed the transfer, `Ok(false)` if
/// the caller must copy synchronously. A completion timeout cancels the
/// request and fails the call; the transfer is not retried.
///
/// # Safety
///
/// `window` and `buffer` must be valid for `count * width` bytes.
pub(crate) unsafe fn try_dma(
    device: &RegDevice,
    direction: DmaDirection,
    window: *mut u8,
    buffer: *mut u8,
    width: AccessWidth,
    count: usize,
) -> RegDevResult<bool> {
    if !eligible(device, window, buffer, count) {
        return Ok(false);
    }
    let AddressSpace::Bus(space) = device.space() else {
        return Ok(false);
    };
    let Some(addr_mode) = space.dma_addr_mode() else {
        return Ok(false);
    };
    let Some(engine) = device.host().bus().dma() else {
        return Ok(false);
    };

    let name = device.name();
    let len = width.size() * count;
    let timeout = device.host().config().dma_timeout;
    let completion = &device.dma.completion;
    let _serial = device.dma.serial.lock().unwrap_or_else(|e| e.into_inner());

    loop {
        let Some(tier) = SpeedTier::from_index(device.dma.tier.load(Ordering::Acquire)) else {
            device.stats.record_fallback();
            return Ok(false);
        };
        let request = DmaRequest {
            direction,
            addr_mode,
            tier,
            window,
            buffer,
            len,
            element_width: width,
        };
        debug!(
            "{name}: DMA {} {len} bytes {direction:?} {addr_mode:?} {tier}",
            if direction == DmaDirection::BusToCpu { "read" } else { "write" }
        );

        completion.arm();
        // SAFETY: both ranges stay valid until the completion fires or the
        // request is cancelled below.
        let handle = match unsafe { engine.submit(&request, Arc::clone(completion)) } {
            Ok(handle) => handle,
            Err(rejected) => {
                debug!("{name}: DMA submission failed ({rejected:?}), using normal transfer");
                device.stats.record_fallback();
                return Ok(false);
            }
        };

        match completion.wait_timeout(timeout) {
            None => {
                error!("{name}: DMA timeout after {timeout:?}, cancelling");
                engine.cancel(handle);
                return Err(RegDevError::DmaTimeout { device: name.into() });
            }
            Some(DmaStatus::Done) => {
                device.stats.record_dma();
                return Ok(true);
            }
            Some(DmaStatus::BusError) if width == AccessWidth::Qword && tier > SpeedTier::Blt => {
                let lower = tier.index() - 1;
                let _ = device.dma.tier.compare_exchange(
                    tier.index(),
                    lower,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                debug!(
                    "{name}: DMA bus error at {tier}, trying {}",
                    SpeedTier::from_index(lower).map_or("nothing", SpeedTier::name)
                );
            }
            Some(status) => {
                warn!("{name}: DMA {} error at {tier}, using normal transfer", status.describe());
                device.stats.record_fallback();
                return Ok(false);
            }
        }
    }
}
