//! Transfer engine: register reads and writes.
//!
//! Every call validates the handle, checks the window and range, then picks
//! one of three paths:
//!
//! 1. **Direct map**: the caller's buffer already is the window; nothing moves.
//! 2. **DMA**: large aligned transfers on DMA-capable bus devices, with speed
//!    downgrade on bus errors and fallback to (3) on any other DMA failure.
//! 3. **Normal transfer**: element-wise volatile copy, honoring a write mask.
//!
//! Reads then apply the byte-order correction selected by the swap flags.
//! Writes are never swapped and end with a write fence.

mod copy;
mod dma;
mod swap;

pub use swap::{swap_byte_pairs, swap_dword_pairs, swap_word_pairs};

use crate::device::RegDevice;
use crate::error::{RegDevError, RegDevResult};
use crate::flags::{AccessWidth, DeviceFlags};
use crate::platform::DmaDirection;

use self::copy::{copy_elements, write_fence};

impl RegDevice {
    /// Reads `count` elements of `width` at `offset` into `dest`.
    pub fn read(&self, offset: usize, width: AccessWidth, count: usize, dest: &mut [u8]) -> RegDevResult {
        self.check_buffer(width, count, dest.len(), "read")?;
        // SAFETY: `dest` holds at least `count * width` bytes.
        unsafe { self.read_raw(offset, width, count, dest.as_mut_ptr()) }
    }

    /// Writes `count` elements of `width` from `src` at `offset`.
    ///
    /// With a `mask`, only the masked bits of each register change and DMA is
    /// never used.
    pub fn write(
        &self,
        offset: usize,
        width: AccessWidth,
        count: usize,
        src: &[u8],
        mask: Option<u64>,
    ) -> RegDevResult {
        self.check_buffer(width, count, src.len(), "write")?;
        // SAFETY: `src` holds at least `count * width` bytes and is only read.
        unsafe { self.write_raw(offset, width, count, src.as_ptr(), mask) }
    }

    /// Reads into a raw destination, which may be the window itself.
    ///
    /// # Safety
    ///
    /// `dest` must be valid for writes of `count * width` bytes.
    pub unsafe fn read_raw(
        &self,
        offset: usize,
        width: AccessWidth,
        count: usize,
        dest: *mut u8,
    ) -> RegDevResult {
        let result = self.window_range(offset, width, count, "read").and_then(|src| {
            if core::ptr::eq(src, dest) {
                debug!("{}: read direct map, nothing to copy", self.name());
                return Ok(());
            }
            // SAFETY: `src` covers the range inside the window, `dest` is
            // guaranteed by the caller.
            let done = unsafe { dma::try_dma(self, DmaDirection::BusToCpu, src, dest, width, count)? };
            if !done {
                debug!("{}: read normal transfer of {count} x {width:?}", self.name());
                unsafe { copy_elements(src, dest, width, count, None) };
            }
            if self.flags().intersects(DeviceFlags::SWAP_ANY) {
                // SAFETY: same range as the copy above.
                let buf = unsafe { core::slice::from_raw_parts_mut(dest, width.size() * count) };
                swap::post_read(self.flags(), width, buf);
            }
            Ok(())
        });
        self.account(result, false)
    }

    /// Writes from a raw source.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of `count * width` bytes.
    pub unsafe fn write_raw(
        &self,
        offset: usize,
        width: AccessWidth,
        count: usize,
        src: *const u8,
        mask: Option<u64>,
    ) -> RegDevResult {
        let result = self.check_writable().and_then(|()| {
            let dst = self.window_range(offset, width, count, "write")?;
            if core::ptr::eq(src, dst) {
                debug!("{}: write direct map, nothing to copy", self.name());
                write_fence();
                return Ok(());
            }
            let done = match mask {
                // SAFETY: `dst` covers the range inside the window, `src` is
                // guaranteed by the caller. The engine only reads the buffer.
                None => unsafe {
                    dma::try_dma(self, DmaDirection::CpuToBus, dst, src.cast_mut(), width, count)?
                },
                Some(_) => false,
            };
            if !done {
                debug!("{}: write normal transfer of {count} x {width:?}", self.name());
                unsafe { copy_elements(src, dst, width, count, mask) };
            }
            write_fence();
            Ok(())
        });
        self.account(result, true)
    }

    fn check_writable(&self) -> RegDevResult {
        if !self.validate() {
            error!("write: invalid device handle");
            return Err(RegDevError::InvalidHandle);
        }
        if self.flags().contains(DeviceFlags::READ_ONLY) {
            error!("{}: write on read-only device", self.name());
            return Err(RegDevError::ReadOnly {
                device: self.name().into(),
            });
        }
        Ok(())
    }

    /// Validates the handle and returns the window address of the range.
    fn window_range(&self, offset: usize, width: AccessWidth, count: usize, op: &str) -> RegDevResult<*mut u8> {
        if !self.validate() {
            error!("{op}: invalid device handle");
            return Err(RegDevError::InvalidHandle);
        }
        let Some(window) = self.window() else {
            error!("{}: {op} on device without memory map", self.name());
            return Err(RegDevError::NoMapping {
                device: self.name().into(),
            });
        };
        let out_of_range = |len| {
            error!(
                "{}: {op} at offset {offset:#x} of {count} x {width:?} exceeds size {:#x}",
                self.name(),
                window.size()
            );
            RegDevError::OutOfRange {
                device: self.name().into(),
                offset,
                len,
                size: window.size(),
            }
        };
        let len = width
            .size()
            .checked_mul(count)
            .ok_or_else(|| out_of_range(usize::MAX))?;
        window.range_ptr(offset, len).ok_or_else(|| out_of_range(len))
    }

    /// Checks that `count` elements fit the caller's buffer.
    fn check_buffer(&self, width: AccessWidth, count: usize, available: usize, op: &str) -> RegDevResult {
        if !self.validate() {
            error!("{op}: invalid device handle");
            return Err(RegDevError::InvalidHandle);
        }
        match width.size().checked_mul(count) {
            Some(len) if len <= available => Ok(()),
            _ => {
                error!(
                    "{}: {op} of {count} x {width:?} does not fit buffer of {available} bytes",
                    self.name()
                );
                Err(RegDevError::invalid(
                    self.name(),
                    format!("{op} of {count} x {width:?} does not fit buffer of {available} bytes"),
                ))
            }
        }
    }

    fn account(&self, result: RegDevResult, write: bool) -> RegDevResult {
        match (&result, write) {
            (Ok(()), false) => self.stats.record_read(),
            (Ok(()), true) => self.stats.record_write(),
            (Err(_), _) => self.stats.record_error(),
        }
        result
    }
}
