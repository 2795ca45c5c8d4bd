//! Synchronous element copy and the write fence.

use crate::flags::AccessWidth;

macro_rules! copy_as {
    ($ty:ty, $src:expr, $dst:expr, $count:expr, $mask:expr) => {{
        let src = $src.cast::<$ty>();
        let dst = $dst.cast::<$ty>();
        let aligned = src.is_aligned() && dst.is_aligned();
        let mask = $mask.map(|m| m as $ty);
        for i in 0..$count {
            // SAFETY: the caller guarantees `count` elements on both sides.
            unsafe {
                let s = src.add(i);
                let d = dst.add(i);
                let mut value = if aligned { s.read_volatile() } else { s.read_unaligned() };
                if let Some(mask) = mask {
                    let old = if aligned { d.read_volatile() } else { d.read_unaligned() };
                    value = (old & !mask) | (value & mask);
                }
                if aligned {
                    d.write_volatile(value)
                } else {
                    d.write_unaligned(value)
                }
            }
        }
    }};
}

/// Copies `count` elements of `width`, one volatile access per element.
///
/// With a mask only the masked bits of each destination element change.
///
/// # Safety
///
/// `src` must be readable and `dst` readable and writable for
/// `count * width` bytes.
pub(crate) unsafe fn copy_elements(
    src: *const u8,
    dst: *mut u8,
    width: AccessWidth,
    count: usize,
    mask: Option<u64>,
) {
    match width {
        AccessWidth::Byte => copy_as!(u8, src, dst, count, mask),
        AccessWidth::Word => copy_as!(u16, src, dst, count, mask),
        AccessWidth::Dword => copy_as!(u32, src, dst, count, mask),
        AccessWidth::Qword => copy_as!(u64, src, dst, count, mask),
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        /// Orders window writes before returning. Stores are not reordered
        /// on x86, so only the compiler needs restraining.
        #[inline]
        pub(crate) fn write_fence() {
            core::sync::atomic::compiler_fence(core::sync::atomic::Ordering::SeqCst);
        }
    } else {
        /// Orders window writes before returning.
        #[inline]
        pub(crate) fn write_fence() {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }
}
