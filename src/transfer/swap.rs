//! Byte-order correction applied after reads.
//!
//! Each pass swaps the two halves of every element of one size, so applying
//! a pass twice restores the buffer.

use crate::flags::{AccessWidth, DeviceFlags};

/// Rotates every 64-bit element by 32 bits.
pub fn swap_dword_pairs(buf: &mut [u8]) {
    buf.chunks_exact_mut(8).for_each(|e| e.rotate_left(4));
}

/// Rotates every 32-bit element by 16 bits.
pub fn swap_word_pairs(buf: &mut [u8]) {
    buf.chunks_exact_mut(4).for_each(|e| e.rotate_left(2));
}

/// Rotates every 16-bit element by 8 bits.
pub fn swap_byte_pairs(buf: &mut [u8]) {
    buf.chunks_exact_mut(2).for_each(|e| e.swap(0, 1));
}

/// Applies the swap passes selected by `flags`, widest first.
pub(crate) fn post_read(flags: DeviceFlags, width: AccessWidth, buf: &mut [u8]) {
    let width = width.size();
    if flags.contains(DeviceFlags::SWAP_DWORD_PAIRS) && width >= 8 {
        swap_dword_pairs(buf);
    }
    if flags.contains(DeviceFlags::SWAP_WORD_PAIRS) && width >= 4 {
        swap_word_pairs(buf);
    }
    if flags.contains(DeviceFlags::SWAP_BYTE_PAIRS) && width >= 2 {
        swap_byte_pairs(buf);
    }
}
