//! Interrupt acknowledge handlers.
//!
//! A device may carry an [`AckHandler`] that runs on every interrupt before the
//! scan token is raised. Returning [`AckOutcome::Handled`] suppresses the
//! scan request for that interrupt.

use crate::device::RegDevice;
use crate::flags::AccessWidth;

/// What delivery should do after acknowledging an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The handler dealt with the interrupt; do not raise the token.
    Handled,
    /// Wake the consumers.
    NotifyConsumer,
}

/// Device specific interrupt acknowledge.
pub trait AckHandler: Send + Sync {
    fn acknowledge(&self, device: &RegDevice) -> AckOutcome;
}

impl<F> AckHandler for F
where
    F: Fn(&RegDevice) -> AckOutcome + Send + Sync,
{
    fn acknowledge(&self, device: &RegDevice) -> AckOutcome {
        self(device)
    }
}

/// Sets bits of a 16-bit register to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetBits16 {
    pub offset: usize,
    pub bits: u16,
}

/// Clears bits of a 16-bit register to acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearBits16 {
    pub offset: usize,
    pub bits: u16,
}

impl SetBits16 {
    /// Decodes `offset << 16 | bits`.
    pub const fn from_packed(packed: u32) -> Self {
        Self {
            offset: (packed >> 16) as usize,
            bits: packed as u16,
        }
    }
}

impl ClearBits16 {
    /// Decodes `offset << 16 | bits`.
    pub const fn from_packed(packed: u32) -> Self {
        Self {
            offset: (packed >> 16) as usize,
            bits: packed as u16,
        }
    }
}

impl AckHandler for SetBits16 {
    fn acknowledge(&self, device: &RegDevice) -> AckOutcome {
        let value = self.bits.to_ne_bytes();
        if let Err(err) = device.write(self.offset, AccessWidth::Word, 1, &value, Some(self.bits.into())) {
            error!("{}: interrupt acknowledge (set bits {:#x}) failed: {err}", device.name(), self.bits);
        }
        AckOutcome::NotifyConsumer
    }
}

impl AckHandler for ClearBits16 {
    fn acknowledge(&self, device: &RegDevice) -> AckOutcome {
        if let Err(err) = device.write(self.offset, AccessWidth::Word, 1, &[0, 0], Some(self.bits.into())) {
            error!("{}: interrupt acknowledge (clear bits {:#x}) failed: {err}", device.name(), self.bits);
        }
        AckOutcome::NotifyConsumer
    }
}
