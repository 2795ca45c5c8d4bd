//! Error taxonomy for register-mapped devices.

use axerrno::AxError;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type RegDevResult<T = ()> = Result<T, RegDevError>;

/// Errors reported by device creation, interrupt resolution and transfers.
///
/// DMA statuses below timeout class never show up here: they fall back to the
/// synchronous copy inside the same call.
#[derive(Debug, Error)]
pub enum RegDevError {
    /// The handle does not carry a valid tag.
    #[error("invalid device handle")]
    InvalidHandle,

    #[error("{device}: device has no memory map")]
    NoMapping { device: String },

    #[error("{device}: device is read-only")]
    ReadOnly { device: String },

    #[error("{device}: access at offset {offset:#x} of {len} bytes exceeds window of {size:#x} bytes")]
    OutOfRange {
        device: String,
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("{device}: {reason}")]
    InvalidArgument { device: String, reason: String },

    /// Mapping, opening or allocating the window failed at creation.
    #[error("{device}: {reason}")]
    Transport {
        device: String,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("{device}: cannot connect interrupt {identity}: {reason}")]
    InterruptRegistration {
        device: String,
        identity: String,
        reason: String,
    },

    #[error("{device}: DMA timeout")]
    DmaTimeout { device: String },

    #[error("{device}: cannot publish device: {cause:?}")]
    Publish { device: String, cause: AxError },
}

impl RegDevError {
    pub(crate) fn invalid(device: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            device: device.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(
        device: &str,
        reason: impl Into<String>,
        source: Option<std::io::Error>,
    ) -> Self {
        Self::Transport {
            device: device.into(),
            reason: reason.into(),
            source,
        }
    }
}

impl From<RegDevError> for AxError {
    fn from(err: RegDevError) -> Self {
        match err {
            RegDevError::InvalidHandle | RegDevError::InvalidArgument { .. } => AxError::InvalidInput,
            RegDevError::NoMapping { .. } => AxError::Unsupported,
            RegDevError::ReadOnly { .. } => AxError::PermissionDenied,
            RegDevError::OutOfRange { .. } => AxError::InvalidInput,
            RegDevError::Transport { .. } => AxError::Io,
            RegDevError::InterruptRegistration { .. } => AxError::NotFound,
            RegDevError::DmaTimeout { .. } => AxError::BadState,
            RegDevError::Publish { cause, .. } => cause,
        }
    }
}
