//! Interrupt identities: the key of the interrupt registry.

use core::fmt;

/// Interrupt level part of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IntrLevel {
    /// Bus interrupt level, 0 when the level is unknown.
    /// Never truncated; levels above 7 fail when connecting.
    Bus(u32),
    /// Userspace interrupt descriptor; the vector is the device index.
    Userspace,
}

/// Distinguishes one interrupt source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IntrIdentity {
    pub level: IntrLevel,
    pub vector: u32,
}

impl IntrIdentity {
    /// Builds an identity, splitting bus vectors above 0xff into
    /// `level << 8 | vector`.
    pub fn new(level: IntrLevel, vector: u32) -> Self {
        match level {
            IntrLevel::Bus(_) if vector > 0xff => Self {
                level: IntrLevel::Bus(vector >> 8),
                vector: vector & 0xff,
            },
            _ => Self { level, vector },
        }
    }

    pub fn userspace(index: u32) -> Self {
        Self {
            level: IntrLevel::Userspace,
            vector: index,
        }
    }

    #[inline]
    pub fn is_userspace(&self) -> bool {
        self.level == IntrLevel::Userspace
    }
}

impl fmt::Display for IntrIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            IntrLevel::Userspace => write!(f, "uio{}", self.vector),
            IntrLevel::Bus(level) => write!(f, "vector {:#x} level {}", self.vector, level),
        }
    }
}
