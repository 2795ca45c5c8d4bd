//! Device directory: publication of devices by name.
//!
//! Created devices are made discoverable here under their name, together with
//! the transfer contract through which consumers reach their registers:
//! - Name lookup returns the [`RegisterAccess`] object of a device
//! - Duplicate names are rejected
//! - Entries are never removed; devices live for the whole process

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use axerrno::{ax_err, AxResult};
use spin::RwLock;

use crate::error::RegDevResult;
use crate::flags::AccessWidth;
use crate::notify::ScanToken;

/// Transfer contract a published device offers to its consumers.
pub trait RegisterAccess: Send + Sync {
    /// Name the device is published under.
    fn name(&self) -> &str;

    /// Diagnostic report at the given verbosity.
    fn report(&self, level: u32) -> String;

    /// Scan token for `vector`, or the device's default interrupt if `None`.
    fn scan_token(&self, vector: Option<u32>) -> RegDevResult<ScanToken>;

    /// Reads `count` elements of `width` starting at `offset` into `dest`.
    fn read(&self, offset: usize, width: AccessWidth, count: usize, dest: &mut [u8]) -> RegDevResult;

    /// Writes `count` elements of `width` from `src`, honoring `mask` if given.
    fn write(
        &self,
        offset: usize,
        width: AccessWidth,
        count: usize,
        src: &[u8],
        mask: Option<u64>,
    ) -> RegDevResult;
}

/// A published device.
#[derive(Clone)]
pub struct DirectoryEntry {
    pub name: String,
    pub device: Arc<dyn RegisterAccess>,
    /// Window size in bytes.
    pub size: usize,
    /// Published as a block device.
    pub block: bool,
    /// Consumers may access the window directly.
    pub direct_map: bool,
}

impl core::fmt::Debug for DirectoryEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DirectoryEntry")
            .field("name", &self.name)
            .field("size", &format_args!("{:#x}", self.size))
            .field("block", &self.block)
            .field("direct_map", &self.direct_map)
            .finish()
    }
}

/// Name-keyed directory of published devices.
///
/// Lookups only take the read side of the lock.
pub struct DeviceDirectory {
    entries: RwLock<BTreeMap<String, DirectoryEntry>>,
}

impl DeviceDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Publishes a device under `entry.name`.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the name is taken, `InvalidInput` if it is
    /// empty.
    pub fn register(&self, entry: DirectoryEntry) -> AxResult {
        if entry.name.is_empty() {
            return ax_err!(InvalidInput, "empty device name");
        }
        let mut entries = self.entries.write();
        if entries.contains_key(&entry.name) {
            return ax_err!(AlreadyExists, "device name already registered");
        }
        debug!(
            "publishing {} ({:#x} bytes{}{})",
            entry.name,
            entry.size,
            if entry.block { ", block" } else { "" },
            if entry.direct_map { ", direct map" } else { "" }
        );
        entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// Transfer contract of the device published as `name`.
    pub fn find(&self, name: &str) -> Option<Arc<dyn RegisterAccess>> {
        self.entries.read().get(name).map(|e| Arc::clone(&e.device))
    }

    /// Full publication record of `name`.
    pub fn entry(&self, name: &str) -> Option<DirectoryEntry> {
        self.entries.read().get(name).cloned()
    }

    /// Published names in order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of published devices.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been published yet.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for DeviceDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for DeviceDirectory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceDirectory")
            .field("names", &self.names())
            .finish()
    }
}
