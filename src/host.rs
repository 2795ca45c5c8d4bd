//! Process-wide context shared by all devices.

use alloc::sync::Arc;

use crate::config::{DeviceConfig, EngineConfig};
use crate::device::RegDevice;
use crate::error::RegDevResult;
use crate::notify::InterruptManager;
use crate::platform::{BusPlatform, NoBus};
use crate::registry::DeviceDirectory;

/// Collaborators of every device: the bus platform, the interrupt registry,
/// the publication directory and the engine tunables.
pub struct HostContext {
    bus: Arc<dyn BusPlatform>,
    interrupts: InterruptManager,
    directory: DeviceDirectory,
    config: EngineConfig,
}

impl HostContext {
    /// Creates a host around a bus bridge.
    pub fn new(bus: Arc<dyn BusPlatform>, config: EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            interrupts: InterruptManager::new(Arc::clone(&bus), config.clone()),
            bus,
            directory: DeviceDirectory::new(),
            config,
        })
    }

    /// Host without a bus bridge: simulation and file windows only.
    pub fn without_bus() -> Arc<Self> {
        Self::new(Arc::new(NoBus), EngineConfig::default())
    }

    /// Bus bridge shared by all devices of this host.
    #[inline]
    pub fn bus(&self) -> &dyn BusPlatform {
        self.bus.as_ref()
    }

    /// Interrupt registry of this host.
    #[inline]
    pub fn interrupts(&self) -> &InterruptManager {
        &self.interrupts
    }

    /// Directory where created devices are published.
    #[inline]
    pub fn directory(&self) -> &DeviceDirectory {
        &self.directory
    }

    /// Engine tunables.
    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Creates and publishes a device in this host.
    pub fn configure(self: &Arc<Self>, config: DeviceConfig) -> RegDevResult<Arc<RegDevice>> {
        RegDevice::create(Arc::clone(self), config)
    }
}

impl core::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostContext")
            .field("interrupts", &self.interrupts)
            .field("directory", &self.directory)
            .field("config", &self.config)
            .finish()
    }
}

static GLOBAL_HOST: spin::Once<Arc<HostContext>> = spin::Once::new();

/// Installs the process-wide host.
///
/// Only the first call has an effect; returns the installed host.
pub fn init_global_host(bus: Arc<dyn BusPlatform>, config: EngineConfig) -> Arc<HostContext> {
    Arc::clone(GLOBAL_HOST.call_once(|| HostContext::new(bus, config)))
}

/// The process-wide host, created without a bus bridge if none was installed.
pub fn global_host() -> Arc<HostContext> {
    Arc::clone(GLOBAL_HOST.call_once(HostContext::without_bus))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_host_is_shared() {
        let a = global_host();
        let b = init_global_host(Arc::new(NoBus), EngineConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_configure_publishes() {
        let host = HostContext::without_bus();
        let device = host.configure(DeviceConfig::simulation("sim0", 64)).unwrap();
        assert_eq!(device.name(), "sim0");
        assert_eq!(host.directory().len(), 1);
        assert!(host.directory().find("sim0").is_some());
    }
}
