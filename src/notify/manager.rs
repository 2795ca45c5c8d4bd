//! Interrupt registry.
//!
//! The [`InterruptManager`] keeps one [`IntrRegistration`] per interrupt
//! identity for the lifetime of the process. Registrations are created lazily
//! the first time a consumer asks for the scan token of an identity:
//!
//! ```text
//! Unregistered ──resolve()──> Registering ──connected──> Active
//!                                  │
//!                                  └──failed──> Unregistered (error to caller)
//! ```
//!
//! Lookups of existing identities only take the read side of the map.
//! Creation runs under a single connect lock, so concurrent first-time
//! requests for one identity produce exactly one delivery mechanism. A failed
//! connection is never cached; the next request tries again.

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use spin::RwLock;

use crate::config::EngineConfig;
use crate::device::RegDevice;
use crate::error::{RegDevError, RegDevResult};
use crate::platform::BusPlatform;

use super::ack::AckOutcome;
use super::identity::{IntrIdentity, IntrLevel};
use super::token::ScanToken;
use super::{uio, vector};

/// Where an identity is in its registration lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    /// A caller holds the connect lock and is connecting this identity.
    Registering,
    Active,
}

/// Delivery state of one interrupt identity.
pub struct IntrRegistration {
    identity: IntrIdentity,
    token: ScanToken,
    /// Most recent device that resolved this identity.
    device: RwLock<Weak<RegDevice>>,
    /// Label used in diagnostics (device name, plus uio node if any).
    source: RwLock<String>,
    received: AtomicU64,
    missed: AtomicU64,
}

impl IntrRegistration {
    pub(crate) fn new(identity: IntrIdentity, device: Weak<RegDevice>, source: String) -> Self {
        Self {
            identity,
            token: ScanToken::new(),
            device: RwLock::new(device),
            source: RwLock::new(source),
            received: AtomicU64::new(0),
            missed: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn identity(&self) -> IntrIdentity {
        self.identity
    }

    #[inline]
    pub fn token(&self) -> &ScanToken {
        &self.token
    }

    /// Interrupts delivered so far.
    #[inline]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Interrupts lost between two userspace reads.
    #[inline]
    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }

    pub fn source(&self) -> String {
        self.source.read().clone()
    }

    pub(crate) fn set_source(&self, source: String) {
        *self.source.write() = source;
    }

    /// Whether `device` is the device currently associated with this identity.
    pub fn belongs_to(&self, device: &RegDevice) -> bool {
        core::ptr::eq(self.device.read().as_ptr(), device)
    }

    fn associate(&self, device: &Arc<RegDevice>) {
        if !self.belongs_to(device) {
            *self.device.write() = Arc::downgrade(device);
        }
    }

    /// Accounts for a userspace sequence number following `last`.
    ///
    /// The first read (`last == 0`) only establishes the baseline.
    pub(crate) fn note_sequence(&self, last: u32, seq: u32) {
        if last == 0 {
            return;
        }
        if let Some(gap) = seq.checked_sub(last).filter(|gap| *gap > 1) {
            let missed = self.missed.fetch_add(u64::from(gap - 1), Ordering::Relaxed) + u64::from(gap - 1);
            debug!("{}: missed {missed} interrupts so far", self.source());
        }
    }

    /// Counts the interrupt, runs the device acknowledge, raises the token.
    pub fn deliver(&self) {
        let count = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        let device = self.device.read().upgrade();
        trace!(
            "{}: interrupt {} count = {count}, {}",
            self.source(),
            self.identity,
            if device.as_ref().is_some_and(|d| d.has_ack_handler()) {
                "calling handler"
            } else {
                "no handler installed"
            }
        );
        if let Some(device) = device {
            if device.acknowledge() == AckOutcome::Handled {
                return;
            }
        }
        self.token.raise();
    }
}

impl core::fmt::Debug for IntrRegistration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IntrRegistration")
            .field("identity", &self.identity)
            .field("received", &self.received())
            .field("missed", &self.missed())
            .finish()
    }
}

/// Process-wide table of interrupt registrations.
pub struct InterruptManager {
    registrations: RwLock<BTreeMap<IntrIdentity, Arc<IntrRegistration>>>,
    /// Serializes creation; holds the identity being connected.
    connect_lock: Mutex<Option<IntrIdentity>>,
    bus: Arc<dyn BusPlatform>,
    config: EngineConfig,
}

impl InterruptManager {
    /// Creates an empty registry connecting through `bus`.
    pub fn new(bus: Arc<dyn BusPlatform>, config: EngineConfig) -> Self {
        Self {
            registrations: RwLock::new(BTreeMap::new()),
            connect_lock: Mutex::new(None),
            bus,
            config,
        }
    }

    /// Returns the scan token for an interrupt of `device`, connecting the
    /// delivery mechanism on first use.
    ///
    /// `vector` overrides the device's default vector; the level always comes
    /// from the device.
    pub fn resolve(&self, device: &Arc<RegDevice>, vector: Option<u32>) -> RegDevResult<ScanToken> {
        if !device.validate() {
            error!("scan token: invalid device handle");
            return Err(RegDevError::InvalidHandle);
        }
        let Some(vector) = vector.or(device.intr_vector()) else {
            error!("{}: cannot do I/O Intr without interrupt vector defined", device.name());
            return Err(RegDevError::InterruptRegistration {
                device: device.name().into(),
                identity: "none".into(),
                reason: "no interrupt vector defined".into(),
            });
        };
        let identity = IntrIdentity::new(device.intr_level(), vector);
        debug!(
            "{}: resolving interrupt {identity} (default source {})",
            device.name(),
            device.intr_source()
        );

        self.get_or_connect(identity, device, || self.connect(identity, device))
            .map(|registration| registration.token().clone())
    }

    /// Insert-if-absent with creation under the connect lock.
    fn get_or_connect<F>(
        &self,
        identity: IntrIdentity,
        device: &Arc<RegDevice>,
        connect: F,
    ) -> RegDevResult<Arc<IntrRegistration>>
    where
        F: FnOnce() -> RegDevResult<Arc<IntrRegistration>>,
    {
        if let Some(found) = self.registrations.read().get(&identity).cloned() {
            found.associate(device);
            return Ok(found);
        }

        let mut in_flight = self.connect_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(found) = self.registrations.read().get(&identity).cloned() {
            found.associate(device);
            return Ok(found);
        }

        *in_flight = Some(identity);
        let result = connect();
        *in_flight = None;

        match result {
            Ok(registration) => {
                self.registrations
                    .write()
                    .insert(identity, Arc::clone(&registration));
                Ok(registration)
            }
            Err(err) => {
                error!("{err}");
                Err(err)
            }
        }
    }

    fn connect(&self, identity: IntrIdentity, device: &Arc<RegDevice>) -> RegDevResult<Arc<IntrRegistration>> {
        let registration = Arc::new(IntrRegistration::new(
            identity,
            Arc::downgrade(device),
            device.name().to_string(),
        ));
        match identity.level {
            IntrLevel::Userspace => {
                uio::connect(&self.config, device.name(), &registration)?;
            }
            IntrLevel::Bus(level) => {
                vector::connect(self.bus.as_ref(), device.name(), &registration, level, identity.vector)?;
            }
        }
        Ok(registration)
    }

    /// Current lifecycle state of an identity.
    pub fn state(&self, identity: IntrIdentity) -> RegistrationState {
        if self.registrations.read().contains_key(&identity) {
            return RegistrationState::Active;
        }
        match self.connect_lock.try_lock() {
            Ok(guard) if *guard == Some(identity) => RegistrationState::Registering,
            Ok(_) => RegistrationState::Unregistered,
            // Someone is connecting; without the lock we cannot tell which identity.
            Err(_) => RegistrationState::Registering,
        }
    }

    /// Registration of an identity, if connected.
    pub fn get(&self, identity: IntrIdentity) -> Option<Arc<IntrRegistration>> {
        self.registrations.read().get(&identity).cloned()
    }

    /// Registrations whose most recent device is `device`.
    pub fn registrations_of(&self, device: &RegDevice) -> Vec<Arc<IntrRegistration>> {
        self.registrations
            .read()
            .values()
            .filter(|r| r.belongs_to(device))
            .cloned()
            .collect()
    }

    /// Number of active registrations.
    pub fn len(&self) -> usize {
        self.registrations.read().len()
    }

    /// Whether no identity has been connected yet.
    pub fn is_empty(&self) -> bool {
        self.registrations.read().is_empty()
    }
}

impl core::fmt::Debug for InterruptManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterruptManager")
            .field("registrations", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::host::HostContext;
    use crate::platform::NoBus;
    use core::time::Duration;

    fn registration() -> IntrRegistration {
        IntrRegistration::new(IntrIdentity::userspace(0), Weak::new(), "test".into())
    }

    #[test]
    fn test_deliver_without_device_raises_token() {
        let reg = registration();
        reg.deliver();
        reg.deliver();
        assert_eq!(reg.received(), 2);
        assert_eq!(reg.token().raised(), 2);
    }

    #[test]
    fn test_missed_counts_gap_minus_one() {
        let reg = registration();
        reg.note_sequence(0, 7);
        assert_eq!(reg.missed(), 0);
        reg.note_sequence(7, 8);
        assert_eq!(reg.missed(), 0);
        reg.note_sequence(8, 12);
        assert_eq!(reg.missed(), 3);
        reg.note_sequence(12, 3);
        assert_eq!(reg.missed(), 3);
    }

    #[test]
    fn test_userspace_identity_delivers_through_uio_thread() {
        let dir = tempfile::tempdir().unwrap();
        // The first word is overwritten by the initial re-enable token; the
        // thread then reads sequence 1, re-enables, reads sequence 3 and stops
        // at end of file.
        let mut words = Vec::new();
        for word in [0u32, 1, 0, 3] {
            words.extend_from_slice(&word.to_ne_bytes());
        }
        std::fs::write(dir.path().join("uio5"), &words).unwrap();

        let config = EngineConfig {
            uio_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let host = HostContext::new(Arc::new(NoBus), config);
        let device = host.configure(DeviceConfig::simulation("uio-dev", 0x10)).unwrap();
        let manager = host.interrupts();
        let identity = IntrIdentity::userspace(5);

        assert_eq!(manager.state(identity), RegistrationState::Unregistered);
        let registration = manager
            .get_or_connect(identity, &device, || {
                assert_eq!(manager.state(identity), RegistrationState::Registering);
                manager.connect(identity, &device)
            })
            .unwrap();
        assert_eq!(manager.state(identity), RegistrationState::Active);
        assert!(registration.source().contains("uio5"));
        assert!(registration.belongs_to(&device));

        assert_eq!(registration.token().wait_beyond(1, Duration::from_secs(5)), Some(2));
        assert_eq!(registration.received(), 2);
        assert_eq!(registration.missed(), 1);

        let again = manager
            .get_or_connect(identity, &device, || panic!("connected twice"))
            .unwrap();
        assert!(Arc::ptr_eq(&again, &registration));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_missing_uio_device_stays_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            uio_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let host = HostContext::new(Arc::new(NoBus), config);
        let device = host.configure(DeviceConfig::simulation("no-uio", 0x10)).unwrap();
        let manager = host.interrupts();
        let identity = IntrIdentity::userspace(9);

        let err = manager
            .get_or_connect(identity, &device, || manager.connect(identity, &device))
            .unwrap_err();
        assert!(matches!(err, RegDevError::InterruptRegistration { .. }));
        assert_eq!(manager.state(identity), RegistrationState::Unregistered);
        assert!(manager.get(identity).is_none());
        assert!(manager.is_empty());
    }
}
