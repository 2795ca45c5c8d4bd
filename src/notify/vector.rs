//! Bus interrupt vector delivery.

use alloc::sync::Arc;

use crate::error::{RegDevError, RegDevResult};
use crate::platform::{BusPlatform, VectorHandler};

use super::manager::IntrRegistration;

/// Highest bus interrupt level.
const MAX_LEVEL: u32 = 7;

/// Installs a handler for `vector` that delivers into `registration`.
///
/// Level 0 means "unknown": the vector is connected but no level is enabled.
pub(crate) fn connect(
    bus: &dyn BusPlatform,
    device: &str,
    registration: &Arc<IntrRegistration>,
    level: u32,
    vector: u32,
) -> RegDevResult {
    let fail = |reason: String| RegDevError::InterruptRegistration {
        device: device.into(),
        identity: registration.identity().to_string(),
        reason,
    };

    debug!("{device}: connecting bus interrupt vector {vector:#x} level {level}");

    let level = match u8::try_from(level) {
        Ok(0) => {
            warn!("{device}: no bus interrupt level given, interrupts for vector {vector:#x} may not be enabled");
            0
        }
        Ok(l) if u32::from(l) <= MAX_LEVEL => l,
        _ => return Err(fail(format!("invalid bus interrupt level {level}"))),
    };
    let vector = match u8::try_from(vector) {
        Ok(v) if v >= 1 => v,
        _ => return Err(fail(format!("invalid bus interrupt vector {vector:#x}"))),
    };

    let handler: VectorHandler = {
        let registration = Arc::clone(registration);
        Arc::new(move || registration.deliver())
    };
    bus.connect_vector(vector, handler)
        .map_err(|err| fail(format!("cannot connect to bus interrupt vector {vector:#x}: {err:?}")))?;

    if level != 0 {
        if let Err(err) = bus.enable_level(level) {
            warn!("{device}: cannot enable bus interrupt level {level}: {err:?}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::identity::{IntrIdentity, IntrLevel};
    use crate::platform::{BusSpace, NoBus};
    use alloc::sync::Weak;
    use axerrno::AxResult;
    use core::ptr::NonNull;
    use spin::Mutex;

    #[derive(Default)]
    struct RecordingBus {
        handlers: Mutex<Vec<(u8, VectorHandler)>>,
        levels: Mutex<Vec<u8>>,
    }

    impl BusPlatform for RecordingBus {
        fn map_bus(&self, space: BusSpace, base: u64, size: usize) -> AxResult<NonNull<u8>> {
            NoBus.map_bus(space, base, size)
        }

        fn connect_vector(&self, vector: u8, handler: VectorHandler) -> AxResult {
            self.handlers.lock().push((vector, handler));
            Ok(())
        }

        fn enable_level(&self, level: u8) -> AxResult {
            self.levels.lock().push(level);
            Ok(())
        }
    }

    fn registration(level: u32, vector: u32) -> Arc<IntrRegistration> {
        Arc::new(IntrRegistration::new(
            IntrIdentity::new(IntrLevel::Bus(level), vector),
            Weak::new(),
            "vme".into(),
        ))
    }

    #[test]
    fn test_connect_and_fire() {
        let bus = RecordingBus::default();
        let reg = registration(3, 0x40);
        connect(&bus, "vme", &reg, 3, 0x40).unwrap();

        assert_eq!(*bus.levels.lock(), [3]);
        let handlers = bus.handlers.lock();
        assert_eq!(handlers.len(), 1);
        assert_eq!(handlers[0].0, 0x40);
        (handlers[0].1)();
        (handlers[0].1)();
        assert_eq!(reg.received(), 2);
        assert_eq!(reg.token().raised(), 2);
    }

    #[test]
    fn test_level_zero_skips_enable() {
        let bus = RecordingBus::default();
        let reg = registration(0, 0x41);
        connect(&bus, "vme", &reg, 0, 0x41).unwrap();
        assert!(bus.levels.lock().is_empty());
    }

    #[test]
    fn test_invalid_level_and_vector() {
        let bus = RecordingBus::default();
        let reg = registration(8, 0x40);
        assert!(connect(&bus, "vme", &reg, 8, 0x40).is_err());
        let reg = registration(2, 0);
        assert!(connect(&bus, "vme", &reg, 2, 0).is_err());
        let reg = registration(0x100, 0x40);
        assert!(connect(&bus, "vme", &reg, 0x100, 0x40).is_err());
        assert!(bus.handlers.lock().is_empty());
    }

    #[test]
    fn test_platform_refusal_is_registration_error() {
        let reg = registration(1, 0x20);
        let err = connect(&NoBus, "vme", &reg, 1, 0x20).unwrap_err();
        assert!(matches!(err, RegDevError::InterruptRegistration { .. }));
    }
}
