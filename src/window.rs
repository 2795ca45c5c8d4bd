//! Address-space mapper.
//!
//! Produces the byte-addressable [`MappedWindow`] through which a device's
//! registers are visible: zero-filled heap memory for simulation, an `mmap` of
//! a file or character device, or a bus window handed out by the platform.

use core::ptr::NonNull;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::config::{AddressSpace, EngineConfig};
use crate::error::{RegDevError, RegDevResult};
use crate::platform::{BusPlatform, BusSpace};

/// Driver name under which userspace interrupt devices register their major.
pub const UIO_DRIVER_CLASS: &str = "uio";

enum Backing {
    /// Owned simulation memory, 8-byte aligned.
    Heap(#[allow(dead_code)] Box<[u64]>),
    /// `mmap` region including the page alignment delta.
    Mmap { addr: *mut libc::c_void, len: usize },
    /// Owned by the bus bridge for the whole process.
    Bus,
}

/// Contiguous window over device registers.
pub struct MappedWindow {
    base: NonNull<u8>,
    size: usize,
    backing: Backing,
}

// SAFETY: the window is raw register memory. All accesses go through volatile
// or explicitly synchronized copies, and concurrent callers serialize
// multi-register sequences themselves.
unsafe impl Send for MappedWindow {}
unsafe impl Sync for MappedWindow {}

impl MappedWindow {
    /// Pointer to the first byte of the window.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Pointer at `offset` if `len` bytes from there fit in the window.
    #[inline]
    pub fn range_ptr(&self, offset: usize, len: usize) -> Option<*mut u8> {
        let end = offset.checked_add(len)?;
        if end > self.size {
            return None;
        }
        // SAFETY: offset + len <= size, so the result stays inside the window.
        Some(unsafe { self.base.as_ptr().add(offset) })
    }

    fn kind(&self) -> &'static str {
        match self.backing {
            Backing::Heap(_) => "heap",
            Backing::Mmap { .. } => "mmap",
            Backing::Bus => "bus",
        }
    }
}

impl Drop for MappedWindow {
    fn drop(&mut self) {
        if let Backing::Mmap { addr, len } = self.backing {
            // SAFETY: addr/len are exactly what mmap returned.
            unsafe {
                libc::munmap(addr, len);
            }
        }
    }
}

impl core::fmt::Debug for MappedWindow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MappedWindow")
            .field("base", &self.base)
            .field("size", &format_args!("{:#x}", self.size))
            .field("kind", &self.kind())
            .finish()
    }
}

/// Result of mapping a device's address space.
#[derive(Debug)]
pub struct MapOutcome {
    /// Absent for zero-size (interrupt-only) devices.
    pub window: Option<MappedWindow>,
    /// Effective size, smaller than requested if the backing file could not grow.
    pub size: usize,
    /// Write access was denied and the file was opened read-only.
    pub read_only: bool,
    /// Minor number of a userspace interrupt device backing the window.
    pub uio_minor: Option<u32>,
}

impl MapOutcome {
    fn plain(window: Option<MappedWindow>, size: usize) -> Self {
        Self {
            window,
            size,
            read_only: false,
            uio_minor: None,
        }
    }
}

/// Establishes the window for a device.
pub fn map_window(
    device: &str,
    space: &AddressSpace,
    base: u64,
    size: usize,
    bus: &dyn BusPlatform,
    config: &EngineConfig,
) -> RegDevResult<MapOutcome> {
    match space {
        AddressSpace::Simulation => map_simulation(device, size),
        AddressSpace::Bus(space) => map_bus(device, *space, base, size, bus),
        AddressSpace::File(path) => map_file(device, path, base, size, config),
    }
}

fn map_simulation(device: &str, size: usize) -> RegDevResult<MapOutcome> {
    if size == 0 {
        return Ok(MapOutcome::plain(None, 0));
    }
    let words = size.div_ceil(8);
    let mut memory: Vec<u64> = Vec::new();
    memory.try_reserve_exact(words).map_err(|_| {
        error!("{device}: out of memory allocating {size} bytes of simulated address space");
        RegDevError::transport(
            device,
            format!("out of memory allocating {size} bytes of simulated address space"),
            None,
        )
    })?;
    memory.resize(words, 0);
    let mut memory = memory.into_boxed_slice();
    let base = NonNull::new(memory.as_mut_ptr().cast::<u8>())
        .ok_or_else(|| RegDevError::transport(device, "null simulation buffer", None))?;
    debug!("{device}: simulation @{:p}", base);
    Ok(MapOutcome::plain(
        Some(MappedWindow {
            base,
            size,
            backing: Backing::Heap(memory),
        }),
        size,
    ))
}

fn map_bus(
    device: &str,
    space: BusSpace,
    base: u64,
    size: usize,
    bus: &dyn BusPlatform,
) -> RegDevResult<MapOutcome> {
    if size == 0 {
        return Ok(MapOutcome::plain(None, 0));
    }
    let ptr = bus.map_bus(space, base, size).map_err(|err| {
        error!(
            "{device}: cannot map address {base:#010x} on {} address space: {err:?}",
            space.name()
        );
        RegDevError::transport(
            device,
            format!("cannot map address {base:#010x} on {} address space: {err:?}", space.name()),
            None,
        )
    })?;
    debug!("{device}: {} {base:#x} mapped @{:p}", space.name(), ptr);
    Ok(MapOutcome::plain(
        Some(MappedWindow {
            base: ptr,
            size,
            backing: Backing::Bus,
        }),
        size,
    ))
}

fn map_file(
    device: &str,
    path: &Path,
    base: u64,
    size: usize,
    config: &EngineConfig,
) -> RegDevResult<MapOutcome> {
    let shown = path.display();
    let page = page_size();
    let map_start = base & !(page - 1);
    let delta = (base - map_start) as usize;
    let mut size = size;
    let (mut map_len, needed) = match size
        .checked_add(delta)
        .and_then(|len| Some((len, map_start.checked_add(u64::try_from(len).ok()?)?)))
    {
        Some(range) => range,
        None => {
            error!("{device}: {shown} window of {size:#x} bytes at {base:#x} overflows");
            return Err(RegDevError::transport(
                device,
                format!("{shown} window of {size:#x} bytes at {base:#x} overflows"),
                None,
            ));
        }
    };

    let (file, read_only) = open_backing(device, path)?;

    let mut uio_minor = None;
    match file.metadata() {
        Ok(meta) => {
            if meta.file_type().is_file() && needed > meta.len() {
                let current = meta.len();
                debug!("{device}: growing {shown} from {current} to {needed} bytes");
                if let Err(err) = file.set_len(needed) {
                    if map_start >= current || base >= current {
                        error!("{device}: {shown} too small and cannot grow (start > size): {err}");
                        return Err(RegDevError::transport(
                            device,
                            format!("{shown} too small and cannot grow"),
                            Some(err),
                        ));
                    }
                    size = (current - base) as usize;
                    map_len = (current - map_start) as usize;
                    warn!("{device}: {shown} too small and cannot grow, shrinking size to {size:#x}");
                }
            }
            if meta.file_type().is_char_device() {
                let (major, minor) = split_rdev(meta.rdev());
                match char_device_class(&config.proc_devices, major) {
                    Some(class) if class == UIO_DRIVER_CLASS => {
                        debug!("{device}: {shown} is {class} number {minor}, default interrupts from uio{minor}");
                        uio_minor = Some(minor);
                    }
                    Some(class) => debug!("{device}: {shown} is a {class} device"),
                    None => debug!("{device}: unknown character device major {major} for {shown}"),
                }
            }
        }
        Err(err) => debug!("{device}: cannot stat {shown}: {err}"),
    }

    let window = if size > 0 {
        let prot = if read_only {
            libc::PROT_READ
        } else {
            libc::PROT_READ | libc::PROT_WRITE
        };
        debug!(
            "{device}: mmap({map_len:#x}, {}, MAP_SHARED, {shown}, {map_start:#x})",
            if read_only { "PROT_READ" } else { "PROT_READ|PROT_WRITE" }
        );
        // SAFETY: a fresh shared mapping of an open descriptor; the result is
        // checked against MAP_FAILED before use.
        let addr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                map_len,
                prot,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                map_start as libc::off_t,
            )
        };
        if addr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            let reason = if err.raw_os_error() == Some(libc::ENODEV) {
                "device does not support mapping".to_string()
            } else {
                err.to_string()
            };
            error!("{device}: cannot mmap {shown}: {reason}");
            return Err(RegDevError::transport(
                device,
                format!("cannot mmap {shown}: {reason}"),
                Some(err),
            ));
        }
        // SAFETY: delta < page size <= map_len, inside the mapping.
        let base_ptr = unsafe { addr.cast::<u8>().add(delta) };
        debug!("{device}: mmap returned {addr:p}, adjusted by {delta} bytes");
        Some(MappedWindow {
            base: NonNull::new(base_ptr)
                .ok_or_else(|| RegDevError::transport(device, "mmap returned null", None))?,
            size,
            backing: Backing::Mmap { addr, len: map_len },
        })
    } else {
        None
    };

    Ok(MapOutcome {
        window,
        size,
        read_only,
        uio_minor,
    })
}

/// Opens read-write (creating if needed), degrading to read-only.
fn open_backing(device: &str, path: &Path) -> RegDevResult<(File, bool)> {
    match OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o666)
        .custom_flags(libc::O_CLOEXEC)
        .open(path)
    {
        Ok(file) => Ok((file, false)),
        Err(rw_err) => match File::open(path) {
            Ok(file) => {
                warn!("{device}: {} is readonly ({rw_err})", path.display());
                Ok((file, true))
            }
            Err(err) => {
                error!("{device}: {}: {err}", path.display());
                Err(RegDevError::transport(
                    device,
                    format!("cannot open {}", path.display()),
                    Some(err),
                ))
            }
        },
    }
}

/// Host page size.
pub fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as u64 } else { 4096 }
}

/// Splits a device number into (major, minor) the way glibc encodes it.
pub(crate) fn split_rdev(rdev: u64) -> (u32, u32) {
    let major = ((rdev >> 8) & 0xfff) | ((rdev >> 32) & !0xfff);
    let minor = (rdev & 0xff) | ((rdev >> 12) & !0xff);
    (major as u32, minor as u32)
}

/// Driver name registered for a character device major.
pub(crate) fn char_device_class(table: &Path, major: u32) -> Option<String> {
    let text = std::fs::read_to_string(table).ok()?;
    parse_char_devices(&text, major)
}

fn parse_char_devices(text: &str, major: u32) -> Option<String> {
    text.lines()
        .skip_while(|line| !line.starts_with("Character devices:"))
        .skip(1)
        .take_while(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let number = fields.next()?.parse::<u32>().ok()?;
            Some((number, fields.next()?))
        })
        .find(|(number, _)| *number == major)
        .map(|(_, name)| name.to_string())
}

/// Userspace interrupt index of a character device, if it is one.
pub(crate) fn probe_uio_device(path: &Path, table: &Path) -> io::Result<Option<u32>> {
    let meta = std::fs::metadata(path)?;
    if !meta.file_type().is_char_device() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a device file, no interrupt support",
        ));
    }
    let (major, minor) = split_rdev(meta.rdev());
    match char_device_class(table, major) {
        Some(class) if class == UIO_DRIVER_CLASS => Ok(Some(minor)),
        Some(_) => Ok(None),
        None => Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("cannot translate device type {major} to string"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NoBus;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    const PROC_DEVICES: &str = "Character devices:\n  1 mem\n  4 tty\n243 uio\n\nBlock devices:\n  8 sd\n";

    #[test]
    fn test_simulation_is_zeroed_and_aligned() {
        let out = map_window("sim", &AddressSpace::Simulation, 0, 100, &NoBus, &EngineConfig::default()).unwrap();
        let window = out.window.unwrap();
        assert_eq!(window.size(), 100);
        assert_eq!(window.as_ptr() as usize % 8, 0);
        let bytes = unsafe { core::slice::from_raw_parts(window.as_ptr(), 100) };
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_zero_size_has_no_window() {
        let out = map_window("irq", &AddressSpace::Simulation, 0, 0, &NoBus, &EngineConfig::default()).unwrap();
        assert!(out.window.is_none());
    }

    #[test]
    fn test_bus_without_platform_fails() {
        let err = map_window(
            "vme",
            &AddressSpace::Bus(BusSpace::A24),
            0x10000,
            0x100,
            &NoBus,
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RegDevError::Transport { .. }));
    }

    #[test]
    fn test_range_ptr_bounds() {
        let out = map_window("sim", &AddressSpace::Simulation, 0, 16, &NoBus, &EngineConfig::default()).unwrap();
        let window = out.window.unwrap();
        assert!(window.range_ptr(8, 8).is_some());
        assert!(window.range_ptr(12, 8).is_none());
        assert!(window.range_ptr(usize::MAX, 2).is_none());
    }

    #[test]
    fn test_file_is_created_grown_and_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regs.bin");
        let base = page_size() + 0x10;
        let space = AddressSpace::File(path.clone());
        let out = map_window("file", &space, base, 0x20, &NoBus, &EngineConfig::default()).unwrap();
        assert!(!out.read_only);
        assert_eq!(out.size, 0x20);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), base + 0x20);

        let window = out.window.unwrap();
        unsafe { window.as_ptr().write_volatile(0xa5) };
        drop(window);
        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents[base as usize], 0xa5);
    }

    #[test]
    fn test_existing_file_contents_visible() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        file.flush().unwrap();
        let space = AddressSpace::File(file.path().to_path_buf());
        let out = map_window("file", &space, 4, 4, &NoBus, &EngineConfig::default()).unwrap();
        let window = out.window.unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(window.as_ptr(), 4) };
        assert_eq!(bytes, &[5, 6, 7, 8]);
    }

    /// Root opens read-only files for writing anyway.
    fn running_as_root() -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    fn read_only_file(len: usize) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&(0..len as u8).collect::<Vec<_>>()).unwrap();
        file.flush().unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o444)).unwrap();
        file
    }

    #[test]
    fn test_overflowing_file_window_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.bin");
        let space = AddressSpace::File(path.clone());
        let err = map_window("big", &space, 0x10, usize::MAX - 4, &NoBus, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, RegDevError::Transport { .. }));
        let err = map_window("big", &space, u64::MAX - 4, 0x100, &NoBus, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, RegDevError::Transport { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_read_only_file_degrades() {
        if running_as_root() {
            return;
        }
        let file = read_only_file(0x20);
        let space = AddressSpace::File(file.path().to_path_buf());
        let out = map_window("ro", &space, 0x8, 0x8, &NoBus, &EngineConfig::default()).unwrap();
        assert!(out.read_only);
        assert_eq!(out.size, 0x8);
        let window = out.window.unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(window.as_ptr(), 8) };
        assert_eq!(bytes, &[8, 9, 10, 11, 12, 13, 14, 15]);
    }

    #[test]
    fn test_read_only_file_shrinks_window() {
        if running_as_root() {
            return;
        }
        let file = read_only_file(0x20);
        let space = AddressSpace::File(file.path().to_path_buf());
        let out = map_window("short", &space, 0x10, 0x40, &NoBus, &EngineConfig::default()).unwrap();
        assert!(out.read_only);
        assert_eq!(out.size, 0x10);
        let window = out.window.unwrap();
        assert_eq!(window.size(), 0x10);
        assert_eq!(unsafe { window.as_ptr().read_volatile() }, 0x10);
        assert_eq!(std::fs::metadata(file.path()).unwrap().len(), 0x20);
    }

    #[test]
    fn test_read_only_file_start_beyond_end_fails() {
        if running_as_root() {
            return;
        }
        let file = read_only_file(0x20);
        let space = AddressSpace::File(file.path().to_path_buf());
        let err = map_window("past", &space, 0x30, 0x10, &NoBus, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, RegDevError::Transport { .. }));
    }

    #[test]
    fn test_parse_char_devices() {
        assert_eq!(parse_char_devices(PROC_DEVICES, 243).as_deref(), Some("uio"));
        assert_eq!(parse_char_devices(PROC_DEVICES, 1).as_deref(), Some("mem"));
        assert_eq!(parse_char_devices(PROC_DEVICES, 8), None);
    }

    #[test]
    fn test_split_rdev() {
        assert_eq!(split_rdev(0xf302), (0xf3, 2));
        assert_eq!(split_rdev((1 << 8) | 3), (1, 3));
    }

    #[test]
    fn test_probe_regular_file_is_not_device() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = probe_uio_device(file.path(), Path::new("/proc/devices")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
