//! Userspace interrupt delivery.
//!
//! A userspace interrupt device delivers one 4-byte sequence number per
//! interrupt on `read`. Some drivers need a 4-byte re-enable token written
//! back before the next interrupt is delivered. Each connected device gets a
//! dedicated thread that blocks in `read` and forwards every interrupt to its
//! registration.

use alloc::sync::Arc;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::thread;

use crate::config::EngineConfig;
use crate::error::{RegDevError, RegDevResult};

use super::manager::IntrRegistration;

/// Token written to re-arm the interrupt.
const REENABLE: u32 = 1;

/// Opens the device for `registration` and starts its delivery thread.
pub(crate) fn connect(
    config: &EngineConfig,
    device: &str,
    registration: &Arc<IntrRegistration>,
) -> RegDevResult {
    let index = registration.identity().vector;
    let fail = |reason: String| RegDevError::InterruptRegistration {
        device: device.into(),
        identity: registration.identity().to_string(),
        reason,
    };

    debug!("{device}: connecting userspace interrupt {index}");
    let path = find_device(&config.uio_dir, index)
        .ok_or_else(|| fail(format!("no uio number {index} found in {}", config.uio_dir.display())))?;
    debug!("{device}: found {}", path.display());

    let file = open_device(device, &path).map_err(|err| fail(format!("cannot open {}: {err}", path.display())))?;
    registration.set_source(format!("{device} ({})", path.display()));

    let thread_name = format!("Iuio{index}");
    debug!("{device}: starting interrupt thread {thread_name} for {}", path.display());
    let worker = Arc::clone(registration);
    thread::Builder::new()
        .name(thread_name)
        .spawn(move || run(&worker, file))
        .map_err(|err| fail(format!("cannot start interrupt thread: {err}")))?;
    Ok(())
}

/// Finds `uio<N>` or `uio<name><N>` where `<name>` does not end in a digit.
pub(crate) fn find_device(dir: &Path, index: u32) -> Option<PathBuf> {
    let suffix = index.to_string();
    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                return false;
            };
            let Some(middle) = name
                .strip_prefix("uio")
                .and_then(|rest| rest.strip_suffix(suffix.as_str()))
            else {
                return false;
            };
            middle.chars().last().is_none_or(|c| !c.is_ascii_digit())
        })
        .map(|entry| entry.path())
        .collect();
    matches.sort();
    matches.into_iter().next()
}

fn open_device(device: &str, path: &Path) -> io::Result<File> {
    match OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(path)
    {
        Ok(file) => Ok(file),
        Err(_) => {
            let file = OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_CLOEXEC)
                .open(path)?;
            debug!("{device}: {} is readonly", path.display());
            Ok(file)
        }
    }
}

/// Delivery loop. Returns only when the blocking read fails.
pub(crate) fn run<S: Read + Write>(registration: &IntrRegistration, mut stream: S) {
    let source = registration.source();
    let reenable = stream.write_all(&REENABLE.to_ne_bytes()).is_ok();
    if !reenable {
        debug!("{source}: does not need re-enable");
    }

    let mut last = 0u32;
    let mut buf = [0u8; 4];
    let err = loop {
        if let Err(err) = stream.read_exact(&mut buf) {
            break err;
        }
        let seq = u32::from_ne_bytes(buf);
        trace!("{source}: interrupt number {seq}");
        registration.note_sequence(last, seq);
        last = seq;

        registration.deliver();
        if reenable {
            if let Err(err) = stream.write_all(&REENABLE.to_ne_bytes()) {
                debug!("{source}: re-enable failed: {err}");
            }
        }
    };
    error!(
        "{source}: interrupt handling {} working: {err}",
        if last != 0 { "stopped" } else { "not" }
    );
}
