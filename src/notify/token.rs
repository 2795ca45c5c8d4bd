//! Scan-request token.
//!
//! A [`ScanToken`] is what interrupt delivery raises to wake the external
//! record-processing consumer. Consumers either subscribe a listener that runs
//! on the delivering thread, or block until the raise count moves past a value
//! they have already seen.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use spin::RwLock;

/// Listener invoked synchronously on every raise.
pub type ScanListener = Arc<dyn Fn() + Send + Sync>;

struct TokenInner {
    raised: AtomicU64,
    lock: Mutex<()>,
    cond: Condvar,
    listeners: RwLock<Vec<ScanListener>>,
}

/// Notification token shared by an interrupt registration and its consumers.
///
/// Cloning yields another handle to the same token.
#[derive(Clone)]
pub struct ScanToken(Arc<TokenInner>);

impl ScanToken {
    pub fn new() -> Self {
        Self(Arc::new(TokenInner {
            raised: AtomicU64::new(0),
            lock: Mutex::new(()),
            cond: Condvar::new(),
            listeners: RwLock::new(Vec::new()),
        }))
    }

    /// Requests a scan from every consumer of this token.
    pub fn raise(&self) {
        self.0.raised.fetch_add(1, Ordering::AcqRel);

        let listeners = self.0.listeners.read().clone();
        for listener in listeners {
            listener();
        }

        let _guard = self.0.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.0.cond.notify_all();
    }

    /// Number of raises so far.
    #[inline]
    pub fn raised(&self) -> u64 {
        self.0.raised.load(Ordering::Acquire)
    }

    /// Adds a listener called on the raising thread.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.0.listeners.write().push(Arc::new(listener));
    }

    /// Blocks until the raise count exceeds `seen` or `timeout` expires.
    ///
    /// Returns the new count, or `None` on timeout.
    pub fn wait_beyond(&self, seen: u64, timeout: Duration) -> Option<u64> {
        let guard = self.0.lock.lock().unwrap_or_else(|e| e.into_inner());
        let (_guard, result) = self
            .0
            .cond
            .wait_timeout_while(guard, timeout, |_| self.raised() <= seen)
            .unwrap_or_else(|e| e.into_inner());
        if result.timed_out() && self.raised() <= seen {
            None
        } else {
            Some(self.raised())
        }
    }

    /// Whether both handles refer to the same token.
    #[inline]
    pub fn same_as(&self, other: &ScanToken) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for ScanToken {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ScanToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScanToken")
            .field("raised", &self.raised())
            .field("listeners", &self.0.listeners.read().len())
            .finish()
    }
}
