//! Process-wide coordination: shutdown signal, trace configuration.
//!
//! Grounded on `procedures/runtime.rs`'s shared-state-plus-condvar shape.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared across every reader/analyzer/writer thread. Any thread observing
/// a fatal error calls `shutdown()`; the main thread blocks on `wait()` and
/// exits once it fires.
pub struct Runtime {
    shutdown: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl Runtime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shutdown: AtomicBool::new(false),
            lock: Mutex::new(()),
            cv: Condvar::new(),
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.cv.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Blocks the calling thread until `shutdown()` is called elsewhere.
    pub fn wait(&self) {
        let mut guard = self.lock.lock();
        while !self.is_shutdown() {
            self.cv.wait(&mut guard);
        }
    }

    /// Installs SIGINT/SIGTERM handlers that call `shutdown()`.
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let rt = Arc::clone(self);
        unsafe {
            SIGNAL_RUNTIME = Some(rt);
            libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
        }
    }
}

static mut SIGNAL_RUNTIME: Option<Arc<Runtime>> = None;

extern "C" fn handle_signal(_sig: libc::c_int) {
    // Signal-safe: only touches an atomic and wakes a condvar, no
    // allocation or locking of non-async-signal-safe structures.
    unsafe {
        if let Some(rt) = (*std::ptr::addr_of!(SIGNAL_RUNTIME)).as_ref() {
            rt.shutdown.store(true, Ordering::SeqCst);
        }
    }
}
