//! One-shot signals.
//!
//! A [`Signal`] starts unset, is set at most once, and wakes every thread
//! blocked on it. Used for the mount handshake and for serve loop exit.

use parking_lot::{Condvar, Mutex};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct Signal {
    fired: Mutex<bool>,
    cvar: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal and wakes all waiters. Later calls are no-ops.
    pub fn notify(&self) {
        let mut fired = self.fired.lock();
        if !*fired {
            *fired = true;
            self.cvar.notify_all();
        }
    }

    pub fn is_set(&self) -> bool {
        *self.fired.lock()
    }

    /// Blocks until the signal is set.
    pub fn wait(&self) {
        let mut fired = self.fired.lock();
        while !*fired {
            self.cvar.wait(&mut fired);
        }
    }

    /// Blocks until the signal is set or `deadline` passes.
    ///
    /// Returns `true` if the signal was set.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut fired = self.fired.lock();
        while !*fired {
            if self.cvar.wait_until(&mut fired, deadline).timed_out() {
                return *fired;
            }
        }
        true
    }
}
