// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// An auto-resetting wait handle. A worker parks on `wait` until another thread calls `set`.
/// Each `set` releases at most one waiter, and a `set` with nobody waiting is remembered
/// until the next `wait`.
pub struct Signal {
    /// True while a set has not yet been consumed by a waiter.
    signaled: Mutex<bool>,
    /// The condvar handles notification of waiters.
    condvar: Condvar,
}

impl Signal {
    /// Creates a new, unset signal.
    pub fn new() -> Signal {
        Signal {
            signaled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until the signal is set, then resets it.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.condvar.wait(&mut signaled);
        }
        *signaled = false;
    }

    /// Blocks until the signal is set or the timeout elapses. Returns true if the signal was
    /// consumed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.condvar.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *signaled, false)
    }

    /// Sets the signal, waking one waiter if there is one.
    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_one();
    }

    /// Returns true if the signal is set and has not been consumed.
    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn test_signal_releases_waiter() {
        let signal = Arc::new(Signal::new());
        assert!(!signal.is_set());

        let join = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait())
        };

        signal.set();
        assert!(join.join().is_ok());
        assert!(!signal.is_set());
    }

    #[test]
    fn test_signal_set_before_wait_is_remembered() {
        let signal = Signal::new();
        signal.set();
        assert!(signal.is_set());

        // Should return immediately and consume the signal.
        signal.wait();
        assert!(!signal.is_set());
    }

    #[test]
    fn test_signal_wait_timeout() {
        let signal = Signal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));

        signal.set();
        assert!(signal.wait_timeout(Duration::from_millis(10)));
        assert!(!signal.is_set());
    }
}
