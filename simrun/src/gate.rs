//! Readiness gate between discovery and every phase that needs its result.
//!
//! Waiters first spin for a bounded number of iterations, which keeps the
//! common case (discovery already finished) free of any blocking, then park on
//! a condition variable until the gate opens, the wait times out, or the run
//! is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::DiscoveryError;

/// Cooperative cancellation flag shared between the coordinator and its callers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ReadinessGate {
    ready: AtomicBool,
    lock: Mutex<bool>,
    cond: Condvar,
    spin_limit: u32,
}

impl ReadinessGate {
    pub fn new(spin_limit: u32) -> Self {
        Self {
            ready: AtomicBool::new(false),
            lock: Mutex::new(false),
            cond: Condvar::new(),
            spin_limit,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Open the gate. Returns `false` if it was already open.
    pub fn mark_ready(&self) -> bool {
        let mut ready = self.guard();
        if *ready {
            return false;
        }
        *ready = true;
        self.ready.store(true, Ordering::Release);
        self.cond.notify_all();
        true
    }

    /// Wake every waiter so it re-checks cancellation.
    pub fn interrupt(&self) {
        // Taking the lock orders the wake-up after any in-progress check.
        let _guard = self.guard();
        self.cond.notify_all();
    }

    /// Block until the gate opens.
    pub fn wait(&self, timeout: Duration, cancel: &CancelToken) -> Result<(), DiscoveryError> {
        for _ in 0..self.spin_limit {
            if self.is_ready() {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            std::hint::spin_loop();
        }

        debug!(timeout_ms = timeout.as_millis() as u64, "waiting for discovery");
        let deadline = Instant::now() + timeout;
        let mut ready = self.guard();
        loop {
            if *ready {
                return Ok(());
            }
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(timeout_ms = timeout.as_millis() as u64, "discovery wait timed out");
                return Err(DiscoveryError::Timeout(timeout));
            }
            ready = self
                .cond
                .wait_timeout(ready, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn guard(&self) -> MutexGuard<'_, bool> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn open_gate_returns_immediately() {
        let gate = ReadinessGate::new(16);
        assert!(gate.mark_ready());
        gate.wait(Duration::from_millis(1), &CancelToken::new())
            .expect("ready");
    }

    #[test]
    fn mark_ready_only_transitions_once() {
        let gate = ReadinessGate::new(0);
        assert!(gate.mark_ready());
        assert!(!gate.mark_ready());
        assert!(gate.is_ready());
    }

    #[test]
    fn waiter_blocks_until_marked_ready() {
        let gate = Arc::new(ReadinessGate::new(0));
        let opener = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                gate.mark_ready();
            })
        };
        gate.wait(Duration::from_secs(5), &CancelToken::new())
            .expect("ready");
        assert!(gate.is_ready());
        opener.join().expect("join");
    }

    #[test]
    fn wait_times_out_when_never_ready() {
        let gate = ReadinessGate::new(4);
        let err = gate
            .wait(Duration::from_millis(20), &CancelToken::new())
            .expect_err("timeout");
        assert!(matches!(err, DiscoveryError::Timeout(_)));
    }

    #[test]
    fn cancellation_wakes_waiter() {
        let gate = Arc::new(ReadinessGate::new(0));
        let cancel = CancelToken::new();
        let canceller = {
            let gate = Arc::clone(&gate);
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                cancel.cancel();
                gate.interrupt();
            })
        };
        let err = gate
            .wait(Duration::from_secs(30), &cancel)
            .expect_err("cancelled");
        assert!(matches!(err, DiscoveryError::Cancelled));
        canceller.join().expect("join");
    }
}
