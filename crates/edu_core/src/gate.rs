//! Single-slot completion handoff between interrupt and process context.
//!
//! The interrupt handler sets the pending flag and wakes every waiter; a
//! waiter consumes the flag with a compare-exchange from 1 to 0 and returns.
//! The flag is examined and the wait registered while holding the gate's
//! mutex, and the setter takes the same mutex before notifying, so a signal
//! that lands between the check and the block is never lost.
//!
//! The gate does not serialize consumers. With more than one waiter, exactly
//! one of them consumes a given completion and the rest go back to sleep;
//! which one wins is unspecified.

use crate::error::{EduError, Result};
use log::warn;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Counters describing the traffic through a gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateStats {
    /// Completions signalled by the interrupt handler.
    pub signals: u64,

    /// Completions consumed by waiters.
    pub consumed: u64,

    /// Completions that arrived while the previous one was still pending.
    pub overruns: u64,
}

/// Single-slot handoff of completions from the interrupt handler to a
/// blocked consumer.
pub struct CompletionGate {
    pending: AtomicU32,
    closed: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
    signals: AtomicU64,
    consumed: AtomicU64,
    overruns: AtomicU64,
}

impl Default for CompletionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionGate {
    pub fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
            signals: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        }
    }

    /// Blocks until a completion is pending, consumes it and returns.
    ///
    /// The calling thread sleeps on the condition variable while waiting; it
    /// does not spin.
    ///
    /// # Errors
    ///
    /// [`EduError::Cancelled`] once the gate has been closed, whether the
    /// caller was already blocked or arrives afterwards.
    pub fn await_completion(&self) -> Result<()> {
        let mut guard = self.lock.lock();
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(EduError::Cancelled);
            }
            if self
                .pending
                .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.consumed.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            self.cond.wait(&mut guard);
        }
    }

    /// Marks a completion pending and wakes every waiter.
    ///
    /// Called from the interrupt handler. The critical section is a store and
    /// a notify; it never waits on a consumer.
    pub fn signal_completion(&self) {
        let _guard = self.lock.lock();
        if self.pending.swap(1, Ordering::AcqRel) != 0 {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            warn!("edu: completion overrun, previous completion was never consumed");
        }
        self.signals.fetch_add(1, Ordering::Relaxed);
        self.cond.notify_all();
    }

    /// Closes the gate and releases every waiter with `Cancelled`.
    pub fn close(&self) {
        let _guard = self.lock.lock();
        self.closed.store(true, Ordering::Release);
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns true while a signalled completion has not been consumed.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire) != 0
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            signals: self.signals.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pending_completion_is_consumed_without_blocking() {
        let gate = CompletionGate::new();
        gate.signal_completion();
        assert!(gate.is_pending());
        gate.await_completion().unwrap();
        assert!(!gate.is_pending());
        assert_eq!(
            gate.stats(),
            GateStats {
                signals: 1,
                consumed: 1,
                overruns: 0
            }
        );
    }

    #[test]
    fn waiter_blocks_until_signalled() {
        let gate = Arc::new(CompletionGate::new());
        let (tx, rx) = mpsc::channel();
        let waiter = {
            let gate = gate.clone();
            thread::spawn(move || {
                let result = gate.await_completion();
                tx.send(()).unwrap();
                result
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        gate.signal_completion();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap().unwrap();
        assert!(!gate.is_pending());
    }

    #[test]
    fn close_releases_blocked_waiters() {
        let gate = Arc::new(CompletionGate::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = gate.clone();
                thread::spawn(move || gate.await_completion())
            })
            .collect();
        thread::sleep(Duration::from_millis(50));
        gate.close();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Err(EduError::Cancelled));
        }
        assert_eq!(gate.await_completion(), Err(EduError::Cancelled));
    }

    #[test]
    fn one_completion_wakes_exactly_one_of_two_waiters() {
        let gate = Arc::new(CompletionGate::new());
        let (tx, rx) = mpsc::channel();
        for _ in 0..2 {
            let gate = gate.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                if gate.await_completion().is_ok() {
                    let _ = tx.send(());
                }
            });
        }
        thread::sleep(Duration::from_millis(50));
        gate.signal_completion();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        gate.close();
    }

    #[test]
    fn second_signal_before_consumption_is_an_overrun() {
        let gate = CompletionGate::new();
        gate.signal_completion();
        gate.signal_completion();
        assert_eq!(gate.stats().overruns, 1);
        gate.await_completion().unwrap();
        assert!(!gate.is_pending());
    }
}
