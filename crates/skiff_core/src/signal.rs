//! Shared breakpoint signal.
//!
//! The only state shared between the execution thread and trigger sources
//! (key listener, timer). Cloning yields another handle to the same flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Atomic "pause at the next instruction boundary" flag
#[derive(Debug, Clone, Default)]
pub struct BreakpointSignal {
    armed: Arc<AtomicBool>,
}

impl BreakpointSignal {
    /// Create an unset signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pause at the next instruction boundary
    pub fn arm(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// Check and clear in one step.
    ///
    /// Returns `true` to exactly one caller per arm.
    #[must_use]
    pub fn take(&self) -> bool {
        self.armed
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Clear an unobserved arm
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    /// Peek without clearing
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn test_signal_arm_take() {
        let signal = BreakpointSignal::new();
        assert!(!signal.take());
        signal.arm();
        assert!(signal.is_armed());
        assert!(signal.take());
        assert!(!signal.take());
        assert!(!signal.is_armed());
    }

    #[test]
    fn test_signal_double_arm_single_take() {
        let signal = BreakpointSignal::new();
        signal.arm();
        signal.arm();
        assert!(signal.take());
        assert!(!signal.take());
    }

    #[test]
    fn test_signal_disarm() {
        let signal = BreakpointSignal::new();
        signal.arm();
        signal.disarm();
        assert!(!signal.take());
    }

    #[test]
    fn test_signal_clones_share_state() {
        let signal = BreakpointSignal::new();
        let handle = signal.clone();
        handle.arm();
        assert!(signal.take());
        assert!(!handle.is_armed());
    }

    #[test]
    fn test_signal_concurrent_take_observed_once() {
        let signal = BreakpointSignal::new();
        signal.arm();
        let winners = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let signal = signal.clone();
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    if signal.take() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }
}
