//! Breakpoint controller.
//!
//! Owns the [`BreakpointSignal`] shared with the engine and applies the
//! configured trigger policy at the start of every invocation.

use skiff_core::{BreakpointSignal, CoreError, CoreResult};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// When the breakpoint is armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerPolicy {
    /// Never armed by policy
    #[default]
    None,
    /// Armed by the `snapshot-now` key action
    Manual,
    /// Armed once, the given time after a run starts
    Timeout(Duration),
    /// Armed before every run, so each invocation executes one instruction
    StepAll,
}

impl TriggerPolicy {
    /// Check if runs wait for key actions
    #[must_use]
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

impl fmt::Display for TriggerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Manual => write!(f, "manual"),
            Self::Timeout(after) => write!(f, "timeout({}ms)", after.as_millis()),
            Self::StepAll => write!(f, "step-all"),
        }
    }
}

/// Raw trigger choices as given by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerSelection {
    /// Keyboard-driven snapshots
    pub manual: bool,
    /// Snapshot after this long
    pub timeout: Option<Duration>,
    /// Snapshot after every instruction
    pub step_all: bool,
}

impl TriggerSelection {
    /// Resolve to a single policy
    ///
    /// # Errors
    ///
    /// Returns a configuration error if more than one policy is selected or
    /// the timeout is zero
    pub fn into_policy(self) -> CoreResult<TriggerPolicy> {
        let mut selected = Vec::new();
        if self.manual {
            selected.push(TriggerPolicy::Manual);
        }
        if let Some(after) = self.timeout {
            if after.is_zero() {
                return Err(CoreError::config("snapshot timeout must be greater than zero"));
            }
            selected.push(TriggerPolicy::Timeout(after));
        }
        if self.step_all {
            selected.push(TriggerPolicy::StepAll);
        }

        match selected.as_slice() {
            [] => Ok(TriggerPolicy::None),
            [policy] => Ok(*policy),
            many => Err(CoreError::config(format!(
                "only one trigger policy may be active, got {}",
                many.iter().map(ToString::to_string).collect::<Vec<_>>().join(" and ")
            ))),
        }
    }
}

/// Applies a trigger policy to the breakpoint signal
#[derive(Debug, Clone)]
pub struct BreakpointController {
    policy: TriggerPolicy,
    signal: BreakpointSignal,
}

impl BreakpointController {
    /// Create a controller with its own signal
    #[must_use]
    pub fn new(policy: TriggerPolicy) -> Self {
        Self::with_signal(policy, BreakpointSignal::new())
    }

    /// Create a controller around an existing signal
    #[must_use]
    pub fn with_signal(policy: TriggerPolicy, signal: BreakpointSignal) -> Self {
        Self { policy, signal }
    }

    /// Active policy
    #[must_use]
    pub fn policy(&self) -> TriggerPolicy {
        self.policy
    }

    /// Signal handle to give to the engine
    #[must_use]
    pub fn signal(&self) -> &BreakpointSignal {
        &self.signal
    }

    /// Arm now: the next instruction boundary captures
    pub fn request(&self) {
        tracing::debug!("breakpoint requested");
        self.signal.arm();
    }

    /// Apply the policy for one invocation.
    ///
    /// Must be called inside a tokio runtime when the policy is a timeout.
    #[must_use = "dropping the guard cancels the trigger"]
    pub fn begin_run(&self) -> TriggerGuard {
        let timer = match self.policy {
            TriggerPolicy::StepAll => {
                self.signal.arm();
                None
            }
            TriggerPolicy::Timeout(after) => {
                let cancel = CancellationToken::new();
                let token = cancel.clone();
                let signal = self.signal.clone();
                let handle = tokio::spawn(async move {
                    tokio::select! {
                        () = token.cancelled() => {}
                        () = tokio::time::sleep(after) => {
                            tracing::debug!(after_ms = after.as_millis() as u64, "snapshot timeout elapsed");
                            signal.arm();
                        }
                    }
                });
                Some((cancel, handle))
            }
            TriggerPolicy::Manual | TriggerPolicy::None => None,
        };
        TriggerGuard {
            signal: self.signal.clone(),
            timer,
        }
    }
}

/// Trigger state for one invocation; cancels it on drop
#[derive(Debug)]
pub struct TriggerGuard {
    signal: BreakpointSignal,
    timer: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Drop for TriggerGuard {
    fn drop(&mut self) {
        if let Some((cancel, handle)) = self.timer.take() {
            cancel.cancel();
            handle.abort();
        }
        self.signal.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_none() {
        assert_eq!(TriggerSelection::default().into_policy().unwrap(), TriggerPolicy::None);
    }

    #[test]
    fn test_selection_single() {
        let selection = TriggerSelection {
            timeout: Some(Duration::from_secs(2)),
            ..TriggerSelection::default()
        };
        assert_eq!(
            selection.into_policy().unwrap(),
            TriggerPolicy::Timeout(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_selection_conflict() {
        let selection = TriggerSelection {
            manual: true,
            timeout: Some(Duration::from_secs(1)),
            step_all: false,
        };
        let err = selection.into_policy().unwrap_err();
        assert_eq!(err.kind(), "configuration");
        assert!(err.to_string().contains("manual and timeout(1000ms)"));
    }

    #[test]
    fn test_selection_zero_timeout() {
        let selection = TriggerSelection {
            timeout: Some(Duration::ZERO),
            ..TriggerSelection::default()
        };
        assert!(selection.into_policy().is_err());
    }

    #[test]
    fn test_step_all_arms_and_guard_disarms() {
        let controller = BreakpointController::new(TriggerPolicy::StepAll);
        let guard = controller.begin_run();
        assert!(controller.signal().is_armed());
        drop(guard);
        assert!(!controller.signal().is_armed());
    }

    #[test]
    fn test_manual_does_not_arm() {
        let controller = BreakpointController::new(TriggerPolicy::Manual);
        let _guard = controller.begin_run();
        assert!(!controller.signal().is_armed());
        controller.request();
        assert!(controller.signal().take());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_arms_after_duration() {
        let controller = BreakpointController::new(TriggerPolicy::Timeout(Duration::from_millis(200)));
        let _guard = controller.begin_run();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!controller.signal().is_armed());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(controller.signal().is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancelled_by_guard() {
        let controller = BreakpointController::new(TriggerPolicy::Timeout(Duration::from_millis(100)));
        drop(controller.begin_run());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!controller.signal().is_armed());
    }
}
