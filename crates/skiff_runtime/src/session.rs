//! Migration state machine.

use crate::config::Mode;
use skiff_core::{CoreError, CoreResult, SessionId, Snapshot};
use std::fmt;

/// Where a computation is in its migration lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationState {
    /// Nothing has run yet
    Idle,
    /// A fresh `call` is executing
    Running,
    /// The computation finished with results
    Completed,
    /// A snapshot was captured and is pending
    Paused,
    /// The pending snapshot was written to storage
    Exported,
    /// The pending snapshot was handed to the peer
    Transmitted,
    /// A snapshot is being resumed
    Resuming,
}

impl MigrationState {
    /// Check if `next` is a legal successor
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use MigrationState::*;

        matches!(
            (self, next),
            (Idle, Running | Resuming)
                | (Running | Resuming, Completed | Paused)
                | (Paused, Exported | Transmitted | Resuming)
                | (Transmitted, Resuming | Running)
        )
    }

    /// Check if an engine invocation is in flight
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Resuming)
    }

    /// Check if nothing further can happen in this process
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Exported)
    }

    /// Lowercase name for logs
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Paused => "paused",
            Self::Exported => "exported",
            Self::Transmitted => "transmitted",
            Self::Resuming => "resuming",
        }
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One computation's migration bookkeeping
#[derive(Debug, Clone)]
pub struct MigrationSession {
    mode: Mode,
    peer: Option<String>,
    session_id: SessionId,
    state: MigrationState,
    pending: Option<Snapshot>,
    received: Option<Snapshot>,
}

impl MigrationSession {
    /// Start a session in `Idle`
    #[must_use]
    pub fn new(mode: Mode, peer: Option<String>) -> Self {
        Self {
            mode,
            peer,
            session_id: SessionId::new(),
            state: MigrationState::Idle,
            pending: None,
            received: None,
        }
    }

    /// Execution mode
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Peer address, in remote mode
    #[must_use]
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// Correlation id shared with the peer
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// Move to `next`
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the edge is not legal
    pub fn transition(&mut self, next: MigrationState) -> CoreResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(CoreError::InvalidState {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(session = %self.session_id, from = %self.state, to = %next, "migration state");
        self.state = next;
        Ok(())
    }

    /// Record a captured snapshot and move to `Paused`
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if no run was in flight
    pub fn pause(&mut self, snapshot: Snapshot) -> CoreResult<()> {
        self.transition(MigrationState::Paused)?;
        self.pending = Some(snapshot);
        Ok(())
    }

    /// Take the snapshot awaiting export or transmission
    pub fn take_pending(&mut self) -> Option<Snapshot> {
        self.pending.take()
    }

    /// Accept a snapshot handed over by the peer, adopting its session id
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if a run is in flight or the session has ended
    pub fn receive(&mut self, session_id: SessionId, snapshot: Option<Snapshot>) -> CoreResult<()> {
        let next = if snapshot.is_some() {
            MigrationState::Resuming
        } else {
            MigrationState::Running
        };
        self.transition(next)?;
        self.session_id = session_id;
        self.received = snapshot;
        Ok(())
    }

    /// Take the received snapshot to resume it
    pub fn take_received(&mut self) -> Option<Snapshot> {
        self.received.take()
    }
}
