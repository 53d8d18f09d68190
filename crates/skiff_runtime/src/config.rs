//! Run configuration.
//!
//! [`RunOptions`] is the raw surface as given on the command line;
//! [`RunConfig`] is the validated, immutable form the coordinator runs with.

use crate::controller::{TriggerPolicy, TriggerSelection};
use skiff_core::{CoreError, CoreResult, Word};
use skiff_vm::{EngineConfig, Program, ProgramCatalog};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default artifact path for exported snapshots
pub const DEFAULT_EXPORT_PATH: &str = "snapshot.bin";
/// Default listen address in remote mode
pub const DEFAULT_LISTEN: &str = "0.0.0.0:50051";
/// Default deadline for peer calls
pub const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default delay between receiving `Finish` and exiting
pub const DEFAULT_FINISH_GRACE: Duration = Duration::from_millis(500);

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Run in this process only
    Local,
    /// Hand snapshots to a peer
    Remote,
}

impl FromStr for Mode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(CoreError::config(format!(
                "mode must be either local or remote, got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Unvalidated options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Program name in the catalog
    pub program: String,
    /// Entry arguments; empty means the program's defaults
    pub args: Vec<Word>,
    /// `local` or `remote`
    pub mode: String,
    /// Peer address (remote mode)
    pub peer: Option<String>,
    /// Listen address (remote mode)
    pub listen: Option<String>,
    /// Trigger policy choices
    pub trigger: TriggerSelection,
    /// Artifact to resume from
    pub from_snapshot: Option<PathBuf>,
    /// Write the first capture to storage and stop
    pub export_only: bool,
    /// Where exported artifacts go
    pub export_path: Option<PathBuf>,
    /// Begin a run without waiting for a hand-off (remote mode)
    pub start_immediately: bool,
    /// Deadline for each peer call
    pub transport_timeout: Option<Duration>,
    /// Delay before exiting after `Finish`
    pub finish_grace: Option<Duration>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            program: "fib".to_string(),
            args: Vec::new(),
            mode: "local".to_string(),
            peer: None,
            listen: None,
            trigger: TriggerSelection::default(),
            from_snapshot: None,
            export_only: false,
            export_path: None,
            start_immediately: false,
            transport_timeout: None,
            finish_grace: None,
        }
    }
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Program to run
    pub program: Program,
    /// Resolved entry arguments
    pub args: Vec<Word>,
    /// Execution mode
    pub mode: Mode,
    /// Peer address (always set in remote mode)
    pub peer: Option<String>,
    /// Listen address
    pub listen: String,
    /// Active trigger policy
    pub trigger: TriggerPolicy,
    /// Artifact to resume from
    pub from_snapshot: Option<PathBuf>,
    /// Write the first capture to storage and stop
    pub export_only: bool,
    /// Where exported artifacts go
    pub export_path: PathBuf,
    /// Begin a run without waiting for a hand-off
    pub start_immediately: bool,
    /// Deadline for each peer call
    pub transport_timeout: Duration,
    /// Delay before exiting after `Finish`
    pub finish_grace: Duration,
    /// Interpreter limits
    pub engine: EngineConfig,
}

impl RunConfig {
    /// Validate options against the built-in program catalog
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown mode or program,
    /// conflicting trigger policies, or options that do not apply to the mode
    pub fn from_options(options: RunOptions) -> CoreResult<Self> {
        Self::from_options_in(options, &ProgramCatalog::builtin()?)
    }

    /// Validate options against a specific catalog
    ///
    /// # Errors
    ///
    /// See [`RunConfig::from_options`]
    pub fn from_options_in(options: RunOptions, catalog: &ProgramCatalog) -> CoreResult<Self> {
        let trigger = options.trigger.into_policy()?;
        let mode: Mode = options.mode.parse()?;

        match mode {
            Mode::Local => {
                if options.start_immediately {
                    return Err(CoreError::config("set mode to remote to use start"));
                }
            }
            Mode::Remote => {
                if options.export_only {
                    return Err(CoreError::config("export is only available in local mode"));
                }
                if options.peer.as_deref().is_none_or(|p| p.trim().is_empty()) {
                    return Err(CoreError::config("remote mode requires a peer address"));
                }
            }
        }

        let program = catalog.lookup(&options.program)?.clone();
        let args = program.resolve_args(&options.args)?;

        Ok(Self {
            program,
            args,
            mode,
            peer: options.peer,
            listen: options.listen.unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
            trigger,
            from_snapshot: options.from_snapshot,
            export_only: options.export_only,
            export_path: options
                .export_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_PATH)),
            start_immediately: options.start_immediately,
            transport_timeout: options.transport_timeout.unwrap_or(DEFAULT_TRANSPORT_TIMEOUT),
            finish_grace: options.finish_grace.unwrap_or(DEFAULT_FINISH_GRACE),
            engine: EngineConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> RunOptions {
        RunOptions {
            mode: "remote".to_string(),
            peer: Some("127.0.0.1:50052".to_string()),
            ..RunOptions::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::from_options(RunOptions::default()).unwrap();
        assert_eq!(config.mode, Mode::Local);
        assert_eq!(config.program.name(), "fib");
        assert_eq!(config.args, vec![9]);
        assert_eq!(config.trigger, TriggerPolicy::None);
        assert_eq!(config.export_path, PathBuf::from("snapshot.bin"));
        assert_eq!(config.transport_timeout, Duration::from_secs(10));
        assert_eq!(config.finish_grace, Duration::from_millis(500));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("remote".parse::<Mode>().unwrap(), Mode::Remote);
        let err = "cloud".parse::<Mode>().unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn test_unknown_program() {
        let options = RunOptions {
            program: "cat".to_string(),
            ..RunOptions::default()
        };
        assert_eq!(RunConfig::from_options(options).unwrap_err().kind(), "configuration");
    }

    #[test]
    fn test_conflicting_triggers() {
        let options = RunOptions {
            trigger: TriggerSelection {
                manual: true,
                timeout: Some(Duration::from_secs(1)),
                step_all: false,
            },
            ..RunOptions::default()
        };
        assert_eq!(RunConfig::from_options(options).unwrap_err().kind(), "configuration");
    }

    #[test]
    fn test_start_requires_remote() {
        let options = RunOptions {
            start_immediately: true,
            ..RunOptions::default()
        };
        assert!(RunConfig::from_options(options).is_err());

        let options = RunOptions {
            start_immediately: true,
            ..remote()
        };
        assert!(RunConfig::from_options(options).unwrap().start_immediately);
    }

    #[test]
    fn test_export_requires_local() {
        let options = RunOptions {
            export_only: true,
            ..remote()
        };
        assert!(RunConfig::from_options(options).is_err());
    }

    #[test]
    fn test_remote_requires_peer() {
        let options = RunOptions {
            peer: None,
            ..remote()
        };
        assert!(RunConfig::from_options(options).is_err());
        assert_eq!(RunConfig::from_options(remote()).unwrap().listen, "0.0.0.0:50051");
    }

    #[test]
    fn test_explicit_args() {
        let options = RunOptions {
            program: "ackermann".to_string(),
            args: vec![1, 2],
            ..RunOptions::default()
        };
        assert_eq!(RunConfig::from_options(options).unwrap().args, vec![1, 2]);
    }
}
