use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::model::RunState;

/// Failures of the controller/worker protocol.
///
/// Structural violations of the shared-file contracts are kept apart from plain
/// I/O failures so callers can tell "the worker wrote garbage" from "the disk said no".
#[derive(Debug)]
pub enum ProtocolError {
    /// The named signal object could not be opened. Usually the worker is not running yet.
    SignalUnavailable { name: String, source: io::Error },
    /// The signal object was opened but posting or waiting on it failed.
    SignalFailed { name: String, source: io::Error },
    ConfigWriteFailed { path: PathBuf, source: io::Error },
    /// The completion-time file is absent or empty.
    TimingDataMissing { path: PathBuf },
    MalformedTiming { path: PathBuf, content: String },
    MalformedResults {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    MalformedPointsSpec { path: PathBuf, reason: String },
    Io { path: PathBuf, source: io::Error },
    RunTimedOut { waited: Duration },
    /// Cancelled by the consumer. Reported as a terminal state, not a failure.
    RunCancelled,
}

impl ProtocolError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ProtocolError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, ProtocolError::RunCancelled)
    }

    /// Terminal state a run ends in when it fails with this error.
    pub fn terminal_state(&self) -> RunState {
        match self {
            ProtocolError::RunTimedOut { .. } => RunState::TimedOut,
            ProtocolError::RunCancelled => RunState::Cancelled,
            _ => RunState::Failed,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::SignalUnavailable { name, source } => {
                write!(f, "worker not ready: signal '{name}' unavailable ({source})")
            }
            ProtocolError::SignalFailed { name, source } => {
                write!(f, "signal '{name}' failed: {source}")
            }
            ProtocolError::ConfigWriteFailed { path, source } => {
                write!(f, "failed to write config {}: {source}", path.display())
            }
            ProtocolError::TimingDataMissing { path } => {
                write!(f, "computation time missing in {}", path.display())
            }
            ProtocolError::MalformedTiming { path, content } => {
                write!(
                    f,
                    "computation time in {} is not a valid duration: {content:?}",
                    path.display()
                )
            }
            ProtocolError::MalformedResults { path, line, reason } => {
                write!(f, "malformed results {} line {line}: {reason}", path.display())
            }
            ProtocolError::MalformedPointsSpec { path, reason } => {
                write!(f, "malformed points spec {}: {reason}", path.display())
            }
            ProtocolError::Io { path, source } => {
                write!(f, "I/O error on {}: {source}", path.display())
            }
            ProtocolError::RunTimedOut { waited } => {
                write!(f, "run timed out after {}", humantime::format_duration(*waited))
            }
            ProtocolError::RunCancelled => write!(f, "run cancelled"),
        }
    }
}

impl Error for ProtocolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ProtocolError::SignalUnavailable { source, .. }
            | ProtocolError::SignalFailed { source, .. }
            | ProtocolError::ConfigWriteFailed { source, .. }
            | ProtocolError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        let timed_out = ProtocolError::RunTimedOut {
            waited: Duration::from_secs(1),
        };
        assert_eq!(timed_out.terminal_state(), RunState::TimedOut);
        assert_eq!(ProtocolError::RunCancelled.terminal_state(), RunState::Cancelled);
        assert!(ProtocolError::RunCancelled.is_cancellation());

        let missing = ProtocolError::TimingDataMissing {
            path: PathBuf::from("computation.time"),
        };
        assert_eq!(missing.terminal_state(), RunState::Failed);
        assert!(!missing.is_cancellation());
    }

    #[test]
    fn signal_unavailable_reads_as_worker_not_ready() {
        let err = ProtocolError::SignalUnavailable {
            name: "ComputeEvent".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("worker not ready"), "{msg}");
        assert!(err.source().is_some());
    }
}
