//! Capture states, outcomes and errors.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Observable phase of the capture state machine.
///
/// `WaitingForPort → WaitingForHeader → Recording → {Saved | Discarded}`;
/// only `Recording → Saved` keeps the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    WaitingForPort,
    WaitingForHeader,
    Recording,
    Saved,
    Discarded,
}

/// A session that ran for the full duration and was kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSession {
    pub path: PathBuf,
    /// The header line that opened the session
    pub header: String,
    /// Data lines written after the header
    pub lines: u64,
    /// Time from header to stop
    pub elapsed: Duration,
}

/// Why a capture produced no file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IncompleteSession {
    #[error("header never received")]
    NoHeader,

    #[error("stopped manually after {:.1}s of {:.0}s", .elapsed.as_secs_f64(), .required.as_secs_f64())]
    Interrupted { elapsed: Duration, required: Duration },

    #[error("connection lost after {:.1}s of {:.0}s", .elapsed.as_secs_f64(), .required.as_secs_f64())]
    ConnectionLost { elapsed: Duration, required: Duration },
}

/// Final disposition of one capture run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Saved(SavedSession),
    Discarded(IncompleteSession),
}

impl CaptureOutcome {
    pub fn phase(&self) -> CapturePhase {
        match self {
            CaptureOutcome::Saved(_) => CapturePhase::Saved,
            CaptureOutcome::Discarded(_) => CapturePhase::Discarded,
        }
    }

    pub fn into_result(self) -> Result<SavedSession, IncompleteSession> {
        match self {
            CaptureOutcome::Saved(saved) => Ok(saved),
            CaptureOutcome::Discarded(reason) => Err(reason),
        }
    }
}

/// Failures that end a capture run abnormally.
///
/// Port unavailability is not here: it is retried until cancelled.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("could not create session file {path:?}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write session file {path:?}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_session_message() {
        let reason = IncompleteSession::Interrupted {
            elapsed: Duration::from_millis(45_300),
            required: Duration::from_secs(120),
        };
        assert_eq!(reason.to_string(), "stopped manually after 45.3s of 120s");
    }

    #[test]
    fn test_outcome_phase() {
        let outcome = CaptureOutcome::Discarded(IncompleteSession::NoHeader);
        assert_eq!(outcome.phase(), CapturePhase::Discarded);
        assert_eq!(outcome.into_result(), Err(IncompleteSession::NoHeader));
    }
}
