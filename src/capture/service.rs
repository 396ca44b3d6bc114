//! Session capture state machine.
//!
//! A session is only kept when a header line was seen and recording then ran
//! for the full configured duration. Anything shorter is deleted, never
//! truncated and kept.

use crate::capture::source::{CancelFlag, Clock, LineSource, PortOpener};
use crate::capture::stats::CaptureStats;
use crate::capture::types::{
    CaptureError, CaptureOutcome, CapturePhase, IncompleteSession, SavedSession,
};
use crate::config::PipelineConfig;
use crate::core::session::TIME_COLUMN;
use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// True when the first comma-separated field is the literal `t_ms`.
pub fn is_header_line(line: &str) -> bool {
    line.split(',').next().map(str::trim) == Some(TIME_COLUMN)
}

/// File name for a session started now, e.g. `session_20240131_142501.csv`.
pub fn session_file_name() -> String {
    Local::now().format("session_%Y%m%d_%H%M%S.csv").to_string()
}

/// Attempts at a free file name before giving up.
const MAX_NAME_SUFFIX: u32 = 100;

/// An output file that is deleted unless explicitly kept.
struct SessionFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SessionFile {
    /// Create `name` in `dir` without touching existing files; a taken name
    /// gets a `_1`, `_2`, ... suffix before the extension.
    fn create_new(dir: &Path, name: &str) -> Result<Self, CaptureError> {
        let (stem, ext) = name.rsplit_once('.').unwrap_or((name, "csv"));

        let mut suffix = 0u32;
        loop {
            let path = if suffix == 0 {
                dir.join(name)
            } else {
                dir.join(format!("{stem}_{suffix}.{ext}"))
            };

            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    return Ok(Self {
                        path,
                        writer: BufWriter::new(file),
                    })
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::AlreadyExists
                        && suffix < MAX_NAME_SUFFIX =>
                {
                    debug!("{} exists, trying next name", path.display());
                    suffix += 1;
                }
                Err(source) => return Err(CaptureError::CreateFile { path, source }),
            }
        }
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")
    }

    fn keep(mut self) -> std::io::Result<PathBuf> {
        self.writer.flush()?;
        Ok(self.path)
    }

    fn discard(self) {
        let SessionFile { path, writer } = self;
        drop(writer);
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Could not delete {}: {e}", path.display());
        } else {
            info!("Discarded {}", path.display());
        }
    }
}

/// Internal state; the variants carry whatever each phase owns.
enum State<S> {
    WaitingForPort,
    WaitingForHeader {
        source: S,
    },
    Recording {
        source: S,
        file: SessionFile,
        header: String,
        started_at: Duration,
        lines: u64,
    },
    Done(CaptureOutcome),
}

impl<S> State<S> {
    fn phase(&self) -> CapturePhase {
        match self {
            State::WaitingForPort => CapturePhase::WaitingForPort,
            State::WaitingForHeader { .. } => CapturePhase::WaitingForHeader,
            State::Recording { .. } => CapturePhase::Recording,
            State::Done(outcome) => outcome.phase(),
        }
    }
}

/// Records one complete session from a line-oriented device stream.
pub struct SessionCaptureService<O: PortOpener, C: Clock> {
    port: String,
    baud: u32,
    duration: Duration,
    retry_backoff: Duration,
    output_dir: PathBuf,
    opener: O,
    clock: C,
    cancel: CancelFlag,
    stats: CaptureStats,
}

impl<O: PortOpener, C: Clock> SessionCaptureService<O, C> {
    pub fn new(config: &PipelineConfig, opener: O, clock: C, cancel: CancelFlag) -> Self {
        Self {
            port: config.port.clone(),
            baud: config.baud,
            duration: config.session_duration,
            retry_backoff: config.retry_backoff,
            output_dir: config.data_dir.clone(),
            opener,
            clock,
            cancel,
            stats: CaptureStats::new(),
        }
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Run the capture until the session is saved, discarded or cancelled.
    ///
    /// Blocks: port retries and reads never give up on their own.
    pub fn capture(&mut self) -> Result<CaptureOutcome, CaptureError> {
        let mut state: State<O::Source> = State::WaitingForPort;
        let mut phase = state.phase();

        loop {
            state = match state {
                State::Done(outcome) => {
                    match &outcome {
                        CaptureOutcome::Saved(saved) => info!(
                            "Saved {} ({} lines, {:.1}s)",
                            saved.path.display(),
                            saved.lines,
                            saved.elapsed.as_secs_f64()
                        ),
                        CaptureOutcome::Discarded(reason) => {
                            warn!("Session discarded: {reason}")
                        }
                    }
                    return Ok(outcome);
                }
                State::WaitingForPort => self.wait_for_port(),
                State::WaitingForHeader { source } => self.wait_for_header(source)?,
                State::Recording {
                    source,
                    file,
                    header,
                    started_at,
                    lines,
                } => self.record(source, file, header, started_at, lines)?,
            };

            let next = state.phase();
            if next != phase {
                debug!("{phase:?} -> {next:?}");
                phase = next;
            }
        }
    }

    fn wait_for_port(&mut self) -> State<O::Source> {
        if self.cancel.is_cancelled() {
            return State::Done(CaptureOutcome::Discarded(IncompleteSession::NoHeader));
        }

        self.stats.record_connect_attempt();
        match self.opener.open(&self.port, self.baud) {
            Ok(source) => {
                info!("Connected to {}", self.port);
                info!("Looking for header starting with '{TIME_COLUMN}'...");
                State::WaitingForHeader { source }
            }
            Err(e) => {
                warn!("{e}; retrying in {:.0}s", self.retry_backoff.as_secs_f64());
                self.clock.sleep(self.retry_backoff);
                State::WaitingForPort
            }
        }
    }

    fn wait_for_header(&mut self, mut source: O::Source) -> Result<State<O::Source>, CaptureError> {
        if self.cancel.is_cancelled() {
            return Ok(State::Done(CaptureOutcome::Discarded(
                IncompleteSession::NoHeader,
            )));
        }

        let line = match source.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(State::WaitingForHeader { source }),
            Err(e) => {
                warn!(
                    "Lost connection to {} before header: {e}; reconnecting in {:.0}s",
                    self.port,
                    self.retry_backoff.as_secs_f64()
                );
                self.clock.sleep(self.retry_backoff);
                return Ok(State::WaitingForPort);
            }
        };

        let line = line.trim();
        if line.is_empty() {
            return Ok(State::WaitingForHeader { source });
        }
        if !is_header_line(line) {
            debug!("Ignoring: {line}");
            self.stats.record_noise_line();
            return Ok(State::WaitingForHeader { source });
        }

        let mut file = SessionFile::create_new(&self.output_dir, &session_file_name())?;
        if let Err(source_err) = file.write_line(line) {
            let path = file.path.clone();
            file.discard();
            return Err(CaptureError::WriteFile {
                path,
                source: source_err,
            });
        }

        info!("Header: {line}");
        info!(
            "Recording {} for {:.0}s",
            file.path.display(),
            self.duration.as_secs_f64()
        );

        Ok(State::Recording {
            source,
            file,
            header: line.to_string(),
            started_at: self.clock.now(),
            lines: 0,
        })
    }

    fn record(
        &mut self,
        mut source: O::Source,
        mut file: SessionFile,
        header: String,
        started_at: Duration,
        mut lines: u64,
    ) -> Result<State<O::Source>, CaptureError> {
        // Reaching the duration wins over a pending cancellation.
        let elapsed = self.clock.now().saturating_sub(started_at);
        if elapsed >= self.duration {
            return self.keep(file, header, lines, elapsed);
        }

        if self.cancel.is_cancelled() {
            file.discard();
            return Ok(State::Done(CaptureOutcome::Discarded(
                IncompleteSession::Interrupted {
                    elapsed,
                    required: self.duration,
                },
            )));
        }

        let line = match source.read_line() {
            Ok(Some(line)) => line,
            Ok(None) => {
                return Ok(State::Recording {
                    source,
                    file,
                    header,
                    started_at,
                    lines,
                })
            }
            Err(e) => {
                warn!("Lost connection to {} while recording: {e}", self.port);
                let elapsed = self.clock.now().saturating_sub(started_at);
                file.discard();
                return Ok(State::Done(CaptureOutcome::Discarded(
                    IncompleteSession::ConnectionLost {
                        elapsed,
                        required: self.duration,
                    },
                )));
            }
        };

        // A line arriving after the deadline belongs to no session.
        let elapsed = self.clock.now().saturating_sub(started_at);
        if elapsed >= self.duration {
            return self.keep(file, header, lines, elapsed);
        }

        let line = line.trim();
        if !line.is_empty() {
            if let Err(source_err) = file.write_line(line) {
                let path = file.path.clone();
                file.discard();
                return Err(CaptureError::WriteFile {
                    path,
                    source: source_err,
                });
            }
            lines += 1;
            self.stats.record_line();
        }

        Ok(State::Recording {
            source,
            file,
            header,
            started_at,
            lines,
        })
    }

    fn keep(
        &self,
        file: SessionFile,
        header: String,
        lines: u64,
        elapsed: Duration,
    ) -> Result<State<O::Source>, CaptureError> {
        let path = file.path.clone();
        match file.keep() {
            Ok(path) => Ok(State::Done(CaptureOutcome::Saved(SavedSession {
                path,
                header,
                lines,
                elapsed,
            }))),
            Err(source) => {
                let _ = std::fs::remove_file(&path);
                Err(CaptureError::WriteFile { path, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_detection() {
        assert!(is_header_line("t_ms,pitch1,roll1,label"));
        assert!(is_header_line(" t_ms ,a"));
        assert!(is_header_line("t_ms"));
        assert!(!is_header_line("Calibration complete."));
        assert!(!is_header_line("t_msx,a"));
        assert!(!is_header_line("0,1.2,3.4,1"));
    }

    #[test]
    fn test_session_file_name_shape() {
        let name = session_file_name();
        assert!(name.starts_with("session_"));
        assert!(name.ends_with(".csv"));
        assert_eq!(name.len(), "session_20240101_000000.csv".len());
    }

    #[test]
    fn test_session_file_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let name = "session_20240101_000000.csv";
        std::fs::write(dir.path().join(name), "t_ms,a,label\n0,1,1\n").unwrap();

        let mut first = SessionFile::create_new(dir.path(), name).unwrap();
        assert_eq!(first.path, dir.path().join("session_20240101_000000_1.csv"));
        first.write_line("t_ms,a,label").unwrap();
        first.discard();

        let second = SessionFile::create_new(dir.path(), name).unwrap();
        assert_eq!(second.path, dir.path().join("session_20240101_000000_1.csv"));
        second.discard();

        let kept = std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(kept, "t_ms,a,label\n0,1,1\n");
    }
}
