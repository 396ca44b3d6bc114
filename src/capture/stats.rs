//! Counters describing what a capture run saw on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-run capture statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureStats {
    /// Attempts to open the serial port
    pub connect_attempts: u64,
    /// Non-empty lines seen before the header and discarded
    pub noise_lines: u64,
    /// Lines written to the session file, header excluded
    pub recorded_lines: u64,
    /// When the run started
    pub started_at: DateTime<Utc>,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self {
            connect_attempts: 0,
            noise_lines: 0,
            recorded_lines: 0,
            started_at: Utc::now(),
        }
    }

    /// Record an attempt to open the port.
    pub fn record_connect_attempt(&mut self) {
        self.connect_attempts += 1;
    }

    /// Record a line ignored while waiting for the header.
    pub fn record_noise_line(&mut self) {
        self.noise_lines += 1;
    }

    /// Record a line appended to the session file.
    pub fn record_line(&mut self) {
        self.recorded_lines += 1;
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        format!(
            "Capture Statistics:\n\
             - Connection attempts: {}\n\
             - Lines ignored before header: {}\n\
             - Lines recorded: {}\n\
             - Run duration: {} seconds",
            self.connect_attempts,
            self.noise_lines,
            self.recorded_lines,
            (Utc::now() - self.started_at).num_seconds()
        )
    }
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}
