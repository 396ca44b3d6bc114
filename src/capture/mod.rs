//! Session capture from the wearable's serial stream.
//!
//! The device prints free-form status text, then a CSV header whose first
//! field is `t_ms`, then one CSV row per sample. Capture waits for the port,
//! waits for the header, records for a fixed duration and keeps the file only
//! if that duration was reached.

pub mod serial;
pub mod service;
pub mod source;
pub mod stats;
pub mod types;

// Re-export commonly used types
pub use serial::{available_ports, SerialLineSource, SerialOpener};
pub use service::{is_header_line, session_file_name, SessionCaptureService};
pub use source::{
    CancelFlag, ChannelLineSource, ChannelOpener, Clock, LineSource, PortOpener, PortUnavailable,
    SystemClock,
};
pub use stats::CaptureStats;
pub use types::{CaptureError, CaptureOutcome, CapturePhase, IncompleteSession, SavedSession};
