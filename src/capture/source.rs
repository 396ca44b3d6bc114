//! Capability seams for the capture loop: line sources, port opening,
//! time and cancellation.
//!
//! The capture state machine only talks to these traits, so it can be driven
//! by a real serial port or by an in-memory stream in tests.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// A line-oriented text stream with bounded blocking reads.
pub trait LineSource {
    /// Read one line without its terminator.
    ///
    /// Returns `Ok(None)` when no complete line arrived within the source's
    /// read timeout, and `Err` when the stream is gone.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// The port could not be opened; the caller retries.
#[derive(Debug, Error)]
#[error("port {port} unavailable: {reason}")]
pub struct PortUnavailable {
    pub port: String,
    pub reason: String,
}

/// Opens line sources for a port name and baud rate.
pub trait PortOpener {
    type Source: LineSource;

    fn open(&mut self, port: &str, baud: u32) -> Result<Self::Source, PortUnavailable>;
}

/// Monotonic time plus the ability to wait.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Wall-clock implementation backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Operator cancellation, shared with a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Line source fed from a channel, e.g. by a thread replaying a device.
pub struct ChannelLineSource {
    receiver: Receiver<String>,
    timeout: Duration,
}

impl ChannelLineSource {
    pub fn new(receiver: Receiver<String>, timeout: Duration) -> Self {
        Self { receiver, timeout }
    }
}

impl LineSource for ChannelLineSource {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        match self.receiver.recv_timeout(self.timeout) {
            Ok(line) => Ok(Some(line)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "line channel disconnected",
            )),
        }
    }
}

/// Hands out one prepared [`ChannelLineSource`]; later opens fail.
pub struct ChannelOpener {
    source: Option<ChannelLineSource>,
}

impl ChannelOpener {
    pub fn new(source: ChannelLineSource) -> Self {
        Self {
            source: Some(source),
        }
    }
}

impl PortOpener for ChannelOpener {
    type Source = ChannelLineSource;

    fn open(&mut self, port: &str, _baud: u32) -> Result<Self::Source, PortUnavailable> {
        self.source.take().ok_or_else(|| PortUnavailable {
            port: port.to_string(),
            reason: "channel already consumed".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_channel_source_timeout_and_disconnect() {
        let (tx, rx) = unbounded();
        let mut source = ChannelLineSource::new(rx, Duration::from_millis(5));

        tx.send("t_ms,a,label".to_string()).unwrap();
        assert_eq!(source.read_line().unwrap().as_deref(), Some("t_ms,a,label"));
        assert_eq!(source.read_line().unwrap(), None);

        drop(tx);
        let err = source.read_line().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_channel_opener_single_use() {
        let (_tx, rx) = unbounded();
        let mut opener = ChannelOpener::new(ChannelLineSource::new(rx, Duration::ZERO));
        assert!(opener.open("sim", 115_200).is_ok());
        assert!(opener.open("sim", 115_200).is_err());
    }

    #[test]
    fn test_cancel_flag_shared() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_cancelled());
        handle.cancel();
        assert!(flag.is_cancelled());
    }
}
