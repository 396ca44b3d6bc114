//! Serial port backend for session capture.

use crate::capture::source::{LineSource, PortOpener, PortUnavailable};
use serialport::SerialPort;
use std::io::{self, BufRead, BufReader, Read};
use std::time::Duration;

/// Opens serial ports with a bounded per-read timeout.
#[derive(Debug, Clone)]
pub struct SerialOpener {
    read_timeout: Duration,
}

impl SerialOpener {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl PortOpener for SerialOpener {
    type Source = SerialLineSource;

    fn open(&mut self, port: &str, baud: u32) -> Result<Self::Source, PortUnavailable> {
        let handle = serialport::new(port, baud)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| PortUnavailable {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        Ok(SerialLineSource::new(handle))
    }
}

/// Newline-delimited text read from an open serial port.
///
/// Bytes that are not valid UTF-8 are dropped rather than replaced.
pub struct SerialLineSource<R: Read = Box<dyn SerialPort>> {
    reader: BufReader<R>,
    // Bytes of a line whose terminator has not arrived yet
    pending: Vec<u8>,
}

impl<R: Read> SerialLineSource<R> {
    pub fn new(port: R) -> Self {
        Self {
            reader: BufReader::new(port),
            pending: Vec::new(),
        }
    }
}

impl<R: Read> LineSource for SerialLineSource<R> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        match self.reader.read_until(b'\n', &mut self.pending) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "serial port closed",
            )),
            Ok(_) => {
                let line = decode_line(&self.pending);
                self.pending.clear();
                Ok(Some(line))
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect::<String>()
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Names of serial ports currently present on the system.
pub fn available_ports() -> Vec<String> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays chunks as successive `read` results.
    struct ChunkedReader {
        chunks: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ChunkedReader {
        fn new(chunks: Vec<io::Result<&[u8]>>) -> Self {
            Self {
                chunks: chunks.into_iter().map(|c| c.map(<[u8]>::to_vec)).collect(),
            }
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                None => Ok(0),
                Some(Err(e)) => Err(e),
                Some(Ok(chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.chunks.push_front(Ok(chunk[n..].to_vec()));
                    }
                    Ok(n)
                }
            }
        }
    }

    fn timed_out() -> io::Error {
        io::Error::new(io::ErrorKind::TimedOut, "no data")
    }

    #[test]
    fn test_partial_line_survives_timeout() {
        let mut source = SerialLineSource::new(ChunkedReader::new(vec![
            Ok(&b"12,3."[..]),
            Err(timed_out()),
            Ok(&b"5,1\r\n"[..]),
        ]));

        assert_eq!(source.read_line().unwrap(), None);
        assert_eq!(source.read_line().unwrap().as_deref(), Some("12,3.5,1"));
    }

    #[test]
    fn test_multiple_lines_in_one_read() {
        let mut source =
            SerialLineSource::new(ChunkedReader::new(vec![Ok(&b"t_ms,a,label\n0,1.5,1\r\n"[..])]));

        assert_eq!(source.read_line().unwrap().as_deref(), Some("t_ms,a,label"));
        assert_eq!(source.read_line().unwrap().as_deref(), Some("0,1.5,1"));
    }

    #[test]
    fn test_closed_port_is_error() {
        let mut source = SerialLineSource::new(ChunkedReader::new(vec![Ok(&b"0,1,1\n"[..])]));

        assert!(source.read_line().unwrap().is_some());
        let err = source.read_line().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_invalid_utf8_dropped() {
        let mut source =
            SerialLineSource::new(ChunkedReader::new(vec![Ok(&b"\xff\xfet_ms,a\xc3,label\n"[..])]));

        assert_eq!(source.read_line().unwrap().as_deref(), Some("t_ms,a,label"));
    }
}
