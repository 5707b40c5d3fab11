// Serial line reader backed by the serialport crate
use crate::application::line_reader::{DisconnectedReader, LineReader, ReaderError};
use crate::domain::reading::RawChunk;
use crate::infrastructure::config::SerialConfig;
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read};

pub struct SerialLineReader {
    port: Option<Box<dyn SerialPort>>,
    name: String,
    max_line_bytes: usize,
}

impl SerialLineReader {
    pub fn open(config: &SerialConfig) -> Result<Self, serialport::Error> {
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(config.read_timeout())
            .open()?;

        // Drop whatever the device printed before we were listening
        port.clear(ClearBuffer::All)?;

        Ok(Self {
            port: Some(port),
            name: config.port.clone(),
            max_line_bytes: config.max_line_bytes.max(1),
        })
    }
}

impl LineReader for SerialLineReader {
    fn poll(&mut self) -> Result<Option<RawChunk>, ReaderError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(None);
        };

        let pending = port
            .bytes_to_read()
            .map_err(|e| ReaderError::Link(e.to_string()))?;
        if pending == 0 {
            return Ok(None);
        }

        let line = read_line(&mut **port, self.max_line_bytes)?;
        if line.is_empty() {
            return Ok(None);
        }
        tracing::trace!(port = %self.name, len = line.len(), "Read serial chunk");
        Ok(Some(RawChunk::new(line)))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!(port = %self.name, "Serial connection closed");
        }
    }
}

/// Longest UTF-8 sequence minus its lead byte.
const MAX_UTF8_CONTINUATION: usize = 3;

/// Read up to and including the next `\n`. Stops early at `max_len` bytes or
/// when the port's read timeout expires, returning whatever arrived. A cut at
/// `max_len` is pushed past any UTF-8 character it would split.
pub fn read_line<R: Read + ?Sized>(source: &mut R, max_len: usize) -> std::io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    while line.len() < max_len
        || (line.len() < max_len + MAX_UTF8_CONTINUATION && ends_mid_char(&line))
    {
        match source.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(line)
}

/// True when the trailing bytes start a multi-byte character that is not complete yet.
fn ends_mid_char(line: &[u8]) -> bool {
    for (back, &b) in line.iter().rev().take(MAX_UTF8_CONTINUATION + 1).enumerate() {
        if b & 0xC0 == 0x80 {
            continue;
        }
        let width = match b {
            0xF0.. => 4,
            0xE0.. => 3,
            0xC0.. => 2,
            _ => 1,
        };
        return width > back + 1;
    }
    false
}

/// Open the configured link, or fall back to a reader that never has data.
pub async fn connect(config: &SerialConfig) -> Box<dyn LineReader> {
    match SerialLineReader::open(config) {
        Ok(reader) => {
            tracing::info!(
                port = %config.port,
                baud_rate = config.baud_rate,
                "Connected to serial device"
            );
            // Boards reset when the port opens
            tokio::time::sleep(config.settle_delay()).await;
            Box::new(reader)
        }
        Err(e) => {
            tracing::warn!(
                port = %config.port,
                error = %e,
                "Could not open serial port; polls will report no data"
            );
            log_available_ports();
            Box::new(DisconnectedReader::new(config.port.clone()))
        }
    }
}

fn log_available_ports() {
    match serialport::available_ports() {
        Ok(ports) if ports.is_empty() => tracing::info!("No serial ports detected"),
        Ok(ports) => {
            for port in ports {
                tracing::info!(port = %port.port_name, kind = ?port.port_type, "Available serial port");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Could not enumerate serial ports"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Yields its bytes one read at a time, then fails with `end`.
    struct FakePort {
        bytes: VecDeque<u8>,
        end: ErrorKind,
    }

    impl FakePort {
        fn new(bytes: &[u8], end: ErrorKind) -> Self {
            Self {
                bytes: bytes.iter().copied().collect(),
                end,
            }
        }
    }

    impl Read for FakePort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.bytes.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                None => Err(std::io::Error::new(self.end, "fake port exhausted")),
            }
        }
    }

    #[test]
    fn test_reads_through_terminator_only() {
        let mut port = FakePort::new(b"{\"ph\":7}\r\n{\"ph\":8}\n", ErrorKind::TimedOut);
        assert_eq!(read_line(&mut port, 64).unwrap(), b"{\"ph\":7}\r\n".to_vec());
        assert_eq!(read_line(&mut port, 64).unwrap(), b"{\"ph\":8}\n".to_vec());
        assert!(read_line(&mut port, 64).unwrap().is_empty());
    }

    #[test]
    fn test_partial_line_on_timeout() {
        let mut port = FakePort::new(b"{\"tds\":3", ErrorKind::TimedOut);
        assert_eq!(read_line(&mut port, 64).unwrap(), b"{\"tds\":3".to_vec());
    }

    #[test]
    fn test_cuts_at_max_len() {
        let mut port = FakePort::new(b"abcdefgh\n", ErrorKind::TimedOut);
        assert_eq!(read_line(&mut port, 4).unwrap(), b"abcd".to_vec());
        assert_eq!(read_line(&mut port, 4).unwrap(), b"efgh".to_vec());
        assert_eq!(read_line(&mut port, 4).unwrap(), b"\n".to_vec());
    }

    #[test]
    fn test_cut_never_splits_a_character() {
        // "pH° ok" with a two-byte degree sign straddling the limit
        let mut port = FakePort::new("pH\u{b0} ok\n".as_bytes(), ErrorKind::TimedOut);
        let first = read_line(&mut port, 3).unwrap();
        assert_eq!(first, "pH\u{b0}".as_bytes().to_vec());
        assert_eq!(read_line(&mut port, 3).unwrap(), b" ok".to_vec());

        // A four-byte character cut after its lead byte
        let mut port = FakePort::new("a\u{1F4A7}b".as_bytes(), ErrorKind::TimedOut);
        let first = read_line(&mut port, 2).unwrap();
        assert!(std::str::from_utf8(&first).is_ok());
        assert_eq!(first, "a\u{1F4A7}".as_bytes().to_vec());

        // Garbage bytes extend the cut by at most three
        let mut port = FakePort::new(b"\xf0\xf0\xf0\xf0\xf0\xf0", ErrorKind::TimedOut);
        assert_eq!(read_line(&mut port, 1).unwrap().len(), 4);
    }

    #[test]
    fn test_link_fault_is_surfaced() {
        let mut port = FakePort::new(b"", ErrorKind::BrokenPipe);
        let err = read_line(&mut port, 64).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);

        let reader_err = ReaderError::from(err);
        assert!(reader_err.to_string().starts_with("serial read failed"));
    }

    #[tokio::test]
    async fn test_connect_falls_back_to_disconnected() {
        let config = SerialConfig {
            port: "/dev/does-not-exist-wqm".to_string(),
            settle_ms: 0,
            ..SerialConfig::default()
        };
        let mut reader = connect(&config).await;
        assert!(matches!(reader.poll(), Ok(None)));
        assert_eq!(reader.describe(), "/dev/does-not-exist-wqm (disconnected)");
    }
}
