//! Byte-level link to the modem.
//!
//! The session needs three primitives: write some bytes, read lines until
//! one of a set of terminators shows up or a deadline passes, and read a
//! counted payload byte for byte. The [`Transport`] trait captures exactly
//! that, so tests can script the modem
//! and production code can talk to a serial device or a serial-over-TCP
//! bridge through [`StreamTransport`].

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use sim800_at_protocol::{LineCodec, Terminator};
use tracing::{debug, trace};

use crate::error::TransportError;

// ============================================================================
// Types
// ============================================================================

/// Result of [`Transport::read_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A line (or prompt) matched one of the terminators.
    Matched {
        /// The terminator that matched.
        terminator: Terminator,
        /// Every line received, ending with the matching one.
        lines: Vec<String>,
    },
    /// The deadline passed first.
    TimedOut {
        /// Lines received before the deadline.
        lines: Vec<String>,
    },
}

/// A blocking duplex link to the modem.
pub trait Transport: Send {
    /// Write bytes to the modem.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Collect lines until one matches a terminator or `timeout` elapses.
    ///
    /// Implementations must return within `timeout` plus scheduling slack.
    fn read_until(
        &mut self,
        terminators: &[Terminator],
        timeout: Duration,
    ) -> Result<ReadOutcome, TransportError>;

    /// Read exactly `len` bytes that follow the last matched line, without
    /// splitting them into lines.
    ///
    /// Returns `None` when `timeout` elapses first.
    fn read_payload(
        &mut self,
        len: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError>;

    /// Return complete lines that are already buffered, without waiting.
    fn drain(&mut self) -> Result<Vec<String>, TransportError> {
        Ok(Vec::new())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(data)
    }

    fn read_until(
        &mut self,
        terminators: &[Terminator],
        timeout: Duration,
    ) -> Result<ReadOutcome, TransportError> {
        (**self).read_until(terminators, timeout)
    }

    fn read_payload(
        &mut self,
        len: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        (**self).read_payload(len, timeout)
    }

    fn drain(&mut self) -> Result<Vec<String>, TransportError> {
        (**self).drain()
    }
}

/// Data handed from the reader thread to the transport.
type Chunk = io::Result<Vec<u8>>;

/// Size of a single read from the underlying stream.
const READ_CHUNK: usize = 256;

// ============================================================================
// Stream transport
// ============================================================================

/// [`Transport`] over any blocking byte stream.
///
/// A background thread performs the blocking reads and forwards chunks over a
/// channel, so every wait in [`Transport::read_until`] is bounded by
/// `recv_timeout` regardless of whether the underlying stream supports read
/// timeouts.
pub struct StreamTransport<W: Write + Send> {
    writer: W,
    chunks: Receiver<Chunk>,
    codec: LineCodec,
    closed: bool,
}

impl<W: Write + Send> StreamTransport<W> {
    /// Build a transport from separate read and write halves.
    pub fn from_parts<R>(reader: R, writer: W) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::unbounded();
        thread::Builder::new()
            .name("sim800-reader".into())
            .spawn(move || read_loop(reader, tx))?;
        Ok(StreamTransport {
            writer,
            chunks: rx,
            codec: LineCodec::new(),
            closed: false,
        })
    }

    /// Wait for the next chunk. Returns `false` once `deadline` has passed.
    fn receive(&mut self, deadline: Instant) -> Result<bool, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        match self.chunks.recv_timeout(remaining) {
            Ok(chunk) => {
                self.accept(chunk)?;
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => {
                self.closed = true;
                Err(TransportError::Closed)
            }
        }
    }

    fn accept(&mut self, chunk: Chunk) -> Result<(), TransportError> {
        match chunk {
            Ok(data) if data.is_empty() => {
                self.closed = true;
                Err(TransportError::Closed)
            }
            Ok(data) => {
                trace!(bytes = data.len(), "received");
                self.codec.push(&data);
                Ok(())
            }
            Err(err) => {
                self.closed = true;
                Err(TransportError::Io(err))
            }
        }
    }
}

fn read_loop<R: Read>(mut reader: R, tx: crossbeam_channel::Sender<Chunk>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                let _ = tx.send(Ok(Vec::new()));
                return;
            }
            Ok(n) => {
                if tx.send(Ok(buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(err) => {
                let _ = tx.send(Err(err));
                return;
            }
        }
    }
}

fn match_line<'a>(terminators: &'a [Terminator], line: &str) -> Option<&'a Terminator> {
    terminators.iter().find(|t| t.matches_line(line))
}

impl<W: Write + Send> Transport for StreamTransport<W> {
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.codec.set_last_command(data);
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn read_until(
        &mut self,
        terminators: &[Terminator],
        timeout: Duration,
    ) -> Result<ReadOutcome, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            while let Some(line) = self.codec.decode_line() {
                let matched = match_line(terminators, &line).cloned();
                lines.push(line);
                if let Some(terminator) = matched {
                    return Ok(ReadOutcome::Matched { terminator, lines });
                }
            }

            let tail = self.codec.pending_text();
            if let Some(terminator) = terminators.iter().find(|t| t.matches_partial(&tail)) {
                let terminator = terminator.clone();
                lines.push(self.codec.take_pending().trim().to_string());
                return Ok(ReadOutcome::Matched { terminator, lines });
            }

            if !self.receive(deadline)? {
                return Ok(ReadOutcome::TimedOut { lines });
            }
        }
    }

    fn read_payload(
        &mut self,
        len: usize,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.codec.take_bytes(len) {
                trace!(bytes = len, "payload received");
                return Ok(Some(payload));
            }
            if !self.receive(deadline)? {
                return Ok(None);
            }
        }
    }

    fn drain(&mut self) -> Result<Vec<String>, TransportError> {
        loop {
            match self.chunks.try_recv() {
                Ok(chunk) => self.accept(chunk)?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    break;
                }
            }
        }
        let mut lines = Vec::new();
        while let Some(line) = self.codec.decode_line() {
            lines.push(line);
        }
        Ok(lines)
    }
}

// ============================================================================
// Opening a port
// ============================================================================

/// How long a blocking read on a serial device waits before the reader
/// thread loops.
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Open the link named by `port`.
///
/// `tcp://host:port` connects to a serial-over-TCP bridge; anything else is
/// opened as a serial device at `baud_rate`, 8N1 without flow control.
pub fn open(port: &str, baud_rate: u32) -> Result<Box<dyn Transport>, TransportError> {
    let open_err = |source: io::Error| TransportError::Open {
        port: port.to_string(),
        source,
    };

    if let Some(addr) = port.strip_prefix("tcp://") {
        let stream = TcpStream::connect(addr).map_err(open_err)?;
        stream.set_nodelay(true).map_err(open_err)?;
        let reader = stream.try_clone().map_err(open_err)?;
        debug!(addr, "connected to serial bridge");
        let transport = StreamTransport::from_parts(reader, stream).map_err(open_err)?;
        return Ok(Box::new(transport));
    }

    let device = serialport::new(port, baud_rate)
        .timeout(SERIAL_READ_TIMEOUT)
        .open()
        .map_err(|err| open_err(err.into()))?;
    let reader = device.try_clone().map_err(|err| open_err(err.into()))?;
    debug!(port, baud_rate, "opened serial device");
    let transport = StreamTransport::from_parts(reader, device).map_err(open_err)?;
    Ok(Box::new(transport))
}
