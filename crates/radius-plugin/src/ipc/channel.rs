//! Foreground end of a worker channel (blocking).

use super::frame::{FrameError, length_prefix, parse_length_prefix};
use super::protocol::{Opcode, Status};
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Worker channel errors
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("worker did not answer in time")]
    Timeout,

    #[error("peer closed the channel")]
    Closed,

    #[error("frame length {0} exceeds limit")]
    Oversized(usize),

    #[error("malformed message: {0}")]
    Frame(#[from] FrameError),

    #[error("channel is unusable")]
    Unusable,

    #[error("{0} is not served on this channel")]
    Unsupported(Opcode),
}

impl ChannelError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ChannelError::Timeout)
    }

    /// Whether the error disables the channel for good.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ChannelError::Io(_) | ChannelError::Closed | ChannelError::Oversized(_)
        )
    }

    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ChannelError::Timeout,
            io::ErrorKind::UnexpectedEof => ChannelError::Closed,
            _ => ChannelError::Io(err),
        }
    }
}

/// Write one length-prefixed frame.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), ChannelError> {
    writer
        .write_all(&length_prefix(payload))
        .and_then(|_| writer.write_all(payload))
        .and_then(|_| writer.flush())
        .map_err(ChannelError::from_io)
}

/// Read one length-prefixed frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, ChannelError> {
    let mut prefix = [0u8; 4];
    reader
        .read_exact(&mut prefix)
        .map_err(ChannelError::from_io)?;
    let len = parse_length_prefix(prefix)
        .ok_or(ChannelError::Oversized(u32::from_be_bytes(prefix) as usize))?;

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(ChannelError::from_io)?;
    Ok(payload)
}

/// Read buffer growth per `read` call.
const READ_CHUNK: usize = 4096;

/// The foreground's endpoint of one worker channel.
///
/// A worker answers every request except `EXIT` with exactly one response,
/// in order. A call that times out leaves its response owed; the channel
/// counts owed responses and discards them when they arrive, so a late
/// answer is never taken for the answer to a later request. Bytes of a
/// frame that was only partly received are kept for the next read.
///
/// Once a transport fault is seen, or the handshake fails, the channel is
/// marked unusable and every later call fails without touching the stream.
#[derive(Debug)]
pub struct WorkerChannel {
    stream: UnixStream,
    timeout: Option<Duration>,
    inbox: Vec<u8>,
    owed: usize,
    usable: bool,
}

impl WorkerChannel {
    /// Wrap a connected stream; `timeout` bounds each call.
    pub fn new(stream: UnixStream, timeout: Option<Duration>) -> io::Result<Self> {
        stream.set_write_timeout(timeout)?;
        Ok(WorkerChannel {
            stream,
            timeout,
            inbox: Vec::new(),
            owed: 0,
            usable: true,
        })
    }

    pub fn is_usable(&self) -> bool {
        self.usable
    }

    /// Responses still owed for calls that timed out.
    pub fn owed_responses(&self) -> usize {
        self.owed
    }

    pub fn mark_unusable(&mut self) {
        self.usable = false;
    }

    /// Shut the stream down in both directions; the worker sees end of stream.
    pub fn close(&mut self) {
        self.usable = false;
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    /// Block until the worker reports its initialization status.
    ///
    /// Anything other than `INIT_SUCCEEDED`, including a timeout, leaves the
    /// channel unusable.
    pub fn await_handshake(&mut self) -> Result<Status, ChannelError> {
        self.ensure_usable()?;
        let deadline = self.deadline();
        let payload = match self.next_frame(deadline) {
            Ok(payload) => payload,
            Err(err) => return Err(self.fault(err)),
        };
        let status = Status::decode(&payload);
        if !matches!(status, Ok(Status::InitSucceeded)) {
            self.usable = false;
        }
        Ok(status?)
    }

    /// Send one request payload and wait for its response payload.
    ///
    /// A timeout fails only this call.
    pub fn call(&mut self, request: &[u8]) -> Result<Vec<u8>, ChannelError> {
        self.ensure_usable()?;
        let deadline = self.deadline();
        if let Err(err) = write_frame(&mut self.stream, request) {
            // A partly written frame cannot be taken back.
            return Err(self.fault(err));
        }
        self.owed += 1;

        loop {
            match self.next_frame(deadline) {
                Ok(payload) => {
                    self.owed -= 1;
                    if self.owed == 0 {
                        return Ok(payload);
                    }
                    debug!(owed = self.owed, "Discarding late worker response");
                }
                Err(ChannelError::Timeout) => {
                    debug!(owed = self.owed, "Worker response timed out");
                    return Err(ChannelError::Timeout);
                }
                Err(err) => return Err(self.fault(err)),
            }
        }
    }

    /// Send a request that has no response.
    pub fn send(&mut self, request: &[u8]) -> Result<(), ChannelError> {
        self.ensure_usable()?;
        write_frame(&mut self.stream, request).map_err(|err| self.fault(err))
    }

    fn ensure_usable(&self) -> Result<(), ChannelError> {
        if self.usable {
            Ok(())
        } else {
            Err(ChannelError::Unusable)
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.timeout.map(|timeout| Instant::now() + timeout)
    }

    fn fault(&mut self, err: ChannelError) -> ChannelError {
        warn!(error = %err, "Worker channel fault; disabling channel");
        self.usable = false;
        err
    }

    /// Next complete frame, reading until `deadline`.
    fn next_frame(&mut self, deadline: Option<Instant>) -> Result<Vec<u8>, ChannelError> {
        loop {
            if let Some(payload) = self.take_buffered()? {
                return Ok(payload);
            }

            let wait = match deadline {
                Some(deadline) => Some(
                    deadline
                        .checked_duration_since(Instant::now())
                        .filter(|left| !left.is_zero())
                        .ok_or(ChannelError::Timeout)?,
                ),
                None => None,
            };
            self.stream.set_read_timeout(wait)?;

            let mut chunk = [0u8; READ_CHUNK];
            match self.stream.read(&mut chunk) {
                Ok(0) => return Err(ChannelError::Closed),
                Ok(n) => {
                    trace!(bytes = n, "Read from worker");
                    self.inbox.extend_from_slice(&chunk[..n]);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(ChannelError::from_io(err)),
            }
        }
    }

    fn take_buffered(&mut self) -> Result<Option<Vec<u8>>, ChannelError> {
        let Some(prefix) = self.inbox.first_chunk::<4>().copied() else {
            return Ok(None);
        };
        let len = parse_length_prefix(prefix)
            .ok_or(ChannelError::Oversized(u32::from_be_bytes(prefix) as usize))?;
        if self.inbox.len() < 4 + len {
            return Ok(None);
        }
        let payload = self.inbox[4..4 + len].to_vec();
        self.inbox.drain(..4 + len);
        Ok(Some(payload))
    }
}
