//! Worker end of a channel, driven by the worker's tokio runtime.

use super::channel::ChannelError;
use super::frame::{length_prefix, parse_length_prefix};
use super::protocol::{Request, Status};
use std::io;
use std::os::unix::net::UnixStream as StdUnixStream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

/// Split a worker's inherited endpoint into its request and response halves.
///
/// Must be called from within a tokio runtime.
pub fn worker_endpoint(stream: StdUnixStream) -> io::Result<(RequestReader, ResponseWriter)> {
    stream.set_nonblocking(true)?;
    let stream = UnixStream::from_std(stream)?;
    let (read, write) = stream.into_split();
    Ok((RequestReader { inner: read }, ResponseWriter { inner: write }))
}

/// Incoming requests from the foreground.
#[derive(Debug)]
pub struct RequestReader {
    inner: OwnedReadHalf,
}

impl RequestReader {
    /// Read the next request. `Ok(None)` means the foreground closed the
    /// channel at a frame boundary.
    ///
    /// A [`ChannelError::Frame`] error means the frame was read whole but its
    /// payload did not parse; the stream is still in sync.
    pub async fn recv(&mut self) -> Result<Option<Request>, ChannelError> {
        let mut prefix = [0u8; 4];
        match self.inner.read_exact(&mut prefix).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(ChannelError::from_io(err)),
        }
        let len = parse_length_prefix(prefix)
            .ok_or(ChannelError::Oversized(u32::from_be_bytes(prefix) as usize))?;

        let mut payload = zeroize::Zeroizing::new(vec![0u8; len]);
        self.inner
            .read_exact(&mut payload)
            .await
            .map_err(ChannelError::from_io)?;

        Ok(Some(Request::decode(&payload)?))
    }
}

/// Responses back to the foreground.
#[derive(Debug)]
pub struct ResponseWriter {
    inner: OwnedWriteHalf,
}

impl ResponseWriter {
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ChannelError> {
        self.inner
            .write_all(&length_prefix(payload))
            .await
            .map_err(ChannelError::from_io)?;
        self.inner
            .write_all(payload)
            .await
            .map_err(ChannelError::from_io)?;
        self.inner.flush().await.map_err(ChannelError::from_io)
    }

    pub async fn send_status(&mut self, status: Status) -> Result<(), ChannelError> {
        self.send(&status.encode()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::channel::{read_frame, write_frame};
    use crate::ipc::protocol::DelUserRequest;

    #[tokio::test]
    async fn test_reads_requests_until_eof() {
        let (mut fg, worker) = StdUnixStream::pair().unwrap();
        let (mut reader, mut writer) = worker_endpoint(worker).unwrap();

        let request = Request::DelUser(DelUserRequest {
            key: "cn,1.2.3.4:5".to_string(),
        });
        write_frame(&mut fg, &request.encode().unwrap()).unwrap();
        write_frame(&mut fg, &[0x01, 0, 0, 0, 42]).unwrap();

        assert_eq!(reader.recv().await.unwrap(), Some(request));
        assert!(matches!(
            reader.recv().await,
            Err(ChannelError::Frame(_))
        ));

        writer.send_status(Status::Succeeded).await.unwrap();
        assert_eq!(
            Status::decode(&read_frame(&mut fg).unwrap()).unwrap(),
            Status::Succeeded
        );

        drop(fg);
        assert_eq!(reader.recv().await.unwrap(), None);
    }
}
