//! Authentication worker loop.

use super::radius::ClientError;
use crate::ipc::protocol::{Request, Status, VerifyOutcome, VerifyRequest};
use crate::ipc::{ChannelError, RequestReader, ResponseWriter};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Decides whether a set of credentials is accepted.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn authenticate(&self, request: &VerifyRequest) -> Result<VerifyOutcome, ClientError>;
}

/// Serve VERIFY requests until EXIT or end of stream.
///
/// A backend error is answered as a rejection. Requests this worker does
/// not serve, and payloads that fail to parse, are answered with `FAILED`.
pub async fn serve<B: AuthBackend>(
    mut requests: RequestReader,
    mut responses: ResponseWriter,
    backend: B,
) -> Result<(), ChannelError> {
    loop {
        let request = match requests.recv().await {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("Foreground closed the channel");
                return Ok(());
            }
            Err(ChannelError::Frame(e)) => {
                warn!(error = %e, "Malformed request");
                responses.send_status(Status::Failed).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        match request {
            Request::Verify(req) => {
                let outcome = match backend.authenticate(&req).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(username = %req.username, error = %e, "Authentication request failed");
                        VerifyOutcome::Rejected
                    }
                };
                match &outcome {
                    VerifyOutcome::Accepted(reply) => info!(
                        username = %req.username,
                        port = req.port,
                        framed_ip = %reply.framed_ip,
                        "Access accepted"
                    ),
                    VerifyOutcome::Rejected => {
                        info!(username = %req.username, port = req.port, "Access rejected")
                    }
                }

                let payload = match outcome.encode() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "Reply does not fit a frame");
                        Status::Failed.encode()?
                    }
                };
                responses.send(&payload).await?;
            }
            Request::Exit => {
                info!("Auth worker received EXIT");
                return Ok(());
            }
            other => {
                warn!(opcode = %other.opcode(), "Unsupported request");
                responses.send_status(Status::Failed).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{DelUserRequest, VerifyReply};
    use crate::ipc::{read_frame, worker_endpoint, write_frame};
    use std::os::unix::net::UnixStream;
    use zeroize::Zeroizing;

    struct PasswordBackend;

    #[async_trait]
    impl AuthBackend for PasswordBackend {
        async fn authenticate(&self, request: &VerifyRequest) -> Result<VerifyOutcome, ClientError> {
            match request.password.as_str() {
                "open sesame" => Ok(VerifyOutcome::Accepted(VerifyReply {
                    framed_routes: "10.1.0.0/24".to_string(),
                    framed_ip: "10.8.0.5".to_string(),
                    acct_interim_interval: 60,
                    vsa: vec![26, 7, 0, 0, 0, 9, 1],
                })),
                "unreachable" => Err(ClientError::NoResponse(3)),
                _ => Ok(VerifyOutcome::Rejected),
            }
        }
    }

    fn verify(password: &str) -> Request {
        Request::Verify(VerifyRequest {
            username: "alice".to_string(),
            password: Zeroizing::new(password.to_string()),
            port: 1,
            calling_station_id: "10.0.0.5".to_string(),
            common_name: "alice.example".to_string(),
            framed_ip: String::new(),
        })
    }

    fn call(stream: &mut UnixStream, request: &Request) -> Vec<u8> {
        write_frame(stream, &request.encode().unwrap()).unwrap();
        read_frame(stream).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serves_until_exit() {
        let (mut fg, worker) = UnixStream::pair().unwrap();
        let (reader, writer) = worker_endpoint(worker).unwrap();
        let task = tokio::spawn(serve(reader, writer, PasswordBackend));

        let foreground = tokio::task::spawn_blocking(move || {
            let accepted = VerifyOutcome::decode(&call(&mut fg, &verify("open sesame"))).unwrap();
            let rejected = VerifyOutcome::decode(&call(&mut fg, &verify("guess"))).unwrap();
            let failed = VerifyOutcome::decode(&call(&mut fg, &verify("unreachable"))).unwrap();

            let wrong_role = Request::DelUser(DelUserRequest {
                key: "k".to_string(),
            });
            let status = Status::decode(&call(&mut fg, &wrong_role)).unwrap();

            write_frame(&mut fg, &[0x01, 0, 0, 0, 99]).unwrap();
            let malformed = Status::decode(&read_frame(&mut fg).unwrap()).unwrap();

            write_frame(&mut fg, &Request::Exit.encode().unwrap()).unwrap();
            (accepted, rejected, failed, status, malformed)
        });

        let (accepted, rejected, failed, status, malformed) = foreground.await.unwrap();
        task.await.unwrap().unwrap();

        match accepted {
            VerifyOutcome::Accepted(reply) => {
                assert_eq!(reply.framed_ip, "10.8.0.5");
                assert_eq!(reply.acct_interim_interval, 60);
            }
            other => panic!("expected accept, got {:?}", other),
        }
        assert_eq!(rejected, VerifyOutcome::Rejected);
        assert_eq!(failed, VerifyOutcome::Rejected);
        assert_eq!(status, Status::Failed);
        assert_eq!(malformed, Status::Failed);
    }

    #[tokio::test]
    async fn test_end_of_stream_stops_loop() {
        let (fg, worker) = UnixStream::pair().unwrap();
        let (reader, writer) = worker_endpoint(worker).unwrap();
        drop(fg);
        assert!(serve(reader, writer, PasswordBackend).await.is_ok());
    }
}
