//! Accounting worker loop
//!
//! Tracks every session the foreground has started accounting for, sends
//! interim updates on each session's interval, and reports a stop for every
//! session still tracked when the loop ends.
//!
//! Start and stop are sent before the request is answered, since their
//! outcome is the answer. Interim updates run as their own tasks so that a
//! slow upstream never holds up requests; at most one update per session is
//! in flight, and it is cancelled when the session stops.

use super::radius::ClientError;
use crate::ipc::protocol::{AddUserRequest, Request, Status};
use crate::ipc::{ChannelError, RequestReader, ResponseWriter};
use async_trait::async_trait;
use radius_proto::AcctTerminateCause;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

/// Queued requests between the reader task and the loop.
const REQUEST_QUEUE_DEPTH: usize = 16;

/// Receives accounting records.
#[async_trait]
pub trait AccountingBackend: Send + Sync {
    async fn start(&self, session: &AddUserRequest) -> Result<(), ClientError>;

    async fn interim(&self, session: &AddUserRequest, session_time: u32) -> Result<(), ClientError>;

    async fn stop(
        &self,
        session: &AddUserRequest,
        session_time: u32,
        cause: AcctTerminateCause,
    ) -> Result<(), ClientError>;
}

#[derive(Debug)]
struct TrackedSession {
    session: AddUserRequest,
    started: Instant,
    next_interim: Option<Instant>,
    interim: Option<JoinHandle<()>>,
}

impl TrackedSession {
    fn new(session: AddUserRequest) -> Self {
        let started = Instant::now();
        let next_interim = interval(&session).map(|every| started + every);
        TrackedSession {
            session,
            started,
            next_interim,
            interim: None,
        }
    }

    fn interim_in_flight(&self) -> bool {
        self.interim
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn cancel_interim(&mut self) {
        if let Some(task) = self.interim.take() {
            task.abort();
        }
    }

    fn session_time(&self) -> u32 {
        u32::try_from(self.started.elapsed().as_secs()).unwrap_or(u32::MAX)
    }
}

fn interval(session: &AddUserRequest) -> Option<Duration> {
    match session.acct_interim_interval {
        0 => None,
        secs => Some(Duration::from_secs(secs.into())),
    }
}

/// Sessions keyed by their registry key.
#[derive(Debug, Default)]
struct SessionTable {
    sessions: HashMap<String, TrackedSession>,
}

impl SessionTable {
    fn next_interim(&self) -> Option<Instant> {
        self.sessions
            .values()
            .filter_map(|tracked| tracked.next_interim)
            .min()
    }

    async fn add<B: AccountingBackend>(&mut self, backend: &B, session: AddUserRequest) -> Status {
        if self.sessions.contains_key(&session.key) {
            warn!(key = %session.key, "Accounting already running for session");
            return Status::Failed;
        }
        match backend.start(&session).await {
            Ok(()) => {
                info!(
                    key = %session.key,
                    username = %session.username,
                    session_id = %session.session_id,
                    "Accounting start sent"
                );
                self.sessions
                    .insert(session.key.clone(), TrackedSession::new(session));
                Status::Succeeded
            }
            Err(e) => {
                warn!(key = %session.key, error = %e, "Accounting start failed");
                Status::Failed
            }
        }
    }

    async fn remove<B: AccountingBackend>(&mut self, backend: &B, key: &str) -> Status {
        let Some(mut tracked) = self.sessions.remove(key) else {
            warn!(key, "No accounting session for key");
            return Status::Failed;
        };
        tracked.cancel_interim();
        let session_time = tracked.session_time();
        match backend
            .stop(&tracked.session, session_time, AcctTerminateCause::UserRequest)
            .await
        {
            Ok(()) => {
                info!(key, session_time, "Accounting stop sent");
                Status::Succeeded
            }
            Err(e) => {
                warn!(key, error = %e, "Accounting stop failed");
                Status::Failed
            }
        }
    }

    /// Start an interim update task for every session that is due.
    fn send_due_interims<B: AccountingBackend + 'static>(&mut self, backend: &Arc<B>) {
        let now = Instant::now();
        for tracked in self.sessions.values_mut() {
            if tracked.next_interim.is_none_or(|due| due > now) {
                continue;
            }
            tracked.next_interim = interval(&tracked.session).map(|every| now + every);

            if tracked.interim_in_flight() {
                warn!(
                    key = %tracked.session.key,
                    "Previous interim update still in flight; skipping"
                );
                continue;
            }
            let backend = Arc::clone(backend);
            let session = tracked.session.clone();
            let session_time = tracked.session_time();
            tracked.interim = Some(tokio::spawn(async move {
                match backend.interim(&session, session_time).await {
                    Ok(()) => debug!(key = %session.key, session_time, "Interim update sent"),
                    Err(e) => warn!(key = %session.key, error = %e, "Interim update failed"),
                }
            }));
        }
    }

    async fn stop_all<B: AccountingBackend>(&mut self, backend: &B) {
        for (key, mut tracked) in self.sessions.drain() {
            tracked.cancel_interim();
            let session_time = tracked.session_time();
            match backend
                .stop(&tracked.session, session_time, AcctTerminateCause::NasReboot)
                .await
            {
                Ok(()) => info!(key = %key, session_time, "Accounting stop sent on shutdown"),
                Err(e) => warn!(key = %key, error = %e, "Accounting stop failed on shutdown"),
            }
        }
    }
}

type Incoming = Result<Option<Request>, ChannelError>;

/// Forward requests from the channel until end of stream or a fault.
async fn read_requests(mut requests: RequestReader, queue: mpsc::Sender<Incoming>) {
    loop {
        let incoming = requests.recv().await;
        let last = !matches!(incoming, Ok(Some(_)) | Err(ChannelError::Frame(_)));
        if queue.send(incoming).await.is_err() || last {
            return;
        }
    }
}

/// Serve ADD_USER and DEL_USER until EXIT or end of stream, then stop every
/// tracked session with terminate cause NAS-Reboot.
pub async fn serve<B: AccountingBackend + 'static>(
    requests: RequestReader,
    mut responses: ResponseWriter,
    backend: B,
) -> Result<(), ChannelError> {
    let backend = Arc::new(backend);
    let (queue, mut incoming) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    let reader = tokio::spawn(read_requests(requests, queue));
    let mut table = SessionTable::default();

    let result = loop {
        let deadline = table.next_interim();
        tokio::select! {
            next = incoming.recv() => {
                let status = match next {
                    None | Some(Ok(None)) => {
                        debug!("Foreground closed the channel");
                        break Ok(());
                    }
                    Some(Ok(Some(Request::Exit))) => {
                        info!("Accounting worker received EXIT");
                        break Ok(());
                    }
                    Some(Ok(Some(Request::AddUser(session)))) => {
                        table.add(backend.as_ref(), session).await
                    }
                    Some(Ok(Some(Request::DelUser(request)))) => {
                        table.remove(backend.as_ref(), &request.key).await
                    }
                    Some(Ok(Some(other))) => {
                        warn!(opcode = %other.opcode(), "Unsupported request");
                        Status::Failed
                    }
                    Some(Err(ChannelError::Frame(e))) => {
                        warn!(error = %e, "Malformed request");
                        Status::Failed
                    }
                    Some(Err(e)) => break Err(e),
                };
                if let Err(e) = responses.send_status(status).await {
                    break Err(e);
                }
            }
            _ = sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                table.send_due_interims(&backend);
            }
        }
    };

    reader.abort();
    table.stop_all(backend.as_ref()).await;
    result
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::DelUserRequest;
    use crate::ipc::{WorkerChannel, read_frame, worker_endpoint, write_frame};
    use std::os::unix::net::UnixStream;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Record {
        Start(String),
        Interim(String),
        Stop(String, AcctTerminateCause),
    }

    #[derive(Clone, Default)]
    struct RecordingBackend {
        records: Arc<Mutex<Vec<Record>>>,
    }

    impl RecordingBackend {
        fn records(&self) -> Vec<Record> {
            self.records.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AccountingBackend for RecordingBackend {
        async fn start(&self, session: &AddUserRequest) -> Result<(), ClientError> {
            if session.username == "offline" {
                return Err(ClientError::NoResponse(1));
            }
            self.records
                .lock()
                .unwrap()
                .push(Record::Start(session.key.clone()));
            Ok(())
        }

        async fn interim(&self, session: &AddUserRequest, _: u32) -> Result<(), ClientError> {
            self.records
                .lock()
                .unwrap()
                .push(Record::Interim(session.key.clone()));
            Ok(())
        }

        async fn stop(
            &self,
            session: &AddUserRequest,
            _: u32,
            cause: AcctTerminateCause,
        ) -> Result<(), ClientError> {
            self.records
                .lock()
                .unwrap()
                .push(Record::Stop(session.key.clone(), cause));
            Ok(())
        }
    }

    fn add_user(username: &str, key: &str, interval: u32) -> Request {
        Request::AddUser(AddUserRequest {
            username: username.to_string(),
            session_id: "0123456789ABCDEF0123456789ABCDEF".to_string(),
            port: 1,
            calling_station_id: "10.0.0.5".to_string(),
            framed_ip: "10.8.0.6".to_string(),
            common_name: "cn".to_string(),
            acct_interim_interval: interval,
            framed_routes: String::new(),
            key: key.to_string(),
            untrusted_port: "1194".to_string(),
            vsa: vec![],
        })
    }

    fn del_user(key: &str) -> Request {
        Request::DelUser(DelUserRequest {
            key: key.to_string(),
        })
    }

    fn call(stream: &mut UnixStream, request: &Request) -> Status {
        write_frame(stream, &request.encode().unwrap()).unwrap();
        Status::decode(&read_frame(stream).unwrap()).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_start_stop_and_exit() {
        let (mut fg, worker) = UnixStream::pair().unwrap();
        let (reader, writer) = worker_endpoint(worker).unwrap();
        let backend = RecordingBackend::default();
        let task = tokio::spawn(serve(reader, writer, backend.clone()));

        let statuses = tokio::task::spawn_blocking(move || {
            let statuses = vec![
                call(&mut fg, &add_user("alice", "a", 0)),
                call(&mut fg, &add_user("alice", "a", 0)),
                call(&mut fg, &add_user("bob", "b", 0)),
                call(&mut fg, &add_user("offline", "c", 0)),
                call(&mut fg, &del_user("a")),
                call(&mut fg, &del_user("a")),
            ];
            write_frame(&mut fg, &Request::Exit.encode().unwrap()).unwrap();
            statuses
        })
        .await
        .unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(
            statuses,
            vec![
                Status::Succeeded,
                Status::Failed,
                Status::Succeeded,
                Status::Failed,
                Status::Succeeded,
                Status::Failed,
            ]
        );
        assert_eq!(
            backend.records(),
            vec![
                Record::Start("a".to_string()),
                Record::Start("b".to_string()),
                Record::Stop("a".to_string(), AcctTerminateCause::UserRequest),
                Record::Stop("b".to_string(), AcctTerminateCause::NasReboot),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interim_updates() {
        let (mut fg, worker) = UnixStream::pair().unwrap();
        let (reader, writer) = worker_endpoint(worker).unwrap();
        let backend = RecordingBackend::default();
        let task = tokio::spawn(serve(reader, writer, backend.clone()));

        let mut fg = tokio::task::spawn_blocking(move || {
            assert_eq!(call(&mut fg, &add_user("alice", "a", 1)), Status::Succeeded);
            fg
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        tokio::task::spawn_blocking(move || {
            write_frame(&mut fg, &Request::Exit.encode().unwrap()).unwrap();
        })
        .await
        .unwrap();
        task.await.unwrap().unwrap();

        let records = backend.records();
        assert_eq!(records.first(), Some(&Record::Start("a".to_string())));
        assert!(records.contains(&Record::Interim("a".to_string())));
        assert_eq!(
            records.last(),
            Some(&Record::Stop("a".to_string(), AcctTerminateCause::NasReboot))
        );
    }

    /// Records like [`RecordingBackend`] but takes seconds per interim update.
    #[derive(Clone, Default)]
    struct SlowInterimBackend {
        inner: RecordingBackend,
    }

    #[async_trait]
    impl AccountingBackend for SlowInterimBackend {
        async fn start(&self, session: &AddUserRequest) -> Result<(), ClientError> {
            self.inner.start(session).await
        }

        async fn interim(&self, session: &AddUserRequest, time: u32) -> Result<(), ClientError> {
            tokio::time::sleep(Duration::from_secs(3)).await;
            self.inner.interim(session, time).await
        }

        async fn stop(
            &self,
            session: &AddUserRequest,
            time: u32,
            cause: AcctTerminateCause,
        ) -> Result<(), ClientError> {
            self.inner.stop(session, time, cause).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_interim_does_not_delay_requests() {
        let (fg, worker) = UnixStream::pair().unwrap();
        let (reader, writer) = worker_endpoint(worker).unwrap();
        let backend = SlowInterimBackend::default();
        let task = tokio::spawn(serve(reader, writer, backend.clone()));

        let statuses = tokio::task::spawn_blocking(move || {
            let mut channel = WorkerChannel::new(fg, Some(Duration::from_secs(2))).unwrap();
            let mut call = |request: &Request| {
                channel
                    .call(&request.encode().unwrap())
                    .map(|payload| Status::decode(&payload).unwrap())
            };

            let first = call(&add_user("alice", "a", 1));
            std::thread::sleep(Duration::from_millis(1200));
            let statuses = vec![first, call(&del_user("a")), call(&add_user("bob", "b", 0))];

            assert!(channel.is_usable());
            channel.send(&Request::Exit.encode().unwrap()).unwrap();
            statuses
        })
        .await
        .unwrap();
        task.await.unwrap().unwrap();

        let statuses: Vec<Status> = statuses.into_iter().map(Result::unwrap).collect();
        assert_eq!(statuses, vec![Status::Succeeded; 3]);

        let records = backend.inner.records();
        assert!(!records.contains(&Record::Interim("a".to_string())));
        assert!(records.contains(&Record::Stop(
            "a".to_string(),
            AcctTerminateCause::UserRequest
        )));
        assert!(records.contains(&Record::Stop(
            "b".to_string(),
            AcctTerminateCause::NasReboot
        )));
    }

    #[tokio::test]
    async fn test_end_of_stream_ends_loop() {
        let (fg, worker) = UnixStream::pair().unwrap();
        let (reader, writer) = worker_endpoint(worker).unwrap();
        drop(fg);
        let backend = RecordingBackend::default();
        assert!(serve(reader, writer, backend.clone()).await.is_ok());
        assert!(backend.records().is_empty());
    }
}
