//! Worker processes
//!
//! Each worker builds a single-threaded tokio runtime after fork, reports
//! its initialization status over the channel, and then serves requests:
//!
//! - [`auth`]: answers VERIFY through an [`AuthBackend`]
//! - [`accounting`]: answers ADD_USER and DEL_USER through an
//!   [`AccountingBackend`] and sends interim updates
//! - [`radius`]: the UDP client both production backends use

pub mod accounting;
pub mod auth;
pub mod radius;

pub use accounting::AccountingBackend;
pub use auth::AuthBackend;
pub use radius::{ClientError, RadiusClient};

use crate::config::PluginConfig;
use crate::ipc::protocol::Status;
use crate::ipc::{ChannelError, RequestReader, ResponseWriter, worker_endpoint, write_frame};
use crate::supervisor::WorkerKind;
use std::future::Future;
use std::os::unix::net::UnixStream;
use tracing::{error, info};

/// Exit code of a worker that could not start.
pub const EXIT_INIT_FAILED: i32 = 1;
/// Exit code of a worker that lost its channel.
pub const EXIT_CHANNEL_FAULT: i32 = 2;

/// Entry point of the auth worker process.
pub fn auth_entry(config: PluginConfig) -> impl FnOnce(UnixStream) -> i32 {
    move |stream| run(WorkerKind::Auth, stream, &config, auth::serve::<RadiusClient>)
}

/// Entry point of the accounting worker process.
pub fn accounting_entry(config: PluginConfig) -> impl FnOnce(UnixStream) -> i32 {
    move |stream| {
        run(
            WorkerKind::Accounting,
            stream,
            &config,
            accounting::serve::<RadiusClient>,
        )
    }
}

/// Start a worker on `stream` and serve until the loop ends.
///
/// Returns the process exit code.
pub fn run<S, Fut>(kind: WorkerKind, mut stream: UnixStream, config: &PluginConfig, serve: S) -> i32
where
    S: FnOnce(RequestReader, ResponseWriter, RadiusClient) -> Fut,
    Fut: Future<Output = Result<(), ChannelError>>,
{
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(worker = %kind, error = %e, "Failed to build runtime");
            report_init_failure(kind, &mut stream);
            return EXIT_INIT_FAILED;
        }
    };

    let client = match RadiusClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            error!(worker = %kind, error = %e, "Failed to set up RADIUS client");
            report_init_failure(kind, &mut stream);
            return EXIT_INIT_FAILED;
        }
    };

    runtime.block_on(async move {
        let (requests, mut responses) = match worker_endpoint(stream) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(worker = %kind, error = %e, "Failed to set up channel");
                return EXIT_CHANNEL_FAULT;
            }
        };
        if let Err(e) = responses.send_status(Status::InitSucceeded).await {
            error!(worker = %kind, error = %e, "Failed to report startup");
            return EXIT_CHANNEL_FAULT;
        }
        info!(worker = %kind, pid = std::process::id(), "Worker started");

        match serve(requests, responses, client).await {
            Ok(()) => {
                info!(worker = %kind, "Worker stopping");
                0
            }
            Err(e) => {
                error!(worker = %kind, error = %e, "Worker channel failed");
                EXIT_CHANNEL_FAULT
            }
        }
    })
}

fn report_init_failure(kind: WorkerKind, stream: &mut UnixStream) {
    let sent = Status::InitFailed
        .encode()
        .map_err(ChannelError::from)
        .and_then(|payload| write_frame(stream, &payload));
    if let Err(e) = sent {
        error!(worker = %kind, error = %e, "Failed to report startup failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::read_frame;
    use std::thread;

    #[test]
    fn test_invalid_config_reports_init_failure() {
        let (mut fg, worker) = UnixStream::pair().unwrap();
        let child = thread::spawn(move || {
            let config = PluginConfig::default();
            run(WorkerKind::Auth, worker, &config, auth::serve::<RadiusClient>)
        });

        let status = Status::decode(&read_frame(&mut fg).unwrap()).unwrap();
        assert_eq!(status, Status::InitFailed);
        assert_eq!(child.join().unwrap(), EXIT_INIT_FAILED);
    }

    #[test]
    fn test_worker_runs_until_end_of_stream() {
        let (mut fg, worker) = UnixStream::pair().unwrap();
        let child = thread::spawn(move || {
            let config = PluginConfig::example();
            run(
                WorkerKind::Accounting,
                worker,
                &config,
                accounting::serve::<RadiusClient>,
            )
        });

        let status = Status::decode(&read_frame(&mut fg).unwrap()).unwrap();
        assert_eq!(status, Status::InitSucceeded);
        drop(fg);
        assert_eq!(child.join().unwrap(), 0);
    }
}
