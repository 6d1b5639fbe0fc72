//! Worker process supervision
//!
//! Each worker is forked from the foreground with one end of a private
//! `UnixStream` pair. In the child every other inherited descriptor apart
//! from stdio is closed, signal dispositions are reset so signals aimed at
//! the host do not reach the worker's logic, and the worker's run-loop takes
//! over until it returns. The child then leaves through `_exit`, never
//! returning into host code.
//!
//! The parent keeps its end of the pair and the child's pid, waits for the
//! worker's handshake, and on shutdown sends `EXIT` and reaps the child.

use crate::ipc::protocol::{Opcode, Request, Status};
use crate::ipc::{ChannelError, WorkerChannel};
use nix::errno::Errno;
use nix::sys::resource::{Resource, getrlimit};
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, close, fork};
use std::fmt;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Highest descriptor number the child walks when closing inherited descriptors.
const MAX_CLOSE_FD: u64 = 65_536;

/// Exit code of a worker whose run-loop panicked.
const PANIC_EXIT_CODE: i32 = 70;

/// Supervisor errors
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to create worker channel: {0}")]
    Channel(#[source] std::io::Error),

    #[error("failed to fork {worker} worker: {source}")]
    Fork {
        worker: WorkerKind,
        #[source]
        source: Errno,
    },
}

/// The two worker roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Auth,
    Accounting,
}

impl WorkerKind {
    pub fn name(self) -> &'static str {
        match self {
            WorkerKind::Auth => "auth",
            WorkerKind::Accounting => "accounting",
        }
    }

    /// Opcodes this role serves.
    pub fn supports(self, opcode: Opcode) -> bool {
        match self {
            WorkerKind::Auth => matches!(opcode, Opcode::Verify | Opcode::Exit),
            WorkerKind::Accounting => {
                matches!(opcode, Opcode::AddUser | Opcode::DelUser | Opcode::Exit)
            }
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The foreground's handle on one worker.
#[derive(Debug)]
pub struct WorkerHandle {
    kind: WorkerKind,
    channel: WorkerChannel,
    pid: Option<Pid>,
    initialized: bool,
}

impl WorkerHandle {
    /// Take ownership of a connected channel endpoint and wait for the
    /// worker's handshake.
    ///
    /// A failed handshake does not fail this call: the handle is returned
    /// with its channel unusable, and every request routed to it fails.
    pub fn establish(
        kind: WorkerKind,
        stream: UnixStream,
        pid: Option<Pid>,
        timeout: Option<Duration>,
    ) -> Result<Self, SupervisorError> {
        let channel = WorkerChannel::new(stream, timeout).map_err(SupervisorError::Channel)?;
        let mut handle = WorkerHandle {
            kind,
            channel,
            pid,
            initialized: false,
        };

        match handle.channel.await_handshake() {
            Ok(Status::InitSucceeded) => {
                handle.initialized = true;
                info!(worker = %kind, pid = ?pid, "Worker ready")
            }
            Ok(status) => {
                error!(worker = %kind, status = ?status, "Worker failed to initialize")
            }
            Err(e) => error!(worker = %kind, error = %e, "Worker handshake failed"),
        }
        Ok(handle)
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn is_usable(&self) -> bool {
        self.channel.is_usable()
    }

    /// Whether the worker reported a successful start.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Send `request` and return the raw response payload.
    pub fn call(&mut self, request: &Request) -> Result<Vec<u8>, ChannelError> {
        let opcode = request.opcode();
        if !self.kind.supports(opcode) || opcode == Opcode::Exit {
            return Err(ChannelError::Unsupported(opcode));
        }
        let payload = request.encode()?;
        self.channel.call(&payload)
    }

    /// Ask the worker to exit, then reap it. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.channel.is_usable() {
            match Request::Exit.encode() {
                Ok(payload) => {
                    if let Err(e) = self.channel.send(&payload) {
                        warn!(worker = %self.kind, error = %e, "Failed to send EXIT");
                    }
                }
                Err(e) => warn!(worker = %self.kind, error = %e, "Failed to encode EXIT"),
            }
        }
        self.channel.close();

        if let Some(pid) = self.pid.take() {
            reap(self.kind, pid);
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Block until `pid` has exited.
fn reap(kind: WorkerKind, pid: Pid) {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                info!(worker = %kind, pid = %pid, code, "Worker exited");
                return;
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                warn!(worker = %kind, pid = %pid, signal = ?sig, "Worker killed by signal");
                return;
            }
            Ok(status) => debug!(worker = %kind, status = ?status, "Worker status change"),
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(worker = %kind, pid = %pid, error = %e, "Failed to reap worker");
                return;
            }
        }
    }
}

/// Fork a worker process running `entry` on its end of a fresh channel.
///
/// `entry` runs only in the child; its return value becomes the child's
/// exit status.
pub fn spawn_worker<F>(
    kind: WorkerKind,
    timeout: Option<Duration>,
    entry: F,
) -> Result<WorkerHandle, SupervisorError>
where
    F: FnOnce(UnixStream) -> i32,
{
    let (parent_end, child_end) = UnixStream::pair().map_err(SupervisorError::Channel)?;

    // SAFETY: the child only closes descriptors, resets signal dispositions
    // and runs `entry`, and always leaves through `_exit` without unwinding
    // back into the caller.
    let fork_result = unsafe { fork() }.map_err(|source| SupervisorError::Fork {
        worker: kind,
        source,
    })?;

    match fork_result {
        ForkResult::Child => {
            drop(parent_end);
            close_inherited_fds(child_end.as_raw_fd());
            reset_signals();

            let code = catch_unwind(AssertUnwindSafe(|| entry(child_end)))
                .unwrap_or(PANIC_EXIT_CODE);

            // SAFETY: _exit is safe to call from the child process
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => {
            drop(child_end);
            debug!(worker = %kind, pid = %child, "Forked worker");
            WorkerHandle::establish(kind, parent_end, Some(child), timeout)
        }
    }
}

/// Close every descriptor above stdio except `keep`.
fn close_inherited_fds(keep: RawFd) {
    let limit = getrlimit(Resource::RLIMIT_NOFILE)
        .map(|(soft, _)| soft)
        .unwrap_or(1024)
        .min(MAX_CLOSE_FD);

    for fd in 3..limit as RawFd {
        if fd != keep {
            let _ = close(fd);
        }
    }
}

/// Terminate on SIGTERM; ignore the signals the host uses for its own control.
fn reset_signals() {
    let dispositions = [
        (Signal::SIGTERM, SigHandler::SigDfl),
        (Signal::SIGINT, SigHandler::SigIgn),
        (Signal::SIGHUP, SigHandler::SigIgn),
        (Signal::SIGUSR1, SigHandler::SigIgn),
        (Signal::SIGUSR2, SigHandler::SigIgn),
        (Signal::SIGPIPE, SigHandler::SigIgn),
    ];
    for (sig, handler) in dispositions {
        // SAFETY: only default and ignore dispositions are installed.
        let _ = unsafe { signal(sig, handler) };
    }
}
