//! Foreground/worker channel
//!
//! One private `UnixStream` pair per worker. The foreground drives it with
//! blocking calls through [`WorkerChannel`]; the worker serves it from its
//! tokio runtime through [`worker_endpoint`].

pub mod channel;
pub mod endpoint;
pub mod frame;
pub mod protocol;

pub use channel::{ChannelError, WorkerChannel, read_frame, write_frame};
pub use endpoint::{RequestReader, ResponseWriter, worker_endpoint};
pub use frame::{FrameError, FrameReader, FrameWriter, MAX_FRAME_LEN};
pub use protocol::{
    AddUserRequest, DelUserRequest, Opcode, Request, Status, VerifyOutcome, VerifyReply,
    VerifyRequest,
};
