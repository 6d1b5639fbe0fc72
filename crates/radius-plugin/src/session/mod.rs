//! Session state owned by the foreground process
//!
//! - [`SessionRegistry`]: the keyed table of in-flight sessions
//! - [`PortAllocator`]: NAS-Port handles, never reissued before release
//! - [`session_id`]: Acct-Session-Id derivation

pub mod id;
pub mod port_allocator;
pub mod registry;
pub mod types;

pub use id::{session_id, session_id_at};
pub use port_allocator::{DEFAULT_MAX_SESSIONS, PortAllocator};
pub use registry::SessionRegistry;
pub use types::{ClientIdentity, Session, SessionKey, SessionState, VsaBuffer};
