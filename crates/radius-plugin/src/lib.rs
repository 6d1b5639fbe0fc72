//! OpenVPN RADIUS Plugin Core
//!
//! This crate implements the privilege-separated core of a RADIUS plugin
//! for OpenVPN, built on top of the `radius-proto` protocol implementation.
//!
//! # Features
//!
//! - Two forked worker processes (authentication and accounting), each
//!   reached over a private length-prefixed message channel
//! - Session registry keyed by common name, client address and port
//! - NAS-Port allocation and Acct-Session-Id generation
//! - Interim accounting updates and stop records on shutdown
//! - JSON configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use radius_plugin::{Event, HostEnv, Plugin, PluginConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PluginConfig::from_file("/etc/openvpn/radiusplugin.json")?;
//!     let mut plugin = Plugin::open(config)?;
//!
//!     let env = HostEnv::new()
//!         .with("username", "alice")
//!         .with("password", "secret")
//!         .with("untrusted_ip", "198.51.100.7")
//!         .with("untrusted_port", "41000")
//!         .with("common_name", "alice");
//!
//!     let result = plugin.handle(Event::AuthUserPassVerify, &env);
//!     println!("verify: {}", result.code());
//!
//!     plugin.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod ipc;
pub mod logging;
pub mod session;
pub mod supervisor;
pub mod worker;

pub use config::{ConfigError, PluginConfig, ServerConfig};
pub use dispatcher::{EventOptions, Plugin};
pub use error::{ErrorKind, PluginError, PluginResult};
pub use host::{Event, EventResult, HostEnv};
pub use session::{PortAllocator, Session, SessionKey, SessionRegistry, SessionState};
pub use supervisor::{SupervisorError, WorkerHandle, WorkerKind, spawn_worker};
pub use worker::{AccountingBackend, AuthBackend, ClientError, RadiusClient};
