//! Host event handling
//!
//! [`Plugin`] is the context the host holds between callbacks. It owns the
//! session registry and both worker handles, and turns each host event into
//! registry updates and worker calls:
//!
//! - **verify**: authenticate through the auth worker. A key already in the
//!   registry is a renegotiation and reuses the stored session.
//! - **connect**: start accounting for an authenticated session.
//! - **disconnect**: stop accounting and forget the session.
//!
//! Whenever a session is torn down its port is released and the entry
//! removed, whatever the accounting worker answers.

use crate::config::{ConfigError, DEFAULT_CONFIG_PATH, PluginConfig};
use crate::error::{PluginError, PluginResult};
use crate::host::{Event, EventResult, HostEnv, UNDEF_COMMON_NAME, attr};
use crate::ipc::protocol::{
    AddUserRequest, DelUserRequest, Request, Status, VerifyOutcome, VerifyReply, VerifyRequest,
};
use crate::ipc::ChannelError;
use crate::logging;
use crate::session::{ClientIdentity, Session, SessionKey, SessionRegistry};
use crate::supervisor::{WorkerHandle, WorkerKind, spawn_worker};
use crate::worker;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// The two configuration switches the event logic reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventOptions {
    /// Missing `common_name` is replaced by `UNDEF` instead of failing
    pub client_cert_not_required: bool,
    /// `username` replaces the common name in the session key
    pub username_as_common_name: bool,
}

impl From<&PluginConfig> for EventOptions {
    fn from(config: &PluginConfig) -> Self {
        EventOptions {
            client_cert_not_required: config.client_cert_not_required,
            username_as_common_name: config.username_as_common_name,
        }
    }
}

/// Plugin context passed to every host callback.
#[derive(Debug)]
pub struct Plugin {
    options: EventOptions,
    registry: SessionRegistry,
    auth: WorkerHandle,
    acct: WorkerHandle,
}

impl Plugin {
    /// Start both workers and build the context.
    ///
    /// Fails only if a channel cannot be created or a worker cannot be
    /// forked. A worker that starts but reports an initialization failure
    /// leaves its half of the plugin disabled.
    pub fn open(config: PluginConfig) -> PluginResult<Self> {
        config.validate()?;
        let timeout = config.worker_timeout();

        let auth = spawn_worker(
            WorkerKind::Auth,
            timeout,
            worker::auth_entry(config.clone()),
        )?;
        let acct = spawn_worker(
            WorkerKind::Accounting,
            timeout,
            worker::accounting_entry(config.clone()),
        )?;

        info!(
            servers = config.servers.len(),
            max_sessions = config.max_sessions,
            "RADIUS plugin started"
        );
        Ok(Plugin::with_workers(
            EventOptions::from(&config),
            config.max_sessions,
            auth,
            acct,
        ))
    }

    /// Open from the host's plugin arguments and environment.
    ///
    /// `args[1]`, if present, names the configuration file. Logging follows
    /// the configured level, or else the host's `verb`.
    pub fn open_from_host(args: &[&str], env: &HostEnv) -> PluginResult<Self> {
        let path = args.get(1).copied().unwrap_or(DEFAULT_CONFIG_PATH);
        let config = PluginConfig::from_file(path);

        let level = config
            .as_ref()
            .ok()
            .and_then(|cfg| cfg.log_level.clone())
            .unwrap_or_else(|| {
                logging::level_for_verbosity(env.verbosity().unwrap_or(1)).to_string()
            });
        logging::init(&level);

        let config = config.inspect_err(|e: &ConfigError| {
            error!(path, error = %e, "Failed to load configuration");
        })?;
        info!(path, "Loaded configuration");
        Plugin::open(config)
    }

    /// Build a context around already established workers.
    pub fn with_workers(
        options: EventOptions,
        max_sessions: u16,
        auth: WorkerHandle,
        acct: WorkerHandle,
    ) -> Self {
        Plugin {
            options,
            registry: SessionRegistry::new(max_sessions),
            auth,
            acct,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn auth_worker(&self) -> &WorkerHandle {
        &self.auth
    }

    pub fn acct_worker(&self) -> &WorkerHandle {
        &self.acct
    }

    /// Handle one host event; errors are logged and reported as failure.
    pub fn handle(&mut self, event: Event, env: &HostEnv) -> EventResult {
        let result = match event {
            Event::AuthUserPassVerify => self.verify(env),
            Event::ClientConnect => self.connect(env),
            Event::ClientDisconnect => self.disconnect(env),
        };

        match result {
            Ok(()) => EventResult::Success,
            Err(e) => {
                warn!(event = %event, kind = ?e.kind(), error = %e, "Event failed");
                EventResult::Failure
            }
        }
    }

    /// Authenticate a client, creating or renegotiating its session.
    pub fn verify(&mut self, env: &HostEnv) -> PluginResult<()> {
        let username = require(env, attr::USERNAME)?;
        if username.is_empty() {
            return Err(PluginError::MissingAttribute(attr::USERNAME));
        }
        let password = require(env, attr::PASSWORD)?;
        let calling_station_id = require(env, attr::UNTRUSTED_IP)?;
        let common_name = self.common_name(env)?;
        let untrusted_port = require(env, attr::UNTRUSTED_PORT)?;

        let key = SessionKey::new(&common_name, calling_station_id, untrusted_port);

        if let Some(existing) = self.registry.get(&key) {
            debug!(key = %key, username = existing.username(), "Renegotiation");
            let request = verify_request(existing);
            return match self.call_verify(request) {
                Ok(reply) => {
                    if let Some(session) = self.registry.get_mut(&key) {
                        session.apply_auth_reply(reply);
                    }
                    info!(key = %key, "Renegotiation authenticated");
                    Ok(())
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Renegotiation failed; removing session");
                    self.stop_accounting(&key);
                    self.registry.remove(&key);
                    Err(e)
                }
            };
        }

        let session = self.registry.create(ClientIdentity {
            username: username.to_string(),
            password: Zeroizing::new(password.to_string()),
            calling_station_id: calling_station_id.to_string(),
            untrusted_port: untrusted_port.to_string(),
            common_name,
        })?;

        match self.call_verify(verify_request(&session)) {
            Ok(reply) => {
                let mut session = session;
                session.apply_auth_reply(reply);
                info!(
                    key = %key,
                    username = session.username(),
                    port = session.port(),
                    session_id = session.session_id(),
                    "Authenticated"
                );
                self.registry.insert(session);
                Ok(())
            }
            Err(e) => {
                self.registry.discard(session);
                Err(e)
            }
        }
    }

    /// Start accounting for an authenticated session.
    pub fn connect(&mut self, env: &HostEnv) -> PluginResult<()> {
        let calling_station_id = require(env, attr::UNTRUSTED_IP)?;
        let common_name = self.common_name(env)?;
        let untrusted_port = require(env, attr::UNTRUSTED_PORT)?;
        let framed_ip = require(env, attr::IFCONFIG_POOL_REMOTE_IP)?;

        let key = SessionKey::new(&common_name, calling_station_id, untrusted_port);
        let session = self
            .registry
            .get_mut(&key)
            .filter(|s| s.is_authenticated())
            .ok_or_else(|| PluginError::UnknownSession(key.to_string()))?;

        if session.is_accounted() {
            debug!(key = %key, "Connect for an accounted session; nothing to send");
            return Ok(());
        }

        session.set_framed_ip(framed_ip);
        let request = Request::AddUser(add_user_request(session, &key));

        match call_status(&mut self.acct, &request) {
            Ok(()) => {
                if let Some(session) = self.registry.get_mut(&key) {
                    session.mark_accounted();
                }
                info!(key = %key, framed_ip, "Accounting started");
                Ok(())
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Accounting start failed; removing session");
                self.registry.remove(&key);
                Err(e)
            }
        }
    }

    /// Stop accounting and forget the session.
    pub fn disconnect(&mut self, env: &HostEnv) -> PluginResult<()> {
        let calling_station_id = require(env, attr::UNTRUSTED_IP)?;
        let common_name = self.common_name(env)?;
        let untrusted_port = require(env, attr::UNTRUSTED_PORT)?;

        let key = SessionKey::new(&common_name, calling_station_id, untrusted_port);
        if !self.registry.contains(&key) {
            return Err(PluginError::UnknownSession(key.to_string()));
        }

        let request = Request::DelUser(DelUserRequest {
            key: key.to_string(),
        });
        let result = call_status(&mut self.acct, &request);
        self.registry.remove(&key);

        match &result {
            Ok(()) => info!(key = %key, "Accounting stopped"),
            Err(e) => warn!(key = %key, error = %e, "Accounting stop failed; session removed"),
        }
        result
    }

    /// Stop both workers and drop every session.
    pub fn close(mut self) {
        info!(sessions = self.registry.len(), "Closing RADIUS plugin");
        self.auth.shutdown();
        self.acct.shutdown();
        self.registry.clear();
    }

    fn common_name(&self, env: &HostEnv) -> PluginResult<String> {
        if self.options.username_as_common_name {
            return require(env, attr::USERNAME).map(str::to_string);
        }
        match env.get(attr::COMMON_NAME) {
            Some(cn) => Ok(cn.to_string()),
            None if self.options.client_cert_not_required => Ok(UNDEF_COMMON_NAME.to_string()),
            None => Err(PluginError::MissingAttribute(attr::COMMON_NAME)),
        }
    }

    fn call_verify(&mut self, request: VerifyRequest) -> PluginResult<VerifyReply> {
        let payload = self
            .auth
            .call(&Request::Verify(request))
            .map_err(|e| channel_error(&self.auth, e))?;

        match VerifyOutcome::decode(&payload) {
            Ok(VerifyOutcome::Accepted(reply)) => Ok(reply),
            Ok(VerifyOutcome::Rejected) => Err(PluginError::WorkerRejected(WorkerKind::Auth)),
            Err(e) => Err(PluginError::Channel {
                worker: WorkerKind::Auth,
                source: e.into(),
            }),
        }
    }

    /// Tell the accounting worker to stop `key`; failures are only logged.
    fn stop_accounting(&mut self, key: &SessionKey) {
        let request = Request::DelUser(DelUserRequest {
            key: key.to_string(),
        });
        if let Err(e) = call_status(&mut self.acct, &request) {
            warn!(key = %key, error = %e, "Failed to stop accounting");
        }
    }
}

fn require<'a>(env: &'a HostEnv, name: &'static str) -> PluginResult<&'a str> {
    env.get(name).ok_or(PluginError::MissingAttribute(name))
}

fn verify_request(session: &Session) -> VerifyRequest {
    VerifyRequest {
        username: session.username().to_string(),
        password: Zeroizing::new(session.password().to_string()),
        port: session.port(),
        calling_station_id: session.calling_station_id().to_string(),
        common_name: session.common_name().to_string(),
        framed_ip: session.framed_ip().to_string(),
    }
}

fn add_user_request(session: &Session, key: &SessionKey) -> AddUserRequest {
    AddUserRequest {
        username: session.username().to_string(),
        session_id: session.session_id().to_string(),
        port: session.port(),
        calling_station_id: session.calling_station_id().to_string(),
        framed_ip: session.framed_ip().to_string(),
        common_name: session.common_name().to_string(),
        acct_interim_interval: session.acct_interim_interval(),
        framed_routes: session.framed_routes().to_string(),
        key: key.to_string(),
        untrusted_port: session.untrusted_port().to_string(),
        vsa: session.vsa().as_bytes().to_vec(),
    }
}

fn channel_error(handle: &WorkerHandle, source: ChannelError) -> PluginError {
    if matches!(source, ChannelError::Unusable) && !handle.is_initialized() {
        return PluginError::WorkerInitFailed(handle.kind());
    }
    PluginError::Channel {
        worker: handle.kind(),
        source,
    }
}

/// Send a request answered by a bare status.
fn call_status(handle: &mut WorkerHandle, request: &Request) -> PluginResult<()> {
    let payload = handle.call(request).map_err(|e| channel_error(handle, e))?;
    match Status::decode(&payload) {
        Ok(Status::Succeeded) => Ok(()),
        Ok(_) => Err(PluginError::WorkerRejected(handle.kind())),
        Err(e) => Err(PluginError::Channel {
            worker: handle.kind(),
            source: e.into(),
        }),
    }
}
