use super::id::session_id;
use super::port_allocator::PortAllocator;
use super::types::{ClientIdentity, Session, SessionKey};
use crate::error::{PluginError, PluginResult};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Authoritative table of in-flight sessions.
///
/// Owns every [`Session`] and the [`PortAllocator`] their handles come from.
/// A handle goes back to the allocator only through [`SessionRegistry::remove`]
/// or [`SessionRegistry::discard`].
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<SessionKey, Session>,
    ports: PortAllocator,
}

impl SessionRegistry {
    pub fn new(max_sessions: u16) -> Self {
        SessionRegistry {
            sessions: HashMap::new(),
            ports: PortAllocator::new(max_sessions),
        }
    }

    /// Build a `New` session: allocate its port handle and generate its id.
    ///
    /// The session is not stored; hand it back through [`Self::insert`] or
    /// [`Self::discard`].
    pub fn create(&mut self, identity: ClientIdentity) -> PluginResult<Session> {
        let port = self
            .ports
            .allocate()
            .ok_or(PluginError::PoolExhausted(self.ports.allocated_count()))?;
        let id = session_id(
            &identity.common_name,
            &identity.calling_station_id,
            &identity.untrusted_port,
        );
        debug!(port, session_id = %id, "Created session");
        Ok(Session::new(identity, port, id))
    }

    /// Drop a session that was never inserted and release its port.
    pub fn discard(&mut self, session: Session) {
        self.ports.release(session.port());
    }

    /// Store an authenticated session under its key.
    ///
    /// The key must be free: verify only creates a session for an unknown
    /// key. A session found under the key anyway is replaced and its port
    /// released.
    pub fn insert(&mut self, session: Session) {
        let key = session.key();
        debug_assert!(
            !self.sessions.contains_key(&key),
            "session key {key} already registered"
        );
        if let Some(replaced) = self.sessions.insert(key, session) {
            warn!(key = %replaced.key(), "Replaced registered session");
            self.ports.release(replaced.port());
        }
    }

    /// Remove a session and release its port.
    pub fn remove(&mut self, key: &SessionKey) -> Option<Session> {
        let session = self.sessions.remove(key)?;
        self.ports.release(session.port());
        Some(session)
    }

    pub fn get(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions.get(key)
    }

    pub(crate) fn get_mut(&mut self, key: &SessionKey) -> Option<&mut Session> {
        self.sessions.get_mut(key)
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionKey, &Session)> {
        self.sessions.iter()
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Remove every session, releasing all handles.
    pub fn clear(&mut self) {
        for (_, session) in self.sessions.drain() {
            self.ports.release(session.port());
        }
    }
}
