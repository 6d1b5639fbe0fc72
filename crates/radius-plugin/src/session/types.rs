use crate::ipc::protocol::VerifyReply;
use std::fmt;
use zeroize::Zeroizing;

/// Registry key of one negotiation slot: `common_name,calling_station_ip:untrusted_port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(common_name: &str, calling_station_id: &str, untrusted_port: &str) -> Self {
        SessionKey(format!(
            "{},{}:{}",
            common_name, calling_station_id, untrusted_port
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Vendor-Specific attribute blob returned by authentication.
///
/// Exclusively owned by one session and forwarded to accounting as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VsaBuffer(Vec<u8>);

impl VsaBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        VsaBuffer(bytes)
    }

    /// Discard the current contents and take ownership of `bytes`.
    pub fn replace(&mut self, bytes: Vec<u8>) {
        self.0 = bytes;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Lifecycle position of a session.
///
/// `Accounted` can only be reached from `Authenticated`, so an accounted
/// session is always an authenticated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created for a verify event, not yet in the registry
    New,
    Authenticated,
    Accounted,
}

/// Credentials and addressing a verify event supplies for a new session.
pub struct ClientIdentity {
    pub username: String,
    pub password: Zeroizing<String>,
    pub calling_station_id: String,
    pub untrusted_port: String,
    pub common_name: String,
}

/// One VPN client's authentication and accounting lifecycle.
pub struct Session {
    username: String,
    password: Zeroizing<String>,
    calling_station_id: String,
    untrusted_port: String,
    common_name: String,
    port: u16,
    session_id: String,
    framed_ip: String,
    framed_routes: String,
    acct_interim_interval: u32,
    vsa: VsaBuffer,
    state: SessionState,
}

impl Session {
    pub(crate) fn new(identity: ClientIdentity, port: u16, session_id: String) -> Self {
        let ClientIdentity {
            username,
            password,
            calling_station_id,
            untrusted_port,
            common_name,
        } = identity;

        Session {
            username,
            password,
            calling_station_id,
            untrusted_port,
            common_name,
            port,
            session_id,
            framed_ip: String::new(),
            framed_routes: String::new(),
            acct_interim_interval: 0,
            vsa: VsaBuffer::default(),
            state: SessionState::New,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey::new(
            &self.common_name,
            &self.calling_station_id,
            &self.untrusted_port,
        )
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    pub fn calling_station_id(&self) -> &str {
        &self.calling_station_id
    }

    pub fn untrusted_port(&self) -> &str {
        &self.untrusted_port
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn framed_ip(&self) -> &str {
        &self.framed_ip
    }

    pub fn framed_routes(&self) -> &str {
        &self.framed_routes
    }

    pub fn acct_interim_interval(&self) -> u32 {
        self.acct_interim_interval
    }

    pub fn vsa(&self) -> &VsaBuffer {
        &self.vsa
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state != SessionState::New
    }

    pub fn is_accounted(&self) -> bool {
        self.state == SessionState::Accounted
    }

    /// Store what a successful VERIFY returned and mark the session
    /// authenticated. The VSA buffer is replaced, never appended to.
    pub(crate) fn apply_auth_reply(&mut self, reply: VerifyReply) {
        self.framed_routes = reply.framed_routes;
        self.framed_ip = reply.framed_ip;
        self.acct_interim_interval = reply.acct_interim_interval;
        self.vsa.replace(reply.vsa);
        if self.state == SessionState::New {
            self.state = SessionState::Authenticated;
        }
    }

    pub(crate) fn set_framed_ip(&mut self, framed_ip: &str) {
        self.framed_ip = framed_ip.to_string();
    }

    /// Move `Authenticated` to `Accounted`. Any other state is left alone
    /// and `false` returned.
    pub(crate) fn mark_accounted(&mut self) -> bool {
        if self.state == SessionState::Authenticated {
            self.state = SessionState::Accounted;
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("calling_station_id", &self.calling_station_id)
            .field("untrusted_port", &self.untrusted_port)
            .field("common_name", &self.common_name)
            .field("port", &self.port)
            .field("session_id", &self.session_id)
            .field("framed_ip", &self.framed_ip)
            .field("framed_routes", &self.framed_routes)
            .field("acct_interim_interval", &self.acct_interim_interval)
            .field("vsa_len", &self.vsa.len())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ClientIdentity {
        ClientIdentity {
            username: "alice".to_string(),
            password: Zeroizing::new("hunter2".to_string()),
            calling_station_id: "10.0.0.5".to_string(),
            untrusted_port: "1194".to_string(),
            common_name: "alice.example".to_string(),
        }
    }

    fn reply(vsa: Vec<u8>) -> VerifyReply {
        VerifyReply {
            framed_routes: "10.1.0.0/24".to_string(),
            framed_ip: "10.8.0.5".to_string(),
            acct_interim_interval: 600,
            vsa,
        }
    }

    #[test]
    fn test_key_format() {
        let key = SessionKey::new("alice.example", "10.0.0.5", "1194");
        assert_eq!(key.as_str(), "alice.example,10.0.0.5:1194");
        let session = Session::new(identity(), 1, "ID".to_string());
        assert_eq!(session.key(), key);
    }

    #[test]
    fn test_state_transitions() {
        let mut session = Session::new(identity(), 1, "ID".to_string());
        assert_eq!(session.state(), SessionState::New);
        assert!(!session.mark_accounted());
        assert!(!session.is_accounted());

        session.apply_auth_reply(reply(vec![]));
        assert!(session.is_authenticated());
        assert!(session.mark_accounted());
        assert!(session.is_accounted() && session.is_authenticated());

        // A later reply (rekey) keeps the session accounted.
        session.apply_auth_reply(reply(vec![]));
        assert_eq!(session.state(), SessionState::Accounted);
        assert!(!session.mark_accounted());
    }

    #[test]
    fn test_vsa_replaced_not_appended() {
        let mut session = Session::new(identity(), 1, "ID".to_string());
        session.apply_auth_reply(reply(vec![1, 2, 3, 4]));
        session.apply_auth_reply(reply(vec![9]));
        assert_eq!(session.vsa().as_bytes(), &[9]);
        session.apply_auth_reply(reply(vec![]));
        assert!(session.vsa().is_empty());
    }

    #[test]
    fn test_debug_redacts_password() {
        let session = Session::new(identity(), 1, "ID".to_string());
        let rendered = format!("{:?}", session);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
