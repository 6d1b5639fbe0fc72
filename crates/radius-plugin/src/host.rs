//! Types at the host callback boundary.

use std::collections::HashMap;
use std::fmt;

/// Environment attribute names the host supplies.
pub mod attr {
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const UNTRUSTED_IP: &str = "untrusted_ip";
    pub const UNTRUSTED_PORT: &str = "untrusted_port";
    pub const COMMON_NAME: &str = "common_name";
    pub const IFCONFIG_POOL_REMOTE_IP: &str = "ifconfig_pool_remote_ip";
    pub const VERB: &str = "verb";
}

/// Common name used for clients that present no certificate.
pub const UNDEF_COMMON_NAME: &str = "UNDEF";

/// The three host events the plugin handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    AuthUserPassVerify,
    ClientConnect,
    ClientDisconnect,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Event::AuthUserPassVerify => "auth-user-pass-verify",
            Event::ClientConnect => "client-connect",
            Event::ClientDisconnect => "client-disconnect",
        })
    }
}

/// What an event handler reports back to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResult {
    Success,
    Failure,
}

impl EventResult {
    /// The host's numeric return code.
    pub fn code(self) -> i32 {
        match self {
            EventResult::Success => 0,
            EventResult::Failure => 1,
        }
    }

    pub fn is_success(self) -> bool {
        self == EventResult::Success
    }
}

/// Named string attributes delivered with a host callback.
#[derive(Clone, Default)]
pub struct HostEnv {
    vars: HashMap<String, String>,
}

impl HostEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `name=value` entries. The first entry for a name wins; entries
    /// without `=` are skipped.
    pub fn from_envp<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut env = HostEnv::new();
        for entry in entries {
            if let Some((name, value)) = entry.as_ref().split_once('=') {
                env.vars
                    .entry(name.to_string())
                    .or_insert_with(|| value.to_string());
            }
        }
        env
    }

    /// Set `name`, replacing any earlier value.
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Host verbosity, if the `verb` attribute is present and numeric.
    pub fn verbosity(&self) -> Option<u32> {
        self.get(attr::VERB)?.trim().parse().ok()
    }
}

impl fmt::Debug for HostEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.vars.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("HostEnv").field("names", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_envp_first_wins() {
        let env = HostEnv::from_envp([
            "username=alice",
            "untrusted_ip=10.0.0.5",
            "username=mallory",
            "garbage",
            "password=a=b",
        ]);
        assert_eq!(env.get(attr::USERNAME), Some("alice"));
        assert_eq!(env.get(attr::PASSWORD), Some("a=b"));
        assert_eq!(env.get("garbage"), None);
    }

    #[test]
    fn test_verbosity() {
        assert_eq!(HostEnv::new().with(attr::VERB, "5").verbosity(), Some(5));
        assert_eq!(HostEnv::new().with(attr::VERB, "x").verbosity(), None);
        assert_eq!(HostEnv::new().verbosity(), None);
    }

    #[test]
    fn test_debug_omits_values() {
        let env = HostEnv::new().with(attr::PASSWORD, "hunter2");
        assert!(!format!("{:?}", env).contains("hunter2"));
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(EventResult::Success.code(), 0);
        assert_eq!(EventResult::Failure.code(), 1);
    }
}
