//! Acct-Session-Id generation.

use std::fmt::Write;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of a generated session id (hex-encoded MD5 digest)
pub const SESSION_ID_LEN: usize = 32;

/// Derive a session id from the client's identity and a wall-clock reading.
///
/// The id is the uppercase hex MD5 digest of the concatenated common name,
/// calling-station id, untrusted port and the time in seconds since the Unix
/// epoch. It correlates accounting records; it is not a secret.
pub fn session_id_at(
    common_name: &str,
    calling_station_id: &str,
    untrusted_port: &str,
    at: SystemTime,
) -> String {
    let seconds = at
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let mut context = md5::Context::new();
    context.consume(common_name.as_bytes());
    context.consume(calling_station_id.as_bytes());
    context.consume(untrusted_port.as_bytes());
    context.consume(seconds.to_string().as_bytes());
    let digest = context.compute();

    let mut id = String::with_capacity(SESSION_ID_LEN);
    for byte in digest.0 {
        let _ = write!(id, "{:02X}", byte);
    }
    id
}

/// [`session_id_at`] with the current time.
pub fn session_id(common_name: &str, calling_station_id: &str, untrusted_port: &str) -> String {
    session_id_at(
        common_name,
        calling_station_id,
        untrusted_port,
        SystemTime::now(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_format() {
        let id = session_id("alice.example", "10.0.0.5", "1194");
        assert_eq!(id.len(), SESSION_ID_LEN);
        assert!(
            id.chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        );
    }

    #[test]
    fn test_deterministic_for_same_inputs() {
        let a = session_id_at("alice.example", "10.0.0.5", "1194", at(1_700_000_000));
        let b = session_id_at("alice.example", "10.0.0.5", "1194", at(1_700_000_000));
        assert_eq!(a, b);
    }

    #[test]
    fn test_matches_digest_of_concatenation() {
        let id = session_id_at("cn", "1.2.3.4", "5", at(42));
        let expected = format!("{:X}", md5::compute(b"cn1.2.3.4542"));
        assert_eq!(id, expected);
    }

    #[test]
    fn test_inputs_change_id() {
        let base = session_id_at("alice", "10.0.0.5", "1194", at(100));
        assert_ne!(base, session_id_at("alice", "10.0.0.5", "1195", at(100)));
        assert_ne!(base, session_id_at("alice", "10.0.0.6", "1194", at(100)));
        assert_ne!(base, session_id_at("alice", "10.0.0.5", "1194", at(101)));
    }
}
