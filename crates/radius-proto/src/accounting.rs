//! Accounting-Request values (RFC 2866)
//!
//! A tunnel client is reported with one Start, zero or more Interim-Update
//! and one Stop request. Stop carries the reason the session ended.
//!
//! ```rust
//! use radius_proto::accounting::{AcctStatusType, AcctTerminateCause};
//!
//! assert_eq!(AcctStatusType::InterimUpdate.as_u32(), 3);
//! assert!(AcctStatusType::InterimUpdate.reports_session_time());
//! assert_eq!(AcctTerminateCause::NasReboot.as_u32(), 11);
//! ```

/// Acct-Status-Type (RFC 2866 Section 5.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AcctStatusType {
    Start = 1,
    Stop = 2,
    InterimUpdate = 3,
}

impl AcctStatusType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Interim-Update and Stop carry Acct-Session-Time
    pub fn reports_session_time(self) -> bool {
        self != AcctStatusType::Start
    }
}

/// Acct-Terminate-Cause (RFC 2866 Section 5.10), limited to the causes the
/// accounting worker reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AcctTerminateCause {
    /// Client disconnected
    UserRequest = 1,
    /// Plugin shutting down with sessions still open
    NasReboot = 11,
}

impl AcctTerminateCause {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Acct-Authentic (RFC 2866 Section 5.6). Sessions opened by this NAS are
/// always RADIUS authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AcctAuthentic {
    Radius = 1,
}

impl AcctAuthentic {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_type_values() {
        assert_eq!(AcctStatusType::Start.as_u32(), 1);
        assert_eq!(AcctStatusType::Stop.as_u32(), 2);
        assert_eq!(AcctStatusType::InterimUpdate.as_u32(), 3);
    }

    #[test]
    fn test_session_time_reporting() {
        assert!(!AcctStatusType::Start.reports_session_time());
        assert!(AcctStatusType::Stop.reports_session_time());
        assert!(AcctStatusType::InterimUpdate.reports_session_time());
    }

    #[test]
    fn test_terminate_cause_values() {
        assert_eq!(AcctTerminateCause::UserRequest.as_u32(), 1);
        assert_eq!(AcctTerminateCause::NasReboot.as_u32(), 11);
        assert_eq!(AcctAuthentic::Radius.as_u32(), 1);
    }
}
