/// Attribute types a NAS sends or reads (RFC 2865, RFC 2866, RFC 2869)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttributeType {
    /// User-Name (1)
    UserName = 1,
    /// User-Password (2)
    UserPassword = 2,
    /// NAS-IP-Address (4)
    NasIpAddress = 4,
    /// NAS-Port (5)
    NasPort = 5,
    /// Service-Type (6)
    ServiceType = 6,
    /// Framed-Protocol (7)
    FramedProtocol = 7,
    /// Framed-IP-Address (8)
    FramedIpAddress = 8,
    /// Reply-Message (18)
    ReplyMessage = 18,
    /// Framed-Route (22)
    FramedRoute = 22,
    /// Class (25)
    Class = 25,
    /// Vendor-Specific (26)
    VendorSpecific = 26,
    /// Session-Timeout (27)
    SessionTimeout = 27,
    /// Calling-Station-Id (31)
    CallingStationId = 31,
    /// NAS-Identifier (32)
    NasIdentifier = 32,
    /// Acct-Status-Type (40) - RFC 2866
    AcctStatusType = 40,
    /// Acct-Delay-Time (41) - RFC 2866
    AcctDelayTime = 41,
    /// Acct-Session-Id (44) - RFC 2866
    AcctSessionId = 44,
    /// Acct-Authentic (45) - RFC 2866
    AcctAuthentic = 45,
    /// Acct-Session-Time (46) - RFC 2866
    AcctSessionTime = 46,
    /// Acct-Terminate-Cause (49) - RFC 2866
    AcctTerminateCause = 49,
    /// NAS-Port-Type (61)
    NasPortType = 61,
    /// Acct-Interim-Interval (85) - RFC 2869
    AcctInterimInterval = 85,
    /// NAS-Port-Id (87) - RFC 2869
    NasPortId = 87,
}

impl AttributeType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AttributeType::UserName),
            2 => Some(AttributeType::UserPassword),
            4 => Some(AttributeType::NasIpAddress),
            5 => Some(AttributeType::NasPort),
            6 => Some(AttributeType::ServiceType),
            7 => Some(AttributeType::FramedProtocol),
            8 => Some(AttributeType::FramedIpAddress),
            18 => Some(AttributeType::ReplyMessage),
            22 => Some(AttributeType::FramedRoute),
            25 => Some(AttributeType::Class),
            26 => Some(AttributeType::VendorSpecific),
            27 => Some(AttributeType::SessionTimeout),
            31 => Some(AttributeType::CallingStationId),
            32 => Some(AttributeType::NasIdentifier),
            40 => Some(AttributeType::AcctStatusType),
            41 => Some(AttributeType::AcctDelayTime),
            44 => Some(AttributeType::AcctSessionId),
            45 => Some(AttributeType::AcctAuthentic),
            46 => Some(AttributeType::AcctSessionTime),
            49 => Some(AttributeType::AcctTerminateCause),
            61 => Some(AttributeType::NasPortType),
            85 => Some(AttributeType::AcctInterimInterval),
            87 => Some(AttributeType::NasPortId),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// NAS-Port-Type values (RFC 2865 Section 5.41)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NasPortType {
    /// The port type of a VPN tunnel
    Virtual = 5,
}

impl NasPortType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Service-Type values (RFC 2865 Section 5.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ServiceType {
    Framed = 2,
}

impl ServiceType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Framed-Protocol values (RFC 2865 Section 5.7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FramedProtocol {
    Ppp = 1,
}

impl FramedProtocol {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}
