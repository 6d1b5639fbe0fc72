//! RADIUS protocol codec for network access servers
//!
//! This crate implements the client (NAS) side of RADIUS as defined in
//! RFC 2865 (authentication) and RFC 2866 (accounting).
//!
//! # Features
//!
//! - Packet encoding and decoding
//! - The attribute types a NAS sends and receives, including Vendor-Specific
//! - User-Password hiding (RFC 2865 Section 5.2)
//! - Request, accounting and response authenticators
//!
//! # Example
//!
//! ```rust
//! use radius_proto::{Attribute, AttributeType, Code, Packet};
//! use radius_proto::auth::{encrypt_user_password, generate_request_authenticator};
//!
//! let req_auth = generate_request_authenticator();
//! let mut packet = Packet::new(Code::AccessRequest, 1, req_auth);
//!
//! packet.add_attribute(
//!     Attribute::string(AttributeType::UserName as u8, "alice").unwrap()
//! );
//!
//! let hidden = encrypt_user_password("password", b"secret", &req_auth);
//! packet.add_attribute(
//!     Attribute::new(AttributeType::UserPassword as u8, hidden).unwrap()
//! );
//!
//! let bytes = packet.encode().unwrap();
//! assert_eq!(Packet::decode(&bytes).unwrap().attributes.len(), 2);
//! ```

pub mod accounting;
pub mod attributes;
pub mod auth;
pub mod packet;

pub use accounting::{AcctAuthentic, AcctStatusType, AcctTerminateCause};
pub use attributes::{Attribute, AttributeType, FramedProtocol, NasPortType, ServiceType};
pub use auth::{
    calculate_accounting_request_authenticator, calculate_response_authenticator,
    decrypt_user_password, encrypt_user_password, generate_request_authenticator,
    verify_response_authenticator,
};
pub use packet::{Code, Packet, PacketError};
