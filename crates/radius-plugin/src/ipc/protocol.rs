//! Request and response messages exchanged with the workers
//!
//! | Opcode     | Worker     | Request fields                                   | Response                         |
//! |------------|------------|--------------------------------------------------|----------------------------------|
//! | `VERIFY`   | auth       | username, password, port, calling-station id, common name, framed IP | status; on success routes, framed IP, interval, VSA buffer |
//! | `ADD_USER` | accounting | username, session id, port, calling-station id, framed IP, common name, interval, routes, key, untrusted port, VSA buffer | status |
//! | `DEL_USER` | accounting | key                                              | status                           |
//! | `EXIT`     | both       | none                                             | none                             |
//!
//! A worker opens the conversation with a single handshake status.

use super::frame::{FrameError, FrameReader, FrameWriter};
use std::fmt;
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Opcode {
    Verify = 1,
    AddUser = 2,
    DelUser = 3,
    Exit = 4,
}

impl Opcode {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(Opcode::Verify),
            2 => Some(Opcode::AddUser),
            3 => Some(Opcode::DelUser),
            4 => Some(Opcode::Exit),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Opcode::Verify => "VERIFY",
            Opcode::AddUser => "ADD_USER",
            Opcode::DelUser => "DEL_USER",
            Opcode::Exit => "EXIT",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    InitSucceeded = 10,
    InitFailed = 11,
    Succeeded = 12,
    Failed = 13,
}

impl Status {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            10 => Some(Status::InitSucceeded),
            11 => Some(Status::InitFailed),
            12 => Some(Status::Succeeded),
            13 => Some(Status::Failed),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Encode a status-only response or handshake.
    pub fn encode(self) -> Result<Vec<u8>, FrameError> {
        let mut writer = FrameWriter::new();
        writer.put_int(self.as_i32());
        writer.finish()
    }

    /// Decode a status-only response or handshake.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        let mut reader = FrameReader::new(payload);
        let status = read_status(&mut reader)?;
        reader.finish()?;
        Ok(status)
    }
}

fn read_status(reader: &mut FrameReader<'_>) -> Result<Status, FrameError> {
    let value = reader.get_int()?;
    Status::from_i32(value).ok_or(FrameError::UnknownStatus(value))
}

fn read_port(reader: &mut FrameReader<'_>) -> Result<u16, FrameError> {
    let value = reader.get_int()?;
    u16::try_from(value).map_err(|_| FrameError::OutOfRange {
        field: "port",
        value: value.into(),
    })
}

fn read_interval(reader: &mut FrameReader<'_>) -> Result<u32, FrameError> {
    let value = reader.get_int()?;
    u32::try_from(value).map_err(|_| FrameError::OutOfRange {
        field: "interval",
        value: value.into(),
    })
}

fn interval_to_wire(interval: u32) -> i32 {
    i32::try_from(interval).unwrap_or(i32::MAX)
}

/// Credentials sent to the auth worker.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifyRequest {
    pub username: String,
    pub password: Zeroizing<String>,
    pub port: u16,
    pub calling_station_id: String,
    pub common_name: String,
    pub framed_ip: String,
}

impl fmt::Debug for VerifyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifyRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("calling_station_id", &self.calling_station_id)
            .field("common_name", &self.common_name)
            .field("framed_ip", &self.framed_ip)
            .finish()
    }
}

/// What a successful VERIFY carries back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReply {
    /// Framed-Route values separated by `;`
    pub framed_routes: String,
    pub framed_ip: String,
    /// Acct-Interim-Interval in seconds, 0 for none
    pub acct_interim_interval: u32,
    /// Raw Vendor-Specific attributes
    pub vsa: Vec<u8>,
}

/// Outcome of a VERIFY round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Accepted(VerifyReply),
    Rejected,
}

impl VerifyOutcome {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut writer = FrameWriter::new();
        match self {
            VerifyOutcome::Accepted(reply) => {
                writer
                    .put_int(Status::Succeeded.as_i32())
                    .put_str(&reply.framed_routes)
                    .put_str(&reply.framed_ip)
                    .put_int(interval_to_wire(reply.acct_interim_interval))
                    .put_buf(&reply.vsa);
            }
            VerifyOutcome::Rejected => {
                writer.put_int(Status::Failed.as_i32());
            }
        }
        writer.finish()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        let mut reader = FrameReader::new(payload);
        let outcome = match read_status(&mut reader)? {
            Status::Succeeded => VerifyOutcome::Accepted(VerifyReply {
                framed_routes: reader.get_str()?,
                framed_ip: reader.get_str()?,
                acct_interim_interval: read_interval(&mut reader)?,
                vsa: reader.get_buf()?,
            }),
            _ => VerifyOutcome::Rejected,
        };
        reader.finish()?;
        Ok(outcome)
    }
}

/// Full session snapshot that starts accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddUserRequest {
    pub username: String,
    pub session_id: String,
    pub port: u16,
    pub calling_station_id: String,
    pub framed_ip: String,
    pub common_name: String,
    pub acct_interim_interval: u32,
    pub framed_routes: String,
    pub key: String,
    pub untrusted_port: String,
    pub vsa: Vec<u8>,
}

/// Stops accounting for one session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelUserRequest {
    pub key: String,
}

/// A foreground-to-worker request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Verify(VerifyRequest),
    AddUser(AddUserRequest),
    DelUser(DelUserRequest),
    Exit,
}

impl Request {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Verify(_) => Opcode::Verify,
            Request::AddUser(_) => Opcode::AddUser,
            Request::DelUser(_) => Opcode::DelUser,
            Request::Exit => Opcode::Exit,
        }
    }

    /// Encode the request payload. A VERIFY payload holds the password, so
    /// the buffer is wiped on drop.
    pub fn encode(&self) -> Result<Zeroizing<Vec<u8>>, FrameError> {
        let mut writer = FrameWriter::new();
        writer.put_int(self.opcode().as_i32());
        match self {
            Request::Verify(req) => {
                writer
                    .put_str(&req.username)
                    .put_str(&req.password)
                    .put_int(req.port.into())
                    .put_str(&req.calling_station_id)
                    .put_str(&req.common_name)
                    .put_str(&req.framed_ip);
            }
            Request::AddUser(req) => {
                writer
                    .put_str(&req.username)
                    .put_str(&req.session_id)
                    .put_int(req.port.into())
                    .put_str(&req.calling_station_id)
                    .put_str(&req.framed_ip)
                    .put_str(&req.common_name)
                    .put_int(interval_to_wire(req.acct_interim_interval))
                    .put_str(&req.framed_routes)
                    .put_str(&req.key)
                    .put_str(&req.untrusted_port)
                    .put_buf(&req.vsa);
            }
            Request::DelUser(req) => {
                writer.put_str(&req.key);
            }
            Request::Exit => {}
        }
        writer.finish().map(Zeroizing::new)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        let mut reader = FrameReader::new(payload);
        let raw = reader.get_int()?;
        let opcode = Opcode::from_i32(raw).ok_or(FrameError::UnknownOpcode(raw))?;

        let request = match opcode {
            Opcode::Verify => Request::Verify(VerifyRequest {
                username: reader.get_str()?,
                password: Zeroizing::new(reader.get_str()?),
                port: read_port(&mut reader)?,
                calling_station_id: reader.get_str()?,
                common_name: reader.get_str()?,
                framed_ip: reader.get_str()?,
            }),
            Opcode::AddUser => Request::AddUser(AddUserRequest {
                username: reader.get_str()?,
                session_id: reader.get_str()?,
                port: read_port(&mut reader)?,
                calling_station_id: reader.get_str()?,
                framed_ip: reader.get_str()?,
                common_name: reader.get_str()?,
                acct_interim_interval: read_interval(&mut reader)?,
                framed_routes: reader.get_str()?,
                key: reader.get_str()?,
                untrusted_port: reader.get_str()?,
                vsa: reader.get_buf()?,
            }),
            Opcode::DelUser => Request::DelUser(DelUserRequest {
                key: reader.get_str()?,
            }),
            Opcode::Exit => Request::Exit,
        };
        reader.finish()?;
        Ok(request)
    }
}
