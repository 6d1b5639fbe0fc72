//! Upstream RADIUS client
//!
//! Sends Access-Request and Accounting-Request packets over UDP to the
//! configured servers in order. Each server gets `retries + 1` transmissions
//! of the same packet, each waiting up to the server's timeout, before the
//! next server is tried. Replies are accepted only from the server's
//! address, with the request's identifier and a valid response
//! authenticator; anything else is dropped.

use crate::config::{ConfigError, PluginConfig, ServerConfig};
use crate::ipc::protocol::{AddUserRequest, VerifyOutcome, VerifyReply, VerifyRequest};
use async_trait::async_trait;
use radius_proto::auth::{
    calculate_accounting_request_authenticator, encrypt_user_password,
    generate_request_authenticator, verify_response_authenticator,
};
use radius_proto::{AcctAuthentic, AcctStatusType, AcctTerminateCause};
use radius_proto::{Attribute, AttributeType, Code, Packet, PacketError};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, trace, warn};
use zeroize::Zeroizing;

use super::accounting::AccountingBackend;
use super::auth::AuthBackend;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("No server answered after {0} attempts")]
    NoResponse(usize),

    #[error("Unexpected response: {0:?}")]
    UnexpectedResponse(Code),
}

/// One upstream server with its addresses resolved.
#[derive(Debug)]
struct Upstream {
    name: String,
    auth_addr: SocketAddr,
    acct_addr: SocketAddr,
    secret: Zeroizing<Vec<u8>>,
    timeout: Duration,
    retries: u8,
}

impl Upstream {
    fn resolve(server: &ServerConfig) -> Result<Self, ConfigError> {
        Ok(Upstream {
            name: server.display_name().to_string(),
            auth_addr: server.auth_addr()?,
            acct_addr: server.acct_addr()?,
            secret: Zeroizing::new(server.secret.as_bytes().to_vec()),
            timeout: server.timeout(),
            retries: server.retries,
        })
    }
}

/// Attributes describing this NAS, sent with every request.
#[derive(Debug, Clone)]
struct NasAttributes {
    identifier: String,
    ip_address: Option<Ipv4Addr>,
    port_type: u32,
    service_type: u32,
    framed_protocol: u32,
}

impl NasAttributes {
    fn append_to(&self, packet: &mut Packet) -> Result<(), PacketError> {
        if !self.identifier.is_empty() {
            packet.add_attribute(Attribute::string(
                AttributeType::NasIdentifier as u8,
                self.identifier.as_str(),
            )?);
        }
        if let Some(ip) = self.ip_address {
            packet.add_attribute(Attribute::ipv4(AttributeType::NasIpAddress as u8, ip)?);
        }
        packet.add_attribute(Attribute::integer(
            AttributeType::NasPortType as u8,
            self.port_type,
        )?);
        Ok(())
    }
}

/// The role a packet plays, which decides the destination port.
#[derive(Debug, Clone, Copy)]
enum Service {
    Auth,
    Accounting,
}

/// RADIUS client used by both workers.
#[derive(Debug)]
pub struct RadiusClient {
    servers: Vec<Upstream>,
    nas: NasAttributes,
    next_identifier: AtomicU8,
}

impl RadiusClient {
    /// Build a client from the plugin configuration, resolving every
    /// server address up front.
    pub fn new(config: &PluginConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let servers = config
            .servers
            .iter()
            .map(Upstream::resolve)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RadiusClient {
            servers,
            nas: NasAttributes {
                identifier: config.nas_identifier.clone(),
                ip_address: config.nas_ip_address,
                port_type: config.nas_port_type,
                service_type: config.service_type,
                framed_protocol: config.framed_protocol,
            },
            next_identifier: AtomicU8::new(rand::random()),
        })
    }

    fn next_identifier(&self) -> u8 {
        self.next_identifier.fetch_add(1, Ordering::Relaxed)
    }

    /// Send an Access-Request and interpret the reply.
    pub async fn access_request(&self, request: &VerifyRequest) -> Result<VerifyOutcome, ClientError> {
        let response = self
            .exchange(Service::Auth, |server, identifier| {
                self.build_access_request(request, server, identifier)
            })
            .await?;

        match response.code {
            Code::AccessAccept => Ok(VerifyOutcome::Accepted(parse_accept(&response)?)),
            Code::AccessReject | Code::AccessChallenge => {
                for attr in response.find_all_attributes(AttributeType::ReplyMessage as u8) {
                    if let Ok(message) = attr.as_string() {
                        debug!(username = %request.username, message, "Reply-Message");
                    }
                }
                Ok(VerifyOutcome::Rejected)
            }
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    /// Send one Accounting-Request for `session`.
    pub async fn accounting_request(
        &self,
        status: AcctStatusType,
        session: &AddUserRequest,
        session_time: Option<u32>,
        cause: Option<AcctTerminateCause>,
    ) -> Result<(), ClientError> {
        let response = self
            .exchange(Service::Accounting, |server, identifier| {
                self.build_accounting_request(status, session, session_time, cause, server, identifier)
            })
            .await?;

        match response.code {
            Code::AccountingResponse => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    fn build_access_request(
        &self,
        request: &VerifyRequest,
        server: &Upstream,
        identifier: u8,
    ) -> Result<Packet, PacketError> {
        let authenticator = generate_request_authenticator();
        let mut packet = Packet::new(Code::AccessRequest, identifier, authenticator);

        packet.add_attribute(Attribute::string(
            AttributeType::UserName as u8,
            request.username.as_str(),
        )?);
        let hidden = encrypt_user_password(&request.password, &server.secret, &authenticator);
        packet.add_attribute(Attribute::new(AttributeType::UserPassword as u8, hidden)?);
        packet.add_attribute(Attribute::integer(
            AttributeType::NasPort as u8,
            request.port.into(),
        )?);
        packet.add_attribute(Attribute::string(
            AttributeType::CallingStationId as u8,
            request.calling_station_id.as_str(),
        )?);
        self.nas.append_to(&mut packet)?;
        packet.add_attribute(Attribute::integer(
            AttributeType::ServiceType as u8,
            self.nas.service_type,
        )?);
        packet.add_attribute(Attribute::integer(
            AttributeType::FramedProtocol as u8,
            self.nas.framed_protocol,
        )?);
        if let Some(ip) = parse_framed_ip(&request.framed_ip) {
            packet.add_attribute(Attribute::ipv4(AttributeType::FramedIpAddress as u8, ip)?);
        }
        Ok(packet)
    }

    fn build_accounting_request(
        &self,
        status: AcctStatusType,
        session: &AddUserRequest,
        session_time: Option<u32>,
        cause: Option<AcctTerminateCause>,
        server: &Upstream,
        identifier: u8,
    ) -> Result<Packet, PacketError> {
        let mut packet = Packet::new(Code::AccountingRequest, identifier, [0u8; 16]);

        packet.add_attribute(Attribute::integer(
            AttributeType::AcctStatusType as u8,
            status.as_u32(),
        )?);
        packet.add_attribute(Attribute::string(
            AttributeType::AcctSessionId as u8,
            session.session_id.as_str(),
        )?);
        packet.add_attribute(Attribute::string(
            AttributeType::UserName as u8,
            session.username.as_str(),
        )?);
        packet.add_attribute(Attribute::integer(
            AttributeType::NasPort as u8,
            session.port.into(),
        )?);
        packet.add_attribute(Attribute::string(
            AttributeType::CallingStationId as u8,
            session.calling_station_id.as_str(),
        )?);
        if let Some(ip) = parse_framed_ip(&session.framed_ip) {
            packet.add_attribute(Attribute::ipv4(AttributeType::FramedIpAddress as u8, ip)?);
        }
        self.nas.append_to(&mut packet)?;
        packet.add_attribute(Attribute::integer(
            AttributeType::AcctAuthentic as u8,
            AcctAuthentic::Radius.as_u32(),
        )?);
        if status.reports_session_time() {
            packet.add_attribute(Attribute::integer(
                AttributeType::AcctSessionTime as u8,
                session_time.unwrap_or(0),
            )?);
        }
        if let Some(cause) = cause {
            packet.add_attribute(Attribute::integer(
                AttributeType::AcctTerminateCause as u8,
                cause.as_u32(),
            )?);
        }
        packet.extend_attributes(Attribute::decode_all(&session.vsa)?);

        packet.authenticator = calculate_accounting_request_authenticator(&packet, &server.secret)?;
        Ok(packet)
    }

    /// Try every server in order until one answers.
    async fn exchange<F>(&self, service: Service, build: F) -> Result<Packet, ClientError>
    where
        F: Fn(&Upstream, u8) -> Result<Packet, PacketError>,
    {
        let mut attempts = 0;
        for server in &self.servers {
            let addr = match service {
                Service::Auth => server.auth_addr,
                Service::Accounting => server.acct_addr,
            };
            let request = build(server, self.next_identifier())?;
            let data = request.encode()?;

            let bind_addr: SocketAddr = if addr.is_ipv4() {
                (Ipv4Addr::UNSPECIFIED, 0).into()
            } else {
                (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
            };
            let socket = UdpSocket::bind(bind_addr).await?;

            for attempt in 0..=server.retries {
                attempts += 1;
                trace!(
                    server = %server.name,
                    %addr,
                    identifier = request.identifier,
                    attempt,
                    "Sending request"
                );
                socket.send_to(&data, addr).await?;

                if let Some(response) = receive_reply(&socket, addr, &request, server).await {
                    debug!(
                        server = %server.name,
                        code = ?response.code,
                        identifier = response.identifier,
                        "Response received"
                    );
                    return Ok(response);
                }
            }
            warn!(server = %server.name, %addr, "Server did not answer; trying next");
        }

        info!(attempts, "No RADIUS server answered");
        Err(ClientError::NoResponse(attempts))
    }
}

/// Wait up to the server's timeout for a valid reply to `request`.
async fn receive_reply(
    socket: &UdpSocket,
    addr: SocketAddr,
    request: &Packet,
    server: &Upstream,
) -> Option<Packet> {
    let deadline = Instant::now() + server.timeout;
    let mut buffer = vec![0u8; Packet::MAX_PACKET_SIZE];

    loop {
        let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buffer)).await {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                warn!(server = %server.name, error = %e, "Receive failed");
                return None;
            }
            Err(_) => return None,
        };

        if from != addr {
            trace!(%from, "Dropping datagram from unexpected source");
            continue;
        }
        let response = match Packet::decode(&buffer[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = %e, "Dropping malformed response");
                continue;
            }
        };
        if response.identifier != request.identifier || !response.code.answers(request.code) {
            trace!(identifier = response.identifier, "Dropping unmatched response");
            continue;
        }
        if !verify_response_authenticator(&response, &request.authenticator, &server.secret) {
            warn!(server = %server.name, "Dropping response with bad authenticator");
            continue;
        }
        return Some(response);
    }
}

fn parse_framed_ip(value: &str) -> Option<Ipv4Addr> {
    if value.is_empty() {
        return None;
    }
    value.parse().ok()
}

/// Pull what the session needs out of an Access-Accept.
fn parse_accept(response: &Packet) -> Result<VerifyReply, PacketError> {
    let framed_routes = response
        .find_all_attributes(AttributeType::FramedRoute as u8)
        .into_iter()
        .filter_map(|attr| attr.as_string().ok())
        .collect::<Vec<_>>()
        .join(";");

    let framed_ip = response
        .find_attribute(AttributeType::FramedIpAddress as u8)
        .and_then(|attr| attr.as_ipv4().ok())
        .map(|ip| ip.to_string())
        .unwrap_or_default();

    let acct_interim_interval = response
        .find_attribute(AttributeType::AcctInterimInterval as u8)
        .and_then(|attr| attr.as_integer().ok())
        .unwrap_or(0);

    let mut vsa = Vec::new();
    for attr in response.find_all_attributes(AttributeType::VendorSpecific as u8) {
        attr.encode_into(&mut vsa)?;
    }

    Ok(VerifyReply {
        framed_routes,
        framed_ip,
        acct_interim_interval,
        vsa,
    })
}

#[async_trait]
impl AuthBackend for RadiusClient {
    async fn authenticate(&self, request: &VerifyRequest) -> Result<VerifyOutcome, ClientError> {
        self.access_request(request).await
    }
}

#[async_trait]
impl AccountingBackend for RadiusClient {
    async fn start(&self, session: &AddUserRequest) -> Result<(), ClientError> {
        self.accounting_request(AcctStatusType::Start, session, None, None)
            .await
    }

    async fn interim(&self, session: &AddUserRequest, session_time: u32) -> Result<(), ClientError> {
        self.accounting_request(AcctStatusType::InterimUpdate, session, Some(session_time), None)
            .await
    }

    async fn stop(
        &self,
        session: &AddUserRequest,
        session_time: u32,
        cause: AcctTerminateCause,
    ) -> Result<(), ClientError> {
        self.accounting_request(AcctStatusType::Stop, session, Some(session_time), Some(cause))
            .await
    }
}
