//! Worker Process Tests
//!
//! These tests fork real worker processes:
//! - supervisor handshake, request routing, EXIT and reaping
//! - a full verify, connect and disconnect run through both production
//!   workers against a local RADIUS responder

use radius_plugin::host::attr;
use radius_plugin::ipc::{DelUserRequest, Request, Status, read_frame, write_frame};
use radius_plugin::{
    Event, EventResult, HostEnv, Plugin, PluginConfig, ServerConfig, WorkerKind, spawn_worker,
};
use radius_proto::auth::calculate_response_authenticator;
use radius_proto::{Attribute, AttributeType, Code, Packet};
use std::net::{Ipv4Addr, UdpSocket};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const SECRET: &str = "testing123";

/// Minimal accounting worker: answers DEL_USER with SUCCEEDED until EXIT.
fn echo_worker(mut stream: UnixStream) -> i32 {
    if write_frame(&mut stream, &Status::InitSucceeded.encode().unwrap()).is_err() {
        return 1;
    }
    while let Ok(payload) = read_frame(&mut stream) {
        match Request::decode(&payload) {
            Ok(Request::Exit) => return 0,
            Ok(Request::DelUser(_)) => {
                let _ = write_frame(&mut stream, &Status::Succeeded.encode().unwrap());
            }
            _ => {
                let _ = write_frame(&mut stream, &Status::Failed.encode().unwrap());
            }
        }
    }
    3
}

#[test]
fn test_forked_worker_serves_requests() {
    let mut handle = spawn_worker(
        WorkerKind::Accounting,
        Some(Duration::from_secs(10)),
        echo_worker,
    )
    .unwrap();
    assert!(handle.pid().is_some());
    assert!(handle.is_initialized());

    let request = Request::DelUser(DelUserRequest {
        key: "cn,10.0.0.5:1194".to_string(),
    });
    let payload = handle.call(&request).unwrap();
    assert_eq!(Status::decode(&payload).unwrap(), Status::Succeeded);

    handle.shutdown();
    assert!(handle.pid().is_none());
    assert!(!handle.is_usable());
}

#[test]
fn test_forked_worker_init_failure() {
    let handle = spawn_worker(WorkerKind::Auth, Some(Duration::from_secs(10)), |mut stream| {
        let _ = write_frame(&mut stream, &Status::InitFailed.encode().unwrap());
        1
    })
    .unwrap();
    assert!(!handle.is_initialized());
    assert!(!handle.is_usable());
    drop(handle);
}

/// Local RADIUS responder accepting every request.
struct Responder {
    port: u16,
    seen: Arc<Mutex<Vec<(Code, Option<u32>)>>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Responder {
    fn start() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let seen = Arc::clone(&seen);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut buffer = vec![0u8; 4096];
                while !stop.load(Ordering::Relaxed) {
                    let Ok((len, from)) = socket.recv_from(&mut buffer) else {
                        continue;
                    };
                    let request = Packet::decode(&buffer[..len]).unwrap();
                    let status_type = request
                        .find_attribute(AttributeType::AcctStatusType as u8)
                        .and_then(|attr| attr.as_integer().ok());
                    seen.lock().unwrap().push((request.code, status_type));

                    let mut response = match request.code {
                        Code::AccessRequest => {
                            let mut accept =
                                Packet::new(Code::AccessAccept, request.identifier, [0u8; 16]);
                            accept.add_attribute(
                                Attribute::ipv4(
                                    AttributeType::FramedIpAddress as u8,
                                    Ipv4Addr::new(10, 8, 0, 5),
                                )
                                .unwrap(),
                            );
                            accept.add_attribute(
                                Attribute::string(AttributeType::FramedRoute as u8, "10.1.0.0/24")
                                    .unwrap(),
                            );
                            accept
                        }
                        _ => Packet::new(Code::AccountingResponse, request.identifier, [0u8; 16]),
                    };
                    response.authenticator = calculate_response_authenticator(
                        &response,
                        &request.authenticator,
                        SECRET.as_bytes(),
                    )
                    .unwrap();
                    socket.send_to(&response.encode().unwrap(), from).unwrap();
                }
            })
        };

        Responder {
            port,
            seen,
            stop,
            thread: Some(thread),
        }
    }

    fn finish(mut self) -> Vec<(Code, Option<u32>)> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.join().unwrap();
        }
        self.seen.lock().unwrap().clone()
    }
}

#[test]
fn test_plugin_lifecycle_with_real_workers() {
    let responder = Responder::start();
    let config = PluginConfig {
        servers: vec![ServerConfig {
            address: "127.0.0.1".to_string(),
            auth_port: responder.port,
            acct_port: responder.port,
            secret: SECRET.to_string(),
            timeout: 2,
            retries: 1,
            name: Some("local".to_string()),
        }],
        worker_timeout: Some(10),
        ..PluginConfig::default()
    };

    let mut plugin = Plugin::open(config).unwrap();
    assert!(plugin.auth_worker().is_initialized());
    assert!(plugin.acct_worker().is_initialized());

    let base = HostEnv::new()
        .with(attr::UNTRUSTED_IP, "10.0.0.5")
        .with(attr::UNTRUSTED_PORT, "1194")
        .with(attr::COMMON_NAME, "alice.example");
    let verify = base
        .clone()
        .with(attr::USERNAME, "alice")
        .with(attr::PASSWORD, "p");
    let connect = base.clone().with(attr::IFCONFIG_POOL_REMOTE_IP, "10.8.0.5");

    assert_eq!(
        plugin.handle(Event::AuthUserPassVerify, &verify),
        EventResult::Success
    );
    assert_eq!(plugin.handle(Event::ClientConnect, &connect), EventResult::Success);
    assert_eq!(plugin.handle(Event::ClientDisconnect, &base), EventResult::Success);
    assert!(plugin.registry().is_empty());

    plugin.close();
    assert_eq!(
        responder.finish(),
        vec![
            (Code::AccessRequest, None),
            (Code::AccountingRequest, Some(1)),
            (Code::AccountingRequest, Some(2)),
        ]
    );
}
