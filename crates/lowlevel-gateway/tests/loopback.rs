// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability

//! Integration tests over real loopback TCP
//!
//! The serial side is an in-memory bus, the client side a real listener
//! bound to an ephemeral loopback port.
//!
//! # Test Coverage
//!
//! - Accepting TCP clients into slots
//! - Subscription then channel delivery to a real socket
//! - Client frames reaching the bus with the slot id
//! - Client disconnect freeing the slot

use std::cell::Cell;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::rc::Rc;
use std::time::{Duration, Instant};

use lowlevel_gateway::command;
use lowlevel_gateway::transport::{MemoryLink, MemoryPeer, MemoryTransports, TcpAcceptor};
use lowlevel_gateway::{GatewayConfig, Router, Transports, BROADCAST_CLIENT_ID};

/// Memory bus plus a loopback listener on an ephemeral port.
#[derive(Clone, Default)]
struct LoopbackTransports {
    bus: MemoryTransports,
    bound: Rc<Cell<Option<SocketAddr>>>,
}

impl Transports for LoopbackTransports {
    type Bus = MemoryLink;
    type Peer = TcpStream;
    type Acceptor = TcpAcceptor;

    fn open_bus(&mut self, device: &str, raw_mode: bool) -> io::Result<MemoryLink> {
        self.bus.open_bus(device, raw_mode)
    }

    fn open_acceptor(&mut self, _addr: SocketAddr, backlog: i32) -> io::Result<TcpAcceptor> {
        let acceptor = TcpAcceptor::bind(([127, 0, 0, 1], 0).into(), backlog)?;
        self.bound.set(Some(acceptor.local_addr()?));
        Ok(acceptor)
    }
}

struct Harness {
    router: Router<LoopbackTransports>,
    bus: MemoryPeer,
    addr: SocketAddr,
}

impl Harness {
    fn start(max_clients: usize) -> Self {
        let mut config = GatewayConfig::default();
        config.socket.max_clients = max_clients;
        config.socket.address = Some([127, 0, 0, 1].into());
        config.pause.enabled = false;

        let transports = LoopbackTransports::default();
        let mut router = Router::new(config, transports.clone()).expect("router");
        router.open().expect("open");
        let bus = transports.bus.bus().expect("bus");
        let addr = transports.bound.get().expect("bound");
        Self { router, bus, addr }
    }

    /// Cycle the router until `done` holds.
    fn pump_until<F>(&mut self, what: &str, mut done: F)
    where
        F: FnMut(&mut Self) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(self) {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            self.router.communicate().expect("communicate");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn connect(&mut self) -> TcpStream {
        let before = self.router.connections().len();
        let client = TcpStream::connect(self.addr).expect("connect");
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        self.pump_until("accept", |h| h.router.connections().len() > before);
        client
    }
}

#[test]
fn test_subscribe_and_receive_over_tcp() {
    let mut h = Harness::start(4);
    let _idle = h.connect();
    let mut client = h.connect();
    assert!(h.router.connections().is_connected(1));

    client.write_all(&[0xFF, command::subscribe(9), 0x00]).unwrap();
    h.pump_until("subscription", |h| h.router.subscriptions().is_subscribed(1, 9));
    assert!(!h.router.subscriptions().is_subscribed(0, 9));

    h.bus
        .send(&[0xFF, BROADCAST_CLIENT_ID, command::channel_data(9, 0), 0x02, 0x12, 0x34]);
    h.pump_until("delivery", |h| h.router.stats().frames_to_sockets == 1);

    let mut received = [0u8; 5];
    client.read_exact(&mut received).unwrap();
    assert_eq!(received, [0xFF, 0x09, 0x02, 0x12, 0x34]);
}

#[test]
fn test_client_frame_reaches_bus() {
    let mut h = Harness::start(2);
    let mut client = h.connect();

    // split across two writes
    client.write_all(&[0xFF, 0x84, 0xFF, b'p']).unwrap();
    h.router.communicate().unwrap();
    client.write_all(&[b'i', b'n', b'g', 0x00]).unwrap();

    let mut written = Vec::new();
    h.pump_until("bus write", |h| {
        written.extend(h.bus.take_written());
        written.len() >= 9
    });
    assert_eq!(written, vec![0xFF, 0x00, 0x84, 0xFF, b'p', b'i', b'n', b'g', 0x00]);
}

#[test]
fn test_disconnect_frees_slot() {
    let mut h = Harness::start(1);
    let client = h.connect();
    drop(client);
    h.pump_until("disconnect", |h| h.router.connections().is_empty());
    assert_eq!(h.router.stats().disconnects, 1);

    let _again = h.connect();
    assert!(h.router.connections().is_connected(0));
    assert_eq!(h.router.stats().connections_accepted, 2);
}
