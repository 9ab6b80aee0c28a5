// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// In-process transports.
//
// The gateway side gets ordinary `Link`/`Acceptor` handles; the other side
// is a `MemoryPeer` that can inject bytes, collect what the gateway wrote,
// hang up, or make the next read/write fail. Everything is single-threaded
// (`Rc<RefCell<_>>`), like the router loop itself.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use super::{Acceptor, Link, ReadStatus, Transports, WriteStatus};

#[derive(Debug, Default)]
struct Pipe {
    /// Bytes waiting to be read by the gateway.
    inbound: VecDeque<u8>,
    /// Bytes written by the gateway.
    outbound: Vec<u8>,
    hung_up: bool,
    read_error: Option<io::ErrorKind>,
    write_error: Option<io::ErrorKind>,
    write_stalled: bool,
    /// Bytes the gateway may still write before stalling.
    write_budget: Option<usize>,
    /// The gateway dropped its end.
    released: bool,
}

/// Gateway-side end of an in-memory stream.
#[derive(Debug)]
pub struct MemoryLink {
    pipe: Rc<RefCell<Pipe>>,
    peer: Option<SocketAddr>,
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.pipe.borrow_mut().released = true;
    }
}

impl Link for MemoryLink {
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus> {
        let mut pipe = self.pipe.borrow_mut();
        if let Some(kind) = pipe.read_error.take() {
            return Err(kind.into());
        }
        if pipe.inbound.is_empty() {
            return Ok(if pipe.hung_up {
                ReadStatus::Closed
            } else {
                ReadStatus::WouldBlock
            });
        }
        let n = buf.len().min(pipe.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(ReadStatus::Data(n))
    }

    fn write_nonblocking(&mut self, data: &[u8]) -> io::Result<WriteStatus> {
        let mut pipe = self.pipe.borrow_mut();
        if let Some(kind) = pipe.write_error.take() {
            return Err(kind.into());
        }
        if pipe.hung_up {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let n = match pipe.write_budget {
            _ if pipe.write_stalled => 0,
            Some(budget) => budget.min(data.len()),
            None => data.len(),
        };
        if n == 0 {
            return Ok(WriteStatus::WouldBlock);
        }
        if let Some(budget) = pipe.write_budget.as_mut() {
            *budget -= n;
        }
        pipe.outbound.extend_from_slice(&data[..n]);
        Ok(WriteStatus::Written(n))
    }

    fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Test-side end of an in-memory stream.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    pipe: Rc<RefCell<Pipe>>,
}

impl MemoryPeer {
    /// Queue bytes for the gateway to read.
    pub fn send(&self, bytes: &[u8]) {
        self.pipe.borrow_mut().inbound.extend(bytes.iter().copied());
    }

    /// Drain everything the gateway wrote so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.pipe.borrow_mut().outbound)
    }

    /// Close this end: reads return `Closed` once drained, writes fail.
    pub fn hang_up(&self) {
        self.pipe.borrow_mut().hung_up = true;
    }

    /// Make the next gateway read fail with `kind`.
    pub fn fail_next_read(&self, kind: io::ErrorKind) {
        self.pipe.borrow_mut().read_error = Some(kind);
    }

    /// Make the next gateway write fail with `kind`.
    pub fn fail_next_write(&self, kind: io::ErrorKind) {
        self.pipe.borrow_mut().write_error = Some(kind);
    }

    /// While stalled, every write reports would-block.
    pub fn set_write_stalled(&self, stalled: bool) {
        self.pipe.borrow_mut().write_stalled = stalled;
    }

    /// Accept `bytes` more bytes, then stall. `None` lifts the limit.
    pub fn set_write_budget(&self, bytes: Option<usize>) {
        self.pipe.borrow_mut().write_budget = bytes;
    }

    /// The gateway dropped its end of the stream.
    pub fn is_released(&self) -> bool {
        self.pipe.borrow().released
    }
}

fn pipe(peer: Option<SocketAddr>) -> (MemoryLink, MemoryPeer) {
    let pipe = Rc::new(RefCell::new(Pipe::default()));
    (
        MemoryLink {
            pipe: Rc::clone(&pipe),
            peer,
        },
        MemoryPeer { pipe },
    )
}

type PendingQueue = Rc<RefCell<VecDeque<MemoryLink>>>;

/// Hands out connections queued with [`MemoryTransports::connect`].
#[derive(Debug)]
pub struct MemoryAcceptor {
    pending: PendingQueue,
}

impl Acceptor for MemoryAcceptor {
    type Peer = MemoryLink;

    fn accept_nonblocking(&mut self) -> io::Result<Option<MemoryLink>> {
        Ok(self.pending.borrow_mut().pop_front())
    }
}

#[derive(Debug, Default)]
struct Hub {
    bus: Option<MemoryPeer>,
    pending: PendingQueue,
    fail_bus_open: bool,
    fail_acceptor_open: bool,
    bus_opens: usize,
    acceptor_opens: usize,
    connections: u16,
}

/// In-memory [`Transports`]. Clones share state, so a test keeps one clone
/// while the router owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransports {
    hub: Rc<RefCell<Hub>>,
}

impl MemoryTransports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a client connection and return its test-side end.
    pub fn connect(&self) -> MemoryPeer {
        let mut hub = self.hub.borrow_mut();
        hub.connections = hub.connections.wrapping_add(1);
        let addr = SocketAddr::from(([127, 0, 0, 1], 40_000u16.wrapping_add(hub.connections)));
        let (link, peer) = pipe(Some(addr));
        hub.pending.borrow_mut().push_back(link);
        peer
    }

    /// Test-side end of the most recently opened bus.
    pub fn bus(&self) -> Option<MemoryPeer> {
        self.hub.borrow().bus.clone()
    }

    pub fn set_fail_bus_open(&self, fail: bool) {
        self.hub.borrow_mut().fail_bus_open = fail;
    }

    pub fn set_fail_acceptor_open(&self, fail: bool) {
        self.hub.borrow_mut().fail_acceptor_open = fail;
    }

    /// Number of successful bus opens.
    pub fn bus_opens(&self) -> usize {
        self.hub.borrow().bus_opens
    }

    /// Number of successful acceptor opens.
    pub fn acceptor_opens(&self) -> usize {
        self.hub.borrow().acceptor_opens
    }
}

impl Transports for MemoryTransports {
    type Bus = MemoryLink;
    type Peer = MemoryLink;
    type Acceptor = MemoryAcceptor;

    fn open_bus(&mut self, device: &str, _raw_mode: bool) -> io::Result<MemoryLink> {
        let mut hub = self.hub.borrow_mut();
        if hub.fail_bus_open {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such device: {}", device),
            ));
        }
        let (link, peer) = pipe(None);
        hub.bus = Some(peer);
        hub.bus_opens += 1;
        Ok(link)
    }

    fn open_acceptor(&mut self, addr: SocketAddr, _backlog: i32) -> io::Result<MemoryAcceptor> {
        let mut hub = self.hub.borrow_mut();
        if hub.fail_acceptor_open {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("address in use: {}", addr),
            ));
        }
        hub.acceptor_opens += 1;
        Ok(MemoryAcceptor {
            pending: Rc::clone(&hub.pending),
        })
    }
}
