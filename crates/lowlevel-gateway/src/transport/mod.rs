// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

// Transport abstraction for the serial bus and the TCP clients.
//
// Every operation is non-blocking: "would block" is reported as a status,
// never as an error, so one router cycle never stalls on I/O.

pub mod memory;
pub mod serial;
pub mod tcp;

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

pub use memory::{MemoryAcceptor, MemoryLink, MemoryPeer, MemoryTransports};
pub use serial::SerialLink;
pub use tcp::TcpAcceptor;

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Outcome of a non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` bytes were read into the buffer.
    Data(usize),
    /// Nothing available this cycle.
    WouldBlock,
    /// The peer closed the stream.
    Closed,
}

/// Outcome of a non-blocking write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Written(usize),
    WouldBlock,
}

/// A bidirectional byte stream (serial device or TCP connection).
pub trait Link {
    /// Read whatever is available into `buf`.
    fn read_nonblocking(&mut self, buf: &mut [u8]) -> io::Result<ReadStatus>;

    /// Write as much of `data` as the stream accepts right now.
    fn write_nonblocking(&mut self, data: &[u8]) -> io::Result<WriteStatus>;

    /// Remote address, for logging.
    fn peer(&self) -> Option<SocketAddr> {
        None
    }
}

/// Map a `std::io::Read` result onto [`ReadStatus`].
pub(crate) fn read_status(result: io::Result<usize>) -> io::Result<ReadStatus> {
    match result {
        Ok(0) => Ok(ReadStatus::Closed),
        Ok(n) => Ok(ReadStatus::Data(n)),
        Err(e) if is_transient(&e) => Ok(ReadStatus::WouldBlock),
        Err(e) => Err(e),
    }
}

/// Map a `std::io::Write` result onto [`WriteStatus`].
pub(crate) fn write_status(result: io::Result<usize>) -> io::Result<WriteStatus> {
    match result {
        Ok(n) => Ok(WriteStatus::Written(n)),
        Err(e) if is_transient(&e) => Ok(WriteStatus::WouldBlock),
        Err(e) => Err(e),
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

// ---------------------------------------------------------------------------
// Output queue
// ---------------------------------------------------------------------------

/// Encoded frames waiting to be written to one link.
///
/// Frames are written in order and never interleaved: a frame that was
/// partially written stays at the front until its last byte is out, and a
/// frame is only ever dropped whole, before any of it reached the link.
#[derive(Debug)]
pub struct OutputQueue {
    frames: VecDeque<Vec<u8>>,
    /// Bytes of the front frame already written.
    offset: usize,
    max_frames: usize,
}

impl OutputQueue {
    pub fn new(max_frames: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            offset: 0,
            max_frames: max_frames.max(1),
        }
    }

    /// Frames not completely written yet.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Bytes still to be written.
    pub fn pending_bytes(&self) -> usize {
        self.frames.iter().map(Vec::len).sum::<usize>() - self.offset
    }

    /// Queue one encoded frame. Returns false, dropping it, when full.
    pub fn push(&mut self, frame: Vec<u8>) -> bool {
        if self.frames.len() >= self.max_frames {
            return false;
        }
        if !frame.is_empty() {
            self.frames.push_back(frame);
        }
        true
    }

    /// Write as much as `link` accepts without blocking.
    ///
    /// Returns the number of bytes written. Fails with
    /// `ErrorKind::WriteZero` if the stream stops accepting bytes.
    pub fn flush<L: Link + ?Sized>(&mut self, link: &mut L) -> io::Result<usize> {
        let mut written = 0;
        while let Some(front) = self.frames.front() {
            match link.write_nonblocking(&front[self.offset..])? {
                WriteStatus::Written(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "zero bytes written",
                    ));
                }
                WriteStatus::Written(n) => {
                    written += n;
                    self.offset += n;
                    if self.offset >= front.len() {
                        self.frames.pop_front();
                        self.offset = 0;
                    }
                }
                WriteStatus::WouldBlock => break,
            }
        }
        Ok(written)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.offset = 0;
    }
}

// ---------------------------------------------------------------------------
// Acceptor / factory
// ---------------------------------------------------------------------------

/// A listening socket handing out new client links.
pub trait Acceptor {
    type Peer: Link;

    /// Accept one pending connection, if any.
    fn accept_nonblocking(&mut self) -> io::Result<Option<Self::Peer>>;
}

/// Opens the two sides of the gateway. Closing is dropping the handle.
pub trait Transports {
    type Bus: Link;
    type Peer: Link;
    type Acceptor: Acceptor<Peer = Self::Peer>;

    /// Open the serial bus device.
    fn open_bus(&mut self, device: &str, raw_mode: bool) -> io::Result<Self::Bus>;

    /// Start listening for TCP clients.
    fn open_acceptor(&mut self, addr: SocketAddr, backlog: i32) -> io::Result<Self::Acceptor>;
}

/// Real serial device and TCP listener.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTransports;

impl Transports for SystemTransports {
    type Bus = SerialLink;
    type Peer = std::net::TcpStream;
    type Acceptor = TcpAcceptor;

    fn open_bus(&mut self, device: &str, raw_mode: bool) -> io::Result<SerialLink> {
        SerialLink::open(device, raw_mode)
    }

    fn open_acceptor(&mut self, addr: SocketAddr, backlog: i32) -> io::Result<TcpAcceptor> {
        TcpAcceptor::bind(addr, backlog)
    }
}
