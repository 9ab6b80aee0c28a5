// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-capacity TCP connection pool.
//!
//! Each slot owns one client link and its own [`FrameCodec`]. The slot
//! index is the client id used by routing and subscriptions; it stays
//! stable for the lifetime of the connection and is handed out lowest
//! first once freed.

use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::RoutingConfig;
use crate::frame::{Addressing, Frame, FrameCodec, FrameError, BROADCAST_CLIENT_ID};
use crate::transport::{Acceptor, Link, OutputQueue, ReadStatus};

/// Largest pool: every slot index must be a valid, non-broadcast client id.
pub const MAX_SLOTS: usize = BROADCAST_CLIENT_ID as usize;

/// Connection table errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("all {capacity} connection slots are in use")]
    Exhausted { capacity: usize },

    #[error("slot {0} is not connected")]
    NotConnected(usize),

    #[error("frame has no destination slot")]
    NoDestination,

    #[error("slot {0} output queue is full")]
    Backlogged(usize),

    #[error("encode failed: {0}")]
    Encode(#[from] FrameError),

    #[error("slot {slot}: {source}")]
    Io {
        slot: usize,
        #[source]
        source: io::Error,
    },
}

/// Result of draining the acceptor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AcceptSummary {
    pub accepted: usize,
    pub rejected: usize,
}

/// One connected TCP peer.
#[derive(Debug)]
pub struct ConnectionSlot<L> {
    index: usize,
    link: L,
    codec: FrameCodec,
    outbound: OutputQueue,
    peer: Option<SocketAddr>,
}

impl<L: Link> ConnectionSlot<L> {
    fn new(index: usize, link: L, payload_limit: Option<usize>, max_pending: usize) -> Self {
        let peer = link.peer();
        Self {
            index,
            link,
            // index < MAX_SLOTS, so it fits a client id
            codec: FrameCodec::for_slot(index as u8).with_payload_limit(payload_limit),
            outbound: OutputQueue::new(max_pending),
            peer,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Parser state of this connection.
    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    /// Frames not completely written to this client yet.
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }
}

/// Slot arena plus the shared inbound queue.
#[derive(Debug)]
pub struct ConnectionTable<L: Link> {
    slots: Box<[Option<ConnectionSlot<L>>]>,
    free: BTreeSet<usize>,
    inbound: VecDeque<Frame>,
    max_queued: usize,
    payload_limit: Option<usize>,
    max_pending: usize,
    read_buf: Vec<u8>,
    disconnected: Vec<usize>,
    protocol_errors: u64,
    queue_drops: u64,
}

impl<L: Link> ConnectionTable<L> {
    /// Pool of `capacity` slots with default limits.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, &RoutingConfig::default())
    }

    /// Pool of `capacity` slots (at most [`MAX_SLOTS`]) using the buffer and
    /// queue limits of `routing`.
    pub fn new(capacity: usize, routing: &RoutingConfig) -> Self {
        let capacity = capacity.min(MAX_SLOTS);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: slots.into_boxed_slice(),
            free: (0..capacity).collect(),
            inbound: VecDeque::new(),
            max_queued: routing.max_queued_frames.max(1),
            payload_limit: routing.max_variable_payload,
            max_pending: routing.max_pending_frames,
            read_buf: vec![0u8; routing.read_buffer_size.max(1)],
            disconnected: Vec::new(),
            protocol_errors: 0,
            queue_drops: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of connected slots.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_connected(&self, slot: usize) -> bool {
        matches!(self.slots.get(slot), Some(Some(_)))
    }

    pub fn slot(&self, slot: usize) -> Option<&ConnectionSlot<L>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Indices of connected slots, ascending.
    pub fn connected_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|_| index))
    }

    /// Bytes rejected by slot parsers so far.
    pub fn protocol_errors(&self) -> u64 {
        self.protocol_errors
    }

    /// Frames dropped because the inbound queue was full.
    pub fn queue_drops(&self) -> u64 {
        self.queue_drops
    }

    /// Number of frames waiting in the inbound queue.
    pub fn queued(&self) -> usize {
        self.inbound.len()
    }

    /// Place `link` in the lowest free slot.
    ///
    /// On exhaustion the link is dropped, which closes it.
    pub fn accept(&mut self, link: L) -> Result<usize, ConnectionError> {
        let Some(index) = self.free.pop_first() else {
            return Err(ConnectionError::Exhausted {
                capacity: self.capacity(),
            });
        };
        let slot = ConnectionSlot::new(index, link, self.payload_limit, self.max_pending);
        match slot.peer {
            Some(addr) => tracing::info!("Client {} connected on slot {}", addr, index),
            None => tracing::info!("Client connected on slot {}", index),
        }
        self.slots[index] = Some(slot);
        Ok(index)
    }

    /// Feed `bytes` read from `slot` through its parser.
    ///
    /// Every completed frame is returned tagged with the slot index. Rejected
    /// bytes are logged and counted; they never stop the rest of the chunk.
    pub fn on_readable(&mut self, slot: usize, bytes: &[u8]) -> Vec<Frame> {
        let Some(Some(conn)) = self.slots.get_mut(slot) else {
            tracing::debug!("Read on free slot {} ignored", slot);
            return Vec::new();
        };
        let mut rejected = 0u64;
        let frames = conn.codec.feed(bytes, |byte, err| {
            rejected += 1;
            tracing::debug!("Slot {}: rejected byte 0x{:02x}: {}", slot, byte, err);
        });
        self.protocol_errors += rejected;
        frames
    }

    /// Free `slot`. Its link is closed and its parser discarded.
    ///
    /// Returns false if the slot was already free.
    pub fn on_disconnect(&mut self, slot: usize) -> bool {
        let Some(entry) = self.slots.get_mut(slot) else {
            return false;
        };
        let Some(conn) = entry.take() else {
            return false;
        };
        match conn.peer {
            Some(addr) => tracing::info!("Client {} on slot {} disconnected", addr, slot),
            None => tracing::info!("Client on slot {} disconnected", slot),
        }
        self.free.insert(slot);
        self.disconnected.push(slot);
        true
    }

    /// Slots freed since the last call.
    pub fn take_disconnected(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.disconnected)
    }

    /// Encode `frame` without client id, queue it on its slot and write what
    /// the client accepts right now.
    ///
    /// A broadcast frame needs `target`; otherwise `target` takes precedence
    /// over the frame's client id. A full output queue drops this frame only;
    /// a write failure frees the slot.
    pub fn encode_and_send(
        &mut self,
        frame: &Frame,
        target: Option<usize>,
    ) -> Result<(), ConnectionError> {
        let slot = if frame.is_broadcast() {
            target.ok_or(ConnectionError::NoDestination)?
        } else {
            target
                .or(frame.client_id.map(usize::from))
                .ok_or(ConnectionError::NoDestination)?
        };

        let Some(Some(conn)) = self.slots.get_mut(slot) else {
            return Err(ConnectionError::NotConnected(slot));
        };
        let bytes = frame.encode(Addressing::Implicit)?;
        if !conn.outbound.push(bytes) {
            return Err(ConnectionError::Backlogged(slot));
        }

        if let Err(source) = conn.outbound.flush(&mut conn.link) {
            tracing::warn!("Slot {}: write failed: {}", slot, source);
            self.on_disconnect(slot);
            return Err(ConnectionError::Io { slot, source });
        }
        Ok(())
    }

    /// Write queued output of every slot without blocking.
    ///
    /// A write failure frees the slot.
    pub fn flush_all(&mut self) {
        for index in 0..self.slots.len() {
            let result = match self.slots[index].as_mut() {
                Some(conn) if !conn.outbound.is_empty() => conn.outbound.flush(&mut conn.link),
                _ => continue,
            };
            if let Err(e) = result {
                tracing::warn!("Slot {}: write failed: {}", index, e);
                self.on_disconnect(index);
            }
        }
    }

    /// Accept every pending connection.
    ///
    /// Connections beyond capacity are closed immediately. An acceptor error
    /// is logged and ends this round; it never affects connected slots.
    pub fn poll_accept<A>(&mut self, acceptor: &mut A) -> AcceptSummary
    where
        A: Acceptor<Peer = L> + ?Sized,
    {
        let mut summary = AcceptSummary::default();
        loop {
            match acceptor.accept_nonblocking() {
                Ok(Some(link)) => {
                    let peer = link.peer();
                    match self.accept(link) {
                        Ok(_) => summary.accepted += 1,
                        Err(e) => {
                            summary.rejected += 1;
                            match peer {
                                Some(addr) => tracing::warn!("Rejecting {}: {}", addr, e),
                                None => tracing::warn!("Rejecting connection: {}", e),
                            }
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    break;
                }
            }
        }
        summary
    }

    /// One read per connected slot, in index order.
    ///
    /// Completed frames go to the inbound queue. A closed stream or a read
    /// error frees the slot.
    pub fn poll_reads(&mut self) {
        let mut buf = std::mem::take(&mut self.read_buf);
        for index in 0..self.slots.len() {
            let status = match self.slots[index].as_mut() {
                Some(conn) => conn.link.read_nonblocking(&mut buf),
                None => continue,
            };
            match status {
                Ok(ReadStatus::Data(n)) => {
                    for frame in self.on_readable(index, &buf[..n]) {
                        self.enqueue(frame);
                    }
                }
                Ok(ReadStatus::WouldBlock) => {}
                Ok(ReadStatus::Closed) => {
                    self.on_disconnect(index);
                }
                Err(e) => {
                    tracing::warn!("Slot {}: read failed: {}", index, e);
                    self.on_disconnect(index);
                }
            }
        }
        self.read_buf = buf;
    }

    fn enqueue(&mut self, frame: Frame) {
        if self.inbound.len() >= self.max_queued {
            self.queue_drops += 1;
            tracing::warn!("Socket inbound queue full, dropping {}", frame);
            return;
        }
        self.inbound.push_back(frame);
    }

    /// Oldest frame received from any slot.
    pub fn pop_inbound(&mut self) -> Option<Frame> {
        self.inbound.pop_front()
    }

    /// Close every connection and discard queued frames.
    ///
    /// Returns the number of connections closed.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for slot in self.slots.iter_mut() {
            if slot.take().is_some() {
                closed += 1;
            }
        }
        self.free = (0..self.slots.len()).collect();
        self.inbound.clear();
        self.disconnected.clear();
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryAcceptor, MemoryLink, MemoryTransports, Transports};

    fn table(
        capacity: usize,
    ) -> (MemoryTransports, MemoryAcceptor, ConnectionTable<MemoryLink>) {
        let transports = MemoryTransports::new();
        let acceptor = transports
            .clone()
            .open_acceptor(([127, 0, 0, 1], 0).into(), 4)
            .unwrap();
        (transports, acceptor, ConnectionTable::with_capacity(capacity))
    }

    #[test]
    fn test_accept_lowest_free_slot() {
        let (transports, mut acceptor, mut table) = table(3);
        let _a = transports.connect();
        let b = transports.connect();
        let _c = transports.connect();
        assert_eq!(table.poll_accept(&mut acceptor).accepted, 3);
        assert_eq!(table.len(), 3);

        assert!(table.on_disconnect(1));
        assert!(!table.on_disconnect(1));
        assert!(b.is_released());
        assert_eq!(table.take_disconnected(), vec![1]);
        assert!(table.take_disconnected().is_empty());

        let _d = transports.connect();
        table.poll_accept(&mut acceptor);
        assert!(table.is_connected(1));
        assert_eq!(table.connected_slots().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_exhaustion_closes_newcomer() {
        let (transports, mut acceptor, mut table) = table(1);
        let first = transports.connect();
        let second = transports.connect();
        let summary = table.poll_accept(&mut acceptor);
        assert_eq!(
            summary,
            AcceptSummary {
                accepted: 1,
                rejected: 1
            }
        );
        assert!(!first.is_released());
        assert!(second.is_released());
    }

    #[test]
    fn test_reads_tag_slot_and_keep_order() {
        let (transports, mut acceptor, mut table) = table(2);
        let a = transports.connect();
        let b = transports.connect();
        table.poll_accept(&mut acceptor);

        b.send(&[0xFF, 0x02, 0x00]);
        a.send(&[0xFF, 0x01, 0x00, 0x13, 0xFF, 0x03, 0x01, 0x09]);
        table.poll_reads();

        let frames: Vec<_> = std::iter::from_fn(|| table.pop_inbound()).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!((frames[0].client_id, frames[0].command), (Some(0), 0x01));
        assert_eq!((frames[1].client_id, frames[1].command), (Some(0), 0x03));
        assert_eq!((frames[2].client_id, frames[2].command), (Some(1), 0x02));
        assert_eq!(table.protocol_errors(), 1);
    }

    #[test]
    fn test_partial_frame_survives_cycles() {
        let (transports, mut acceptor, mut table) = table(1);
        let a = transports.connect();
        table.poll_accept(&mut acceptor);

        a.send(&[0xFF, 0x05]);
        table.poll_reads();
        assert!(table.pop_inbound().is_none());
        assert!(!table.slot(0).unwrap().codec().is_idle());

        a.send(&[0x01, 0x42]);
        table.poll_reads();
        assert_eq!(table.pop_inbound().unwrap().payload, vec![0x42]);
    }

    #[test]
    fn test_hang_up_and_read_error_free_slot() {
        let (transports, mut acceptor, mut table) = table(2);
        let a = transports.connect();
        let b = transports.connect();
        table.poll_accept(&mut acceptor);

        a.hang_up();
        b.fail_next_read(io::ErrorKind::ConnectionReset);
        table.poll_reads();
        assert!(table.is_empty());
        assert_eq!(table.take_disconnected(), vec![0, 1]);
    }

    #[test]
    fn test_encode_and_send() {
        let (transports, mut acceptor, mut table) = table(2);
        let a = transports.connect();
        let b = transports.connect();
        table.poll_accept(&mut acceptor);

        let direct = Frame::fixed(0x81, vec![7]).unwrap().with_client_id(1);
        table.encode_and_send(&direct, None).unwrap();
        assert!(a.take_written().is_empty());
        assert_eq!(b.take_written(), vec![0xFF, 0x81, 0x01, 7]);

        let fan_out = Frame::fixed(0x05, vec![]).unwrap().with_client_id(BROADCAST_CLIENT_ID);
        assert!(matches!(
            table.encode_and_send(&fan_out, None),
            Err(ConnectionError::NoDestination)
        ));
        table.encode_and_send(&fan_out, Some(0)).unwrap();
        assert_eq!(a.take_written(), vec![0xFF, 0x05, 0x00]);

        let missing = Frame::fixed(0x81, vec![]).unwrap().with_client_id(9);
        assert!(matches!(
            table.encode_and_send(&missing, None),
            Err(ConnectionError::NotConnected(9))
        ));
    }

    #[test]
    fn test_write_error_frees_slot() {
        let (transports, mut acceptor, mut table) = table(1);
        let a = transports.connect();
        table.poll_accept(&mut acceptor);

        a.fail_next_write(io::ErrorKind::BrokenPipe);
        let frame = Frame::fixed(0x80, vec![]).unwrap().with_client_id(0);
        assert!(matches!(
            table.encode_and_send(&frame, None),
            Err(ConnectionError::Io { slot: 0, .. })
        ));
        assert!(!table.is_connected(0));
        assert!(a.is_released());
    }

    #[test]
    fn test_stalled_client_keeps_frames_whole() {
        let routing = RoutingConfig {
            max_pending_frames: 2,
            ..Default::default()
        };
        let transports = MemoryTransports::new();
        let mut acceptor = transports
            .clone()
            .open_acceptor(([127, 0, 0, 1], 0).into(), 4)
            .unwrap();
        let mut table = ConnectionTable::new(1, &routing);
        let a = transports.connect();
        table.poll_accept(&mut acceptor);

        a.set_write_budget(Some(2));
        let first = Frame::fixed(0x81, vec![1, 2]).unwrap().with_client_id(0);
        let second = Frame::fixed(0x82, vec![3]).unwrap().with_client_id(0);
        table.encode_and_send(&first, None).unwrap();
        table.encode_and_send(&second, None).unwrap();
        assert!(matches!(
            table.encode_and_send(&second, None),
            Err(ConnectionError::Backlogged(0))
        ));
        assert_eq!(table.slot(0).unwrap().pending(), 2);

        a.set_write_budget(None);
        table.flush_all();
        assert_eq!(table.slot(0).unwrap().pending(), 0);
        assert_eq!(a.take_written(), vec![0xFF, 0x81, 0x02, 1, 2, 0xFF, 0x82, 0x01, 3]);

        // a write error while flushing frees the slot
        a.set_write_stalled(true);
        table.encode_and_send(&first, None).unwrap();
        a.set_write_stalled(false);
        a.fail_next_write(io::ErrorKind::BrokenPipe);
        table.flush_all();
        assert!(!table.is_connected(0));
        assert_eq!(table.take_disconnected(), vec![0]);
    }

    #[test]
    fn test_inbound_queue_bound() {
        let routing = RoutingConfig {
            max_queued_frames: 2,
            ..Default::default()
        };
        let transports = MemoryTransports::new();
        let mut acceptor = transports
            .clone()
            .open_acceptor(([127, 0, 0, 1], 0).into(), 4)
            .unwrap();
        let mut table = ConnectionTable::new(1, &routing);
        let a = transports.connect();
        table.poll_accept(&mut acceptor);

        a.send(&[0xFF, 0x01, 0x00, 0xFF, 0x02, 0x00, 0xFF, 0x03, 0x00]);
        table.poll_reads();
        assert_eq!(table.queued(), 2);
        assert_eq!(table.queue_drops(), 1);
    }

    #[test]
    fn test_close_all() {
        let (transports, mut acceptor, mut table) = table(4);
        let peers: Vec<_> = (0..3).map(|_| transports.connect()).collect();
        table.poll_accept(&mut acceptor);
        peers[2].send(&[0xFF, 0x01, 0x00]);
        table.poll_reads();

        assert_eq!(table.close_all(), 3);
        assert!(table.is_empty());
        assert!(table.pop_inbound().is_none());
        assert!(peers.iter().all(|peer| peer.is_released()));
    }

    #[test]
    fn test_capacity_clamped_to_client_ids() {
        let table: ConnectionTable<MemoryLink> = ConnectionTable::with_capacity(1000);
        assert_eq!(table.capacity(), MAX_SLOTS);
    }
}
