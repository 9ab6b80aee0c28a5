// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serial bus side: one parser for the whole multiplexed link.

use std::collections::VecDeque;
use std::io;

use thiserror::Error;

use crate::config::RoutingConfig;
use crate::frame::{Addressing, Frame, FrameCodec, FrameError};
use crate::transport::{Link, OutputQueue, ReadStatus};

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("bus device closed")]
    Eof,

    #[error("bus encode failed: {0}")]
    Encode(#[from] FrameError),

    #[error("bus write stalled, output queue full")]
    Stalled,
}

impl BusError {
    /// The link is unusable and the session must be closed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Eof)
    }
}

/// Counters kept by the bus side.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BusCounters {
    pub protocol_errors: u64,
    pub queue_drops: u64,
}

/// Frame reader/writer bound to the serial link.
#[derive(Debug)]
pub struct BusCodec<L: Link> {
    link: L,
    codec: FrameCodec,
    inbound: VecDeque<Frame>,
    max_queued: usize,
    read_buf: Vec<u8>,
    outbound: OutputQueue,
    counters: BusCounters,
}

impl<L: Link> BusCodec<L> {
    pub fn new(link: L, routing: &RoutingConfig) -> Self {
        Self {
            link,
            codec: FrameCodec::for_bus().with_payload_limit(routing.max_variable_payload),
            inbound: VecDeque::new(),
            max_queued: routing.max_queued_frames.max(1),
            read_buf: vec![0u8; routing.read_buffer_size.max(1)],
            outbound: OutputQueue::new(routing.max_pending_frames),
            counters: BusCounters::default(),
        }
    }

    pub fn counters(&self) -> BusCounters {
        self.counters
    }

    pub fn queued(&self) -> usize {
        self.inbound.len()
    }

    /// Frames not completely written to the bus yet.
    pub fn pending(&self) -> usize {
        self.outbound.len()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Feed raw bus bytes. Completed frames are queued and also returned.
    pub fn on_readable(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut rejected = 0u64;
        let frames = self.codec.feed(bytes, |byte, err| {
            rejected += 1;
            tracing::debug!("Bus: rejected byte 0x{:02x}: {}", byte, err);
        });
        self.counters.protocol_errors += rejected;

        for frame in &frames {
            if self.inbound.len() >= self.max_queued {
                self.counters.queue_drops += 1;
                tracing::warn!("Bus inbound queue full, dropping {}", frame);
                continue;
            }
            self.inbound.push_back(frame.clone());
        }
        frames
    }

    /// One non-blocking read. Returns the number of frames completed.
    pub fn poll(&mut self) -> Result<usize, BusError> {
        match self.link.read_nonblocking(&mut self.read_buf)? {
            ReadStatus::Data(n) => {
                let buf = std::mem::take(&mut self.read_buf);
                let completed = self.on_readable(&buf[..n]).len();
                self.read_buf = buf;
                Ok(completed)
            }
            ReadStatus::WouldBlock => Ok(0),
            ReadStatus::Closed => Err(BusError::Eof),
        }
    }

    pub fn pop_inbound(&mut self) -> Option<Frame> {
        self.inbound.pop_front()
    }

    /// Encode `frame` with its client id, queue it and write what the link
    /// accepts right now.
    ///
    /// `Stalled` means the output queue is full and this frame was dropped;
    /// frames already queued are unaffected.
    pub fn send(&mut self, frame: &Frame) -> Result<(), BusError> {
        let bytes = frame.encode(Addressing::Explicit)?;
        if !self.outbound.push(bytes) {
            return Err(BusError::Stalled);
        }
        self.flush()?;
        Ok(())
    }

    /// Write queued output without blocking. Returns the bytes written.
    pub fn flush(&mut self) -> Result<usize, BusError> {
        Ok(self.outbound.flush(&mut self.link)?)
    }
}
