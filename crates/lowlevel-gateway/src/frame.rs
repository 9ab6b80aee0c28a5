// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-level framing shared by the serial bus and the TCP clients.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+-----------+---------+--------+---------------------------+
//! | HEADER | CLIENT ID | COMMAND | LENGTH | PAYLOAD                   |
//! +--------+-----------+---------+--------+---------------------------+
//!   0xFF     bus only     1B        1B      LENGTH bytes (0-254), or
//!            0x00-0xFE                      NUL-terminated if LENGTH=0xFF
//! ```
//!
//! - HEADER (0xFF): frame start marker
//! - CLIENT ID: virtual peer on the bus, `0xFE` addresses every peer.
//!   Omitted on TCP connections, where the connection slot is the identity.
//! - COMMAND: opcode, see [`crate::command`]
//! - LENGTH: exact payload size, or `0xFF` for a variable ("info") frame
//!
//! [`FrameCodec`] consumes one byte at a time and never buffers more than the
//! frame under construction. Any rejection other than [`FrameError::Full`]
//! discards the partial frame so the stream resynchronizes on the next header.

use std::fmt;

use thiserror::Error;

/// Frame start marker.
pub const HEADER_BYTE: u8 = 0xFF;

/// Client id addressing every connected peer.
pub const BROADCAST_CLIENT_ID: u8 = 0xFE;

/// Length value announcing a NUL-terminated payload.
pub const VARIABLE_LENGTH: u8 = 0xFF;

/// Largest payload a fixed-length frame can carry.
pub const MAX_FIXED_PAYLOAD: usize = 0xFE;

const TERMINATOR: u8 = 0x00;

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("parser holds a complete frame, reset required")]
    Full,

    #[error("invalid header byte 0x{0:02x}")]
    InvalidHeader(u8),

    #[error("invalid client id 0x{0:02x}")]
    InvalidClientId(u8),

    #[error("variable payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("frame is incomplete")]
    Incomplete,

    #[error("frame carries no client id")]
    MissingClientId,

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("fixed payload of {0} bytes exceeds 254")]
    FixedPayloadTooLong(usize),

    #[error("variable payload contains a NUL byte")]
    EmbeddedTerminator,
}

impl FrameError {
    /// Whether the codec dropped its partial frame when reporting this error.
    pub fn resets_codec(&self) -> bool {
        !matches!(self, Self::Full)
    }
}

/// How the client id is conveyed for a given side of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// The client id byte follows the header (serial bus).
    Explicit,
    /// The client id is implied by the connection (TCP slot).
    Implicit,
}

impl Addressing {
    /// Header, command and length bytes, plus the client id when explicit.
    pub const fn overhead(self) -> usize {
        match self {
            Self::Explicit => 4,
            Self::Implicit => 3,
        }
    }
}

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Bus peer or TCP slot the frame comes from / goes to.
    pub client_id: Option<u8>,
    pub command: u8,
    /// Payload size, or [`VARIABLE_LENGTH`].
    pub length: u8,
    /// Payload bytes. Variable frames keep their NUL terminator.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a fixed-length frame.
    pub fn fixed(command: u8, payload: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_FIXED_PAYLOAD {
            return Err(FrameError::FixedPayloadTooLong(payload.len()));
        }
        Ok(Self {
            client_id: None,
            command,
            length: payload.len() as u8,
            payload,
        })
    }

    /// Build a variable-length frame. The terminator is appended here and
    /// must not appear in `text`.
    pub fn variable(command: u8, text: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let mut payload = text.into();
        if payload.contains(&TERMINATOR) {
            return Err(FrameError::EmbeddedTerminator);
        }
        payload.push(TERMINATOR);
        Ok(Self {
            client_id: None,
            command,
            length: VARIABLE_LENGTH,
            payload,
        })
    }

    /// Set the client id.
    pub fn with_client_id(mut self, client_id: u8) -> Self {
        self.client_id = Some(client_id);
        self
    }

    pub fn is_variable(&self) -> bool {
        self.length == VARIABLE_LENGTH
    }

    /// True when addressed to every peer.
    pub fn is_broadcast(&self) -> bool {
        self.client_id == Some(BROADCAST_CLIENT_ID)
    }

    /// Check the length/payload invariant.
    pub fn is_complete(&self) -> bool {
        if self.is_variable() {
            match self.payload.split_last() {
                Some((&TERMINATOR, body)) => !body.contains(&TERMINATOR),
                _ => false,
            }
        } else {
            self.payload.len() == self.length as usize
        }
    }

    /// Wire size for the given addressing.
    pub fn encoded_len(&self, addressing: Addressing) -> usize {
        addressing.overhead() + self.payload.len()
    }

    /// Encode into `buf`. Returns the number of bytes written.
    pub fn encode_into(&self, addressing: Addressing, buf: &mut [u8]) -> Result<usize, FrameError> {
        if !self.is_complete() {
            return Err(FrameError::Incomplete);
        }

        let client_id = match addressing {
            Addressing::Explicit => {
                let id = self.client_id.ok_or(FrameError::MissingClientId)?;
                if id > BROADCAST_CLIENT_ID {
                    return Err(FrameError::InvalidClientId(id));
                }
                Some(id)
            }
            Addressing::Implicit => None,
        };

        let needed = self.encoded_len(addressing);
        if buf.len() < needed {
            return Err(FrameError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }

        buf[0] = HEADER_BYTE;
        let mut pos = 1;
        if let Some(id) = client_id {
            buf[pos] = id;
            pos += 1;
        }
        buf[pos] = self.command;
        buf[pos + 1] = self.length;
        pos += 2;
        buf[pos..pos + self.payload.len()].copy_from_slice(&self.payload);

        Ok(needed)
    }

    /// Encode into a freshly allocated buffer.
    pub fn encode(&self, addressing: Addressing) -> Result<Vec<u8>, FrameError> {
        let mut buf = vec![0u8; self.encoded_len(addressing)];
        let len = self.encode_into(addressing, &mut buf)?;
        buf.truncate(len);
        Ok(buf)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.client_id {
            Some(id) => write!(f, "[id=0x{:02x} ", id)?,
            None => write!(f, "[id=- ")?,
        }
        if self.is_variable() {
            write!(
                f,
                "cmd=0x{:02x} len=var({})]",
                self.command,
                self.payload.len()
            )
        } else {
            write!(f, "cmd=0x{:02x} len={}]", self.command, self.length)
        }
    }
}

/// Decoder state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Waiting for the header byte
    Header,
    /// Waiting for the client id (bus side only)
    ClientId,
    /// Waiting for the command byte
    Command,
    /// Waiting for the length byte
    Length,
    /// Receiving payload
    Payload,
    /// Frame complete, waiting for the owner to reset
    Full,
}

/// Incremental frame parser for one byte source.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    addressing: Addressing,
    state: ReadState,
    /// Id stamped on every frame of an implicit-addressing codec.
    assigned_id: Option<u8>,
    client_id: Option<u8>,
    command: u8,
    length: u8,
    payload: Vec<u8>,
    payload_limit: Option<usize>,
}

impl FrameCodec {
    /// Create a codec in the `Header` state.
    pub fn new(addressing: Addressing) -> Self {
        Self {
            addressing,
            state: ReadState::Header,
            assigned_id: None,
            client_id: None,
            command: 0,
            length: 0,
            payload: Vec::new(),
            payload_limit: None,
        }
    }

    /// Codec reading the client id from the stream.
    pub fn for_bus() -> Self {
        Self::new(Addressing::Explicit)
    }

    /// Codec for a TCP slot; frames are tagged with `slot`.
    pub fn for_slot(slot: u8) -> Self {
        let mut codec = Self::new(Addressing::Implicit);
        codec.assigned_id = Some(slot);
        codec.client_id = Some(slot);
        codec
    }

    /// Bound variable payloads to `limit` bytes, terminator included.
    pub fn with_payload_limit(mut self, limit: Option<usize>) -> Self {
        self.payload_limit = limit;
        self
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// Feed one byte.
    ///
    /// Errors other than [`FrameError::Full`] reset the codec before
    /// returning.
    pub fn push_byte(&mut self, byte: u8) -> Result<(), FrameError> {
        let result = self.advance(byte);
        if let Err(ref err) = result {
            if err.resets_codec() {
                self.reset();
            }
        }
        result
    }

    fn advance(&mut self, byte: u8) -> Result<(), FrameError> {
        match self.state {
            ReadState::Header => {
                if byte != HEADER_BYTE {
                    return Err(FrameError::InvalidHeader(byte));
                }
                self.state = match self.addressing {
                    Addressing::Explicit => ReadState::ClientId,
                    Addressing::Implicit => ReadState::Command,
                };
            }

            ReadState::ClientId => {
                if byte > BROADCAST_CLIENT_ID {
                    return Err(FrameError::InvalidClientId(byte));
                }
                self.client_id = Some(byte);
                self.state = ReadState::Command;
            }

            ReadState::Command => {
                self.command = byte;
                self.state = ReadState::Length;
            }

            ReadState::Length => {
                self.length = byte;
                self.state = if byte == VARIABLE_LENGTH {
                    ReadState::Payload
                } else if byte == 0 {
                    ReadState::Full
                } else {
                    self.payload.reserve(byte as usize);
                    ReadState::Payload
                };
            }

            ReadState::Payload => {
                if self.length == VARIABLE_LENGTH {
                    if let Some(limit) = self.payload_limit {
                        if self.payload.len() >= limit {
                            return Err(FrameError::PayloadTooLarge { limit });
                        }
                    }
                    self.payload.push(byte);
                    if byte == TERMINATOR {
                        self.state = ReadState::Full;
                    }
                } else {
                    self.payload.push(byte);
                    if self.payload.len() == self.length as usize {
                        self.state = ReadState::Full;
                    }
                }
            }

            ReadState::Full => return Err(FrameError::Full),
        }
        Ok(())
    }

    /// A complete frame is waiting.
    pub fn is_ready(&self) -> bool {
        self.state == ReadState::Full
    }

    /// No partial frame is held.
    pub fn is_idle(&self) -> bool {
        self.state == ReadState::Header
    }

    /// Copy of the complete frame, if any. The codec is left untouched.
    pub fn frame(&self) -> Option<Frame> {
        self.is_ready().then(|| Frame {
            client_id: self.client_id,
            command: self.command,
            length: self.length,
            payload: self.payload.clone(),
        })
    }

    /// Move the complete frame out and reset.
    pub fn take_frame(&mut self) -> Option<Frame> {
        if !self.is_ready() {
            return None;
        }
        let frame = Frame {
            client_id: self.client_id,
            command: self.command,
            length: self.length,
            payload: std::mem::take(&mut self.payload),
        };
        self.reset();
        Some(frame)
    }

    /// Return to the `Header` state, discarding any partial frame.
    pub fn reset(&mut self) {
        self.state = ReadState::Header;
        self.client_id = self.assigned_id;
        self.command = 0;
        self.length = 0;
        self.payload.clear();
    }

    /// Feed a chunk, collecting every completed frame.
    ///
    /// Rejected bytes are passed to `on_reject` and do not stop the chunk.
    pub fn feed<F>(&mut self, bytes: &[u8], mut on_reject: F) -> Vec<Frame>
    where
        F: FnMut(u8, &FrameError),
    {
        let mut frames = Vec::new();
        for &byte in bytes {
            if let Err(err) = self.push_byte(byte) {
                on_reject(byte, &err);
            }
            if let Some(frame) = self.take_frame() {
                frames.push(frame);
            }
        }
        frames
    }
}
