// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command byte classification.
//!
//! ```text
//!  7 6 5 4 3 2 1 0
//! +-+-+-+---------+
//! |0|o o| channel |  ChannelData   fanned out to subscribers of `channel`
//! |1|0|0| opcode  |  Direct        delivered to the frame's client id only
//! |1|0|1| opcode  |  Broadcast     delivered to every connected client
//! |1|1|u| channel |  Subscription  u=0 subscribe, u=1 unsubscribe
//! +-+-+-+---------+
//! ```
//!
//! Routing only ever looks at [`CommandKind`], so the layout can change here
//! without touching the router.

/// Set on every frame that is not channel data.
pub const CONTROL_BIT: u8 = 0x80;

/// Set (together with [`CONTROL_BIT`]) on subscription requests.
pub const SUBSCRIPTION_BIT: u8 = 0x40;

/// On a non-subscription control frame: broadcast rather than direct.
pub const BROADCAST_BIT: u8 = 0x20;

/// On a subscription frame: remove rather than add the channel.
pub const UNSUBSCRIBE_BIT: u8 = 0x20;

/// Channel number of data and subscription frames.
pub const CHANNEL_MASK: u8 = 0x1F;

/// Opaque opcode bits of channel data frames.
pub const DATA_OPCODE_MASK: u8 = 0x60;
pub const DATA_OPCODE_SHIFT: u8 = 5;

/// Opaque opcode bits of direct and broadcast frames.
pub const SYSTEM_OPCODE_MASK: u8 = 0x1F;

/// Number of addressable channels (width of a subscription mask).
pub const CHANNEL_COUNT: u8 = 32;

/// Decoded command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Data on a channel. `opcode` is 0..=3.
    ChannelData { channel: u8, opcode: u8 },
    /// Message for one specific client. `opcode` is 0..=31.
    Direct { opcode: u8 },
    /// Message for all clients. `opcode` is 0..=31.
    Broadcast { opcode: u8 },
    /// Subscription change requested by a client.
    Subscription { channel: u8, subscribe: bool },
}

impl CommandKind {
    /// Decode a command byte. Every byte value maps to exactly one kind.
    pub fn classify(command: u8) -> Self {
        if command & CONTROL_BIT == 0 {
            return Self::ChannelData {
                channel: command & CHANNEL_MASK,
                opcode: (command & DATA_OPCODE_MASK) >> DATA_OPCODE_SHIFT,
            };
        }
        if command & SUBSCRIPTION_BIT != 0 {
            return Self::Subscription {
                channel: command & CHANNEL_MASK,
                subscribe: command & UNSUBSCRIBE_BIT == 0,
            };
        }
        if command & BROADCAST_BIT != 0 {
            Self::Broadcast {
                opcode: command & SYSTEM_OPCODE_MASK,
            }
        } else {
            Self::Direct {
                opcode: command & SYSTEM_OPCODE_MASK,
            }
        }
    }

    /// Encode back to a command byte. Out-of-range fields are masked.
    pub fn to_byte(self) -> u8 {
        match self {
            Self::ChannelData { channel, opcode } => {
                ((opcode << DATA_OPCODE_SHIFT) & DATA_OPCODE_MASK) | (channel & CHANNEL_MASK)
            }
            Self::Direct { opcode } => CONTROL_BIT | (opcode & SYSTEM_OPCODE_MASK),
            Self::Broadcast { opcode } => {
                CONTROL_BIT | BROADCAST_BIT | (opcode & SYSTEM_OPCODE_MASK)
            }
            Self::Subscription { channel, subscribe } => {
                let op = if subscribe { 0 } else { UNSUBSCRIBE_BIT };
                CONTROL_BIT | SUBSCRIPTION_BIT | op | (channel & CHANNEL_MASK)
            }
        }
    }

    /// Channel the frame is scoped to, if any.
    pub fn channel(self) -> Option<u8> {
        match self {
            Self::ChannelData { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// Data channel message.
    pub fn is_data_channel(self) -> bool {
        matches!(self, Self::ChannelData { .. })
    }

    /// Kinds that must carry the broadcast client id on the bus.
    pub fn is_fan_out(self) -> bool {
        matches!(self, Self::ChannelData { .. } | Self::Broadcast { .. })
    }
}

/// Command byte subscribing to `channel`.
pub fn subscribe(channel: u8) -> u8 {
    CommandKind::Subscription {
        channel,
        subscribe: true,
    }
    .to_byte()
}

/// Command byte unsubscribing from `channel`.
pub fn unsubscribe(channel: u8) -> u8 {
    CommandKind::Subscription {
        channel,
        subscribe: false,
    }
    .to_byte()
}

/// Command byte for data on `channel`.
pub fn channel_data(channel: u8, opcode: u8) -> u8 {
    CommandKind::ChannelData { channel, opcode }.to_byte()
}
