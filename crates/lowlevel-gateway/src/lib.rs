// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serial bus to TCP gateway.
//!
//! Bridges one multiplexed serial bus, where many virtual devices share a
//! single link and are told apart by a client id, with a TCP server where
//! every connection is its own peer.
//!
//! # Architecture
//!
//! ```text
//!  TCP clients                 Router                     Serial bus
//!  slot 0..N-1                                            (client ids)
//!      |                          |                            |
//!      |--- subscribe(ch) ------->| mask[slot] |= 1 << ch      |
//!      |--- frame --------------->|--- frame, id = slot ------>|
//!      |<-- frame (no id) --------|<-- channel data, id 0xFE --|
//!      |<-- frame (no id) --------|<-- broadcast, id 0xFE -----|
//!      |<-- frame (no id) --------|<-- direct, id = slot ------|
//! ```
//!
//! # Wire Format
//!
//! Both sides share the same frame layout (see [`frame`]); only the bus
//! carries the client id byte. The command byte is classified by
//! [`command::CommandKind`].
//!
//! # Quick Start
//!
//! ```bash
//! # Defaults: 172.16.0.2:80 <-> /dev/ttyAMA0, pause socket on 127.0.0.1:23747
//! lowlevel-server
//!
//! # Custom endpoints
//! lowlevel-server -a 0.0.0.0 -p 9000 -s /dev/ttyUSB0 --no-pause
//!
//! # Using a config file
//! lowlevel-server --config gateway.toml
//! ```

pub mod bus;
pub mod cancel;
pub mod command;
pub mod config;
pub mod connection;
pub mod frame;
pub mod gateway;
pub mod pause;
pub mod router;
pub mod stats;
pub mod subscription;
pub mod transport;

pub use bus::{BusCodec, BusError};
pub use cancel::CancelToken;
pub use command::CommandKind;
pub use config::{ConfigError, GatewayConfig};
pub use connection::{ConnectionError, ConnectionSlot, ConnectionTable};
pub use frame::{Addressing, Frame, FrameCodec, FrameError, BROADCAST_CLIENT_ID};
pub use gateway::{run_gateway, LoopTiming};
pub use pause::{NoPause, PauseControl, TcpPause};
pub use router::{Router, RouterError};
pub use stats::RouterStats;
pub use subscription::{SubscriptionTable, DEFAULT_SUBSCRIPTION};
pub use transport::{Link, SystemTransports, Transports};
