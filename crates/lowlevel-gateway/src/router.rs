// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Frame routing between the serial bus and the TCP clients.
//!
//! A [`Router`] is either closed or open. While open it owns the bus link
//! and the listener; every [`Router::communicate`] call runs one
//! non-blocking cycle:
//!
//! 1. accept pending clients
//! 2. write output left over from earlier cycles
//! 3. read the bus, then every slot in index order
//! 4. route every queued bus frame, then every queued socket frame
//!
//! Bus frames go to the subscribed or addressed slots, socket frames either
//! update the sender's subscriptions or go to the bus tagged with the
//! sender's slot. A fatal bus error closes the router; reopening is up to
//! the caller.

use std::io;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::bus::{BusCodec, BusError};
use crate::command::CommandKind;
use crate::config::{ConfigError, GatewayConfig};
use crate::connection::ConnectionTable;
use crate::frame::Frame;
use crate::stats::RouterStats;
use crate::subscription::SubscriptionTable;
use crate::transport::Transports;

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("router not configured: {0} is not set")]
    NotConfigured(&'static str),

    #[error("router is not open")]
    NotOpen,

    #[error("cannot open serial device {device}: {source}")]
    BusOpen {
        device: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot listen on {addr}: {source}")]
    Listener {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Transports held while the router is open.
struct Session<T: Transports> {
    bus: BusCodec<T::Bus>,
    acceptor: T::Acceptor,
}

/// Bidirectional bus/socket router.
pub struct Router<T: Transports> {
    config: GatewayConfig,
    transports: T,
    session: Option<Session<T>>,
    connections: ConnectionTable<T::Peer>,
    subscriptions: SubscriptionTable,
    stats: RouterStats,
}

impl<T: Transports> Router<T> {
    /// Create a closed router.
    pub fn new(config: GatewayConfig, transports: T) -> Result<Self, RouterError> {
        config.validate()?;
        let connections = ConnectionTable::new(config.socket.max_clients, &config.routing);
        let subscriptions = SubscriptionTable::new(
            connections.capacity(),
            config.routing.default_subscription,
        );
        Ok(Self {
            config,
            transports,
            session: None,
            connections,
            subscriptions,
            stats: RouterStats::default(),
        })
    }

    /// Listen address used by the next [`open`](Self::open).
    pub fn set_socket_address(&mut self, address: IpAddr) {
        self.config.socket.address = Some(address);
    }

    /// Listen port used by the next [`open`](Self::open).
    pub fn set_socket_port(&mut self, port: u16) {
        self.config.socket.port = port;
    }

    /// Serial device used by the next [`open`](Self::open).
    pub fn set_serial_port(&mut self, device: impl Into<String>) {
        self.config.serial.device = Some(device.into());
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub fn connections(&self) -> &ConnectionTable<T::Peer> {
        &self.connections
    }

    pub fn transports(&self) -> &T {
        &self.transports
    }

    /// Counters, including those of the current session.
    pub fn stats(&self) -> RouterStats {
        let mut stats = self.stats;
        stats.protocol_errors += self.connections.protocol_errors();
        stats.frames_dropped += self.connections.queue_drops();
        if let Some(session) = &self.session {
            let bus = session.bus.counters();
            stats.protocol_errors += bus.protocol_errors;
            stats.frames_dropped += bus.queue_drops;
        }
        stats
    }

    /// Open the bus, then the listener. No-op when already open.
    ///
    /// If the listener cannot be opened the bus is closed again.
    pub fn open(&mut self) -> Result<(), RouterError> {
        if self.session.is_some() {
            return Ok(());
        }

        let device = self
            .config
            .serial
            .device
            .clone()
            .ok_or(RouterError::NotConfigured("serial device"))?;
        let addr = self
            .config
            .socket
            .socket_addr()
            .ok_or(RouterError::NotConfigured("socket address"))?;

        let link = self
            .transports
            .open_bus(&device, self.config.serial.raw_mode)
            .map_err(|source| {
                tracing::error!("Failed to open serial device {}: {}", device, source);
                RouterError::BusOpen {
                    device: device.clone(),
                    source,
                }
            })?;
        let bus = BusCodec::new(link, &self.config.routing);

        let acceptor = match self
            .transports
            .open_acceptor(addr, self.config.socket.backlog)
        {
            Ok(acceptor) => acceptor,
            Err(source) => {
                tracing::error!("Failed to listen on {}: {}", addr, source);
                drop(bus);
                return Err(RouterError::Listener { addr, source });
            }
        };

        self.session = Some(Session { bus, acceptor });
        self.stats.sessions_opened += 1;
        tracing::info!("Router open: serial {} <-> tcp {}", device, addr);
        Ok(())
    }

    /// Drop both transports and every client, discard queued frames and
    /// restore the default subscriptions.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            let bus = session.bus.counters();
            self.stats.protocol_errors += bus.protocol_errors;
            self.stats.frames_dropped += bus.queue_drops;

            let closed = self.connections.close_all();
            self.stats.disconnects += closed as u64;
            tracing::info!("Router closed ({} client(s) dropped)", closed);
        }
        self.subscriptions.reset_all();
    }

    /// Run one routing cycle. Any fatal error closes the router.
    pub fn communicate(&mut self) -> Result<(), RouterError> {
        if self.session.is_none() {
            return Err(RouterError::NotOpen);
        }
        if let Err(e) = self.cycle() {
            tracing::warn!("Communication error, closing router: {}", e);
            self.close();
            return Err(e);
        }
        Ok(())
    }

    fn cycle(&mut self) -> Result<(), RouterError> {
        let session = self.session.as_mut().ok_or(RouterError::NotOpen)?;

        let accepted = self.connections.poll_accept(&mut session.acceptor);
        self.stats.connections_accepted += accepted.accepted as u64;
        self.stats.connections_rejected += accepted.rejected as u64;

        session.bus.flush()?;
        self.connections.flush_all();

        session.bus.poll()?;
        self.connections.poll_reads();
        self.reap_disconnected();

        while let Some(frame) = self.session.as_mut().and_then(|s| s.bus.pop_inbound()) {
            self.stats.frames_from_bus += 1;
            self.dispatch_bus_frame(&frame);
        }

        while let Some(frame) = self.connections.pop_inbound() {
            self.stats.frames_from_sockets += 1;
            self.handle_socket_frame(frame)?;
        }

        self.reap_disconnected();
        Ok(())
    }

    fn reap_disconnected(&mut self) {
        for slot in self.connections.take_disconnected() {
            self.stats.disconnects += 1;
            if self.config.routing.reset_subscriptions_on_disconnect {
                self.subscriptions.reset(slot);
            }
        }
    }

    /// Deliver a frame received from the bus to the TCP clients.
    ///
    /// Channel data and broadcasts must carry the broadcast client id, direct
    /// frames a concrete one; anything else is dropped.
    pub fn dispatch_bus_frame(&mut self, frame: &Frame) {
        let kind = CommandKind::classify(frame.command);

        if let CommandKind::Subscription { .. } = kind {
            tracing::warn!("Dropping subscription frame from bus {}", frame);
            self.stats.frames_dropped += 1;
            return;
        }
        if kind.is_fan_out() != frame.is_broadcast() {
            tracing::warn!("Dropping bus frame with inconsistent addressing {}", frame);
            self.stats.frames_dropped += 1;
            return;
        }

        match kind {
            CommandKind::ChannelData { channel, .. } => {
                let targets: Vec<usize> = self
                    .connections
                    .connected_slots()
                    .filter(|&slot| self.subscriptions.is_subscribed(slot, channel))
                    .collect();
                for slot in targets {
                    self.deliver(frame, Some(slot));
                }
            }
            CommandKind::Broadcast { .. } => {
                let targets: Vec<usize> = self.connections.connected_slots().collect();
                for slot in targets {
                    self.deliver(frame, Some(slot));
                }
            }
            CommandKind::Direct { .. } => self.deliver(frame, None),
            CommandKind::Subscription { .. } => {}
        }
    }

    fn deliver(&mut self, frame: &Frame, target: Option<usize>) {
        match self.connections.encode_and_send(frame, target) {
            Ok(()) => self.stats.frames_to_sockets += 1,
            Err(e) => {
                self.stats.frames_dropped += 1;
                tracing::warn!("Dropping {}: {}", frame, e);
            }
        }
    }

    /// Handle a frame received from a TCP client.
    ///
    /// Subscription requests update the sender's mask; everything else is
    /// forwarded to the bus with the sender's slot as client id. Only a fatal
    /// bus error is returned.
    pub fn handle_socket_frame(&mut self, frame: Frame) -> Result<(), RouterError> {
        let Some(slot) = frame.client_id.map(usize::from) else {
            tracing::warn!("Dropping socket frame without slot {}", frame);
            self.stats.frames_dropped += 1;
            return Ok(());
        };

        if let CommandKind::Subscription { channel, subscribe } =
            CommandKind::classify(frame.command)
        {
            let applied = if subscribe {
                self.subscriptions.subscribe(slot, channel)
            } else {
                self.subscriptions.unsubscribe(slot, channel)
            };
            if applied {
                tracing::debug!(
                    "Slot {} {} channel {} (mask 0x{:08x})",
                    slot,
                    if subscribe { "subscribed to" } else { "unsubscribed from" },
                    channel,
                    self.subscriptions.mask(slot)
                );
            }
            return Ok(());
        }

        let session = self.session.as_mut().ok_or(RouterError::NotOpen)?;
        match session.bus.send(&frame) {
            Ok(()) => self.stats.frames_to_bus += 1,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                self.stats.frames_dropped += 1;
                tracing::warn!("Dropping {} from slot {}: {}", frame, slot, e);
            }
        }
        Ok(())
    }
}

impl<T: Transports> Drop for Router<T> {
    fn drop(&mut self) {
        self.close();
    }
}
