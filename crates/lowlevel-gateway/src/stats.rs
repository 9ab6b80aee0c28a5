// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Router counters.

use std::fmt;

/// Running totals since the router was created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    pub frames_from_bus: u64,
    pub frames_from_sockets: u64,
    pub frames_to_bus: u64,
    pub frames_to_sockets: u64,
    /// Frames discarded: queue overflow, routing mismatch, failed sends.
    pub frames_dropped: u64,
    /// Bytes rejected by a frame parser.
    pub protocol_errors: u64,
    pub connections_accepted: u64,
    pub connections_rejected: u64,
    pub disconnects: u64,
    pub sessions_opened: u64,
}

impl fmt::Display for RouterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sessions={} bus(rx={} tx={}) sockets(rx={} tx={}) dropped={} protocol_errors={} \
             connections(accepted={} rejected={} closed={})",
            self.sessions_opened,
            self.frames_from_bus,
            self.frames_to_bus,
            self.frames_from_sockets,
            self.frames_to_sockets,
            self.frames_dropped,
            self.protocol_errors,
            self.connections_accepted,
            self.connections_rejected,
            self.disconnects,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let stats = RouterStats {
            frames_from_bus: 3,
            frames_to_sockets: 7,
            connections_rejected: 1,
            ..Default::default()
        };
        let line = stats.to_string();
        assert!(line.contains("bus(rx=3 tx=0)"));
        assert!(line.contains("sockets(rx=0 tx=7)"));
        assert!(line.contains("rejected=1"));
    }
}
