// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Out-of-band pause/resume channel.
//!
//! An operator connects to a dedicated TCP port and sends the pause token.
//! The gateway then closes the router and echoes the token once per period
//! as a heartbeat. Resuming is simply disconnecting.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::PauseConfig;
use crate::transport::{read_status, write_status, ReadStatus, WriteStatus};

/// Source of pause requests polled by the outer loop.
pub trait PauseControl {
    /// Non-blocking check for a pause request.
    fn pause_requested(&mut self) -> bool;

    /// Block until the operator releases the pause or `cancel` fires.
    fn wait_for_resume(&mut self, cancel: &CancelToken);
}

/// Pause control that never pauses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPause;

impl PauseControl for NoPause {
    fn pause_requested(&mut self) -> bool {
        false
    }

    fn wait_for_resume(&mut self, _cancel: &CancelToken) {}
}

/// TCP pause socket serving a single operator at a time.
#[derive(Debug)]
pub struct TcpPause {
    listener: TcpListener,
    client: Option<TcpStream>,
    token: u8,
    period: Duration,
}

impl TcpPause {
    /// Listen on `addr` (backlog 1).
    pub fn bind(addr: SocketAddr, token: u8, period: Duration) -> io::Result<Self> {
        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1)?;
        socket.set_nonblocking(true)?;
        tracing::info!("Pause socket listening on {} (token {})", addr, token);
        Ok(Self {
            listener: socket.into(),
            client: None,
            token,
            period,
        })
    }

    pub fn from_config(config: &PauseConfig) -> io::Result<Self> {
        Self::bind(config.socket_addr(), config.token, config.resume_period())
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// An operator is connected.
    pub fn has_operator(&self) -> bool {
        self.client.is_some()
    }

    fn poll_operator(&mut self) {
        if self.client.is_some() {
            return;
        }
        match self.listener.accept() {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    tracing::warn!("Pause operator {} rejected: {}", addr, e);
                    return;
                }
                tracing::info!("Pause operator connected from {}", addr);
                self.client = Some(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => tracing::debug!("Pause accept failed: {}", e),
        }
    }

    fn drop_operator(&mut self) {
        if self.client.take().is_some() {
            tracing::info!("Pause operator disconnected");
        }
    }
}

impl PauseControl for TcpPause {
    fn pause_requested(&mut self) -> bool {
        self.poll_operator();
        let Some(client) = self.client.as_mut() else {
            return false;
        };

        let mut byte = [0u8; 1];
        match read_status(client.read(&mut byte)) {
            Ok(ReadStatus::Closed) => {
                self.drop_operator();
                false
            }
            Ok(ReadStatus::Data(_)) => byte[0] == self.token,
            Ok(ReadStatus::WouldBlock) => false,
            Err(e) => {
                tracing::debug!("Pause read failed: {}", e);
                self.drop_operator();
                false
            }
        }
    }

    fn wait_for_resume(&mut self, cancel: &CancelToken) {
        while !cancel.is_cancelled() {
            let Some(client) = self.client.as_mut() else {
                return;
            };
            match write_status(client.write(&[self.token])) {
                Ok(WriteStatus::Written(0)) => self.drop_operator(),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Pause heartbeat failed: {}", e);
                    self.drop_operator();
                }
            }
            if self.client.is_some() {
                cancel.sleep(self.period);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn pause() -> TcpPause {
        TcpPause::bind(([127, 0, 0, 1], 0).into(), 19, Duration::from_millis(10)).unwrap()
    }

    fn poll_until(pause: &mut TcpPause, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if pause.pause_requested() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_no_pause() {
        let mut pause = NoPause;
        assert!(!pause.pause_requested());
        pause.wait_for_resume(&CancelToken::new());
    }

    #[test]
    fn test_idle_without_operator() {
        let mut pause = pause();
        assert!(!pause.pause_requested());
        assert!(!pause.has_operator());
        // returns immediately without an operator
        pause.wait_for_resume(&CancelToken::new());
    }

    #[test]
    fn test_token_requests_pause() {
        let mut pause = pause();
        let mut operator = TcpStream::connect(pause.local_addr().unwrap()).unwrap();

        operator.write_all(&[7]).unwrap();
        assert!(!poll_until(&mut pause, Duration::from_millis(200)));
        assert!(pause.has_operator());

        operator.write_all(&[19]).unwrap();
        assert!(poll_until(&mut pause, Duration::from_secs(2)));
    }

    #[test]
    fn test_resume_on_disconnect() {
        let mut pause = pause();
        let mut operator = TcpStream::connect(pause.local_addr().unwrap()).unwrap();
        operator.write_all(&[19]).unwrap();
        assert!(poll_until(&mut pause, Duration::from_secs(2)));

        let reader = std::thread::spawn(move || {
            let mut heartbeat = [0u8; 1];
            operator.read_exact(&mut heartbeat).unwrap();
            assert_eq!(heartbeat[0], 19);
            // dropping the stream releases the pause
        });

        let start = Instant::now();
        pause.wait_for_resume(&CancelToken::new());
        reader.join().unwrap();
        assert!(!pause.has_operator());
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancel_ends_wait() {
        let mut pause = pause();
        let mut operator = TcpStream::connect(pause.local_addr().unwrap()).unwrap();
        operator.write_all(&[19]).unwrap();
        assert!(poll_until(&mut pause, Duration::from_secs(2)));

        let cancel = CancelToken::new();
        cancel.cancel();
        pause.wait_for_resume(&cancel);
        assert!(pause.has_operator());
    }
}
