// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outer service loop: keep the router open, run it, honor pauses.

use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::RoutingConfig;
use crate::pause::PauseControl;
use crate::router::Router;
use crate::stats::RouterStats;
use crate::transport::Transports;

/// Sleep intervals of [`run_gateway`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    /// Between two routing cycles.
    pub poll_interval: Duration,
    /// Between two failed open attempts.
    pub reopen_delay: Duration,
}

impl LoopTiming {
    pub fn from_config(routing: &RoutingConfig) -> Self {
        Self {
            poll_interval: routing.poll_interval(),
            reopen_delay: routing.reopen_delay(),
        }
    }
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self::from_config(&RoutingConfig::default())
    }
}

/// Run until `cancel` fires.
///
/// The router is (re)opened whenever it is closed, retrying every
/// `reopen_delay`. A communication error closes it and starts over; a pause
/// request closes it until the operator resumes. The router is closed on
/// return.
pub fn run_gateway<T, P>(
    router: &mut Router<T>,
    pause: &mut P,
    cancel: &CancelToken,
    timing: LoopTiming,
) -> RouterStats
where
    T: Transports,
    P: PauseControl + ?Sized,
{
    while !cancel.is_cancelled() {
        while !router.is_open() && !cancel.is_cancelled() {
            if let Err(e) = router.open() {
                tracing::error!("Failed to open router: {}", e);
                cancel.sleep(timing.reopen_delay);
            }
        }

        while !cancel.is_cancelled() {
            if let Err(e) = router.communicate() {
                tracing::warn!("Communication error: {}", e);
                break;
            }

            if pause.pause_requested() {
                tracing::info!("Pause requested, closing router");
                router.close();
                pause.wait_for_resume(cancel);
                tracing::info!("Pause released");
                break;
            }

            cancel.sleep(timing.poll_interval);
        }
    }

    router.close();
    router.stats()
}
