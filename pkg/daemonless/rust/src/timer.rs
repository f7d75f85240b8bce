// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::{Duration, Instant, sleep_until};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Fired,
    Cancelled,
}

/// Resettable countdown shared between the manager and its idle watcher.
///
/// Resetting only moves the deadline; a waiter that wakes up at a stale
/// deadline goes back to sleep until the current one.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    deadline: Arc<Mutex<Instant>>,
}

impl IdleTimer {
    pub fn new(duration: Duration) -> Self {
        Self {
            deadline: Arc::new(Mutex::new(Instant::now() + duration)),
        }
    }

    /// Restart the countdown from now. Returns the new deadline.
    pub fn reset(&self, duration: Duration) -> Instant {
        let deadline = Instant::now() + duration;
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = deadline;
        deadline
    }

    pub fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the deadline to pass without being pushed back, or for `cancel`.
    pub async fn expired(&self, cancel: &CancellationToken) -> Expiry {
        loop {
            let deadline = self.deadline();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Expiry::Cancelled,
                _ = sleep_until(deadline) => {}
            }
            if self.deadline() <= Instant::now() {
                return Expiry::Fired;
            }
        }
    }
}
