//! Reconnection State Machine
//!
//! Tracks attempts for a single resilient connection and spaces them out with
//! capped exponential backoff. Attempts reset only when the owner confirms a
//! successful (re)connection through [`ReconnectManager::mark_connection_successful`].

use crate::error::{ConnectionError, ReconnectError};
use serde::Serialize;
use std::{
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Backoff and attempt limits for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(300),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPhase {
    Idle,
    Attempting,
    Connected,
    Exhausted,
    /// The backoff wait was aborted through [`ReconnectManager::cancel`].
    Cancelled,
}

/// A snapshot of the attempt counter, suitable for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AttemptsInfo {
    pub current_attempts: u32,
    pub max_attempts: u32,
    pub can_retry: bool,
}

#[derive(Debug)]
struct ReconnectState {
    attempts: u32,
    phase: ReconnectPhase,
    last_success: Option<Instant>,
}

pub type ErrorReporter<'a> = &'a (dyn Fn(ReconnectError) + Send + Sync);

pub struct ReconnectManager {
    config: ReconnectConfig,
    state: Mutex<ReconnectState>,
    cancel: CancellationToken,
}

impl ReconnectManager {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ReconnectState {
                attempts: 0,
                phase: ReconnectPhase::Idle,
                last_success: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    // The guard is never held across an await, so a poisoned lock still holds
    // consistent counters.
    fn state(&self) -> MutexGuard<'_, ReconnectState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Delay before the given 1-based attempt: `min(base * 2^(attempt-1), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    pub fn attempts(&self) -> u32 {
        self.state().attempts
    }

    pub fn phase(&self) -> ReconnectPhase {
        self.state().phase
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.state().last_success
    }

    pub fn can_retry(&self) -> bool {
        self.state().attempts < self.config.max_attempts
    }

    pub fn attempts_info(&self) -> AttemptsInfo {
        let attempts = self.state().attempts;
        AttemptsInfo {
            current_attempts: attempts,
            max_attempts: self.config.max_attempts,
            can_retry: attempts < self.config.max_attempts,
        }
    }

    /// Resets the attempt counter. Called by the owner once the connection is
    /// confirmed open.
    pub fn mark_connection_successful(&self) {
        let mut state = self.state();
        if state.attempts > 0 {
            info!(attempts = state.attempts, "Connection re-established.");
        }
        state.attempts = 0;
        state.phase = ReconnectPhase::Connected;
        state.last_success = Some(Instant::now());
    }

    /// Aborts any pending backoff wait; later attempts return immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs one reconnection attempt after the backoff delay.
    ///
    /// Returns whether an attempt was initiated. Success of the attempt is
    /// observed separately, through `mark_connection_successful`.
    pub async fn handle_reconnect<F, Fut>(
        &self,
        connect: F,
        on_error: Option<ErrorReporter<'_>>,
    ) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ConnectionError>>,
    {
        let (attempt, delay) = {
            let mut state = self.state();
            if state.attempts >= self.config.max_attempts {
                state.phase = ReconnectPhase::Exhausted;
                drop(state);
                error!(
                    max_attempts = self.config.max_attempts,
                    "Maximum reconnection attempts reached."
                );
                if let Some(report) = on_error {
                    report(ReconnectError::Exhausted {
                        max_attempts: self.config.max_attempts,
                    });
                }
                return false;
            }
            state.attempts += 1;
            state.phase = ReconnectPhase::Attempting;
            (state.attempts, self.backoff_delay(state.attempts))
        };

        info!(
            attempt,
            max_attempts = self.config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnection attempt."
        );
        tokio::select! {
            _ = self.cancel.cancelled() => {
                // The attempt never ran, so it does not count against the limit.
                let mut state = self.state();
                state.attempts = state.attempts.saturating_sub(1);
                state.phase = ReconnectPhase::Cancelled;
                drop(state);
                info!(attempt, "Reconnection cancelled during backoff.");
                return false;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        if let Err(e) = connect().await {
            warn!(attempt, error = %e, "Reconnection attempt failed.");
            if let Some(report) = on_error {
                report(ReconnectError::AttemptFailed { attempt, source: e });
            }
        }
        true
    }
}
