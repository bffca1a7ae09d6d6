//! Resilient streaming connection.
//!
//! Wraps a [`Connector`] (e.g. a streaming transcription client) with the
//! [`ReconnectManager`], a single-flight reconnect guard and the audio
//! [`TimelineClock`] whose base must move forward every time the backend's
//! clock restarts.

use crate::{
    error::{ConnectionError, ReconnectError},
    reconnect::{ReconnectConfig, ReconnectManager, ReconnectPhase},
    sinks::AudioClock,
    timeline::TimelineClock,
};
use async_trait::async_trait;
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

/// Opens the underlying connection. Implemented by vendor clients.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(), ConnectionError>;
}

/// How a close notification was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Reconnected,
    /// Another trigger already owns the reconnect; this one was turned away.
    AlreadyInFlight,
    Exhausted,
    Fatal,
    Cancelled,
}

pub struct ResilientConnection<C> {
    connector: C,
    reconnect: ReconnectManager,
    in_flight: Mutex<()>,
    clock: Mutex<TimelineClock>,
    errors: mpsc::UnboundedSender<ReconnectError>,
}

impl<C: Connector> ResilientConnection<C> {
    /// Creates the connection wrapper. Fatal and exhausted outcomes are sent
    /// on `errors` for the supervising caller.
    pub fn new(
        connector: C,
        config: ReconnectConfig,
        errors: mpsc::UnboundedSender<ReconnectError>,
    ) -> Self {
        Self {
            connector,
            reconnect: ReconnectManager::new(config),
            in_flight: Mutex::new(()),
            clock: Mutex::new(TimelineClock::new()),
            errors,
        }
    }

    pub fn reconnect_manager(&self) -> &ReconnectManager {
        &self.reconnect
    }

    fn report(&self, err: ReconnectError) {
        if self.errors.send(err).is_err() {
            debug!("Connection error receiver dropped.");
        }
    }

    async fn on_open(&self) {
        self.reconnect.mark_connection_successful();
        // The backend's clock starts from zero on a fresh connection.
        self.clock.lock().await.rebase();
    }

    /// Opens the initial connection.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        match self.connector.connect().await {
            Ok(()) => {
                self.on_open().await;
                info!("Connection established.");
                Ok(())
            }
            Err(e) => {
                if !e.is_retryable() {
                    self.report(ReconnectError::Fatal(e.clone()));
                }
                Err(e)
            }
        }
    }

    /// Handles a close/error notification from the underlying connection.
    ///
    /// Retryable errors start a reconnect loop unless one is already running,
    /// in which case the trigger is dropped.
    pub async fn on_closed(&self, reason: ConnectionError) -> ReconnectOutcome {
        if !reason.is_retryable() {
            error!(error = %reason, "Connection closed with a fatal error; not reconnecting.");
            self.report(ReconnectError::Fatal(reason));
            return ReconnectOutcome::Fatal;
        }

        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!(error = %reason, "Reconnect already in flight; ignoring close notification.");
            return ReconnectOutcome::AlreadyInFlight;
        };
        warn!(error = %reason, "Connection lost; reconnecting.");

        let fatal: StdMutex<Option<ConnectionError>> = StdMutex::new(None);
        let on_error = |err: ReconnectError| match err {
            ReconnectError::AttemptFailed { source, .. } if !source.is_retryable() => {
                *fatal.lock().unwrap_or_else(PoisonError::into_inner) = Some(source);
            }
            ReconnectError::AttemptFailed { .. } => {}
            other => self.report(other),
        };

        loop {
            let initiated = self
                .reconnect
                .handle_reconnect(
                    || async {
                        self.connector.connect().await?;
                        self.on_open().await;
                        Ok::<(), ConnectionError>(())
                    },
                    Some(&on_error),
                )
                .await;

            if !initiated {
                return match self.reconnect.phase() {
                    ReconnectPhase::Exhausted => ReconnectOutcome::Exhausted,
                    _ => ReconnectOutcome::Cancelled,
                };
            }
            if self.reconnect.phase() == ReconnectPhase::Connected {
                return ReconnectOutcome::Reconnected;
            }
            let failure = fatal.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(source) = failure {
                error!(error = %source, "Reconnect failed fatally.");
                self.report(ReconnectError::Fatal(source));
                return ReconnectOutcome::Fatal;
            }
        }
    }

    /// Stops any pending backoff; the reconnect loop returns `Cancelled`.
    pub fn shutdown(&self) {
        self.reconnect.cancel();
    }

    pub async fn record_user_audio(&self, duration_ms: u64) {
        self.clock.lock().await.timeline_mut().add_user_audio(duration_ms);
    }

    pub async fn record_silence(&self, duration_ms: u64) {
        self.clock.lock().await.timeline_mut().add_silence(duration_ms);
    }

    /// Converts a backend timestamp (relative to the current connection) into
    /// session user-audio time.
    pub async fn absolute_ms(&self, relative_ms: u64) -> u64 {
        self.clock.lock().await.absolute_ms(relative_ms)
    }

    pub async fn total_user_audio_ms(&self) -> u64 {
        self.clock.lock().await.total_user_audio_ms()
    }
}

#[async_trait]
impl<C: Connector> AudioClock for ResilientConnection<C> {
    async fn absolute_ms(&self, relative_ms: u64) -> u64 {
        self.clock.lock().await.absolute_ms(relative_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        },
        time::Duration,
    };

    fn config(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts,
        }
    }

    /// Fails `failures` times with a retryable error, then succeeds.
    struct FlakyConnector {
        failures: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        async fn connect(&self) -> Result<(), ConnectionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ConnectionError::Retryable("connection reset".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_retryable_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = ResilientConnection::new(
            FlakyConnector {
                failures: 2,
                calls: calls.clone(),
            },
            config(5),
            tx,
        );

        let outcome = conn
            .on_closed(ConnectionError::Retryable("socket closed".into()))
            .await;
        assert_eq!(outcome, ReconnectOutcome::Reconnected);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(conn.reconnect_manager().attempts(), 0);
        // Transient failures are not surfaced upstream.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_reported_once() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(3)
            .returning(|| Err(ConnectionError::Retryable("timeout".into())));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = ResilientConnection::new(connector, config(3), tx);

        let outcome = conn
            .on_closed(ConnectionError::Retryable("timeout".into()))
            .await;
        assert_eq!(outcome, ReconnectOutcome::Exhausted);
        assert_eq!(
            rx.try_recv().unwrap(),
            ReconnectError::Exhausted { max_attempts: 3 }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_close_skips_reconnect() {
        let mut connector = MockConnector::new();
        connector.expect_connect().never();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = ResilientConnection::new(connector, config(3), tx);

        let outcome = conn
            .on_closed(ConnectionError::Fatal("invalid api key".into()))
            .await;
        assert_eq!(outcome, ReconnectOutcome::Fatal);
        assert!(rx.try_recv().unwrap().is_fatal());
        assert_eq!(conn.reconnect_manager().attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_during_reconnect_stops_loop() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(|| Err(ConnectionError::Fatal("unauthorized".into())));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = ResilientConnection::new(connector, config(5), tx);

        let outcome = conn
            .on_closed(ConnectionError::Retryable("reset".into()))
            .await;
        assert_eq!(outcome, ReconnectOutcome::Fatal);
        assert_eq!(
            rx.try_recv().unwrap(),
            ReconnectError::Fatal(ConnectionError::Fatal("unauthorized".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_close_notifications_are_single_flight() {
        let calls = Arc::new(AtomicU32::new(0));
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ResilientConnection::new(
            FlakyConnector {
                failures: 0,
                calls: calls.clone(),
            },
            config(5),
            tx,
        );

        let (first, second) = tokio::join!(
            conn.on_closed(ConnectionError::Retryable("closed".into())),
            conn.on_closed(ConnectionError::Retryable("closed again".into())),
        );
        assert_eq!(first, ReconnectOutcome::Reconnected);
        assert_eq!(second, ReconnectOutcome::AlreadyInFlight);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_backoff() {
        let mut connector = MockConnector::new();
        connector.expect_connect().never();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ResilientConnection::new(connector, config(5), tx);
        conn.shutdown();

        let outcome = conn
            .on_closed(ConnectionError::Retryable("closed".into()))
            .await;
        assert_eq!(outcome, ReconnectOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timestamps_continue_across_reconnect() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ResilientConnection::new(
            FlakyConnector {
                failures: 0,
                calls: Arc::new(AtomicU32::new(0)),
            },
            config(5),
            tx,
        );
        conn.connect().await.unwrap();

        conn.record_user_audio(500).await;
        conn.record_silence(200).await;
        conn.record_user_audio(300).await;
        assert_eq!(conn.absolute_ms(700).await, 500);
        assert_eq!(conn.total_user_audio_ms().await, 800);

        let outcome = conn
            .on_closed(ConnectionError::Retryable("reset".into()))
            .await;
        assert_eq!(outcome, ReconnectOutcome::Reconnected);

        conn.record_user_audio(100).await;
        assert_eq!(conn.total_user_audio_ms().await, 900);
        assert_eq!(conn.absolute_ms(40).await, 840);

        // The same mapping is what the controller sees through the clock trait.
        let clock: Arc<dyn AudioClock> = Arc::new(conn);
        assert_eq!(clock.absolute_ms(40).await, 840);
    }
}
