//! Debounced Transcript Publishing
//!
//! Interim transcript updates arrive far faster than any consumer needs them.
//! The publisher keeps only the latest interim update per
//! `(role, stream_id, data_type)` key and drains them on a fixed tick, while
//! final updates bypass the debounce and replace whatever interim was pending.

use crate::sinks::PublishSink;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lower bound for the flush tick.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(20);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Text,
    Reasoning,
}

/// The coalescing key of a transcript update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TranscriptKey {
    pub role: Role,
    pub stream_id: u32,
    pub data_type: DataType,
}

/// One transcript update as delivered to the publish sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: Role,
    pub stream_id: u32,
    pub data_type: DataType,
    pub text: String,
    pub is_final: bool,
    pub turn_id: u64,
    /// Wall-clock creation time in epoch milliseconds.
    pub text_ts: i64,
    /// Start of the recognised speech in session user-audio time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl TranscriptMessage {
    pub fn new(
        role: Role,
        stream_id: u32,
        data_type: DataType,
        text: impl Into<String>,
        is_final: bool,
        turn_id: u64,
    ) -> Self {
        Self {
            role,
            stream_id,
            data_type,
            text: text.into(),
            is_final,
            turn_id,
            text_ts: chrono::Utc::now().timestamp_millis(),
            start_ms: None,
            duration_ms: None,
            language: None,
        }
    }

    pub fn key(&self) -> TranscriptKey {
        TranscriptKey {
            role: self.role,
            stream_id: self.stream_id,
            data_type: self.data_type,
        }
    }
}

pub struct TranscriptPublisher {
    sink: Arc<dyn PublishSink>,
    interval: Duration,
    pending: Mutex<BTreeMap<TranscriptKey, TranscriptMessage>>,
    // Serialises emission so a drained interim can never land after the
    // final for its key. Interim inserts never take it.
    emit_order: Mutex<()>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TranscriptPublisher {
    /// Creates a publisher. `flush_interval` is clamped to [`MIN_FLUSH_INTERVAL`].
    pub fn new(sink: Arc<dyn PublishSink>, flush_interval: Duration) -> Self {
        Self {
            sink,
            interval: flush_interval.max(MIN_FLUSH_INTERVAL),
            pending: Mutex::new(BTreeMap::new()),
            emit_order: Mutex::new(()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawns the periodic flush task. Calling it again is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        let publisher = Arc::clone(self);
        *task = Some(tokio::spawn(async move { publisher.run_flush_loop().await }));
    }

    async fn run_flush_loop(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush_pending().await;
                }
            }
        }
        debug!("Transcript flush loop stopped.");
    }

    /// Publishes one update. Finals are emitted immediately and discard any
    /// pending interim for the same key; interims overwrite the pending entry.
    pub async fn publish(&self, message: TranscriptMessage) {
        let key = message.key();
        if message.is_final {
            let _order = self.emit_order.lock().await;
            self.pending.lock().await.remove(&key);
            self.emit(message).await;
        } else {
            self.pending.lock().await.insert(key, message);
        }
    }

    /// Emits every pending update once and clears the map. Returns how many
    /// updates were emitted.
    pub async fn flush_pending(&self) -> usize {
        let _order = self.emit_order.lock().await;
        let drained = std::mem::take(&mut *self.pending.lock().await);
        let count = drained.len();
        for message in drained.into_values() {
            self.emit(message).await;
        }
        count
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn emit(&self, message: TranscriptMessage) {
        let (role, stream_id) = (message.role, message.stream_id);
        if let Err(e) = self.sink.emit(message).await {
            warn!(?role, stream_id, error = ?e, "Failed to emit transcript update.");
        }
    }

    /// Stops the flush task and performs one final drain, so no pending
    /// interim update is lost.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = ?e, "Transcript flush task ended abnormally.");
            }
        }
        let flushed = self.flush_pending().await;
        debug!(flushed, "Transcript publisher stopped.");
    }
}
