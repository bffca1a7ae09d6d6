//! Collaborator Interfaces
//!
//! The conversation core never talks to a vendor directly. Synthesis, model
//! inference, downstream transport and transcript delivery are reached only
//! through the traits in this module, so the runtime can swap implementations
//! (WebSocket bridge, in-process engines, test fakes) freely.

use crate::{event::ToolSpec, publisher::TranscriptMessage};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

/// Identifies which conversation turn a synthesis request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TurnMetadata {
    pub session_id: Uuid,
    pub turn_id: u64,
}

/// The text-to-speech engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SynthesisSink: Send + Sync {
    /// Queues `text` for synthesis. `is_final` marks the last piece of a response.
    async fn send_text(&self, text: &str, is_final: bool, turn: &TurnMetadata) -> Result<()>;

    /// Drops everything queued or playing. `flush_id` lets the engine
    /// correlate the acknowledgement.
    async fn flush(&self, flush_id: Uuid) -> Result<()>;
}

/// A downstream audio/transport sink (output transport, avatar renderer, ...).
#[async_trait]
pub trait OutputSink: Send + Sync {
    fn name(&self) -> &str;

    async fn flush(&self) -> Result<()>;
}

/// The language model that consumes final user utterances.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelInput: Send + Sync {
    async fn submit(&self, text: &str) -> Result<()>;

    /// Cooperatively cancels any generation in progress.
    async fn cancel_generation(&self) -> Result<()>;
}

/// Where transcript updates are delivered.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PublishSink: Send + Sync {
    async fn emit(&self, message: TranscriptMessage) -> Result<()>;
}

/// Maps recognition timestamps, which restart with every backend connection,
/// onto one continuous session timeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioClock: Send + Sync {
    async fn absolute_ms(&self, relative_ms: u64) -> u64;
}

/// Receives tool registrations announced on the event queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    async fn register(&self, tool: ToolSpec, source: &str) -> Result<()>;
}
