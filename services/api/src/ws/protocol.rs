//! Defines the WebSocket message protocol between a conversation peer and the API server.
//!
//! The peer is whatever drives the conversation: it reports recognition
//! results and model output, and it receives synthesis, model and transcript
//! commands back.

use cadence_core::{AsrMetadata, Event, ResponseKind, ToolSpec, TranscriptMessage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from the peer to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    UserJoined,
    UserLeft,
    /// A partial or final speech recognition result.
    AsrResult {
        text: String,
        #[serde(rename = "final", default)]
        is_final: bool,
        #[serde(default)]
        metadata: AsrMetadata,
    },
    /// One streamed chunk of model output.
    LlmResponse {
        text: String,
        #[serde(default)]
        delta: String,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        kind: ResponseKind,
    },
    /// Announces a tool the model may call.
    ToolRegister { tool: ToolSpec, source: String },
    /// Stops the assistant immediately (e.g. a "stop" button).
    Interrupt,
}

impl From<ClientMessage> for Event {
    fn from(msg: ClientMessage) -> Self {
        match msg {
            ClientMessage::UserJoined => Event::UserJoined,
            ClientMessage::UserLeft => Event::UserLeft,
            ClientMessage::AsrResult {
                text,
                is_final,
                metadata,
            } => Event::AsrResult {
                text,
                is_final,
                metadata,
            },
            ClientMessage::LlmResponse {
                text,
                delta,
                is_final,
                kind,
            } => Event::LlmResponse {
                text,
                delta,
                is_final,
                kind,
            },
            ClientMessage::ToolRegister { tool, source } => Event::ToolRegister { tool, source },
            ClientMessage::Interrupt => Event::Interrupt,
        }
    }
}

/// Messages sent from the server to the peer.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the conversation has started.
    Initialized { session_id: Uuid },
    /// A (debounced) transcript update.
    Transcript(TranscriptMessage),
    /// Text to be synthesized.
    TtsText {
        text: String,
        is_final: bool,
        turn_id: u64,
        session_id: Uuid,
    },
    /// Drop all queued and playing synthesis.
    TtsFlush { flush_id: Uuid },
    /// Drop all buffered audio in the named downstream sink.
    OutputFlush { sink: String },
    /// A final user utterance for the model.
    LlmSubmit { text: String },
    /// Cancel any generation in progress.
    LlmCancel,
    ToolRegistered { tool: ToolSpec, source: String },
    /// Reports an error to the peer.
    Error { message: String },
}
