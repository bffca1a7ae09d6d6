//! Conversation Events
//!
//! Every input the controller reacts to arrives as an [`Event`]. Producers
//! (transport and command handlers) create them, the controller consumes them
//! exactly once.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recognition metadata attached to an ASR result by the transcription backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrMetadata {
    /// Identifies the audio stream the result belongs to; parsed into a stream id.
    pub session_id: Option<String>,
    /// Start of the recognised span, relative to the current backend connection.
    pub start_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub language: Option<String>,
}

impl AsrMetadata {
    /// Resolves the numeric stream id, falling back to `default` when the
    /// backend did not send one or sent something non-numeric.
    pub fn stream_id_or(&self, default: u32) -> u32 {
        self.session_id
            .as_deref()
            .and_then(|id| id.trim().parse().ok())
            .unwrap_or(default)
    }
}

/// What a streamed model delta contains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    #[default]
    Message,
    Reasoning,
}

/// A tool advertised by some extension for the model to call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// An input to the conversation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
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
    /// One streamed chunk of model output. `text` is cumulative, `delta` is new.
    LlmResponse {
        text: String,
        #[serde(default)]
        delta: String,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        kind: ResponseKind,
    },
    ToolRegister { tool: ToolSpec, source: String },
    /// Explicit interruption requested from outside the recognition path.
    Interrupt,
}

/// The discriminant of an [`Event`], used for dispatch logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTag {
    UserJoined,
    UserLeft,
    AsrResult,
    LlmResponse,
    ToolRegister,
    Interrupt,
}

impl Event {
    pub fn tag(&self) -> EventTag {
        match self {
            Event::UserJoined => EventTag::UserJoined,
            Event::UserLeft => EventTag::UserLeft,
            Event::AsrResult { .. } => EventTag::AsrResult,
            Event::LlmResponse { .. } => EventTag::LlmResponse,
            Event::ToolRegister { .. } => EventTag::ToolRegister,
            Event::Interrupt => EventTag::Interrupt,
        }
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventTag::UserJoined => "user_joined",
            EventTag::UserLeft => "user_left",
            EventTag::AsrResult => "asr_result",
            EventTag::LlmResponse => "llm_response",
            EventTag::ToolRegister => "tool_register",
            EventTag::Interrupt => "interrupt",
        };
        f.write_str(name)
    }
}
