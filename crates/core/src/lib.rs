//! Runtime-agnostic core of a real-time voice conversation.
//!
//! A [`ConversationController`] consumes [`Event`]s from a single FIFO queue,
//! streams model output to synthesis sentence by sentence, interrupts the
//! assistant when the user barges in and publishes debounced transcripts.
//! [`ResilientConnection`] keeps a recognition backend connected with capped
//! exponential backoff while preserving a continuous audio timeline.

pub mod connection;
pub mod controller;
pub mod error;
pub mod event;
pub mod interrupt;
pub mod publisher;
pub mod queue;
pub mod reconnect;
pub mod segmenter;
pub mod sinks;
pub mod timeline;

pub use connection::{Connector, ReconnectOutcome, ResilientConnection};
pub use controller::{
    Collaborators, ControllerConfig, ConversationController, ConversationHandle,
    ConversationState,
};
pub use error::{ConnectionError, ReconnectError};
pub use event::{AsrMetadata, Event, EventTag, ResponseKind, ToolSpec};
pub use publisher::{DataType, Role, TranscriptMessage, TranscriptPublisher};
pub use queue::{EventReceiver, EventSender, event_queue};
pub use reconnect::{AttemptsInfo, ReconnectConfig, ReconnectManager, ReconnectPhase};
pub use sinks::{
    AudioClock, ModelInput, OutputSink, PublishSink, SynthesisSink, ToolRegistry,
    TurnMetadata,
};
pub use timeline::{AudioTimeline, TimelineClock};
