//! Conversation Controller
//!
//! Owns the turn-taking state of one conversation and is the only place it is
//! mutated. Events are consumed strictly in order from the [`EventReceiver`];
//! each one is dispatched on its tag and a failure in one handler never stops
//! the loop.

use crate::{
    event::{AsrMetadata, Event, ResponseKind, ToolSpec},
    interrupt::InterruptCoordinator,
    publisher::{DataType, Role, TranscriptMessage, TranscriptPublisher},
    queue::{EventReceiver, EventSender, event_queue},
    segmenter::{self, Segmented},
    sinks::{
        AudioClock, ModelInput, OutputSink, PublishSink, SynthesisSink, ToolRegistry, TurnMetadata,
    },
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info};
use uuid::Uuid;

/// Behavioural knobs for one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Spoken and published when the first user joins.
    pub greeting: Option<String>,
    /// Interim recognition results longer than this many characters count as
    /// barge-in. Final results always do.
    pub barge_in_min_chars: usize,
    /// Stream id for user transcripts whose metadata carries none.
    pub default_stream_id: u32,
    /// Stream id for assistant transcripts.
    pub agent_stream_id: u32,
    pub flush_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            greeting: None,
            barge_in_min_chars: 2,
            default_stream_id: 100,
            agent_stream_id: 100,
            flush_interval: Duration::from_millis(100),
        }
    }
}

/// Per-conversation turn state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub session_id: Uuid,
    /// Incremented once per final user utterance.
    pub turn_id: u64,
    pub user_count: u32,
    /// Model output received but not yet terminated by a sentence boundary.
    pub sentence_fragment: String,
    pub stopped: bool,
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            turn_id: 0,
            user_count: 0,
            sentence_fragment: String::new(),
            stopped: false,
        }
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

/// The external collaborators a conversation talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub synthesis: Arc<dyn SynthesisSink>,
    pub model: Arc<dyn ModelInput>,
    pub outputs: Vec<Arc<dyn OutputSink>>,
    pub publish: Arc<dyn PublishSink>,
    pub tools: Arc<dyn ToolRegistry>,
    /// Converts recognition timestamps to session time. Without one they are
    /// published as received.
    pub clock: Option<Arc<dyn AudioClock>>,
}

pub struct ConversationController {
    config: ControllerConfig,
    state: ConversationState,
    synthesis: Arc<dyn SynthesisSink>,
    model: Arc<dyn ModelInput>,
    tools: Arc<dyn ToolRegistry>,
    clock: Option<Arc<dyn AudioClock>>,
    interrupt: InterruptCoordinator,
    publisher: Arc<TranscriptPublisher>,
}

impl ConversationController {
    pub fn new(config: ControllerConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            synthesis,
            model,
            outputs,
            publish,
            tools,
            clock,
        } = collaborators;
        let interrupt = InterruptCoordinator::new(model.clone(), synthesis.clone(), outputs);
        let publisher = Arc::new(TranscriptPublisher::new(publish, config.flush_interval));
        Self {
            config,
            state: ConversationState::new(),
            synthesis,
            model,
            tools,
            clock,
            interrupt,
            publisher,
        }
    }

    /// Builds a controller, starts its transcript flush task and spawns the
    /// consumption loop.
    pub async fn start(config: ControllerConfig, collaborators: Collaborators) -> ConversationHandle {
        let controller = Self::new(config, collaborators);
        let session_id = controller.state.session_id;
        let (events, receiver) = event_queue();
        let cancel = CancellationToken::new();

        controller.publisher.start().await;
        let span = tracing::info_span!("conversation", %session_id);
        let task = tokio::spawn(controller.run(receiver, cancel.clone()).instrument(span));

        ConversationHandle {
            session_id,
            events,
            cancel,
            task,
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn publisher(&self) -> &Arc<TranscriptPublisher> {
        &self.publisher
    }

    /// Consumes events until cancelled or until every sender is dropped, then
    /// discards anything still queued and drains pending transcripts.
    pub async fn run(
        mut self,
        mut events: EventReceiver,
        cancel: CancellationToken,
    ) -> ConversationState {
        info!("Conversation loop started.");
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = events.next() => match next {
                    Some(event) => event,
                    None => break,
                },
            };
            let tag = event.tag();
            if let Err(e) = self.handle_event(event).await {
                error!(event = %tag, error = ?e, "Failed to handle event.");
            }
        }

        let discarded = events.drain();
        if discarded > 0 {
            info!(discarded, "Discarded queued events on shutdown.");
        }
        self.publisher.stop().await;
        self.state.stopped = true;
        info!(turn_id = self.state.turn_id, "Conversation loop stopped.");
        self.state
    }

    /// Dispatches one event to its handler.
    pub async fn handle_event(&mut self, event: Event) -> Result<()> {
        debug!(event = %event.tag(), "Handling event.");
        match event {
            Event::UserJoined => self.on_user_joined().await,
            Event::UserLeft => {
                self.on_user_left();
                Ok(())
            }
            Event::AsrResult {
                text,
                is_final,
                metadata,
            } => self.on_asr_result(text, is_final, metadata).await,
            Event::LlmResponse {
                text,
                delta,
                is_final,
                kind,
            } => self.on_llm_response(text, delta, is_final, kind).await,
            Event::ToolRegister { tool, source } => self.on_tool_register(tool, source).await,
            Event::Interrupt => {
                self.interrupt.interrupt(&mut self.state).await;
                Ok(())
            }
        }
    }

    fn turn(&self) -> TurnMetadata {
        TurnMetadata {
            session_id: self.state.session_id,
            turn_id: self.state.turn_id,
        }
    }

    async fn send_to_tts(&self, text: &str, is_final: bool) -> Result<()> {
        self.interrupt.mark_active();
        self.synthesis
            .send_text(text, is_final, &self.turn())
            .await
            .context("Failed to send text to synthesis")
    }

    async fn on_user_joined(&mut self) -> Result<()> {
        self.state.user_count += 1;
        info!(user_count = self.state.user_count, "User joined.");

        if self.state.user_count != 1 {
            return Ok(());
        }
        let Some(greeting) = self.config.greeting.clone() else {
            return Ok(());
        };
        let spoken = self.send_to_tts(&greeting, true).await;
        self.publisher
            .publish(TranscriptMessage::new(
                Role::Assistant,
                self.config.agent_stream_id,
                DataType::Text,
                greeting,
                true,
                self.state.turn_id,
            ))
            .await;
        spoken
    }

    fn on_user_left(&mut self) {
        self.state.user_count = self.state.user_count.saturating_sub(1);
        info!(user_count = self.state.user_count, "User left.");
    }

    async fn on_asr_result(
        &mut self,
        text: String,
        is_final: bool,
        metadata: AsrMetadata,
    ) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let stream_id = metadata.stream_id_or(self.config.default_stream_id);
        debug!(is_final, stream_id, "Recognition result received.");

        if is_final || text.chars().count() > self.config.barge_in_min_chars {
            self.interrupt.interrupt(&mut self.state).await;
        }

        let submitted = if is_final {
            self.state.turn_id += 1;
            info!(turn_id = self.state.turn_id, "Final user utterance; submitting to model.");
            self.interrupt.mark_active();
            self.model
                .submit(&text)
                .await
                .context("Failed to submit user utterance to model")
        } else {
            Ok(())
        };

        let mut transcript = TranscriptMessage::new(
            Role::User,
            stream_id,
            DataType::Text,
            text,
            is_final,
            self.state.turn_id,
        );
        transcript.start_ms = match (metadata.start_ms, &self.clock) {
            (Some(relative), Some(clock)) => Some(clock.absolute_ms(relative).await),
            (start, _) => start,
        };
        transcript.duration_ms = metadata.duration_ms;
        transcript.language = metadata.language;
        self.publisher.publish(transcript).await;
        submitted
    }

    async fn on_llm_response(
        &mut self,
        text: String,
        delta: String,
        is_final: bool,
        kind: ResponseKind,
    ) -> Result<()> {
        let spoken = match kind {
            ResponseKind::Message => self.speak_delta(&delta, is_final).await,
            ResponseKind::Reasoning => Ok(()),
        };

        let data_type = match kind {
            ResponseKind::Message => DataType::Text,
            ResponseKind::Reasoning => DataType::Reasoning,
        };
        self.publisher
            .publish(TranscriptMessage::new(
                Role::Assistant,
                self.config.agent_stream_id,
                data_type,
                text,
                is_final,
                self.state.turn_id,
            ))
            .await;
        spoken
    }

    /// Sends every completed sentence to synthesis. On the final delta the
    /// trailing fragment is flushed too, and exactly one send carries
    /// `is_final`.
    async fn speak_delta(&mut self, delta: &str, is_final: bool) -> Result<()> {
        let Segmented {
            mut sentences,
            remainder,
        } = segmenter::feed(&self.state.sentence_fragment, delta);

        if !is_final {
            self.state.sentence_fragment = remainder;
            for sentence in &sentences {
                self.send_to_tts(sentence, false).await?;
            }
            return Ok(());
        }

        self.state.sentence_fragment.clear();
        if !remainder.trim().is_empty() {
            sentences.push(remainder);
        }
        let last = sentences.pop().unwrap_or_default();
        for sentence in &sentences {
            self.send_to_tts(sentence, false).await?;
        }
        self.send_to_tts(&last, true).await
    }

    async fn on_tool_register(&self, tool: ToolSpec, source: String) -> Result<()> {
        info!(tool = %tool.name, %source, "Registering tool.");
        self.tools
            .register(tool, &source)
            .await
            .context("Failed to register tool")
    }
}

/// The outside view of a running conversation.
pub struct ConversationHandle {
    session_id: Uuid,
    events: EventSender,
    cancel: CancellationToken,
    task: JoinHandle<ConversationState>,
}

impl ConversationHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// A sender for producers that outlive a borrow of the handle.
    pub fn sender(&self) -> EventSender {
        self.events.clone()
    }

    pub fn enqueue(&self, event: Event) {
        self.events.enqueue(event);
    }

    /// Requests an interruption from outside the recognition path (e.g. a
    /// "stop" command). Routed through the queue so it is ordered with events.
    pub fn interrupt(&self) {
        self.events.enqueue(Event::Interrupt);
    }

    /// Stops the loop, drains pending transcripts and returns the final state.
    pub async fn stop(self) -> Result<ConversationState> {
        self.cancel.cancel();
        self.task.await.context("Conversation task failed")
    }
}
