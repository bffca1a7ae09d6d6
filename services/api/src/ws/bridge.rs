//! Collaborators backed by the WebSocket peer.
//!
//! The peer plays the synthesizer, the model, the tool registry and the
//! transcript consumer, so every collaborator call becomes one
//! [`ServerMessage`] written to the shared socket sink.

use super::protocol::ServerMessage;
use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::Message;
use cadence_core::{
    Collaborators, ModelInput, OutputSink, PublishSink, SynthesisSink, ToolRegistry, ToolSpec,
    TranscriptMessage, TurnMetadata,
};
use futures_util::{Sink, SinkExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Serializes a `ServerMessage` and writes it to the socket sink.
pub(crate) async fn send_msg<S>(socket_tx: &mut S, msg: ServerMessage) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}

pub struct SocketBridge<S> {
    socket_tx: Arc<Mutex<S>>,
}

impl<S> Clone for SocketBridge<S> {
    fn clone(&self) -> Self {
        Self {
            socket_tx: Arc::clone(&self.socket_tx),
        }
    }
}

impl<S> SocketBridge<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    pub fn new(socket_tx: Arc<Mutex<S>>) -> Self {
        Self { socket_tx }
    }

    pub async fn send(&self, msg: ServerMessage) -> Result<()> {
        send_msg(&mut *self.socket_tx.lock().await, msg).await
    }

    /// Builds the full collaborator set for one conversation, with one output
    /// sink per configured name.
    pub fn collaborators(&self, output_sinks: &[String]) -> Collaborators {
        let bridge = Arc::new(self.clone());
        Collaborators {
            synthesis: bridge.clone(),
            model: bridge.clone(),
            outputs: output_sinks
                .iter()
                .map(|name| {
                    Arc::new(SocketOutput {
                        name: name.clone(),
                        bridge: self.clone(),
                    }) as Arc<dyn OutputSink>
                })
                .collect(),
            publish: bridge.clone(),
            tools: bridge,
            clock: None,
        }
    }
}

#[async_trait]
impl<S> SynthesisSink for SocketBridge<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    async fn send_text(&self, text: &str, is_final: bool, turn: &TurnMetadata) -> Result<()> {
        self.send(ServerMessage::TtsText {
            text: text.to_string(),
            is_final,
            turn_id: turn.turn_id,
            session_id: turn.session_id,
        })
        .await
    }

    async fn flush(&self, flush_id: Uuid) -> Result<()> {
        self.send(ServerMessage::TtsFlush { flush_id }).await
    }
}

#[async_trait]
impl<S> ModelInput for SocketBridge<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    async fn submit(&self, text: &str) -> Result<()> {
        self.send(ServerMessage::LlmSubmit {
            text: text.to_string(),
        })
        .await
    }

    async fn cancel_generation(&self) -> Result<()> {
        self.send(ServerMessage::LlmCancel).await
    }
}

#[async_trait]
impl<S> PublishSink for SocketBridge<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    async fn emit(&self, message: TranscriptMessage) -> Result<()> {
        self.send(ServerMessage::Transcript(message)).await
    }
}

#[async_trait]
impl<S> ToolRegistry for SocketBridge<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    async fn register(&self, tool: ToolSpec, source: &str) -> Result<()> {
        self.send(ServerMessage::ToolRegistered {
            tool,
            source: source.to_string(),
        })
        .await
    }
}

/// A named downstream sink whose flush is forwarded to the peer.
struct SocketOutput<S> {
    name: String,
    bridge: SocketBridge<S>,
}

#[async_trait]
impl<S> OutputSink for SocketOutput<S>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn flush(&self) -> Result<()> {
        self.bridge
            .send(ServerMessage::OutputFlush {
                sink: self.name.clone(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{ControllerConfig, ConversationController, Event};
    use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
    use serde_json::Value;

    fn bridge() -> (SocketBridge<UnboundedSender<Message>>, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded();
        (SocketBridge::new(Arc::new(Mutex::new(tx))), rx)
    }

    fn sent(rx: &mut UnboundedReceiver<Message>) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(Some(msg)) = rx.try_next() {
            match msg {
                Message::Text(text) => messages.push(serde_json::from_str(text.as_str()).unwrap()),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        messages
    }

    #[tokio::test]
    async fn test_collaborator_calls_become_server_messages() {
        let (bridge, mut rx) = bridge();
        let collaborators = bridge.collaborators(&["rtc".to_string(), "avatar".to_string()]);
        let turn = TurnMetadata {
            session_id: Uuid::nil(),
            turn_id: 4,
        };

        collaborators.synthesis.send_text("Hi.", true, &turn).await.unwrap();
        collaborators.model.cancel_generation().await.unwrap();
        for output in &collaborators.outputs {
            output.flush().await.unwrap();
        }

        let messages = sent(&mut rx);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["type"], "tts_text");
        assert_eq!(messages[0]["turn_id"], 4);
        assert_eq!(messages[1]["type"], "llm_cancel");
        assert_eq!(messages[2]["type"], "output_flush");
        assert_eq!(messages[2]["sink"], "rtc");
        assert_eq!(messages[3]["sink"], "avatar");
    }

    #[tokio::test]
    async fn test_closed_peer_surfaces_as_error() {
        let (bridge, rx) = bridge();
        drop(rx);
        assert!(bridge.submit("hello").await.is_err());
    }

    #[tokio::test]
    async fn test_conversation_over_bridge() {
        let (bridge, mut rx) = bridge();
        let mut controller = ConversationController::new(
            ControllerConfig {
                greeting: Some("Welcome!".to_string()),
                ..Default::default()
            },
            bridge.collaborators(&["rtc".to_string()]),
        );

        controller.handle_event(Event::UserJoined).await.unwrap();
        controller
            .handle_event(Event::AsrResult {
                text: "what time is it".to_string(),
                is_final: true,
                metadata: Default::default(),
            })
            .await
            .unwrap();

        let types: Vec<String> = sent(&mut rx)
            .into_iter()
            .map(|m| m["type"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            types,
            vec![
                "tts_text",
                "transcript",
                "llm_cancel",
                "tts_flush",
                "output_flush",
                "llm_submit",
                "transcript",
            ]
        );
    }
}
