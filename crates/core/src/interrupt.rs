//! Barge-in handling: stop everything the assistant is producing.

use crate::{
    controller::ConversationState,
    sinks::{ModelInput, OutputSink, SynthesisSink},
};
use futures::future::join_all;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cancels in-flight generation and synthesis and flushes every downstream sink.
pub struct InterruptCoordinator {
    model: Arc<dyn ModelInput>,
    synthesis: Arc<dyn SynthesisSink>,
    outputs: Vec<Arc<dyn OutputSink>>,
    /// Set whenever assistant output starts; cleared by an interrupt.
    active: AtomicBool,
}

impl InterruptCoordinator {
    pub fn new(
        model: Arc<dyn ModelInput>,
        synthesis: Arc<dyn SynthesisSink>,
        outputs: Vec<Arc<dyn OutputSink>>,
    ) -> Self {
        Self {
            model,
            synthesis,
            outputs,
            active: AtomicBool::new(false),
        }
    }

    /// Records that the assistant has started producing output (a model
    /// request or a synthesis send).
    pub fn mark_active(&self) {
        self.active.store(true, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Clears the pending sentence fragment and, if anything has started since
    /// the last interrupt, cancels generation and flushes synthesis and every
    /// output sink.
    ///
    /// Collaborator failures are logged and never stop the remaining steps.
    /// Returns the flush id sent to the synthesizer, or `None` when there was
    /// nothing to interrupt.
    pub async fn interrupt(&self, state: &mut ConversationState) -> Option<Uuid> {
        state.sentence_fragment.clear();
        if !self.active.swap(false, Ordering::AcqRel) {
            debug!("Interrupt requested with no active output; fragment cleared.");
            return None;
        }

        let flush_id = Uuid::new_v4();
        info!(%flush_id, turn_id = state.turn_id, "Interrupting assistant output.");

        if let Err(e) = self.model.cancel_generation().await {
            warn!(error = ?e, "Failed to cancel model generation.");
        }
        if let Err(e) = self.synthesis.flush(flush_id).await {
            warn!(%flush_id, error = ?e, "Failed to flush synthesis.");
        }

        let results = join_all(
            self.outputs
                .iter()
                .map(|sink| async move { (sink.name(), sink.flush().await) }),
        )
        .await;
        for (name, result) in results {
            if let Err(e) = result {
                warn!(sink = name, error = ?e, "Failed to flush output sink.");
            }
        }

        Some(flush_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::{MockModelInput, MockSynthesisSink};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use mockall::Sequence;
    use std::sync::atomic::AtomicU32;

    struct CountingOutput {
        name: &'static str,
        flushes: AtomicU32,
        fail: bool,
    }

    impl CountingOutput {
        fn new(name: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                flushes: AtomicU32::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl OutputSink for CountingOutput {
        fn name(&self) -> &str {
            self.name
        }

        async fn flush(&self) -> anyhow::Result<()> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(anyhow!("{} unavailable", self.name))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_interrupt_without_active_output_only_clears_fragment() {
        let coordinator = InterruptCoordinator::new(
            Arc::new(MockModelInput::new()),
            Arc::new(MockSynthesisSink::new()),
            vec![],
        );
        let mut state = ConversationState::new();
        state.sentence_fragment.push_str("half a sen");

        assert_eq!(coordinator.interrupt(&mut state).await, None);
        assert!(state.sentence_fragment.is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_cancels_then_flushes_every_sink() {
        let mut seq = Sequence::new();
        let mut model = MockModelInput::new();
        model
            .expect_cancel_generation()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        let mut synthesis = MockSynthesisSink::new();
        synthesis
            .expect_flush()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let broken = CountingOutput::new("rtc", true);
        let avatar = CountingOutput::new("avatar", false);
        let coordinator = InterruptCoordinator::new(
            Arc::new(model),
            Arc::new(synthesis),
            vec![broken.clone() as Arc<dyn OutputSink>, avatar.clone()],
        );
        coordinator.mark_active();

        let mut state = ConversationState::new();
        state.sentence_fragment.push_str("pending");
        let flush_id = coordinator.interrupt(&mut state).await;

        assert!(flush_id.is_some());
        assert!(state.sentence_fragment.is_empty());
        assert_eq!(broken.flushes.load(Ordering::SeqCst), 1);
        // A failing sink does not prevent the others from being flushed.
        assert_eq!(avatar.flushes.load(Ordering::SeqCst), 1);
        assert!(!coordinator.is_active());
    }

    #[tokio::test]
    async fn test_repeated_interrupt_is_a_noop() {
        let mut model = MockModelInput::new();
        model.expect_cancel_generation().times(1).returning(|| Ok(()));
        let mut synthesis = MockSynthesisSink::new();
        synthesis.expect_flush().times(1).returning(|_| Ok(()));
        let coordinator =
            InterruptCoordinator::new(Arc::new(model), Arc::new(synthesis), vec![]);
        coordinator.mark_active();

        let mut state = ConversationState::new();
        assert!(coordinator.interrupt(&mut state).await.is_some());
        assert!(coordinator.interrupt(&mut state).await.is_none());
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_interrupt() {
        let mut model = MockModelInput::new();
        model
            .expect_cancel_generation()
            .times(1)
            .returning(|| Err(anyhow!("no generation running")));
        let mut synthesis = MockSynthesisSink::new();
        synthesis
            .expect_flush()
            .times(1)
            .returning(|_| Err(anyhow!("tts offline")));
        let output = CountingOutput::new("rtc", false);
        let outputs: Vec<Arc<dyn OutputSink>> = vec![output.clone()];
        let coordinator = InterruptCoordinator::new(Arc::new(model), Arc::new(synthesis), outputs);
        coordinator.mark_active();

        let mut state = ConversationState::new();
        assert!(coordinator.interrupt(&mut state).await.is_some());
        assert_eq!(output.flushes.load(Ordering::SeqCst), 1);
    }
}
