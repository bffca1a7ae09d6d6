//! The conversation's single ingress point.
//!
//! Any number of producers enqueue through cloned [`EventSender`]s; exactly
//! one [`EventReceiver`] is consumed by the controller loop.

use crate::event::Event;
use tokio::sync::mpsc;
use tracing::debug;

/// Creates a connected sender/receiver pair.
pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    /// Enqueues an event. Never blocks; once the conversation has stopped the
    /// event is discarded.
    pub fn enqueue(&self, event: Event) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            debug!(event = %event.tag(), "Conversation stopped; event discarded.");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventReceiver {
    /// Waits for the next event in FIFO order. `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Closes the queue and discards whatever is still buffered. Returns the
    /// number of discarded events.
    pub fn drain(&mut self) -> usize {
        self.rx.close();
        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}
