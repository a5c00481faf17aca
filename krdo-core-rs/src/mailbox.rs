//! Per-node mailbox: a bounded, ordered inbound queue
//!
//! Delivery is FIFO per sender; there is no ordering guarantee across
//! senders. The sending half is cloned into the registry, the receiving
//! half is owned exclusively by the node task.

use crate::types::Envelope;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendError, TryRecvError};

/// Sending half of a node's mailbox
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Envelope>,
}

/// Receiving half, owned by the node task
#[derive(Debug)]
pub struct Mailbox {
    rx: mpsc::Receiver<Envelope>,
}

/// Create a bounded mailbox pair
pub fn mailbox(capacity: usize) -> (Outbox, Mailbox) {
    let (tx, rx) = mpsc::channel(capacity);
    (Outbox { tx }, Mailbox { rx })
}

impl Outbox {
    /// Deliver an envelope, waiting if the mailbox is full. Fails only
    /// once the mailbox has closed (the node was removed).
    pub async fn deliver(&self, envelope: Envelope) -> Result<(), SendError<Envelope>> {
        self.tx.send(envelope).await
    }
}

impl Mailbox {
    /// Next envelope, or `None` once closed and drained
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Next envelope if one is already queued
    pub fn try_recv(&mut self) -> Result<Envelope, TryRecvError> {
        self.rx.try_recv()
    }

    /// Refuse further deliveries. Envelopes already queued are dropped
    /// with the mailbox.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
