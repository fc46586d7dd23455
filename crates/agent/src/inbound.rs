//! Inbound remote messages.
//!
//! The messaging transport pushes every received message into a channel;
//! [`run`] consumes it and hands each message to the dispatcher, so
//! transport delivery timing is decoupled from dispatch.

use std::sync::Arc;

use scriptrelay_core::Identity;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::CommandDispatcher;

/// Capacity of the inbound message channel.
pub const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// A text message from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: Identity,
    pub body: String,
}

pub fn channel() -> (mpsc::Sender<InboundMessage>, mpsc::Receiver<InboundMessage>) {
    mpsc::channel(INBOUND_CHANNEL_CAPACITY)
}

/// Dispatch inbound messages until the channel closes or `cancel` fires.
pub async fn run(
    dispatcher: Arc<CommandDispatcher>,
    mut rx: mpsc::Receiver<InboundMessage>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => message,
        };
        let Some(message) = message else {
            break;
        };
        let outcome = dispatcher
            .dispatch_remote(&message.from, &message.body)
            .await;
        tracing::debug!(from = %message.from, outcome = ?outcome, "Inbound message handled");
    }
    tracing::info!("Inbound message loop stopped");
}
