use async_trait::async_trait;

use crate::{
    domain::{ConversationId, InboundMessage},
    Result,
};

/// Ordered, at-least-once inbound message feed.
///
/// `Ok(None)` is a clean end-of-stream. `Err` is a fatal transport failure
/// the adapter could not recover from; recoverable hiccups (reconnects,
/// backoff) are the adapter's responsibility and stay invisible here.
#[async_trait]
pub trait MessageStream: Send {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>>;
}

/// Port for sending text back into the conversation a message arrived in.
///
/// Independent of the ledger: a delivery failure must never block or cancel
/// a ledger append, and vice versa.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, conversation: &ConversationId, text: &str) -> Result<()>;
}
