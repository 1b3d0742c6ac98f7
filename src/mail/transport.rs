//! Mail transport seams: the monitored mailbox and the reply sender.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::TransportError;
use crate::mail::types::{IncomingMessage, MessageSummary};
use crate::reply::ReplyDraft;

/// Callback fired with the new message count whenever the mailbox grows or
/// shrinks. It may run on a transport-owned thread.
pub type CountChanged = Arc<dyn Fn(u32) + Send + Sync>;

/// Cancellation handle for one wait-for-change call.
///
/// A fresh handle is created for every call; clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct IdleCancel {
    cancelled: Arc<AtomicBool>,
}

impl IdleCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// The monitored mailbox. Owned exclusively by the monitor's control flow.
#[async_trait]
pub trait MailStore: Send {
    /// Connect and authenticate.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Open the inbox read-only and load its message count.
    async fn open_inbox_read_only(&mut self) -> Result<(), TransportError>;

    /// Last message count reported by the server.
    fn message_count(&self) -> u32;

    /// Register the callback fired on message count changes.
    fn on_count_changed(&mut self, callback: CountChanged);

    /// Block until the mailbox changes, `cancel` fires, or the transport's own
    /// timeout elapses.
    async fn wait_for_change(&mut self, cancel: IdleCancel) -> Result<(), TransportError>;

    /// Summaries for the 0-based half-open index range `[start, end)`.
    async fn fetch_summaries(
        &mut self,
        start: u32,
        end: u32,
    ) -> Result<Vec<MessageSummary>, TransportError>;

    /// Full message at a 0-based index.
    async fn get_message(&mut self, index: u32) -> Result<IncomingMessage, TransportError>;

    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Outbound mail. Every call uses its own session: connect, authenticate,
/// send, disconnect.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, draft: &ReplyDraft) -> Result<(), TransportError>;
}
