//! Dispatch scheduler: one independent delayed reply task per new message.
//!
//! The monitor hands each detected message to [`DispatchScheduler::schedule`]
//! and moves on. The spawned task extracts text, asks the key phrase service
//! for phrases, builds the reply, sleeps until its send time and delivers it
//! with at most one retry. Nothing a task does is reported back to the
//! monitor; every failure ends in a log line and a [`ReplyOutcome`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use rand::rngs::StdRng;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::analysis::KeyPhraseService;
use crate::error::TransportError;
use crate::mail::{IncomingMessage, MailSender};
use crate::reply::{ReplyDraft, ReplyGenerator, SenderIdentity, compose_reply};
use crate::text::extract_plain_text;

/// Longest delay a reply can be scheduled with. Longer draws are clamped.
pub const MAX_SEND_DELAY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Source of per-reply send delays.
pub trait DelayStrategy: Send + Sync {
    fn next_delay(&self) -> Duration;
}

/// Delay drawn uniformly from `[min, max]` with millisecond resolution.
pub struct UniformDelay {
    min_ms: u64,
    max_ms: u64,
    rng: Mutex<StdRng>,
}

impl UniformDelay {
    /// `min` above `max` collapses to `min`.
    pub fn new(min: Duration, max: Duration, rng: StdRng) -> Self {
        let millis = |d: Duration| u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
        let min_ms = millis(min);
        Self {
            min_ms,
            max_ms: millis(max).max(min_ms),
            rng: Mutex::new(rng),
        }
    }
}

impl DelayStrategy for UniformDelay {
    fn next_delay(&self) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Duration::from_millis(rng.gen_range(self.min_ms..=self.max_ms))
    }
}

/// Why a message got no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No text body, no HTML body, or only whitespace.
    NoText,
    NoKeyPhrases,
    /// The key phrase service failed.
    Analysis,
    NoRecipients,
}

/// Terminal state of one pending reply.
#[derive(Debug)]
pub enum ReplyOutcome {
    Sent { attempts: u32 },
    Skipped(SkipReason),
    Failed(TransportError),
}

impl ReplyOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// A composed reply waiting for its send time.
#[derive(Debug, Clone)]
pub struct PendingReply {
    pub draft: ReplyDraft,
    pub send_at: Instant,
}

impl PendingReply {
    /// Sleep until `send_at`, then deliver.
    pub async fn deliver(self, sender: &dyn MailSender) -> ReplyOutcome {
        tokio::time::sleep_until(self.send_at).await;
        send_with_retry(sender, &self.draft).await
    }
}

/// Spawns one reply task per message.
#[derive(Clone)]
pub struct DispatchScheduler {
    analysis: Arc<dyn KeyPhraseService>,
    sender: Arc<dyn MailSender>,
    generator: Arc<ReplyGenerator>,
    delays: Arc<dyn DelayStrategy>,
    identity: SenderIdentity,
}

impl DispatchScheduler {
    pub fn new(
        analysis: Arc<dyn KeyPhraseService>,
        sender: Arc<dyn MailSender>,
        generator: Arc<ReplyGenerator>,
        delays: Arc<dyn DelayStrategy>,
        identity: SenderIdentity,
    ) -> Self {
        Self {
            analysis,
            sender,
            generator,
            delays,
            identity,
        }
    }

    /// Schedule a reply to `message` and return immediately.
    ///
    /// The delay and the reply's random source are drawn now, so repeated
    /// calls consume both in call order whatever the analysis latency. The
    /// returned handle is for callers that care about the outcome; the
    /// monitor drops it.
    pub fn schedule(&self, message: IncomingMessage) -> JoinHandle<ReplyOutcome> {
        let send_at = Instant::now() + self.delays.next_delay().min(MAX_SEND_DELAY);
        let rng = self.generator.reply_rng();
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.process(message, send_at, rng).await })
    }

    /// Schedule every message of a batch in the given order.
    pub fn dispatch_batch(
        &self,
        messages: impl IntoIterator<Item = IncomingMessage>,
    ) -> Vec<JoinHandle<ReplyOutcome>> {
        messages.into_iter().map(|m| self.schedule(m)).collect()
    }

    async fn process(
        &self,
        message: IncomingMessage,
        send_at: Instant,
        mut rng: StdRng,
    ) -> ReplyOutcome {
        let draft = match self.prepare(&message, &mut rng).await {
            Ok(draft) => draft,
            Err(reason) => return ReplyOutcome::Skipped(reason),
        };

        let remaining = send_at.saturating_duration_since(Instant::now());
        let wall_clock = chrono::Local::now()
            + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
        info!(
            index = message.index,
            "Response generated for email '{}'. Response is scheduled to be sent at {}",
            message.subject,
            wall_clock.format("%Y-%m-%d %H:%M:%S")
        );

        PendingReply { draft, send_at }
            .deliver(self.sender.as_ref())
            .await
    }

    async fn prepare(
        &self,
        message: &IncomingMessage,
        rng: &mut StdRng,
    ) -> Result<ReplyDraft, SkipReason> {
        let Some(text) = extract_plain_text(message) else {
            info!(index = message.index, subject = %message.subject, "No text content, skipping reply");
            return Err(SkipReason::NoText);
        };

        let phrases = match self.analysis.extract_key_phrases(&text).await {
            Ok(phrases) => phrases,
            Err(e) => {
                warn!(index = message.index, subject = %message.subject, error = %e, "Key phrase extraction failed, skipping reply");
                return Err(SkipReason::Analysis);
            }
        };
        debug!(index = message.index, count = phrases.len(), "Key phrases extracted");

        let Some(body) = self.generator.generate(&phrases, rng) else {
            info!(index = message.index, subject = %message.subject, "No key phrases found, skipping reply");
            return Err(SkipReason::NoKeyPhrases);
        };

        let draft = compose_reply(message, &self.identity, body);
        if !draft.has_recipients() {
            warn!(index = message.index, subject = %message.subject, "Message has no reply address, skipping reply");
            return Err(SkipReason::NoRecipients);
        }
        Ok(draft)
    }
}

/// Send `draft`, retrying exactly once with a fresh session on a transient
/// failure. Non-transient failures are not retried.
pub async fn send_with_retry(sender: &dyn MailSender, draft: &ReplyDraft) -> ReplyOutcome {
    let recipients = draft
        .to
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    info!("Sending reply for '{}' to '{}'", draft.subject, recipients);

    let err = match sender.send(draft).await {
        Ok(()) => return ReplyOutcome::Sent { attempts: 1 },
        Err(e) if e.is_transient() => e,
        Err(e) => {
            error!(subject = %draft.subject, error = ?e, "Failed to send reply, not retrying");
            return ReplyOutcome::Failed(e);
        }
    };

    warn!(subject = %draft.subject, error = %err, "Send failed, retrying with a new session");
    match sender.send(draft).await {
        Ok(()) => {
            info!(subject = %draft.subject, "Reply sent on retry");
            ReplyOutcome::Sent { attempts: 2 }
        }
        Err(e) => {
            error!(subject = %draft.subject, first = ?err, error = ?e, "Failed to send reply after retry");
            ReplyOutcome::Failed(e)
        }
    }
}
