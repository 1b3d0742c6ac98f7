//! End-to-end tests for the monitor and dispatch pipeline.
//!
//! The mailbox, the SMTP side and the key phrase service are in-memory
//! stand-ins; tokio's paused clock makes the reply delays exact.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::Instant;

use autoreply::analysis::KeyPhraseService;
use autoreply::dispatch::{DelayStrategy, DispatchScheduler};
use autoreply::error::{AnalysisError, TransportError};
use autoreply::mail::{
    CountChanged, IdleCancel, IncomingMessage, MailAddress, MailSender, MailStore, MessageSummary,
};
use autoreply::monitor::{MailboxMonitor, MonitorConfig};
use autoreply::reply::{ReplyDraft, ReplyGenerator, ReplyTemplates, SenderIdentity};

/// Maximum time any wait is allowed before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(3600);

// ── In-memory mailbox ───────────────────────────────────────────────

#[derive(Default)]
struct Inbox {
    messages: Vec<IncomingMessage>,
    callback: Option<CountChanged>,
    connected: bool,
}

/// Shared handle the test uses to deliver mail.
#[derive(Clone, Default)]
struct Server(Arc<Mutex<Inbox>>);

impl Server {
    fn deliver(&self, subject: &str, body: &str) {
        let (count, callback) = {
            let mut inbox = self.0.lock().unwrap();
            let index = inbox.messages.len() as u32;
            inbox.messages.push(IncomingMessage {
                index,
                subject: subject.into(),
                from: vec![MailAddress::new(format!("sender{index}@example.com"))],
                message_id: Some(format!("msg{index}@example.com")),
                text_body: Some(body.into()),
                ..Default::default()
            });
            (inbox.messages.len() as u32, inbox.callback.clone())
        };
        if let Some(cb) = callback {
            cb(count);
        }
    }

    fn drop_connection(&self) {
        self.0.lock().unwrap().connected = false;
    }
}

struct MemoryStore {
    server: Server,
}

#[async_trait]
impl MailStore for MemoryStore {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.server.0.lock().unwrap().connected = true;
        Ok(())
    }

    async fn open_inbox_read_only(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn message_count(&self) -> u32 {
        self.server.0.lock().unwrap().messages.len() as u32
    }

    fn on_count_changed(&mut self, callback: CountChanged) {
        self.server.0.lock().unwrap().callback = Some(callback);
    }

    async fn wait_for_change(&mut self, cancel: IdleCancel) -> Result<(), TransportError> {
        let start = self.message_count();
        loop {
            if !self.is_connected() {
                return Err(TransportError::Disconnected("connection reset".into()));
            }
            if cancel.is_cancelled() || self.message_count() != start {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn fetch_summaries(
        &mut self,
        start: u32,
        end: u32,
    ) -> Result<Vec<MessageSummary>, TransportError> {
        Ok((start..end)
            .map(|index| MessageSummary { index, uid: None })
            .collect())
    }

    async fn get_message(&mut self, index: u32) -> Result<IncomingMessage, TransportError> {
        self.server
            .0
            .lock()
            .unwrap()
            .messages
            .get(index as usize)
            .cloned()
            .ok_or_else(|| TransportError::Protocol(format!("no message {index}")))
    }

    async fn disconnect(&mut self) {
        self.server.0.lock().unwrap().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.server.0.lock().unwrap().connected
    }
}

// ── Collaborators ───────────────────────────────────────────────────

/// Returns the words of the text, or nothing for texts mentioning "nothing".
struct WordPhrases;

#[async_trait]
impl KeyPhraseService for WordPhrases {
    async fn extract_key_phrases(&self, text: &str) -> Result<Vec<String>, AnalysisError> {
        if text.contains("nothing") {
            return Ok(Vec::new());
        }
        Ok(text.split_whitespace().map(str::to_string).collect())
    }
}

#[derive(Default)]
struct RecordingSender {
    failures: Mutex<VecDeque<TransportError>>,
    attempts: Mutex<u32>,
    sent: Mutex<Vec<(ReplyDraft, Instant)>>,
    /// Sends for this subject never complete.
    hang_on: Option<String>,
}

impl RecordingSender {
    fn failing_with(errors: Vec<TransportError>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(errors.into()),
            ..Default::default()
        })
    }

    fn hanging_on(subject: &str) -> Arc<Self> {
        Arc::new(Self {
            hang_on: Some(subject.to_string()),
            ..Default::default()
        })
    }

    fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }

    fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(d, _)| d.subject.clone())
            .collect()
    }
}

#[async_trait]
impl MailSender for RecordingSender {
    async fn send(&self, draft: &ReplyDraft) -> Result<(), TransportError> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(e) = self.failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        if self.hang_on.as_deref() == Some(draft.subject.as_str()) {
            std::future::pending::<()>().await;
        }
        self.sent.lock().unwrap().push((draft.clone(), Instant::now()));
        Ok(())
    }
}

struct FixedDelays(Mutex<VecDeque<Duration>>);

impl FixedDelays {
    fn secs(delays: &[u64]) -> Arc<Self> {
        Arc::new(Self(Mutex::new(
            delays.iter().copied().map(Duration::from_secs).collect(),
        )))
    }
}

impl DelayStrategy for FixedDelays {
    fn next_delay(&self) -> Duration {
        self.0
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Duration::from_secs(1))
    }
}

fn build(
    server: &Server,
    sender: Arc<RecordingSender>,
    delays: Arc<FixedDelays>,
) -> MailboxMonitor<MemoryStore> {
    let scheduler = DispatchScheduler::new(
        Arc::new(WordPhrases),
        sender,
        Arc::new(ReplyGenerator::new(
            ReplyTemplates::with_closing_name("Dana"),
            StdRng::seed_from_u64(5),
        )),
        delays,
        SenderIdentity::new("Dana", "dana@example.com"),
    );
    MailboxMonitor::new(
        MemoryStore {
            server: server.clone(),
        },
        scheduler,
        MonitorConfig {
            keepalive_interval: Duration::from_secs(300),
            reconnect_attempts: 2,
            reconnect_delay: Duration::from_secs(5),
        },
    )
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn existing_mail_is_not_answered() {
    let server = Server::default();
    server.deliver("old", "already here");
    let sender = Arc::new(RecordingSender::default());
    let mut monitor = build(&server, sender.clone(), FixedDelays::secs(&[]));

    monitor.start().await.unwrap();
    assert_eq!(monitor.mailbox().baseline, 1);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(sender.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn batch_replies_follow_their_delays() {
    let server = Server::default();
    let sender = Arc::new(RecordingSender::default());
    let mut monitor = build(&server, sender.clone(), FixedDelays::secs(&[10, 20]));
    monitor.start().await.unwrap();

    server.deliver("first", "budget review");
    server.deliver("second", "travel plans");
    let detected_at = Instant::now();
    monitor.cycle().await.unwrap();

    // Handing off the batch takes no time; sends happen later.
    assert_eq!(Instant::now(), detected_at);
    assert_eq!(monitor.mailbox().baseline, 2);
    assert_eq!(sender.attempts(), 0);

    tokio::time::sleep(Duration::from_secs(30)).await;

    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0.subject, "Re: first");
    assert_eq!(sent[1].0.subject, "Re: second");
    assert!(sent[0].1 - detected_at >= Duration::from_secs(10));
    assert!(sent[0].1 - detected_at < Duration::from_secs(11));
    assert!(sent[1].1 - detected_at >= Duration::from_secs(20));
    assert!(sent[1].1 - detected_at < Duration::from_secs(21));
}

#[tokio::test(start_paused = true)]
async fn hung_send_does_not_hold_back_the_next_reply() {
    let server = Server::default();
    let sender = RecordingSender::hanging_on("Re: stuck");
    let mut monitor = build(&server, sender.clone(), FixedDelays::secs(&[10, 20]));
    monitor.start().await.unwrap();

    server.deliver("stuck", "budget review");
    server.deliver("free", "travel plans");
    let detected_at = Instant::now();
    monitor.cycle().await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(sender.attempts(), 2);
    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.subject, "Re: free");
    assert!(sent[0].1 - detected_at >= Duration::from_secs(20));
    assert!(sent[0].1 - detected_at < Duration::from_secs(21));
}

#[tokio::test(start_paused = true)]
async fn reply_headers_and_body() {
    let server = Server::default();
    let sender = Arc::new(RecordingSender::default());
    let mut monitor = build(&server, sender.clone(), FixedDelays::secs(&[1]));
    monitor.start().await.unwrap();

    server.deliver("Lunch", "sandwiches");
    monitor.cycle().await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let sent = sender.sent.lock().unwrap();
    let draft = &sent[0].0;
    assert_eq!(draft.to, vec![MailAddress::new("sender0@example.com")]);
    assert_eq!(draft.in_reply_to.as_deref(), Some("msg0@example.com"));
    assert_eq!(draft.references, vec!["msg0@example.com"]);
    assert_eq!(draft.from, SenderIdentity::new("Dana", "dana@example.com"));
    assert!(draft.body.contains("sandwiches"));
    assert!(draft.body.ends_with("Dana\n"));
}

#[tokio::test(start_paused = true)]
async fn not_connected_send_is_retried_once() {
    let server = Server::default();
    let sender = RecordingSender::failing_with(vec![TransportError::NotConnected]);
    let mut monitor = build(&server, sender.clone(), FixedDelays::secs(&[10]));
    monitor.start().await.unwrap();

    server.deliver("retry me", "invoice");
    monitor.cycle().await.unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;

    assert_eq!(sender.attempts(), 2);
    assert_eq!(sender.subjects(), vec!["Re: retry me"]);
}

#[tokio::test(start_paused = true)]
async fn permanent_send_failure_is_contained() {
    let server = Server::default();
    let sender =
        RecordingSender::failing_with(vec![TransportError::InvalidMessage("bad address".into())]);
    let mut monitor = build(&server, sender.clone(), FixedDelays::secs(&[10, 10]));
    monitor.start().await.unwrap();

    server.deliver("doomed", "invoice");
    monitor.cycle().await.unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(sender.attempts(), 1);
    assert!(sender.subjects().is_empty());

    // The monitor keeps going.
    server.deliver("fine", "receipt");
    monitor.cycle().await.unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(sender.subjects(), vec!["Re: fine"]);
}

#[tokio::test(start_paused = true)]
async fn message_without_key_phrases_gets_no_reply() {
    let server = Server::default();
    let sender = Arc::new(RecordingSender::default());
    let mut monitor = build(&server, sender.clone(), FixedDelays::secs(&[5, 5]));
    monitor.start().await.unwrap();

    server.deliver("empty", "nothing to see");
    server.deliver("full", "deadline");
    monitor.cycle().await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(sender.subjects(), vec!["Re: full"]);
}

#[tokio::test(start_paused = true)]
async fn mail_during_idle_wakes_monitor_before_keepalive() {
    let server = Server::default();
    let sender = Arc::new(RecordingSender::default());
    let mut monitor = build(&server, sender.clone(), FixedDelays::secs(&[1]));
    monitor.start().await.unwrap();

    let remote = server.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        remote.deliver("late", "agenda");
    });

    let started = Instant::now();
    tokio::time::timeout(TEST_TIMEOUT, monitor.cycle())
        .await
        .unwrap()
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(300));
    assert_eq!(monitor.mailbox().baseline, 1);
}

#[tokio::test(start_paused = true)]
async fn mail_arriving_while_disconnected_is_answered() {
    let server = Server::default();
    let sender = Arc::new(RecordingSender::default());
    let mut monitor = build(&server, sender.clone(), FixedDelays::secs(&[1]));
    monitor.start().await.unwrap();

    let remote = server.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        remote.drop_connection();
        // Delivered with nobody listening: only the reconnect can notice.
        remote.0.lock().unwrap().callback = None;
        remote.deliver("while away", "contract");
    });

    tokio::time::timeout(TEST_TIMEOUT, monitor.cycle())
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(monitor.mailbox().baseline, 1);
    assert_eq!(sender.subjects(), vec!["Re: while away"]);
}

#[tokio::test(start_paused = true)]
async fn run_keeps_answering_across_batches() {
    let server = Server::default();
    let sender = Arc::new(RecordingSender::default());
    let mut monitor = build(&server, sender.clone(), FixedDelays::secs(&[5, 5, 6]));

    let handle = tokio::spawn(async move { monitor.run().await });
    tokio::time::sleep(Duration::from_secs(1)).await;

    server.deliver("one", "alpha");
    tokio::time::sleep(Duration::from_secs(400)).await;
    server.deliver("two", "beta");
    server.deliver("three", "gamma");
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(!handle.is_finished());
    handle.abort();
    assert_eq!(sender.subjects(), vec!["Re: one", "Re: two", "Re: three"]);
}
