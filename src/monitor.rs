//! Mailbox monitor: keeps the watched connection alive, detects new mail and
//! hands each new message to the dispatch scheduler.
//!
//! The monitor is a single control flow. The only state it shares is the
//! [`ChangeSignal`], raised by the store's count callback from whatever
//! thread the transport runs on.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::ResponderConfig;
use crate::dispatch::DispatchScheduler;
use crate::error::{MonitorError, TransportError};
use crate::mail::{IdleCancel, MailStore};

/// "Mail arrived" flag plus a wakeup for the control loop.
#[derive(Debug, Default)]
pub struct ChangeSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.raised.store(false, Ordering::SeqCst);
    }

    /// Resolves once the flag is set. A raise that lands between the check
    /// and the wait is kept as a `Notify` permit.
    pub async fn raised(&self) {
        loop {
            if self.is_raised() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Disconnected,
    Idle,
    ChangeDetected,
    Dispatching,
}

/// Mutable monitor bookkeeping. Only the control flow touches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxState {
    /// Message count already handed to the scheduler.
    pub baseline: u32,
    pub state: MonitorState,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub keepalive_interval: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl From<&ResponderConfig> for MonitorConfig {
    fn from(config: &ResponderConfig) -> Self {
        Self {
            keepalive_interval: config.keepalive_interval,
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: config.reconnect_delay,
        }
    }
}

enum Wake {
    Finished(Result<(), TransportError>),
    Changed,
    Keepalive,
}

pub struct MailboxMonitor<S: MailStore> {
    store: S,
    scheduler: DispatchScheduler,
    config: MonitorConfig,
    signal: Arc<ChangeSignal>,
    mailbox: MailboxState,
}

impl<S: MailStore> MailboxMonitor<S> {
    pub fn new(store: S, scheduler: DispatchScheduler, config: MonitorConfig) -> Self {
        Self {
            store,
            scheduler,
            config,
            signal: Arc::new(ChangeSignal::new()),
            mailbox: MailboxState {
                baseline: 0,
                state: MonitorState::Disconnected,
            },
        }
    }

    pub fn mailbox(&self) -> MailboxState {
        self.mailbox
    }

    pub fn signal(&self) -> &Arc<ChangeSignal> {
        &self.signal
    }

    /// Run until a fatal error. Never returns `Ok`.
    pub async fn run(&mut self) -> Result<Infallible, MonitorError> {
        self.start().await?;
        loop {
            self.cycle().await?;
        }
    }

    /// Register the change callback, connect, open the inbox and record the
    /// baseline.
    pub async fn start(&mut self) -> Result<(), MonitorError> {
        let signal = Arc::clone(&self.signal);
        self.store.on_count_changed(Arc::new(move |count| {
            debug!(count, "Mailbox count changed");
            signal.raise();
        }));

        self.connect().await.map_err(MonitorError::Connect)?;
        self.mailbox.baseline = self.store.message_count();
        self.set_state(MonitorState::Idle);
        info!(count = self.mailbox.baseline, "Client ready. Waiting for emails.");
        Ok(())
    }

    /// One wait-detect-dispatch round.
    pub async fn cycle(&mut self) -> Result<(), MonitorError> {
        self.wait_for_arrival().await?;
        self.detect_and_dispatch().await
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.store.connect().await?;
        self.store.open_inbox_read_only().await
    }

    fn set_state(&mut self, state: MonitorState) {
        if self.mailbox.state != state {
            debug!(from = ?self.mailbox.state, to = ?state, "Monitor state change");
            self.mailbox.state = state;
        }
    }

    /// Idle until the change signal is raised, re-issuing the wait on every
    /// keep-alive tick and reconnecting whenever the store has dropped.
    async fn wait_for_arrival(&mut self) -> Result<(), MonitorError> {
        let keepalive = self.config.keepalive_interval;
        loop {
            // Detection needs a live session, even when the flag is up.
            if !self.store.is_connected() {
                self.reconnect().await?;
                continue;
            }
            if self.signal.is_raised() {
                return Ok(());
            }

            // Fresh cancel handle per wait; the wait is always joined before
            // the store is touched again.
            let cancel = IdleCancel::new();
            let signal = Arc::clone(&self.signal);
            let (result, keepalive_elapsed) = {
                let idle = self.store.wait_for_change(cancel.clone());
                tokio::pin!(idle);

                let wake = tokio::select! {
                    result = &mut idle => Wake::Finished(result),
                    _ = signal.raised() => Wake::Changed,
                    _ = tokio::time::sleep(keepalive) => Wake::Keepalive,
                };
                let keepalive_elapsed = matches!(wake, Wake::Keepalive);
                let result = match wake {
                    Wake::Finished(result) => result,
                    Wake::Changed | Wake::Keepalive => {
                        cancel.cancel();
                        idle.await
                    }
                };
                (result, keepalive_elapsed)
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_connection_lost() || !self.store.is_connected() => {
                    warn!(error = %e, "Mailbox connection lost while waiting for changes");
                    self.set_state(MonitorState::Disconnected);
                    continue;
                }
                Err(e) => return Err(MonitorError::Idle(e)),
            }

            if keepalive_elapsed && !self.signal.is_raised() {
                info!(
                    "No new emails detected. Sleeping for {} minutes.",
                    keepalive.as_secs() / 60
                );
            }
        }
    }

    /// Reconnect without touching the baseline. Mail that arrived while the
    /// connection was down raises the change signal.
    async fn reconnect(&mut self) -> Result<(), MonitorError> {
        self.set_state(MonitorState::Disconnected);
        let attempts = self.config.reconnect_attempts.max(1);
        let mut last = TransportError::NotConnected;

        for attempt in 1..=attempts {
            info!(attempt, attempts, "Reconnecting to mailbox");
            self.store.disconnect().await;
            match self.connect().await {
                Ok(()) => {
                    let count = self.store.message_count();
                    info!(count, baseline = self.mailbox.baseline, "Reconnected to mailbox");
                    if count > self.mailbox.baseline {
                        self.signal.raise();
                    }
                    self.set_state(MonitorState::Idle);
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    last = e;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.reconnect_delay).await;
            }
        }

        Err(MonitorError::ReconnectExhausted { attempts, last })
    }

    /// Fetch `[baseline, count)` and schedule every message, then advance the
    /// baseline. Sends are never awaited here.
    async fn detect_and_dispatch(&mut self) -> Result<(), MonitorError> {
        self.set_state(MonitorState::ChangeDetected);
        self.signal.reset();

        let baseline = self.mailbox.baseline;
        let observed = self.store.message_count();

        if observed > baseline {
            info!(baseline, observed, "Detected {} new e-mails", observed - baseline);
            self.set_state(MonitorState::Dispatching);

            let summaries = self
                .store
                .fetch_summaries(baseline, observed)
                .await
                .map_err(MonitorError::Fetch)?;
            info!(batch = summaries.len(), "Dispatching replies");

            let mut batch = Vec::with_capacity(summaries.len());
            for summary in summaries {
                match self.store.get_message(summary.index).await {
                    Ok(message) => {
                        debug!(index = message.index, subject = %message.subject, "Queued for reply");
                        batch.push(message);
                    }
                    Err(TransportError::InvalidMessage(reason)) => {
                        warn!(index = summary.index, uid = ?summary.uid, %reason, "Unreadable message, no reply");
                    }
                    Err(e) => return Err(MonitorError::Fetch(e)),
                }
            }
            // Handles are dropped: reply tasks run detached.
            drop(self.scheduler.dispatch_batch(batch));
        } else if observed < baseline {
            info!(baseline, observed, "Messages removed from mailbox");
        }

        self.mailbox.baseline = observed;
        self.set_state(MonitorState::Idle);
        Ok(())
    }
}
