//! IMAP mailbox over implicit TLS.
//!
//! Raw IMAP4rev1 on a blocking rustls stream. Each command runs inside
//! `spawn_blocking`; the session is moved into the blocking task and handed
//! back afterwards, so the async side never touches the socket directly.
//! IDLE follows RFC 2177: the command is re-issued by the caller once the
//! idle timeout elapses.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use crate::config::MailboxOptions;
use crate::error::TransportError;
use crate::mail::transport::{CountChanged, IdleCancel, MailStore};
use crate::mail::types::{IncomingMessage, MessageSummary, parse_message};

/// Read timeout for ordinary commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout while idling; bounds how quickly a cancel is noticed.
const IDLE_POLL: Duration = Duration::from_secs(1);

static EXISTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\* (\d+) EXISTS").expect("valid regex"));
static EXPUNGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\* (\d+) EXPUNGE").expect("valid regex"));
static FETCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\* (\d+) FETCH \(").expect("valid regex"));
static UID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUID (\d+)").expect("valid regex"));

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Byte stream an IMAP session runs over.
trait ImapStream: Read + Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;
}

impl ImapStream for TlsStream {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.sock.set_read_timeout(timeout)
    }
}

/// Message count shared between the store and the blocking IO thread.
#[derive(Clone, Default)]
struct CountTracker {
    count: Arc<AtomicU32>,
    callback: Option<CountChanged>,
}

impl CountTracker {
    fn set(&self, count: u32, notify: bool) -> bool {
        let previous = self.count.swap(count, Ordering::AcqRel);
        let changed = previous != count;
        if changed
            && notify
            && let Some(callback) = &self.callback
        {
            callback(count);
        }
        changed
    }

    fn get(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }
}

/// One response line, with any literals it carried.
#[derive(Debug, Default)]
struct Line {
    text: String,
    literals: Vec<Vec<u8>>,
}

/// Authenticated IMAP session.
struct Session<S> {
    stream: S,
    next_tag: u32,
}

impl<S: ImapStream> Session<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            next_tag: 0,
        }
    }

    fn tag(&mut self) -> String {
        self.next_tag += 1;
        format!("A{}", self.next_tag)
    }

    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;
        Ok(())
    }

    /// Read one byte. `Ok(None)` means the read timed out.
    fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte) {
            Ok(0) => Err(TransportError::Disconnected(
                "IMAP connection closed".into(),
            )),
            Ok(_) => Ok(Some(byte[0])),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => self.read_byte(),
            Err(e) => Err(e.into()),
        }
    }

    /// Read one CRLF-terminated chunk into `buf`.
    ///
    /// With an `interrupt`, a timeout before the first byte returns
    /// `Ok(false)` once the interrupt reports true. Without one, timeouts are
    /// errors.
    fn read_crlf(
        &mut self,
        buf: &mut Vec<u8>,
        interrupt: Option<&dyn Fn() -> bool>,
    ) -> Result<bool, TransportError> {
        let start = buf.len();
        loop {
            match self.read_byte()? {
                Some(b) => {
                    buf.push(b);
                    if buf.ends_with(b"\r\n") {
                        return Ok(true);
                    }
                }
                None => match interrupt {
                    Some(stop) if buf.len() == start => {
                        if stop() {
                            return Ok(false);
                        }
                    }
                    Some(_) => {}
                    None => {
                        return Err(TransportError::Disconnected(
                            "IMAP read timed out".into(),
                        ));
                    }
                },
            }
        }
    }

    fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            match self.read_byte()? {
                Some(b) => out.push(b),
                None => {
                    return Err(TransportError::Disconnected(
                        "IMAP read timed out inside literal".into(),
                    ));
                }
            }
        }
        Ok(out)
    }

    /// Read one logical response line, collecting `{n}` literals.
    fn read_line(
        &mut self,
        interrupt: Option<&dyn Fn() -> bool>,
    ) -> Result<Option<Line>, TransportError> {
        let mut raw = Vec::new();
        if !self.read_crlf(&mut raw, interrupt)? {
            return Ok(None);
        }
        let mut line = Line::default();
        loop {
            let chunk = String::from_utf8_lossy(&raw).into_owned();
            raw.clear();
            let literal = literal_size(&chunk);
            line.text.push_str(chunk.trim_end_matches("\r\n"));
            let Some(len) = literal else {
                return Ok(Some(line));
            };
            line.literals.push(self.read_exact_bytes(len)?);
            self.read_crlf(&mut raw, None)?;
        }
    }

    /// Apply an untagged response to the tracked count. Returns true when the
    /// count changed.
    fn handle_untagged(&self, line: &Line, tracker: &CountTracker, notify: bool) -> bool {
        if let Some(n) = capture_number(&EXISTS_RE, &line.text) {
            return tracker.set(n, notify);
        }
        if capture_number(&EXPUNGE_RE, &line.text).is_some() {
            return tracker.set(tracker.get().saturating_sub(1), notify);
        }
        if line.text.to_ascii_uppercase().starts_with("* BYE") {
            debug!(response = %line.text, "IMAP server said goodbye");
        }
        false
    }

    /// Run one tagged command and collect its untagged responses.
    fn command(
        &mut self,
        cmd: &str,
        tracker: &CountTracker,
        notify: bool,
    ) -> Result<Vec<Line>, TransportError> {
        let tag = self.tag();
        self.write_line(&format!("{tag} {cmd}"))?;
        self.collect_until_tagged(&tag, tracker, notify)
    }

    fn collect_until_tagged(
        &mut self,
        tag: &str,
        tracker: &CountTracker,
        notify: bool,
    ) -> Result<Vec<Line>, TransportError> {
        let mut untagged = Vec::new();
        loop {
            let Some(line) = self.read_line(None)? else {
                continue;
            };
            if let Some(rest) = strip_tag(&line.text, tag) {
                check_status(rest)?;
                return Ok(untagged);
            }
            self.handle_untagged(&line, tracker, notify);
            untagged.push(line);
        }
    }

    fn login(&mut self, username: &str, password: &str) -> Result<(), TransportError> {
        let tag = self.tag();
        self.write_line(&format!(
            "{tag} LOGIN {} {}",
            quote(username),
            quote(password)
        ))?;
        match self.collect_until_tagged(&tag, &CountTracker::default(), false) {
            Ok(_) => Ok(()),
            Err(TransportError::Rejected(reason)) => Err(TransportError::AuthFailed(reason)),
            Err(e) => Err(e),
        }
    }

    fn examine_inbox(&mut self, tracker: &CountTracker) -> Result<(), TransportError> {
        self.command("EXAMINE INBOX", tracker, false).map(|_| ())
    }

    /// IDLE until the count changes, `cancel` fires, or `timeout` elapses.
    fn idle(
        &mut self,
        tracker: &CountTracker,
        cancel: &IdleCancel,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let tag = self.tag();
        self.write_line(&format!("{tag} IDLE"))?;

        let mut changed = false;
        loop {
            let Some(line) = self.read_line(None)? else {
                continue;
            };
            if line.text.starts_with('+') {
                break;
            }
            if let Some(rest) = strip_tag(&line.text, &tag) {
                // Completed without ever idling.
                return check_status(rest);
            }
            changed |= self.handle_untagged(&line, tracker, true);
        }

        self.stream.set_read_timeout(Some(IDLE_POLL))?;
        let result = self.idle_until_stopped(&tag, tracker, cancel, timeout, changed);
        if let Err(e) = self.stream.set_read_timeout(Some(COMMAND_TIMEOUT)) {
            debug!(error = %e, "Failed to restore IMAP read timeout");
        }
        result
    }

    fn idle_until_stopped(
        &mut self,
        tag: &str,
        tracker: &CountTracker,
        cancel: &IdleCancel,
        timeout: Duration,
        mut changed: bool,
    ) -> Result<(), TransportError> {
        let deadline = Instant::now() + timeout;
        let stop = || cancel.is_cancelled() || Instant::now() >= deadline;

        while !changed && !stop() {
            let Some(line) = self.read_line(Some(&stop))? else {
                break;
            };
            if let Some(rest) = strip_tag(&line.text, tag) {
                // Server ended IDLE on its own.
                return check_status(rest);
            }
            changed = self.handle_untagged(&line, tracker, true);
        }

        self.write_line("DONE")?;
        let done_deadline = Instant::now() + COMMAND_TIMEOUT;
        let overdue = || Instant::now() >= done_deadline;
        loop {
            let Some(line) = self.read_line(Some(&overdue))? else {
                return Err(TransportError::Disconnected(
                    "no response to IDLE DONE".into(),
                ));
            };
            if let Some(rest) = strip_tag(&line.text, tag) {
                return check_status(rest);
            }
            self.handle_untagged(&line, tracker, true);
        }
    }

    fn fetch_summaries(
        &mut self,
        start: u32,
        end: u32,
        tracker: &CountTracker,
    ) -> Result<Vec<MessageSummary>, TransportError> {
        if start >= end {
            return Ok(Vec::new());
        }
        let lines = self.command(&format!("FETCH {}:{} (UID)", start + 1, end), tracker, true)?;
        let mut summaries: Vec<MessageSummary> = lines
            .iter()
            .filter_map(|line| {
                let seq = capture_number(&FETCH_RE, &line.text)?;
                let index = seq.checked_sub(1)?;
                (start..end).contains(&index).then(|| MessageSummary {
                    index,
                    uid: capture_number(&UID_RE, &line.text),
                })
            })
            .collect();
        summaries.sort_by_key(|s| s.index);
        summaries.dedup_by_key(|s| s.index);
        Ok(summaries)
    }

    fn fetch_message(
        &mut self,
        index: u32,
        tracker: &CountTracker,
    ) -> Result<IncomingMessage, TransportError> {
        let seq = index + 1;
        let lines = self.command(&format!("FETCH {seq} BODY.PEEK[]"), tracker, true)?;
        let raw = lines
            .into_iter()
            .filter(|line| capture_number(&FETCH_RE, &line.text) == Some(seq))
            .find_map(|line| line.literals.into_iter().next())
            .ok_or_else(|| {
                TransportError::Protocol(format!("server returned no body for message {seq}"))
            })?;
        parse_message(index, &raw)
    }

    fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT", &CountTracker::default(), false) {
            debug!(error = %e, "IMAP logout did not complete cleanly");
        }
    }
}

/// Open a TLS connection, read the greeting, and log in.
fn open_session(
    host: &str,
    port: u16,
    username: &str,
    password: &SecretString,
) -> Result<Session<TlsStream>, TransportError> {
    let connect_err = |reason: String| TransportError::Connect {
        host: host.to_string(),
        port,
        reason,
    };

    let tcp = TcpStream::connect((host, port)).map_err(|e| connect_err(e.to_string()))?;
    tcp.set_read_timeout(Some(COMMAND_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| connect_err(format!("invalid server name: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| connect_err(format!("TLS setup failed: {e}")))?;

    let mut session = Session::new(rustls::StreamOwned::new(conn, tcp));

    let greeting = session
        .read_line(None)?
        .ok_or_else(|| connect_err("no greeting".into()))?;
    if !greeting.text.to_ascii_uppercase().starts_with("* OK") {
        return Err(connect_err(format!("unexpected greeting: {}", greeting.text)));
    }

    session.login(username, password.expose_secret())?;
    Ok(session)
}

/// IMAP implementation of [`MailStore`].
pub struct ImapMailStore {
    host: String,
    port: u16,
    username: String,
    password: SecretString,
    idle_timeout: Duration,
    session: Option<Session<TlsStream>>,
    tracker: CountTracker,
}

impl ImapMailStore {
    pub fn new(options: &MailboxOptions, idle_timeout: Duration) -> Self {
        Self {
            host: options.host.clone(),
            port: options.imap_port,
            username: options.username.clone(),
            password: options.password.clone(),
            idle_timeout,
            session: None,
            tracker: CountTracker::default(),
        }
    }

    /// Run a blocking operation against the session on the blocking pool.
    ///
    /// The session is dropped when the operation reports a lost connection.
    async fn run<T, F>(&mut self, op: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session<TlsStream>, &CountTracker) -> Result<T, TransportError>
            + Send
            + 'static,
    {
        let mut session = self.session.take().ok_or(TransportError::NotConnected)?;
        let tracker = self.tracker.clone();
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut session, &tracker);
            (session, result)
        })
        .await
        .map_err(|e| TransportError::Disconnected(format!("IMAP task failed: {e}")))?;

        match &result {
            Err(e) if e.is_connection_lost() => {
                warn!(host = %self.host, error = %e, "IMAP connection lost");
            }
            _ => self.session = Some(session),
        }
        result
    }
}

#[async_trait]
impl MailStore for ImapMailStore {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.disconnect().await;

        let host = self.host.clone();
        let port = self.port;
        let username = self.username.clone();
        let password = self.password.clone();
        let session = tokio::task::spawn_blocking(move || {
            open_session(&host, port, &username, &password)
        })
        .await
        .map_err(|e| TransportError::Disconnected(format!("IMAP connect task failed: {e}")))??;

        debug!(host = %self.host, port = self.port, "IMAP session authenticated");
        self.session = Some(session);
        Ok(())
    }

    async fn open_inbox_read_only(&mut self) -> Result<(), TransportError> {
        self.run(|session, tracker| session.examine_inbox(tracker))
            .await
    }

    fn message_count(&self) -> u32 {
        self.tracker.get()
    }

    fn on_count_changed(&mut self, callback: CountChanged) {
        self.tracker.callback = Some(callback);
    }

    async fn wait_for_change(&mut self, cancel: IdleCancel) -> Result<(), TransportError> {
        let timeout = self.idle_timeout;
        self.run(move |session, tracker| session.idle(tracker, &cancel, timeout))
            .await
    }

    async fn fetch_summaries(
        &mut self,
        start: u32,
        end: u32,
    ) -> Result<Vec<MessageSummary>, TransportError> {
        self.run(move |session, tracker| session.fetch_summaries(start, end, tracker))
            .await
    }

    async fn get_message(&mut self, index: u32) -> Result<IncomingMessage, TransportError> {
        self.run(move |session, tracker| session.fetch_message(index, tracker))
            .await
    }

    async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            let _ = tokio::task::spawn_blocking(move || session.logout()).await;
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// IMAP quoted string.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Size of a literal announced at the end of a line (`... {123}\r\n`).
fn literal_size(chunk: &str) -> Option<usize> {
    let trimmed = chunk.trim_end_matches("\r\n");
    let body = trimmed.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].trim_end_matches('+').parse().ok()
}

fn strip_tag<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    text.strip_prefix(tag)?.strip_prefix(' ')
}

fn check_status(rest: &str) -> Result<(), TransportError> {
    let (status, _) = rest.split_once(' ').unwrap_or((rest, ""));
    if status.eq_ignore_ascii_case("OK") {
        Ok(())
    } else if status.eq_ignore_ascii_case("NO") || status.eq_ignore_ascii_case("BAD") {
        Err(TransportError::Rejected(rest.to_string()))
    } else {
        Err(TransportError::Protocol(format!(
            "unexpected tagged response: {rest}"
        )))
    }
}

fn capture_number(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)?.get(1)?.as_str().parse().ok()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Scripted server: `Some(bytes)` is served, `None` simulates a read
    /// timeout, and an empty script reads as a closed connection.
    struct ScriptedStream {
        script: VecDeque<Option<Vec<u8>>>,
        written: Vec<u8>,
    }

    impl ScriptedStream {
        fn new(script: Vec<Option<&str>>) -> Self {
            Self {
                script: script
                    .into_iter()
                    .map(|chunk| chunk.map(|s| s.as_bytes().to_vec()))
                    .collect(),
                written: Vec::new(),
            }
        }

        fn written(&self) -> String {
            String::from_utf8_lossy(&self.written).into_owned()
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.script.pop_front() {
                None => Ok(0),
                Some(None) => Err(io::Error::from(io::ErrorKind::WouldBlock)),
                Some(Some(mut bytes)) => {
                    let n = buf.len().min(bytes.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        self.script.push_front(Some(bytes.split_off(n)));
                    }
                    Ok(n)
                }
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ImapStream for ScriptedStream {
        fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    fn session(script: Vec<Option<&str>>) -> Session<ScriptedStream> {
        Session::new(ScriptedStream::new(script))
    }

    fn recording_tracker() -> (CountTracker, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tracker = CountTracker {
            count: Arc::new(AtomicU32::new(0)),
            callback: Some(Arc::new(move |n| sink.lock().unwrap().push(n))),
        };
        (tracker, seen)
    }

    #[test]
    fn quote_escapes_specials() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn literal_size_detection() {
        assert_eq!(literal_size("* 1 FETCH (BODY[] {342}\r\n"), Some(342));
        assert_eq!(literal_size("* 1 FETCH (UID 4)\r\n"), None);
        assert_eq!(literal_size("{12+}\r\n"), Some(12));
    }

    #[test]
    fn status_mapping() {
        assert!(check_status("OK done").is_ok());
        assert!(matches!(check_status("NO denied"), Err(TransportError::Rejected(_))));
        assert!(matches!(check_status("BAD syntax"), Err(TransportError::Rejected(_))));
        assert!(matches!(check_status("WHAT"), Err(TransportError::Protocol(_))));
    }

    #[test]
    fn examine_sets_count_without_callback() {
        let mut s = session(vec![Some(
            "* FLAGS (\\Seen)\r\n* 12 EXISTS\r\n* 0 RECENT\r\nA1 OK [READ-ONLY] done\r\n",
        )]);
        let (tracker, seen) = recording_tracker();

        s.examine_inbox(&tracker).unwrap();

        assert_eq!(tracker.get(), 12);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(s.stream.written(), "A1 EXAMINE INBOX\r\n");
    }

    #[test]
    fn login_rejection_is_auth_failure() {
        let mut s = session(vec![Some("A1 NO [AUTHENTICATIONFAILED] nope\r\n")]);
        let err = s.login("me", "secret").unwrap_err();
        assert!(matches!(err, TransportError::AuthFailed(_)));
    }

    #[test]
    fn idle_returns_on_new_mail() {
        let mut s = session(vec![
            Some("+ idling\r\n"),
            None,
            Some("* 13 EXISTS\r\n"),
            Some("A1 OK IDLE terminated\r\n"),
        ]);
        let (tracker, seen) = recording_tracker();
        tracker.set(12, false);

        s.idle(&tracker, &IdleCancel::new(), Duration::from_secs(60))
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![13]);
        assert_eq!(s.stream.written(), "A1 IDLE\r\nDONE\r\n");
    }

    #[test]
    fn idle_stops_when_cancelled() {
        let mut s = session(vec![
            Some("+ idling\r\n"),
            None,
            Some("A1 OK IDLE terminated\r\n"),
        ]);
        let (tracker, seen) = recording_tracker();
        let cancel = IdleCancel::new();
        cancel.cancel();

        s.idle(&tracker, &cancel, Duration::from_secs(60)).unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert!(s.stream.written().ends_with("DONE\r\n"));
    }

    #[test]
    fn idle_connection_drop_is_reported() {
        let mut s = session(vec![Some("+ idling\r\n")]);
        let (tracker, _) = recording_tracker();

        let err = s
            .idle(&tracker, &IdleCancel::new(), Duration::from_secs(60))
            .unwrap_err();

        assert!(err.is_connection_lost());
    }

    #[test]
    fn fetch_summaries_maps_to_zero_based_indices() {
        let mut s = session(vec![Some(
            "* 5 FETCH (UID 105)\r\n* 4 FETCH (UID 104)\r\nA1 OK FETCH completed\r\n",
        )]);
        let (tracker, _) = recording_tracker();

        let summaries = s.fetch_summaries(3, 5, &tracker).unwrap();

        assert_eq!(s.stream.written(), "A1 FETCH 4:5 (UID)\r\n");
        assert_eq!(
            summaries,
            vec![
                MessageSummary { index: 3, uid: Some(104) },
                MessageSummary { index: 4, uid: Some(105) },
            ]
        );
    }

    #[test]
    fn empty_range_sends_nothing() {
        let mut s = session(vec![]);
        let (tracker, _) = recording_tracker();
        assert!(s.fetch_summaries(7, 7, &tracker).unwrap().is_empty());
        assert!(s.stream.written().is_empty());
    }

    #[test]
    fn fetch_message_reads_literal() {
        let raw = "From: a@example.com\r\nSubject: Hi\r\n\r\nHello there\r\n";
        let header = format!("* 2 FETCH (BODY[] {{{}}}\r\n", raw.len());
        let mut s = session(vec![
            Some(header.as_str()),
            Some(raw),
            Some(")\r\n"),
            Some("A1 OK FETCH completed\r\n"),
        ]);
        let (tracker, _) = recording_tracker();

        let msg = s.fetch_message(1, &tracker).unwrap();

        assert_eq!(msg.index, 1);
        assert_eq!(msg.subject, "Hi");
        assert!(msg.text_body.unwrap().contains("Hello there"));
    }
}
