//! Reply delivery over SMTP via lettre.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::config::{MailboxOptions, SmtpSecurity};
use crate::error::TransportError;
use crate::mail::transport::MailSender;
use crate::mail::types::MailAddress;
use crate::reply::ReplyDraft;

const SEND_TIMEOUT: Duration = Duration::from_secs(60);

/// SMTP implementation of [`MailSender`].
///
/// No connection pool: each `send` dials, authenticates, delivers and quits.
pub struct SmtpMailSender {
    host: String,
    port: u16,
    security: SmtpSecurity,
    username: String,
    password: SecretString,
}

impl SmtpMailSender {
    pub fn new(options: &MailboxOptions) -> Self {
        Self {
            host: options.host.clone(),
            port: options.smtp_port,
            security: options.smtp_security,
            username: options.username.clone(),
            password: options.password.clone(),
        }
    }

    fn transport(&self) -> Result<SmtpTransport, TransportError> {
        let builder = match self.security {
            SmtpSecurity::Tls => SmtpTransport::relay(&self.host),
            SmtpSecurity::StartTls => SmtpTransport::starttls_relay(&self.host),
        }
        .map_err(|e| TransportError::Connect {
            host: self.host.clone(),
            port: self.port,
            reason: format!("SMTP relay error: {e}"),
        })?;

        let creds = Credentials::new(
            self.username.clone(),
            self.password.expose_secret().to_string(),
        );

        Ok(builder
            .port(self.port)
            .credentials(creds)
            .timeout(Some(SEND_TIMEOUT))
            .build())
    }
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, draft: &ReplyDraft) -> Result<(), TransportError> {
        let email = build_message(draft)?;
        let transport = self.transport()?;

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| TransportError::Disconnected(format!("SMTP task failed: {e}")))?
            .map_err(classify_smtp_error)?;

        debug!(host = %self.host, subject = %draft.subject, "SMTP delivery accepted");
        Ok(())
    }
}

/// Build the outgoing MIME message for a draft.
pub fn build_message(draft: &ReplyDraft) -> Result<Message, TransportError> {
    let identity = mailbox(&draft.from.to_address())?;

    let mut builder = Message::builder()
        .from(identity.clone())
        .sender(identity)
        .subject(draft.subject.clone());

    for recipient in &draft.to {
        builder = builder.to(mailbox(recipient)?);
    }
    if let Some(id) = &draft.in_reply_to {
        builder = builder.in_reply_to(format!("<{id}>"));
    }
    if !draft.references.is_empty() {
        let chain = draft
            .references
            .iter()
            .map(|id| format!("<{id}>"))
            .collect::<Vec<_>>()
            .join(" ");
        builder = builder.references(chain);
    }

    builder
        .header(ContentType::TEXT_PLAIN)
        .body(draft.body.clone())
        .map_err(|e| TransportError::InvalidMessage(format!("Failed to build email: {e}")))
}

fn mailbox(addr: &MailAddress) -> Result<Mailbox, TransportError> {
    let email = addr.address.parse::<lettre::Address>().map_err(|e| {
        TransportError::InvalidMessage(format!("Invalid address '{}': {e}", addr.address))
    })?;
    Ok(Mailbox::new(addr.name.clone(), email))
}

/// Map lettre failures onto the transport taxonomy.
///
/// Server replies (4xx/5xx) are command rejections; problems building the
/// request locally are not retryable; everything else means the session
/// dropped.
fn classify_smtp_error(e: lettre::transport::smtp::Error) -> TransportError {
    if e.is_transient() || e.is_permanent() {
        TransportError::Rejected(e.to_string())
    } else if e.is_client() {
        TransportError::InvalidMessage(e.to_string())
    } else {
        TransportError::Disconnected(e.to_string())
    }
}
