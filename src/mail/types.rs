//! Message types and RFC 5322 parsing via mail_parser.

use std::fmt;

use mail_parser::{HeaderValue, MessageParser, PartType};

use crate::error::TransportError;

/// A mailbox address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAddress {
    pub name: Option<String>,
    pub address: String,
}

impl MailAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            name: None,
            address: address.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for MailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} <{}>", self.address),
            None => f.write_str(&self.address),
        }
    }
}

/// Position of a message in the mailbox, as returned by a range fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSummary {
    /// 0-based sequence index.
    pub index: u32,
    pub uid: Option<u32>,
}

/// A fetched message. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    /// 0-based sequence index in the mailbox.
    pub index: u32,
    pub subject: String,
    pub reply_to: Vec<MailAddress>,
    pub from: Vec<MailAddress>,
    pub sender: Option<MailAddress>,
    /// Message-ID without angle brackets.
    pub message_id: Option<String>,
    /// References chain without angle brackets, oldest first.
    pub references: Vec<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
}

/// Parse raw message bytes into an [`IncomingMessage`].
pub fn parse_message(index: u32, raw: &[u8]) -> Result<IncomingMessage, TransportError> {
    let parsed = MessageParser::default().parse(raw).ok_or_else(|| {
        TransportError::InvalidMessage(format!("message {index} could not be parsed"))
    })?;

    let text_body = parsed
        .text_body
        .iter()
        .filter_map(|id| parsed.part(*id))
        .find_map(|part| match &part.body {
            PartType::Text(text) => Some(text.to_string()),
            _ => None,
        });

    let html_body = parsed
        .html_body
        .iter()
        .filter_map(|id| parsed.part(*id))
        .find_map(|part| match &part.body {
            PartType::Html(html) => Some(html.to_string()),
            _ => None,
        });

    Ok(IncomingMessage {
        index,
        subject: parsed.subject().unwrap_or_default().to_string(),
        reply_to: extract_addresses(parsed.reply_to()),
        from: extract_addresses(parsed.from()),
        sender: extract_addresses(parsed.sender()).into_iter().next(),
        message_id: parsed
            .message_id()
            .map(strip_angle_brackets)
            .filter(|id| !id.is_empty()),
        references: header_ids(parsed.references()),
        text_body,
        html_body,
    })
}

/// Flatten a mail_parser address header into plain addresses.
///
/// Entries without an address part are dropped; groups are flattened.
pub fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<MailAddress> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    let convert = |a: &mail_parser::Addr| {
        a.address.as_ref().map(|address| MailAddress {
            name: a
                .name
                .as_ref()
                .map(|n| n.to_string())
                .filter(|n| !n.trim().is_empty()),
            address: address.to_string(),
        })
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs.iter().filter_map(convert).collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| g.addresses.iter().filter_map(convert))
            .collect(),
    }
}

fn header_ids(value: &HeaderValue) -> Vec<String> {
    let ids: Vec<String> = match value {
        HeaderValue::Text(id) => vec![strip_angle_brackets(id)],
        HeaderValue::TextList(ids) => ids.iter().map(|id| strip_angle_brackets(id)).collect(),
        _ => Vec::new(),
    };
    ids.into_iter().filter(|id| !id.is_empty()).collect()
}

fn strip_angle_brackets(id: &str) -> String {
    id.trim()
        .trim_start_matches('<')
        .trim_end_matches('>')
        .to_string()
}
