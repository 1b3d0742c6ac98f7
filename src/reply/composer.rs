//! Builds reply headers from an incoming message.

use crate::mail::{IncomingMessage, MailAddress};

/// Fixed sender identity for every reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub name: String,
    pub address: String,
}

impl SenderIdentity {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    pub fn to_address(&self) -> MailAddress {
        MailAddress::new(self.address.clone()).with_name(self.name.clone())
    }
}

/// A reply ready to send. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyDraft {
    pub to: Vec<MailAddress>,
    pub subject: String,
    /// Message-ID being answered, without angle brackets.
    pub in_reply_to: Option<String>,
    /// Original references followed by the original Message-ID.
    pub references: Vec<String>,
    pub from: SenderIdentity,
    pub body: String,
}

impl ReplyDraft {
    /// A draft without recipients can never be delivered.
    pub fn has_recipients(&self) -> bool {
        !self.to.is_empty()
    }
}

/// Compose the reply to `message` carrying `body` verbatim.
///
/// Recipients: Reply-To, else From, else Sender, else nobody.
pub fn compose_reply(message: &IncomingMessage, identity: &SenderIdentity, body: String) -> ReplyDraft {
    let to = if !message.reply_to.is_empty() {
        message.reply_to.clone()
    } else if !message.from.is_empty() {
        message.from.clone()
    } else {
        message.sender.iter().cloned().collect()
    };

    let (in_reply_to, references) = match &message.message_id {
        Some(id) => {
            let mut chain = message.references.clone();
            chain.push(id.clone());
            (Some(id.clone()), chain)
        }
        None => (None, Vec::new()),
    };

    ReplyDraft {
        to,
        subject: reply_subject(&message.subject),
        in_reply_to,
        references,
        from: identity.clone(),
        body,
    }
}

/// Prefix "Re: " unless the subject already starts with "Re:" in any case.
pub fn reply_subject(subject: &str) -> String {
    let already_reply = subject
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("re:"));
    if already_reply {
        subject.to_string()
    } else {
        format!("Re: {subject}")
    }
}
