//! Mail transport: the watched IMAP mailbox and the SMTP reply path.

pub mod imap;
pub mod smtp;
pub mod transport;
pub mod types;

pub use imap::ImapMailStore;
pub use smtp::SmtpMailSender;
pub use transport::{CountChanged, IdleCancel, MailSender, MailStore};
pub use types::{IncomingMessage, MailAddress, MessageSummary, parse_message};
