//! Autoreply: watches an IMAP inbox and answers new mail with delayed,
//! templated replies built around key phrases of the original message.

pub mod analysis;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod mail;
pub mod monitor;
pub mod reply;
pub mod text;

pub use error::{Error, Result};
