//! Reply construction: headers from the source message, body from templates.

pub mod composer;
pub mod generator;

pub use composer::{ReplyDraft, SenderIdentity, compose_reply};
pub use generator::{ReplyGenerator, ReplyTemplates};
