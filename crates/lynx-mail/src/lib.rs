//! Lynx Mail - Mail-account client
//!
//! Validates mail-account credentials and produces a lazy, one-shot sequence
//! of inbox messages. The wire protocol sits behind the [`MailConnector`]
//! trait so the client can run against IMAP or an in-memory server.

pub mod client;
pub mod connector;
pub mod error;
pub mod memory;
pub mod message;

pub use client::{MailClient, UnreadMessages, DEFAULT_SEARCH_QUERY};
pub use connector::{ImapConnector, MailConnector, Mailbox, DEFAULT_HOST, DEFAULT_PORT};
pub use error::{MailError, Result};
pub use memory::InMemoryMailServer;
pub use message::Message;
