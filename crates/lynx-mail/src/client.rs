//! Mail-account session

use std::collections::VecDeque;

use lynx_core::Credentials;
use tracing::{debug, error, info};

use crate::connector::{MailConnector, Mailbox};
use crate::error::Result;
use crate::message::Message;

/// Search used when listing the inbox
pub const DEFAULT_SEARCH_QUERY: &str = "SEEN";

/// Owns one mail account's credentials and validity
///
/// No connection is held between calls: every check or fetch opens a fresh
/// session through the connector.
pub struct MailClient<C: MailConnector> {
    connector: C,
    search_query: String,
    credentials: Option<Credentials>,
    valid: bool,
}

impl<C: MailConnector> MailClient<C> {
    pub fn new(connector: C) -> Self {
        Self::with_search_query(connector, DEFAULT_SEARCH_QUERY)
    }

    pub fn with_search_query(connector: C, search_query: impl Into<String>) -> Self {
        Self {
            connector,
            search_query: search_query.into(),
            credentials: None,
            valid: false,
        }
    }

    /// Try to log in with `credentials`
    ///
    /// Every failure, whether a rejected login or an unreachable server, is
    /// reported as `false`. On success the credentials are kept for later
    /// fetches and the session is closed straight away.
    pub fn check_credentials(&mut self, credentials: &Credentials) -> bool {
        let result = self.connector.open(credentials).and_then(|mut mailbox| mailbox.logout());

        match result {
            Ok(()) => {
                debug!("Successfully logged in");
                self.credentials = Some(credentials.clone());
                self.valid = true;
                true
            }
            Err(e) => {
                debug!("Login attempt was unsuccessful: {}", e);
                self.credentials = None;
                self.valid = false;
                false
            }
        }
    }

    pub fn has_valid_credentials(&self) -> bool {
        self.valid
    }

    /// Lazily fetch the inbox messages matching the search query
    ///
    /// Yields nothing unless a previous [`check_credentials`](Self::check_credentials)
    /// succeeded. Errors end the sequence early.
    pub fn fetch_unread(&mut self) -> UnreadMessages {
        let credentials = match (&self.credentials, self.valid) {
            (Some(credentials), true) => credentials,
            _ => {
                debug!("Fetch requested without valid credentials");
                return UnreadMessages::empty();
            }
        };

        match open_inbox(&self.connector, credentials, &self.search_query) {
            Ok((mailbox, pending)) => {
                info!("Found {} messages", pending.len());
                UnreadMessages {
                    mailbox: Some(mailbox),
                    pending,
                }
            }
            Err(e) => {
                error!("Could not list the inbox: {}", e);
                UnreadMessages::empty()
            }
        }
    }

    /// Forget credentials; idempotent
    pub fn reset(&mut self) {
        self.credentials = None;
        self.valid = false;
    }
}

fn open_inbox<C: MailConnector>(
    connector: &C,
    credentials: &Credentials,
    query: &str,
) -> Result<(Box<dyn Mailbox>, VecDeque<u32>)> {
    let mut mailbox = connector.open(credentials)?;
    mailbox.select_inbox()?;
    let seqs = mailbox.search(query)?;
    Ok((mailbox, seqs.into()))
}

/// One-shot sequence of fetched messages
///
/// Owns its own session. The session is logged out once the sequence is
/// exhausted and abandoned if a fetch fails.
pub struct UnreadMessages {
    mailbox: Option<Box<dyn Mailbox>>,
    pending: VecDeque<u32>,
}

impl UnreadMessages {
    fn empty() -> Self {
        Self {
            mailbox: None,
            pending: VecDeque::new(),
        }
    }

    fn finish(&mut self) {
        self.pending.clear();
        if let Some(mut mailbox) = self.mailbox.take() {
            if let Err(e) = mailbox.logout() {
                debug!("Logout after fetch failed: {}", e);
            }
        }
    }

    fn abort(&mut self, seq: u32, e: impl std::fmt::Display) {
        error!("Fetching message {} failed: {}", seq, e);
        self.pending.clear();
        self.mailbox = None;
    }
}

impl Iterator for UnreadMessages {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        loop {
            let Some(seq) = self.pending.pop_front() else {
                self.finish();
                return None;
            };
            let mailbox = self.mailbox.as_mut()?;

            let raw = match mailbox.fetch_raw(seq) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    self.abort(seq, e);
                    return None;
                }
            };

            match Message::parse(&raw) {
                Ok(message) => {
                    debug!("Fetched '{}' email", message.subject().unwrap_or_default());
                    return Some(message);
                }
                Err(e) => {
                    self.abort(seq, e);
                    return None;
                }
            }
        }
    }
}

impl Drop for UnreadMessages {
    fn drop(&mut self) {
        self.finish();
    }
}
