//! In-memory mail server
//!
//! Implements [`MailConnector`] against a shared account table and inbox.
//! Used by tests and offline runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lynx_core::Credentials;

use crate::connector::{MailConnector, Mailbox};
use crate::error::{MailError, Result};

#[derive(Default)]
struct ServerState {
    accounts: HashMap<String, String>,
    inbox: Vec<StoredMessage>,
    logins: usize,
    open_sessions: usize,
    unreachable: bool,
    fail_fetch_of: Option<u32>,
}

struct StoredMessage {
    raw: Vec<u8>,
    seen: bool,
}

/// Shared handle to an in-memory mail server
#[derive(Clone, Default)]
pub struct InMemoryMailServer {
    state: Arc<Mutex<ServerState>>,
}

impl InMemoryMailServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&self, email: impl Into<String>, secret: impl Into<String>) {
        self.lock().accounts.insert(email.into(), secret.into());
    }

    /// Append a message to the inbox; returns its sequence number
    pub fn deliver(&self, raw: impl Into<Vec<u8>>, seen: bool) -> u32 {
        let mut state = self.lock();
        state.inbox.push(StoredMessage {
            raw: raw.into(),
            seen,
        });
        state.inbox.len() as u32
    }

    /// Successful logins so far
    pub fn logins(&self) -> usize {
        self.lock().logins
    }

    /// Sessions logged in and not yet logged out or dropped
    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Make fetching message `seq` fail with a protocol error
    pub fn fail_fetch_of(&self, seq: Option<u32>) {
        self.lock().fail_fetch_of = seq;
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MailConnector for InMemoryMailServer {
    fn open(&self, credentials: &Credentials) -> Result<Box<dyn Mailbox>> {
        let mut state = self.lock();
        if state.unreachable {
            return Err(MailError::Connection("server unreachable".to_string()));
        }
        match state.accounts.get(credentials.email()) {
            Some(secret) if secret == credentials.secret() => {}
            _ => {
                return Err(MailError::Authentication(
                    "[AUTHENTICATIONFAILED] Invalid credentials".to_string(),
                ))
            }
        }
        state.logins += 1;
        state.open_sessions += 1;

        Ok(Box::new(InMemoryMailbox {
            server: self.clone(),
            selected: false,
            logged_out: false,
        }))
    }
}

struct InMemoryMailbox {
    server: InMemoryMailServer,
    selected: bool,
    logged_out: bool,
}

impl InMemoryMailbox {
    fn require_selected(&self) -> Result<()> {
        if self.logged_out {
            return Err(MailError::Protocol("session logged out".to_string()));
        }
        if !self.selected {
            return Err(MailError::Protocol("no mailbox selected".to_string()));
        }
        Ok(())
    }
}

impl Mailbox for InMemoryMailbox {
    fn select_inbox(&mut self) -> Result<()> {
        if self.logged_out {
            return Err(MailError::Protocol("session logged out".to_string()));
        }
        self.selected = true;
        Ok(())
    }

    fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        self.require_selected()?;
        let state = self.server.lock();
        let keep: fn(&StoredMessage) -> bool = match query.to_ascii_uppercase().as_str() {
            "ALL" => |_: &StoredMessage| true,
            "SEEN" => |m: &StoredMessage| m.seen,
            "UNSEEN" => |m: &StoredMessage| !m.seen,
            other => return Err(MailError::Protocol(format!("unsupported search '{}'", other))),
        };
        Ok(state
            .inbox
            .iter()
            .enumerate()
            .filter(|(_, m)| keep(m))
            .map(|(i, _)| i as u32 + 1)
            .collect())
    }

    fn fetch_raw(&mut self, seq: u32) -> Result<Option<Vec<u8>>> {
        self.require_selected()?;
        let state = self.server.lock();
        if state.fail_fetch_of == Some(seq) {
            return Err(MailError::Protocol(format!("fetch of {} failed", seq)));
        }
        Ok(seq
            .checked_sub(1)
            .and_then(|i| state.inbox.get(i as usize))
            .map(|m| m.raw.clone()))
    }

    fn logout(&mut self) -> Result<()> {
        if !self.logged_out {
            self.logged_out = true;
            let mut state = self.server.lock();
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
        Ok(())
    }
}

impl Drop for InMemoryMailbox {
    fn drop(&mut self) {
        if !self.logged_out {
            let mut state = self.server.lock();
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
    }
}
