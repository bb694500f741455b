//! Mail server connectors

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use lynx_core::Credentials;
use native_tls::{TlsConnector, TlsStream};
use tracing::debug;

use crate::error::{MailError, Result};

/// Default IMAP host
pub const DEFAULT_HOST: &str = "imap.gmail.com";

/// IMAP over implicit TLS
pub const DEFAULT_PORT: u16 = 993;

/// Opens authenticated mailbox sessions
pub trait MailConnector: Send {
    /// Connect and log in
    ///
    /// A rejected login is [`MailError::Authentication`]; anything else that
    /// goes wrong before the server answers the login is a connection error.
    fn open(&self, credentials: &Credentials) -> Result<Box<dyn Mailbox>>;
}

/// An authenticated session
pub trait Mailbox: Send {
    fn select_inbox(&mut self) -> Result<()>;

    /// Sequence numbers matching `query`, ascending
    fn search(&mut self, query: &str) -> Result<Vec<u32>>;

    /// Full RFC 822 bytes of message `seq`, if the server returned a body
    fn fetch_raw(&mut self, seq: u32) -> Result<Option<Vec<u8>>>;

    fn logout(&mut self) -> Result<()>;
}

/// IMAP-over-TLS connector
#[derive(Debug, Clone)]
pub struct ImapConnector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl ImapConnector {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn connect_tls(&self) -> Result<TlsStream<TcpStream>> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| MailError::Connection(format!("resolving {}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| MailError::Connection(format!("no address for {}", self.host)))?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| MailError::Connection(format!("{}:{}: {}", self.host, self.port, e)))?;
        tcp.set_read_timeout(Some(self.timeout))?;
        tcp.set_write_timeout(Some(self.timeout))?;

        let tls = TlsConnector::new()?;
        tls.connect(&self.host, tcp)
            .map_err(|e| MailError::Connection(format!("TLS handshake failed: {}", e)))
    }
}

impl Default for ImapConnector {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT, Duration::from_secs(30))
    }
}

impl MailConnector for ImapConnector {
    fn open(&self, credentials: &Credentials) -> Result<Box<dyn Mailbox>> {
        debug!("Connecting to {}:{}", self.host, self.port);
        let stream = self.connect_tls()?;

        let mut client = imap::Client::new(stream);
        client.read_greeting()?;

        let session = client
            .login(credentials.email(), credentials.secret())
            .map_err(|(e, _)| MailError::Authentication(e.to_string()))?;

        Ok(Box::new(ImapMailbox { session }))
    }
}

struct ImapMailbox {
    session: imap::Session<TlsStream<TcpStream>>,
}

impl Mailbox for ImapMailbox {
    fn select_inbox(&mut self) -> Result<()> {
        self.session.select("INBOX")?;
        Ok(())
    }

    fn search(&mut self, query: &str) -> Result<Vec<u32>> {
        let mut seqs: Vec<u32> = self.session.search(query)?.into_iter().collect();
        seqs.sort_unstable();
        Ok(seqs)
    }

    fn fetch_raw(&mut self, seq: u32) -> Result<Option<Vec<u8>>> {
        let fetches = self.session.fetch(seq.to_string(), "RFC822")?;
        Ok(fetches.iter().find_map(|f| f.body()).map(|b| b.to_vec()))
    }

    fn logout(&mut self) -> Result<()> {
        self.session.logout()?;
        Ok(())
    }
}
