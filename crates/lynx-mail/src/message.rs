//! Decoded mail message

use crate::error::Result;

/// A fetched message, reduced to its header block
///
/// Headers keep their wire order. Repeated headers (e.g. `Received`) are all
/// retained; lookups return the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    headers: Vec<(String, String)>,
}

impl Message {
    pub fn new(headers: Vec<(String, String)>) -> Self {
        Self { headers }
    }

    /// Parse the header block of a raw RFC 822 message
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let (headers, _) = mailparse::parse_headers(raw)?;
        Ok(Self {
            headers: headers
                .iter()
                .map(|h| (h.get_key(), h.get_value()))
                .collect(),
        })
    }

    /// First value of header `name`, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }

    pub fn from(&self) -> Option<&str> {
        self.header("From")
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}
