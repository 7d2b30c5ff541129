//! Channel events

use bytes::Bytes;
use std::collections::HashMap;

/// An immutable event carried by a channel: an opaque body plus string
/// headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    body: Bytes,
    headers: HashMap<String, String>,
}

impl Event {
    /// Create an event from a body and headers
    pub fn new(body: impl Into<Bytes>, headers: HashMap<String, String>) -> Self {
        Self {
            body: body.into(),
            headers,
        }
    }

    /// Create an event without headers
    pub fn with_body(body: impl Into<Bytes>) -> Self {
        Self::new(body, HashMap::new())
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Raw body
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, invalid sequences replaced
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// All headers
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// One header by name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}
