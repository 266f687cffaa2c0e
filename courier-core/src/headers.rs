//! Wire header vocabulary.
//!
//! Publisher and router must agree on these names; changing one side only
//! breaks routing, not just style.

use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;

/// Header map carried by every envelope.
pub type Headers = BTreeMap<String, String>;

/// Kind of the message (`COMMAND`, `QUERY`, `NOTIFICATION`, `EVENT`).
pub const MESSAGE_KIND: &str = "message-kind";
/// Simple type name of the payload.
pub const PAYLOAD_TYPE: &str = "payload-type-name";
/// RFC 3339 timestamp stamped by the sender.
pub const MESSAGE_TIMESTAMP: &str = "message-timestamp";
/// Identity of the sending service.
pub const MESSAGE_SOURCE: &str = "message-source";
/// Reply address, set by the transport for blocking calls.
pub const REPLY_TO: &str = "reply-to";
/// Correlation token linking a request to its reply.
pub const CORRELATION_ID: &str = "correlation-id";

/// Root-cause kind of the last failure, set on dead-lettered messages.
pub const EXCEPTION_ROOT_CAUSE: &str = "exception-root-cause";
/// Message of the last failure, set on dead-lettered messages.
pub const EXCEPTION_MESSAGE: &str = "exception-message";
/// When the message was dead-lettered.
pub const FAILED_AT: &str = "failed-at";

/// Current time in the format used by [`MESSAGE_TIMESTAMP`] and [`FAILED_AT`].
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Caller-supplied ambient values (trace ids, request ids, ...).
///
/// Only names listed in the publisher's pass-through configuration are copied
/// onto outgoing messages. A missing value is not an error; the header is
/// simply omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderContext {
    values: BTreeMap<String, String>,
}

impl HeaderContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Add a value (mutable version).
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Look up a value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Check if the context has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over all values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Build a context from the headers of an inbound message.
    ///
    /// Used by consumers that publish follow-up messages and want to keep the
    /// caller's trace identifiers flowing.
    pub fn from_headers<'a>(headers: &Headers, names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut ctx = Self::new();
        for name in names {
            if let Some(value) = headers.get(name) {
                ctx.insert(name, value.clone());
            }
        }
        ctx
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for HeaderContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = Self::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_headers_keeps_listed_names() {
        let mut headers = Headers::new();
        headers.insert("x-trace-id".into(), "abc".into());
        headers.insert("x-other".into(), "ignored".into());

        let ctx = HeaderContext::from_headers(&headers, ["x-trace-id", "x-missing"]);
        assert_eq!(ctx.get("x-trace-id"), Some("abc"));
        assert_eq!(ctx.get("x-other"), None);
        assert_eq!(ctx.iter().count(), 1);
    }

    #[test]
    fn test_timestamp_is_rfc3339_utc() {
        let ts = timestamp_now();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
