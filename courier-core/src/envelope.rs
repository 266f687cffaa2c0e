//! The unit exchanged over a transport.

use crate::{
    error::RouteError,
    headers::{self, Headers},
    kind::MessageKind,
};

/// Header map plus opaque body bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    headers: Headers,
    body: Vec<u8>,
}

impl Envelope {
    /// Create an envelope from headers and body.
    pub fn new(headers: Headers, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Set a header, replacing any previous value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header (mutable version).
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Get all headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get the body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Split into headers and body.
    pub fn into_parts(self) -> (Headers, Vec<u8>) {
        (self.headers, self.body)
    }

    /// Get a header that must be present and non-empty.
    pub fn require(&self, name: &'static str) -> Result<&str, RouteError> {
        match self.header(name) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(RouteError::MissingHeader(name)),
        }
    }

    /// The message kind header, parsed.
    pub fn kind(&self) -> Result<MessageKind, RouteError> {
        let raw = self.require(headers::MESSAGE_KIND)?;
        raw.parse().map_err(|_| RouteError::InvalidHeader {
            name: headers::MESSAGE_KIND,
            value: raw.to_string(),
        })
    }

    /// The payload type name header.
    pub fn payload_type(&self) -> Result<&str, RouteError> {
        self.require(headers::PAYLOAD_TYPE)
    }

    /// The reply address, if the sender is waiting for one.
    pub fn reply_to(&self) -> Option<&str> {
        self.header(headers::REPLY_TO).filter(|v| !v.is_empty())
    }

    /// The correlation id, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.header(headers::CORRELATION_ID).filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_rejects_blank_values() {
        let env = Envelope::default().with_header(headers::MESSAGE_KIND, "  ");
        assert!(matches!(
            env.kind(),
            Err(RouteError::MissingHeader(headers::MESSAGE_KIND))
        ));
    }

    #[test]
    fn test_kind_parses_header() {
        let env = Envelope::default().with_header(headers::MESSAGE_KIND, "QUERY");
        assert_eq!(env.kind().unwrap(), MessageKind::Query);
    }

    #[test]
    fn test_invalid_kind_is_reported_with_value() {
        let env = Envelope::default().with_header(headers::MESSAGE_KIND, "SHOUT");
        match env.kind() {
            Err(RouteError::InvalidHeader { name, value }) => {
                assert_eq!(name, headers::MESSAGE_KIND);
                assert_eq!(value, "SHOUT");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_empty_reply_to_is_absent() {
        let env = Envelope::default().with_header(headers::REPLY_TO, "");
        assert_eq!(env.reply_to(), None);
    }
}
