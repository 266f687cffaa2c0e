//! Message kinds.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// The closed set of message kinds.
///
/// The kind selects the dispatch-table partition a handler lives in and
/// decides whether the sender expects a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// A request to change state; answered with a reply.
    Command,
    /// A request to read state; answered with a reply.
    Query,
    /// A fire-and-forget notice addressed to interested services.
    Notification,
    /// A fire-and-forget fact about something that already happened.
    Event,
}

impl MessageKind {
    /// All kinds, in declaration order.
    pub const ALL: [MessageKind; 4] = [
        MessageKind::Command,
        MessageKind::Query,
        MessageKind::Notification,
        MessageKind::Event,
    ];

    /// The header value for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::Command => "COMMAND",
            MessageKind::Query => "QUERY",
            MessageKind::Notification => "NOTIFICATION",
            MessageKind::Event => "EVENT",
        }
    }

    /// Whether messages of this kind are answered when a reply-to is present.
    ///
    /// Notifications and events never produce a reply.
    pub const fn expects_reply(self) -> bool {
        matches!(self, MessageKind::Command | MessageKind::Query)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a header value does not name a [`MessageKind`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown message kind: {0:?}")]
pub struct UnknownKindError(pub String);

impl FromStr for MessageKind {
    type Err = UnknownKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownKindError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("COMMAND".parse::<MessageKind>().unwrap(), MessageKind::Command);
        assert_eq!("query".parse::<MessageKind>().unwrap(), MessageKind::Query);
        assert_eq!(" Event ".parse::<MessageKind>().unwrap(), MessageKind::Event);
    }

    #[test]
    fn test_parse_unknown() {
        let err = "BROADCAST".parse::<MessageKind>().unwrap_err();
        assert_eq!(err, UnknownKindError("BROADCAST".into()));
    }

    #[test]
    fn test_only_requests_expect_replies() {
        assert!(MessageKind::Command.expects_reply());
        assert!(MessageKind::Query.expects_reply());
        assert!(!MessageKind::Notification.expects_reply());
        assert!(!MessageKind::Event.expects_reply());
    }

    #[test]
    fn test_serde_uses_header_spelling() {
        let json = serde_json::to_string(&MessageKind::Notification).unwrap();
        assert_eq!(json, "\"NOTIFICATION\"");
    }
}
