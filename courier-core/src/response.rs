//! Handler outcomes and their wire form.

use crate::{error::RemoteProcessError, message::simple_type_name};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{borrow::Cow, fmt};

/// A handler failure, reduced to what can cross a process boundary.
///
/// Built explicitly with [`HandlerError::new`], or from any
/// `std::error::Error` via `?`. The conversion takes both the kind (the simple
/// type name) and the message from the converted error itself, so the pair
/// always describes one error. To report a deeper cause, convert that error or
/// name it with [`HandlerError::new`].
///
/// This type deliberately does not implement `std::error::Error`, so the
/// blanket conversion can exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    kind: Cow<'static, str>,
    message: String,
}

impl HandlerError {
    /// Create an error with an explicit root-cause kind.
    pub fn new(kind: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The root-cause kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The root-cause message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self {
            kind: Cow::Borrowed(simple_type_name::<E>()),
            message: err.to_string(),
        }
    }
}

/// Trait for converting a handler's return value into a reply.
///
/// # Default Implementations
///
/// - `()` → `null`
/// - `Result<T, E>` → the serialized `T`, or `E` converted into a [`HandlerError`]
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not an `IntoReply`",
    label = "handlers must return `()` or `Result<T, E>`",
    note = "`T` must be `Serialize` and `E` must convert into `HandlerError`."
)]
pub trait IntoReply {
    /// Convert the output into a reply value or a failure.
    fn into_reply(self) -> Result<Value, HandlerError>;
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Value, HandlerError> {
        Ok(Value::Null)
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: Serialize,
    E: Into<HandlerError>,
{
    fn into_reply(self) -> Result<Value, HandlerError> {
        match self {
            Ok(value) => serde_json::to_value(value).map_err(HandlerError::from),
            Err(e) => Err(e.into()),
        }
    }
}

/// A failure in transportable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionInfo {
    /// The root-cause message.
    pub message: String,
    /// The root-cause kind.
    pub root_cause_kind: String,
    /// The service where the failure happened.
    pub origin_service: String,
}

impl ExceptionInfo {
    /// Capture a handler failure.
    pub fn from_handler_error(err: &HandlerError, origin_service: impl Into<String>) -> Self {
        Self {
            message: err.message().to_string(),
            root_cause_kind: err.kind().to_string(),
            origin_service: origin_service.into(),
        }
    }
}

impl From<ExceptionInfo> for RemoteProcessError {
    fn from(info: ExceptionInfo) -> Self {
        RemoteProcessError {
            message: info.message,
            root_cause_kind: info.root_cause_kind,
            origin_service: info.origin_service,
        }
    }
}

/// The tagged outcome of one handler invocation.
///
/// Holds either a value or an exception, never both. The fields are private so
/// that only the constructors can build one, and decoding a wire form that
/// populates both is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireResponse")]
pub struct ResponseEnvelope {
    value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    exception: Option<ExceptionInfo>,
    origin_service: String,
}

impl ResponseEnvelope {
    /// A successful outcome.
    pub fn success(value: Value, origin_service: impl Into<String>) -> Self {
        Self {
            value,
            exception: None,
            origin_service: origin_service.into(),
        }
    }

    /// A failed outcome.
    pub fn failure(exception: ExceptionInfo) -> Self {
        Self {
            value: Value::Null,
            origin_service: exception.origin_service.clone(),
            exception: Some(exception),
        }
    }

    /// Whether the handler failed.
    pub fn has_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// The returned value (`null` on failure).
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// The failure, if any.
    pub fn exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    /// The service that produced this outcome.
    pub fn origin_service(&self) -> &str {
        &self.origin_service
    }

    /// Convert into the value or the failure.
    pub fn into_result(self) -> Result<Value, ExceptionInfo> {
        match self.exception {
            Some(exception) => Err(exception),
            None => Ok(self.value),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    value: Value,
    #[serde(default)]
    exception: Option<ExceptionInfo>,
    #[serde(default)]
    origin_service: String,
}

impl TryFrom<WireResponse> for ResponseEnvelope {
    type Error = String;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        match wire.exception {
            Some(_) if !wire.value.is_null() => {
                Err("response carries both a value and an exception".to_string())
            }
            exception => Ok(Self {
                value: wire.value,
                exception,
                origin_service: wire.origin_service,
            }),
        }
    }
}
