//! Response codec.
//!
//! Converts between a handler's outcome, the [`ResponseEnvelope`] wire form and
//! the typed result a caller expects. All functions are pure.

use courier_core::{ExceptionInfo, HandlerError, Message, PublishError, ResponseEnvelope, RpcError};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Wrap a handler outcome.
///
/// A failure becomes an exception carrying the root-cause kind and message
/// with `origin_service`; a success carries the value.
pub fn encode(outcome: Result<Value, HandlerError>, origin_service: &str) -> ResponseEnvelope {
    match outcome {
        Ok(value) => ResponseEnvelope::success(value, origin_service),
        Err(err) => ResponseEnvelope::failure(ExceptionInfo::from_handler_error(&err, origin_service)),
    }
}

/// Unwrap a response into the caller's expected type.
///
/// An exception becomes [`RpcError::Remote`]; a value that does not fit `T`
/// becomes [`RpcError::Decode`].
pub fn decode<T: DeserializeOwned>(response: ResponseEnvelope) -> Result<T, RpcError> {
    let value = response.into_result().map_err(|info| RpcError::Remote(info.into()))?;
    serde_json::from_value(value).map_err(RpcError::Decode)
}

/// Serialize a response to body bytes.
pub fn to_bytes(response: &ResponseEnvelope) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(response).map_err(PublishError::Encode)
}

/// Parse a response from body bytes.
pub fn from_bytes(body: &[u8]) -> Result<ResponseEnvelope, RpcError> {
    serde_json::from_slice(body).map_err(RpcError::Decode)
}

/// Serialize an outbound payload to body bytes.
pub fn encode_payload<P: Message>(payload: &P) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(payload).map_err(PublishError::Encode)
}
