//! Protocol-message decoding and encoding for HTTP bodies.
//!
//! Every `POST /mcp` body is decoded into a [`ProtocolMessage`] exactly once. The
//! message is immutable afterwards; the session transport only reads it. This
//! module owns all the `serde_json` work on the envelope so that the router and
//! transport can stay focused on session lifecycle.

use crate::types::{
    ErrorData, ErrorResponse, InitializeRequestParams, RequestId, Response, INVALID_REQUEST,
    JSONRPC_VERSION, PARSE_ERROR,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "schema-validation")]
pub(crate) mod validator {
    use crate::types::{ErrorData, INVALID_PARAMS};
    use serde_json::Value;
    use tracing::warn;

    /// Validates tool arguments against the tool's declared input schema.
    pub(crate) fn validate_arguments(
        tool_name: &str,
        schema: &Value,
        arguments: &Value,
    ) -> Result<(), ErrorData> {
        let validator = match jsonschema::validator_for(schema) {
            Ok(validator) => validator,
            Err(e) => {
                // A broken schema is a server bug; do not block the call over it.
                warn!(tool_name, error = %e, "Tool input schema does not compile, skipping validation");
                return Ok(());
            }
        };
        validator.validate(arguments).map_err(|e| {
            ErrorData::new(
                INVALID_PARAMS,
                format!("Invalid arguments for tool '{}': {}", tool_name, e),
            )
        })
    }
}

/// Wire shape shared by every JSON-RPC message; used only for decoding.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    /// A call that expects a correlated response.
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    /// A one-way message from the client.
    Notification { method: String, params: Value },
    /// The client's answer to a request the server pushed over the stream.
    Response { id: Option<RequestId> },
}

impl ProtocolMessage {
    /// Decodes a raw HTTP body.
    pub fn decode(body: &[u8]) -> Result<Self, ErrorData> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ErrorData::new(PARSE_ERROR, format!("Parse error: {}", e)))?;
        Self::from_value(value)
    }

    /// Classifies an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ErrorData> {
        if value.is_array() {
            return Err(ErrorData::new(
                INVALID_REQUEST,
                "Batched JSON-RPC messages are not supported",
            ));
        }
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| ErrorData::new(INVALID_REQUEST, format!("Invalid JSON-RPC message: {}", e)))?;

        if envelope.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            return Err(ErrorData::new(
                INVALID_REQUEST,
                "Invalid JSON-RPC message: jsonrpc must be \"2.0\"",
            ));
        }

        let params = envelope.params.unwrap_or(Value::Null);
        match (envelope.method, envelope.id) {
            (Some(method), Some(id)) => Ok(ProtocolMessage::Request { id, method, params }),
            (Some(method), None) => Ok(ProtocolMessage::Notification { method, params }),
            (None, id) if envelope.result.is_some() || envelope.error.is_some() => {
                Ok(ProtocolMessage::Response { id })
            }
            (None, _) => Err(ErrorData::new(
                INVALID_REQUEST,
                "Invalid JSON-RPC message: missing method",
            )),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            ProtocolMessage::Request { method, .. } | ProtocolMessage::Notification { method, .. } => {
                Some(method)
            }
            ProtocolMessage::Response { .. } => None,
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            ProtocolMessage::Request { id, .. } => Some(id),
            ProtocolMessage::Response { id } => id.as_ref(),
            ProtocolMessage::Notification { .. } => None,
        }
    }

    /// True for a well-formed `initialize` request: one that carries an id and
    /// parameters the handshake can actually use.
    pub fn is_initialize_request(&self) -> bool {
        match self {
            ProtocolMessage::Request { method, params, .. } if method == "initialize" => {
                InitializeRequestParams::deserialize(params).is_ok()
            }
            _ => false,
        }
    }
}

/// The body of a JSON-RPC reply produced by a session transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Success(Response<Value>),
    Error(ErrorResponse),
}

impl Reply {
    pub fn success(id: RequestId, result: Value) -> Self {
        Reply::Success(Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        })
    }

    pub fn error(id: Option<RequestId>, error: ErrorData) -> Self {
        Reply::Error(ErrorResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }
}
