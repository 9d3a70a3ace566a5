//! JSON-RPC 2.0 message codec for the MCP protocol.
//!
//! This module defines the four wire message shapes used by the Model Context
//! Protocol and converts them to and from bytes.
//!
//! # Message Types
//!
//! - **Request**: A message expecting a response (has `method` and `id`)
//! - **Notification**: A one-way message (has `method`, no `id`)
//! - **Response**: A successful reply to a request (has `result`)
//! - **Error**: A failed reply to a request (has `error`, `id` may be `null`)
//!
//! Classification is structural: the codec inspects which members are
//! present rather than trusting any tag.
//!
//! # MCP-Specific Constraints
//!
//! - Request IDs must be strings or integers (never `null`)
//! - Batches (JSON arrays) are not supported

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::error::CodecError;

/// The JSON-RPC version carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Encoded form of an internal error, used if serialisation ever fails.
const FALLBACK_INTERNAL_ERROR: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

/// A JSON-RPC 2.0 request ID.
///
/// Per the MCP specification, IDs must be strings or integers, never `null`.
/// IDs are echoed back verbatim in the matching response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// Numeric request ID above `i64::MAX`.
    Unsigned(u64),
    /// String request ID.
    String(String),
}

impl RequestId {
    /// Converts a raw JSON `id` member into a request ID.
    ///
    /// Returns `None` for `null`, floats, booleans and structured values.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Self::Number)
                .or_else(|| n.as_u64().map(Self::Unsigned)),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Unsigned(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// A JSON-RPC 2.0 request message.
///
/// Requests expect a response from the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Unique request identifier.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Deserialises the request parameters into `T`.
    ///
    /// Returns `Ok(None)` when the request carries no parameters.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the parameters do not match `T`.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.params
            .as_ref()
            .filter(|p| !p.is_null())
            .map(|p| T::deserialize(p))
            .transpose()
    }
}

/// A JSON-RPC 2.0 notification message.
///
/// Notifications do not have an ID and never receive a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Creates a new notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// The request ID this response corresponds to.
    pub id: RequestId,

    /// The result of the method call.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self { id, result }
    }
}

/// Standard JSON-RPC 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received by the server.
    ParseError,
    /// The JSON sent is not a valid Request object.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// Server-defined error in the -32000..=-32099 range.
    ServerError(i32),
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError(code) => code,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ServerError(_) => "Server error",
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// The error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// Creates a new error from an error code.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.default_message().to_string(),
            data: None,
        }
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Adds additional data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A JSON-RPC 2.0 error response.
///
/// The `id` is serialised as `null` when it could not be determined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// The request ID this error corresponds to (if known).
    pub id: Option<RequestId>,

    /// The error details.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates a new error response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // JsonRpcErrorData contains String
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self { id, error }
    }

    /// Creates a parse error response (ID cannot be determined).
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, JsonRpcErrorData::from_code(ErrorCode::ParseError))
    }

    /// Creates an invalid request error response.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self::new(
            id,
            JsonRpcErrorData::with_message(ErrorCode::InvalidRequest, message),
        )
    }

    /// Creates a method not found error response.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(
                ErrorCode::MethodNotFound,
                format!("Method not found: {method}"),
            ),
        )
    }

    /// Creates an invalid params error response.
    #[must_use]
    pub fn invalid_params(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidParams, message),
        )
    }

    /// Creates an internal error response.
    #[must_use]
    pub fn internal_error(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InternalError, message),
        )
    }

    /// Creates the error sent for requests that arrive before `initialize`.
    #[must_use]
    pub fn not_initialised(id: RequestId) -> Self {
        Self::invalid_request(Some(id), "Server not initialised")
    }
}

/// Any JSON-RPC 2.0 message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A notification (no response expected).
    Notification(JsonRpcNotification),
    /// A successful response.
    Response(JsonRpcResponse),
    /// An error response.
    Error(JsonRpcError),
}

impl Message {
    /// Returns the method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) | Self::Error(_) => None,
        }
    }

    /// Returns the ID carried by the message, if any.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => Some(&resp.id),
            Self::Error(err) => err.id.as_ref(),
            Self::Notification(_) => None,
        }
    }
}

impl From<JsonRpcRequest> for Message {
    fn from(value: JsonRpcRequest) -> Self {
        Self::Request(value)
    }
}

impl From<JsonRpcNotification> for Message {
    fn from(value: JsonRpcNotification) -> Self {
        Self::Notification(value)
    }
}

impl From<JsonRpcResponse> for Message {
    fn from(value: JsonRpcResponse) -> Self {
        Self::Response(value)
    }
}

impl From<JsonRpcError> for Message {
    fn from(value: JsonRpcError) -> Self {
        Self::Error(value)
    }
}

/// Wire envelope adding the `jsonrpc` member to every outgoing message.
#[derive(Serialize)]
struct Envelope<'a> {
    jsonrpc: &'static str,
    #[serde(flatten)]
    message: &'a Message,
}

/// Serialises a message to its single-line JSON wire form.
///
/// The output never contains embedded newlines.
#[must_use]
pub fn encode(message: &Message) -> Vec<u8> {
    let envelope = Envelope {
        jsonrpc: JSONRPC_VERSION,
        message,
    };
    serde_json::to_vec(&envelope).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialise outgoing message");
        FALLBACK_INTERNAL_ERROR.as_bytes().to_vec()
    })
}

/// Parses one JSON document into a message.
///
/// # Errors
///
/// Returns [`CodecError::Parse`] if the bytes are not valid JSON, or
/// [`CodecError::InvalidMessage`] if the document matches no message shape.
pub fn decode(bytes: &[u8]) -> Result<Message, CodecError> {
    let value: Value = serde_json::from_slice(bytes)?;
    from_value(value)
}

/// Parses a JSON string into a message.
///
/// # Errors
///
/// See [`decode`].
pub fn parse_message(json: &str) -> Result<Message, CodecError> {
    decode(json.as_bytes())
}

/// Classifies an already-parsed JSON value into a message.
///
/// # Errors
///
/// Returns [`CodecError::InvalidMessage`] if the value matches no message
/// shape, or [`CodecError::MalformedReply`] if it looks like a response but
/// cannot be read as one.
pub fn from_value(value: Value) -> Result<Message, CodecError> {
    let mut obj = match value {
        Value::Object(obj) => obj,
        Value::Array(_) => return Err(CodecError::invalid(None, "batch requests are not supported")),
        _ => return Err(CodecError::invalid(None, "message must be a JSON object")),
    };

    // Responses are never answered, so their defects are reported separately.
    let is_reply =
        !obj.contains_key("method") && (obj.contains_key("result") || obj.contains_key("error"));
    let reject = |id: Option<RequestId>, reason: &str| {
        if is_reply {
            CodecError::malformed_reply(id, reason)
        } else {
            CodecError::invalid(id, reason)
        }
    };

    let raw_id = obj.remove("id");
    let id = match &raw_id {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            RequestId::from_value(v)
                .ok_or_else(|| reject(None, "id must be a string or an integer"))?,
        ),
    };

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(reject(id, "jsonrpc field must be \"2.0\""));
    }

    if let Some(method) = obj.remove("method") {
        let Value::String(method) = method else {
            return Err(CodecError::invalid(id, "method field must be a string"));
        };
        if method.is_empty() {
            return Err(CodecError::invalid(id, "method field cannot be empty"));
        }
        let params = obj.remove("params");

        return match (raw_id, id) {
            (None, _) => Ok(Message::Notification(JsonRpcNotification { method, params })),
            (Some(_), Some(id)) => Ok(Message::Request(JsonRpcRequest { id, method, params })),
            (Some(_), None) => Err(CodecError::invalid(None, "request id must not be null")),
        };
    }

    if let Some(result) = obj.remove("result") {
        let id = id.ok_or_else(|| reject(None, "response is missing its id"))?;
        return Ok(Message::Response(JsonRpcResponse { id, result }));
    }

    if let Some(error) = obj.remove("error") {
        let error: JsonRpcErrorData = serde_json::from_value(error)
            .map_err(|e| reject(id.clone(), &format!("malformed error object: {e}")))?;
        return Ok(Message::Error(JsonRpcError { id, error }));
    }

    Err(CodecError::invalid(
        id,
        "message is neither a request, notification nor response",
    ))
}
