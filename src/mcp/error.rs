//! Error types for the MCP engine.
//!
//! Codec errors become protocol-level error responses. Feature errors are
//! the closed set of failures a tool, resource or prompt handler may report;
//! the server decides how each kind surfaces on the wire.

use thiserror::Error;

use crate::mcp::protocol::{ErrorCode, JsonRpcError, JsonRpcErrorData, RequestId};

/// A message that could not be decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The bytes are not valid JSON.
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// The JSON document matches none of the JSON-RPC message shapes.
    #[error("invalid JSON-RPC message: {reason}")]
    InvalidMessage {
        /// ID of the offending message, if it could be read.
        id: Option<RequestId>,
        /// Why the message was rejected.
        reason: String,
    },

    /// The JSON document is shaped like a response but cannot be read as one.
    #[error("malformed JSON-RPC response: {reason}")]
    MalformedReply {
        /// ID of the offending response, if it could be read.
        id: Option<RequestId>,
        /// Why the response was rejected.
        reason: String,
    },
}

impl CodecError {
    pub(crate) fn invalid(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self::InvalidMessage {
            id,
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed_reply(id: Option<RequestId>, reason: impl Into<String>) -> Self {
        Self::MalformedReply {
            id,
            reason: reason.into(),
        }
    }

    /// Converts this error into the error response sent to the peer.
    ///
    /// Invalid JSON yields a Parse Error with a `null` id; a malformed
    /// message yields an Invalid Request correlated to its id when known.
    /// A malformed response yields nothing: responses are never answered.
    #[must_use]
    pub fn to_error_response(&self) -> Option<JsonRpcError> {
        match self {
            Self::Parse(_) => Some(JsonRpcError::parse_error()),
            Self::InvalidMessage { id, reason } => Some(JsonRpcError::new(
                id.clone(),
                JsonRpcErrorData::with_message(
                    ErrorCode::InvalidRequest,
                    format!("Invalid Request: {reason}"),
                ),
            )),
            Self::MalformedReply { .. } => None,
        }
    }
}

/// Failures a tool handler may report.
///
/// These are reported in-band: the `tools/call` response succeeds with
/// `isError: true` so the caller can correct itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// The arguments were missing or malformed.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran but could not complete.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The tool refused the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Something the tool needed does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The tool gave up waiting on a dependency.
    #[error("Timed out: {0}")]
    Timeout(String),
}

/// Failures a resource handler may report.
///
/// These surface as Internal Error responses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    /// No data exists behind the URI.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The URI was understood but is not acceptable.
    #[error("Invalid resource URI: {0}")]
    InvalidUri(String),

    /// The backing store refused access.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Reading the backing data failed.
    #[error("Read failed: {0}")]
    ReadFailed(String),
}

/// Failures a prompt handler may report.
///
/// These surface as Internal Error responses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    /// An argument value was rejected.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Rendering the prompt failed.
    #[error("Render failed: {0}")]
    RenderFailed(String),

    /// Something the prompt needed does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failure_has_null_id() {
        let err = CodecError::from(serde_json::from_str::<serde_json::Value>("{").unwrap_err());
        let response = err.to_error_response().unwrap();
        assert!(response.id.is_none());
        assert_eq!(response.error.code, -32700);
        assert_eq!(response.error.message, "Parse error");
    }

    #[test]
    fn invalid_message_keeps_id() {
        let err = CodecError::invalid(Some(RequestId::Number(5)), "no method");
        let response = err.to_error_response().unwrap();
        assert_eq!(response.id, Some(RequestId::Number(5)));
        assert_eq!(response.error.code, -32600);
        assert!(response.error.message.contains("no method"));
    }

    #[test]
    fn feature_error_display() {
        assert_eq!(
            ToolError::InvalidArguments("missing 'message'".into()).to_string(),
            "Invalid arguments: missing 'message'"
        );
        assert_eq!(
            ResourceError::NotFound("engine://nope".into()).to_string(),
            "Resource not found: engine://nope"
        );
        assert!(PromptError::RenderFailed("boom".into())
            .to_string()
            .contains("boom"));
    }
}
