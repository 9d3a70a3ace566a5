//! MCP payload types carried inside JSON-RPC `params` and `result` members.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::protocol::RequestId;

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires a predicate fn(&T) -> bool, so we must take &bool here
pub(crate) const fn is_false(b: &bool) -> bool {
    !*b
}

/// Server information for the initialisation response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Client information received during initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// A content item returned by tools and embedded in prompt messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Base64-encoded image content.
    Image {
        /// Base64 image data.
        data: String,
        /// Image MIME type.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource.
    Resource {
        /// The resource contents.
        resource: ResourceContents,
    },
}

impl Content {
    /// Creates a text content item.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<Content>,
    /// Whether the tool call resulted in an error.
    pub is_error: bool,
}

impl ToolCallResult {
    /// Creates a successful result from handler output.
    #[must_use]
    pub const fn success(content: Vec<Content>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
        }
    }
}

/// Contents of a resource, either text or base64 binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceContents {
    /// Textual resource contents.
    Text {
        /// URI of the resource.
        uri: String,
        /// MIME type of the text.
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// The text.
        text: String,
    },
    /// Binary resource contents.
    Blob {
        /// URI of the resource.
        uri: String,
        /// MIME type of the data.
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        /// Base64-encoded data.
        blob: String,
    },
}

impl ResourceContents {
    /// Creates plain-text contents.
    #[must_use]
    pub fn text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Text {
            uri: uri.into(),
            mime_type: Some("text/plain".to_string()),
            text: text.into(),
        }
    }

    /// Creates JSON contents from a value.
    #[must_use]
    pub fn json(uri: impl Into<String>, value: &Value) -> Self {
        Self::Text {
            uri: uri.into(),
            mime_type: Some("application/json".to_string()),
            text: value.to_string(),
        }
    }

    /// Returns the URI of the contents.
    #[must_use]
    pub fn uri(&self) -> &str {
        match self {
            Self::Text { uri, .. } | Self::Blob { uri, .. } => uri,
        }
    }
}

/// Parameters for resources/read request.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadResourceParams {
    /// URI of the resource to read.
    pub uri: String,
}

/// Result of resources/read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadResourceResult {
    /// Contents of the resource.
    pub contents: Vec<ResourceContents>,
}

/// The speaker of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human side of the conversation.
    User,
    /// The model side of the conversation.
    Assistant,
}

/// One message of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Who speaks the message.
    pub role: Role,
    /// Message content.
    pub content: Content,
}

impl PromptMessage {
    /// Creates a user message with text content.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::text(text),
        }
    }

    /// Creates an assistant message with text content.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::text(text),
        }
    }
}

/// An argument accepted by a prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument must be supplied.
    #[serde(default, skip_serializing_if = "is_false")]
    pub required: bool,
}

impl PromptArgument {
    /// Creates a required argument.
    #[must_use]
    pub fn required(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            required: true,
        }
    }

    /// Creates an optional argument.
    #[must_use]
    pub fn optional(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            required: false,
        }
    }
}

/// Parameters for prompts/get request.
#[derive(Debug, Clone, Deserialize)]
pub struct GetPromptParams {
    /// Name of the prompt.
    pub name: String,
    /// Template arguments.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Result of prompts/get.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GetPromptResult {
    /// Prompt description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Rendered messages.
    pub messages: Vec<PromptMessage>,
}

/// Severity of a log message sent to the client, following RFC 5424.
///
/// Variants are ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Normal but significant conditions.
    Notice,
    /// Warning conditions.
    Warning,
    /// Error conditions.
    Error,
    /// Critical conditions.
    Critical,
    /// Action must be taken immediately.
    Alert,
    /// System is unusable.
    Emergency,
}

/// Parameters for logging/setLevel request.
#[derive(Debug, Clone, Deserialize)]
pub struct SetLevelParams {
    /// Minimum level the client wants to receive.
    pub level: LogLevel,
}

/// Parameters of `notifications/cancelled`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    /// The request being cancelled.
    pub request_id: RequestId,
    /// Optional reason given by the client.
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_call_result_text() {
        let result = ToolCallResult::success(vec![Content::text("Hello, world!")]);
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.content[0], Content::text("Hello, world!"));
    }

    #[test]
    fn tool_call_result_error() {
        let result = ToolCallResult::error("Something went wrong");
        assert!(result.is_error);

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["isError"], json!(true));
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "Something went wrong");
    }

    #[test]
    fn is_error_always_serialised() {
        let value = serde_json::to_value(ToolCallResult::success(vec![])).unwrap();
        assert_eq!(value, json!({"content": [], "isError": false}));
    }

    #[test]
    fn image_content_uses_camel_case() {
        let content = Content::Image {
            data: "AAAA".into(),
            mime_type: "image/png".into(),
        };
        assert_eq!(
            serde_json::to_value(content).unwrap(),
            json!({"type": "image", "data": "AAAA", "mimeType": "image/png"})
        );
    }

    #[test]
    fn resource_contents_shapes() {
        let text = ResourceContents::text("note://1", "hi");
        assert_eq!(
            serde_json::to_value(&text).unwrap(),
            json!({"uri": "note://1", "mimeType": "text/plain", "text": "hi"})
        );

        let blob: ResourceContents =
            serde_json::from_value(json!({"uri": "bin://x", "blob": "AQID"})).unwrap();
        assert_eq!(blob.uri(), "bin://x");
        assert!(matches!(blob, ResourceContents::Blob { .. }));
    }

    #[test]
    fn log_levels_are_ordered() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert!(LogLevel::Alert < LogLevel::Emergency);

        let params: SetLevelParams = serde_json::from_value(json!({"level": "warning"})).unwrap();
        assert_eq!(params.level, LogLevel::Warning);
        assert!(serde_json::from_value::<SetLevelParams>(json!({"level": "loud"})).is_err());
    }

    #[test]
    fn prompt_argument_omits_false_required() {
        let arg = PromptArgument::optional("tone", "Writing tone");
        let value = serde_json::to_value(arg).unwrap();
        assert!(value.get("required").is_none());
    }

    #[test]
    fn parse_initialize_params() {
        let params: InitializeParams = serde_json::from_value(json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {"roots": {}},
            "clientInfo": {"name": "inspector", "version": "0.9"}
        }))
        .unwrap();
        assert_eq!(params.protocol_version, "2025-06-18");
        assert_eq!(params.client_info.unwrap().name, "inspector");
    }
}
