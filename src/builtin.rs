//! Built-in demonstration features.
//!
//! The binary registers these unless `features.builtins` is disabled:
//!
//! | Kind     | Key                   | Behaviour                              |
//! |----------|-----------------------|----------------------------------------|
//! | Tool     | `echo`                | Returns its `message` argument         |
//! | Resource | `engine://server-info`| Server name, version, protocol versions |
//! | Prompt   | `summarise`           | Asks the model to summarise `text`     |

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::mcp::error::{PromptError, ToolError};
use crate::mcp::registry::{CallContext, PromptDescriptor, ResourceDescriptor, ToolDescriptor};
use crate::mcp::server::McpServer;
use crate::mcp::types::{Content, PromptArgument, PromptMessage, ResourceContents};

/// URI of the server information resource.
pub const SERVER_INFO_URI: &str = "engine://server-info";

/// Registers every built-in feature on `server`.
pub fn register_builtins(server: &mut McpServer) {
    server.register_tool(echo_tool());
    server.register_resource(server_info_resource(server));
    server.register_prompt(summarise_prompt());
    tracing::debug!("Built-in features registered");
}

/// The `echo` tool.
#[must_use]
pub fn echo_tool() -> ToolDescriptor {
    ToolDescriptor::from_fn("echo", echo)
        .with_title("Echo")
        .with_description("Returns the given message unchanged")
        .with_input_schema(json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Text to echo back"
                }
            },
            "required": ["message"]
        }))
}

fn echo(_ctx: &CallContext<'_>, arguments: Option<&Value>) -> Result<Vec<Content>, ToolError> {
    let message = arguments
        .and_then(|args| args.get("message"))
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments("'message' must be a string".to_string()))?;

    Ok(vec![Content::text(message)])
}

/// The `engine://server-info` resource, describing `server`.
#[must_use]
pub fn server_info_resource(server: &McpServer) -> ResourceDescriptor {
    let options = server.options();
    let info = json!({
        "name": options.server_info.name,
        "version": options.server_info.version,
        "protocolVersions": options.supported_versions,
    });

    ResourceDescriptor::from_fn(SERVER_INFO_URI, "server-info", move |_ctx, _request| {
        Ok(vec![ResourceContents::json(SERVER_INFO_URI, &info)])
    })
    .with_description("Name, version and supported protocol versions of this server")
    .with_mime_type("application/json")
}

/// The `summarise` prompt.
#[must_use]
pub fn summarise_prompt() -> PromptDescriptor {
    PromptDescriptor::from_fn("summarise", summarise)
        .with_description("Summarise a piece of text")
        .with_argument(PromptArgument::required("text", "Text to summarise"))
        .with_argument(PromptArgument::optional(
            "style",
            "Desired style, e.g. 'bullet points'",
        ))
}

fn summarise(
    _ctx: &CallContext<'_>,
    arguments: &BTreeMap<String, String>,
) -> Result<Vec<PromptMessage>, PromptError> {
    let text = arguments.get("text").map_or("", String::as_str);
    let instruction = match arguments.get("style") {
        Some(style) => format!("Summarise the following text as {style}:"),
        None => "Summarise the following text:".to_string(),
    };

    Ok(vec![PromptMessage::user(format!("{instruction}\n\n{text}"))])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::RequestId;
    use crate::mcp::registry::Features;

    fn ctx_id() -> RequestId {
        RequestId::Number(1)
    }

    #[test]
    fn echo_returns_message() {
        let id = ctx_id();
        let ctx = CallContext::new(&id, None);
        let out = echo_tool()
            .call(&ctx, Some(&json!({"message": "hello"})))
            .unwrap();
        assert_eq!(out, vec![Content::text("hello")]);
    }

    #[test]
    fn echo_requires_message() {
        let id = ctx_id();
        let ctx = CallContext::new(&id, None);
        let err = echo_tool().call(&ctx, Some(&json!({"message": 5}))).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(echo_tool().call(&ctx, None).is_err());
    }

    #[test]
    fn server_info_reports_identity() {
        let server = McpServer::default();
        let mut features = Features::default();
        features.resources.register(server_info_resource(&server));

        let id = ctx_id();
        let ctx = CallContext::new(&id, None);
        let contents = features.read_resource(&ctx, SERVER_INFO_URI).unwrap().unwrap();
        let ResourceContents::Text { text, mime_type, .. } = &contents[0] else {
            panic!("Expected text contents");
        };
        assert_eq!(mime_type.as_deref(), Some("application/json"));

        let value: Value = serde_json::from_str(text).unwrap();
        assert_eq!(value["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(value["protocolVersions"][0], crate::mcp::LATEST_PROTOCOL_VERSION);
    }

    #[test]
    fn summarise_requires_text() {
        let prompt = summarise_prompt();
        assert_eq!(prompt.missing_arguments(&BTreeMap::new()), vec!["text"]);

        let id = ctx_id();
        let ctx = CallContext::new(&id, None);
        let mut args = BTreeMap::new();
        args.insert("text".to_string(), "Rust is fast.".to_string());
        args.insert("style".to_string(), "one sentence".to_string());

        let messages = prompt.get(&ctx, &args).unwrap();
        assert_eq!(
            messages,
            vec![PromptMessage::user(
                "Summarise the following text as one sentence:\n\nRust is fast."
            )]
        );
    }

    #[test]
    fn register_builtins_populates_all_registries() {
        let mut server = McpServer::default();
        register_builtins(&mut server);
        let caps = server.capabilities();
        assert!(caps.tools.is_some());
        assert!(caps.resources.is_some());
        assert!(caps.prompts.is_some());
    }
}
