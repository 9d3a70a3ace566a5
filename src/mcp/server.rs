//! MCP server engine.
//!
//! This module implements the MCP server lifecycle:
//!
//! 1. **Initialisation**: Capability negotiation and version agreement
//! 2. **Operation**: Routing requests to tools, resources and prompts
//! 3. **Shutdown**: End-of-stream or an explicit signal stops the loop
//!
//! # Dispatch Model
//!
//! One loop owns the transport and processes exactly one message to
//! completion before reading the next, so responses leave in the order
//! requests arrived. Handlers run synchronously on the loop; there is no
//! timeout, and `notifications/cancelled` is only logged. A handler that
//! never returns stalls the connection.
//!
//! Messages the server originates (list-change notifications, log
//! messages, server-to-client requests) are queued and flushed between
//! message cycles, never in the middle of one.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::mcp::capabilities::{
    negotiate_version, CapabilityOptions, PeerInfo, ServerCapabilities, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::protocol::{
    self, ErrorCode, JsonRpcError, JsonRpcErrorData, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, Message, RequestId,
};
use crate::mcp::registry::{
    catch_panic, CallContext, Features, PromptDescriptor, ResourceDescriptor,
    ResourceTemplateDescriptor, ToolDescriptor,
};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    CancelledParams, ClientInfo, GetPromptParams, GetPromptResult, InitializeParams, LogLevel,
    ReadResourceParams, ReadResourceResult, ServerInfo, SetLevelParams, ToolCallParams,
    ToolCallResult,
};

/// Pause after a failed read before waiting for the next message.
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    Uninitialised,
    /// Initialize answered, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Ready,
    /// Shutdown in progress.
    ShuttingDown,
    /// The dispatch loop has exited.
    Stopped,
}

/// Static settings of a server instance.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Identity reported in the initialize response.
    pub server_info: ServerInfo,
    /// Usage hints for the client, sent in the initialize response.
    pub instructions: Option<String>,
    /// Supported protocol versions, newest first.
    pub supported_versions: Vec<String>,
    /// Whether `notifications/message` may be sent and `logging` is advertised.
    pub client_logging: bool,
    /// Whether registry changes after initialisation are announced.
    pub notify_list_changed: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            server_info: ServerInfo::default(),
            instructions: None,
            supported_versions: SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            client_logging: true,
            notify_list_changed: true,
        }
    }
}

/// Callback invoked with the peer's answer to a server-initiated request.
pub type ReplyCallback = Box<dyn FnOnce(Result<Value, JsonRpcErrorData>) + Send>;

/// A request this server sent to its peer that is still unanswered.
struct PendingRequest {
    method: String,
    issued_at: Instant,
    on_reply: ReplyCallback,
}

/// The MCP server engine.
pub struct McpServer {
    /// Current server state.
    state: ServerState,
    /// Static settings.
    options: ServerOptions,
    /// Registered tools, resources and prompts.
    features: Features,
    /// What the client declared during initialisation.
    peer: Option<PeerInfo>,
    /// Minimum level of log messages forwarded to the client.
    log_level: LogLevel,
    /// Last ID used for a server-initiated request.
    last_request_id: i64,
    /// Server-initiated requests awaiting a reply, keyed by ID.
    pending: HashMap<i64, PendingRequest>,
    /// Messages waiting to be flushed between message cycles.
    outbox: VecDeque<Message>,
}

impl Default for McpServer {
    fn default() -> Self {
        Self::new(ServerOptions::default())
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("features", &self.features)
            .field("pending", &self.pending.len())
            .field("outbox", &self.outbox.len())
            .finish_non_exhaustive()
    }
}

impl McpServer {
    /// Creates a new MCP server with no registered features.
    #[must_use]
    pub fn new(options: ServerOptions) -> Self {
        Self {
            state: ServerState::Uninitialised,
            options,
            features: Features::default(),
            peer: None,
            log_level: LogLevel::Info,
            last_request_id: 0,
            pending: HashMap::new(),
            outbox: VecDeque::new(),
        }
    }

    /// Returns the current server state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Returns what the client declared during initialisation.
    #[must_use]
    pub const fn peer(&self) -> Option<&PeerInfo> {
        self.peer.as_ref()
    }

    /// Returns the static settings.
    #[must_use]
    pub const fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Returns the registered features.
    #[must_use]
    pub const fn features(&self) -> &Features {
        &self.features
    }

    /// Returns the minimum level of log messages forwarded to the client.
    #[must_use]
    pub const fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Returns the capabilities currently advertised.
    #[must_use]
    pub fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities::compute(
            &self.features,
            CapabilityOptions {
                logging: self.options.client_logging,
                list_changed: self.options.notify_list_changed,
            },
        )
    }

    /// Number of server-initiated requests still awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    // ==================== Registration ====================

    /// Registers a tool, replacing any tool with the same name.
    pub fn register_tool(&mut self, tool: ToolDescriptor) {
        tracing::debug!(tool = %tool.name, "Registering tool");
        self.features.tools.register(tool);
        self.list_changed("tools");
    }

    /// Removes a tool. Returns `false` if it was not registered.
    pub fn unregister_tool(&mut self, name: &str) -> bool {
        let removed = self.features.tools.unregister(name).is_some();
        if removed {
            self.list_changed("tools");
        }
        removed
    }

    /// Registers a resource, replacing any resource with the same URI.
    pub fn register_resource(&mut self, resource: ResourceDescriptor) {
        tracing::debug!(uri = %resource.uri, "Registering resource");
        self.features.resources.register(resource);
        self.list_changed("resources");
    }

    /// Removes a resource. Returns `false` if it was not registered.
    pub fn unregister_resource(&mut self, uri: &str) -> bool {
        let removed = self.features.resources.unregister(uri).is_some();
        if removed {
            self.list_changed("resources");
        }
        removed
    }

    /// Registers a resource template, replacing any with the same template string.
    pub fn register_resource_template(&mut self, template: ResourceTemplateDescriptor) {
        tracing::debug!(uri_template = %template.uri_template, "Registering resource template");
        self.features.templates.register(template);
        self.list_changed("resources");
    }

    /// Removes a resource template. Returns `false` if it was not registered.
    pub fn unregister_resource_template(&mut self, uri_template: &str) -> bool {
        let removed = self.features.templates.unregister(uri_template).is_some();
        if removed {
            self.list_changed("resources");
        }
        removed
    }

    /// Registers a prompt, replacing any prompt with the same name.
    pub fn register_prompt(&mut self, prompt: PromptDescriptor) {
        tracing::debug!(prompt = %prompt.name, "Registering prompt");
        self.features.prompts.register(prompt);
        self.list_changed("prompts");
    }

    /// Removes a prompt. Returns `false` if it was not registered.
    pub fn unregister_prompt(&mut self, name: &str) -> bool {
        let removed = self.features.prompts.unregister(name).is_some();
        if removed {
            self.list_changed("prompts");
        }
        removed
    }

    /// Queues a list-change notification once the client is listening.
    fn list_changed(&mut self, kind: &str) {
        if self.options.notify_list_changed && self.state == ServerState::Ready {
            self.notify(format!("notifications/{kind}/list_changed"), None);
        }
    }

    // ==================== Outbound Messages ====================

    /// Queues a notification for the client.
    pub fn notify(&mut self, method: impl Into<String>, params: Option<Value>) {
        self.outbox
            .push_back(JsonRpcNotification::new(method, params).into());
    }

    /// Queues a log message for the client.
    ///
    /// Returns `false` if the message was filtered out by the client's
    /// level, by configuration, or because the session is not established.
    pub fn log_message(&mut self, level: LogLevel, logger: Option<&str>, data: Value) -> bool {
        let established = matches!(self.state, ServerState::Initialising | ServerState::Ready);
        if !self.options.client_logging || !established || level < self.log_level {
            return false;
        }

        let mut params = json!({"level": level, "data": data});
        if let Some(logger) = logger {
            params["logger"] = Value::String(logger.to_string());
        }
        self.notify("notifications/message", Some(params));
        true
    }

    /// Queues a request to the client and records it as pending.
    ///
    /// `on_reply` runs when the matching response or error arrives. It is
    /// dropped without being called if the connection ends first.
    pub fn send_request<F>(
        &mut self,
        method: impl Into<String>,
        params: Option<Value>,
        on_reply: F,
    ) -> RequestId
    where
        F: FnOnce(Result<Value, JsonRpcErrorData>) + Send + 'static,
    {
        self.last_request_id += 1;
        let id = self.last_request_id;
        let method = method.into();

        tracing::debug!(id, method = %method, "Sending request to client");
        self.pending.insert(
            id,
            PendingRequest {
                method: method.clone(),
                issued_at: Instant::now(),
                on_reply: Box::new(on_reply),
            },
        );
        self.outbox
            .push_back(JsonRpcRequest::new(id, method, params).into());

        RequestId::Number(id)
    }

    /// Removes and returns all queued outbound messages.
    pub fn take_outbound(&mut self) -> Vec<Message> {
        self.outbox.drain(..).collect()
    }

    // ==================== Main Loop ====================

    /// Runs the dispatch loop until the transport reaches end-of-stream.
    ///
    /// # Errors
    ///
    /// Returns an error if closing the transport fails.
    pub async fn run<T>(&mut self, transport: &mut T) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
    {
        self.run_until(transport, std::future::pending()).await
    }

    /// Runs the dispatch loop until end-of-stream or until `shutdown` resolves.
    ///
    /// Read failures are logged and the loop keeps waiting; nothing a peer
    /// sends can terminate it.
    ///
    /// # Errors
    ///
    /// Returns an error if closing the transport fails.
    pub async fn run_until<T, F>(
        &mut self,
        transport: &mut T,
        shutdown: F,
    ) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        while !matches!(self.state, ServerState::ShuttingDown | ServerState::Stopped) {
            self.flush_outbound(transport).await;

            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    self.begin_shutdown();
                }

                received = transport.receive() => match received {
                    Ok(Some(bytes)) => {
                        if let Some(reply) = self.handle_bytes(&bytes) {
                            Self::deliver(transport, &reply).await;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Client closed the connection");
                        self.begin_shutdown();
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read message");
                        tokio::time::sleep(READ_RETRY_DELAY).await;
                    }
                }
            }
        }

        self.flush_outbound(transport).await;
        self.abandon_pending();

        let closed = transport.close().await;
        self.state = ServerState::Stopped;
        tracing::info!("MCP server stopped");
        closed
    }

    /// Sends every queued outbound message.
    async fn flush_outbound<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        while let Some(message) = self.outbox.pop_front() {
            Self::deliver(transport, &message).await;
        }
    }

    /// Encodes and sends one message, logging failures.
    async fn deliver<T: Transport + ?Sized>(transport: &mut T, message: &Message) {
        if let Err(e) = transport.send(&protocol::encode(message)).await {
            tracing::error!(error = %e, "Failed to send message");
        }
    }

    fn begin_shutdown(&mut self) {
        if self.state != ServerState::Stopped {
            self.state = ServerState::ShuttingDown;
        }
    }

    /// Drops every pending request without invoking its callback.
    fn abandon_pending(&mut self) {
        for (id, pending) in self.pending.drain() {
            tracing::debug!(
                id,
                method = %pending.method,
                "Abandoning unanswered request to client"
            );
        }
    }

    // ==================== Message Handling ====================

    /// Handles one encoded message and returns the reply, if any.
    ///
    /// Malformed input yields an error response rather than an error,
    /// except for malformed responses, which are logged and dropped.
    pub fn handle_bytes(&mut self, bytes: &[u8]) -> Option<Message> {
        match protocol::decode(bytes) {
            Ok(message) => self.handle_message(message),
            Err(e) => match e.to_error_response() {
                Some(response) => {
                    tracing::warn!(error = %e, "Rejecting malformed message");
                    Some(Message::Error(response))
                }
                None => {
                    tracing::warn!(error = %e, "Ignoring malformed response");
                    None
                }
            },
        }
    }

    /// Handles one decoded message and returns the reply, if any.
    pub fn handle_message(&mut self, message: Message) -> Option<Message> {
        match message {
            Message::Request(req) => Some(self.handle_request(req)),
            Message::Notification(notif) => {
                self.handle_notification(&notif);
                None
            }
            Message::Response(resp) => {
                self.handle_reply(Some(resp.id), Ok(resp.result));
                None
            }
            Message::Error(err) => {
                self.handle_reply(err.id, Err(err.error));
                None
            }
        }
    }

    /// Handles an incoming request.
    fn handle_request(&mut self, req: JsonRpcRequest) -> Message {
        tracing::debug!(method = %req.method, id = %req.id, "Handling request");

        let response = match self.state {
            ServerState::Uninitialised if req.method != "initialize" => {
                Err(JsonRpcError::not_initialised(req.id.clone()))
            }
            ServerState::ShuttingDown | ServerState::Stopped => Err(JsonRpcError::invalid_request(
                Some(req.id.clone()),
                "Server is shutting down",
            )),
            _ => self.route_request(&req),
        };

        match response {
            Ok(result) => Message::Response(JsonRpcResponse::success(req.id, result)),
            Err(error) => {
                tracing::debug!(
                    method = %req.method,
                    code = error.error.code,
                    message = %error.error.message,
                    "Request failed"
                );
                Message::Error(error)
            }
        }
    }

    /// Routes a request to its handler by method name.
    fn route_request(&mut self, req: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({
                "tools": self.features.tools.list().collect::<Vec<_>>(),
            })),
            "tools/call" => self.handle_tools_call(req),
            "resources/list" => Ok(json!({
                "resources": self.features.resources.list().collect::<Vec<_>>(),
            })),
            "resources/read" => self.handle_resources_read(req),
            "resources/templates/list" => Ok(json!({
                "resourceTemplates": self.features.templates.list().collect::<Vec<_>>(),
            })),
            "prompts/list" => Ok(json!({
                "prompts": self.features.prompts.list().collect::<Vec<_>>(),
            })),
            "prompts/get" => self.handle_prompts_get(req),
            "logging/setLevel" => self.handle_set_level(req),
            "completion/complete" => Ok(json!({
                "completion": {"values": [], "hasMore": false},
            })),
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        }
    }

    /// Handles an incoming notification.
    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => {
                if self.state == ServerState::Initialising {
                    self.state = ServerState::Ready;
                    tracing::info!("Client initialised, server ready");
                } else {
                    tracing::debug!(state = ?self.state, "Ignoring unexpected initialized notification");
                }
            }
            "notifications/cancelled" => {
                match notif
                    .params
                    .clone()
                    .map(serde_json::from_value::<CancelledParams>)
                {
                    Some(Ok(params)) => tracing::info!(
                        request_id = %params.request_id,
                        reason = params.reason.as_deref().unwrap_or(""),
                        "Client cancelled request; running handlers are not interrupted"
                    ),
                    _ => tracing::debug!("Ignoring malformed cancellation"),
                }
            }
            "notifications/roots/list_changed" => {
                tracing::debug!("Client roots changed");
            }
            other => {
                tracing::debug!(method = other, "Ignoring notification");
            }
        }
    }

    /// Resolves a pending server-initiated request.
    fn handle_reply(&mut self, id: Option<RequestId>, outcome: Result<Value, JsonRpcErrorData>) {
        let Some(RequestId::Number(id)) = id else {
            tracing::debug!(?id, "Ignoring reply that does not match a server request");
            return;
        };
        let Some(pending) = self.pending.remove(&id) else {
            tracing::debug!(id, "Ignoring reply to unknown request");
            return;
        };

        tracing::debug!(
            id,
            method = %pending.method,
            elapsed_ms = pending.issued_at.elapsed().as_millis(),
            ok = outcome.is_ok(),
            "Client answered request"
        );

        let on_reply = pending.on_reply;
        if let Err(panic) = catch_panic(move || on_reply(outcome)) {
            tracing::error!(id, panic = %panic, "Reply callback panicked");
        }
    }

    /// Handles the initialize request.
    fn handle_initialize(&mut self, req: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        if self.state != ServerState::Uninitialised {
            return Err(JsonRpcError::invalid_request(
                Some(req.id.clone()),
                "Server already initialised",
            ));
        }

        let params: InitializeParams = parse_params(req, "initialize")?;
        let negotiated =
            negotiate_version(&params.protocol_version, &self.options.supported_versions)
                .to_string();

        tracing::info!(
            client = params.client_info.as_ref().map_or("unknown", |c| c.name.as_str()),
            requested_version = %params.protocol_version,
            negotiated_version = %negotiated,
            "Client initialising"
        );

        self.peer = Some(PeerInfo {
            requested_version: params.protocol_version,
            negotiated_version: negotiated.clone(),
            capabilities: params.capabilities,
            client_info: params.client_info,
        });
        self.state = ServerState::Initialising;

        let mut result = json!({
            "protocolVersion": negotiated,
            "capabilities": self.capabilities(),
            "serverInfo": self.options.server_info,
        });
        if let Some(instructions) = &self.options.instructions {
            result["instructions"] = Value::String(instructions.clone());
        }

        Ok(result)
    }

    /// Handles the tools/call request.
    ///
    /// Tool failures are reported in-band with `isError: true`; only an
    /// unknown tool or a panicking handler is a protocol error.
    fn handle_tools_call(&self, req: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let params: ToolCallParams = parse_params(req, "tool call")?;

        let Some(tool) = self.features.tools.lookup(&params.name) else {
            return Err(JsonRpcError::invalid_params(
                req.id.clone(),
                format!("Unknown tool: {}", params.name),
            ));
        };

        let ctx = CallContext::new(&req.id, self.client_info());
        let result = match catch_panic(|| tool.call(&ctx, params.arguments.as_ref())) {
            Ok(Ok(content)) => ToolCallResult::success(content),
            Ok(Err(e)) => {
                tracing::debug!(tool = %params.name, error = %e, "Tool reported an error");
                ToolCallResult::error(e.to_string())
            }
            Err(panic) => {
                tracing::error!(tool = %params.name, panic = %panic, "Tool handler panicked");
                return Err(JsonRpcError::internal_error(
                    req.id.clone(),
                    format!("Tool '{}' failed unexpectedly", params.name),
                ));
            }
        };

        to_result(&req.id, &result)
    }

    /// Handles the resources/read request.
    fn handle_resources_read(&self, req: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let params: ReadResourceParams = parse_params(req, "resource read")?;
        let ctx = CallContext::new(&req.id, self.client_info());

        match catch_panic(|| self.features.read_resource(&ctx, &params.uri)) {
            Ok(Some(Ok(contents))) => to_result(&req.id, &ReadResourceResult { contents }),
            Ok(Some(Err(e))) => {
                tracing::warn!(uri = %params.uri, error = %e, "Resource read failed");
                Err(JsonRpcError::internal_error(req.id.clone(), e.to_string()))
            }
            Ok(None) => Err(JsonRpcError::invalid_params(
                req.id.clone(),
                format!("Unknown resource: {}", params.uri),
            )),
            Err(panic) => {
                tracing::error!(uri = %params.uri, panic = %panic, "Resource handler panicked");
                Err(JsonRpcError::internal_error(
                    req.id.clone(),
                    format!("Resource '{}' failed unexpectedly", params.uri),
                ))
            }
        }
    }

    /// Handles the prompts/get request.
    fn handle_prompts_get(&self, req: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let params: GetPromptParams = parse_params(req, "prompt")?;

        let Some(prompt) = self.features.prompts.lookup(&params.name) else {
            return Err(JsonRpcError::invalid_params(
                req.id.clone(),
                format!("Unknown prompt: {}", params.name),
            ));
        };

        let arguments = prompt_arguments(&req.id, params.arguments)?;
        let missing = prompt.missing_arguments(&arguments);
        if !missing.is_empty() {
            return Err(JsonRpcError::invalid_params(
                req.id.clone(),
                format!("Missing required arguments: {}", missing.join(", ")),
            ));
        }

        let ctx = CallContext::new(&req.id, self.client_info());
        match catch_panic(|| prompt.get(&ctx, &arguments)) {
            Ok(Ok(messages)) => to_result(
                &req.id,
                &GetPromptResult {
                    description: prompt.description.clone(),
                    messages,
                },
            ),
            Ok(Err(e)) => {
                tracing::warn!(prompt = %params.name, error = %e, "Prompt rendering failed");
                Err(JsonRpcError::internal_error(req.id.clone(), e.to_string()))
            }
            Err(panic) => {
                tracing::error!(prompt = %params.name, panic = %panic, "Prompt handler panicked");
                Err(JsonRpcError::internal_error(
                    req.id.clone(),
                    format!("Prompt '{}' failed unexpectedly", params.name),
                ))
            }
        }
    }

    /// Handles the logging/setLevel request.
    fn handle_set_level(&mut self, req: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let params: SetLevelParams = parse_params(req, "setLevel")?;
        tracing::info!(level = ?params.level, "Client log level changed");
        self.log_level = params.level;
        Ok(json!({}))
    }

    fn client_info(&self) -> Option<&ClientInfo> {
        self.peer.as_ref().and_then(|p| p.client_info.as_ref())
    }
}

/// Deserialises required request params, mapping failures to Invalid Params.
fn parse_params<T: DeserializeOwned>(req: &JsonRpcRequest, what: &str) -> Result<T, JsonRpcError> {
    req.params_as::<T>()
        .map_err(|e| JsonRpcError::invalid_params(req.id.clone(), format!("Invalid {what} params: {e}")))?
        .ok_or_else(|| JsonRpcError::invalid_params(req.id.clone(), format!("Missing {what} params")))
}

/// Serialises a typed result.
fn to_result<T: Serialize>(id: &RequestId, result: &T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(result).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialise result");
        JsonRpcError::new(
            Some(id.clone()),
            JsonRpcErrorData::with_message(
                ErrorCode::InternalError,
                "Internal error: failed to serialise result",
            ),
        )
    })
}

/// Validates prompt arguments: absent, or an object of strings.
fn prompt_arguments(
    id: &RequestId,
    arguments: Option<Value>,
) -> Result<BTreeMap<String, String>, JsonRpcError> {
    match arguments {
        None | Some(Value::Null) => Ok(BTreeMap::new()),
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(name, value)| match value {
                Value::String(s) => Ok((name, s)),
                _ => Err(JsonRpcError::invalid_params(
                    id.clone(),
                    format!("Prompt argument '{name}' must be a string"),
                )),
            })
            .collect(),
        Some(_) => Err(JsonRpcError::invalid_params(
            id.clone(),
            "Prompt arguments must be an object",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::error::ToolError;
    use crate::mcp::types::Content;
    use std::sync::{Arc, Mutex};

    fn request(server: &mut McpServer, json: &str) -> Message {
        server
            .handle_bytes(json.as_bytes())
            .expect("request should produce a reply")
    }

    fn ready_server() -> McpServer {
        let mut server = McpServer::default();
        request(
            &mut server,
            r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{},"clientInfo":{"name":"test"}}}"#,
        );
        assert!(server
            .handle_bytes(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .is_none());
        server
    }

    #[test]
    fn server_initial_state() {
        let server = McpServer::default();
        assert_eq!(server.state(), ServerState::Uninitialised);
        assert!(server.peer().is_none());
        assert_eq!(server.log_level(), LogLevel::Info);
    }

    #[test]
    fn lifecycle_transitions() {
        let mut server = McpServer::default();
        let reply = request(
            &mut server,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","capabilities":{}}}"#,
        );
        assert!(matches!(reply, Message::Response(_)));
        assert_eq!(server.state(), ServerState::Initialising);
        assert_eq!(server.peer().unwrap().negotiated_version, "2025-06-18");

        server.handle_bytes(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert_eq!(server.state(), ServerState::Ready);
    }

    #[test]
    fn second_initialize_rejected() {
        let mut server = ready_server();
        let reply = request(
            &mut server,
            r#"{"jsonrpc":"2.0","id":9,"method":"initialize","params":{"protocolVersion":"2025-06-18"}}"#,
        );
        let Message::Error(err) = reply else {
            panic!("Expected error, got {reply:?}");
        };
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
        assert!(err.error.message.contains("already initialised"));
        assert_eq!(server.state(), ServerState::Ready);
    }

    #[test]
    fn initialize_without_params_is_invalid() {
        let mut server = McpServer::default();
        let reply = request(&mut server, r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#);
        let Message::Error(err) = reply else {
            panic!("Expected error, got {reply:?}");
        };
        assert_eq!(err.error.code, ErrorCode::InvalidParams.code());
        assert_eq!(server.state(), ServerState::Uninitialised);
    }

    #[test]
    fn hot_registration_queues_list_changed() {
        let mut server = McpServer::default();
        server.register_tool(ToolDescriptor::from_fn("early", |_, _| Ok(vec![])));
        assert!(server.take_outbound().is_empty());

        let mut server = ready_server();
        server.register_tool(ToolDescriptor::from_fn("late", |_, _| Ok(vec![])));
        let outbound = server.take_outbound();
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].method(), Some("notifications/tools/list_changed"));

        assert!(server.unregister_tool("late"));
        assert!(!server.unregister_tool("late"));
        assert_eq!(server.take_outbound().len(), 1);
    }

    #[test]
    fn list_changed_can_be_disabled() {
        let mut server = McpServer::new(ServerOptions {
            notify_list_changed: false,
            ..ServerOptions::default()
        });
        request(
            &mut server,
            r#"{"jsonrpc":"2.0","id":0,"method":"initialize","params":{"protocolVersion":"2025-06-18"}}"#,
        );
        server.handle_bytes(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        server.register_prompt(PromptDescriptor::from_fn("p", |_, _| Ok(vec![])));
        assert!(server.take_outbound().is_empty());
        assert!(!server.capabilities().prompts.unwrap().list_changed);
    }

    #[test]
    fn server_request_resolved_by_reply() {
        let mut server = ready_server();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        let id = server.send_request("roots/list", None, move |outcome| {
            *sink.lock().unwrap() = Some(outcome);
        });
        assert_eq!(id, RequestId::Number(1));
        assert_eq!(server.pending_requests(), 1);

        let outbound = server.take_outbound();
        assert_eq!(outbound[0].method(), Some("roots/list"));

        // String IDs never match server requests.
        server.handle_bytes(br#"{"jsonrpc":"2.0","id":"1","result":{}}"#);
        assert_eq!(server.pending_requests(), 1);

        server.handle_bytes(br#"{"jsonrpc":"2.0","id":1,"result":{"roots":[]}}"#);
        assert_eq!(server.pending_requests(), 0);
        assert_eq!(
            seen.lock().unwrap().take(),
            Some(Ok(json!({"roots": []})))
        );
    }

    #[test]
    fn server_request_ids_increase() {
        let mut server = ready_server();
        let first = server.send_request("ping", None, |_| {});
        let second = server.send_request("ping", None, |_| {});
        assert_eq!(first, RequestId::Number(1));
        assert_eq!(second, RequestId::Number(2));

        server.handle_bytes(
            br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}"#,
        );
        let third = server.send_request("ping", None, |_| {});
        assert_eq!(third, RequestId::Number(3));
        assert_eq!(server.pending_requests(), 2);
    }

    #[test]
    fn log_messages_respect_level() {
        let mut server = McpServer::default();
        assert!(!server.log_message(LogLevel::Error, None, json!("too early")));

        let mut server = ready_server();
        assert!(!server.log_message(LogLevel::Debug, None, json!("filtered")));
        assert!(server.log_message(LogLevel::Warning, Some("db"), json!({"slow": true})));

        let reply = request(
            &mut server,
            r#"{"jsonrpc":"2.0","id":5,"method":"logging/setLevel","params":{"level":"error"}}"#,
        );
        assert!(matches!(reply, Message::Response(_)));
        assert_eq!(server.log_level(), LogLevel::Error);
        assert!(!server.log_message(LogLevel::Warning, None, json!("filtered now")));

        let outbound = server.take_outbound();
        assert_eq!(outbound.len(), 1);
        let Message::Notification(notif) = &outbound[0] else {
            panic!("Expected notification");
        };
        assert_eq!(notif.method, "notifications/message");
        assert_eq!(
            notif.params,
            Some(json!({"level": "warning", "logger": "db", "data": {"slow": true}}))
        );
    }

    #[test]
    fn tool_error_is_in_band() {
        let mut server = ready_server();
        server.register_tool(ToolDescriptor::from_fn("fail", |_, _| {
            Err(ToolError::ExecutionFailed("disk full".into()))
        }));
        server.take_outbound();

        let reply = request(
            &mut server,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"fail"}}"#,
        );
        let Message::Response(resp) = reply else {
            panic!("Expected response, got {reply:?}");
        };
        assert_eq!(resp.result["isError"], json!(true));
        assert_eq!(resp.result["content"][0]["text"], "Execution failed: disk full");
    }

    #[test]
    fn tool_panic_becomes_internal_error() {
        let mut server = ready_server();
        server.register_tool(ToolDescriptor::from_fn("boom", |_, _| -> Result<Vec<Content>, ToolError> {
            panic!("handler bug")
        }));

        let reply = request(
            &mut server,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"boom"}}"#,
        );
        let Message::Error(err) = reply else {
            panic!("Expected error, got {reply:?}");
        };
        assert_eq!(err.error.code, ErrorCode::InternalError.code());

        // The server keeps serving.
        let reply = request(&mut server, r#"{"jsonrpc":"2.0","id":4,"method":"ping"}"#);
        assert!(matches!(reply, Message::Response(_)));
    }

    #[test]
    fn prompt_arguments_validation() {
        let id = RequestId::Number(1);
        assert!(prompt_arguments(&id, None).unwrap().is_empty());
        assert_eq!(
            prompt_arguments(&id, Some(json!({"a": "b"}))).unwrap()["a"],
            "b"
        );
        assert!(prompt_arguments(&id, Some(json!({"a": 1}))).is_err());
        assert!(prompt_arguments(&id, Some(json!(["a"]))).is_err());
    }

    #[test]
    fn malformed_responses_get_no_reply() {
        let mut server = ready_server();
        server.send_request("roots/list", None, |_| {});

        assert!(server
            .handle_bytes(br#"{"jsonrpc":"2.0","id":1,"error":"oops"}"#)
            .is_none());
        assert!(server
            .handle_bytes(br#"{"jsonrpc":"2.0","id":null,"result":{}}"#)
            .is_none());
        assert_eq!(server.pending_requests(), 1);
        assert_eq!(server.state(), ServerState::Ready);
    }

    #[test]
    fn cancellation_is_accepted_silently() {
        let mut server = ready_server();
        assert!(server
            .handle_bytes(
                br#"{"jsonrpc":"2.0","method":"notifications/cancelled","params":{"requestId":3,"reason":"user"}}"#
            )
            .is_none());
        assert_eq!(server.state(), ServerState::Ready);
    }
}
