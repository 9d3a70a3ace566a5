//! Model Context Protocol (MCP) server engine.
//!
//! The engine exposes registered tools, resources and prompts to an MCP
//! client over JSON-RPC 2.0. It is transport-agnostic: the same dispatch
//! loop runs over stdio or HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          MCP Server                          │
//! │                                                              │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────────┐  │
//! │   │  Transport  │───▶│   Server    │───▶│   Registries    │  │
//! │   │(stdio/http) │    │ (lifecycle) │    │ (tools, prompts │  │
//! │   └─────────────┘    └─────────────┘    │  and resources) │  │
//! │          │                  │           └─────────────────┘  │
//! │          ▼                  ▼                                │
//! │   ┌─────────────────────────────────────────────────┐        │
//! │   │         JSON-RPC Messages (protocol)            │        │
//! │   └─────────────────────────────────────────────────┘        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! The newest supported version is [`LATEST_PROTOCOL_VERSION`]; older
//! versions listed in [`SUPPORTED_PROTOCOL_VERSIONS`] are echoed back when a
//! client asks for them.

pub mod capabilities;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;
pub mod types;

pub use capabilities::{LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, Message, RequestId};
pub use registry::{PromptDescriptor, ResourceDescriptor, ResourceTemplateDescriptor, ToolDescriptor};
pub use server::{McpServer, ServerOptions, ServerState};
pub use transport::{HttpTransport, StdioTransport, StreamTransport, Transport};
