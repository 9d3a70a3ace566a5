//! mcp-engine: a transport-agnostic Model Context Protocol server engine
//!
//! This library lets an application expose tools, resources and prompts to
//! MCP clients such as AI assistants.
//!
//! # Architecture
//!
//! The engine owns the protocol. The application owns the behaviour:
//!
//! - **Protocol**: JSON-RPC 2.0 framing, classification and error responses
//! - **Lifecycle**: Initialisation handshake, version negotiation, capabilities
//! - **Registries**: Tools, resources, resource templates and prompts
//! - **Transports**: Newline-delimited stdio and HTTP POST
//!
//! The application registers handlers; each handler is a plain function
//! or closure that receives its arguments and returns owned content.
//!
//! # Modules
//!
//! - [`builtin`] — Built-in demonstration features
//! - [`config`] — Configuration loading and validation
//! - [`error`] — Error types
//! - [`mcp`] — MCP protocol implementation

pub mod builtin;
pub mod config;
pub mod error;
pub mod mcp;
