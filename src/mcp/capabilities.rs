//! Capability advertisement and protocol version negotiation.
//!
//! Capabilities are derived from the registries every time they are needed;
//! there is no separately stored capability set that could drift.

use serde::Serialize;
use serde_json::Value;

use crate::mcp::registry::Features;
use crate::mcp::types::{is_false, ClientInfo};

/// The newest protocol version this engine speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-11-25";

/// Protocol versions this engine speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &[LATEST_PROTOCOL_VERSION, "2025-06-18", "2025-03-26", "2024-11-05"];

/// Server capabilities advertised during initialisation.
///
/// A missing member means the capability is not supported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,
    /// Resource-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceCapabilities>,
    /// Prompt-related capabilities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<ListChangedCapability>,
    /// Present if the server sends log messages to the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<EmptyCapability>,
}

/// Capability whose only option is list-change notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListChangedCapability {
    /// Whether the server notifies when the list changes.
    #[serde(rename = "listChanged", skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

/// Resource-specific capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceCapabilities {
    /// Whether clients may subscribe to resource updates.
    #[serde(skip_serializing_if = "is_false")]
    pub subscribe: bool,
    /// Whether the server notifies when the list changes.
    #[serde(rename = "listChanged", skip_serializing_if = "is_false")]
    pub list_changed: bool,
}

/// A capability with no options; serialises as `{}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmptyCapability {}

/// Capabilities that are switched on by configuration rather than by registry contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityOptions {
    /// Advertise `logging`.
    pub logging: bool,
    /// Advertise `listChanged` on every list capability.
    pub list_changed: bool,
}

impl ServerCapabilities {
    /// Computes the advertised capabilities from the current registries.
    #[must_use]
    pub fn compute(features: &Features, options: CapabilityOptions) -> Self {
        let list = ListChangedCapability {
            list_changed: options.list_changed,
        };
        let has_resources = !features.resources.is_empty() || !features.templates.is_empty();

        Self {
            tools: (!features.tools.is_empty()).then_some(list),
            resources: has_resources.then_some(ResourceCapabilities {
                subscribe: false,
                list_changed: options.list_changed,
            }),
            prompts: (!features.prompts.is_empty()).then_some(list),
            logging: options.logging.then_some(EmptyCapability {}),
        }
    }
}

/// Picks the protocol version to answer `initialize` with.
///
/// The requested version is echoed back if supported. Otherwise the newest
/// supported version is returned; the handshake is never rejected.
#[must_use]
pub fn negotiate_version<'a>(requested: &str, supported: &'a [String]) -> &'a str {
    supported
        .iter()
        .find(|v| v.as_str() == requested)
        .or_else(|| supported.first())
        .map_or(LATEST_PROTOCOL_VERSION, String::as_str)
}

/// What the client told us about itself during initialisation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerInfo {
    /// Protocol version the client asked for.
    pub requested_version: String,
    /// Version agreed for this connection.
    pub negotiated_version: String,
    /// Client capabilities, kept verbatim.
    pub capabilities: Value,
    /// Client identity.
    pub client_info: Option<ClientInfo>,
}
