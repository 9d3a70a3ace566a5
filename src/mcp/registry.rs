//! Feature registries for tools, resources and prompts.
//!
//! Each registry maps a unique key (tool name, resource URI, template URI,
//! prompt name) to a descriptor that owns its handler. Registering a key
//! twice replaces the earlier entry.
//!
//! # Ordering
//!
//! Registries are hash maps. [`Registry::list`] yields descriptors in an
//! unspecified order that may change between calls after any mutation;
//! callers must not depend on it.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::mcp::error::{PromptError, ResourceError, ToolError};
use crate::mcp::protocol::RequestId;
use crate::mcp::types::{ClientInfo, Content, PromptArgument, PromptMessage, ResourceContents};

/// Per-call context handed to every handler.
///
/// Everything a handler returns is owned by the caller; the context only
/// borrows connection state for the duration of the call.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    request_id: &'a RequestId,
    client: Option<&'a ClientInfo>,
}

impl<'a> CallContext<'a> {
    /// Creates a context for one dispatched request.
    #[must_use]
    pub const fn new(request_id: &'a RequestId, client: Option<&'a ClientInfo>) -> Self {
        Self { request_id, client }
    }

    /// ID of the request being served.
    #[must_use]
    pub const fn request_id(&self) -> &'a RequestId {
        self.request_id
    }

    /// Identity the client declared during initialisation.
    #[must_use]
    pub const fn client(&self) -> Option<&'a ClientInfo> {
        self.client
    }
}

/// A callable tool implementation.
pub trait ToolHandler: Send + Sync {
    /// Runs the tool with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns a [`ToolError`] describing why the tool could not complete.
    fn call(&self, ctx: &CallContext<'_>, arguments: Option<&Value>)
        -> Result<Vec<Content>, ToolError>;
}

impl<F> ToolHandler for F
where
    F: Fn(&CallContext<'_>, Option<&Value>) -> Result<Vec<Content>, ToolError> + Send + Sync,
{
    fn call(
        &self,
        ctx: &CallContext<'_>,
        arguments: Option<&Value>,
    ) -> Result<Vec<Content>, ToolError> {
        self(ctx, arguments)
    }
}

/// The URI being read and any variables bound by a URI template.
#[derive(Debug, Clone, Copy)]
pub struct ResourceRequest<'a> {
    /// The requested URI.
    pub uri: &'a str,
    /// Template variables; empty for exact-URI resources.
    pub variables: &'a BTreeMap<String, String>,
}

/// A readable resource implementation.
pub trait ResourceHandler: Send + Sync {
    /// Reads the resource.
    ///
    /// # Errors
    ///
    /// Returns a [`ResourceError`] if the data cannot be produced.
    fn read(
        &self,
        ctx: &CallContext<'_>,
        request: &ResourceRequest<'_>,
    ) -> Result<Vec<ResourceContents>, ResourceError>;
}

impl<F> ResourceHandler for F
where
    F: Fn(&CallContext<'_>, &ResourceRequest<'_>) -> Result<Vec<ResourceContents>, ResourceError>
        + Send
        + Sync,
{
    fn read(
        &self,
        ctx: &CallContext<'_>,
        request: &ResourceRequest<'_>,
    ) -> Result<Vec<ResourceContents>, ResourceError> {
        self(ctx, request)
    }
}

/// A prompt template implementation.
pub trait PromptHandler: Send + Sync {
    /// Renders the prompt with string arguments.
    ///
    /// # Errors
    ///
    /// Returns a [`PromptError`] if the prompt cannot be rendered.
    fn get(
        &self,
        ctx: &CallContext<'_>,
        arguments: &BTreeMap<String, String>,
    ) -> Result<Vec<PromptMessage>, PromptError>;
}

impl<F> PromptHandler for F
where
    F: Fn(&CallContext<'_>, &BTreeMap<String, String>) -> Result<Vec<PromptMessage>, PromptError>
        + Send
        + Sync,
{
    fn get(
        &self,
        ctx: &CallContext<'_>,
        arguments: &BTreeMap<String, String>,
    ) -> Result<Vec<PromptMessage>, PromptError> {
        self(ctx, arguments)
    }
}

/// Anything stored in a [`Registry`].
pub trait Keyed {
    /// The unique key of this entry.
    fn key(&self) -> &str;
}

/// A tool definition plus its handler.
///
/// Serialises to the `tools/list` entry shape.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name.
    pub name: String,
    /// Human-readable display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
    #[serde(skip)]
    handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    /// Creates a tool with an empty object input schema.
    #[must_use]
    pub fn new(name: impl Into<String>, handler: impl ToolHandler + 'static) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: None,
            input_schema: json!({"type": "object", "properties": {}}),
            handler: Arc::new(handler),
        }
    }

    /// Creates a tool from a closure.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CallContext<'_>, Option<&Value>) -> Result<Vec<Content>, ToolError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, handler)
    }

    /// Sets the display title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the JSON Schema of the arguments.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Invokes the handler.
    ///
    /// # Errors
    ///
    /// Propagates the handler's [`ToolError`].
    pub fn call(
        &self,
        ctx: &CallContext<'_>,
        arguments: Option<&Value>,
    ) -> Result<Vec<Content>, ToolError> {
        self.handler.call(ctx, arguments)
    }
}

impl Keyed for ToolDescriptor {
    fn key(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A resource with a fixed URI plus its handler.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// URI of the resource.
    pub uri: String,
    /// Short name.
    pub name: String,
    /// Human-readable display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the contents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip)]
    handler: Arc<dyn ResourceHandler>,
}

impl ResourceDescriptor {
    /// Creates a resource.
    #[must_use]
    pub fn new(
        uri: impl Into<String>,
        name: impl Into<String>,
        handler: impl ResourceHandler + 'static,
    ) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            title: None,
            description: None,
            mime_type: None,
            handler: Arc::new(handler),
        }
    }

    /// Creates a resource from a closure.
    #[must_use]
    pub fn from_fn<F>(uri: impl Into<String>, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CallContext<'_>, &ResourceRequest<'_>) -> Result<Vec<ResourceContents>, ResourceError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(uri, name, handler)
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Invokes the handler for this resource's own URI.
    ///
    /// # Errors
    ///
    /// Propagates the handler's [`ResourceError`].
    pub fn read(&self, ctx: &CallContext<'_>) -> Result<Vec<ResourceContents>, ResourceError> {
        let variables = BTreeMap::new();
        self.handler.read(
            ctx,
            &ResourceRequest {
                uri: &self.uri,
                variables: &variables,
            },
        )
    }
}

impl Keyed for ResourceDescriptor {
    fn key(&self) -> &str {
        &self.uri
    }
}

impl std::fmt::Debug for ResourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("uri", &self.uri)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// An RFC 6570 style URI template compiled for matching.
///
/// Supports simple `{var}` expressions, which match one path segment, and
/// reserved `{+var}` expressions, which may span `/`.
#[derive(Debug, Clone)]
pub struct UriTemplate {
    regex: Option<Regex>,
    variables: Vec<String>,
}

impl UriTemplate {
    /// Compiles a template. A template that cannot be compiled never matches.
    #[must_use]
    pub fn new(template: &str) -> Self {
        let (pattern, variables) = template_to_regex(template);
        let regex = match Regex::new(&format!("^{pattern}$")) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(template, error = %e, "URI template cannot be compiled; it will never match");
                None
            }
        };
        Self { regex, variables }
    }

    /// Matches a URI, returning the bound variables.
    #[must_use]
    pub fn matches(&self, uri: &str) -> Option<BTreeMap<String, String>> {
        let captures = self.regex.as_ref()?.captures(uri)?;
        Some(
            self.variables
                .iter()
                .zip(captures.iter().skip(1))
                .filter_map(|(name, m)| m.map(|m| (name.clone(), m.as_str().to_string())))
                .collect(),
        )
    }
}

/// Converts a URI template to a regex pattern and its variable names.
fn template_to_regex(template: &str) -> (String, Vec<String>) {
    let mut regex = String::with_capacity(template.len() * 2);
    let mut variables = Vec::new();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                let expr: String = chars.by_ref().take_while(|&c| c != '}').collect();
                if let Some(name) = expr.strip_prefix('+') {
                    variables.push(name.to_string());
                    regex.push_str("(.+)");
                } else {
                    variables.push(expr);
                    regex.push_str("([^/]+)");
                }
            }
            '.' | '+' | '*' | '?' | '^' | '$' | '(' | ')' | '[' | ']' | '}' | '|' | '\\' => {
                regex.push('\\');
                regex.push(c);
            }
            _ => regex.push(c),
        }
    }

    (regex, variables)
}

/// A parameterised family of resources plus the handler that reads them.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateDescriptor {
    /// The URI template.
    pub uri_template: String,
    /// Short name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the contents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip)]
    matcher: UriTemplate,
    #[serde(skip)]
    handler: Arc<dyn ResourceHandler>,
}

impl ResourceTemplateDescriptor {
    /// Creates a resource template.
    #[must_use]
    pub fn new(
        uri_template: impl Into<String>,
        name: impl Into<String>,
        handler: impl ResourceHandler + 'static,
    ) -> Self {
        let uri_template = uri_template.into();
        Self {
            matcher: UriTemplate::new(&uri_template),
            uri_template,
            name: name.into(),
            description: None,
            mime_type: None,
            handler: Arc::new(handler),
        }
    }

    /// Creates a resource template from a closure.
    #[must_use]
    pub fn from_fn<F>(uri_template: impl Into<String>, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CallContext<'_>, &ResourceRequest<'_>) -> Result<Vec<ResourceContents>, ResourceError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(uri_template, name, handler)
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Returns the variables bound by `uri` if it matches this template.
    #[must_use]
    pub fn matches(&self, uri: &str) -> Option<BTreeMap<String, String>> {
        self.matcher.matches(uri)
    }

    /// Invokes the handler for a matched URI.
    ///
    /// # Errors
    ///
    /// Propagates the handler's [`ResourceError`].
    pub fn read(
        &self,
        ctx: &CallContext<'_>,
        uri: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceContents>, ResourceError> {
        self.handler.read(ctx, &ResourceRequest { uri, variables })
    }
}

impl Keyed for ResourceTemplateDescriptor {
    fn key(&self) -> &str {
        &self.uri_template
    }
}

impl std::fmt::Debug for ResourceTemplateDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTemplateDescriptor")
            .field("uri_template", &self.uri_template)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A prompt template plus its handler.
#[derive(Clone, Serialize)]
pub struct PromptDescriptor {
    /// Unique prompt name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Arguments the template accepts.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<PromptArgument>,
    #[serde(skip)]
    handler: Arc<dyn PromptHandler>,
}

impl PromptDescriptor {
    /// Creates a prompt without arguments.
    #[must_use]
    pub fn new(name: impl Into<String>, handler: impl PromptHandler + 'static) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    /// Creates a prompt from a closure.
    #[must_use]
    pub fn from_fn<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CallContext<'_>, &BTreeMap<String, String>) -> Result<Vec<PromptMessage>, PromptError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, handler)
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declares an argument.
    #[must_use]
    pub fn with_argument(mut self, argument: PromptArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    /// Names of declared arguments that are required but absent from `arguments`.
    #[must_use]
    pub fn missing_arguments(&self, arguments: &BTreeMap<String, String>) -> Vec<&str> {
        self.arguments
            .iter()
            .filter(|a| a.required && !arguments.contains_key(&a.name))
            .map(|a| a.name.as_str())
            .collect()
    }

    /// Invokes the handler.
    ///
    /// # Errors
    ///
    /// Propagates the handler's [`PromptError`].
    pub fn get(
        &self,
        ctx: &CallContext<'_>,
        arguments: &BTreeMap<String, String>,
    ) -> Result<Vec<PromptMessage>, PromptError> {
        self.handler.get(ctx, arguments)
    }
}

impl Keyed for PromptDescriptor {
    fn key(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for PromptDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptDescriptor")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

/// A keyed collection of descriptors. Last registration of a key wins.
#[derive(Debug)]
pub struct Registry<D> {
    entries: HashMap<String, D>,
}

impl<D> Default for Registry<D> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<D: Keyed> Registry<D> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a descriptor, returning the one it replaced.
    pub fn register(&mut self, descriptor: D) -> Option<D> {
        self.entries.insert(descriptor.key().to_string(), descriptor)
    }

    /// Removes a descriptor by key.
    pub fn unregister(&mut self, key: &str) -> Option<D> {
        self.entries.remove(key)
    }

    /// Looks up a descriptor by key.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&D> {
        self.entries.get(key)
    }

    /// Iterates over all descriptors in unspecified order.
    pub fn list(&self) -> impl Iterator<Item = &D> {
        self.entries.values()
    }

    /// Number of registered descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry of tools, keyed by name.
pub type ToolRegistry = Registry<ToolDescriptor>;
/// Registry of fixed resources, keyed by URI.
pub type ResourceRegistry = Registry<ResourceDescriptor>;
/// Registry of resource templates, keyed by template string.
pub type ResourceTemplateRegistry = Registry<ResourceTemplateDescriptor>;
/// Registry of prompts, keyed by name.
pub type PromptRegistry = Registry<PromptDescriptor>;

/// All feature registries of one server.
#[derive(Debug, Default)]
pub struct Features {
    /// Callable tools.
    pub tools: ToolRegistry,
    /// Fixed-URI resources.
    pub resources: ResourceRegistry,
    /// Resource templates.
    pub templates: ResourceTemplateRegistry,
    /// Prompt templates.
    pub prompts: PromptRegistry,
}

impl Features {
    /// Resolves a URI to a handler invocation: exact resources first, then templates.
    ///
    /// Returns `None` if nothing is registered for the URI.
    pub fn read_resource(
        &self,
        ctx: &CallContext<'_>,
        uri: &str,
    ) -> Option<Result<Vec<ResourceContents>, ResourceError>> {
        if let Some(resource) = self.resources.lookup(uri) {
            return Some(resource.read(ctx));
        }

        self.templates.list().find_map(|template| {
            template
                .matches(uri)
                .map(|variables| template.read(ctx, uri, &variables))
        })
    }
}

/// Runs a handler, converting a panic into an error message.
pub(crate) fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}
