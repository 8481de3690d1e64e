//! The dispatch table: maps protocol method names onto registered domain handlers.
//!
//! A [`DispatchTable`] is built once at startup with a builder API and is
//! read-only afterwards; every session transport shares the same instance
//! behind an `Arc`.

use super::transport::ConnectionHandle;
use crate::error::{Error, Result};
use crate::types::{
    CallToolParams, CallToolResult, ErrorData, GetPromptParams, GetPromptResult, Implementation,
    InitializeRequestParams, InitializeResult, ListChangedCapability, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, Prompt, ReadResourceParams,
    ReadResourceResult, Resource, ResourceTemplate, ServerCapabilities, Tool, INTERNAL_ERROR,
    INVALID_PARAMS, LATEST_PROTOCOL_VERSION, METHOD_NOT_FOUND,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::{future::Future, pin::Pin, sync::Arc};
use tracing::{debug, error};

// Type alias for the boxed future returned by handlers
type BoxedFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

pub(crate) type ToolHandler =
    Arc<dyn Fn(ConnectionHandle, Arc<Value>) -> BoxedFuture<Result<CallToolResult>> + Send + Sync>;

pub(crate) type ResourceHandler = Arc<
    dyn Fn(ConnectionHandle, ResourceRequest) -> BoxedFuture<Result<ReadResourceResult>>
        + Send
        + Sync,
>;

pub(crate) type PromptHandler = Arc<
    dyn Fn(ConnectionHandle, PromptArguments) -> BoxedFuture<Result<GetPromptResult>>
        + Send
        + Sync,
>;

/// Prompt arguments after normalisation to strings.
pub type PromptArguments = HashMap<String, String>;

/// What a resource handler is asked to read.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    /// The exact URI the client asked for.
    pub uri: String,
    /// Values bound to the template variables; empty for static resources.
    pub variables: HashMap<String, String>,
}

impl ResourceRequest {
    /// Returns a bound template variable.
    pub fn var(&self, name: &str) -> Result<&str> {
        self.variables
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::InvalidParams(format!("Missing URI variable '{}'", name)))
    }
}

/// The interface a session transport uses to execute protocol methods.
///
/// Implementations must be stateless with respect to sessions: the same
/// instance serves every session concurrently.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Produces the `initialize` result for a new session.
    fn initialize(&self, params: &InitializeRequestParams) -> InitializeResult;

    /// Executes one method call and returns its JSON result or a JSON-RPC failure.
    async fn handle(
        &self,
        method: &str,
        params: Value,
        handle: ConnectionHandle,
    ) -> std::result::Result<Value, ErrorData>;
}

/// A segment of a parsed URI template.
#[derive(Debug, Clone, PartialEq)]
enum TemplatePart {
    Literal(String),
    Variable(String),
}

/// A level-1 RFC 6570 template such as `github://repos/{owner}/{repo}`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UriTemplate {
    parts: Vec<TemplatePart>,
}

impl UriTemplate {
    pub(crate) fn parse(template: &str) -> Self {
        let mut parts = Vec::new();
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            if start > 0 {
                parts.push(TemplatePart::Literal(rest[..start].to_string()));
            }
            parts.push(TemplatePart::Variable(rest[start + 1..start + len].to_string()));
            rest = &rest[start + len + 1..];
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Literal(rest.to_string()));
        }
        Self { parts }
    }

    /// Matches a concrete URI, binding each variable to a non-empty,
    /// slash-free segment.
    pub(crate) fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let mut variables = HashMap::new();
        let mut rest = uri;
        let mut parts = self.parts.iter().peekable();
        while let Some(part) = parts.next() {
            match part {
                TemplatePart::Literal(lit) => rest = rest.strip_prefix(lit.as_str())?,
                TemplatePart::Variable(name) => {
                    let end = match parts.peek() {
                        Some(TemplatePart::Literal(next)) => rest.find(next.as_str())?,
                        _ => rest.len(),
                    };
                    let value = &rest[..end];
                    if value.is_empty() || value.contains('/') {
                        return None;
                    }
                    variables.insert(name.clone(), value.to_string());
                    rest = &rest[end..];
                }
            }
        }
        rest.is_empty().then_some(variables)
    }
}

/// Builder and runtime table of tool, resource and prompt handlers.
///
/// # Example
///
/// ```no_run
/// use mcp_session_server::server::DispatchTable;
/// use mcp_session_server::types::{CallToolResult, Tool};
///
/// let table = DispatchTable::new("example").register_tool(
///     Tool {
///         name: "echo".to_string(),
///         ..Default::default()
///     },
///     |_handle, args| async move { Ok(CallToolResult::text(args.to_string())) },
/// );
/// ```
#[derive(Default, Clone)]
pub struct DispatchTable {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) protocol_version: String,
    pub(crate) instructions: Option<String>,
    // Keyed by name so that list results come back in a stable order.
    pub(crate) tools_and_handlers: BTreeMap<String, (Tool, ToolHandler)>,
    pub(crate) resources: BTreeMap<String, (Resource, ResourceHandler)>,
    pub(crate) templates: Vec<(ResourceTemplate, UriTemplate, ResourceHandler)>,
    pub(crate) prompts: BTreeMap<String, (Prompt, PromptHandler)>,
}

impl DispatchTable {
    /// Creates an empty table for a server called `name`.
    pub fn new(name: &str) -> Self {
        DispatchTable {
            name: name.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_protocol_version(mut self, protocol_version: &str) -> Self {
        self.protocol_version = protocol_version.to_string();
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = Some(instructions.to_string());
        self
    }

    /// Registers a tool whose handler receives the raw JSON arguments.
    pub fn register_tool<F, Fut>(mut self, tool: Tool, handler: F) -> Self
    where
        F: Fn(ConnectionHandle, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |conn_handle, json_args: Arc<Value>| {
            Box::pin(handler(conn_handle, (*json_args).clone()))
        });
        self.tools_and_handlers
            .insert(tool.name.clone(), (tool, handler));
        self
    }

    /// Registers a tool with a handler that accepts strongly-typed arguments.
    ///
    /// The `tool` is usually built with [`Tool::from_args`] so that its input
    /// schema describes `Args`. If the client's arguments do not deserialize
    /// into `Args`, the handler is not called and the client receives a tool
    /// result with `isError: true` describing the problem.
    pub fn register_tool_typed<Args, Fut, F>(mut self, tool: Tool, handler: F) -> Self
    where
        Args: DeserializeOwned + Send + Sync + 'static,
        Fut: Future<Output = Result<CallToolResult>> + Send + 'static,
        F: Fn(ConnectionHandle, Args) -> Fut + Send + Sync + 'static,
    {
        let user_handler = Arc::new(handler);
        let tool_name = tool.name.clone();

        let wrapped: ToolHandler = Arc::new(move |conn_handle, json_args: Arc<Value>| {
            let user_handler = Arc::clone(&user_handler);
            let tool_name = tool_name.clone();
            Box::pin(async move {
                match serde_json::from_value::<Args>((*json_args).clone()) {
                    Ok(typed_args) => (user_handler)(conn_handle, typed_args).await,
                    Err(e) => {
                        error!(tool_name = %tool_name, error = %e, "Failed to deserialize arguments for tool");
                        Ok(CallToolResult::error(format!(
                            "Invalid arguments for tool '{}': {}",
                            tool_name, e
                        )))
                    }
                }
            })
        });

        self.tools_and_handlers
            .insert(tool.name.clone(), (tool, wrapped));
        self
    }

    /// Registers a resource served at one fixed URI.
    pub fn register_resource<F, Fut>(mut self, resource: Resource, handler: F) -> Self
    where
        F: Fn(ConnectionHandle, ResourceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReadResourceResult>> + Send + 'static,
    {
        let handler: ResourceHandler = Arc::new(move |handle, req| Box::pin(handler(handle, req)));
        self.resources
            .insert(resource.uri.clone(), (resource, handler));
        self
    }

    /// Registers a family of resources addressed by a URI template.
    pub fn register_resource_template<F, Fut>(mut self, template: ResourceTemplate, handler: F) -> Self
    where
        F: Fn(ConnectionHandle, ResourceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ReadResourceResult>> + Send + 'static,
    {
        let parsed = UriTemplate::parse(&template.uri_template);
        let handler: ResourceHandler = Arc::new(move |handle, req| Box::pin(handler(handle, req)));
        self.templates.push((template, parsed, handler));
        self
    }

    /// Registers a prompt. Arguments marked required are checked before the
    /// handler runs.
    pub fn register_prompt<F, Fut>(mut self, prompt: Prompt, handler: F) -> Self
    where
        F: Fn(ConnectionHandle, PromptArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<GetPromptResult>> + Send + 'static,
    {
        let handler: PromptHandler = Arc::new(move |handle, args| Box::pin(handler(handle, args)));
        self.prompts.insert(prompt.name.clone(), (prompt, handler));
        self
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools_and_handlers.keys().map(String::as_str).collect()
    }

    fn capabilities(&self) -> ServerCapabilities {
        let flag = |present: bool| present.then(ListChangedCapability::default);
        ServerCapabilities {
            tools: flag(!self.tools_and_handlers.is_empty()),
            resources: flag(!self.resources.is_empty() || !self.templates.is_empty()),
            prompts: flag(!self.prompts.is_empty()),
        }
    }

    async fn call_tool(&self, params: CallToolParams, handle: ConnectionHandle) -> Result<CallToolResult> {
        let Some((_tool, handler)) = self.tools_and_handlers.get(&params.name) else {
            return Err(Error::JsonRpc(ErrorData::new(
                INVALID_PARAMS,
                format!("Tool '{}' not found", params.name),
            )));
        };

        #[cfg(feature = "schema-validation")]
        crate::protocol::validator::validate_arguments(&params.name, &_tool.input_schema, &params.arguments)?;

        handler(handle, Arc::new(params.arguments)).await
    }

    async fn read_resource(&self, uri: String, handle: ConnectionHandle) -> Result<ReadResourceResult> {
        if let Some((_, handler)) = self.resources.get(&uri) {
            let req = ResourceRequest {
                uri,
                variables: HashMap::new(),
            };
            return handler(handle, req).await;
        }
        for (_, template, handler) in &self.templates {
            if let Some(variables) = template.matches(&uri) {
                return handler(handle, ResourceRequest { uri, variables }).await;
            }
        }
        Err(Error::JsonRpc(ErrorData::new(
            INVALID_PARAMS,
            format!("Resource '{}' not found", uri),
        )))
    }

    async fn get_prompt(&self, params: GetPromptParams, handle: ConnectionHandle) -> Result<GetPromptResult> {
        let Some((prompt, handler)) = self.prompts.get(&params.name) else {
            return Err(Error::JsonRpc(ErrorData::new(
                INVALID_PARAMS,
                format!("Prompt '{}' not found", params.name),
            )));
        };

        let args: PromptArguments = params
            .arguments
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();

        for arg in prompt.arguments.iter().flatten() {
            if arg.required == Some(true) && !args.contains_key(&arg.name) {
                return Err(Error::InvalidParams(format!(
                    "Missing required argument '{}' for prompt '{}'",
                    arg.name, prompt.name
                )));
            }
        }

        handler(handle, args).await
    }
}

/// Deserializes method params, treating an absent `params` as `{}`.
fn parse_params<P: DeserializeOwned>(params: Value) -> std::result::Result<P, ErrorData> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|e| ErrorData::new(INVALID_PARAMS, format!("Invalid params: {}", e)))
}

fn to_result<R: Serialize>(result: Result<R>) -> std::result::Result<Value, ErrorData> {
    let value = result.map_err(into_error_data)?;
    serde_json::to_value(value).map_err(|e| into_error_data(e.into()))
}

/// Message sent for unexpected handler failures; the detail is logged only.
const GENERIC_INTERNAL_ERROR: &str = "Internal error";

/// Maps a handler failure onto the JSON-RPC error the client receives.
pub(crate) fn into_error_data(err: Error) -> ErrorData {
    match err {
        Error::JsonRpc(data) => data,
        Error::InvalidParams(msg) => ErrorData::new(INVALID_PARAMS, msg),
        other => {
            error!(error = %other, "Handler failed");
            ErrorData::new(INTERNAL_ERROR, GENERIC_INTERNAL_ERROR)
        }
    }
}

#[async_trait]
impl RequestHandler for DispatchTable {
    fn initialize(&self, _params: &InitializeRequestParams) -> InitializeResult {
        InitializeResult {
            protocol_version: self.protocol_version.clone(),
            capabilities: self.capabilities(),
            server_info: Implementation {
                name: self.name.clone(),
                version: self.version.clone(),
            },
            instructions: self.instructions.clone(),
        }
    }

    async fn handle(
        &self,
        method: &str,
        params: Value,
        handle: ConnectionHandle,
    ) -> std::result::Result<Value, ErrorData> {
        debug!(method, "Dispatching");
        match method {
            "ping" => Ok(Value::Object(Default::default())),
            "tools/list" => to_result(Ok(ListToolsResult {
                tools: self
                    .tools_and_handlers
                    .values()
                    .map(|(tool, _)| tool.clone())
                    .collect(),
            })),
            "tools/call" => {
                let params: CallToolParams = parse_params(params)?;
                to_result(self.call_tool(params, handle).await)
            }
            "resources/list" => to_result(Ok(ListResourcesResult {
                resources: self.resources.values().map(|(r, _)| r.clone()).collect(),
            })),
            "resources/templates/list" => to_result(Ok(ListResourceTemplatesResult {
                resource_templates: self.templates.iter().map(|(t, _, _)| t.clone()).collect(),
            })),
            "resources/read" => {
                let params: ReadResourceParams = parse_params(params)?;
                to_result(self.read_resource(params.uri, handle).await)
            }
            "prompts/list" => to_result(Ok(ListPromptsResult {
                prompts: self.prompts.values().map(|(p, _)| p.clone()).collect(),
            })),
            "prompts/get" => {
                let params: GetPromptParams = parse_params(params)?;
                to_result(self.get_prompt(params, handle).await)
            }
            unhandled_method => Err(ErrorData::new(
                METHOD_NOT_FOUND,
                format!("Method '{}' not found", unhandled_method),
            )),
        }
    }
}
