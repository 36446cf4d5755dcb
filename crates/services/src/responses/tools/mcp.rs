//! MCP (Model Context Protocol) executor for remote MCP servers.
//!
//! Connects to the servers declared in a request, discovers their tools,
//! and executes calls against them. One executor is created per response
//! and dropped when it completes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use inference_providers::{FunctionDefinition, ToolDefinition};
use rmcp::{
    model::{CallToolRequestParam, CallToolResult},
    service::{RoleClient, RunningService},
    transport::{
        streamable_http_client::StreamableHttpClientTransportConfig, StreamableHttpClientTransport,
    },
    ServiceExt,
};
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::id_prefixes::PREFIX_MCPL;
use crate::responses::errors::ResponseError;
use crate::responses::models::{
    McpApprovalRequirement, McpDiscoveredTool, ResponseOutputItem, ResponseTool,
};

use super::executor::{ToolCallInfo, ToolExecutor, ToolOutput};

/// Maximum number of MCP servers allowed per request
pub const MAX_MCP_SERVERS_PER_REQUEST: usize = 5;

/// Maximum number of tools allowed per MCP server
pub const MAX_TOOLS_PER_SERVER: usize = 50;

/// Timeout for connecting to an MCP server (seconds)
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Timeout for executing a tool on an MCP server (seconds)
pub const TOOL_EXECUTION_TIMEOUT_SECS: u64 = 60;

// ============================================
// MCP Client Trait (mockable)
// ============================================

#[cfg_attr(test, automock)]
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpDiscoveredTool>, ResponseError>;

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, ResponseError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait McpClientFactory: Send + Sync {
    async fn create_client(
        &self,
        server_url: &str,
        authorization: Option<String>,
    ) -> Result<Box<dyn McpClient>, ResponseError>;
}

// ============================================
// Real MCP Client Implementation
// ============================================

pub struct RealMcpClient {
    client: Arc<Mutex<RunningService<RoleClient, ()>>>,
}

#[async_trait]
impl McpClient for RealMcpClient {
    async fn list_tools(&self) -> Result<Vec<McpDiscoveredTool>, ResponseError> {
        let client = self.client.lock().await;
        let tools = timeout(
            Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            client.list_all_tools(),
        )
        .await
        .map_err(|_| ResponseError::McpToolDiscoveryFailed("Timeout listing tools".to_string()))?
        .map_err(|e| ResponseError::McpToolDiscoveryFailed(e.to_string()))?;

        Ok(tools
            .into_iter()
            .map(|t| McpDiscoveredTool {
                name: t.name.to_string(),
                description: t.description.map(|s| s.to_string()),
                input_schema: Some(serde_json::Value::Object(t.input_schema.as_ref().clone())),
            })
            .collect())
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, ResponseError> {
        let args = arguments.as_object().cloned();
        let request = CallToolRequestParam {
            name: tool_name.to_string().into(),
            arguments: args,
            meta: None,
            task: None,
        };

        let client = self.client.lock().await;
        let result = timeout(
            Duration::from_secs(TOOL_EXECUTION_TIMEOUT_SECS),
            client.call_tool(request),
        )
        .await
        .map_err(|_| {
            ResponseError::McpToolExecutionFailed(format!(
                "Timeout after {TOOL_EXECUTION_TIMEOUT_SECS}s"
            ))
        })?
        .map_err(|e| ResponseError::McpToolExecutionFailed(e.to_string()))?;

        Self::extract_tool_result(&result)
    }
}

impl RealMcpClient {
    /// Extract text content from a tool result. Content is an opaque type;
    /// text is pulled out via its JSON serialization.
    fn extract_tool_result(result: &CallToolResult) -> Result<String, ResponseError> {
        let mut texts = Vec::new();

        for content in &result.content {
            if let Ok(value) = serde_json::to_value(content) {
                if let Some(text) = value.get("text").and_then(|v| v.as_str()) {
                    texts.push(text.to_string());
                }
            }
        }

        let output = texts.join("\n");

        if result.is_error.unwrap_or(false) {
            return Err(ResponseError::McpToolExecutionFailed(output));
        }

        Ok(output)
    }
}

#[derive(Default)]
pub struct RealMcpClientFactory;

#[async_trait]
impl McpClientFactory for RealMcpClientFactory {
    async fn create_client(
        &self,
        server_url: &str,
        authorization: Option<String>,
    ) -> Result<Box<dyn McpClient>, ResponseError> {
        debug!("Connecting to MCP server via Streamable HTTP: {}", server_url);

        let mut config = StreamableHttpClientTransportConfig::with_uri(server_url);

        if let Some(auth_header) = &authorization {
            config = config.auth_header(auth_header);
        }

        let transport = StreamableHttpClientTransport::from_config(config);

        let client = timeout(
            Duration::from_secs(CONNECTION_TIMEOUT_SECS),
            ().serve(transport),
        )
        .await
        .map_err(|_| {
            ResponseError::McpConnectionFailed(format!(
                "Initialization timeout after {CONNECTION_TIMEOUT_SECS}s"
            ))
        })?
        .map_err(|e| ResponseError::McpConnectionFailed(e.to_string()))?;

        Ok(Box::new(RealMcpClient {
            client: Arc::new(Mutex::new(client)),
        }))
    }
}

// ============================================
// MCP Tool Executor
// ============================================

/// Connection to a single MCP server
struct McpServerConnection {
    client: Box<dyn McpClient>,
    tools: Vec<McpDiscoveredTool>,
    require_approval: McpApprovalRequirement,
}

/// Per-request MCP executor: holds server connections and the tool -> server
/// mapping, and dispatches fully-qualified `server_label:tool` calls.
pub struct McpToolExecutor {
    client_factory: Arc<dyn McpClientFactory>,
    connections: HashMap<String, McpServerConnection>,
    tool_to_server: HashMap<String, String>,
}

impl McpToolExecutor {
    pub fn new(client_factory: Arc<dyn McpClientFactory>) -> Self {
        Self {
            client_factory,
            connections: HashMap::new(),
            tool_to_server: HashMap::new(),
        }
    }

    /// Connect to the declared MCP servers and discover their tools.
    ///
    /// Servers present in `cached_tools` (recovered from a previous
    /// response) skip the list_tools round trip. Returns one
    /// `mcp_list_tools` output item per freshly discovered server.
    pub async fn connect_servers(
        &mut self,
        mcp_tools: &[&ResponseTool],
        cached_tools: &HashMap<String, Vec<McpDiscoveredTool>>,
    ) -> Result<Vec<ResponseOutputItem>, ResponseError> {
        if mcp_tools.len() > MAX_MCP_SERVERS_PER_REQUEST {
            return Err(ResponseError::McpServerLimitExceeded {
                max: MAX_MCP_SERVERS_PER_REQUEST,
            });
        }

        let mut output_items = Vec::new();

        for tool in mcp_tools {
            let ResponseTool::Mcp {
                server_label,
                server_url,
                authorization,
                require_approval,
                allowed_tools,
            } = tool
            else {
                continue;
            };

            Self::validate_server_url(server_url)?;

            let client = self
                .client_factory
                .create_client(server_url, authorization.clone())
                .await?;

            let tools = if let Some(cached) = cached_tools.get(server_label) {
                debug!(
                    server_label = %server_label,
                    tool_count = cached.len(),
                    "Using cached MCP tools (skipping list_tools call)"
                );
                cached.clone()
            } else {
                let all_tools = client.list_tools().await?;
                debug!(
                    server_label = %server_label,
                    tool_count = all_tools.len(),
                    "Discovered tools from MCP server"
                );

                let tools: Vec<McpDiscoveredTool> = if let Some(allowed) = allowed_tools {
                    all_tools
                        .into_iter()
                        .filter(|t| allowed.contains(&t.name))
                        .collect()
                } else {
                    all_tools
                };

                if tools.len() > MAX_TOOLS_PER_SERVER {
                    return Err(ResponseError::McpToolLimitExceeded {
                        server: server_label.clone(),
                        count: tools.len(),
                        max: MAX_TOOLS_PER_SERVER,
                    });
                }

                output_items.push(ResponseOutputItem::McpListTools {
                    id: format!("{PREFIX_MCPL}{}", uuid::Uuid::new_v4().simple()),
                    server_label: server_label.clone(),
                    tools: tools.clone(),
                });

                tools
            };

            for tool in &tools {
                let fq_name = format!("{server_label}:{}", tool.name);
                self.tool_to_server.insert(fq_name, server_label.clone());
            }

            self.connections.insert(
                server_label.clone(),
                McpServerConnection {
                    client,
                    tools,
                    require_approval: require_approval.clone(),
                },
            );
        }

        Ok(output_items)
    }

    /// Validate server URL: https only, no private/internal hosts
    pub fn validate_server_url(url: &str) -> Result<(), ResponseError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| ResponseError::McpConnectionFailed(format!("Invalid URL: {e}")))?;

        if parsed.scheme() != "https" {
            return Err(ResponseError::McpInsecureUrl);
        }

        if let Some(host) = parsed.host_str() {
            if Self::is_private_host(host) {
                return Err(ResponseError::McpPrivateIpBlocked);
            }
        }

        Ok(())
    }

    fn is_private_host(host: &str) -> bool {
        if host == "localhost"
            || host == "127.0.0.1"
            || host == "::1"
            || host.ends_with(".localhost")
        {
            return true;
        }

        if let Ok(ip) = host.parse::<std::net::IpAddr>() {
            match ip {
                std::net::IpAddr::V4(ipv4) => {
                    ipv4.is_private()
                        || ipv4.is_loopback()
                        || ipv4.is_link_local()
                        || ipv4.is_broadcast()
                        || ipv4.is_unspecified()
                }
                std::net::IpAddr::V6(ipv6) => {
                    ipv6.is_loopback() || ipv6.is_unspecified() || ipv6.is_unique_local()
                }
            }
        } else {
            false
        }
    }

    /// Parse a fully-qualified tool name into (server_label, tool_name)
    pub fn parse_tool_name(tool_name: &str) -> Option<(&str, &str)> {
        tool_name.split_once(':')
    }

    /// Whether executing `tool_name` on `server_label` needs client approval
    pub fn requires_approval(&self, server_label: &str, tool_name: &str) -> bool {
        match self.connections.get(server_label) {
            Some(conn) => conn.require_approval.requires_approval(tool_name),
            // Unknown server: require approval rather than run blind
            None => true,
        }
    }

    /// Definitions for all discovered tools, fully qualified per server
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions = Vec::new();

        for (server_label, conn) in &self.connections {
            for tool in &conn.tools {
                definitions.push(ToolDefinition {
                    type_: "function".to_string(),
                    function: FunctionDefinition {
                        name: format!("{server_label}:{}", tool.name),
                        description: Some(tool.description.clone().unwrap_or_default()),
                        parameters: tool.input_schema.clone().unwrap_or(serde_json::json!({
                            "type": "object",
                            "properties": {}
                        })),
                    },
                });
            }
        }

        definitions
    }

    /// Execute a tool on a connected MCP server
    pub async fn execute_tool(
        &self,
        server_label: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, ResponseError> {
        let conn = self.connections.get(server_label).ok_or_else(|| {
            ResponseError::McpConnectionFailed(format!("Server '{server_label}' not connected"))
        })?;

        debug!(
            server_label = %server_label,
            tool_name = %tool_name,
            "Executing MCP tool"
        );

        conn.client.call_tool(tool_name, arguments).await
    }
}

#[async_trait]
impl ToolExecutor for McpToolExecutor {
    fn name(&self) -> &str {
        "mcp"
    }

    fn can_handle(&self, tool_name: &str) -> bool {
        self.tool_to_server.contains_key(tool_name)
    }

    async fn execute(&self, tool_call: &ToolCallInfo) -> Result<ToolOutput, ResponseError> {
        let (server_label, tool_name) = Self::parse_tool_name(&tool_call.name)
            .ok_or_else(|| ResponseError::UnknownTool(tool_call.name.clone()))?;

        let output = self
            .execute_tool(server_label, tool_name, tool_call.arguments.clone())
            .await?;
        Ok(ToolOutput::Text(output))
    }
}
