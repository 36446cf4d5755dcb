#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Tool call with empty name")]
    EmptyToolName,
    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),
    #[error("MCP connection failed: {0}")]
    McpConnectionFailed(String),
    #[error("MCP tool discovery failed: {0}")]
    McpToolDiscoveryFailed(String),
    #[error("MCP tool execution failed: {0}")]
    McpToolExecutionFailed(String),
    #[error("MCP server URLs must use https")]
    McpInsecureUrl,
    #[error("MCP server host resolves to a private address")]
    McpPrivateIpBlocked,
    #[error("Too many MCP servers in one request (max {max})")]
    McpServerLimitExceeded { max: usize },
    #[error("MCP server '{server}' exposes {count} tools (max {max})")]
    McpToolLimitExceeded {
        server: String,
        count: usize,
        max: usize,
    },
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    #[error("Protocol invariant violated: {0}")]
    InvariantViolation(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}
