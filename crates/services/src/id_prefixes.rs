//! ID prefix constants for resource identifiers.
//!
//! These prefixes are used to create human-readable IDs that follow
//! our naming conventions.

/// Prefix for response IDs
pub const PREFIX_RESP: &str = "resp_";

/// Prefix for message IDs
pub const PREFIX_MSG: &str = "msg_";

/// Prefix for conversation IDs
pub const PREFIX_CONV: &str = "conv_";

/// Prefix for function call IDs
pub const PREFIX_FC: &str = "fc_";

/// Prefix for web search call IDs
pub const PREFIX_WS: &str = "ws_";

/// Prefix for file search call IDs
pub const PREFIX_FS: &str = "fs_";

/// Prefix for MCP call IDs
pub const PREFIX_MCP: &str = "mcp_";

/// Prefix for MCP list-tools IDs
pub const PREFIX_MCPL: &str = "mcpl_";

/// Prefix for MCP approval request IDs
pub const PREFIX_MCPR: &str = "mcpr_";
