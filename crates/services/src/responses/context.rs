//! Per-request state: the immutable request snapshot and the tool view.

use std::collections::{HashMap, HashSet};

use inference_providers::{
    ChatMessage, FunctionDefinition, ResponseFormat, ToolDefinition,
};

use crate::responses::models::{
    McpDiscoveredTool, ResponseInputItem, ResponseOutputItem, ResponseTool,
};
use crate::responses::ports::StoredResponse;

/// Immutable per-request snapshot driving one response generation.
///
/// The message buffer is exclusively owned by the orchestrator for this
/// response; it is appended to across loop iterations and never shared.
pub struct ChatCompletionContext {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub response_format: ResponseFormat,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    /// Full input-item list destined for storage
    pub inputs: Vec<ResponseInputItem>,
    pub tool_context: ToolContext,
}

/// How a model-requested tool call should be dispatched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolKind {
    Function,
    WebSearch,
    FileSearch,
    Mcp { server_label: String, tool: String },
    Unknown,
}

/// An approval decision carried in the new input
#[derive(Debug, Clone)]
pub struct ApprovalResponse {
    pub approval_request_id: String,
    pub approve: bool,
}

/// Tracks which tool definitions are visible this turn and recovers
/// prior-round tool state when chaining from a previous response.
#[derive(Default)]
pub struct ToolContext {
    function_names: HashSet<String>,
    web_search_enabled: bool,
    file_search: Option<(Vec<String>, Option<usize>)>,
    mcp_server_labels: HashSet<String>,
    /// Chat-format definitions for everything except MCP tools, which are
    /// appended after discovery
    chat_tools: Vec<ToolDefinition>,
    /// server_label -> tools recovered from a previous response
    pub previous_mcp_tools: HashMap<String, Vec<McpDiscoveredTool>>,
    pub approval_responses: Vec<ApprovalResponse>,
}

impl ToolContext {
    pub fn new(tools: &[ResponseTool]) -> Self {
        let mut context = Self::default();

        for tool in tools {
            match tool {
                ResponseTool::Function {
                    name,
                    description,
                    parameters,
                } => {
                    context.function_names.insert(name.clone());
                    context.chat_tools.push(ToolDefinition {
                        type_: "function".to_string(),
                        function: FunctionDefinition {
                            name: name.clone(),
                            description: description.clone(),
                            parameters: parameters.clone().unwrap_or_else(|| {
                                serde_json::json!({
                                    "type": "object",
                                    "properties": {}
                                })
                            }),
                        },
                    });
                }
                ResponseTool::WebSearch {} => {
                    context.web_search_enabled = true;
                    context.chat_tools.push(ToolDefinition {
                        type_: "function".to_string(),
                        function: FunctionDefinition {
                            name: "web_search".to_string(),
                            description: Some(
                                "Search the web for current information. Use this when you need up-to-date information or facts that you don't have.".to_string(),
                            ),
                            parameters: serde_json::json!({
                                "type": "object",
                                "properties": {
                                    "query": {
                                        "type": "string",
                                        "description": "The search query to look up"
                                    }
                                },
                                "required": ["query"]
                            }),
                        },
                    });
                }
                ResponseTool::FileSearch {
                    vector_store_ids,
                    max_num_results,
                } => {
                    context.file_search =
                        Some((vector_store_ids.clone(), *max_num_results));
                    context.chat_tools.push(ToolDefinition {
                        type_: "function".to_string(),
                        function: FunctionDefinition {
                            name: "file_search".to_string(),
                            description: Some(
                                "Search through indexed documents. Use this to find information from uploaded files.".to_string(),
                            ),
                            parameters: serde_json::json!({
                                "type": "object",
                                "properties": {
                                    "query": {
                                        "type": "string",
                                        "description": "The search query to look up in files"
                                    }
                                },
                                "required": ["query"]
                            }),
                        },
                    });
                }
                ResponseTool::Mcp { server_label, .. } => {
                    context.mcp_server_labels.insert(server_label.clone());
                }
            }
        }

        context
    }

    /// Recover tool state declared by a previous response so follow-up turns
    /// need not redeclare it.
    pub fn recover_tools_from_previous_response(&mut self, previous: &StoredResponse) {
        let output_items = previous.response.output.iter();
        let input_items = previous.input.iter().filter_map(|item| match item {
            ResponseInputItem::Item(inner) => Some(inner),
            _ => None,
        });

        for item in input_items.chain(output_items) {
            if let ResponseOutputItem::McpListTools {
                server_label,
                tools,
                ..
            } = item
            {
                self.previous_mcp_tools
                    .insert(server_label.clone(), tools.clone());
            }
        }
    }

    /// Record approval decisions supplied in the new input
    pub fn collect_approval_responses(&mut self, input: &[ResponseInputItem]) {
        for item in input {
            if let ResponseInputItem::McpApprovalResponse {
                approval_request_id,
                approve,
            } = item
            {
                self.approval_responses.push(ApprovalResponse {
                    approval_request_id: approval_request_id.clone(),
                    approve: *approve,
                });
            }
        }
    }

    /// Definitions offered to inference, excluding MCP tools (appended by
    /// the MCP executor after discovery)
    pub fn chat_tools(&self) -> &[ToolDefinition] {
        &self.chat_tools
    }

    pub fn file_search_config(&self) -> Option<&(Vec<String>, Option<usize>)> {
        self.file_search.as_ref()
    }

    pub fn has_mcp_servers(&self) -> bool {
        !self.mcp_server_labels.is_empty()
    }

    /// Resolve a model-requested tool name to its dispatch kind
    pub fn classify(&self, tool_name: &str) -> ToolKind {
        if self.function_names.contains(tool_name) {
            return ToolKind::Function;
        }
        if tool_name == "web_search" && self.web_search_enabled {
            return ToolKind::WebSearch;
        }
        if tool_name == "file_search" && self.file_search.is_some() {
            return ToolKind::FileSearch;
        }
        if let Some((server_label, tool)) = tool_name.split_once(':') {
            if self.mcp_server_labels.contains(server_label) {
                return ToolKind::Mcp {
                    server_label: server_label.to_string(),
                    tool: tool.to_string(),
                };
            }
        }
        ToolKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responses::models::{McpApprovalMode, McpApprovalRequirement};

    fn sample_tools() -> Vec<ResponseTool> {
        vec![
            ResponseTool::Function {
                name: "get_weather".to_string(),
                description: Some("Weather lookup".to_string()),
                parameters: None,
            },
            ResponseTool::WebSearch {},
            ResponseTool::Mcp {
                server_label: "deepwiki".to_string(),
                server_url: "https://example.com/mcp".to_string(),
                authorization: None,
                require_approval: McpApprovalRequirement::Simple(McpApprovalMode::Never),
                allowed_tools: None,
            },
        ]
    }

    #[test]
    fn test_classify_resolves_each_kind() {
        let context = ToolContext::new(&sample_tools());

        assert_eq!(context.classify("get_weather"), ToolKind::Function);
        assert_eq!(context.classify("web_search"), ToolKind::WebSearch);
        assert_eq!(
            context.classify("deepwiki:read_wiki"),
            ToolKind::Mcp {
                server_label: "deepwiki".to_string(),
                tool: "read_wiki".to_string()
            }
        );
        // file_search was not configured
        assert_eq!(context.classify("file_search"), ToolKind::Unknown);
        assert_eq!(context.classify("other:tool"), ToolKind::Unknown);
        assert_eq!(context.classify("nope"), ToolKind::Unknown);
    }

    #[test]
    fn test_chat_tools_exclude_mcp_until_discovery() {
        let context = ToolContext::new(&sample_tools());
        let names: Vec<_> = context
            .chat_tools()
            .iter()
            .map(|t| t.function.name.as_str())
            .collect();
        assert_eq!(names, vec!["get_weather", "web_search"]);
    }

    #[test]
    fn test_collect_approval_responses() {
        let mut context = ToolContext::new(&[]);
        context.collect_approval_responses(&[ResponseInputItem::McpApprovalResponse {
            approval_request_id: "mcpr_1".to_string(),
            approve: true,
        }]);
        assert_eq!(context.approval_responses.len(), 1);
        assert!(context.approval_responses[0].approve);
    }
}
