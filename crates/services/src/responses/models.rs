// ============================================
// Response Domain Models (Services Layer)
// ============================================

use std::collections::HashSet;

use inference_providers::TokenUsage;
use serde::{Deserialize, Serialize};

/// Request to create a response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResponseRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<ResponseInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<ResponseTextConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponseTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ResponseToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_infer_iters: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guardrails: Option<Vec<GuardrailSpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CreateResponseRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model cannot be empty".to_string());
        }

        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err("temperature must be between 0.0 and 2.0".to_string());
            }
        }

        if let Some(top_p) = self.top_p {
            if top_p <= 0.0 || top_p > 1.0 {
                return Err("top_p must be between 0.0 and 1.0".to_string());
            }
        }

        if let Some(max_iters) = self.max_infer_iters {
            if max_iters == 0 {
                return Err("max_infer_iters must be greater than 0".to_string());
            }
        }

        // Mutually exclusive continuation mechanisms
        if self.conversation.is_some() && self.previous_response_id.is_some() {
            return Err(
                "Cannot specify both conversation and previous_response_id".to_string(),
            );
        }

        if let Some(conversation) = &self.conversation {
            if !conversation.starts_with(crate::id_prefixes::PREFIX_CONV) {
                return Err(format!("Invalid conversation ID: {conversation}"));
            }
        }

        Ok(())
    }
}

/// Input for a response - free text or a list of items
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseInput {
    Text(String),
    Items(Vec<ResponseInputItem>),
}

/// Single input item.
///
/// Output items from a previous response may be re-presented as input when
/// chaining; the two extra variants carry client-supplied continuations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseInputItem {
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
    #[serde(rename = "mcp_approval_response")]
    McpApprovalResponse {
        approval_request_id: String,
        approve: bool,
    },
    #[serde(untagged)]
    Item(ResponseOutputItem),
}

/// Safety check reference - a bare id or a spec object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GuardrailSpec {
    Id(String),
    Spec {
        #[serde(rename = "type")]
        type_: String,
    },
}

/// Flatten guardrail references into their check ids
pub fn extract_guardrail_ids(guardrails: Option<&Vec<GuardrailSpec>>) -> Vec<String> {
    match guardrails {
        Some(specs) => specs
            .iter()
            .map(|spec| match spec {
                GuardrailSpec::Id(id) => id.clone(),
                GuardrailSpec::Spec { type_ } => type_.clone(),
            })
            .collect(),
        None => vec![],
    }
}

/// Tool configuration for responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseTool {
    #[serde(rename = "function")]
    Function {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        parameters: Option<serde_json::Value>,
    },
    #[serde(rename = "web_search")]
    WebSearch {},
    #[serde(rename = "file_search")]
    FileSearch {
        vector_store_ids: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_num_results: Option<usize>,
    },
    #[serde(rename = "mcp")]
    Mcp {
        server_label: String,
        server_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        authorization: Option<String>,
        #[serde(default)]
        require_approval: McpApprovalRequirement,
        #[serde(skip_serializing_if = "Option::is_none")]
        allowed_tools: Option<Vec<String>>,
    },
}

/// Approval requirement for MCP tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpApprovalRequirement {
    Simple(McpApprovalMode),
    Granular { never: McpToolNameFilter },
}

impl Default for McpApprovalRequirement {
    fn default() -> Self {
        Self::Simple(McpApprovalMode::Always)
    }
}

impl McpApprovalRequirement {
    pub fn requires_approval(&self, tool_name: &str) -> bool {
        match self {
            Self::Simple(McpApprovalMode::Always) => true,
            Self::Simple(McpApprovalMode::Never) => false,
            Self::Granular { never } => !never.tool_names.contains(tool_name),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpApprovalMode {
    Always,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolNameFilter {
    pub tool_names: HashSet<String>,
}

/// Tool discovered on a remote MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpDiscoveredTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

/// Tool choice configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseToolChoice {
    Auto(String), // "auto", "none", "required"
    Specific {
        #[serde(rename = "type")]
        type_: String,
        function: ResponseToolChoiceFunction,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseToolChoiceFunction {
    pub name: String,
}

/// Text format configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseTextConfig {
    pub format: ResponseTextFormat,
}

impl Default for ResponseTextConfig {
    fn default() -> Self {
        Self {
            format: ResponseTextFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseTextFormat {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "json_object")]
    JsonObject,
    #[serde(rename = "json_schema")]
    JsonSchema {
        name: String,
        schema: serde_json::Value,
    },
}

/// Complete response object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseObject {
    pub id: String,
    pub object: String, // "response"
    pub created_at: i64,
    pub model: String,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incomplete_details: Option<ResponseIncompleteDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub output: Vec<ResponseOutputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    pub text: ResponseTextConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ResponseToolChoice>,
    pub tools: Vec<ResponseTool>,
    pub usage: Usage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ResponseObject {
    /// Concatenated text of all assistant output_text parts
    pub fn output_text(&self) -> String {
        let mut text = String::new();
        for item in &self.output {
            if let ResponseOutputItem::Message { content, .. } = item {
                text.push_str(&content.text());
            }
        }
        text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Incomplete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseIncompleteDetails {
    pub reason: String,
}

/// Output item from a response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseOutputItem {
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        id: String,
        role: String,
        content: MessageContent,
        #[serde(default)]
        status: ResponseItemStatus,
    },
    #[serde(rename = "function_call")]
    FunctionCall {
        id: String,
        call_id: String,
        name: String,
        arguments: String,
        status: ResponseItemStatus,
    },
    #[serde(rename = "web_search_call")]
    WebSearchCall {
        id: String,
        status: ResponseItemStatus,
        action: WebSearchAction,
    },
    #[serde(rename = "file_search_call")]
    FileSearchCall {
        id: String,
        status: ResponseItemStatus,
        queries: Vec<String>,
        #[serde(default)]
        results: Vec<FileSearchResult>,
    },
    #[serde(rename = "mcp_call")]
    McpCall {
        id: String,
        server_label: String,
        name: String,
        arguments: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "mcp_list_tools")]
    McpListTools {
        id: String,
        server_label: String,
        tools: Vec<McpDiscoveredTool>,
    },
    #[serde(rename = "mcp_approval_request")]
    McpApprovalRequest {
        id: String,
        server_label: String,
        name: String,
        arguments: String,
    },
}

impl ResponseOutputItem {
    /// Get the ID of the output item
    pub fn id(&self) -> &str {
        match self {
            Self::Message { id, .. } => id,
            Self::FunctionCall { id, .. } => id,
            Self::WebSearchCall { id, .. } => id,
            Self::FileSearchCall { id, .. } => id,
            Self::McpCall { id, .. } => id,
            Self::McpListTools { id, .. } => id,
            Self::McpApprovalRequest { id, .. } => id,
        }
    }
}

/// Web search action details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WebSearchAction {
    #[serde(rename = "search")]
    Search { query: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseItemStatus {
    InProgress,
    Completed,
    Failed,
}

impl Default for ResponseItemStatus {
    fn default() -> Self {
        Self::Completed
    }
}

/// Result from a file search, recorded on the file_search_call item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSearchResult {
    pub file_id: String,
    pub file_name: String,
    pub content: String,
    pub relevance_score: f32,
}

/// Message content - plain text (inputs) or ordered parts (outputs)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ResponseContentPart>),
}

impl MessageContent {
    /// Concatenated text across all text-bearing parts
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ResponseContentPart::OutputText { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Content part of a message output item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseContentPart {
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(rename = "refusal")]
    Refusal { refusal: String },
    #[serde(rename = "reasoning_text")]
    ReasoningText { text: String },
}

// ============================================
// Usage Models
// ============================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub total_tokens: i32,
}

impl Usage {
    pub fn new(input_tokens: i32, output_tokens: i32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Fold one completion round's token usage into the response total
    pub fn add(&mut self, usage: &TokenUsage) {
        self.input_tokens += usage.prompt_tokens;
        self.output_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
    }
}

// ============================================
// Listing / deletion
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponsesPage {
    pub object: String, // "list"
    pub data: Vec<ResponseObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListInputItemsPage {
    pub object: String, // "list"
    pub data: Vec<ResponseInputItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseDeleteResult {
    pub id: String,
    pub object: String, // "response"
    pub deleted: bool,
}

// ============================================
// Response Streaming Event Types
// ============================================

/// One event of the ordered response stream.
///
/// Every variant carries the response-global `sequence_number`; exactly one
/// terminal variant (completed / incomplete / failed) ends a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponseStreamEvent {
    #[serde(rename = "response.created")]
    Created {
        sequence_number: u64,
        response: ResponseObject,
    },
    #[serde(rename = "response.in_progress")]
    InProgress {
        sequence_number: u64,
        response: ResponseObject,
    },
    #[serde(rename = "response.completed")]
    Completed {
        sequence_number: u64,
        response: ResponseObject,
    },
    #[serde(rename = "response.incomplete")]
    Incomplete {
        sequence_number: u64,
        response: ResponseObject,
    },
    #[serde(rename = "response.failed")]
    Failed {
        sequence_number: u64,
        response: ResponseObject,
    },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        sequence_number: u64,
        output_index: usize,
        item: ResponseOutputItem,
    },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        sequence_number: u64,
        output_index: usize,
        item: ResponseOutputItem,
    },
    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
        content_index: usize,
        part: ResponseContentPart,
    },
    #[serde(rename = "response.content_part.done")]
    ContentPartDone {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
        content_index: usize,
        part: ResponseContentPart,
    },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
        content_index: usize,
        delta: String,
    },
    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
        content_index: usize,
        text: String,
    },
    #[serde(rename = "response.refusal.delta")]
    RefusalDelta {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
        content_index: usize,
        delta: String,
    },
    #[serde(rename = "response.refusal.done")]
    RefusalDone {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
        content_index: usize,
        refusal: String,
    },
    #[serde(rename = "response.reasoning_text.delta")]
    ReasoningTextDelta {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
        content_index: usize,
        delta: String,
    },
    #[serde(rename = "response.reasoning_text.done")]
    ReasoningTextDone {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
        content_index: usize,
        text: String,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
        arguments: String,
    },
    #[serde(rename = "response.web_search_call.in_progress")]
    WebSearchCallInProgress {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
    },
    #[serde(rename = "response.web_search_call.searching")]
    WebSearchCallSearching {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
    },
    #[serde(rename = "response.web_search_call.completed")]
    WebSearchCallCompleted {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
    },
    #[serde(rename = "response.file_search_call.in_progress")]
    FileSearchCallInProgress {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
    },
    #[serde(rename = "response.file_search_call.searching")]
    FileSearchCallSearching {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
    },
    #[serde(rename = "response.file_search_call.completed")]
    FileSearchCallCompleted {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
    },
    #[serde(rename = "response.mcp_list_tools.in_progress")]
    McpListToolsInProgress { sequence_number: u64 },
    #[serde(rename = "response.mcp_list_tools.completed")]
    McpListToolsCompleted { sequence_number: u64 },
    #[serde(rename = "response.mcp_list_tools.failed")]
    McpListToolsFailed { sequence_number: u64 },
    #[serde(rename = "response.mcp_call.in_progress")]
    McpCallInProgress {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
    },
    #[serde(rename = "response.mcp_call_arguments.delta")]
    McpCallArgumentsDelta {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
        delta: String,
    },
    #[serde(rename = "response.mcp_call_arguments.done")]
    McpCallArgumentsDone {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
        arguments: String,
    },
    #[serde(rename = "response.mcp_call.completed")]
    McpCallCompleted {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
    },
    #[serde(rename = "response.mcp_call.failed")]
    McpCallFailed {
        sequence_number: u64,
        item_id: String,
        output_index: usize,
    },
}

impl ResponseStreamEvent {
    pub fn sequence_number(&self) -> u64 {
        match self {
            Self::Created { sequence_number, .. }
            | Self::InProgress { sequence_number, .. }
            | Self::Completed { sequence_number, .. }
            | Self::Incomplete { sequence_number, .. }
            | Self::Failed { sequence_number, .. }
            | Self::OutputItemAdded { sequence_number, .. }
            | Self::OutputItemDone { sequence_number, .. }
            | Self::ContentPartAdded { sequence_number, .. }
            | Self::ContentPartDone { sequence_number, .. }
            | Self::OutputTextDelta { sequence_number, .. }
            | Self::OutputTextDone { sequence_number, .. }
            | Self::RefusalDelta { sequence_number, .. }
            | Self::RefusalDone { sequence_number, .. }
            | Self::ReasoningTextDelta { sequence_number, .. }
            | Self::ReasoningTextDone { sequence_number, .. }
            | Self::FunctionCallArgumentsDelta { sequence_number, .. }
            | Self::FunctionCallArgumentsDone { sequence_number, .. }
            | Self::WebSearchCallInProgress { sequence_number, .. }
            | Self::WebSearchCallSearching { sequence_number, .. }
            | Self::WebSearchCallCompleted { sequence_number, .. }
            | Self::FileSearchCallInProgress { sequence_number, .. }
            | Self::FileSearchCallSearching { sequence_number, .. }
            | Self::FileSearchCallCompleted { sequence_number, .. }
            | Self::McpListToolsInProgress { sequence_number }
            | Self::McpListToolsCompleted { sequence_number }
            | Self::McpListToolsFailed { sequence_number }
            | Self::McpCallInProgress { sequence_number, .. }
            | Self::McpCallArgumentsDelta { sequence_number, .. }
            | Self::McpCallArgumentsDone { sequence_number, .. }
            | Self::McpCallCompleted { sequence_number, .. }
            | Self::McpCallFailed { sequence_number, .. } => *sequence_number,
        }
    }

    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Incomplete { .. } | Self::Failed { .. }
        )
    }

    /// The response snapshot carried by lifecycle events
    pub fn response(&self) -> Option<&ResponseObject> {
        match self {
            Self::Created { response, .. }
            | Self::InProgress { response, .. }
            | Self::Completed { response, .. }
            | Self::Incomplete { response, .. }
            | Self::Failed { response, .. } => Some(response),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_request() -> CreateResponseRequest {
        CreateResponseRequest {
            model: "test-model".to_string(),
            input: Some(ResponseInput::Text("Hello".to_string())),
            instructions: None,
            conversation: None,
            previous_response_id: None,
            store: None,
            stream: None,
            temperature: None,
            top_p: None,
            text: None,
            tools: None,
            tool_choice: None,
            max_infer_iters: None,
            guardrails: None,
            metadata: None,
        }
    }

    #[test]
    fn test_validate_rejects_conflicting_continuations() {
        let mut request = minimal_request();
        request.conversation = Some("conv_abc".to_string());
        request.previous_response_id = Some("resp_abc".to_string());
        let err = request.validate().unwrap_err();
        assert!(err.contains("previous_response_id"));
    }

    #[test]
    fn test_validate_rejects_bad_conversation_prefix() {
        let mut request = minimal_request();
        request.conversation = Some("abc".to_string());
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_model() {
        let mut request = minimal_request();
        request.model = "  ".to_string();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_validate_sampling_ranges() {
        let mut request = minimal_request();
        request.temperature = Some(3.0);
        assert!(request.validate().is_err());

        let mut request = minimal_request();
        request.top_p = Some(0.0);
        assert!(request.validate().is_err());

        let mut request = minimal_request();
        request.temperature = Some(0.7);
        request.top_p = Some(0.9);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_extract_guardrail_ids_from_strings() {
        let guardrails = vec![
            GuardrailSpec::Id("llama-guard".to_string()),
            GuardrailSpec::Id("content-filter".to_string()),
        ];
        assert_eq!(
            extract_guardrail_ids(Some(&guardrails)),
            vec!["llama-guard", "content-filter"]
        );
    }

    #[test]
    fn test_extract_guardrail_ids_mixed_formats() {
        let guardrails = vec![
            GuardrailSpec::Id("llama-guard".to_string()),
            GuardrailSpec::Spec {
                type_: "content-filter".to_string(),
            },
        ];
        assert_eq!(
            extract_guardrail_ids(Some(&guardrails)),
            vec!["llama-guard", "content-filter"]
        );
    }

    #[test]
    fn test_extract_guardrail_ids_none_input() {
        assert!(extract_guardrail_ids(None).is_empty());
    }

    #[test]
    fn test_guardrail_spec_deserializes_both_forms() {
        let parsed: Vec<GuardrailSpec> =
            serde_json::from_str(r#"["llama-guard", {"type": "nsfw-detector"}]"#).unwrap();
        assert_eq!(
            extract_guardrail_ids(Some(&parsed)),
            vec!["llama-guard", "nsfw-detector"]
        );
    }

    #[test]
    fn test_output_item_tagging() {
        let item = ResponseOutputItem::WebSearchCall {
            id: "ws_1".to_string(),
            status: ResponseItemStatus::Completed,
            action: WebSearchAction::Search {
                query: "rust".to_string(),
            },
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "web_search_call");
        assert_eq!(json["action"]["type"], "search");

        let parsed: ResponseOutputItem = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.id(), "ws_1");
    }

    #[test]
    fn test_input_item_accepts_output_items_and_continuations() {
        let items: Vec<ResponseInputItem> = serde_json::from_str(
            r#"[
                {"type": "message", "role": "user", "content": "hi"},
                {"type": "function_call_output", "call_id": "call_1", "output": "42"},
                {"type": "mcp_approval_response", "approval_request_id": "mcpr_1", "approve": true}
            ]"#,
        )
        .unwrap();

        assert!(matches!(
            items[0],
            ResponseInputItem::Item(ResponseOutputItem::Message { .. })
        ));
        assert!(matches!(
            items[1],
            ResponseInputItem::FunctionCallOutput { .. }
        ));
        assert!(matches!(
            items[2],
            ResponseInputItem::McpApprovalResponse { approve: true, .. }
        ));
    }

    #[test]
    fn test_stream_event_tags_and_helpers() {
        let event = ResponseStreamEvent::OutputTextDelta {
            sequence_number: 7,
            item_id: "msg_1".to_string(),
            output_index: 0,
            content_index: 0,
            delta: "He".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "response.output_text.delta");
        assert_eq!(event.sequence_number(), 7);
        assert!(!event.is_terminal());
        assert!(event.response().is_none());
    }

    #[test]
    fn test_message_content_text_accumulates_output_text_only() {
        let content = MessageContent::Parts(vec![
            ResponseContentPart::ReasoningText {
                text: "thinking".to_string(),
            },
            ResponseContentPart::OutputText {
                text: "Hello ".to_string(),
            },
            ResponseContentPart::OutputText {
                text: "world".to_string(),
            },
        ]);
        assert_eq!(content.text(), "Hello world");
    }

    #[test]
    fn test_usage_accumulates_rounds() {
        let mut usage = Usage::default();
        usage.add(&TokenUsage::new(10, 5));
        usage.add(&TokenUsage::new(7, 3));
        assert_eq!(usage.input_tokens, 17);
        assert_eq!(usage.output_tokens, 8);
        assert_eq!(usage.total_tokens, 25);
    }

    #[test]
    fn test_approval_requirement_modes() {
        let always = McpApprovalRequirement::Simple(McpApprovalMode::Always);
        assert!(always.requires_approval("anything"));

        let never = McpApprovalRequirement::Simple(McpApprovalMode::Never);
        assert!(!never.requires_approval("anything"));

        let mut names = HashSet::new();
        names.insert("safe_tool".to_string());
        let granular = McpApprovalRequirement::Granular {
            never: McpToolNameFilter { tool_names: names },
        };
        assert!(!granular.requires_approval("safe_tool"));
        assert!(granular.requires_approval("dangerous_tool"));
    }
}
