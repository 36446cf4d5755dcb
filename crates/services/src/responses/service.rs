//! Response service: request validation, previous-response chaining,
//! stream creation, persistence, and conversation sync.
//!
//! One orchestrator instance is constructed per response; the service wires
//! its event stream to storage so persistence happens even when the
//! consumer abandons the stream early.

use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use inference_providers::{
    ChatMessage, FunctionCall, InferenceProvider, JsonSchema, MessageRole, ResponseFormat,
    ToolCall,
};

use crate::conversations::models::ConversationId;
use crate::conversations::ports::ConversationServiceTrait;
use crate::id_prefixes::{PREFIX_MSG, PREFIX_RESP};
use crate::responses::context::{ChatCompletionContext, ToolContext};
use crate::responses::errors::ResponseError;
use crate::responses::models::{
    extract_guardrail_ids, CreateResponseRequest, ListInputItemsPage, ListResponsesPage,
    MessageContent, Order, ResponseDeleteResult, ResponseInput, ResponseInputItem,
    ResponseObject, ResponseOutputItem, ResponseStatus, ResponseStreamEvent, ResponseTextConfig,
    ResponseTextFormat, ResponseTool,
};
use crate::responses::ports::{
    ResponseRepositoryTrait, SafetyProviderTrait, StoredResponse, ToolRuntimeTrait,
};
use crate::responses::safety::SafetyGate;
use crate::responses::service_helpers::{EventEmitter, ResponseStreamContext};
use crate::responses::streaming::StreamingResponseOrchestrator;
use crate::responses::tools::executor::ToolRegistry;
use crate::responses::tools::file_search::FileSearchToolExecutor;
use crate::responses::tools::function::FunctionToolExecutor;
use crate::responses::tools::mcp::{McpClientFactory, McpToolExecutor};
use crate::responses::tools::web_search::WebSearchToolExecutor;
use crate::responses::tools::{FileSearchProviderTrait, WebSearchProviderTrait};

pub type ResponseEventStream = Pin<Box<dyn Stream<Item = ResponseStreamEvent> + Send>>;

const DEFAULT_MAX_INFER_ITERS: usize = 10;

pub struct ResponseServiceImpl {
    inference: Arc<dyn InferenceProvider>,
    repository: Arc<dyn ResponseRepositoryTrait>,
    conversation_service: Arc<dyn ConversationServiceTrait>,
    safety_provider: Option<Arc<dyn SafetyProviderTrait>>,
    tool_runtime: Option<Arc<dyn ToolRuntimeTrait>>,
    web_search_provider: Option<Arc<dyn WebSearchProviderTrait>>,
    file_search_provider: Option<Arc<dyn FileSearchProviderTrait>>,
    mcp_client_factory: Arc<dyn McpClientFactory>,
}

impl ResponseServiceImpl {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inference: Arc<dyn InferenceProvider>,
        repository: Arc<dyn ResponseRepositoryTrait>,
        conversation_service: Arc<dyn ConversationServiceTrait>,
        safety_provider: Option<Arc<dyn SafetyProviderTrait>>,
        tool_runtime: Option<Arc<dyn ToolRuntimeTrait>>,
        web_search_provider: Option<Arc<dyn WebSearchProviderTrait>>,
        file_search_provider: Option<Arc<dyn FileSearchProviderTrait>>,
        mcp_client_factory: Arc<dyn McpClientFactory>,
    ) -> Self {
        Self {
            inference,
            repository,
            conversation_service,
            safety_provider,
            tool_runtime,
            web_search_provider,
            file_search_provider,
            mcp_client_factory,
        }
    }

    /// Create a response and return its ordered event stream.
    ///
    /// Validation, chaining resolution, and safety-check validation happen
    /// here, synchronously, before any event exists; backend failures after
    /// this point are encoded into the stream as a failed terminal event.
    pub async fn create_response_stream(
        &self,
        request: CreateResponseRequest,
    ) -> Result<ResponseEventStream, ResponseError> {
        request.validate().map_err(ResponseError::InvalidParams)?;

        let check_ids = extract_guardrail_ids(request.guardrails.as_ref());
        let safety = SafetyGate::new(self.safety_provider.clone(), check_ids);
        safety.validate_check_ids().await?;

        let new_input = normalize_input(request.input.clone());

        // Conversation-backed continuation: verify the conversation exists
        // and fold its stored items in front of the new input.
        let conversation_id = match &request.conversation {
            Some(conversation) => {
                let id = ConversationId::from_str(conversation)
                    .map_err(|e| ResponseError::InvalidParams(e.to_string()))?;
                if self
                    .conversation_service
                    .get_conversation(&id)
                    .await
                    .map_err(|e| ResponseError::InternalError(e.to_string()))?
                    .is_none()
                {
                    return Err(ResponseError::NotFound(conversation.clone()));
                }
                Some(id)
            }
            None => None,
        };

        let tools = request.tools.clone().unwrap_or_default();
        let mut tool_context = ToolContext::new(&tools);
        tool_context.collect_approval_responses(&new_input);

        // Previous-response chaining: stored raw messages are reused
        // verbatim and only the new increment is converted; without them
        // the full message list is reconstructed from the input items.
        let (all_input, mut messages) = match &request.previous_response_id {
            Some(previous_id) => {
                let previous = self
                    .repository
                    .get(previous_id)
                    .await
                    .map_err(|e| ResponseError::InternalError(e.to_string()))?
                    .ok_or_else(|| ResponseError::NotFound(previous_id.clone()))?;

                tool_context.recover_tools_from_previous_response(&previous);

                let mut all_input = previous.input.clone();
                all_input.extend(
                    previous
                        .response
                        .output
                        .iter()
                        .cloned()
                        .map(ResponseInputItem::Item),
                );
                all_input.extend(new_input.clone());

                let messages = if previous.messages.is_empty() {
                    convert_input_to_messages(&all_input)
                } else {
                    let mut messages = previous.messages.clone();
                    messages.extend(convert_input_to_messages(&new_input));
                    messages
                };
                (all_input, messages)
            }
            None => {
                let mut all_input = Vec::new();
                if let Some(id) = &conversation_id {
                    let context_items = self
                        .conversation_service
                        .list_items(id, Order::Asc)
                        .await
                        .map_err(|e| ResponseError::InternalError(e.to_string()))?;
                    all_input.extend(context_items);
                }
                all_input.extend(new_input.clone());
                let messages = convert_input_to_messages(&all_input);
                (all_input, messages)
            }
        };

        if let Some(instructions) = &request.instructions {
            messages.insert(0, ChatMessage::text(MessageRole::System, instructions));
        }

        let mut registry = ToolRegistry::new();
        if let Some(runtime) = &self.tool_runtime {
            let executor = FunctionToolExecutor::new(runtime.clone(), &tools);
            if !executor.is_empty() {
                registry.register(Arc::new(executor));
            }
        }
        if let Some(provider) = &self.web_search_provider {
            registry.register(Arc::new(WebSearchToolExecutor::new(provider.clone())));
        }
        if let Some(provider) = &self.file_search_provider {
            if let Some((vector_store_ids, max_num_results)) =
                tool_context.file_search_config().cloned()
            {
                registry.register(Arc::new(FileSearchToolExecutor::new(
                    provider.clone(),
                    vector_store_ids,
                    max_num_results,
                )));
            }
        }

        let text = request.text.clone().unwrap_or_default();
        let ctx = ChatCompletionContext {
            model: request.model.clone(),
            messages,
            response_format: convert_text_format(&text),
            temperature: request.temperature,
            top_p: request.top_p,
            inputs: all_input.clone(),
            tool_context,
        };

        let response_id = format!("{PREFIX_RESP}{}", uuid::Uuid::new_v4().simple());
        let created_at = chrono::Utc::now().timestamp();
        tracing::info!(response_id = %response_id, model = %request.model, "Creating response");

        let orchestrator = StreamingResponseOrchestrator {
            inference: self.inference.clone(),
            ctx,
            response_id: response_id.clone(),
            created_at,
            text,
            max_infer_iters: request.max_infer_iters.unwrap_or(DEFAULT_MAX_INFER_ITERS),
            safety,
            registry,
            mcp: McpToolExecutor::new(self.mcp_client_factory.clone()),
            response_tools: tools,
            tool_choice: request.tool_choice.clone(),
            instructions: request.instructions.clone(),
            previous_response_id: request.previous_response_id.clone(),
            metadata: request.metadata.clone(),
        };

        let (tx, rx) = mpsc::unbounded::<ResponseStreamEvent>();
        let repository = self.repository.clone();
        let conversation_service = self.conversation_service.clone();
        let store_enabled = request.store.unwrap_or(true);
        let sync_input = new_input;

        tokio::spawn(async move {
            let mut emitter = EventEmitter::new(tx);
            let mut sctx = ResponseStreamContext::new(response_id.clone());

            match orchestrator.run(&mut emitter, &mut sctx).await {
                Ok(outcome) => {
                    let status = outcome.response.status;
                    // Persisting a failed response as a success would
                    // corrupt chaining; failed responses are never stored.
                    if store_enabled && status != ResponseStatus::Failed {
                        let stored = StoredResponse {
                            response: outcome.response.clone(),
                            input: all_input,
                            messages: outcome.final_messages,
                        };
                        if let Err(e) = repository.put(stored).await {
                            tracing::error!(response_id = %response_id, "Failed to store response: {e}");
                        }
                    }

                    if let Some(conversation_id) = &conversation_id {
                        if matches!(
                            status,
                            ResponseStatus::Completed | ResponseStatus::Incomplete
                        ) {
                            sync_response_to_conversation(
                                conversation_service.as_ref(),
                                conversation_id,
                                sync_input,
                                &outcome.response,
                            )
                            .await;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(response_id = %response_id, "Response stream aborted: {e}");
                }
            }
        });

        Ok(Box::pin(rx))
    }

    /// Create a response and collapse the stream into the terminal object.
    pub async fn create_response(
        &self,
        request: CreateResponseRequest,
    ) -> Result<ResponseObject, ResponseError> {
        let mut stream = self.create_response_stream(request).await?;

        let mut final_response: Option<ResponseObject> = None;
        let mut failed_response: Option<ResponseObject> = None;

        while let Some(event) = stream.next().await {
            match &event {
                ResponseStreamEvent::Completed { response, .. }
                | ResponseStreamEvent::Incomplete { response, .. } => {
                    if final_response.is_some() {
                        return Err(ResponseError::InvariantViolation(
                            "the response stream produced multiple terminal responses"
                                .to_string(),
                        ));
                    }
                    final_response = Some(response.clone());
                }
                ResponseStreamEvent::Failed { response, .. } => {
                    failed_response = Some(response.clone());
                }
                _ => {}
            }
        }

        if let Some(failed) = failed_response {
            let message = failed
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "Response stream failed without error details".to_string());
            return Err(ResponseError::InferenceFailed(message));
        }

        final_response.ok_or_else(|| {
            ResponseError::InvariantViolation(
                "the response stream never reached a terminal state".to_string(),
            )
        })
    }

    pub async fn get_response(&self, response_id: &str) -> Result<ResponseObject, ResponseError> {
        let stored = self
            .repository
            .get(response_id)
            .await
            .map_err(|e| ResponseError::InternalError(e.to_string()))?
            .ok_or_else(|| ResponseError::NotFound(response_id.to_string()))?;
        Ok(stored.response)
    }

    pub async fn list_responses(
        &self,
        after: Option<String>,
        limit: Option<usize>,
        model: Option<String>,
        order: Order,
    ) -> Result<ListResponsesPage, ResponseError> {
        self.repository
            .list(after, limit.unwrap_or(50), model, order)
            .await
            .map_err(|e| ResponseError::InternalError(e.to_string()))
    }

    pub async fn list_response_input_items(
        &self,
        response_id: &str,
        limit: Option<usize>,
        order: Order,
    ) -> Result<ListInputItemsPage, ResponseError> {
        let stored = self
            .repository
            .get(response_id)
            .await
            .map_err(|e| ResponseError::InternalError(e.to_string()))?
            .ok_or_else(|| ResponseError::NotFound(response_id.to_string()))?;

        let mut items = stored.input;
        if order == Order::Desc {
            items.reverse();
        }
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(ListInputItemsPage {
            object: "list".to_string(),
            data: items,
        })
    }

    pub async fn delete_response(
        &self,
        response_id: &str,
    ) -> Result<ResponseDeleteResult, ResponseError> {
        let deleted = self
            .repository
            .delete(response_id)
            .await
            .map_err(|e| ResponseError::InternalError(e.to_string()))?;
        if !deleted {
            return Err(ResponseError::NotFound(response_id.to_string()));
        }
        Ok(ResponseDeleteResult {
            id: response_id.to_string(),
            object: "response".to_string(),
            deleted: true,
        })
    }
}

/// Normalize the request input into the stored item form, synthesizing
/// message items (and ids) where the caller supplied free text.
fn normalize_input(input: Option<ResponseInput>) -> Vec<ResponseInputItem> {
    match input {
        None => vec![],
        Some(ResponseInput::Text(text)) => {
            vec![ResponseInputItem::Item(ResponseOutputItem::Message {
                id: format!("{PREFIX_MSG}{}", uuid::Uuid::new_v4().simple()),
                role: "user".to_string(),
                content: MessageContent::Text(text),
                status: Default::default(),
            })]
        }
        Some(ResponseInput::Items(items)) => items
            .into_iter()
            .map(|item| match item {
                ResponseInputItem::Item(ResponseOutputItem::Message {
                    id,
                    role,
                    content,
                    status,
                }) => {
                    let id = if id.is_empty() {
                        format!("{PREFIX_MSG}{}", uuid::Uuid::new_v4().simple())
                    } else {
                        id
                    };
                    ResponseInputItem::Item(ResponseOutputItem::Message {
                        id,
                        role,
                        content,
                        status,
                    })
                }
                other => other,
            })
            .collect(),
    }
}

fn role_from_str(role: &str) -> MessageRole {
    match role {
        "system" => MessageRole::System,
        "assistant" => MessageRole::Assistant,
        "tool" => MessageRole::Tool,
        _ => MessageRole::User,
    }
}

/// Reconstruct the provider message list from response input items.
fn convert_input_to_messages(items: &[ResponseInputItem]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    for item in items {
        match item {
            ResponseInputItem::Item(ResponseOutputItem::Message { role, content, .. }) => {
                let text = content.text();
                if !text.is_empty() {
                    messages.push(ChatMessage::text(role_from_str(role), text));
                }
            }
            ResponseInputItem::Item(ResponseOutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            }) => {
                messages.push(ChatMessage {
                    role: MessageRole::Assistant,
                    content: None,
                    name: None,
                    tool_call_id: None,
                    tool_calls: Some(vec![ToolCall {
                        id: call_id.clone(),
                        type_: "function".to_string(),
                        function: FunctionCall {
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    }]),
                });
            }
            ResponseInputItem::Item(ResponseOutputItem::McpCall {
                id,
                server_label,
                name,
                arguments,
                output,
                ..
            }) => {
                messages.push(ChatMessage {
                    role: MessageRole::Assistant,
                    content: None,
                    name: None,
                    tool_call_id: None,
                    tool_calls: Some(vec![ToolCall {
                        id: id.clone(),
                        type_: "function".to_string(),
                        function: FunctionCall {
                            name: format!("{server_label}:{name}"),
                            arguments: arguments.clone(),
                        },
                    }]),
                });
                if let Some(output) = output {
                    messages.push(ChatMessage::tool_result(id, output));
                }
            }
            ResponseInputItem::FunctionCallOutput { call_id, output } => {
                messages.push(ChatMessage::tool_result(call_id, output));
            }
            // Search calls already contributed their results as tool
            // messages in the raw buffer; approval traffic never reaches
            // the model directly
            ResponseInputItem::Item(_) | ResponseInputItem::McpApprovalResponse { .. } => {}
        }
    }

    messages
}

fn convert_text_format(text: &ResponseTextConfig) -> ResponseFormat {
    match &text.format {
        ResponseTextFormat::Text => ResponseFormat::Text,
        ResponseTextFormat::JsonObject => ResponseFormat::JsonObject,
        ResponseTextFormat::JsonSchema { name, schema } => ResponseFormat::JsonSchema {
            json_schema: JsonSchema {
                name: name.clone(),
                description: None,
                schema: schema.clone(),
                strict: Some(true),
            },
        },
    }
}

/// Sync the new user input and the assistant output back to a conversation.
async fn sync_response_to_conversation(
    conversation_service: &dyn ConversationServiceTrait,
    conversation_id: &ConversationId,
    sync_input: Vec<ResponseInputItem>,
    response: &ResponseObject,
) {
    let mut items = sync_input;
    for output_item in &response.output {
        if let ResponseOutputItem::Message { role, .. } = output_item {
            if role == "assistant" {
                items.push(ResponseInputItem::Item(output_item.clone()));
            }
        }
    }

    if items.is_empty() {
        return;
    }
    if let Err(e) = conversation_service.add_items(conversation_id, items).await {
        tracing::error!(conversation_id = %conversation_id, "Failed to sync conversation: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::service::InMemoryConversationService;
    use crate::responses::models::{
        GuardrailSpec, McpApprovalMode, McpApprovalRequirement, ResponseContentPart,
    };
    use crate::responses::ports::{
        ModerationResult, SafetyViolation, ToolRuntimeError,
    };
    use crate::responses::store::InMemoryResponseRepository;
    use crate::responses::tools::mcp::{
        McpClient, MockMcpClient, MockMcpClientFactory, RealMcpClientFactory,
    };
    use crate::responses::models::McpDiscoveredTool;
    use async_trait::async_trait;
    use inference_providers::{MockProvider, TurnTemplate};

    struct StubToolRuntime;

    #[async_trait]
    impl ToolRuntimeTrait for StubToolRuntime {
        async fn execute(
            &self,
            tool_name: &str,
            _arguments: serde_json::Value,
        ) -> Result<serde_json::Value, ToolRuntimeError> {
            match tool_name {
                "get_weather" => Ok(serde_json::json!({"result": 42})),
                other => Err(ToolRuntimeError::NotRegistered(other.to_string())),
            }
        }
    }

    /// Safety backend that flags inputs containing a marker string and
    /// moderates output text the same way.
    struct StubSafetyProvider {
        marker: String,
    }

    #[async_trait]
    impl SafetyProviderTrait for StubSafetyProvider {
        async fn list_checks(&self) -> Vec<String> {
            vec!["llama-guard".to_string()]
        }

        async fn run_check(
            &self,
            check_id: &str,
            messages: &[ChatMessage],
        ) -> anyhow::Result<Option<SafetyViolation>> {
            let flagged = messages
                .iter()
                .filter_map(|m| m.content.as_deref())
                .any(|c| c.contains(&self.marker));
            Ok(flagged.then(|| SafetyViolation {
                check_id: check_id.to_string(),
                message: "Content violates safety guidelines".to_string(),
            }))
        }

        async fn run_moderation(&self, text: &str) -> anyhow::Result<ModerationResult> {
            Ok(ModerationResult {
                flagged: text.contains(&self.marker),
                categories: vec!["violence".to_string()],
            })
        }
    }

    struct Harness {
        provider: Arc<MockProvider>,
        repository: Arc<InMemoryResponseRepository>,
        conversations: Arc<InMemoryConversationService>,
        service: ResponseServiceImpl,
    }

    fn harness_with(
        safety: Option<Arc<dyn SafetyProviderTrait>>,
        mcp_factory: Option<Arc<dyn McpClientFactory>>,
    ) -> Harness {
        let provider = Arc::new(MockProvider::new());
        let repository = Arc::new(InMemoryResponseRepository::new());
        let conversations = Arc::new(InMemoryConversationService::new());
        let service = ResponseServiceImpl::new(
            provider.clone(),
            repository.clone(),
            conversations.clone(),
            safety,
            Some(Arc::new(StubToolRuntime)),
            None,
            None,
            mcp_factory.unwrap_or_else(|| Arc::new(RealMcpClientFactory)),
        );
        Harness {
            provider,
            repository,
            conversations,
            service,
        }
    }

    fn harness() -> Harness {
        harness_with(None, None)
    }

    fn request(model: &str, input: &str) -> CreateResponseRequest {
        CreateResponseRequest {
            model: model.to_string(),
            input: Some(ResponseInput::Text(input.to_string())),
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

    async fn collect(stream: ResponseEventStream) -> Vec<ResponseStreamEvent> {
        stream.collect().await
    }

    fn assert_contiguous_from_one(events: &[ResponseStreamEvent]) {
        let sequence: Vec<u64> = events.iter().map(|e| e.sequence_number()).collect();
        let expected: Vec<u64> = (1..=events.len() as u64).collect();
        assert_eq!(sequence, expected, "sequence numbers must be 1..n with no gaps");
    }

    fn terminal_count(events: &[ResponseStreamEvent]) -> usize {
        events.iter().filter(|e| e.is_terminal()).count()
    }

    #[tokio::test]
    async fn test_hello_scenario() {
        let h = harness();
        h.provider.enqueue(TurnTemplate::text("Hello there, human"));

        let stream = h
            .service
            .create_response_stream(request("test-model", "Hello"))
            .await
            .unwrap();
        let events = collect(stream).await;

        assert_contiguous_from_one(&events);
        assert_eq!(terminal_count(&events), 1);
        assert!(matches!(events.first(), Some(ResponseStreamEvent::Created { .. })));
        assert!(matches!(events.last(), Some(ResponseStreamEvent::Completed { .. })));

        // Deltas concatenate to the final output text
        let delta_text: String = events
            .iter()
            .filter_map(|e| match e {
                ResponseStreamEvent::OutputTextDelta { delta, .. } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(delta_text, "Hello there, human");

        let final_response = events.last().unwrap().response().unwrap();
        assert_eq!(final_response.status, ResponseStatus::Completed);
        assert_eq!(final_response.output.len(), 1);
        assert_eq!(final_response.output_text(), "Hello there, human");
        assert!(final_response.usage.total_tokens > 0);

        // Stored and reloadable by id
        let stored = h
            .repository
            .get(&final_response.id)
            .await
            .unwrap()
            .expect("terminal response must be stored");
        assert_eq!(stored.response.output_text(), final_response.output_text());
        assert_eq!(stored.input.len(), 1);
        // user input + assistant reply in the raw buffer
        assert_eq!(stored.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_non_streaming_collapse() {
        let h = harness();
        h.provider.enqueue(TurnTemplate::text("collapsed"));

        let response = h
            .service
            .create_response(request("test-model", "Hi"))
            .await
            .unwrap();
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.output_text(), "collapsed");
    }

    #[tokio::test]
    async fn test_function_call_round_trip() {
        let h = harness();
        h.provider.enqueue(TurnTemplate::tool_call(
            "get_weather",
            serde_json::json!({"location": "Paris"}),
        ));
        h.provider
            .enqueue(TurnTemplate::text("It is sunny in Paris"));

        let mut req = request("test-model", "Weather in Paris?");
        req.tools = Some(vec![ResponseTool::Function {
            name: "get_weather".to_string(),
            description: Some("Look up weather".to_string()),
            parameters: Some(serde_json::json!({
                "type": "object",
                "properties": {"location": {"type": "string"}}
            })),
        }]);

        let stream = h.service.create_response_stream(req).await.unwrap();
        let events = collect(stream).await;

        assert_contiguous_from_one(&events);
        assert_eq!(terminal_count(&events), 1);
        // Two inference rounds: the tool round and the final answer
        assert_eq!(h.provider.call_count(), 2);

        // item added -> item done pair for the function call
        let added = events.iter().any(|e| {
            matches!(e, ResponseStreamEvent::OutputItemAdded {
                item: ResponseOutputItem::FunctionCall { name, .. }, ..
            } if name == "get_weather")
        });
        let done = events.iter().any(|e| {
            matches!(e, ResponseStreamEvent::OutputItemDone {
                item: ResponseOutputItem::FunctionCall { arguments, .. }, ..
            } if arguments.contains("Paris"))
        });
        assert!(added && done);

        let final_response = events.last().unwrap().response().unwrap();
        assert_eq!(final_response.status, ResponseStatus::Completed);
        assert!(final_response
            .output
            .iter()
            .any(|i| matches!(i, ResponseOutputItem::FunctionCall { .. })));
        assert_eq!(final_response.output_text(), "It is sunny in Paris");

        // The executor result was folded into the second round's context
        let stored = h.repository.get(&final_response.id).await.unwrap().unwrap();
        let tool_message = stored
            .messages
            .iter()
            .find(|m| m.role == MessageRole::Tool)
            .expect("tool result message must be in the raw buffer");
        assert!(tool_message.content.as_deref().unwrap().contains("42"));
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_0"));
    }

    #[tokio::test]
    async fn test_input_refusal_emits_exactly_two_events() {
        let h = harness_with(
            Some(Arc::new(StubSafetyProvider {
                marker: "FORBIDDEN".to_string(),
            })),
            None,
        );

        let mut req = request("test-model", "FORBIDDEN question");
        req.guardrails = Some(vec![GuardrailSpec::Id("llama-guard".to_string())]);

        let stream = h.service.create_response_stream(req).await.unwrap();
        let events = collect(stream).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ResponseStreamEvent::Created { .. }));
        assert!(matches!(events[1], ResponseStreamEvent::Completed { .. }));
        assert_contiguous_from_one(&events);

        // No inference call was made
        assert_eq!(h.provider.call_count(), 0);

        let response = events[1].response().unwrap();
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.output.len(), 1);
        match &response.output[0] {
            ResponseOutputItem::Message { content, role, .. } => {
                assert_eq!(role, "assistant");
                match content {
                    MessageContent::Parts(parts) => {
                        assert_eq!(parts.len(), 1);
                        assert!(matches!(
                            &parts[0],
                            ResponseContentPart::Refusal { refusal }
                                if refusal == "Content violates safety guidelines"
                        ));
                    }
                    other => panic!("Expected parts, got: {other:?}"),
                }
            }
            other => panic!("Expected message, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_output_refusal_forces_completed() {
        let h = harness_with(
            Some(Arc::new(StubSafetyProvider {
                marker: "RADIOACTIVE".to_string(),
            })),
            None,
        );
        h.provider
            .enqueue(TurnTemplate::text("Totally RADIOACTIVE answer"));

        let mut req = request("test-model", "innocent question");
        req.guardrails = Some(vec![GuardrailSpec::Id("llama-guard".to_string())]);

        let stream = h.service.create_response_stream(req).await.unwrap();
        let events = collect(stream).await;

        assert_contiguous_from_one(&events);
        let response = events.last().unwrap().response().unwrap();
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.output.len(), 1);
        match &response.output[0] {
            ResponseOutputItem::Message { content, .. } => match content {
                MessageContent::Parts(parts) => {
                    assert!(matches!(parts[0], ResponseContentPart::Refusal { .. }));
                }
                other => panic!("Expected parts, got: {other:?}"),
            },
            other => panic!("Expected message, got: {other:?}"),
        }
        // Refusal ladder: refusal.delta then refusal.done
        assert!(events
            .iter()
            .any(|e| matches!(e, ResponseStreamEvent::RefusalDelta { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ResponseStreamEvent::RefusalDone { .. })));
    }

    #[tokio::test]
    async fn test_unknown_guardrail_rejected_before_inference() {
        let h = harness_with(
            Some(Arc::new(StubSafetyProvider {
                marker: "x".to_string(),
            })),
            None,
        );

        let mut req = request("test-model", "hello");
        req.guardrails = Some(vec![GuardrailSpec::Id("no-such-check".to_string())]);

        let result = h.service.create_response_stream(req).await;
        assert!(matches!(result, Err(ResponseError::InvalidParams(_))));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_yields_incomplete() {
        let h = harness();
        h.provider.set_default_turn(TurnTemplate::tool_call(
            "get_weather",
            serde_json::json!({"location": "Paris"}),
        ));

        let mut req = request("test-model", "Weather?");
        req.tools = Some(vec![ResponseTool::Function {
            name: "get_weather".to_string(),
            description: None,
            parameters: None,
        }]);
        req.max_infer_iters = Some(1);

        let stream = h.service.create_response_stream(req).await.unwrap();
        let events = collect(stream).await;

        assert_eq!(h.provider.call_count(), 1);
        assert!(matches!(events.last(), Some(ResponseStreamEvent::Incomplete { .. })));

        let response = events.last().unwrap().response().unwrap();
        assert_eq!(response.status, ResponseStatus::Incomplete);
        assert_eq!(
            response.incomplete_details.as_ref().unwrap().reason,
            "max_infer_iters"
        );
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_sanitized() {
        let h = harness();
        h.provider.enqueue(
            TurnTemplate::text("partial").with_stream_error("model 'x' not found"),
        );

        let stream = h
            .service
            .create_response_stream(request("test-model", "hi"))
            .await
            .unwrap();
        let events = collect(stream).await;

        let last = events.last().unwrap();
        assert!(matches!(last, ResponseStreamEvent::Failed { .. }));
        let response = last.response().unwrap();
        assert_eq!(response.status, ResponseStatus::Failed);
        let error = response.error.as_ref().unwrap();
        assert_eq!(error.code, "MODEL_NOT_FOUND");
        assert_eq!(error.message, "Requested model 'x' is unavailable.");

        // Failed responses are never persisted
        assert!(h.repository.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_model_fails_before_first_delta() {
        let provider = Arc::new(MockProvider::with_models(vec!["known"]));
        let repository = Arc::new(InMemoryResponseRepository::new());
        let conversations = Arc::new(InMemoryConversationService::new());
        let service = ResponseServiceImpl::new(
            provider.clone(),
            repository.clone(),
            conversations,
            None,
            None,
            None,
            None,
            Arc::new(RealMcpClientFactory),
        );

        let result = service.create_response(request("missing-model", "hi")).await;
        match result {
            Err(ResponseError::InferenceFailed(message)) => {
                assert_eq!(message, "Requested model 'missing-model' is unavailable.");
            }
            other => panic!("Expected InferenceFailed, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chaining_concatenates_input_output_new() {
        let h = harness();
        h.provider.enqueue(TurnTemplate::text("First answer"));

        let a = h
            .service
            .create_response(request("test-model", "First question"))
            .await
            .unwrap();

        h.provider.enqueue(TurnTemplate::text("Second answer"));
        let mut req_b = request("test-model", "Second question");
        req_b.previous_response_id = Some(a.id.clone());
        let b = h.service.create_response(req_b).await.unwrap();

        let stored_a = h.repository.get(&a.id).await.unwrap().unwrap();
        let stored_b = h.repository.get(&b.id).await.unwrap().unwrap();

        // B.input == A.input ++ A.output ++ B.new
        assert_eq!(
            stored_b.input.len(),
            stored_a.input.len() + a.output.len() + 1
        );
        let texts: Vec<String> = stored_b
            .input
            .iter()
            .filter_map(|item| match item {
                ResponseInputItem::Item(ResponseOutputItem::Message { content, .. }) => {
                    Some(content.text())
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            texts,
            vec!["First question", "First answer", "Second question"]
        );

        // Raw messages reused verbatim plus the new increment
        assert_eq!(stored_b.messages.len(), stored_a.messages.len() + 2);
        assert_eq!(b.previous_response_id.as_deref(), Some(a.id.as_str()));
    }

    #[tokio::test]
    async fn test_chaining_unknown_previous_id_is_not_found() {
        let h = harness();
        let mut req = request("test-model", "hi");
        req.previous_response_id = Some("resp_doesnotexist".to_string());

        let result = h.service.create_response_stream(req).await;
        assert!(matches!(result, Err(ResponseError::NotFound(_))));
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_conflicting_continuations_rejected() {
        let h = harness();
        let mut req = request("test-model", "hi");
        req.previous_response_id = Some("resp_a".to_string());
        req.conversation = Some("conv_b".to_string());

        let result = h.service.create_response_stream(req).await;
        assert!(matches!(result, Err(ResponseError::InvalidParams(_))));
    }

    #[tokio::test]
    async fn test_conversation_context_and_sync() {
        let h = harness();
        let conversation_id = h.conversations.create_conversation(serde_json::json!({}));

        h.provider.enqueue(TurnTemplate::text("Nice to meet you"));
        let mut req = request("test-model", "I am Ada");
        req.conversation = Some(conversation_id.to_string());

        let stream = h.service.create_response_stream(req).await.unwrap();
        let _ = collect(stream).await;

        let items = h
            .conversations
            .list_items(&conversation_id, Order::Asc)
            .await
            .unwrap();
        // user input + assistant reply synced back
        assert_eq!(items.len(), 2);

        // A follow-up turn sees the prior context
        h.provider.enqueue(TurnTemplate::text("You said you are Ada"));
        let mut req = request("test-model", "What did I say?");
        req.conversation = Some(conversation_id.to_string());
        let b = h.service.create_response(req).await.unwrap();
        assert_eq!(b.output_text(), "You said you are Ada");

        let stored_b = h.repository.get(&b.id).await.unwrap().unwrap();
        // context (2) + new input (1) stored for the follow-up
        assert_eq!(stored_b.input.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_not_found() {
        let h = harness();
        let mut req = request("test-model", "hi");
        req.conversation = Some(format!("conv_{}", uuid::Uuid::new_v4().simple()));

        let result = h.service.create_response_stream(req).await;
        assert!(matches!(result, Err(ResponseError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_store_false_skips_persistence() {
        let h = harness();
        h.provider.enqueue(TurnTemplate::text("ephemeral"));

        let mut req = request("test-model", "hi");
        req.store = Some(false);
        let stream = h.service.create_response_stream(req).await.unwrap();
        let events = collect(stream).await;

        assert!(matches!(events.last(), Some(ResponseStreamEvent::Completed { .. })));
        assert!(h.repository.is_empty());
    }

    #[tokio::test]
    async fn test_reasoning_parts_are_streamed_and_recorded() {
        let h = harness();
        h.provider.enqueue(
            TurnTemplate::text("The answer is 4").with_reasoning("2 plus 2 makes 4"),
        );

        let stream = h
            .service
            .create_response_stream(request("test-model", "2+2?"))
            .await
            .unwrap();
        let events = collect(stream).await;

        assert!(events
            .iter()
            .any(|e| matches!(e, ResponseStreamEvent::ReasoningTextDelta { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ResponseStreamEvent::ReasoningTextDone { .. })));

        let response = events.last().unwrap().response().unwrap();
        match &response.output[0] {
            ResponseOutputItem::Message { content: MessageContent::Parts(parts), .. } => {
                assert!(matches!(parts[0], ResponseContentPart::ReasoningText { .. }));
                assert!(matches!(parts[1], ResponseContentPart::OutputText { .. }));
            }
            other => panic!("Expected message with parts, got: {other:?}"),
        }
        // Reasoning never leaks into output_text
        assert_eq!(response.output_text(), "The answer is 4");
    }

    #[tokio::test]
    async fn test_get_list_delete_surface() {
        let h = harness();
        h.provider.enqueue(TurnTemplate::text("one"));
        let a = h
            .service
            .create_response(request("test-model", "q1"))
            .await
            .unwrap();

        let fetched = h.service.get_response(&a.id).await.unwrap();
        assert_eq!(fetched.id, a.id);

        let page = h
            .service
            .list_responses(None, None, None, Order::Asc)
            .await
            .unwrap();
        assert_eq!(page.data.len(), 1);

        let items = h
            .service
            .list_response_input_items(&a.id, None, Order::Asc)
            .await
            .unwrap();
        assert_eq!(items.data.len(), 1);

        let deleted = h.service.delete_response(&a.id).await.unwrap();
        assert!(deleted.deleted);
        assert!(matches!(
            h.service.get_response(&a.id).await,
            Err(ResponseError::NotFound(_))
        ));
    }

    fn mcp_factory(tools: Vec<McpDiscoveredTool>) -> Arc<dyn McpClientFactory> {
        let mut factory = MockMcpClientFactory::new();
        factory.expect_create_client().returning(move |_, _| {
            let tools = tools.clone();
            let mut client = MockMcpClient::new();
            client
                .expect_list_tools()
                .returning(move || Ok(tools.clone()));
            client
                .expect_call_tool()
                .returning(|name, _| Ok(format!("wiki content for {name}")));
            Ok(Box::new(client) as Box<dyn McpClient>)
        });
        Arc::new(factory)
    }

    fn wiki_tool(approval: McpApprovalMode) -> ResponseTool {
        ResponseTool::Mcp {
            server_label: "wiki".to_string(),
            server_url: "https://example.com/mcp".to_string(),
            authorization: None,
            require_approval: McpApprovalRequirement::Simple(approval),
            allowed_tools: None,
        }
    }

    fn discovered_wiki_tools() -> Vec<McpDiscoveredTool> {
        vec![McpDiscoveredTool {
            name: "read_wiki".to_string(),
            description: Some("Read a wiki page".to_string()),
            input_schema: Some(serde_json::json!({"type": "object"})),
        }]
    }

    #[tokio::test]
    async fn test_mcp_discovery_and_call() {
        let h = harness_with(None, Some(mcp_factory(discovered_wiki_tools())));
        h.provider.enqueue(TurnTemplate::tool_call(
            "wiki:read_wiki",
            serde_json::json!({"page": "Rust"}),
        ));
        h.provider.enqueue(TurnTemplate::text("According to the wiki..."));

        let mut req = request("test-model", "Look up Rust");
        req.tools = Some(vec![wiki_tool(McpApprovalMode::Never)]);

        let stream = h.service.create_response_stream(req).await.unwrap();
        let events = collect(stream).await;

        assert_contiguous_from_one(&events);
        assert!(events
            .iter()
            .any(|e| matches!(e, ResponseStreamEvent::McpListToolsCompleted { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, ResponseStreamEvent::McpCallCompleted { .. })));

        let response = events.last().unwrap().response().unwrap();
        assert_eq!(response.status, ResponseStatus::Completed);
        assert!(response
            .output
            .iter()
            .any(|i| matches!(i, ResponseOutputItem::McpListTools { .. })));
        let mcp_call = response
            .output
            .iter()
            .find_map(|i| match i {
                ResponseOutputItem::McpCall { output, .. } => output.clone(),
                _ => None,
            })
            .expect("mcp_call item with output");
        assert!(mcp_call.contains("wiki content for read_wiki"));
    }

    #[tokio::test]
    async fn test_mcp_approval_round_trip() {
        let h = harness_with(None, Some(mcp_factory(discovered_wiki_tools())));

        // Turn 1: the call needs approval, so the response completes with an
        // approval request and no tool execution
        h.provider.enqueue(TurnTemplate::tool_call(
            "wiki:read_wiki",
            serde_json::json!({"page": "Rust"}),
        ));
        let mut req_a = request("test-model", "Look up Rust");
        req_a.tools = Some(vec![wiki_tool(McpApprovalMode::Always)]);
        let a = h.service.create_response(req_a).await.unwrap();

        assert_eq!(a.status, ResponseStatus::Completed);
        let approval_request_id = a
            .output
            .iter()
            .find_map(|i| match i {
                ResponseOutputItem::McpApprovalRequest { id, .. } => Some(id.clone()),
                _ => None,
            })
            .expect("approval request in output");
        assert!(!a
            .output
            .iter()
            .any(|i| matches!(i, ResponseOutputItem::McpCall { .. })));

        // Turn 2: the approval arrives; the call executes before inference
        h.provider.enqueue(TurnTemplate::text("Done reading"));
        let mut req_b = request("test-model", "");
        req_b.input = Some(ResponseInput::Items(vec![
            ResponseInputItem::McpApprovalResponse {
                approval_request_id,
                approve: true,
            },
        ]));
        req_b.previous_response_id = Some(a.id.clone());
        req_b.tools = Some(vec![wiki_tool(McpApprovalMode::Always)]);
        let b = h.service.create_response(req_b).await.unwrap();

        assert_eq!(b.status, ResponseStatus::Completed);
        let executed = b
            .output
            .iter()
            .find_map(|i| match i {
                ResponseOutputItem::McpCall { output, .. } => output.clone(),
                _ => None,
            })
            .expect("approved call executed");
        assert!(executed.contains("wiki content for read_wiki"));
        // Tools were recovered from the previous response, not re-listed
        assert!(!b
            .output
            .iter()
            .any(|i| matches!(i, ResponseOutputItem::McpListTools { .. })));
    }

    #[tokio::test]
    async fn test_early_abandonment_still_persists() {
        let h = harness();
        h.provider.enqueue(TurnTemplate::text("persisted anyway"));

        let mut stream = h
            .service
            .create_response_stream(request("test-model", "hi"))
            .await
            .unwrap();
        // Read one event, then drop the stream
        let first = stream.next().await.unwrap();
        assert!(matches!(first, ResponseStreamEvent::Created { .. }));
        drop(stream);

        // The driving task finishes and persists regardless
        let mut stored = false;
        for _ in 0..50 {
            if !h.repository.is_empty() {
                stored = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(stored, "response must be persisted after consumer abandonment");
    }
}
