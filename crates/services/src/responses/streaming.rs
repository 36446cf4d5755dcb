//! Streaming response orchestrator.
//!
//! Drives the iterate/infer/act loop for one response: translates inference
//! deltas into ordered stream events, dispatches tool calls, brackets the
//! loop with safety checks, and emits exactly one terminal event.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future;
use futures::StreamExt;
use inference_providers::{
    ChatCompletionParams, ChatMessage, CompletionError, FunctionCall, InferenceProvider,
    MessageRole, StreamDelta, StreamingResult, ToolCall, ToolChoice, ToolDefinition,
};

use crate::id_prefixes::{PREFIX_FC, PREFIX_FS, PREFIX_MCP, PREFIX_MCPR, PREFIX_MSG, PREFIX_WS};
use crate::responses::context::{ChatCompletionContext, ToolContext, ToolKind};
use crate::responses::errors::ResponseError;
use crate::responses::models::{
    MessageContent, ResponseContentPart, ResponseIncompleteDetails, ResponseInputItem,
    ResponseItemStatus, ResponseObject, ResponseOutputItem, ResponseStatus, ResponseTextConfig,
    ResponseToolChoice, WebSearchAction,
};
use crate::responses::models::{ResponseErrorDetail, ResponseStreamEvent, ResponseTool};
use crate::responses::ports::SafetyViolation;
use crate::responses::safety::SafetyGate;
use crate::responses::sanitizer::sanitize_or_generic;
use crate::responses::service_helpers::{EventEmitter, ResponseStreamContext};
use crate::responses::tools::executor::{ToolCallInfo, ToolOutput, ToolRegistry};
use crate::responses::tools::mcp::McpToolExecutor;

/// Result of driving one response to its terminal state
pub struct OrchestratorOutcome {
    pub response: ResponseObject,
    /// The rolling provider-message buffer as of termination, persisted so
    /// chained turns can reuse it without reconversion
    pub final_messages: Vec<ChatMessage>,
}

pub struct StreamingResponseOrchestrator {
    pub inference: Arc<dyn InferenceProvider>,
    pub ctx: ChatCompletionContext,
    pub response_id: String,
    pub created_at: i64,
    pub text: ResponseTextConfig,
    pub max_infer_iters: usize,
    pub safety: SafetyGate,
    pub registry: ToolRegistry,
    pub mcp: McpToolExecutor,
    pub response_tools: Vec<ResponseTool>,
    pub tool_choice: Option<ResponseToolChoice>,
    pub instructions: Option<String>,
    pub previous_response_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// One tool call requested by the completed turn, waiting for dispatch
struct PendingToolCall {
    call_id: String,
    name: String,
    arguments: String,
    kind: ToolKind,
    item_id: Option<String>,
    output_index: Option<usize>,
    requires_approval: bool,
}

struct TurnResult {
    text: String,
    tool_calls: Vec<PendingToolCall>,
}

enum TurnOutcome {
    Finished(TurnResult),
    BackendError(CompletionError),
}

/// Per-call outcome of the concurrent execution phase
enum CallResult {
    Skipped,
    Output(ToolOutput),
    Error(ResponseError),
}

struct RoundCall {
    pending: PendingToolCall,
    item_id: String,
    output_index: usize,
    parsed: Option<ToolCallInfo>,
    execute: bool,
}

/// Accumulator for one in-flight content part
struct PartAcc {
    content_index: usize,
    text: String,
    closed: bool,
}

/// Accumulator for one in-flight tool call
struct ToolCallAcc {
    call_id: String,
    name: String,
    arguments: String,
    kind: ToolKind,
    item_id: Option<String>,
    output_index: Option<usize>,
    requires_approval: bool,
    args_closed: bool,
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}{}", uuid::Uuid::new_v4().simple())
}

fn to_chat_tool_choice(choice: &ResponseToolChoice) -> ToolChoice {
    match choice {
        ResponseToolChoice::Auto(s) => ToolChoice::String(s.clone()),
        ResponseToolChoice::Specific { type_, function } => ToolChoice::Function {
            type_: type_.clone(),
            function: inference_providers::FunctionChoice {
                name: function.name.clone(),
            },
        },
    }
}

impl StreamingResponseOrchestrator {
    /// Drive the response to a terminal state, emitting the ordered event
    /// stream through `emitter`. Exactly one terminal event is emitted; the
    /// returned outcome carries the terminal response for persistence.
    pub async fn run(
        mut self,
        emitter: &mut EventEmitter,
        sctx: &mut ResponseStreamContext,
    ) -> Result<OrchestratorOutcome, ResponseError> {
        // Input-side safety runs before any inference call; a violation
        // short-circuits to a created/completed refusal pair.
        match self.safety.check_messages(&self.ctx.messages).await {
            Ok(None) => {}
            Ok(Some(violation)) => return self.emit_refusal_response(violation, emitter, sctx),
            Err(e) => return self.emit_failed(&e.to_string(), vec![], emitter, sctx),
        }

        let initial = self.make_response(sctx, ResponseStatus::InProgress, vec![], None, None);
        emitter.send(ResponseStreamEvent::Created {
            sequence_number: sctx.next_sequence(),
            response: initial.clone(),
        })?;
        emitter.send(ResponseStreamEvent::InProgress {
            sequence_number: sctx.next_sequence(),
            response: initial,
        })?;

        let mut output_items: Vec<ResponseOutputItem> = Vec::new();

        // MCP discovery happens once, before the loop; recovered tools from
        // a chained response skip the list_tools round trip.
        if self.ctx.tool_context.has_mcp_servers() {
            let mcp_tools: Vec<&ResponseTool> = self
                .response_tools
                .iter()
                .filter(|t| matches!(t, ResponseTool::Mcp { .. }))
                .collect();
            emitter.send(ResponseStreamEvent::McpListToolsInProgress {
                sequence_number: sctx.next_sequence(),
            })?;
            match self
                .mcp
                .connect_servers(&mcp_tools, &self.ctx.tool_context.previous_mcp_tools)
                .await
            {
                Ok(items) => {
                    emitter.send(ResponseStreamEvent::McpListToolsCompleted {
                        sequence_number: sctx.next_sequence(),
                    })?;
                    for item in items {
                        let output_index = sctx.next_output_index();
                        emitter.send(ResponseStreamEvent::OutputItemAdded {
                            sequence_number: sctx.next_sequence(),
                            output_index,
                            item: item.clone(),
                        })?;
                        emitter.send(ResponseStreamEvent::OutputItemDone {
                            sequence_number: sctx.next_sequence(),
                            output_index,
                            item: item.clone(),
                        })?;
                        output_items.push(item);
                    }
                }
                Err(e) => {
                    emitter.send(ResponseStreamEvent::McpListToolsFailed {
                        sequence_number: sctx.next_sequence(),
                    })?;
                    return self.emit_failed(&e.to_string(), output_items, emitter, sctx);
                }
            }
        }

        let mcp = Arc::new(std::mem::replace(
            &mut self.mcp,
            McpToolExecutor::new(Arc::new(
                crate::responses::tools::mcp::RealMcpClientFactory,
            )),
        ));
        self.registry.register(mcp.clone());

        // Approval decisions carried in the new input execute (or fold a
        // denial) before the first inference round.
        Self::resolve_pending_approvals(
            &mcp,
            &self.ctx.tool_context,
            &self.ctx.inputs,
            &mut self.ctx.messages,
            emitter,
            sctx,
            &mut output_items,
        )
        .await?;

        let chat_tools: Vec<ToolDefinition> = self
            .ctx
            .tool_context
            .chat_tools()
            .iter()
            .cloned()
            .chain(mcp.tool_definitions())
            .collect();

        let mut incomplete = false;

        for iteration in 0..self.max_infer_iters {
            tracing::debug!(iteration, response_id = %self.response_id, "Inference round");

            let params = self.chat_params(&chat_tools);
            let stream = match self.inference.complete(params).await {
                Ok(stream) => stream,
                Err(e) => return self.emit_failed(&e.to_string(), output_items, emitter, sctx),
            };

            let outcome = Self::process_turn(
                &self.ctx.tool_context,
                &mcp,
                stream,
                emitter,
                sctx,
                &mut output_items,
            )
            .await?;
            let turn = match outcome {
                TurnOutcome::Finished(turn) => turn,
                TurnOutcome::BackendError(e) => {
                    return self.emit_failed(&e.to_string(), output_items, emitter, sctx)
                }
            };

            // Fold the assistant turn into the rolling buffer. Calls pending
            // approval are excluded so the buffer never holds a tool call
            // without a matching result.
            let assistant_tool_calls: Vec<ToolCall> = turn
                .tool_calls
                .iter()
                .filter(|c| !c.requires_approval)
                .map(|c| ToolCall {
                    id: c.call_id.clone(),
                    type_: "function".to_string(),
                    function: FunctionCall {
                        name: c.name.clone(),
                        arguments: c.arguments.clone(),
                    },
                })
                .collect();
            if !turn.text.is_empty() || !assistant_tool_calls.is_empty() {
                self.ctx.messages.push(ChatMessage {
                    role: MessageRole::Assistant,
                    content: if turn.text.is_empty() {
                        None
                    } else {
                        Some(turn.text.clone())
                    },
                    name: None,
                    tool_call_id: None,
                    tool_calls: if assistant_tool_calls.is_empty() {
                        None
                    } else {
                        Some(assistant_tool_calls)
                    },
                });
            }

            if turn.tool_calls.is_empty() {
                tracing::debug!("No tool calls requested, leaving the loop");
                break;
            }

            let approvals_pending = Self::dispatch_tool_round(
                &self.registry,
                &mcp,
                turn.tool_calls,
                emitter,
                sctx,
                &mut self.ctx.messages,
                &mut output_items,
            )
            .await?;
            if approvals_pending {
                tracing::debug!("Approval required, pausing the loop");
                break;
            }

            if iteration + 1 == self.max_infer_iters {
                tracing::warn!(
                    max_infer_iters = self.max_infer_iters,
                    "Iteration budget exhausted with unresolved tool calls"
                );
                incomplete = true;
            }
        }

        // Output-side safety over the finalized text; a violation replaces
        // the output with a refusal and still terminates as completed.
        let final_text: String = output_items
            .iter()
            .filter_map(|item| match item {
                ResponseOutputItem::Message { content, .. } => Some(content.text()),
                _ => None,
            })
            .collect();
        match self.safety.check_text(&final_text).await {
            Ok(None) => {}
            Ok(Some(violation)) => {
                output_items =
                    Self::emit_output_refusal(&violation, emitter, sctx)?;
                incomplete = false;
            }
            Err(e) => return self.emit_failed(&e.to_string(), output_items, emitter, sctx),
        }

        let (status, incomplete_details) = if incomplete {
            (
                ResponseStatus::Incomplete,
                Some(ResponseIncompleteDetails {
                    reason: "max_infer_iters".to_string(),
                }),
            )
        } else {
            (ResponseStatus::Completed, None)
        };

        let response = self.make_response(sctx, status, output_items, None, incomplete_details);
        let event = match status {
            ResponseStatus::Incomplete => ResponseStreamEvent::Incomplete {
                sequence_number: sctx.next_sequence(),
                response: response.clone(),
            },
            _ => ResponseStreamEvent::Completed {
                sequence_number: sctx.next_sequence(),
                response: response.clone(),
            },
        };
        emitter.send(event)?;

        Ok(OrchestratorOutcome {
            response,
            final_messages: std::mem::take(&mut self.ctx.messages),
        })
    }

    fn make_response(
        &self,
        sctx: &ResponseStreamContext,
        status: ResponseStatus,
        output: Vec<ResponseOutputItem>,
        error: Option<ResponseErrorDetail>,
        incomplete_details: Option<ResponseIncompleteDetails>,
    ) -> ResponseObject {
        ResponseObject {
            id: self.response_id.clone(),
            object: "response".to_string(),
            created_at: self.created_at,
            model: self.ctx.model.clone(),
            status,
            error,
            incomplete_details,
            instructions: self.instructions.clone(),
            output,
            previous_response_id: self.previous_response_id.clone(),
            temperature: self.ctx.temperature,
            top_p: self.ctx.top_p,
            text: self.text.clone(),
            tool_choice: self.tool_choice.clone(),
            tools: self.response_tools.clone(),
            usage: sctx.usage.clone(),
            metadata: self.metadata.clone(),
        }
    }

    fn chat_params(&self, chat_tools: &[ToolDefinition]) -> ChatCompletionParams {
        ChatCompletionParams {
            model: self.ctx.model.clone(),
            messages: self.ctx.messages.clone(),
            max_tokens: None,
            temperature: self.ctx.temperature,
            top_p: self.ctx.top_p,
            stream: Some(true),
            response_format: Some(self.ctx.response_format.clone()),
            tools: if chat_tools.is_empty() {
                None
            } else {
                Some(chat_tools.to_vec())
            },
            tool_choice: self.tool_choice.as_ref().map(to_chat_tool_choice),
        }
    }

    /// Pre-inference refusal: exactly two events, no inference call is made.
    fn emit_refusal_response(
        &self,
        violation: SafetyViolation,
        emitter: &mut EventEmitter,
        sctx: &mut ResponseStreamContext,
    ) -> Result<OrchestratorOutcome, ResponseError> {
        tracing::info!(check_id = %violation.check_id, "Refusing response before inference");

        let initial = self.make_response(sctx, ResponseStatus::InProgress, vec![], None, None);
        emitter.send(ResponseStreamEvent::Created {
            sequence_number: sctx.next_sequence(),
            response: initial,
        })?;

        let refusal_message = ResponseOutputItem::Message {
            id: new_id(PREFIX_MSG),
            role: "assistant".to_string(),
            content: MessageContent::Parts(vec![ResponseContentPart::Refusal {
                refusal: violation.message,
            }]),
            status: ResponseItemStatus::Completed,
        };
        let response = self.make_response(
            sctx,
            ResponseStatus::Completed,
            vec![refusal_message],
            None,
            None,
        );
        emitter.send(ResponseStreamEvent::Completed {
            sequence_number: sctx.next_sequence(),
            response: response.clone(),
        })?;

        Ok(OrchestratorOutcome {
            response,
            final_messages: self.ctx.messages.clone(),
        })
    }

    /// Output-side violation: replace the output with one refusal message,
    /// emitted through the full item/part event ladder.
    fn emit_output_refusal(
        violation: &SafetyViolation,
        emitter: &mut EventEmitter,
        sctx: &mut ResponseStreamContext,
    ) -> Result<Vec<ResponseOutputItem>, ResponseError> {
        let item_id = new_id(PREFIX_MSG);
        let output_index = sctx.next_output_index();

        emitter.send(ResponseStreamEvent::OutputItemAdded {
            sequence_number: sctx.next_sequence(),
            output_index,
            item: ResponseOutputItem::Message {
                id: item_id.clone(),
                role: "assistant".to_string(),
                content: MessageContent::Parts(vec![]),
                status: ResponseItemStatus::InProgress,
            },
        })?;
        emitter.send(ResponseStreamEvent::ContentPartAdded {
            sequence_number: sctx.next_sequence(),
            item_id: item_id.clone(),
            output_index,
            content_index: 0,
            part: ResponseContentPart::Refusal {
                refusal: String::new(),
            },
        })?;
        emitter.send(ResponseStreamEvent::RefusalDelta {
            sequence_number: sctx.next_sequence(),
            item_id: item_id.clone(),
            output_index,
            content_index: 0,
            delta: violation.message.clone(),
        })?;
        emitter.send(ResponseStreamEvent::RefusalDone {
            sequence_number: sctx.next_sequence(),
            item_id: item_id.clone(),
            output_index,
            content_index: 0,
            refusal: violation.message.clone(),
        })?;
        let part = ResponseContentPart::Refusal {
            refusal: violation.message.clone(),
        };
        emitter.send(ResponseStreamEvent::ContentPartDone {
            sequence_number: sctx.next_sequence(),
            item_id: item_id.clone(),
            output_index,
            content_index: 0,
            part: part.clone(),
        })?;
        let item = ResponseOutputItem::Message {
            id: item_id,
            role: "assistant".to_string(),
            content: MessageContent::Parts(vec![part]),
            status: ResponseItemStatus::Completed,
        };
        emitter.send(ResponseStreamEvent::OutputItemDone {
            sequence_number: sctx.next_sequence(),
            output_index,
            item: item.clone(),
        })?;

        Ok(vec![item])
    }

    /// Unrecoverable backend failure: sanitize and emit the failed terminal.
    fn emit_failed(
        &self,
        raw_message: &str,
        output_items: Vec<ResponseOutputItem>,
        emitter: &mut EventEmitter,
        sctx: &mut ResponseStreamContext,
    ) -> Result<OrchestratorOutcome, ResponseError> {
        let sanitized = sanitize_or_generic(raw_message);
        tracing::error!(
            response_id = %self.response_id,
            code = %sanitized.code,
            error = %raw_message,
            "Response failed"
        );

        let response = self.make_response(
            sctx,
            ResponseStatus::Failed,
            output_items,
            Some(ResponseErrorDetail {
                code: sanitized.code,
                message: sanitized.message,
            }),
            None,
        );
        emitter.send(ResponseStreamEvent::Failed {
            sequence_number: sctx.next_sequence(),
            response: response.clone(),
        })?;

        Ok(OrchestratorOutcome {
            response,
            final_messages: self.ctx.messages.clone(),
        })
    }

    /// Translate one turn's delta stream into item/part/delta events.
    #[allow(clippy::too_many_lines)]
    async fn process_turn(
        tool_context: &ToolContext,
        mcp: &McpToolExecutor,
        mut stream: StreamingResult,
        emitter: &mut EventEmitter,
        sctx: &mut ResponseStreamContext,
        output_items: &mut Vec<ResponseOutputItem>,
    ) -> Result<TurnOutcome, ResponseError> {
        let mut message_id: Option<String> = None;
        let mut message_index = 0usize;
        let mut next_content_index = 0usize;
        let mut text_part: Option<PartAcc> = None;
        let mut reasoning_part: Option<PartAcc> = None;
        let mut refusal_part: Option<PartAcc> = None;
        let mut tool_accs: HashMap<usize, ToolCallAcc> = HashMap::new();
        let mut tool_order: Vec<usize> = Vec::new();
        // Items completed this turn, merged into output in index order
        let mut turn_items: Vec<(usize, ResponseOutputItem)> = Vec::new();

        macro_rules! ensure_message {
            () => {{
                if message_id.is_none() {
                    let id = new_id(PREFIX_MSG);
                    message_index = sctx.next_output_index();
                    emitter.send(ResponseStreamEvent::OutputItemAdded {
                        sequence_number: sctx.next_sequence(),
                        output_index: message_index,
                        item: ResponseOutputItem::Message {
                            id: id.clone(),
                            role: "assistant".to_string(),
                            content: MessageContent::Parts(vec![]),
                            status: ResponseItemStatus::InProgress,
                        },
                    })?;
                    message_id = Some(id);
                }
                message_id.clone().unwrap()
            }};
        }

        while let Some(delta) = stream.next().await {
            let delta = match delta {
                Ok(delta) => delta,
                Err(e) => return Ok(TurnOutcome::BackendError(e)),
            };

            match delta {
                StreamDelta::MessageStart { .. } => {
                    // The message item is created lazily on first content so
                    // tool-call-only turns never emit an empty message
                }
                StreamDelta::TextDelta { text } => {
                    let item_id = ensure_message!();
                    if text_part.is_none() {
                        let content_index = next_content_index;
                        next_content_index += 1;
                        emitter.send(ResponseStreamEvent::ContentPartAdded {
                            sequence_number: sctx.next_sequence(),
                            item_id: item_id.clone(),
                            output_index: message_index,
                            content_index,
                            part: ResponseContentPart::OutputText {
                                text: String::new(),
                            },
                        })?;
                        text_part = Some(PartAcc {
                            content_index,
                            text: String::new(),
                            closed: false,
                        });
                    }
                    let part = text_part.as_mut().unwrap();
                    part.text.push_str(&text);
                    emitter.send(ResponseStreamEvent::OutputTextDelta {
                        sequence_number: sctx.next_sequence(),
                        item_id,
                        output_index: message_index,
                        content_index: part.content_index,
                        delta: text,
                    })?;
                }
                StreamDelta::TextDone { text } => {
                    let item_id = ensure_message!();
                    if text_part.is_none() {
                        let content_index = next_content_index;
                        next_content_index += 1;
                        emitter.send(ResponseStreamEvent::ContentPartAdded {
                            sequence_number: sctx.next_sequence(),
                            item_id: item_id.clone(),
                            output_index: message_index,
                            content_index,
                            part: ResponseContentPart::OutputText {
                                text: String::new(),
                            },
                        })?;
                        text_part = Some(PartAcc {
                            content_index,
                            text: String::new(),
                            closed: false,
                        });
                    }
                    if let Some(part) = text_part.as_mut() {
                        part.text = text.clone();
                        part.closed = true;
                        let content_index = part.content_index;
                        emitter.send(ResponseStreamEvent::OutputTextDone {
                            sequence_number: sctx.next_sequence(),
                            item_id: item_id.clone(),
                            output_index: message_index,
                            content_index,
                            text: text.clone(),
                        })?;
                        emitter.send(ResponseStreamEvent::ContentPartDone {
                            sequence_number: sctx.next_sequence(),
                            item_id,
                            output_index: message_index,
                            content_index,
                            part: ResponseContentPart::OutputText { text },
                        })?;
                    }
                }
                StreamDelta::ReasoningDelta { text } => {
                    let item_id = ensure_message!();
                    if reasoning_part.is_none() {
                        let content_index = next_content_index;
                        next_content_index += 1;
                        emitter.send(ResponseStreamEvent::ContentPartAdded {
                            sequence_number: sctx.next_sequence(),
                            item_id: item_id.clone(),
                            output_index: message_index,
                            content_index,
                            part: ResponseContentPart::ReasoningText {
                                text: String::new(),
                            },
                        })?;
                        reasoning_part = Some(PartAcc {
                            content_index,
                            text: String::new(),
                            closed: false,
                        });
                    }
                    let part = reasoning_part.as_mut().unwrap();
                    part.text.push_str(&text);
                    emitter.send(ResponseStreamEvent::ReasoningTextDelta {
                        sequence_number: sctx.next_sequence(),
                        item_id,
                        output_index: message_index,
                        content_index: part.content_index,
                        delta: text,
                    })?;
                }
                StreamDelta::RefusalDelta { text } => {
                    let item_id = ensure_message!();
                    if refusal_part.is_none() {
                        let content_index = next_content_index;
                        next_content_index += 1;
                        emitter.send(ResponseStreamEvent::ContentPartAdded {
                            sequence_number: sctx.next_sequence(),
                            item_id: item_id.clone(),
                            output_index: message_index,
                            content_index,
                            part: ResponseContentPart::Refusal {
                                refusal: String::new(),
                            },
                        })?;
                        refusal_part = Some(PartAcc {
                            content_index,
                            text: String::new(),
                            closed: false,
                        });
                    }
                    let part = refusal_part.as_mut().unwrap();
                    part.text.push_str(&text);
                    emitter.send(ResponseStreamEvent::RefusalDelta {
                        sequence_number: sctx.next_sequence(),
                        item_id,
                        output_index: message_index,
                        content_index: part.content_index,
                        delta: text,
                    })?;
                }
                StreamDelta::ToolCallStart { index, id, name } => {
                    let kind = tool_context.classify(&name);
                    let call_id = id.unwrap_or_else(|| new_id("call_"));
                    let mut acc = ToolCallAcc {
                        call_id,
                        name: name.clone(),
                        arguments: String::new(),
                        kind: kind.clone(),
                        item_id: None,
                        output_index: None,
                        requires_approval: false,
                        args_closed: false,
                    };

                    match &kind {
                        ToolKind::Function => {
                            let item_id = new_id(PREFIX_FC);
                            let output_index = sctx.next_output_index();
                            emitter.send(ResponseStreamEvent::OutputItemAdded {
                                sequence_number: sctx.next_sequence(),
                                output_index,
                                item: ResponseOutputItem::FunctionCall {
                                    id: item_id.clone(),
                                    call_id: acc.call_id.clone(),
                                    name: name.clone(),
                                    arguments: String::new(),
                                    status: ResponseItemStatus::InProgress,
                                },
                            })?;
                            acc.item_id = Some(item_id);
                            acc.output_index = Some(output_index);
                        }
                        ToolKind::Mcp { server_label, tool } => {
                            acc.requires_approval = mcp.requires_approval(server_label, tool);
                            if !acc.requires_approval {
                                let item_id = new_id(PREFIX_MCP);
                                let output_index = sctx.next_output_index();
                                emitter.send(ResponseStreamEvent::OutputItemAdded {
                                    sequence_number: sctx.next_sequence(),
                                    output_index,
                                    item: ResponseOutputItem::McpCall {
                                        id: item_id.clone(),
                                        server_label: server_label.clone(),
                                        name: tool.clone(),
                                        arguments: String::new(),
                                        output: None,
                                        error: None,
                                    },
                                })?;
                                acc.item_id = Some(item_id);
                                acc.output_index = Some(output_index);
                            }
                        }
                        // Search tools surface their typed item at dispatch;
                        // unknown tools get a failed function_call item there
                        ToolKind::WebSearch | ToolKind::FileSearch | ToolKind::Unknown => {}
                    }

                    tool_accs.insert(index, acc);
                    tool_order.push(index);
                }
                StreamDelta::ToolCallArgsDelta { index, delta } => {
                    if let Some(acc) = tool_accs.get_mut(&index) {
                        acc.arguments.push_str(&delta);
                        if let (Some(item_id), Some(output_index)) =
                            (acc.item_id.clone(), acc.output_index)
                        {
                            let event = match acc.kind {
                                ToolKind::Function => {
                                    ResponseStreamEvent::FunctionCallArgumentsDelta {
                                        sequence_number: sctx.next_sequence(),
                                        item_id,
                                        output_index,
                                        delta,
                                    }
                                }
                                ToolKind::Mcp { .. } => ResponseStreamEvent::McpCallArgumentsDelta {
                                    sequence_number: sctx.next_sequence(),
                                    item_id,
                                    output_index,
                                    delta,
                                },
                                _ => continue,
                            };
                            emitter.send(event)?;
                        }
                    }
                }
                StreamDelta::ToolCallArgsDone { index, arguments } => {
                    if let Some(acc) = tool_accs.get_mut(&index) {
                        acc.arguments = arguments.clone();
                        acc.args_closed = true;
                        if let (Some(item_id), Some(output_index)) =
                            (acc.item_id.clone(), acc.output_index)
                        {
                            match &acc.kind {
                                ToolKind::Function => {
                                    emitter.send(
                                        ResponseStreamEvent::FunctionCallArgumentsDone {
                                            sequence_number: sctx.next_sequence(),
                                            item_id: item_id.clone(),
                                            output_index,
                                            arguments: arguments.clone(),
                                        },
                                    )?;
                                    let item = ResponseOutputItem::FunctionCall {
                                        id: item_id,
                                        call_id: acc.call_id.clone(),
                                        name: acc.name.clone(),
                                        arguments,
                                        status: ResponseItemStatus::Completed,
                                    };
                                    emitter.send(ResponseStreamEvent::OutputItemDone {
                                        sequence_number: sctx.next_sequence(),
                                        output_index,
                                        item: item.clone(),
                                    })?;
                                    turn_items.push((output_index, item));
                                }
                                ToolKind::Mcp { .. } => {
                                    emitter.send(ResponseStreamEvent::McpCallArgumentsDone {
                                        sequence_number: sctx.next_sequence(),
                                        item_id,
                                        output_index,
                                        arguments,
                                    })?;
                                }
                                _ => {}
                            }
                        }
                    }
                }
                StreamDelta::TurnDone { usage, .. } => {
                    if let Some(usage) = usage {
                        sctx.add_usage(&usage);
                    }
                }
            }
        }

        // Close parts the backend never closed explicitly
        if let Some(item_id) = message_id.clone() {
            if let Some(part) = reasoning_part.as_mut().filter(|p| !p.closed) {
                part.closed = true;
                emitter.send(ResponseStreamEvent::ReasoningTextDone {
                    sequence_number: sctx.next_sequence(),
                    item_id: item_id.clone(),
                    output_index: message_index,
                    content_index: part.content_index,
                    text: part.text.clone(),
                })?;
                emitter.send(ResponseStreamEvent::ContentPartDone {
                    sequence_number: sctx.next_sequence(),
                    item_id: item_id.clone(),
                    output_index: message_index,
                    content_index: part.content_index,
                    part: ResponseContentPart::ReasoningText {
                        text: part.text.clone(),
                    },
                })?;
            }
            if let Some(part) = refusal_part.as_mut().filter(|p| !p.closed) {
                part.closed = true;
                emitter.send(ResponseStreamEvent::RefusalDone {
                    sequence_number: sctx.next_sequence(),
                    item_id: item_id.clone(),
                    output_index: message_index,
                    content_index: part.content_index,
                    refusal: part.text.clone(),
                })?;
                emitter.send(ResponseStreamEvent::ContentPartDone {
                    sequence_number: sctx.next_sequence(),
                    item_id: item_id.clone(),
                    output_index: message_index,
                    content_index: part.content_index,
                    part: ResponseContentPart::Refusal {
                        refusal: part.text.clone(),
                    },
                })?;
            }
            if let Some(part) = text_part.as_mut().filter(|p| !p.closed) {
                part.closed = true;
                emitter.send(ResponseStreamEvent::OutputTextDone {
                    sequence_number: sctx.next_sequence(),
                    item_id: item_id.clone(),
                    output_index: message_index,
                    content_index: part.content_index,
                    text: part.text.clone(),
                })?;
                emitter.send(ResponseStreamEvent::ContentPartDone {
                    sequence_number: sctx.next_sequence(),
                    item_id: item_id.clone(),
                    output_index: message_index,
                    content_index: part.content_index,
                    part: ResponseContentPart::OutputText {
                        text: part.text.clone(),
                    },
                })?;
            }

            // Rebuild the finished message in content-index order
            let mut parts: Vec<(usize, ResponseContentPart)> = Vec::new();
            if let Some(part) = &reasoning_part {
                parts.push((
                    part.content_index,
                    ResponseContentPart::ReasoningText {
                        text: part.text.clone(),
                    },
                ));
            }
            if let Some(part) = &refusal_part {
                parts.push((
                    part.content_index,
                    ResponseContentPart::Refusal {
                        refusal: part.text.clone(),
                    },
                ));
            }
            if let Some(part) = &text_part {
                parts.push((
                    part.content_index,
                    ResponseContentPart::OutputText {
                        text: part.text.clone(),
                    },
                ));
            }
            parts.sort_by_key(|(index, _)| *index);

            let item = ResponseOutputItem::Message {
                id: item_id,
                role: "assistant".to_string(),
                content: MessageContent::Parts(parts.into_iter().map(|(_, p)| p).collect()),
                status: ResponseItemStatus::Completed,
            };
            emitter.send(ResponseStreamEvent::OutputItemDone {
                sequence_number: sctx.next_sequence(),
                output_index: message_index,
                item: item.clone(),
            })?;
            turn_items.push((message_index, item));
        }

        // Function-call items whose arguments were never closed explicitly
        for index in &tool_order {
            let Some(acc) = tool_accs.get_mut(index) else {
                continue;
            };
            if acc.args_closed || !matches!(acc.kind, ToolKind::Function) {
                continue;
            }
            if let (Some(item_id), Some(output_index)) = (acc.item_id.clone(), acc.output_index) {
                acc.args_closed = true;
                emitter.send(ResponseStreamEvent::FunctionCallArgumentsDone {
                    sequence_number: sctx.next_sequence(),
                    item_id: item_id.clone(),
                    output_index,
                    arguments: acc.arguments.clone(),
                })?;
                let item = ResponseOutputItem::FunctionCall {
                    id: item_id,
                    call_id: acc.call_id.clone(),
                    name: acc.name.clone(),
                    arguments: acc.arguments.clone(),
                    status: ResponseItemStatus::Completed,
                };
                emitter.send(ResponseStreamEvent::OutputItemDone {
                    sequence_number: sctx.next_sequence(),
                    output_index,
                    item: item.clone(),
                })?;
                turn_items.push((output_index, item));
            }
        }

        turn_items.sort_by_key(|(index, _)| *index);
        output_items.extend(turn_items.into_iter().map(|(_, item)| item));

        let text = text_part.map(|p| p.text).unwrap_or_default();
        let tool_calls = tool_order
            .into_iter()
            .filter_map(|index| tool_accs.remove(&index))
            .map(|acc| PendingToolCall {
                call_id: acc.call_id,
                name: acc.name,
                arguments: acc.arguments,
                kind: acc.kind,
                item_id: acc.item_id,
                output_index: acc.output_index,
                requires_approval: acc.requires_approval,
            })
            .collect();

        Ok(TurnOutcome::Finished(TurnResult { text, tool_calls }))
    }

    /// Dispatch one turn's tool calls.
    ///
    /// Start events are emitted per call in model-declaration order, the
    /// executions run concurrently, then completion events are emitted in
    /// declaration order again so client-visible ordering stays
    /// deterministic regardless of completion order.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_tool_round(
        registry: &ToolRegistry,
        mcp: &McpToolExecutor,
        calls: Vec<PendingToolCall>,
        emitter: &mut EventEmitter,
        sctx: &mut ResponseStreamContext,
        messages: &mut Vec<ChatMessage>,
        output_items: &mut Vec<ResponseOutputItem>,
    ) -> Result<bool, ResponseError> {
        let mut round: Vec<RoundCall> = Vec::new();

        for pending in calls {
            let parsed =
                ToolCallInfo::parse(&pending.call_id, &pending.name, &pending.arguments).ok();
            let execute = parsed.is_some() && !pending.requires_approval;

            let (item_id, output_index) = match (&pending.item_id, pending.output_index) {
                (Some(id), Some(index)) => (id.clone(), index),
                _ => match &pending.kind {
                    ToolKind::WebSearch => {
                        let item_id = new_id(PREFIX_WS);
                        let output_index = sctx.next_output_index();
                        let query = parsed
                            .as_ref()
                            .and_then(|p| p.query())
                            .unwrap_or_default()
                            .to_string();
                        emitter.send(ResponseStreamEvent::OutputItemAdded {
                            sequence_number: sctx.next_sequence(),
                            output_index,
                            item: ResponseOutputItem::WebSearchCall {
                                id: item_id.clone(),
                                status: ResponseItemStatus::InProgress,
                                action: WebSearchAction::Search { query },
                            },
                        })?;
                        emitter.send(ResponseStreamEvent::WebSearchCallInProgress {
                            sequence_number: sctx.next_sequence(),
                            item_id: item_id.clone(),
                            output_index,
                        })?;
                        emitter.send(ResponseStreamEvent::WebSearchCallSearching {
                            sequence_number: sctx.next_sequence(),
                            item_id: item_id.clone(),
                            output_index,
                        })?;
                        (item_id, output_index)
                    }
                    ToolKind::FileSearch => {
                        let item_id = new_id(PREFIX_FS);
                        let output_index = sctx.next_output_index();
                        let query = parsed
                            .as_ref()
                            .and_then(|p| p.query())
                            .unwrap_or_default()
                            .to_string();
                        emitter.send(ResponseStreamEvent::OutputItemAdded {
                            sequence_number: sctx.next_sequence(),
                            output_index,
                            item: ResponseOutputItem::FileSearchCall {
                                id: item_id.clone(),
                                status: ResponseItemStatus::InProgress,
                                queries: vec![query],
                                results: vec![],
                            },
                        })?;
                        emitter.send(ResponseStreamEvent::FileSearchCallInProgress {
                            sequence_number: sctx.next_sequence(),
                            item_id: item_id.clone(),
                            output_index,
                        })?;
                        emitter.send(ResponseStreamEvent::FileSearchCallSearching {
                            sequence_number: sctx.next_sequence(),
                            item_id: item_id.clone(),
                            output_index,
                        })?;
                        (item_id, output_index)
                    }
                    ToolKind::Unknown => {
                        let item_id = new_id(PREFIX_FC);
                        let output_index = sctx.next_output_index();
                        emitter.send(ResponseStreamEvent::OutputItemAdded {
                            sequence_number: sctx.next_sequence(),
                            output_index,
                            item: ResponseOutputItem::FunctionCall {
                                id: item_id.clone(),
                                call_id: pending.call_id.clone(),
                                name: pending.name.clone(),
                                arguments: pending.arguments.clone(),
                                status: ResponseItemStatus::InProgress,
                            },
                        })?;
                        (item_id, output_index)
                    }
                    // Approval-gated MCP calls have no item yet; the
                    // approval request item is created in the last phase
                    _ => (String::new(), 0),
                },
            };

            if matches!(&pending.kind, ToolKind::Mcp { .. }) && !pending.requires_approval {
                emitter.send(ResponseStreamEvent::McpCallInProgress {
                    sequence_number: sctx.next_sequence(),
                    item_id: item_id.clone(),
                    output_index,
                })?;
            }

            round.push(RoundCall {
                pending,
                item_id,
                output_index,
                parsed,
                execute,
            });
        }

        let results: Vec<CallResult> = future::join_all(round.iter().map(|rc| async {
            if !rc.execute {
                return CallResult::Skipped;
            }
            match &rc.parsed {
                Some(info) => match registry.execute(info).await {
                    Ok(output) => CallResult::Output(output),
                    Err(e) => CallResult::Error(e),
                },
                None => CallResult::Error(ResponseError::InvalidParams(
                    "Malformed tool arguments".to_string(),
                )),
            }
        }))
        .await;

        let mut approvals_pending = false;

        for (rc, result) in round.into_iter().zip(results) {
            let result = match (&rc.parsed, result) {
                (None, _) => CallResult::Error(ResponseError::InvalidParams(
                    "Malformed tool arguments".to_string(),
                )),
                (_, result) => result,
            };

            match &rc.pending.kind {
                ToolKind::Function => match result {
                    CallResult::Output(output) => {
                        messages.push(ChatMessage::tool_result(
                            &rc.pending.call_id,
                            output.to_model_text(),
                        ));
                    }
                    CallResult::Error(e) => {
                        let parsed = rc.parsed.unwrap_or_else(|| ToolCallInfo {
                            call_id: rc.pending.call_id.clone(),
                            name: rc.pending.name.clone(),
                            arguments: serde_json::json!({}),
                        });
                        let fold = ToolRegistry::error_output(&e, &parsed);
                        messages.push(ChatMessage::tool_result(
                            &rc.pending.call_id,
                            fold.to_model_text(),
                        ));
                    }
                    CallResult::Skipped => {}
                },
                ToolKind::WebSearch => {
                    let query = rc
                        .parsed
                        .as_ref()
                        .and_then(|p| p.query())
                        .unwrap_or_default()
                        .to_string();
                    match result {
                        CallResult::Output(output) => {
                            emitter.send(ResponseStreamEvent::WebSearchCallCompleted {
                                sequence_number: sctx.next_sequence(),
                                item_id: rc.item_id.clone(),
                                output_index: rc.output_index,
                            })?;
                            let item = ResponseOutputItem::WebSearchCall {
                                id: rc.item_id.clone(),
                                status: ResponseItemStatus::Completed,
                                action: WebSearchAction::Search { query },
                            };
                            emitter.send(ResponseStreamEvent::OutputItemDone {
                                sequence_number: sctx.next_sequence(),
                                output_index: rc.output_index,
                                item: item.clone(),
                            })?;
                            output_items.push(item);
                            messages.push(ChatMessage::tool_result(
                                &rc.pending.call_id,
                                output.to_model_text(),
                            ));
                        }
                        CallResult::Error(e) => {
                            let item = ResponseOutputItem::WebSearchCall {
                                id: rc.item_id.clone(),
                                status: ResponseItemStatus::Failed,
                                action: WebSearchAction::Search { query },
                            };
                            emitter.send(ResponseStreamEvent::OutputItemDone {
                                sequence_number: sctx.next_sequence(),
                                output_index: rc.output_index,
                                item: item.clone(),
                            })?;
                            output_items.push(item);
                            let info = ToolCallInfo {
                                call_id: rc.pending.call_id.clone(),
                                name: rc.pending.name.clone(),
                                arguments: serde_json::json!({}),
                            };
                            let fold = ToolRegistry::error_output(&e, &info);
                            messages.push(ChatMessage::tool_result(
                                &rc.pending.call_id,
                                fold.to_model_text(),
                            ));
                        }
                        CallResult::Skipped => {}
                    }
                }
                ToolKind::FileSearch => {
                    let query = rc
                        .parsed
                        .as_ref()
                        .and_then(|p| p.query())
                        .unwrap_or_default()
                        .to_string();
                    match result {
                        CallResult::Output(output) => {
                            emitter.send(ResponseStreamEvent::FileSearchCallCompleted {
                                sequence_number: sctx.next_sequence(),
                                item_id: rc.item_id.clone(),
                                output_index: rc.output_index,
                            })?;
                            let results = match &output {
                                ToolOutput::FileSearch { results } => results.clone(),
                                _ => vec![],
                            };
                            let item = ResponseOutputItem::FileSearchCall {
                                id: rc.item_id.clone(),
                                status: ResponseItemStatus::Completed,
                                queries: vec![query],
                                results,
                            };
                            emitter.send(ResponseStreamEvent::OutputItemDone {
                                sequence_number: sctx.next_sequence(),
                                output_index: rc.output_index,
                                item: item.clone(),
                            })?;
                            output_items.push(item);
                            messages.push(ChatMessage::tool_result(
                                &rc.pending.call_id,
                                output.to_model_text(),
                            ));
                        }
                        CallResult::Error(e) => {
                            let item = ResponseOutputItem::FileSearchCall {
                                id: rc.item_id.clone(),
                                status: ResponseItemStatus::Failed,
                                queries: vec![query],
                                results: vec![],
                            };
                            emitter.send(ResponseStreamEvent::OutputItemDone {
                                sequence_number: sctx.next_sequence(),
                                output_index: rc.output_index,
                                item: item.clone(),
                            })?;
                            output_items.push(item);
                            let info = ToolCallInfo {
                                call_id: rc.pending.call_id.clone(),
                                name: rc.pending.name.clone(),
                                arguments: serde_json::json!({}),
                            };
                            let fold = ToolRegistry::error_output(&e, &info);
                            messages.push(ChatMessage::tool_result(
                                &rc.pending.call_id,
                                fold.to_model_text(),
                            ));
                        }
                        CallResult::Skipped => {}
                    }
                }
                ToolKind::Mcp { server_label, tool } => {
                    if rc.pending.requires_approval {
                        let item = ResponseOutputItem::McpApprovalRequest {
                            id: new_id(PREFIX_MCPR),
                            server_label: server_label.clone(),
                            name: tool.clone(),
                            arguments: rc.pending.arguments.clone(),
                        };
                        let output_index = sctx.next_output_index();
                        emitter.send(ResponseStreamEvent::OutputItemAdded {
                            sequence_number: sctx.next_sequence(),
                            output_index,
                            item: item.clone(),
                        })?;
                        emitter.send(ResponseStreamEvent::OutputItemDone {
                            sequence_number: sctx.next_sequence(),
                            output_index,
                            item: item.clone(),
                        })?;
                        output_items.push(item);
                        approvals_pending = true;
                        continue;
                    }

                    match result {
                        CallResult::Output(output) => {
                            let text = output.to_model_text();
                            emitter.send(ResponseStreamEvent::McpCallCompleted {
                                sequence_number: sctx.next_sequence(),
                                item_id: rc.item_id.clone(),
                                output_index: rc.output_index,
                            })?;
                            let item = ResponseOutputItem::McpCall {
                                id: rc.item_id.clone(),
                                server_label: server_label.clone(),
                                name: tool.clone(),
                                arguments: rc.pending.arguments.clone(),
                                output: Some(text.clone()),
                                error: None,
                            };
                            emitter.send(ResponseStreamEvent::OutputItemDone {
                                sequence_number: sctx.next_sequence(),
                                output_index: rc.output_index,
                                item: item.clone(),
                            })?;
                            output_items.push(item);
                            messages
                                .push(ChatMessage::tool_result(&rc.pending.call_id, text));
                        }
                        CallResult::Error(e) => {
                            emitter.send(ResponseStreamEvent::McpCallFailed {
                                sequence_number: sctx.next_sequence(),
                                item_id: rc.item_id.clone(),
                                output_index: rc.output_index,
                            })?;
                            let item = ResponseOutputItem::McpCall {
                                id: rc.item_id.clone(),
                                server_label: server_label.clone(),
                                name: tool.clone(),
                                arguments: rc.pending.arguments.clone(),
                                output: None,
                                error: Some(e.to_string()),
                            };
                            emitter.send(ResponseStreamEvent::OutputItemDone {
                                sequence_number: sctx.next_sequence(),
                                output_index: rc.output_index,
                                item: item.clone(),
                            })?;
                            output_items.push(item);
                            let info = ToolCallInfo {
                                call_id: rc.pending.call_id.clone(),
                                name: rc.pending.name.clone(),
                                arguments: serde_json::json!({}),
                            };
                            let fold = ToolRegistry::error_output(&e, &info);
                            messages.push(ChatMessage::tool_result(
                                &rc.pending.call_id,
                                fold.to_model_text(),
                            ));
                        }
                        CallResult::Skipped => {}
                    }
                }
                ToolKind::Unknown => {
                    let error = match result {
                        CallResult::Error(e) => e,
                        _ => ResponseError::UnknownTool(rc.pending.name.clone()),
                    };
                    let item = ResponseOutputItem::FunctionCall {
                        id: rc.item_id.clone(),
                        call_id: rc.pending.call_id.clone(),
                        name: rc.pending.name.clone(),
                        arguments: rc.pending.arguments.clone(),
                        status: ResponseItemStatus::Failed,
                    };
                    emitter.send(ResponseStreamEvent::OutputItemDone {
                        sequence_number: sctx.next_sequence(),
                        output_index: rc.output_index,
                        item: item.clone(),
                    })?;
                    output_items.push(item);
                    let info = ToolCallInfo {
                        call_id: rc.pending.call_id.clone(),
                        name: rc.pending.name.clone(),
                        arguments: serde_json::json!({}),
                    };
                    let fold = ToolRegistry::error_output(&error, &info);
                    messages.push(ChatMessage::tool_result(
                        &rc.pending.call_id,
                        fold.to_model_text(),
                    ));
                }
            }
        }

        Ok(approvals_pending)
    }

    /// Execute (or deny) MCP calls approved in the new input. Each approved
    /// call folds a synthetic assistant tool-call plus its result so the
    /// rolling buffer never holds a dangling tool result.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_pending_approvals(
        mcp: &McpToolExecutor,
        tool_context: &ToolContext,
        inputs: &[ResponseInputItem],
        messages: &mut Vec<ChatMessage>,
        emitter: &mut EventEmitter,
        sctx: &mut ResponseStreamContext,
        output_items: &mut Vec<ResponseOutputItem>,
    ) -> Result<(), ResponseError> {
        for approval in &tool_context.approval_responses {
            let request = inputs.iter().find_map(|item| match item {
                ResponseInputItem::Item(ResponseOutputItem::McpApprovalRequest {
                    id,
                    server_label,
                    name,
                    arguments,
                }) if id == &approval.approval_request_id => {
                    Some((server_label.clone(), name.clone(), arguments.clone()))
                }
                _ => None,
            });
            let Some((server_label, name, arguments)) = request else {
                tracing::warn!(
                    approval_request_id = %approval.approval_request_id,
                    "Approval response without a matching request"
                );
                continue;
            };

            let fq_name = format!("{server_label}:{name}");
            messages.push(ChatMessage {
                role: MessageRole::Assistant,
                content: None,
                name: None,
                tool_call_id: None,
                tool_calls: Some(vec![ToolCall {
                    id: approval.approval_request_id.clone(),
                    type_: "function".to_string(),
                    function: FunctionCall {
                        name: fq_name,
                        arguments: arguments.clone(),
                    },
                }]),
            });

            if !approval.approve {
                tracing::info!(tool = %name, "MCP tool call denied by the user");
                messages.push(ChatMessage::tool_result(
                    &approval.approval_request_id,
                    "Tool call was denied by the user.",
                ));
                continue;
            }

            let item_id = new_id(PREFIX_MCP);
            let output_index = sctx.next_output_index();
            emitter.send(ResponseStreamEvent::OutputItemAdded {
                sequence_number: sctx.next_sequence(),
                output_index,
                item: ResponseOutputItem::McpCall {
                    id: item_id.clone(),
                    server_label: server_label.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                    output: None,
                    error: None,
                },
            })?;
            emitter.send(ResponseStreamEvent::McpCallInProgress {
                sequence_number: sctx.next_sequence(),
                item_id: item_id.clone(),
                output_index,
            })?;

            let parsed_args: serde_json::Value =
                serde_json::from_str(&arguments).unwrap_or_else(|_| serde_json::json!({}));
            match mcp.execute_tool(&server_label, &name, parsed_args).await {
                Ok(output) => {
                    emitter.send(ResponseStreamEvent::McpCallCompleted {
                        sequence_number: sctx.next_sequence(),
                        item_id: item_id.clone(),
                        output_index,
                    })?;
                    let item = ResponseOutputItem::McpCall {
                        id: item_id,
                        server_label,
                        name,
                        arguments,
                        output: Some(output.clone()),
                        error: None,
                    };
                    emitter.send(ResponseStreamEvent::OutputItemDone {
                        sequence_number: sctx.next_sequence(),
                        output_index,
                        item: item.clone(),
                    })?;
                    output_items.push(item);
                    messages.push(ChatMessage::tool_result(
                        &approval.approval_request_id,
                        output,
                    ));
                }
                Err(e) => {
                    emitter.send(ResponseStreamEvent::McpCallFailed {
                        sequence_number: sctx.next_sequence(),
                        item_id: item_id.clone(),
                        output_index,
                    })?;
                    let item = ResponseOutputItem::McpCall {
                        id: item_id,
                        server_label,
                        name,
                        arguments,
                        output: None,
                        error: Some(e.to_string()),
                    };
                    emitter.send(ResponseStreamEvent::OutputItemDone {
                        sequence_number: sctx.next_sequence(),
                        output_index,
                        item: item.clone(),
                    })?;
                    output_items.push(item);
                    messages.push(ChatMessage::tool_result(
                        &approval.approval_request_id,
                        format!("ERROR: {e}"),
                    ));
                }
            }
        }

        Ok(())
    }
}
