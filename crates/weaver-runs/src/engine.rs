//! Conversation loop engine
//!
//! Drives one or more model-call / tool-call rounds for a single run and
//! produces a lazy, ordered, non-restartable stream of events. The engine
//! owns message-history persistence and nothing else: the caller decides
//! what the terminal events mean for the run's durable status.

use crate::scanner::{parse_invocation, ToolCallScanner};
use futures::{Stream, StreamExt};
use serde_json::json;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use weaver_core::{ConfigSnapshot, Error, EventStatus, Result, RunEvent, ThreadId};
use weaver_llm::{ChatMessage, LlmProvider, LlmRequest, Role, StreamDelta};
use weaver_store::{MessageKind, ThreadMessage, ThreadStore};
use weaver_tools::CapabilityRegistry;

/// Everything one run needs to execute.
pub struct EngineContext {
    pub thread_id: ThreadId,
    pub model: String,
    pub config: ConfigSnapshot,
    pub provider: Arc<dyn LlmProvider>,
    pub registry: Arc<CapabilityRegistry>,
    pub threads: Arc<ThreadStore>,
    /// Observed at iteration boundaries only; an in-flight model or tool
    /// step finishes before the loop checks it.
    pub cancel: CancellationToken,
}

/// Assemble the system prompt once per run: the configured base prompt with
/// the registry's metadata appended as machine-readable tool definitions.
pub fn build_system_prompt(config: &ConfigSnapshot, registry: &CapabilityRegistry) -> String {
    let base = config.system_prompt.clone();
    let metadata = registry.metadata();
    if metadata.is_empty() {
        return base;
    }

    let formatted = serde_json::to_string_pretty(&metadata).unwrap_or_else(|_| "[]".to_string());
    format!(
        "{base}\n\n--- AVAILABLE TOOLS ---\n
You have access to the following tools. Respond with a JSON object in a <tool_code> block to use a tool.

Example:
<tool_code>
{{
  \"tool_name\": \"example_tool_name\",
  \"parameters\": {{
    \"param1\": \"value1\",
    \"param2\": \"value2\"
  }}
}}
</tool_code>

Available Tools Schema:
{formatted}
"
    )
}

fn chat_from_message(message: &ThreadMessage) -> ChatMessage {
    let role = match message.kind {
        MessageKind::User => Role::User,
        MessageKind::Assistant => Role::Assistant,
        MessageKind::Tool => Role::Tool,
    };
    // User/assistant rows carry {"role", "content"}; tool rows are the
    // structured output itself.
    let content = match message.content.get("content").and_then(|c| c.as_str()) {
        Some(text) => text.to_string(),
        None => message.content.to_string(),
    };
    ChatMessage { role, content }
}

/// Run the conversation loop, yielding events as they happen.
///
/// Recoverable failures (unknown tool, malformed invocation, a capability's
/// own error) surface as in-band `tool_output` events and the loop keeps
/// going. A failed model call ends the stream with an `Err`. Cancellation
/// observed at an iteration boundary yields a final `status: stopped`
/// instead of `completed`.
pub fn run_agent(ctx: EngineContext) -> Pin<Box<dyn Stream<Item = Result<RunEvent>> + Send>> {
    Box::pin(async_stream::try_stream! {
        info!(thread_id = %ctx.thread_id, model = %ctx.model, "starting agent run");

        let system_prompt = build_system_prompt(&ctx.config, &ctx.registry);
        let mut messages: Vec<ChatMessage> = ctx
            .threads
            .list_messages(&ctx.thread_id)
            .iter()
            .map(chat_from_message)
            .collect();

        let mut stopped = false;

        loop {
            if ctx.cancel.is_cancelled() {
                info!(thread_id = %ctx.thread_id, "cancellation observed at iteration boundary");
                stopped = true;
                break;
            }

            yield RunEvent::status(EventStatus::Thinking);

            let request = LlmRequest {
                model: ctx.model.clone(),
                messages: messages.clone(),
                system: Some(system_prompt.clone()),
                ..Default::default()
            };

            let stream = ctx
                .provider
                .complete_stream(request)
                .await
                .map_err(|e| Error::model_call(ctx.provider.name(), e.to_string()))?;
            tokio::pin!(stream);

            let mut full_response = String::new();
            let mut scanner = ToolCallScanner::new();
            let mut tool_payload: Option<String> = None;

            while let Some(delta) = stream.next().await {
                let delta =
                    delta.map_err(|e| Error::model_call(ctx.provider.name(), e.to_string()))?;
                match delta {
                    StreamDelta::Text(text) => {
                        full_response.push_str(&text);
                        yield RunEvent::chunk(text.clone());

                        // Stop consuming the turn once a complete block is present.
                        if let Some(payload) = scanner.push(&text) {
                            tool_payload = Some(payload);
                            break;
                        }
                    }
                    StreamDelta::Done { .. } => break,
                }
            }

            // The full assistant turn goes to durable history either way.
            messages.push(ChatMessage::assistant(&full_response));
            ctx.threads.append_message(
                &ctx.thread_id,
                MessageKind::Assistant,
                json!({ "role": "assistant", "content": full_response }),
            )?;

            let Some(payload) = tool_payload else {
                // No tool call: the conversational turn is over.
                break;
            };

            let invocation = match parse_invocation(&payload) {
                Ok(invocation) => invocation,
                Err(e) => {
                    warn!(thread_id = %ctx.thread_id, "invalid JSON in tool_code block: {}", e);
                    messages.push(ChatMessage::tool(
                        json!({ "error": e.to_string() }).to_string(),
                    ));
                    continue;
                }
            };

            let Some(capability) = ctx.registry.get(&invocation.tool_name) else {
                let error_message = format!("Tool '{}' not found.", invocation.tool_name);
                let output = json!({ "error": error_message });
                yield RunEvent::tool_error(&invocation.tool_name, output.clone());
                messages.push(ChatMessage::tool(output.to_string()));
                continue;
            };

            debug!(thread_id = %ctx.thread_id, tool = %invocation.tool_name, "executing tool");
            match capability.execute(invocation.parameters.clone()).await {
                Ok(output) => {
                    yield RunEvent::tool_output(&invocation.tool_name, output.clone());
                    messages.push(ChatMessage::tool(output.to_string()));
                    ctx.threads.append_message(
                        &ctx.thread_id,
                        MessageKind::Tool,
                        json!({ "tool_name": invocation.tool_name, "output": output }),
                    )?;
                }
                Err(e) => {
                    error!(thread_id = %ctx.thread_id, tool = %invocation.tool_name, "tool execution failed: {}", e);
                    let output = json!({ "error": e.to_string() });
                    yield RunEvent::tool_error(&invocation.tool_name, output.clone());
                    messages.push(ChatMessage::tool(output.to_string()));
                }
            }
        }

        if stopped {
            yield RunEvent::status(EventStatus::Stopped);
            info!(thread_id = %ctx.thread_id, "agent run stopped");
        } else {
            yield RunEvent::status(EventStatus::Completed);
            info!(thread_id = %ctx.thread_id, "agent run completed");
        }
    })
}
