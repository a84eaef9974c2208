use std::path::Path;

use crate::agent::claude::{
    ClaudeClient, ContentBlock, Message, MessageContent, MessagesRequest,
};
use crate::agent::tools::{ToolOutput, ToolRegistry};
use crate::error::{AppError, Result};

/// Outcome of an agent run.
#[derive(Debug)]
pub enum AgentOutcome {
    /// Agent finished; `files_written` lists every path it wrote, in order.
    Completed {
        summary: String,
        files_written: Vec<String>,
    },
    /// Agent hit the turn limit without finishing.
    TurnLimitReached { files_written: Vec<String> },
    /// Agent hit Claude API rate limits.
    RateLimited { message: String },
    /// Agent encountered an error.
    Failed { error: String },
}

pub struct AgentEngine {
    client: ClaudeClient,
    tools: ToolRegistry,
    max_turns: u32,
}

impl AgentEngine {
    pub fn new(client: ClaudeClient, tools: ToolRegistry, max_turns: u32) -> Self {
        Self {
            client,
            tools,
            max_turns,
        }
    }

    /// Run the tool-use loop until Claude ends its turn.
    ///
    /// - `system_prompt`: what to repair and how.
    /// - `workspace_root`: every tool path is resolved inside this directory.
    /// - `initial_message`: the first user message.
    pub async fn run(
        &self,
        system_prompt: &str,
        workspace_root: &Path,
        initial_message: &str,
    ) -> AgentOutcome {
        let tool_definitions = self.tools.definitions();

        let mut messages = vec![Message::user(initial_message)];
        let mut files_written: Vec<String> = Vec::new();

        let mut total_input_tokens = 0u32;
        let mut total_output_tokens = 0u32;

        for turn in 0..self.max_turns {
            tracing::info!(turn = turn, "Agent turn");

            let request = MessagesRequest {
                model: self.client.model().to_string(),
                max_tokens: self.client.max_tokens(),
                system: system_prompt.to_string(),
                messages: messages.clone(),
                tools: tool_definitions.clone(),
            };

            let response = match self.client.send_message(&request).await {
                Ok(r) => r,
                Err(AppError::ClaudeRateLimited(msg)) => {
                    tracing::warn!("Claude API rate limited, stopping agent");
                    return AgentOutcome::RateLimited { message: msg };
                }
                Err(e) => {
                    return AgentOutcome::Failed {
                        error: format!("Claude API error: {e}"),
                    };
                }
            };

            total_input_tokens += response.usage.input_tokens;
            total_output_tokens += response.usage.output_tokens;

            tracing::info!(
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                stop_reason = ?response.stop_reason,
                "Claude response"
            );

            let stop_reason = response.stop_reason.as_deref().unwrap_or("unknown");

            match stop_reason {
                "end_turn" => {
                    let summary = extract_text(&response.content);
                    tracing::info!(
                        total_input_tokens,
                        total_output_tokens,
                        turns = turn + 1,
                        files = files_written.len(),
                        "Agent completed"
                    );
                    return AgentOutcome::Completed {
                        summary,
                        files_written,
                    };
                }
                "tool_use" => {
                    messages.push(Message {
                        role: "assistant".to_string(),
                        content: MessageContent::Blocks(response.content.clone()),
                    });

                    let mut tool_results = Vec::new();
                    for block in &response.content {
                        if let ContentBlock::ToolUse { id, name, input } = block {
                            tracing::info!(tool = %name, "Executing tool");
                            let (content, is_error) = match self
                                .execute_tool(workspace_root, name, input)
                                .await
                            {
                                Ok(ToolOutput::Success(content)) => {
                                    tracing::debug!(tool = %name, "Tool succeeded");
                                    (content, None)
                                }
                                Ok(ToolOutput::Written { path, message }) => {
                                    tracing::info!(tool = %name, path = %path, "Agent wrote file");
                                    if !files_written.contains(&path) {
                                        files_written.push(path);
                                    }
                                    (message, None)
                                }
                                Ok(ToolOutput::Error(error)) => {
                                    tracing::warn!(tool = %name, error = %error, "Tool error");
                                    (error, Some(true))
                                }
                                Err(e) => {
                                    tracing::error!(tool = %name, error = %e, "Tool execution error");
                                    (format!("Internal error: {e}"), Some(true))
                                }
                            };
                            tool_results.push(ContentBlock::ToolResult {
                                tool_use_id: id.clone(),
                                content,
                                is_error,
                            });
                        }
                    }

                    messages.push(Message {
                        role: "user".to_string(),
                        content: MessageContent::Blocks(tool_results),
                    });
                }
                "max_tokens" => {
                    tracing::warn!("Agent response hit max_tokens limit");
                    messages.push(Message {
                        role: "assistant".to_string(),
                        content: MessageContent::Blocks(response.content),
                    });
                    messages.push(Message::user("Please continue."));
                }
                other => {
                    tracing::warn!(stop_reason = other, "Unexpected stop reason");
                    return AgentOutcome::Failed {
                        error: format!("Unexpected stop reason: {other}"),
                    };
                }
            }
        }

        tracing::warn!(max_turns = self.max_turns, "Agent hit turn limit");
        AgentOutcome::TurnLimitReached { files_written }
    }

    async fn execute_tool(
        &self,
        workspace_root: &Path,
        name: &str,
        input: &serde_json::Value,
    ) -> Result<ToolOutput> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AppError::Agent(format!("Unknown tool: {name}")))?;

        tool.execute(workspace_root, input.clone()).await
    }
}

fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| {
            if let ContentBlock::Text { text } = block {
                Some(text.as_str())
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
