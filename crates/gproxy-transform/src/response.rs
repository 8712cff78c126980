use gproxy_protocol::claude::response::MessagesResponse;
use gproxy_protocol::claude::types::{ContentBlock, StopReason, Usage};
use gproxy_protocol::openai::response::ChatCompletionResponse;
use gproxy_protocol::openai::types::{ChatContent, ChatContentPart, FinishReason};

/// OpenAI chat-completions response -> Anthropic messages response (spec.md §4.4).
pub fn openai_to_claude_response(response: &ChatCompletionResponse) -> MessagesResponse {
    let choice = response.choices.first();

    let mut content = Vec::new();
    if let Some(choice) = choice {
        if let Some(text) = choice.message.content.as_ref().and_then(content_text) {
            if !text.is_empty() {
                content.push(ContentBlock::Text { text });
            }
        }
        for call in choice.message.tool_calls.iter().flatten() {
            let input = match serde_json::from_str(&call.function.arguments) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(
                        tool_call_id = %call.id,
                        error = %err,
                        "tool_calls arguments were not valid JSON"
                    );
                    serde_json::json!({ "error": err.to_string(), "raw": call.function.arguments })
                }
            };
            content.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input,
            });
        }
    }
    if content.is_empty() {
        content.push(ContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason)
        .map(map_finish_reason)
        .unwrap_or(StopReason::EndTurn);

    MessagesResponse {
        id: format!("msg_{}", response.id),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: response.model.clone(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: response
            .usage
            .map(|u| Usage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            })
            .unwrap_or_default(),
    }
}

fn content_text(content: &ChatContent) -> Option<String> {
    match content {
        ChatContent::Text(text) => Some(text.clone()),
        ChatContent::Null(_) => None,
        ChatContent::Parts(parts) => {
            let joined = parts
                .iter()
                .filter_map(|part| match part {
                    ChatContentPart::Text { text } => Some(text.as_str()),
                    ChatContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("");
            Some(joined)
        }
    }
}

pub fn map_finish_reason(reason: FinishReason) -> StopReason {
    match reason {
        FinishReason::Stop => StopReason::EndTurn,
        FinishReason::Length => StopReason::MaxTokens,
        FinishReason::ToolCalls => StopReason::ToolUse,
        FinishReason::ContentFilter => StopReason::StopSequence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_protocol::openai::response::{ChatCompletionChoice, ChatCompletionMessage};
    use gproxy_protocol::openai::types::{CompletionUsage, ToolCall, ToolCallFunction};

    #[test]
    fn text_only_response_maps_to_single_text_block() {
        let response = ChatCompletionResponse {
            id: "abc123".to_string(),
            model: "gpt-4o-mini".to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionMessage {
                    content: Some(ChatContent::Text("hello there".to_string())),
                    tool_calls: None,
                },
                finish_reason: Some(FinishReason::Stop),
            }],
            usage: Some(CompletionUsage {
                prompt_tokens: 5,
                completion_tokens: 2,
                total_tokens: 7,
            }),
        };
        let claude = openai_to_claude_response(&response);
        assert_eq!(claude.id, "msg_abc123");
        assert_eq!(claude.content.len(), 1);
        assert!(matches!(claude.stop_reason, Some(StopReason::EndTurn)));
        assert_eq!(claude.usage.input_tokens, 5);
    }

    #[test]
    fn tool_calls_become_tool_use_blocks_with_end_turn_from_tool_calls_finish() {
        let response = ChatCompletionResponse {
            id: "abc".to_string(),
            model: "m".to_string(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionMessage {
                    content: None,
                    tool_calls: Some(vec![ToolCall {
                        id: "call_1".to_string(),
                        kind: "function".to_string(),
                        function: ToolCallFunction {
                            name: "get_weather".to_string(),
                            arguments: "{\"city\":\"nyc\"}".to_string(),
                        },
                    }]),
                },
                finish_reason: Some(FinishReason::ToolCalls),
            }],
            usage: None,
        };
        let claude = openai_to_claude_response(&response);
        assert!(matches!(claude.stop_reason, Some(StopReason::ToolUse)));
        assert!(matches!(claude.content[0], ContentBlock::ToolUse { .. }));
    }
}
