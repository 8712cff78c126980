use gproxy_protocol::claude::request::CreateMessageRequest;
use gproxy_protocol::claude::types::{
    ContentBlock, ImageSource, Message, Role, Tool, ToolChoice as ClaudeToolChoice,
    ToolResultBlock, ToolResultContent,
};
use gproxy_protocol::openai::request::ChatCompletionRequest;
use gproxy_protocol::openai::types::{
    ChatContent, ChatContentPart, ChatMessage, ChatTool, FunctionDefinition, ImageUrl, ToolCall,
    ToolCallFunction, ToolChoice as OpenAiToolChoice, ToolChoiceFunction,
};

use crate::error::TransformError;

/// Anthropic create-message request -> OpenAI chat-completions request (spec.md §4.4).
pub fn claude_to_openai_request(
    request: &CreateMessageRequest,
) -> Result<ChatCompletionRequest, TransformError> {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        let text = system.joined_text();
        if !text.is_empty() {
            messages.push(ChatMessage::System {
                content: ChatContent::Text(text),
            });
        }
    }

    for message in &request.messages {
        messages.extend(translate_message(message)?);
    }

    Ok(ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: Some(request.max_tokens),
        stop: request.stop_sequences.clone(),
        tools: translate_tools(request.tools.as_deref()),
        tool_choice: request.tool_choice.as_ref().map(translate_tool_choice),
        stream: request.stream,
    })
}

fn translate_message(message: &Message) -> Result<Vec<ChatMessage>, TransformError> {
    match message.role {
        Role::User => translate_user_message(message),
        Role::Assistant => translate_assistant_message(message),
    }
}

fn translate_user_message(message: &Message) -> Result<Vec<ChatMessage>, TransformError> {
    let mut out = Vec::new();
    let mut parts: Vec<ChatContentPart> = Vec::new();

    for block in message.content.blocks() {
        match block {
            ContentBlock::Text { text } => parts.push(ChatContentPart::Text { text }),
            ContentBlock::Image { source } => parts.push(ChatContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image_data_url(&source),
                },
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                flush_user_parts(&mut out, &mut parts);
                out.push(ChatMessage::Tool {
                    content: ChatContent::Text(translate_tool_result_content(content)?),
                    tool_call_id: tool_use_id,
                });
            }
            ContentBlock::ToolUse { .. } => {
                return Err(TransformError::UnsupportedContentBlock(
                    "tool_use in a user message".to_string(),
                ));
            }
        }
    }

    flush_user_parts(&mut out, &mut parts);
    Ok(out)
}

fn flush_user_parts(out: &mut Vec<ChatMessage>, parts: &mut Vec<ChatContentPart>) {
    if parts.is_empty() {
        return;
    }
    let content = if parts.len() == 1 {
        match &parts[0] {
            ChatContentPart::Text { text } => ChatContent::Text(text.clone()),
            other => ChatContent::Parts(vec![other.clone()]),
        }
    } else {
        ChatContent::Parts(std::mem::take(parts))
    };
    out.push(ChatMessage::User { content });
    parts.clear();
}

fn translate_assistant_message(message: &Message) -> Result<Vec<ChatMessage>, TransformError> {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in message.content.blocks() {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                let arguments = serde_json::to_string(&input).unwrap_or_else(|_| "{}".to_string());
                tool_calls.push(ToolCall {
                    id,
                    kind: "function".to_string(),
                    function: ToolCallFunction { name, arguments },
                });
            }
            ContentBlock::Image { .. } => {
                return Err(TransformError::UnsupportedContentBlock(
                    "image in an assistant message".to_string(),
                ));
            }
            ContentBlock::ToolResult { .. } => {
                return Err(TransformError::UnsupportedContentBlock(
                    "tool_result in an assistant message".to_string(),
                ));
            }
        }
    }

    let content = if tool_calls.is_empty() {
        if text_parts.is_empty() {
            None
        } else {
            Some(ChatContent::Text(text_parts.join("")))
        }
    } else {
        None
    };
    let tool_calls = if tool_calls.is_empty() {
        None
    } else {
        Some(tool_calls)
    };

    Ok(vec![ChatMessage::Assistant {
        content,
        tool_calls,
    }])
}

fn translate_tool_result_content(
    content: Option<ToolResultContent>,
) -> Result<String, TransformError> {
    match content {
        None => Ok(String::new()),
        Some(ToolResultContent::Text(text)) => Ok(text),
        Some(ToolResultContent::Blocks(blocks)) => {
            let joined = blocks
                .into_iter()
                .map(|block| match block {
                    ToolResultBlock::Text { text } => text,
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(joined)
        }
    }
}

fn image_data_url(source: &ImageSource) -> String {
    match source {
        ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
        ImageSource::Url { url } => url.clone(),
    }
}

fn translate_tools(tools: Option<&[Tool]>) -> Option<Vec<ChatTool>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| ChatTool::Function {
                function: FunctionDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                },
            })
            .collect(),
    )
}

fn translate_tool_choice(choice: &ClaudeToolChoice) -> OpenAiToolChoice {
    match choice {
        ClaudeToolChoice::Auto | ClaudeToolChoice::Any => OpenAiToolChoice::Mode("auto".to_string()),
        ClaudeToolChoice::None => OpenAiToolChoice::Mode("none".to_string()),
        ClaudeToolChoice::Tool { name } => OpenAiToolChoice::Named {
            kind: "function".to_string(),
            function: ToolChoiceFunction { name: name.clone() },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_protocol::claude::types::MessageContent;

    fn user_text(text: &str) -> Message {
        Message {
            role: Role::User,
            content: MessageContent::Text(text.to_string()),
        }
    }

    #[test]
    fn system_prompt_becomes_leading_system_message() {
        let request = CreateMessageRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            messages: vec![user_text("hi")],
            system: Some(gproxy_protocol::claude::types::SystemPrompt::Text(
                "be terse".to_string(),
            )),
            max_tokens: 10,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            stream: Some(false),
            provider: None,
        };
        let openai = claude_to_openai_request(&request).unwrap();
        assert!(matches!(openai.messages[0], ChatMessage::System { .. }));
        assert_eq!(openai.messages.len(), 2);
    }

    #[test]
    fn tool_use_becomes_tool_call_with_null_content() {
        let request = CreateMessageRequest {
            model: "m".to_string(),
            messages: vec![Message {
                role: Role::Assistant,
                content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                    id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    input: serde_json::json!({"city": "nyc"}),
                }]),
            }],
            system: None,
            max_tokens: 10,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            stream: None,
            provider: None,
        };
        let openai = claude_to_openai_request(&request).unwrap();
        match &openai.messages[0] {
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                assert!(content.is_none());
                let calls = tool_calls.as_ref().unwrap();
                assert_eq!(calls[0].function.name, "get_weather");
            }
            _ => panic!("expected assistant message"),
        }
    }

    #[test]
    fn unknown_content_block_is_a_hard_error() {
        let request = CreateMessageRequest {
            model: "m".to_string(),
            messages: vec![Message {
                role: Role::Assistant,
                content: MessageContent::Blocks(vec![ContentBlock::Image {
                    source: ImageSource::Url {
                        url: "http://x".to_string(),
                    },
                }]),
            }],
            system: None,
            max_tokens: 10,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            stream: None,
            provider: None,
        };
        assert!(claude_to_openai_request(&request).is_err());
    }
}
