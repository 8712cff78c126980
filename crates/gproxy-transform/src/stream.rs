use gproxy_protocol::claude::stream::{
    ContentBlockDelta, MessageDeltaFields, PartialMessage, StreamEvent,
};
use gproxy_protocol::claude::types::{ContentBlock, StopReason, Usage};
use gproxy_protocol::openai::stream::ChatCompletionChunk;
use gproxy_protocol::openai::types::FinishReason;

use crate::response::map_finish_reason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text,
    ToolUse,
}

/// Tracks progress translating one OpenAI chat-completion stream into an
/// Anthropic `text/event-stream`. One instance per downstream connection.
///
/// Anthropic numbers content blocks by index and requires a `content_block_start`
/// before any delta and a matching `content_block_stop` once a block is done;
/// OpenAI just grows `delta.content` or `delta.tool_calls[].function.arguments`
/// in place, so this state machine opens/closes blocks as the shape of the
/// incoming delta changes.
pub struct OpenAiToClaudeStreamState {
    message_id: String,
    model: String,
    started: bool,
    open_block: Option<(u32, OpenBlock)>,
    next_index: u32,
    tool_call_ids: Vec<Option<String>>,
    stop_reason: Option<StopReason>,
    usage: Usage,
    finished_cleanly: bool,
}

impl OpenAiToClaudeStreamState {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            model: model.into(),
            started: false,
            open_block: None,
            next_index: 0,
            tool_call_ids: Vec::new(),
            stop_reason: None,
            usage: Usage::default(),
            finished_cleanly: false,
        }
    }

    /// Consumes one OpenAI `ChatCompletionChunk` and returns the Anthropic
    /// stream events it translates to, in emission order.
    pub fn transform_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut out = Vec::new();

        if !self.started {
            self.started = true;
            out.push(StreamEvent::MessageStart {
                message: PartialMessage {
                    id: format!("msg_{}", self.message_id),
                    kind: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: self.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage::default(),
                },
            });
        }

        if let Some(usage) = chunk.usage {
            self.usage.input_tokens = usage.prompt_tokens;
            self.usage.output_tokens = usage.completion_tokens;
        }

        let Some(choice) = chunk.choices.first() else {
            return out;
        };

        if let Some(text) = &choice.delta.content {
            if !text.is_empty() {
                out.extend(self.open_text_block());
                out.push(StreamEvent::ContentBlockDelta {
                    index: self.open_block.unwrap().0,
                    delta: ContentBlockDelta::TextDelta { text: text.clone() },
                });
            }
        }

        for call in choice.delta.tool_calls.iter().flatten() {
            let slot = call.index as usize;
            if slot >= self.tool_call_ids.len() {
                self.tool_call_ids.resize(slot + 1, None);
            }
            if let Some(id) = &call.id {
                self.tool_call_ids[slot] = Some(id.clone());
                let name = call
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();
                out.extend(self.close_open_block());
                let index = self.next_index;
                self.next_index += 1;
                self.open_block = Some((index, OpenBlock::ToolUse));
                out.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::ToolUse {
                        id: id.clone(),
                        name,
                        input: serde_json::Value::Object(Default::default()),
                    },
                });
            }
            if let Some(arguments) = call.function.as_ref().and_then(|f| f.arguments.clone()) {
                if !arguments.is_empty() {
                    if let Some((index, OpenBlock::ToolUse)) = self.open_block {
                        out.push(StreamEvent::ContentBlockDelta {
                            index,
                            delta: ContentBlockDelta::InputJsonDelta {
                                partial_json: arguments,
                            },
                        });
                    }
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            out.extend(self.close_open_block());
            self.stop_reason = Some(map_finish_reason(reason));
            out.push(StreamEvent::MessageDelta {
                delta: MessageDeltaFields {
                    stop_reason: self.stop_reason,
                    stop_sequence: None,
                },
                usage: self.usage,
            });
            if matches!(reason, FinishReason::Stop | FinishReason::ToolCalls) {
                self.finished_cleanly = true;
            }
        }

        out
    }

    /// Call once the upstream byte stream reaches clean EOF. Per spec, a
    /// synthetic `message_stop` is emitted only here, never on an abrupt
    /// disconnect — abrupt closes leave the downstream SSE simply truncated.
    pub fn finish_on_clean_eof(&mut self) -> Vec<StreamEvent> {
        let mut out = self.close_open_block();
        if !self.finished_cleanly {
            tracing::warn!(message_id = %self.message_id, "stream ended without a finish_reason");
        }
        out.push(StreamEvent::MessageStop);
        out
    }

    fn open_text_block(&mut self) -> Vec<StreamEvent> {
        if matches!(self.open_block, Some((_, OpenBlock::Text))) {
            return Vec::new();
        }
        let mut out = self.close_open_block();
        let index = self.next_index;
        self.next_index += 1;
        self.open_block = Some((index, OpenBlock::Text));
        out.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlock::Text {
                text: String::new(),
            },
        });
        out
    }

    fn close_open_block(&mut self) -> Vec<StreamEvent> {
        match self.open_block.take() {
            Some((index, _)) => vec![StreamEvent::ContentBlockStop { index }],
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_protocol::openai::stream::{
        ChatCompletionStreamChoice, ChatCompletionStreamDelta, ToolCallChunk,
        ToolCallFunctionChunk,
    };

    fn chunk(delta: ChatCompletionStreamDelta, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: "x".to_string(),
            model: "gpt-4o-mini".to_string(),
            choices: vec![ChatCompletionStreamChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }

    #[test]
    fn first_chunk_emits_message_start() {
        let mut state = OpenAiToClaudeStreamState::new("abc", "gpt-4o-mini");
        let events = state.transform_chunk(&chunk(
            ChatCompletionStreamDelta {
                role: Some("assistant".to_string()),
                content: None,
                tool_calls: None,
            },
            None,
        ));
        assert!(matches!(events[0], StreamEvent::MessageStart { .. }));
    }

    #[test]
    fn text_deltas_open_one_block_and_close_on_finish() {
        let mut state = OpenAiToClaudeStreamState::new("abc", "gpt-4o-mini");
        state.transform_chunk(&chunk(
            ChatCompletionStreamDelta {
                role: Some("assistant".to_string()),
                content: Some("Hel".to_string()),
                tool_calls: None,
            },
            None,
        ));
        let events = state.transform_chunk(&chunk(
            ChatCompletionStreamDelta {
                content: Some("lo".to_string()),
                ..Default::default()
            },
            Some(FinishReason::Stop),
        ));
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::ContentBlockStop { index: 0 })));
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::MessageDelta { .. })));

        let tail = state.finish_on_clean_eof();
        assert!(matches!(tail.last(), Some(StreamEvent::MessageStop)));
    }

    #[test]
    fn tool_call_deltas_accumulate_into_one_tool_use_block() {
        let mut state = OpenAiToClaudeStreamState::new("abc", "gpt-4o-mini");
        state.transform_chunk(&chunk(
            ChatCompletionStreamDelta {
                tool_calls: Some(vec![ToolCallChunk {
                    index: 0,
                    id: Some("call_1".to_string()),
                    function: Some(ToolCallFunctionChunk {
                        name: Some("get_weather".to_string()),
                        arguments: Some(String::new()),
                    }),
                }]),
                ..Default::default()
            },
            None,
        ));
        let events = state.transform_chunk(&chunk(
            ChatCompletionStreamDelta {
                tool_calls: Some(vec![ToolCallChunk {
                    index: 0,
                    id: None,
                    function: Some(ToolCallFunctionChunk {
                        name: None,
                        arguments: Some("{\"city\":".to_string()),
                    }),
                }]),
                ..Default::default()
            },
            Some(FinishReason::ToolCalls),
        ));
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::ContentBlockDelta {
                delta: ContentBlockDelta::InputJsonDelta { .. },
                ..
            }
        )));
    }
}
