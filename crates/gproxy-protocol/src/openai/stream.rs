use serde::{Deserialize, Serialize};

use super::types::{CompletionUsage, FinishReason, ToolCall};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallChunk {
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<ToolCallFunctionChunk>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallFunctionChunk {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatCompletionStreamDelta {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallChunk>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionStreamChoice {
    pub index: u32,
    pub delta: ChatCompletionStreamDelta,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub model: String,
    pub choices: Vec<ChatCompletionStreamChoice>,
    #[serde(default)]
    pub usage: Option<CompletionUsage>,
}

impl From<ToolCall> for ToolCallChunk {
    fn from(call: ToolCall) -> Self {
        ToolCallChunk {
            index: 0,
            id: Some(call.id),
            function: Some(ToolCallFunctionChunk {
                name: Some(call.function.name),
                arguments: Some(call.function.arguments),
            }),
        }
    }
}
