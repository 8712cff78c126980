use serde::{Deserialize, Serialize};

use super::types::{ContentBlock, StopReason, Usage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

impl MessagesResponse {
    pub fn validate(&self) -> Result<(), String> {
        if self.kind != "message" {
            return Err(format!("expected type \"message\", got {:?}", self.kind));
        }
        if self.role != "assistant" {
            return Err(format!("expected role \"assistant\", got {:?}", self.role));
        }
        if self.content.is_empty() {
            return Err("message has no content blocks".to_string());
        }
        Ok(())
    }
}
