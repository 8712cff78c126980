use gproxy_protocol::claude::request::CountTokensRequest;
use gproxy_protocol::claude::types::{ContentBlock, SystemPrompt, Tool};

/// Local, upstream-free approximation of `/v1/messages/count_tokens`
/// (spec.md §6: "never calls upstream"). Not the provider's real
/// tokenizer — a byte-count heuristic in the same ballpark consistently used
/// for rough token budgeting (~4 bytes per token for English-ish text),
/// applied uniformly across every content kind rather than pulling in a
/// model-specific BPE tokenizer the core has no business loading.
const BYTES_PER_TOKEN: usize = 4;

pub fn approximate_input_tokens(request: &CountTokensRequest) -> u32 {
    let mut bytes = request.model.len();

    if let Some(system) = &request.system {
        bytes += system_len(system);
    }

    for message in &request.messages {
        for block in message.content.blocks() {
            bytes += content_block_len(&block);
        }
    }

    if let Some(tools) = &request.tools {
        for tool in tools {
            bytes += tool_len(tool);
        }
    }

    ((bytes + BYTES_PER_TOKEN - 1) / BYTES_PER_TOKEN) as u32
}

fn system_len(system: &SystemPrompt) -> usize {
    match system {
        SystemPrompt::Text(text) => text.len(),
        SystemPrompt::Blocks(blocks) => blocks.iter().map(|b| b.text.len()).sum(),
    }
}

fn content_block_len(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text { text } => text.len(),
        ContentBlock::Image { .. } => 0,
        ContentBlock::ToolUse { name, input, .. } => name.len() + input.to_string().len(),
        ContentBlock::ToolResult { content, .. } => content
            .as_ref()
            .map(|c| serde_json::to_string(c).unwrap_or_default().len())
            .unwrap_or(0),
    }
}

fn tool_len(tool: &Tool) -> usize {
    tool.name.len()
        + tool.description.as_deref().map(str::len).unwrap_or(0)
        + tool.input_schema.to_string().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_protocol::claude::types::{Message, MessageContent, Role};

    #[test]
    fn counts_roughly_one_token_per_four_bytes() {
        let request = CountTokensRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text("a".repeat(40)),
            }],
            system: None,
            tools: None,
        };
        let tokens = approximate_input_tokens(&request);
        assert!(tokens >= 10 && tokens <= 20);
    }

    #[test]
    fn empty_request_is_not_zero_tokens() {
        let request = CountTokensRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            messages: vec![],
            system: None,
            tools: None,
        };
        assert!(approximate_input_tokens(&request) > 0);
    }
}
