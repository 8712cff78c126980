use gproxy_protocol::claude::request::CreateMessageRequest;
use serde_json::{Map, Value};

/// Deduplication key for one inbound request (spec.md §4.6, §6). Two
/// concurrent requests that differ only in header noise or the `provider`
/// pin collapse onto the same fingerprint so they share one upstream call.
pub fn compute(request: &CreateMessageRequest) -> String {
    let mut fields = Map::new();
    fields.insert("model".to_string(), Value::String(request.model.clone()));
    fields.insert(
        "messages".to_string(),
        serde_json::to_value(&request.messages).unwrap_or(Value::Null),
    );
    if let Some(system) = &request.system {
        fields.insert(
            "system".to_string(),
            serde_json::to_value(system).unwrap_or(Value::Null),
        );
    }
    if let Some(tools) = &request.tools {
        fields.insert(
            "tools".to_string(),
            serde_json::to_value(tools).unwrap_or(Value::Null),
        );
    }
    if let Some(tool_choice) = &request.tool_choice {
        fields.insert(
            "tool_choice".to_string(),
            serde_json::to_value(tool_choice).unwrap_or(Value::Null),
        );
    }
    if let Some(temperature) = request.temperature {
        fields.insert("temperature".to_string(), json_float(temperature));
    }
    if let Some(top_p) = request.top_p {
        fields.insert("top_p".to_string(), json_float(top_p));
    }
    if let Some(top_k) = request.top_k {
        fields.insert("top_k".to_string(), Value::Number(top_k.into()));
    }
    if let Some(stop_sequences) = &request.stop_sequences {
        fields.insert(
            "stop_sequences".to_string(),
            Value::Array(stop_sequences.iter().cloned().map(Value::String).collect()),
        );
    }
    fields.insert(
        "max_tokens".to_string(),
        Value::Number(request.max_tokens.into()),
    );
    fields.insert(
        "stream".to_string(),
        Value::Bool(request.stream.unwrap_or(false)),
    );
    // Note: the non-standard `provider` pin is intentionally excluded.

    let canonical = canonicalize(&Value::Object(fields));
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

/// Serializes with object keys in sorted order and no insignificant
/// whitespace, so semantically identical requests always produce the same
/// bytes regardless of field order on the wire.
fn canonicalize(value: &Value) -> String {
    fn sort_value(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut sorted = Map::new();
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    sorted.insert(key.clone(), sort_value(&map[key]));
                }
                Value::Object(sorted)
            }
            Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
            other => other.clone(),
        }
    }
    serde_json::to_string(&sort_value(value)).unwrap_or_default()
}

fn json_float(value: f32) -> Value {
    serde_json::Number::from_f64(value as f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gproxy_protocol::claude::types::{Message, MessageContent, Role};

    fn base_request() -> CreateMessageRequest {
        CreateMessageRequest {
            model: "claude-3-5-haiku-20241022".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text("hi".to_string()),
            }],
            system: None,
            max_tokens: 10,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            tools: None,
            tool_choice: None,
            stream: Some(false),
            provider: None,
        }
    }

    #[test]
    fn identical_requests_produce_identical_fingerprints() {
        assert_eq!(compute(&base_request()), compute(&base_request()));
    }

    #[test]
    fn provider_pin_does_not_affect_fingerprint() {
        let mut pinned = base_request();
        pinned.provider = Some("p1".to_string());
        assert_eq!(compute(&base_request()), compute(&pinned));
    }

    #[test]
    fn different_messages_produce_different_fingerprints() {
        let mut other = base_request();
        other.messages[0].content = MessageContent::Text("bye".to_string());
        assert_ne!(compute(&base_request()), compute(&other));
    }
}
