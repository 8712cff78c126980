#[derive(Debug, Clone, thiserror::Error)]
pub enum TransformError {
    #[error("unsupported content block: {0}")]
    UnsupportedContentBlock(String),
    #[error("tool_result content could not be serialized: {0}")]
    UnserializableToolResult(String),
}
