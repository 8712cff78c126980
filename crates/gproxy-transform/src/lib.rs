pub mod error;
pub mod request;
pub mod response;
pub mod stream;

pub use error::TransformError;
pub use request::claude_to_openai_request;
pub use response::openai_to_claude_response;
pub use stream::OpenAiToClaudeStreamState;
