pub mod auth;
pub mod error;
pub mod headers;
pub mod http;
pub mod provider;

pub use auth::{resolve_auth, AuthError, TokenSource};
pub use error::{classify, ErrorKind, ErrorPolicy, ProviderError, ProviderResult};
pub use headers::{header_get, header_remove, header_set, Headers};
pub use http::{ByteStream, HttpMethod, UpstreamBody, UpstreamHttpRequest, UpstreamHttpResponse};
pub use provider::{DispatchContext, Provider};
