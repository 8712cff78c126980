use async_trait::async_trait;
use gproxy_common::ProviderKind;

use crate::error::ProviderResult;
use crate::http::{UpstreamHttpRequest, UpstreamHttpResponse};

#[derive(Debug, Clone)]
pub struct DispatchContext {
    pub trace_id: String,
    pub attempt_no: u32,
}

/// An upstream endpoint capable of taking an already-authenticated HTTP
/// request and returning its raw response. Format translation happens above
/// this seam (in the orchestrator); a `Provider` only knows how to move
/// bytes, same as the teacher's thin `call()`-only trait.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> ProviderKind;

    async fn dispatch(
        &self,
        request: UpstreamHttpRequest,
        ctx: DispatchContext,
    ) -> ProviderResult<UpstreamHttpResponse>;
}
