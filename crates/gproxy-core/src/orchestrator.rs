use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use gproxy_common::{ProviderKind, Settings};
use gproxy_protocol::claude::request::CreateMessageRequest;
use gproxy_protocol::claude::response::MessagesResponse;
use gproxy_protocol::claude::stream::StreamEvent;
use gproxy_protocol::claude::types::{ErrorBody, ErrorEnvelope};
use gproxy_protocol::openai::stream::ChatCompletionChunk;
use gproxy_protocol::sse::SseParser;
use gproxy_provider_core::{
    classify, resolve_auth, ByteStream, DispatchContext, ErrorKind, ErrorPolicy, Headers,
    HttpMethod, ProviderError, TokenSource, UpstreamBody, UpstreamHttpRequest,
};
use gproxy_transform::{claude_to_openai_request, OpenAiToClaudeStreamState};

use crate::broadcaster::{contains_error_event, Broadcaster};
use crate::dedup::{Admission, DeduplicationIndex, FinalResponse};
use crate::error::OrchestratorError;
use crate::fingerprint;
use crate::health::{HealthTracker, Outcome};
use crate::registry::ProviderRegistry;
use crate::selector::{Candidate, RouteSelector};

pub const PROVIDER_USED_HEADER: &str = "x-provider-used";
pub const DUPLICATE_PROVIDER_LABEL: &str = "broadcaster-duplicate";

pub enum MessagesOutcome {
    NonStreaming {
        status: u16,
        body: Bytes,
        provider_used: String,
    },
    Streaming {
        broadcaster: Arc<Broadcaster>,
        provider_used: String,
    },
}

pub struct RequestOrchestrator {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
    selector: Arc<RouteSelector>,
    dedup: Arc<DeduplicationIndex>,
    /// Shared with `AppState`'s reload path (spec.md §4.1): reading through
    /// the same `ArcSwap` the admin reload endpoint stores into means a
    /// `selection_strategy`/`failover_http_codes` change in a reloaded config
    /// takes effect on the very next request, not just provider membership.
    settings: Arc<ArcSwap<Settings>>,
    token_source: Arc<dyn TokenSource>,
}

impl RequestOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthTracker>,
        selector: Arc<RouteSelector>,
        dedup: Arc<DeduplicationIndex>,
        settings: Arc<ArcSwap<Settings>>,
        token_source: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            registry,
            health,
            selector,
            dedup,
            settings,
            token_source,
        }
    }

    pub async fn handle_messages(
        &self,
        inbound_headers: Headers,
        request: &CreateMessageRequest,
        raw_body: &Bytes,
    ) -> Result<MessagesOutcome, OrchestratorError> {
        let streaming = request.stream.unwrap_or(false);
        let fp = fingerprint::compute(request);

        if streaming {
            self.handle_streaming(&fp, inbound_headers, request, raw_body)
                .await
        } else {
            self.handle_non_streaming(&fp, inbound_headers, request, raw_body)
                .await
        }
    }

    async fn handle_non_streaming(
        &self,
        fp: &str,
        inbound_headers: Headers,
        request: &CreateMessageRequest,
        raw_body: &Bytes,
    ) -> Result<MessagesOutcome, OrchestratorError> {
        match self.dedup.admit_non_streaming(fp) {
            Admission::SubscriberNonStreaming(rx) => {
                let response = rx
                    .await
                    .map_err(|_| OrchestratorError::no_providers_available())?;
                Ok(MessagesOutcome::NonStreaming {
                    status: response.status,
                    body: response.body,
                    provider_used: DUPLICATE_PROVIDER_LABEL.to_string(),
                })
            }
            Admission::SubscriberStreaming(broadcaster) => {
                // A streaming primary is already in flight (or its error is
                // still retained for the grace window, dedup.rs
                // `finish_stream_shared_error`) for this fingerprint. Wait for
                // it to settle and, if it ended in an `event: error`, surface
                // the same cached error rather than opening a second upstream
                // call for what is supposed to be one logical request
                // (spec.md §8 Testable Property 1, Scenario S5).
                broadcaster.wait_terminated().await;
                match terminal_error_body(&broadcaster.buffered_chunks()) {
                    Some(body) => {
                        let status =
                            classify(ErrorKind::StreamError, false, &[]).surfaced_status;
                        Ok(MessagesOutcome::NonStreaming {
                            status,
                            body,
                            provider_used: DUPLICATE_PROVIDER_LABEL.to_string(),
                        })
                    }
                    None => {
                        // No cached error: the streaming primary succeeded
                        // (its entry is removed immediately on success, so
                        // this is a narrow admit-vs-removal race) or this
                        // caller's grace window lapsed. Either way there is
                        // no terminal error to replay, so run as a fresh
                        // primary rather than re-serving stream content as a
                        // non-streaming body.
                        self.run_primary_non_streaming(fp, None, inbound_headers, request, raw_body)
                            .await
                    }
                }
            }
            Admission::Primary(handle) => {
                self.run_primary_non_streaming(fp, Some(handle), inbound_headers, request, raw_body)
                    .await
            }
        }
    }

    async fn run_primary_non_streaming(
        &self,
        fp: &str,
        handle: Option<crate::dedup::PrimaryHandle>,
        inbound_headers: Headers,
        request: &CreateMessageRequest,
        raw_body: &Bytes,
    ) -> Result<MessagesOutcome, OrchestratorError> {
        let candidates = self.candidates_for(request)?;
        if candidates.is_empty() {
            if let Some(handle) = handle {
                handle.abandon();
            }
            return Err(OrchestratorError::no_providers_available());
        }

        let mut last_error: Option<(u16, Bytes)> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            let provider_name = candidate.provider.config.name.clone();
            let outcome = self
                .attempt_non_streaming(candidate, &inbound_headers, request, raw_body)
                .await;

            match outcome {
                Ok((status, body)) if is_success_body(status, &body) => {
                    self.health.record_result(&provider_name, Outcome::Success);
                    self.selector.note_success(&provider_name);
                    if let Some(handle) = handle {
                        handle.complete(FinalResponse {
                            status,
                            body: body.clone(),
                            provider_name: provider_name.clone(),
                        });
                    }
                    return Ok(MessagesOutcome::NonStreaming {
                        status,
                        body,
                        provider_used: provider_name,
                    });
                }
                Ok((status, body)) => {
                    let kind = classify_http_status(status, &body);
                    let policy = gproxy_provider_core::classify(
                        kind,
                        is_oauth(candidate),
                        &self.settings.load().failover_http_codes,
                    );
                    if policy.counts_toward_unhealthy {
                        self.health.record_result(&provider_name, Outcome::Error);
                    }
                    last_error = Some((policy.surfaced_status, body));
                    if !policy.should_failover || i + 1 == candidates.len() {
                        break;
                    }
                }
                Err(err) => {
                    let policy = transport_error_policy(&err);
                    if policy.counts_toward_unhealthy {
                        self.health.record_result(&provider_name, Outcome::Error);
                    }
                    last_error = Some((policy.surfaced_status, Bytes::from(err.to_string())));
                    if !policy.should_failover || i + 1 == candidates.len() {
                        break;
                    }
                }
            }
        }

        let _ = fp;
        let (status, body) = last_error.unwrap_or_else(|| {
            (
                502,
                Bytes::from_static(b"{\"type\":\"error\",\"error\":{\"type\":\"api_error\",\"message\":\"all candidates failed\"}}"),
            )
        });
        if let Some(handle) = handle {
            handle.fail_shared(FinalResponse {
                status,
                body: body.clone(),
                provider_name: "none".to_string(),
            });
        }
        Err(OrchestratorError::from_upstream(status, body))
    }

    async fn attempt_non_streaming(
        &self,
        candidate: &Candidate,
        inbound_headers: &Headers,
        request: &CreateMessageRequest,
        raw_body: &Bytes,
    ) -> Result<(u16, Bytes), OrchestratorError> {
        let provider = &candidate.provider;
        let outbound_headers = resolve_auth(&provider.config, inbound_headers, &*self.token_source)
            .await
            .map_err(|_| OrchestratorError::authorization_required(&provider.config.name))?;

        let (url, body) = self.build_upstream_request(candidate, request, raw_body)?;

        let upstream_request = UpstreamHttpRequest {
            method: HttpMethod::Post,
            url,
            headers: outbound_headers,
            body,
            is_stream: false,
        };

        let response = provider
            .provider
            .dispatch(
                upstream_request,
                DispatchContext {
                    trace_id: String::new(),
                    attempt_no: 0,
                },
            )
            .await
            .map_err(|err| OrchestratorError::new(http::StatusCode::BAD_GATEWAY, "api_error", err.to_string()))?;

        let status = response.status;
        let body = match response.body {
            UpstreamBody::Bytes(bytes) => bytes,
            UpstreamBody::Stream(mut rx) => {
                let mut collected = Vec::new();
                while let Some(chunk) = rx.recv().await {
                    collected.extend_from_slice(&chunk);
                }
                Bytes::from(collected)
            }
        };

        let translated = if provider.config.kind == ProviderKind::OpenAiCompatible {
            translate_openai_response(status, &body)?
        } else {
            body
        };

        Ok((status, translated))
    }

    /// A registered Broadcaster is shared by every candidate attempt so a
    /// duplicate that admits mid-failover still collapses onto this request
    /// (spec.md §4.6 atomicity). A candidate's `dispatch` returning `Ok` only
    /// opens the connection — the request does not commit to that candidate
    /// until `peek_leading_frames` confirms the first SSE event isn't itself
    /// an `event: error`, matching "streaming failover only before the
    /// broadcaster has sent its first byte to the client" (spec.md §4.8, §7).
    async fn handle_streaming(
        &self,
        fp: &str,
        inbound_headers: Headers,
        request: &CreateMessageRequest,
        raw_body: &Bytes,
    ) -> Result<MessagesOutcome, OrchestratorError> {
        let candidates = self.candidates_for(request)?;
        if candidates.is_empty() {
            return Err(OrchestratorError::no_providers_available());
        }

        let broadcaster = Arc::new(Broadcaster::new(
            fp.to_string(),
            candidates[0].provider.config.name.clone(),
        ));
        let handle = match self.dedup.admit_streaming(fp, broadcaster.clone()) {
            Admission::SubscriberStreaming(existing) => {
                return Ok(MessagesOutcome::Streaming {
                    provider_used: existing.provider_name(),
                    broadcaster: existing,
                })
            }
            Admission::SubscriberNonStreaming(_) => {
                return Err(OrchestratorError::no_providers_available())
            }
            Admission::Primary(handle) => handle,
        };

        let mut last_error: Option<(u16, Bytes)> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            let provider_name = candidate.provider.config.name.clone();
            let outbound_headers = match resolve_auth(
                &candidate.provider.config,
                &inbound_headers,
                &*self.token_source,
            )
            .await
            {
                Ok(headers) => headers,
                Err(_) => {
                    handle.abandon();
                    return Err(OrchestratorError::authorization_required(&provider_name));
                }
            };
            let (url, body) = match self.build_upstream_request(candidate, request, raw_body) {
                Ok(v) => v,
                Err(err) => {
                    handle.abandon();
                    return Err(err);
                }
            };
            let upstream_request = UpstreamHttpRequest {
                method: HttpMethod::Post,
                url,
                headers: outbound_headers,
                body,
                is_stream: true,
            };

            let dispatch_result = candidate
                .provider
                .provider
                .dispatch(
                    upstream_request,
                    DispatchContext {
                        trace_id: String::new(),
                        attempt_no: i as u32,
                    },
                )
                .await;

            let response = match dispatch_result {
                Ok(response) => response,
                Err(err) => {
                    let policy = transport_error_policy(&err);
                    if policy.counts_toward_unhealthy {
                        self.health.record_result(&provider_name, Outcome::Error);
                    }
                    last_error = Some((policy.surfaced_status, Bytes::from(err.to_string())));
                    if !policy.should_failover || i + 1 == candidates.len() {
                        handle.abandon();
                        let (status, body) = last_error.expect("set above");
                        return Err(OrchestratorError::from_upstream(status, body));
                    }
                    continue;
                }
            };

            match response.body {
                UpstreamBody::Bytes(body) => {
                    // A streaming request only ever gets a materialized body
                    // when the upstream answered with a non-2xx status
                    // (client.rs collects the body itself in that case, see
                    // `convert_response`) — there is no stream to peek or
                    // pump, so classify this exactly like a non-streaming
                    // HTTP error and consider failover.
                    let kind = classify_http_status(response.status, &body);
                    let policy = gproxy_provider_core::classify(
                        kind,
                        is_oauth(candidate),
                        &self.settings.load().failover_http_codes,
                    );
                    if policy.counts_toward_unhealthy {
                        self.health.record_result(&provider_name, Outcome::Error);
                    }
                    last_error = Some((policy.surfaced_status, body));
                    if !policy.should_failover || i + 1 == candidates.len() {
                        handle.abandon();
                        let (status, body) = last_error.expect("set above");
                        return Err(OrchestratorError::from_upstream(status, body));
                    }
                    continue;
                }
                UpstreamBody::Stream(mut rx) => match peek_leading_frames(&mut rx).await {
                    StreamPeek::EarlyError(body) => {
                        let policy = classify(
                            ErrorKind::StreamError,
                            is_oauth(candidate),
                            &self.settings.load().failover_http_codes,
                        );
                        if policy.counts_toward_unhealthy {
                            self.health.record_result(&provider_name, Outcome::Error);
                        }
                        last_error = Some((policy.surfaced_status, body));
                        if !policy.should_failover || i + 1 == candidates.len() {
                            handle.abandon();
                            let (status, body) = last_error.expect("set above");
                            return Err(OrchestratorError::from_upstream(status, body));
                        }
                        continue;
                    }
                    StreamPeek::Clean(leading) => {
                        broadcaster.set_provider_name(provider_name.clone());
                        self.spawn_pump(
                            candidate,
                            provider_name.clone(),
                            handle,
                            broadcaster.clone(),
                            leading,
                            rx,
                        );
                        return Ok(MessagesOutcome::Streaming {
                            broadcaster,
                            provider_used: provider_name,
                        });
                    }
                },
            }
        }

        handle.abandon();
        Err(OrchestratorError::no_providers_available())
    }

    /// Drains the winning candidate's upstream stream into `broadcaster` on a
    /// dedicated task and reports the outcome to Health Tracker, Route
    /// Selector stickiness, and the Deduplication Index once the pump stops
    /// (spec.md §4.7, §4.8). Runs to completion regardless of subscriber
    /// disconnects so health bookkeeping reflects the true upstream outcome.
    fn spawn_pump(
        &self,
        candidate: &Candidate,
        provider_name: String,
        handle: crate::dedup::PrimaryHandle,
        broadcaster: Arc<Broadcaster>,
        leading: Vec<Bytes>,
        rx: ByteStream,
    ) {
        let health = self.health.clone();
        let selector = self.selector.clone();
        let kind = candidate.provider.config.kind;
        let message_id = uuid::Uuid::new_v4().to_string();
        let model = candidate.upstream_model.clone();

        tokio::spawn(async move {
            match kind {
                ProviderKind::Anthropic => {
                    broadcaster.pump_with_leading(leading, rx).await;
                }
                ProviderKind::OpenAiCompatible => {
                    pump_openai_translated(&broadcaster, leading, rx, message_id, model).await;
                }
            }
            let chunks = broadcaster.buffered_chunks();
            if contains_error_event(&chunks) {
                health.record_result(&provider_name, Outcome::Error);
                handle.finish_stream_shared_error();
            } else {
                health.record_result(&provider_name, Outcome::Success);
                selector.note_success(&provider_name);
                handle.finish_stream();
            }
        });
    }

    fn candidates_for(
        &self,
        request: &CreateMessageRequest,
    ) -> Result<Vec<Candidate>, OrchestratorError> {
        if let Some(pinned) = &request.provider {
            let Some(entry) = self.registry.by_name(pinned) else {
                return Err(OrchestratorError::no_providers_available());
            };
            if !self.health.is_healthy(pinned) {
                return Ok(Vec::new());
            }
            let upstream_model = request.model.clone();
            return Ok(vec![Candidate {
                upstream_model,
                provider: entry,
            }]);
        }

        Ok(self.selector.select(
            &request.model,
            &self.registry,
            &self.health,
            self.settings.load().selection_strategy,
        ))
    }

    fn build_upstream_request(
        &self,
        candidate: &Candidate,
        request: &CreateMessageRequest,
        raw_body: &Bytes,
    ) -> Result<(String, Bytes), OrchestratorError> {
        let provider = &candidate.provider.config;
        match provider.kind {
            ProviderKind::Anthropic => {
                let mut rewritten = request.clone();
                rewritten.model = candidate.upstream_model.clone();
                let body = if rewritten.model == request.model {
                    raw_body.clone()
                } else {
                    Bytes::from(serde_json::to_vec(&rewritten).unwrap_or_default())
                };
                Ok((format!("{}/v1/messages", provider.base_url), body))
            }
            ProviderKind::OpenAiCompatible => {
                let mut rewritten = request.clone();
                rewritten.model = candidate.upstream_model.clone();
                let openai_request = claude_to_openai_request(&rewritten)
                    .map_err(|err| OrchestratorError::bad_request(err.to_string()))?;
                let body = Bytes::from(serde_json::to_vec(&openai_request).unwrap_or_default());
                Ok((format!("{}/chat/completions", provider.base_url), body))
            }
        }
    }
}

/// Classifies a pre-response dispatch failure (connect/TLS/timeout) using the
/// same policy table as an HTTP-level error (spec.md §4.2, §7). Transport
/// kinds ignore `is_oauth_provider` and `failover_http_codes` — both only
/// matter for the HTTP-status branches of `classify`.
fn transport_error_policy(err: &ProviderError) -> ErrorPolicy {
    match err.kind() {
        Some(kind) => classify(kind, false, &[]),
        None => ErrorPolicy {
            should_failover: true,
            counts_toward_unhealthy: true,
            surfaced_status: 502,
        },
    }
}

/// Outcome of reading a just-opened stream up to its first complete SSE
/// event (spec.md §4.8, §7: "streaming failover only before the broadcaster
/// has sent its first byte to the client").
enum StreamPeek {
    EarlyError(Bytes),
    Clean(Vec<Bytes>),
}

/// Reads `rx` until the first complete SSE event is known. An `event: error`
/// frame with no prior content means this candidate's attempt failed before
/// anything was committed to a subscriber, so the caller can still fail over.
/// Chunks consumed while peeking are returned on the clean path so the pump
/// can replay them into the broadcaster — nothing read here is discarded.
async fn peek_leading_frames(rx: &mut ByteStream) -> StreamPeek {
    let mut parser = SseParser::new();
    let mut leading = Vec::new();
    while let Some(chunk) = rx.recv().await {
        leading.push(chunk.clone());
        if let Some(event) = parser.push_bytes(&chunk).into_iter().next() {
            if event.event.as_deref() == Some("error") {
                return StreamPeek::EarlyError(anthropic_error_body(&event.data));
            }
            return StreamPeek::Clean(leading);
        }
    }
    StreamPeek::Clean(leading)
}

/// Scans a terminated broadcaster's buffered chunks for its last `event:
/// error` frame, used by a non-streaming duplicate that attaches to an
/// already-errored (or still in its grace window) streaming primary (spec.md
/// §8 Scenario S5).
fn terminal_error_body(chunks: &[Bytes]) -> Option<Bytes> {
    let mut parser = SseParser::new();
    let mut last_error_data = None;
    for chunk in chunks {
        for event in parser.push_bytes(chunk) {
            if event.event.as_deref() == Some("error") {
                last_error_data = Some(event.data);
            }
        }
    }
    last_error_data.map(|data| anthropic_error_body(&data))
}

/// Normalizes an `event: error` frame's `data` payload into the Anthropic
/// error-envelope shape, whether the upstream sent a full
/// `{"type":"error","error":{...}}` envelope (Anthropic passthrough) or a
/// bare `{"type":...,"message":...}` body.
fn anthropic_error_body(data: &str) -> Bytes {
    let error_body = serde_json::from_str::<ErrorEnvelope>(data)
        .map(|envelope| envelope.error)
        .or_else(|_| serde_json::from_str::<ErrorBody>(data))
        .unwrap_or_else(|_| ErrorBody {
            kind: "api_error".to_string(),
            message: data.to_string(),
        });
    let envelope = ErrorEnvelope {
        kind: "error".to_string(),
        error: error_body,
    };
    Bytes::from(serde_json::to_vec(&envelope).unwrap_or_default())
}

/// Drains an OpenAI-compatible upstream's raw SSE bytes through
/// `SseParser`, translates each chunk to Anthropic stream events via
/// `OpenAiToClaudeStreamState`, and pushes the re-encoded frames onto
/// `broadcaster` (spec.md §4.4: "OpenAI streaming is translated chunk by
/// chunk into Anthropic SSE events"). `leading` replays chunks the caller
/// already consumed while peeking for an early `event: error` (spec.md
/// §4.8) before committing to this candidate.
async fn pump_openai_translated(
    broadcaster: &Broadcaster,
    leading: Vec<Bytes>,
    mut source: ByteStream,
    message_id: String,
    model: String,
) {
    let mut sse = SseParser::new();
    let mut state = OpenAiToClaudeStreamState::new(message_id, model);
    let mut saw_error = false;

    for chunk in &leading {
        for event in sse.push_bytes(chunk) {
            saw_error |= push_translated_event(broadcaster, &mut state, event);
        }
    }
    while let Some(chunk) = source.recv().await {
        for event in sse.push_bytes(&chunk) {
            saw_error |= push_translated_event(broadcaster, &mut state, event);
        }
    }
    for event in sse.finish() {
        saw_error |= push_translated_event(broadcaster, &mut state, event);
    }

    // A synthetic `event: error` frame is what marks an abrupt close in the
    // byte stream itself (client.rs `convert_response` appends one on a read
    // timeout or a stream-level error before closing the channel); a true
    // clean EOF never produces one. Synthesizing `message_stop` only in the
    // latter case is what makes the spec.md §9 Open-Question resolution
    // ("on abrupt close, emit no synthetic stop") actually reachable.
    if !saw_error {
        for event in state.finish_on_clean_eof() {
            broadcaster.push_chunk(event.to_sse_bytes());
        }
    }
    broadcaster.finish();
}

/// Translates one parsed SSE event and pushes it onto `broadcaster`. Returns
/// whether this was an `event: error` frame, so the caller can tell an
/// abrupt close (an error frame was seen) from a true clean EOF.
fn push_translated_event(
    broadcaster: &Broadcaster,
    state: &mut OpenAiToClaudeStreamState,
    event: gproxy_protocol::sse::SseEvent,
) -> bool {
    if event.data.trim() == "[DONE]" {
        return false;
    }
    if event.event.as_deref() == Some("error") {
        let error_event = StreamEvent::Error {
            error: serde_json::from_str::<ErrorBody>(&event.data).unwrap_or(ErrorBody {
                kind: "api_error".to_string(),
                message: event.data,
            }),
        };
        broadcaster.push_chunk(error_event.to_sse_bytes());
        return true;
    }
    let Ok(parsed) = serde_json::from_str::<ChatCompletionChunk>(&event.data) else {
        tracing::warn!("failed to parse upstream OpenAI stream chunk as JSON");
        return false;
    };
    for translated in state.transform_chunk(&parsed) {
        broadcaster.push_chunk(translated.to_sse_bytes());
    }
    false
}

fn is_oauth(candidate: &Candidate) -> bool {
    matches!(
        candidate.provider.config.auth,
        gproxy_common::AuthScheme::OAuth { .. }
    )
}

fn is_success_body(status: u16, body: &Bytes) -> bool {
    if !(200..300).contains(&status) {
        return false;
    }
    // An HTTP 200 can still carry an Anthropic-shaped error envelope
    // (spec.md §4.8); such bodies are not a success.
    !looks_like_error_envelope(body)
}

fn looks_like_error_envelope(body: &Bytes) -> bool {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("type").and_then(|t| t.as_str()).map(str::to_string))
        .map(|kind| kind == "error")
        .unwrap_or(false)
}

fn classify_http_status(status: u16, body: &Bytes) -> ErrorKind {
    if (200..300).contains(&status) && looks_like_error_envelope(body) {
        return ErrorKind::ApiError;
    }
    ErrorKind::Http(status)
}

fn translate_openai_response(status: u16, body: &Bytes) -> Result<Bytes, OrchestratorError> {
    if !(200..300).contains(&status) {
        return Ok(body.clone());
    }
    let response: gproxy_protocol::openai::response::ChatCompletionResponse =
        serde_json::from_slice(body)
            .map_err(|err| OrchestratorError::new(http::StatusCode::BAD_GATEWAY, "api_error", err.to_string()))?;
    let claude_response: MessagesResponse = gproxy_transform::openai_to_claude_response(&response);
    claude_response
        .validate()
        .map_err(|err| OrchestratorError::new(http::StatusCode::BAD_GATEWAY, "api_error", err))?;
    Ok(Bytes::from(serde_json::to_vec(&claude_response).unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn peek_fails_over_on_leading_error_event() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(
            b"event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"busy\"}}\n\n",
        ))
        .await
        .unwrap();
        drop(tx);

        match peek_leading_frames(&mut rx).await {
            StreamPeek::EarlyError(body) => {
                let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
                assert_eq!(value["type"], "error");
                assert_eq!(value["error"]["type"], "overloaded_error");
            }
            StreamPeek::Clean(_) => panic!("expected an early error"),
        }
    }

    #[tokio::test]
    async fn peek_passes_through_leading_content_chunk() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(
            b"event: message_start\ndata: {\"type\":\"message_start\"}\n\n",
        ))
        .await
        .unwrap();
        drop(tx);

        match peek_leading_frames(&mut rx).await {
            StreamPeek::Clean(leading) => assert_eq!(leading.len(), 1),
            StreamPeek::EarlyError(_) => panic!("expected a clean peek"),
        }
    }

    #[tokio::test]
    async fn peek_on_immediately_closed_stream_is_clean_with_no_leading_chunks() {
        let (tx, mut rx) = mpsc::channel::<Bytes>(8);
        drop(tx);

        match peek_leading_frames(&mut rx).await {
            StreamPeek::Clean(leading) => assert!(leading.is_empty()),
            StreamPeek::EarlyError(_) => panic!("expected a clean peek"),
        }
    }

    #[test]
    fn terminal_error_body_finds_the_last_error_frame() {
        let chunks = vec![
            Bytes::from_static(b"event: ping\ndata: {}\n\n"),
            Bytes::from_static(
                b"event: error\ndata: {\"type\":\"overloaded_error\",\"message\":\"down\"}\n\n",
            ),
        ];
        let body = terminal_error_body(&chunks).expect("expected a cached error");
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"]["type"], "overloaded_error");
        assert_eq!(value["error"]["message"], "down");
    }

    #[test]
    fn terminal_error_body_is_none_without_an_error_frame() {
        let chunks = vec![Bytes::from_static(b"event: message_stop\ndata: {}\n\n")];
        assert!(terminal_error_body(&chunks).is_none());
    }

    #[test]
    fn anthropic_error_body_passes_through_a_full_envelope() {
        let body = anthropic_error_body(
            "{\"type\":\"error\",\"error\":{\"type\":\"api_error\",\"message\":\"oops\"}}",
        );
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "api_error");
        assert_eq!(value["error"]["message"], "oops");
    }

    #[test]
    fn anthropic_error_body_wraps_a_bare_error_body() {
        let body = anthropic_error_body("{\"type\":\"rate_limit_error\",\"message\":\"slow down\"}");
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["error"]["type"], "rate_limit_error");
        assert_eq!(value["error"]["message"], "slow down");
    }

    #[test]
    fn anthropic_error_body_falls_back_to_raw_text() {
        let body = anthropic_error_body("not json");
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "api_error");
        assert_eq!(value["error"]["message"], "not json");
    }
}
