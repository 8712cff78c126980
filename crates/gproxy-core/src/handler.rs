use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes as AxumBytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use tokio::sync::broadcast;
use tracing::{info, warn};

use gproxy_protocol::claude::request::{CountTokensRequest, CountTokensResponse, CreateMessageRequest};
use gproxy_provider_core::Headers;

use crate::bootstrap::AppState;
use crate::broadcaster::Subscription;
use crate::orchestrator::{MessagesOutcome, PROVIDER_USED_HEADER};
use crate::tokenizer::approximate_input_tokens;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/messages", post(create_message))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .with_state(state)
}

async fn create_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: AxumBytes,
) -> Response {
    let raw_body = Bytes::from(body);
    let request: CreateMessageRequest = match serde_json::from_slice(&raw_body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(crate::error::OrchestratorError::bad_request(format!(
                "invalid request body: {err}"
            )))
        }
    };

    let inbound_headers = headers_to_pairs(&headers);
    let started_at = Instant::now();
    let is_stream = request.stream.unwrap_or(false);
    info!(
        event = "downstream_received",
        model = %request.model,
        is_stream = is_stream,
    );

    match state
        .orchestrator
        .handle_messages(inbound_headers, &request, &raw_body)
        .await
    {
        Ok(MessagesOutcome::NonStreaming {
            status,
            body,
            provider_used,
        }) => {
            info!(
                event = "downstream_responded",
                provider = %provider_used,
                status = status,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                is_stream = false,
            );
            json_response(status, body, &provider_used)
        }
        Ok(MessagesOutcome::Streaming {
            broadcaster,
            provider_used,
        }) => {
            info!(
                event = "downstream_responded",
                provider = %provider_used,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                is_stream = true,
            );
            stream_response(broadcaster.subscribe(), &provider_used)
        }
        Err(err) => {
            warn!(
                event = "downstream_responded",
                status = err.status.as_u16(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                is_stream = is_stream,
            );
            error_response(err)
        }
    }
}

async fn count_tokens(body: AxumBytes) -> Response {
    let request: CountTokensRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            return error_response(crate::error::OrchestratorError::bad_request(format!(
                "invalid request body: {err}"
            )))
        }
    };
    let response = CountTokensResponse {
        input_tokens: approximate_input_tokens(&request),
    };
    Json(response).into_response()
}

fn headers_to_pairs(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn json_response(status: u16, body: Bytes, provider_used: &str) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/json"));
    set_provider_header(&mut response, provider_used);
    response
}

fn stream_response(subscription: Subscription, provider_used: &str) -> Response {
    let body = Body::from_stream(subscription_stream(subscription));
    let mut response = Response::new(body);
    response.headers_mut().insert(
        "content-type",
        HeaderValue::from_static("text/event-stream"),
    );
    set_provider_header(&mut response, provider_used);
    response
}

fn set_provider_header(response: &mut Response, provider_used: &str) {
    if let Ok(value) = HeaderValue::from_str(provider_used) {
        response.headers_mut().insert(PROVIDER_USED_HEADER, value);
    }
}

fn error_response(err: crate::error::OrchestratorError) -> Response {
    let mut response = Response::new(Body::from(err.body));
    *response.status_mut() = err.status;
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/json"));
    response
}

/// Replays buffered chunks then switches to live broadcast chunks (spec.md
/// §4.7): a late subscriber's view is prefix-complete with no gaps. A lagged
/// receiver (subscriber fell behind the broadcast channel's ring buffer)
/// just skips ahead rather than erroring the whole response.
fn subscription_stream(
    subscription: Subscription,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let replay: VecDeque<Bytes> = subscription.replay.into();
    stream::unfold(
        (replay, subscription.live),
        |(mut replay, mut live)| async move {
            if let Some(chunk) = replay.pop_front() {
                return Some((Ok(chunk), (replay, live)));
            }
            loop {
                match live.recv().await {
                    Ok(chunk) => return Some((Ok(chunk), (replay, live))),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        },
    )
}
