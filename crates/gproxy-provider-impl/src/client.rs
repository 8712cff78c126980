use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use wreq::{Client, Proxy};

use gproxy_provider_core::error::ProviderError;
use gproxy_provider_core::{
    ByteStream, ErrorKind, Headers, HttpMethod, ProviderResult, UpstreamBody, UpstreamHttpRequest,
    UpstreamHttpResponse,
};

#[derive(Debug, Clone, Copy)]
pub struct ClientTimeouts {
    pub connect: Duration,
    pub request: Duration,
    pub stream_idle: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            request: Duration::from_secs(120),
            stream_idle: Duration::from_secs(30),
        }
    }
}

/// One `wreq::Client` per distinct outbound proxy, built lazily and cached,
/// mirroring the per-proxy client cache pattern the teacher uses to avoid
/// rebuilding a connection pool on every request.
pub struct WreqProviderClient {
    timeouts: ClientTimeouts,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl WreqProviderClient {
    pub fn new(timeouts: ClientTimeouts) -> Self {
        Self {
            timeouts,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub async fn send(
        &self,
        request: UpstreamHttpRequest,
        proxy: Option<&str>,
    ) -> ProviderResult<UpstreamHttpResponse> {
        let client = self.client_for_proxy(proxy)?;
        let method = match request.method {
            HttpMethod::Get => wreq::Method::GET,
            HttpMethod::Post => wreq::Method::POST,
        };
        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| ProviderError::Transport(classify_transport_error(&err), err.to_string()))?;

        convert_response(response, request.is_stream, self.timeouts.stream_idle).await
    }

    fn client_for_proxy(&self, proxy: Option<&str>) -> ProviderResult<Client> {
        let key = proxy.map(str::to_string);
        let mut guard = self
            .clients
            .lock()
            .map_err(|_| ProviderError::Other("upstream client cache lock poisoned".to_string()))?;
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }
        let client = build_client(&self.timeouts, proxy)
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

fn build_client(timeouts: &ClientTimeouts, proxy: Option<&str>) -> Result<Client, wreq::Error> {
    let mut builder = Client::builder()
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.request)
        .read_timeout(timeouts.stream_idle);
    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }
    builder.build()
}

async fn convert_response(
    response: wreq::Response,
    want_stream: bool,
    stream_idle_timeout: Duration,
) -> ProviderResult<UpstreamHttpResponse> {
    let status = response.status().as_u16();
    let headers = headers_from_wreq(response.headers());

    let is_success = (200..300).contains(&status);
    if !is_success || !want_stream {
        let body = response
            .bytes()
            .await
            .map_err(|err| ProviderError::Other(err.to_string()))?;
        return Ok(UpstreamHttpResponse {
            status,
            headers,
            body: UpstreamBody::Bytes(body),
        });
    }

    let (tx, rx): (tokio::sync::mpsc::Sender<Bytes>, ByteStream) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(stream_idle_timeout, stream.next()).await;
            let Ok(item) = next else {
                // No bytes within the read-timeout window (spec.md §4.2
                // ReadTimeout). The Broadcaster only understands a terminal
                // `event: error` frame in its recorded bytes, so a synthetic
                // one is appended rather than plumbing a separate fault
                // channel through `UpstreamBody::Stream`.
                let _ = tx.send(synthetic_error_frame("read_timeout")).await;
                break;
            };
            let Some(item) = item else {
                break;
            };
            let Ok(chunk) = item else {
                let _ = tx.send(synthetic_error_frame("stream_error")).await;
                break;
            };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
    });

    Ok(UpstreamHttpResponse {
        status,
        headers,
        body: UpstreamBody::Stream(rx),
    })
}

fn synthetic_error_frame(kind: &str) -> Bytes {
    Bytes::from(format!(
        "event: error\ndata: {{\"type\":\"error\",\"error\":{{\"type\":\"{kind}\",\"message\":\"upstream stream {kind}\"}}}}\n\n"
    ))
}

/// Best-effort classification of a pre-response transport failure into the
/// spec.md §4.2 kinds. `wreq`'s error surface (like the `reqwest` it forks)
/// only exposes coarse `is_connect`/`is_timeout` predicates, not a distinct
/// flag per phase, so connect-vs-read timeout is disambiguated by whether
/// the error is also flagged as a connect error.
fn classify_transport_error(err: &wreq::Error) -> ErrorKind {
    if err.is_connect() {
        if err.is_timeout() {
            ErrorKind::ConnectTimeout
        } else {
            ErrorKind::ConnectionError
        }
    } else if err.is_timeout() {
        ErrorKind::ReadTimeout
    } else {
        ErrorKind::ConnectionError
    }
}

fn headers_from_wreq(map: &wreq::header::HeaderMap) -> Headers {
    let mut out = Vec::new();
    for (name, value) in map {
        if let Ok(value) = value.to_str() {
            out.push((name.as_str().to_string(), value.to_string()));
        }
    }
    out
}
