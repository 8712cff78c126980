use std::sync::Mutex;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, Notify};

const BROADCAST_CAPACITY: usize = 256;

struct BroadcasterState {
    buffer: Vec<Bytes>,
    terminated: bool,
}

/// Fans one upstream byte-chunk stream out to N subscribers (spec.md §4.7).
///
/// Late subscribers replay the buffered chunks first, then switch to live
/// chunks via the same `broadcast::Receiver` — no separate replay channel,
/// so output stays contiguous. A subscriber dropping its receiver never
/// affects the pump or other subscribers; the pump keeps draining the
/// source even if every subscriber has gone, so the Health Tracker still
/// observes the full outcome.
pub struct Broadcaster {
    pub request_id: String,
    /// Mutable because a streaming attempt may fail over to a different
    /// candidate before the pump starts (spec.md §4.8) — the broadcaster is
    /// registered in the Deduplication Index before the winning provider is
    /// known, so the name is settled once, then read by any duplicate that
    /// subscribes afterward.
    provider_name: Mutex<String>,
    state: Mutex<BroadcasterState>,
    sender: broadcast::Sender<Bytes>,
    terminated_notify: Notify,
}

pub struct Subscription {
    pub replay: Vec<Bytes>,
    pub live: broadcast::Receiver<Bytes>,
}

impl Broadcaster {
    pub fn new(request_id: impl Into<String>, provider_name: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            request_id: request_id.into(),
            provider_name: Mutex::new(provider_name.into()),
            state: Mutex::new(BroadcasterState {
                buffer: Vec::new(),
                terminated: false,
            }),
            sender,
            terminated_notify: Notify::new(),
        }
    }

    pub fn provider_name(&self) -> String {
        self.provider_name.lock().expect("broadcaster mutex poisoned").clone()
    }

    pub fn set_provider_name(&self, name: impl Into<String>) {
        *self.provider_name.lock().expect("broadcaster mutex poisoned") = name.into();
    }

    /// Snapshot of buffered chunks plus a receiver for everything emitted
    /// from this point on. Calling after the pump has terminated still
    /// works: `live` simply closes immediately after a caller drains it.
    pub fn subscribe(&self) -> Subscription {
        let guard = self.state.lock().expect("broadcaster mutex poisoned");
        Subscription {
            replay: guard.buffer.clone(),
            live: self.sender.subscribe(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().expect("broadcaster mutex poisoned").terminated
    }

    /// Resolves once the pump has stopped (success or error). A duplicate
    /// that admits onto an in-flight streaming primary (spec.md §4.6) awaits
    /// this before inspecting `buffered_chunks()`, rather than racing a pump
    /// that may still be running.
    pub async fn wait_terminated(&self) {
        let notified = self.terminated_notify.notified();
        if self.is_terminated() {
            return;
        }
        notified.await;
    }

    fn push(&self, chunk: Bytes) {
        let mut guard = self.state.lock().expect("broadcaster mutex poisoned");
        guard.buffer.push(chunk.clone());
        let _ = self.sender.send(chunk);
    }

    fn mark_terminated(&self) {
        self.state.lock().expect("broadcaster mutex poisoned").terminated = true;
        self.terminated_notify.notify_waiters();
    }

    /// Appends one already-framed chunk without driving a whole upstream
    /// source to exhaustion. Used by the OpenAI stream translator, which
    /// produces its own chunk boundaries from a byte source the orchestrator
    /// reads directly rather than handing to `pump`.
    pub(crate) fn push_chunk(&self, chunk: Bytes) {
        self.push(chunk);
    }

    pub(crate) fn finish(&self) {
        self.mark_terminated();
    }

    pub fn buffered_chunks(&self) -> Vec<Bytes> {
        self.state.lock().expect("broadcaster mutex poisoned").buffer.clone()
    }

    /// Drives `source` to completion, copying every chunk into the buffer
    /// and out to live subscribers. Runs to exhaustion regardless of
    /// subscriber presence; the caller decides what to do with the outcome
    /// (health reporting, dedup cleanup) once this returns.
    pub async fn pump(&self, mut source: mpsc::Receiver<Bytes>) {
        while let Some(chunk) = source.recv().await {
            self.push(chunk);
        }
        self.mark_terminated();
    }

    /// Same as `pump`, but replays chunks already consumed by a caller that
    /// peeked ahead on `source` before handing it off (spec.md §4.8: the
    /// orchestrator reads the first SSE event before committing to this
    /// candidate). Nothing peeked is lost — it just reaches subscribers via
    /// the buffer instead of `source` directly.
    pub async fn pump_with_leading(&self, leading: Vec<Bytes>, mut source: mpsc::Receiver<Bytes>) {
        for chunk in leading {
            self.push(chunk);
        }
        while let Some(chunk) = source.recv().await {
            self.push(chunk);
        }
        self.mark_terminated();
    }
}

/// Scans buffered chunks for an SSE `event: error` frame (spec.md §4.7).
/// A textual match on the recorded bytes, not a structured SSE re-parse —
/// the Broadcaster's job is to move bytes, not to understand them.
pub fn contains_error_event(chunks: &[Bytes]) -> bool {
    chunks
        .iter()
        .any(|chunk| contains_subslice(chunk, b"event: error") || contains_subslice(chunk, b"event:error"))
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn wait_terminated_resolves_after_pump_finishes() {
        let broadcaster = Arc::new(Broadcaster::new("req-1", "p1"));
        let (tx, rx) = mpsc::channel(8);
        let pump_broadcaster = broadcaster.clone();
        let pump = tokio::spawn(async move {
            pump_broadcaster.pump(rx).await;
        });
        drop(tx);
        broadcaster.wait_terminated().await;
        pump.await.unwrap();
        assert!(broadcaster.is_terminated());
    }

    #[tokio::test]
    async fn wait_terminated_returns_immediately_if_already_terminated() {
        let broadcaster = Broadcaster::new("req-1", "p1");
        broadcaster.finish();
        broadcaster.wait_terminated().await;
    }

    #[tokio::test]
    async fn subscriber_receives_buffered_then_live_chunks() {
        let broadcaster = Broadcaster::new("req-1", "p1");
        let (tx, rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(b"a")).await.unwrap();
        drop(tx);

        let pump = broadcaster.pump(rx);
        pump.await;

        let mut sub = broadcaster.subscribe();
        assert_eq!(sub.replay, vec![Bytes::from_static(b"a")]);
        assert!(sub.live.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscriber_attached_before_pump_sees_live_chunks() {
        let broadcaster = Broadcaster::new("req-1", "p1");
        let mut sub = broadcaster.subscribe();
        let (tx, rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(b"chunk")).await.unwrap();
        drop(tx);
        let pump = tokio::spawn(async move {
            broadcaster.pump(rx).await;
            broadcaster
        });
        let received = sub.live.recv().await.unwrap();
        assert_eq!(received, Bytes::from_static(b"chunk"));
        let broadcaster = pump.await.unwrap();
        assert!(broadcaster.is_terminated());
    }

    #[test]
    fn detects_error_event_by_textual_match() {
        let chunks = vec![Bytes::from_static(b"event: ping\ndata: {}\n\n"),
            Bytes::from_static(b"event: error\ndata: {\"type\":\"error\"}\n\n")];
        assert!(contains_error_event(&chunks));
    }

    #[test]
    fn no_error_event_when_absent() {
        let chunks = vec![Bytes::from_static(b"event: content_block_delta\n\n")];
        assert!(!contains_error_event(&chunks));
    }
}
