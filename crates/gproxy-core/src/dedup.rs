use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::broadcaster::Broadcaster;

#[derive(Debug, Clone)]
pub struct FinalResponse {
    pub status: u16,
    pub body: Bytes,
    pub provider_name: String,
}

enum Entry {
    Pending {
        subscribers: Vec<oneshot::Sender<FinalResponse>>,
    },
    Streaming {
        broadcaster: Arc<Broadcaster>,
    },
}

struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
}

impl Inner {
    fn remove(&self, fingerprint: &str) {
        self.entries
            .lock()
            .expect("dedup index mutex poisoned")
            .remove(fingerprint);
    }
}

pub enum Admission {
    Primary(PrimaryHandle),
    SubscriberNonStreaming(oneshot::Receiver<FinalResponse>),
    SubscriberStreaming(Arc<Broadcaster>),
}

/// Handle the primary holder uses to report its outcome to waiting
/// subscribers (spec.md §4.6).
pub struct PrimaryHandle {
    fingerprint: String,
    index: Arc<Inner>,
    grace_period: Duration,
}

impl PrimaryHandle {
    /// Successful non-streaming completion: notify any subscribers that
    /// attached while the primary was in flight, then remove the entry.
    pub fn complete(self, response: FinalResponse) {
        let mut guard = self.index.entries.lock().expect("dedup index mutex poisoned");
        if let Some(Entry::Pending { subscribers }) = guard.remove(&self.fingerprint) {
            for tx in subscribers {
                let _ = tx.send(response.clone());
            }
        }
    }

    /// Error classified as "should surface same error to concurrent
    /// duplicates": notify subscribers already attached, then drop the
    /// entry immediately. Unlike the streaming case, a non-streaming
    /// duplicate observes the primary's outcome synchronously via its
    /// `oneshot` future rather than by polling the index, so there is no
    /// race window a grace period would need to cover (spec.md §9).
    pub fn fail_shared(self, response: FinalResponse) {
        let mut guard = self.index.entries.lock().expect("dedup index mutex poisoned");
        if let Some(Entry::Pending { subscribers }) = guard.remove(&self.fingerprint) {
            for tx in subscribers {
                let _ = tx.send(response.clone());
            }
        }
    }

    /// Streaming primary finished (success or terminal failure already
    /// forwarded in-band by the broadcaster): drop the entry immediately.
    pub fn finish_stream(self) {
        self.index.remove(&self.fingerprint);
    }

    /// Streaming primary's pump observed an `event: error` before any byte
    /// reached the client: keep the broadcaster (and its cached error
    /// chunks) reachable for `grace_period` so duplicates attach to the
    /// same error, then drop the entry.
    pub fn finish_stream_shared_error(self) {
        let index = self.index.clone();
        let fingerprint = self.fingerprint.clone();
        let grace_period = self.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            index.remove(&fingerprint);
        });
    }

    /// Primary crashed without producing a result: remove immediately;
    /// pending subscribers see their channel dropped (a generic failure).
    pub fn abandon(self) {
        self.index.remove(&self.fingerprint);
    }
}

/// Maps a request fingerprint to an in-flight admission (spec.md §4.6).
/// `admit` is atomic under a single mutex: exactly one caller for a given
/// fingerprint becomes `Primary`, all others in the same window attach as
/// subscribers.
pub struct DeduplicationIndex {
    inner: Arc<Inner>,
    grace_period: Duration,
}

impl DeduplicationIndex {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
            }),
            grace_period,
        }
    }

    pub fn admit_non_streaming(&self, fingerprint: &str) -> Admission {
        let mut guard = self.inner.entries.lock().expect("dedup index mutex poisoned");
        match guard.get_mut(fingerprint) {
            Some(Entry::Pending { subscribers }) => {
                let (tx, rx) = oneshot::channel();
                subscribers.push(tx);
                Admission::SubscriberNonStreaming(rx)
            }
            Some(Entry::Streaming { broadcaster }) => {
                Admission::SubscriberStreaming(broadcaster.clone())
            }
            None => {
                guard.insert(
                    fingerprint.to_string(),
                    Entry::Pending {
                        subscribers: Vec::new(),
                    },
                );
                Admission::Primary(PrimaryHandle {
                    fingerprint: fingerprint.to_string(),
                    index: self.inner.clone(),
                    grace_period: self.grace_period,
                })
            }
        }
    }

    pub fn admit_streaming(&self, fingerprint: &str, broadcaster: Arc<Broadcaster>) -> Admission {
        let mut guard = self.inner.entries.lock().expect("dedup index mutex poisoned");
        match guard.get(fingerprint) {
            Some(Entry::Streaming { broadcaster }) => {
                Admission::SubscriberStreaming(broadcaster.clone())
            }
            Some(Entry::Pending { .. }) | None => {
                guard.insert(
                    fingerprint.to_string(),
                    Entry::Streaming {
                        broadcaster: broadcaster.clone(),
                    },
                );
                Admission::Primary(PrimaryHandle {
                    fingerprint: fingerprint.to_string(),
                    index: self.inner.clone(),
                    grace_period: self.grace_period,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_admit_for_same_fingerprint_is_a_subscriber() {
        let index = DeduplicationIndex::new(Duration::from_millis(50));
        let first = index.admit_non_streaming("fp1");
        assert!(matches!(first, Admission::Primary(_)));
        let second = index.admit_non_streaming("fp1");
        assert!(matches!(second, Admission::SubscriberNonStreaming(_)));
    }

    #[tokio::test]
    async fn subscriber_receives_primarys_completion() {
        let index = DeduplicationIndex::new(Duration::from_millis(50));
        let Admission::Primary(handle) = index.admit_non_streaming("fp1") else {
            panic!("expected primary");
        };
        let Admission::SubscriberNonStreaming(rx) = index.admit_non_streaming("fp1") else {
            panic!("expected subscriber");
        };
        handle.complete(FinalResponse {
            status: 200,
            body: Bytes::from_static(b"{}"),
            provider_name: "p1".to_string(),
        });
        let result = rx.await.unwrap();
        assert_eq!(result.status, 200);
    }

    #[tokio::test]
    async fn success_removes_entry_immediately() {
        let index = DeduplicationIndex::new(Duration::from_millis(50));
        let Admission::Primary(handle) = index.admit_non_streaming("fp1") else {
            panic!("expected primary");
        };
        handle.complete(FinalResponse {
            status: 200,
            body: Bytes::from_static(b"{}"),
            provider_name: "p1".to_string(),
        });
        let next = index.admit_non_streaming("fp1");
        assert!(matches!(next, Admission::Primary(_)));
    }

    #[tokio::test]
    async fn shared_error_reaches_subscribers_attached_before_it_resolves() {
        let index = DeduplicationIndex::new(Duration::from_millis(30));
        let Admission::Primary(handle) = index.admit_non_streaming("fp1") else {
            panic!("expected primary");
        };
        let Admission::SubscriberNonStreaming(rx) = index.admit_non_streaming("fp1") else {
            panic!("expected subscriber");
        };
        handle.fail_shared(FinalResponse {
            status: 503,
            body: Bytes::from_static(b"{}"),
            provider_name: "p1".to_string(),
        });
        let result = rx.await.unwrap();
        assert_eq!(result.status, 503);
    }

    #[tokio::test]
    async fn non_streaming_shared_error_does_not_linger_for_later_admissions() {
        let index = DeduplicationIndex::new(Duration::from_millis(30));
        let Admission::Primary(handle) = index.admit_non_streaming("fp1") else {
            panic!("expected primary");
        };
        handle.fail_shared(FinalResponse {
            status: 503,
            body: Bytes::from_static(b"{}"),
            provider_name: "p1".to_string(),
        });
        let next = index.admit_non_streaming("fp1");
        assert!(matches!(next, Admission::Primary(_)));
    }

    #[tokio::test]
    async fn abandoned_primary_drops_subscribers_with_a_generic_failure() {
        let index = DeduplicationIndex::new(Duration::from_millis(50));
        let Admission::Primary(handle) = index.admit_non_streaming("fp1") else {
            panic!("expected primary");
        };
        let Admission::SubscriberNonStreaming(rx) = index.admit_non_streaming("fp1") else {
            panic!("expected subscriber");
        };
        handle.abandon();
        assert!(rx.await.is_err());
    }
}
