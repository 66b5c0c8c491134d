//! The audit emitter (`spec.md` §4.7).

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::instrument;
use url::Url;

/// One lifecycle event (`spec.md` §3 `AuditEvent`, §4.7 event table).
/// All events for one request share `trace_id`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub trace_id: String,
    pub event_type: EventType,
    pub status: EventStatus,
    pub actor_type: String,
    pub actor_id: String,
    pub target_type: String,
    pub target_id: String,
    pub timestamp: String,
    pub request_metadata: serde_json::Value,
    pub response_metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum EventType {
    #[serde(rename = "ORCHESTRATION_REQUEST_RECEIVED")]
    OrchestrationRequestReceived,
    #[serde(rename = "POLICY_CHECK")]
    PolicyCheck,
    #[serde(rename = "CONSENT_CHECK")]
    ConsentCheck,
    #[serde(rename = "PROVIDER_FETCH")]
    ProviderFetch,
    #[serde(rename = "ORCHESTRATION_RESPONSE_SENT")]
    OrchestrationResponseSent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILURE")]
    Failure,
}

/// Non-blocking audit sink backed by a bounded queue and a single
/// background flush task (`spec.md` §4.7, §9 "Audit queue" design
/// note: non-blocking enqueue, bounded memory, FIFO per trace id).
pub struct AuditEmitter {
    sender: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
    flush_task: JoinHandle<()>,
}

impl AuditEmitter {
    pub fn start(http: reqwest::Client, url: Url, queue_size: usize, flush_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let dropped = Arc::new(AtomicU64::new(0));
        let flush_task = tokio::spawn(flush_loop(http, url, receiver, flush_timeout));
        AuditEmitter {
            sender,
            dropped,
            flush_task,
        }
    }

    /// Enqueues `event` without blocking. On a full queue the event is
    /// dropped and the drop counter incremented; per `spec.md` §4.7 "an
    /// audit drop is not a request failure", the caller is never told.
    pub fn emit(&self, event: AuditEvent) {
        if self.sender.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("audit queue full, dropping event");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Closes the queue and waits for the flush task to drain it,
    /// bounded by `grace_period`. Anything still queued past the grace
    /// period is abandoned (`spec.md` §4.7 "bounded grace period").
    pub async fn shutdown(self, grace_period: Duration) {
        drop(self.sender);
        let _ = tokio::time::timeout(grace_period, self.flush_task).await;
    }
}

#[instrument(skip(http, receiver))]
async fn flush_loop(
    http: reqwest::Client,
    url: Url,
    mut receiver: mpsc::Receiver<AuditEvent>,
    flush_timeout: Duration,
) {
    while let Some(event) = receiver.recv().await {
        let trace_id = event.trace_id.clone();
        let result = tokio::time::timeout(flush_timeout, http.post(url.clone()).json(&event).send()).await;
        match result {
            Ok(Ok(response)) if response.status().is_success() => {}
            Ok(Ok(response)) => {
                tracing::warn!(trace_id = %trace_id, status = %response.status(), "audit service rejected event");
            }
            Ok(Err(err)) => {
                tracing::warn!(trace_id = %trace_id, error = %err, "audit flush failed");
            }
            Err(_) => {
                tracing::warn!(trace_id = %trace_id, "audit flush timed out");
            }
        }
    }
}
