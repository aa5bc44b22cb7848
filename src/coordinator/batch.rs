//! Request batching.
//!
//! Compatible requests arriving within a window anchored to the first
//! member are merged into one transport call. The window is never extended
//! by later arrivals, which bounds the worst-case added latency.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use super::error::RequestError;
use crate::scheduler::{Priority, TaskOptions};

/// Decides which requests may share a batched call.
pub trait BatchPolicy: Send + Sync {
    /// Batch key for a request, or `None` if it must be sent alone.
    /// Requests with the same key are merged into one `call_batch`.
    fn batch_key(&self, endpoint: &str, params: &Value) -> Option<String>;
}

/// Batches only endpoints declared batchable, only read methods, and only
/// object-shaped params.
///
/// Endpoints may carry a method prefix (`"GET /notes"`); when present it must
/// be `GET` or `HEAD`. Endpoints without one (IPC channel names) rely on the
/// declaration alone.
#[derive(Debug, Clone, Default)]
pub struct DeclaredBatchPolicy {
    endpoints: HashSet<String>,
}

impl DeclaredBatchPolicy {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { endpoints: endpoints.into_iter().map(Into::into).collect() }
    }
}

impl BatchPolicy for DeclaredBatchPolicy {
    fn batch_key(&self, endpoint: &str, params: &Value) -> Option<String> {
        if !self.endpoints.contains(endpoint) || !params.is_object() {
            return None;
        }
        if let Some((method, _path)) = endpoint.split_once(' ') {
            if !matches!(method.to_ascii_uppercase().as_str(), "GET" | "HEAD") {
                return None;
            }
        }
        Some(endpoint.to_string())
    }
}

/// One request waiting in a batch.
pub(crate) struct BatchMember {
    pub params: Value,
    pub options: TaskOptions,
    pub tx: oneshot::Sender<Result<Value, RequestError>>,
}

/// A batch between its first member's arrival and dispatch.
pub(crate) struct PendingBatch {
    pub id: u64,
    pub endpoint: String,
    pub members: Vec<BatchMember>,
    pub opened_at: Instant,
    timer: Option<AbortHandle>,
}

impl PendingBatch {
    /// Highest member priority; the batch must not wait behind any of them.
    pub fn priority(&self) -> Priority {
        self.members.iter().map(|m| m.options.priority).max().unwrap_or_default()
    }

    /// Options for the batch task: first member's budget, highest priority.
    pub fn task_options(&self) -> TaskOptions {
        let mut options = self.members.first().map(|m| m.options).unwrap_or_default();
        options.priority = self.priority();
        options
    }

    pub fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Result of adding a member.
pub(crate) enum JoinOutcome {
    /// First member: caller must arm the window timer.
    Opened { batch_id: u64 },
    Joined,
    /// Size limit reached: caller must dispatch now.
    Full(PendingBatch),
}

/// Open batches keyed by batch key.
pub(crate) struct BatchAccumulator {
    max_batch_size: usize,
    window: Duration,
    pending: Mutex<HashMap<String, PendingBatch>>,
    next_id: AtomicU64,
}

impl BatchAccumulator {
    pub fn new(max_batch_size: usize, window: Duration) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            window,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn join(&self, batch_key: &str, endpoint: &str, member: BatchMember) -> JoinOutcome {
        let mut pending = self.pending.lock();
        let opened = !pending.contains_key(batch_key);
        let batch = pending.entry(batch_key.to_string()).or_insert_with(|| PendingBatch {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            endpoint: endpoint.to_string(),
            members: Vec::new(),
            opened_at: Instant::now(),
            timer: None,
        });
        batch.members.push(member);
        let batch_id = batch.id;

        if batch.members.len() >= self.max_batch_size {
            return match pending.remove(batch_key) {
                Some(full) => JoinOutcome::Full(full),
                None => JoinOutcome::Joined,
            };
        }
        if opened {
            JoinOutcome::Opened { batch_id }
        } else {
            JoinOutcome::Joined
        }
    }

    /// Attach the window timer to a still-open batch. If the batch already
    /// left (size limit), the timer is aborted instead.
    pub fn set_timer(&self, batch_key: &str, batch_id: u64, timer: AbortHandle) {
        let mut pending = self.pending.lock();
        match pending.get_mut(batch_key) {
            Some(batch) if batch.id == batch_id => batch.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    /// Remove the batch for window expiry, if it is still the same batch.
    pub fn take(&self, batch_key: &str, batch_id: u64) -> Option<PendingBatch> {
        let mut pending = self.pending.lock();
        match pending.get(batch_key) {
            Some(batch) if batch.id == batch_id => pending.remove(batch_key),
            _ => None,
        }
    }

    /// Remove every open batch (shutdown).
    pub fn drain(&self) -> Vec<PendingBatch> {
        self.pending.lock().drain().map(|(_, b)| b).collect()
    }

    pub fn open_batches(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn member(id: u32, priority: Priority) -> (BatchMember, oneshot::Receiver<Result<Value, RequestError>>) {
        let (tx, rx) = oneshot::channel();
        let member = BatchMember {
            params: json!({ "id": id }),
            options: TaskOptions::with_priority(priority),
            tx,
        };
        (member, rx)
    }

    #[test]
    fn policy_requires_declaration_read_method_and_object() {
        let policy = DeclaredBatchPolicy::new(["GET /notes", "POST /notes", "notes.get"]);
        assert_eq!(policy.batch_key("GET /notes", &json!({"id": 1})).as_deref(), Some("GET /notes"));
        assert!(policy.batch_key("GET /chats", &json!({"id": 1})).is_none());
        assert!(policy.batch_key("POST /notes", &json!({"id": 1})).is_none());
        assert!(policy.batch_key("GET /notes", &json!([1, 2])).is_none());
        assert!(policy.batch_key("notes.get", &json!({})).is_some());
    }

    #[test]
    fn batch_fills_at_size_limit() {
        let acc = BatchAccumulator::new(2, Duration::from_millis(50));
        let (m1, _r1) = member(1, Priority::Low);
        let (m2, _r2) = member(2, Priority::High);

        assert!(matches!(acc.join("GET /notes", "GET /notes", m1), JoinOutcome::Opened { .. }));
        match acc.join("GET /notes", "GET /notes", m2) {
            JoinOutcome::Full(batch) => {
                assert_eq!(batch.members.len(), 2);
                assert_eq!(batch.priority(), Priority::High);
                assert_eq!(batch.members[0].params, json!({"id": 1}));
            }
            _ => panic!("expected full batch"),
        }
        assert_eq!(acc.open_batches(), 0);
    }

    #[test]
    fn stale_timer_does_not_take_newer_batch() {
        let acc = BatchAccumulator::new(4, Duration::from_millis(50));
        let (m1, _r1) = member(1, Priority::Normal);
        let JoinOutcome::Opened { batch_id: first } = acc.join("k", "GET /notes", m1) else {
            panic!("expected new batch");
        };
        assert!(acc.take("k", first).is_some());

        let (m2, _r2) = member(2, Priority::Normal);
        let JoinOutcome::Opened { batch_id: second } = acc.join("k", "GET /notes", m2) else {
            panic!("expected new batch");
        };
        assert_ne!(first, second);
        assert!(acc.take("k", first).is_none());
        assert!(acc.take("k", second).is_some());
    }
}
