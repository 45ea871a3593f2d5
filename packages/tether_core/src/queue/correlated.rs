use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use super::lock;
use crate::error::QueueError;

/// A lookup the polling script has not answered yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingLookup {
    pub request_id: String,
    pub subject_id: String,
    pub timestamp: DateTime<Utc>,
}

/// An answer posted by the polling script, waiting for its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub request_id: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(Value),
    /// Another lookup for the same subject is already in flight.
    Busy,
    /// Nobody answered before the deadline.
    TimedOut,
}

#[derive(Debug, Default)]
struct Inner {
    pending: Vec<PendingLookup>,
    responses: Vec<LookupResponse>,
    in_flight: HashSet<String>,
}

/// Request/response queue with per-subject de-duplication and a bounded wait.
///
/// Each lookup leaves exactly one way: its response is matched, or it is
/// evicted when the waiter gives up (deadline or dropped future).
#[derive(Debug)]
pub struct CorrelatedQueue {
    inner: Mutex<Inner>,
    inserted: Notify,
    timeout: Duration,
}

impl CorrelatedQueue {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            inserted: Notify::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Enqueue a lookup and wait for the polling script to answer it.
    pub async fn lookup(
        &self,
        request_id: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> LookupOutcome {
        let request_id = request_id.into();
        let subject_id = subject_id.into();

        {
            let mut inner = lock(&self.inner);
            if !inner.in_flight.insert(subject_id.clone()) {
                debug!(subject_id = %subject_id, "lookup already in flight");
                return LookupOutcome::Busy;
            }
            inner.pending.push(PendingLookup {
                request_id: request_id.clone(),
                subject_id: subject_id.clone(),
                timestamp: Utc::now(),
            });
        }

        let _evict = EvictOnDrop {
            queue: self,
            request_id: &request_id,
            subject_id: &subject_id,
        };
        let deadline = Instant::now() + self.timeout;

        loop {
            // Register interest before checking, so an insert that lands
            // between the check and the await still wakes us.
            let inserted = self.inserted.notified();
            tokio::pin!(inserted);
            inserted.as_mut().enable();

            if let Some(payload) = self.take_response(&request_id) {
                return LookupOutcome::Found(payload);
            }
            if timeout_at(deadline, inserted).await.is_err() {
                debug!(request_id = %request_id, subject_id = %subject_id, "lookup timed out");
                return LookupOutcome::TimedOut;
            }
        }
    }

    /// Record an answer from the polling script.
    ///
    /// Only answers to a currently pending request are kept. The first answer
    /// wins; a second one for the same id is rejected.
    pub fn respond(&self, request_id: &str, payload: Value) -> Result<(), QueueError> {
        {
            let mut inner = lock(&self.inner);
            if !inner.pending.iter().any(|p| p.request_id == request_id) {
                return Err(QueueError::UnknownRequest(request_id.to_string()));
            }
            if inner.responses.iter().any(|r| r.request_id == request_id) {
                return Err(QueueError::DuplicateResponse(request_id.to_string()));
            }
            inner.responses.push(LookupResponse {
                request_id: request_id.to_string(),
                payload,
                timestamp: Utc::now(),
            });
        }
        self.inserted.notify_waiters();
        Ok(())
    }

    /// Snapshot of pending lookups. Does not consume them.
    pub fn pending(&self) -> Vec<PendingLookup> {
        lock(&self.inner).pending.clone()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.inner).pending.len()
    }

    pub fn response_len(&self) -> usize {
        lock(&self.inner).responses.len()
    }

    pub fn is_in_flight(&self, subject_id: &str) -> bool {
        lock(&self.inner).in_flight.contains(subject_id)
    }

    fn take_response(&self, request_id: &str) -> Option<Value> {
        let mut inner = lock(&self.inner);
        let idx = inner
            .responses
            .iter()
            .position(|r| r.request_id == request_id)?;
        Some(inner.responses.remove(idx).payload)
    }

    fn evict(&self, request_id: &str, subject_id: &str) {
        let mut inner = lock(&self.inner);
        inner.pending.retain(|p| p.request_id != request_id);
        inner.responses.retain(|r| r.request_id != request_id);
        inner.in_flight.remove(subject_id);
    }
}

/// Clears a lookup's pending entry and in-flight mark however the wait ends.
struct EvictOnDrop<'a> {
    queue: &'a CorrelatedQueue,
    request_id: &'a str,
    subject_id: &'a str,
}

impl Drop for EvictOnDrop<'_> {
    fn drop(&mut self) {
        self.queue.evict(self.request_id, self.subject_id);
    }
}
