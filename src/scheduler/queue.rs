use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::execution::ReadyAccountRequest;

/// A request waiting for a batch, with its retry bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub request: ReadyAccountRequest,
    /// Failed batch attempts so far.
    pub attempts: u32,
    /// Not eligible for draining before this instant.
    pub not_before: Option<Instant>,
}

impl PendingRequest {
    pub fn new(request: ReadyAccountRequest) -> Self {
        Self {
            request,
            attempts: 0,
            not_before: None,
        }
    }

    fn is_eligible(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }
}

/// Unbounded FIFO of account-creation requests
#[derive(Debug, Default)]
pub struct RequestQueue {
    pending: Mutex<VecDeque<PendingRequest>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fresh request. Never fails.
    pub fn enqueue(&self, request: ReadyAccountRequest) {
        self.pending.lock().push_back(PendingRequest::new(request));
    }

    pub fn extend(&self, requests: impl IntoIterator<Item = ReadyAccountRequest>) {
        self.pending
            .lock()
            .extend(requests.into_iter().map(PendingRequest::new));
    }

    /// Append entries coming back from a failed batch.
    pub fn requeue(&self, entries: impl IntoIterator<Item = PendingRequest>) {
        self.pending.lock().extend(entries);
    }

    /// Put drained entries back at the head, keeping their order.
    pub fn return_front(&self, entries: Vec<PendingRequest>) {
        let mut pending = self.pending.lock();
        for entry in entries.into_iter().rev() {
            pending.push_front(entry);
        }
    }

    /// Remove up to `limit` of the oldest entries eligible at `now`.
    ///
    /// Entries still backing off keep their place.
    pub fn pop_eligible(&self, limit: usize, now: Instant) -> Vec<PendingRequest> {
        let mut pending = self.pending.lock();
        let mut drained = Vec::with_capacity(limit.min(pending.len()));
        let mut kept = VecDeque::with_capacity(pending.len());

        while let Some(entry) = pending.pop_front() {
            if drained.len() < limit && entry.is_eligible(now) {
                drained.push(entry);
            } else {
                kept.push_back(entry);
            }
            if drained.len() == limit {
                break;
            }
        }
        kept.extend(pending.drain(..));
        *pending = kept;

        drained
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    pub fn targets(&self) -> Vec<String> {
        self.pending
            .lock()
            .iter()
            .map(|p| p.request.target.clone())
            .collect()
    }
}
