//! Pending-request table
//!
//! Invariant: every entry is removed exactly once, by a matching response,
//! by its own timeout, by caller cancellation, or by transport close.

use crate::error::TransportError;
use bridge_protocol::{Envelope, RequestId};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Number of timed-out request ids remembered for late-response suppression
const EXPIRED_MEMORY: usize = 256;

pub(crate) type Resolver = oneshot::Sender<Result<Envelope, TransportError>>;

struct PendingRequest {
    resolver: Resolver,
    accepted_types: Vec<String>,
}

impl PendingRequest {
    fn accepts(&self, kind: &str) -> bool {
        self.accepted_types.iter().any(|t| t == kind)
    }
}

#[derive(Default)]
struct TableState {
    /// Insertion order doubles as the type-fallback priority
    entries: IndexMap<RequestId, PendingRequest>,
    expired: VecDeque<RequestId>,
    closed: Option<String>,
}

impl TableState {
    fn remember_expired(&mut self, request_id: RequestId) {
        if self.expired.len() == EXPIRED_MEMORY {
            self.expired.pop_front();
        }
        self.expired.push_back(request_id);
    }
}

/// How an inbound message was consumed
#[derive(Debug, PartialEq)]
pub(crate) enum Resolution {
    /// Resolved the caller waiting on this `requestId`
    ById(RequestId),
    /// Resolved the oldest caller accepting this message `type`
    ByType(RequestId),
    /// Answer to a request that already timed out; dropped
    Late(RequestId),
    /// Nobody was waiting for it
    Unmatched(Envelope),
}

#[derive(Default)]
pub(crate) struct PendingTable {
    state: Mutex<TableState>,
}

impl PendingTable {
    pub(crate) fn insert(
        &self,
        request_id: RequestId,
        accepted_types: &[&str],
    ) -> Result<oneshot::Receiver<Result<Envelope, TransportError>>, TransportError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Err(TransportError::Connection(reason.clone()));
        }
        if state.entries.contains_key(&request_id) {
            return Err(TransportError::DuplicateRequest(request_id));
        }

        let (resolver, receiver) = oneshot::channel();
        state.entries.insert(
            request_id,
            PendingRequest {
                resolver,
                accepted_types: accepted_types.iter().map(ToString::to_string).collect(),
            },
        );
        Ok(receiver)
    }

    /// Route an inbound message: `requestId` match first, `type` match second
    pub(crate) fn resolve(&self, envelope: Envelope) -> Resolution {
        let mut state = self.state.lock();

        if let Some(request_id) = envelope.request_id.clone() {
            if let Some(pending) = state.entries.shift_remove(&request_id) {
                let _ = pending.resolver.send(Ok(envelope));
                return Resolution::ById(request_id);
            }
            if state.expired.contains(&request_id) {
                return Resolution::Late(request_id);
            }
        }

        let kind = envelope.kind();
        let position = state.entries.values().position(|p| p.accepts(kind));
        if let Some((request_id, pending)) = position.and_then(|i| state.entries.shift_remove_index(i)) {
            let _ = pending.resolver.send(Ok(envelope));
            return Resolution::ByType(request_id);
        }

        Resolution::Unmatched(envelope)
    }

    /// Remove an entry whose deadline passed; `false` if it was already resolved
    pub(crate) fn expire(&self, request_id: &RequestId) -> bool {
        let mut state = self.state.lock();
        if state.entries.shift_remove(request_id).is_some() {
            state.remember_expired(request_id.clone());
            true
        } else {
            false
        }
    }

    /// Remove an entry whose caller went away
    pub(crate) fn cancel(&self, request_id: &RequestId) {
        let mut state = self.state.lock();
        if state.entries.shift_remove(request_id).is_some() {
            state.remember_expired(request_id.clone());
        }
    }

    /// Reject every outstanding entry and refuse new ones
    pub(crate) fn reject_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.state.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.to_string());
            }
            state.entries.drain(..).map(|(_, p)| p).collect()
        };

        let count = drained.len();
        for pending in drained {
            let _ = pending
                .resolver
                .send(Err(TransportError::Connection(reason.to_string())));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

/// Removes its entry on drop unless disarmed
pub(crate) struct PendingGuard {
    table: Arc<PendingTable>,
    request_id: RequestId,
    armed: bool,
}

impl PendingGuard {
    pub(crate) fn new(table: Arc<PendingTable>, request_id: RequestId) -> Self {
        Self {
            table,
            request_id,
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.table.cancel(&self.request_id);
        }
    }
}
