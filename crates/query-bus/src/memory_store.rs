//! # In-Memory Graph Store
//!
//! A `GraphStore` that serves rows published by the caller. Used by tests
//! and the demo binary; a networked adapter implements the same trait.

use crate::errors::StoreError;
use crate::multiplexer::UpstreamSink;
use crate::query::{QueryRequest, QueryTarget};
use crate::store::{GraphStore, UpstreamHandle};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

struct LiveQuery {
    target: String,
    sink: UpstreamSink,
}

#[derive(Default)]
struct StoreState {
    live: HashMap<UpstreamHandle, LiveQuery>,
    /// Current rows per canonical target.
    datasets: HashMap<String, Vec<Value>>,
    /// Opens that will be rejected once, per canonical target.
    failing_opens: HashMap<String, String>,
}

/// In-memory live query store.
///
/// Results are keyed by query target only; options do not change the rows
/// served, only how the multiplexer builds them.
#[derive(Default)]
pub struct InMemoryGraphStore {
    state: Mutex<StoreState>,
    next_handle: AtomicU64,
    opens: AtomicUsize,
    closes: AtomicUsize,
}

impl InMemoryGraphStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the rows for `target` and push them to every live query on it.
    ///
    /// Returns the number of live queries notified.
    pub fn publish(&self, target: &QueryTarget, rows: Vec<Value>) -> usize {
        let canonical = target.canonical();
        let sinks = {
            let mut state = self.state.lock();
            state.datasets.insert(canonical.clone(), rows.clone());
            Self::sinks_for(&state, &canonical)
        };

        debug!(query_target = %canonical, live = sinks.len(), "Rows published");
        for sink in &sinks {
            sink.push(&rows);
        }
        sinks.len()
    }

    /// Kill every live query on `target`.
    pub fn fail(&self, target: &QueryTarget, message: &str) -> usize {
        let canonical = target.canonical();
        let sinks = Self::sinks_for(&self.state.lock(), &canonical);
        for sink in &sinks {
            sink.fail(StoreError::Remote(message.to_string()));
        }
        sinks.len()
    }

    /// Reject the next open on `target`.
    pub fn fail_next_open(&self, target: &QueryTarget, message: &str) {
        self.state
            .lock()
            .failing_opens
            .insert(target.canonical(), message.to_string());
    }

    /// Total opens requested, including rejected ones.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Queries currently open.
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }

    fn sinks_for(state: &StoreState, canonical: &str) -> Vec<UpstreamSink> {
        let mut live: Vec<(&UpstreamHandle, &LiveQuery)> = state
            .live
            .iter()
            .filter(|(_, q)| q.target == canonical)
            .collect();
        live.sort_by_key(|(handle, _)| handle.0);
        live.into_iter().map(|(_, q)| q.sink.clone()).collect()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn open_query(
        &self,
        request: &QueryRequest,
        sink: UpstreamSink,
    ) -> Result<UpstreamHandle, StoreError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let canonical = request.target().canonical();

        let (handle, initial) = {
            let mut state = self.state.lock();
            if let Some(message) = state.failing_opens.remove(&canonical) {
                return Err(StoreError::Rejected(message));
            }
            let handle = UpstreamHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
            state.live.insert(
                handle,
                LiveQuery {
                    target: canonical.clone(),
                    sink: sink.clone(),
                },
            );
            (handle, state.datasets.get(&canonical).cloned())
        };

        debug!(query_target = %canonical, %handle, "Query opened");
        if let Some(rows) = initial {
            sink.push(&rows);
        }
        Ok(handle)
    }

    fn close_query(&self, handle: UpstreamHandle) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.lock().live.remove(&handle).is_none() {
            warn!(%handle, "Close of unknown query handle");
        }
    }
}
