//! # Subscription Multiplexer
//!
//! Many UI subscribers, one upstream query per distinct `QueryKey`.
//!
//! ## Concurrency
//!
//! All bookkeeping lives behind one `parking_lot::Mutex`. Every
//! check-then-act (find-or-create a shared query, detach the last subscriber)
//! happens inside a single critical section. The lock is never held while
//! calling into the store or into a subscriber callback, so callbacks may
//! subscribe and unsubscribe freely.
//!
//! ## Upstream Lifecycle
//!
//! ```text
//!   first subscribe ──→ Opening ──open Ok──→ Open ──sink.fail──→ Failed
//!                          │                   │                   │
//!                          └──open Err──→ Failed                   │
//!                                                                  │
//!   subscribe while Failed ──→ Opening (new epoch) ←───────────────┘
//!   last unsubscribe ──→ removed; an Open handle is closed immediately,
//!                        an Opening handle is closed when open resolves
//!   opening subscribe dropped before open resolves ──→ Failed
//! ```
//!
//! Each (re)open gets a fresh epoch. Sinks carry the epoch they were issued
//! for, so pushes from a superseded upstream are dropped.

use crate::errors::{invariant_violation, MuxError, StoreError, UpstreamQueryError};
use crate::query::{QueryKey, QueryRequest};
use crate::store::{GraphStore, UpstreamHandle};
use crate::subscriber::{SubscriberId, UpdateStream};
use graph_model::{GraphBuilder, ObjectGraph, ResolveMode};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use view_telemetry::metrics::{
    SNAPSHOTS_DELIVERED, SUBSCRIBERS_ACTIVE, UPSTREAM_CLOSES, UPSTREAM_ERRORS, UPSTREAM_OPENS,
    UPSTREAM_QUERIES_ACTIVE,
};

/// What a subscriber callback receives.
#[derive(Debug, Clone)]
pub enum QueryUpdate {
    /// The complete current result of the query.
    Snapshot(Arc<ObjectGraph>),
    /// The upstream query failed.
    Failed(UpstreamQueryError),
}

impl QueryUpdate {
    pub fn snapshot(&self) -> Option<&Arc<ObjectGraph>> {
        match self {
            Self::Snapshot(graph) => Some(graph),
            Self::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&UpstreamQueryError> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Snapshot(_) => None,
        }
    }
}

/// Subscriber callback.
pub type UpdateCallback = Arc<dyn Fn(&QueryUpdate) + Send + Sync>;

/// Observable state of a shared query's upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamStatus {
    Opening,
    Open,
    Failed,
}

enum Upstream {
    Opening,
    Open(UpstreamHandle),
    Failed,
}

impl Upstream {
    fn status(&self) -> UpstreamStatus {
        match self {
            Self::Opening => UpstreamStatus::Opening,
            Self::Open(_) => UpstreamStatus::Open,
            Self::Failed => UpstreamStatus::Failed,
        }
    }
}

#[derive(Clone)]
struct Attached {
    id: SubscriberId,
    callback: UpdateCallback,
    /// Generation of the newest update handed to this subscriber.
    seen: Arc<AtomicU64>,
}

struct SharedQuery {
    request: QueryRequest,
    epoch: u64,
    upstream: Upstream,
    /// Bumped on every update; orders deliveries per subscriber.
    generation: u64,
    last_result: Option<QueryUpdate>,
    subscribers: Vec<Attached>,
}

impl SharedQuery {
    fn new(request: QueryRequest, epoch: u64) -> Self {
        Self {
            request,
            epoch,
            upstream: Upstream::Opening,
            generation: 0,
            last_result: None,
            subscribers: Vec::new(),
        }
    }

    fn record(&mut self, update: QueryUpdate) -> u64 {
        self.generation += 1;
        self.last_result = Some(update);
        self.generation
    }
}

#[derive(Default)]
struct MuxState {
    queries: HashMap<QueryKey, SharedQuery>,
    /// Which shared query each subscriber is attached to.
    index: HashMap<SubscriberId, QueryKey>,
    next_epoch: u64,
}

impl MuxState {
    fn bump_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }
}

pub(crate) struct MuxInner {
    state: Mutex<MuxState>,
    store: Arc<dyn GraphStore>,
}

/// Shares upstream store queries between subscribers with equal query keys.
#[derive(Clone)]
pub struct SubscriptionMultiplexer {
    inner: Arc<MuxInner>,
}

impl SubscriptionMultiplexer {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            inner: Arc::new(MuxInner {
                state: Mutex::new(MuxState::default()),
                store,
            }),
        }
    }

    /// Attach `id` to the shared query for `request`.
    ///
    /// Creates the shared query and opens it upstream when this is the first
    /// subscriber for the key. A later subscriber gets the latest snapshot
    /// replayed synchronously before this call returns. Re-subscribing an
    /// already attached id to the same key replaces its callback; a failed
    /// shared query is reopened by any subscribe to it.
    pub async fn subscribe<F>(
        &self,
        id: SubscriberId,
        request: QueryRequest,
        callback: F,
    ) -> Result<QueryKey, MuxError>
    where
        F: Fn(&QueryUpdate) + Send + Sync + 'static,
    {
        let callback: UpdateCallback = Arc::new(callback);
        let key = request.key();

        let (replay, open_epoch) = {
            let mut guard = self.inner.state.lock();

            if let Some(current) = guard.index.get(&id) {
                if *current != key {
                    return Err(MuxError::DuplicateSubscriber {
                        subscriber: id,
                        query_key: current.clone(),
                    });
                }
            }

            let mut open_epoch = None;
            if !guard.queries.contains_key(&key) {
                open_epoch = Some(guard.bump_epoch());
            } else if matches!(
                guard.queries.get(&key).map(|q| &q.upstream),
                Some(Upstream::Failed)
            ) {
                open_epoch = Some(guard.bump_epoch());
            }

            let state = &mut *guard;
            let shared = match state.queries.entry(key.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    debug!(query_key = %key.short(), "[QueryBus] New shared query");
                    entry.insert(SharedQuery::new(request.clone(), open_epoch.unwrap_or_default()))
                }
            };

            if let (Some(epoch), Upstream::Failed) = (open_epoch, &shared.upstream) {
                info!(query_key = %key.short(), epoch, "[QueryBus] Retrying failed query");
                shared.epoch = epoch;
                shared.upstream = Upstream::Opening;
                shared.last_result = None;
            }

            let attached = match shared.subscribers.iter_mut().find(|a| a.id == id) {
                Some(existing) => {
                    debug!(subscriber = %id, "[QueryBus] Re-subscribed, replacing callback");
                    existing.callback = callback.clone();
                    // The new callback has seen nothing yet.
                    existing.seen = Arc::new(AtomicU64::new(0));
                    existing.clone()
                }
                None => {
                    let attached = Attached {
                        id,
                        callback: callback.clone(),
                        seen: Arc::new(AtomicU64::new(0)),
                    };
                    shared.subscribers.push(attached.clone());
                    SUBSCRIBERS_ACTIVE.inc();
                    attached
                }
            };
            state.index.insert(id, key.clone());

            let replay = match &shared.last_result {
                Some(update @ QueryUpdate::Snapshot(_)) => {
                    Some((attached, shared.generation, update.clone()))
                }
                _ => None,
            };
            (replay, open_epoch)
        };

        if let Some((target, generation, update)) = replay {
            self.inner.deliver(&key, &target, generation, &update);
        }

        if let Some(epoch) = open_epoch {
            self.open_upstream(key.clone(), request, epoch).await;
        }

        Ok(key)
    }

    /// Subscribe to every object of `type_id`.
    pub async fn subscribe_to_type<F>(
        &self,
        id: SubscriberId,
        type_id: &str,
        callback: F,
    ) -> Result<QueryKey, MuxError>
    where
        F: Fn(&QueryUpdate) + Send + Sync + 'static,
    {
        self.subscribe(id, QueryRequest::for_type(type_id), callback)
            .await
    }

    /// Subscribe and receive updates as a stream.
    ///
    /// Dropping the stream unsubscribes `id`.
    pub async fn watch(
        &self,
        id: SubscriberId,
        request: QueryRequest,
    ) -> Result<UpdateStream, MuxError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = self
            .subscribe(id, request, move |update: &QueryUpdate| {
                let _ = tx.send(update.clone());
            })
            .await?;
        Ok(UpdateStream::new(rx, self.clone(), id, key))
    }

    /// Detach `id`.
    ///
    /// Returns `false` if `id` was not attached. When the last subscriber of
    /// a shared query leaves, the shared query is discarded and its upstream
    /// handle closed before this returns.
    ///
    /// Every delivery re-checks the attachment right before invoking the
    /// callback, so no delivery that reaches that check after this returns
    /// calls it. A delivery running on another thread that already passed
    /// the check may still complete once.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let closing = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            let Some(key) = state.index.remove(&id) else {
                debug!(subscriber = %id, "[QueryBus] Unsubscribe of unknown subscriber");
                return false;
            };
            let Some(shared) = state.queries.get_mut(&key) else {
                invariant_violation("subscriber indexed to a missing shared query");
                return true;
            };

            let before = shared.subscribers.len();
            shared.subscribers.retain(|a| a.id != id);
            if shared.subscribers.len() == before {
                invariant_violation("indexed subscriber missing from its shared query");
            } else {
                SUBSCRIBERS_ACTIVE.dec();
            }

            if shared.subscribers.is_empty() {
                debug!(query_key = %key.short(), "[QueryBus] Last subscriber left, discarding");
                state
                    .queries
                    .remove(&key)
                    .and_then(|q| match q.upstream {
                        Upstream::Open(handle) => Some(handle),
                        _ => None,
                    })
            } else {
                None
            }
        };

        if let Some(handle) = closing {
            self.inner.close_upstream(handle, true);
        }
        true
    }

    /// Detach every subscriber and close every upstream query.
    ///
    /// Returns the number of subscribers detached.
    pub fn shutdown(&self) -> usize {
        let (detached, handles) = {
            let mut state = self.inner.state.lock();
            let detached = state.index.len();
            state.index.clear();
            let handles: Vec<UpstreamHandle> = state
                .queries
                .drain()
                .filter_map(|(_, q)| match q.upstream {
                    Upstream::Open(handle) => Some(handle),
                    _ => None,
                })
                .collect();
            (detached, handles)
        };

        SUBSCRIBERS_ACTIVE.sub(detached as f64);
        for handle in handles {
            self.inner.close_upstream(handle, true);
        }
        info!(detached, "[QueryBus] Shut down");
        detached
    }

    /// Number of live shared queries.
    pub fn shared_query_count(&self) -> usize {
        self.inner.state.lock().queries.len()
    }

    /// Number of subscribers attached to `key`.
    pub fn subscriber_count(&self, key: &QueryKey) -> usize {
        self.inner
            .state
            .lock()
            .queries
            .get(key)
            .map_or(0, |q| q.subscribers.len())
    }

    /// Subscribers attached to `key`, in attach order.
    pub fn subscribers_of(&self, key: &QueryKey) -> Vec<SubscriberId> {
        self.inner
            .state
            .lock()
            .queries
            .get(key)
            .map(|q| q.subscribers.iter().map(|a| a.id).collect())
            .unwrap_or_default()
    }

    /// Latest update recorded for `key`.
    pub fn last_result(&self, key: &QueryKey) -> Option<QueryUpdate> {
        self.inner
            .state
            .lock()
            .queries
            .get(key)
            .and_then(|q| q.last_result.clone())
    }

    pub fn upstream_status(&self, key: &QueryKey) -> Option<UpstreamStatus> {
        self.inner
            .state
            .lock()
            .queries
            .get(key)
            .map(|q| q.upstream.status())
    }

    /// The request a shared query was created with.
    pub fn request_of(&self, key: &QueryKey) -> Option<QueryRequest> {
        self.inner
            .state
            .lock()
            .queries
            .get(key)
            .map(|q| q.request.clone())
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.inner.state.lock().index.contains_key(&id)
    }

    /// Key of the shared query `id` is attached to.
    pub fn query_of(&self, id: SubscriberId) -> Option<QueryKey> {
        self.inner.state.lock().index.get(&id).cloned()
    }

    async fn open_upstream(&self, key: QueryKey, request: QueryRequest, epoch: u64) {
        let sink = UpstreamSink {
            mux: Arc::downgrade(&self.inner),
            key: key.clone(),
            epoch,
            mode: request.options().resolve_mode(),
        };

        UPSTREAM_OPENS.inc();
        debug!(query_key = %key.short(), epoch, "[QueryBus] Opening upstream");

        let mut pending = PendingOpen {
            inner: &*self.inner,
            key: &key,
            epoch,
            armed: true,
        };
        let opened = self.inner.store.open_query(&request, sink).await;
        pending.armed = false;

        match opened {
            Ok(handle) => {
                let adopted = {
                    let mut state = self.inner.state.lock();
                    match state.queries.get_mut(&key) {
                        Some(shared) if shared.epoch == epoch => match shared.upstream {
                            Upstream::Opening => {
                                shared.upstream = Upstream::Open(handle);
                                true
                            }
                            // Failed through the sink before open resolved.
                            Upstream::Failed => false,
                            Upstream::Open(_) => {
                                invariant_violation("shared query opened twice for one epoch");
                                false
                            }
                        },
                        _ => false,
                    }
                };

                if adopted {
                    UPSTREAM_QUERIES_ACTIVE.inc();
                    debug!(query_key = %key.short(), %handle, "[QueryBus] Upstream open");
                } else {
                    debug!(
                        query_key = %key.short(),
                        %handle,
                        "[QueryBus] Upstream no longer wanted, closing"
                    );
                    self.inner.close_upstream(handle, false);
                }
            }
            Err(err) => self.inner.fail(&key, epoch, &err),
        }
    }
}

/// Fails the shared query if the subscribe future is dropped while its
/// upstream open is still pending, so the next subscribe reopens it.
struct PendingOpen<'a> {
    inner: &'a MuxInner,
    key: &'a QueryKey,
    epoch: u64,
    armed: bool,
}

impl Drop for PendingOpen<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(
                query_key = %self.key.short(),
                epoch = self.epoch,
                "[QueryBus] Upstream open abandoned"
            );
            self.inner.fail(self.key, self.epoch, &StoreError::Disconnected);
        }
    }
}

impl std::fmt::Debug for SubscriptionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SubscriptionMultiplexer")
            .field("shared_queries", &state.queries.len())
            .field("subscribers", &state.index.len())
            .finish()
    }
}

impl MuxInner {
    fn close_upstream(&self, handle: UpstreamHandle, was_open: bool) {
        self.store.close_query(handle);
        UPSTREAM_CLOSES.inc();
        if was_open {
            UPSTREAM_QUERIES_ACTIVE.dec();
        }
    }

    fn push(
        &self,
        key: &QueryKey,
        epoch: u64,
        mode: ResolveMode,
        rows: &[serde_json::Value],
    ) -> bool {
        let graph = Arc::new(GraphBuilder::new(mode).build(rows));
        let update = QueryUpdate::Snapshot(graph);

        let (targets, generation) = {
            let mut state = self.state.lock();
            let Some(shared) = state.queries.get_mut(key) else {
                debug!(query_key = %key.short(), "[QueryBus] Dropping push for discarded query");
                return false;
            };
            if shared.epoch != epoch || matches!(shared.upstream, Upstream::Failed) {
                debug!(query_key = %key.short(), epoch, "[QueryBus] Dropping stale push");
                return false;
            }
            let generation = shared.record(update.clone());
            (shared.subscribers.clone(), generation)
        };

        debug!(query_key = %key.short(), subscribers = targets.len(), "[QueryBus] Snapshot");
        for target in &targets {
            self.deliver(key, target, generation, &update);
        }
        true
    }

    fn fail(&self, key: &QueryKey, epoch: u64, err: &StoreError) {
        let error = UpstreamQueryError::new(key.clone(), err);
        let update = QueryUpdate::Failed(error);

        let (targets, generation, handle) = {
            let mut state = self.state.lock();
            let Some(shared) = state.queries.get_mut(key) else {
                debug!(
                    query_key = %key.short(),
                    error = %err,
                    "[QueryBus] Failure for discarded query"
                );
                return;
            };
            if shared.epoch != epoch || matches!(shared.upstream, Upstream::Failed) {
                debug!(
                    query_key = %key.short(),
                    error = %err,
                    "[QueryBus] Ignoring stale failure"
                );
                return;
            }
            let handle = match std::mem::replace(&mut shared.upstream, Upstream::Failed) {
                Upstream::Open(handle) => Some(handle),
                _ => None,
            };
            let generation = shared.record(update.clone());
            (shared.subscribers.clone(), generation, handle)
        };

        warn!(query_key = %key.short(), error = %err, "[QueryBus] Upstream query failed");
        UPSTREAM_ERRORS.inc();
        if let Some(handle) = handle {
            self.close_upstream(handle, true);
        }
        for target in &targets {
            self.deliver(key, target, generation, &update);
        }
    }

    /// Invoke one subscriber callback, unless it was detached or replaced
    /// since the fan-out list was taken, or already saw a newer update.
    fn deliver(&self, key: &QueryKey, target: &Attached, generation: u64, update: &QueryUpdate) {
        let current = {
            let state = self.state.lock();
            state.index.get(&target.id) == Some(key)
                && state.queries.get(key).is_some_and(|q| {
                    q.subscribers
                        .iter()
                        .any(|a| a.id == target.id && Arc::ptr_eq(&a.callback, &target.callback))
                })
        };
        if !current {
            return;
        }
        if target.seen.fetch_max(generation, Ordering::AcqRel) >= generation {
            return;
        }
        (target.callback)(update);
        if matches!(update, QueryUpdate::Snapshot(_)) {
            SNAPSHOTS_DELIVERED.inc();
        }
    }
}

/// Where a store pushes results for one upstream query.
///
/// Holds only a weak reference to the multiplexer; pushes after the
/// multiplexer is gone are ignored.
#[derive(Clone)]
pub struct UpstreamSink {
    mux: Weak<MuxInner>,
    key: QueryKey,
    epoch: u64,
    mode: ResolveMode,
}

impl UpstreamSink {
    /// Deliver the full current result rows.
    ///
    /// Returns `false` if nobody is listening any more.
    pub fn push(&self, rows: &[serde_json::Value]) -> bool {
        match self.mux.upgrade() {
            Some(mux) => mux.push(&self.key, self.epoch, self.mode, rows),
            None => false,
        }
    }

    /// Report that the query died.
    pub fn fail(&self, err: StoreError) {
        if let Some(mux) = self.mux.upgrade() {
            mux.fail(&self.key, self.epoch, &err);
        }
    }

    /// Whether this sink's shared query still wants results.
    pub fn is_live(&self) -> bool {
        self.mux.upgrade().is_some_and(|mux| {
            mux.state.lock().queries.get(&self.key).is_some_and(|q| {
                q.epoch == self.epoch && !matches!(q.upstream, Upstream::Failed)
            })
        })
    }

    pub fn query_key(&self) -> &QueryKey {
        &self.key
    }

    pub fn mode(&self) -> ResolveMode {
        self.mode
    }
}

impl std::fmt::Debug for UpstreamSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSink")
            .field("key", &self.key.short())
            .field("epoch", &self.epoch)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryGraphStore;
    use crate::query::{QueryOptions, QueryTarget};
    use async_trait::async_trait;
    use graph_model::Uid;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn rows(name: &str) -> Vec<serde_json::Value> {
        vec![json!({ "uid": "0x1", "type": "$/schema/note", "title": name })]
    }

    fn title(update: &QueryUpdate) -> Option<String> {
        update
            .snapshot()
            .and_then(|g| g.view(&Uid::from("0x1")))
            .and_then(|v| v.text("title"))
            .map(str::to_string)
    }

    fn recorder() -> (Arc<Mutex<Vec<QueryUpdate>>>, impl Fn(&QueryUpdate) + Send + Sync + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |update: &QueryUpdate| sink.lock().push(update.clone()))
    }

    fn setup() -> (Arc<InMemoryGraphStore>, SubscriptionMultiplexer) {
        let store = Arc::new(InMemoryGraphStore::new());
        let mux = SubscriptionMultiplexer::new(store.clone());
        (store, mux)
    }

    #[tokio::test]
    async fn test_equal_requests_share_one_upstream() {
        let (store, mux) = setup();
        let (log_a, cb_a) = recorder();
        let (log_b, cb_b) = recorder();

        let a = SubscriberId::new();
        let b = SubscriberId::new();
        let key_a = mux.subscribe(a, QueryRequest::text("Q1"), cb_a).await.unwrap();
        let key_b = mux.subscribe(b, QueryRequest::text("  Q1 "), cb_b).await.unwrap();

        assert_eq!(key_a, key_b);
        assert_eq!(store.open_count(), 1);
        assert_eq!(mux.shared_query_count(), 1);
        assert_eq!(mux.subscribers_of(&key_a), vec![a, b]);

        store.publish(&QueryTarget::Text("Q1".into()), rows("first"));
        assert_eq!(log_a.lock().len(), 1);
        assert_eq!(log_b.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_replay() {
        let (store, mux) = setup();
        store.publish(&QueryTarget::Text("Q1".into()), rows("hello"));

        let (log_a, cb_a) = recorder();
        mux.subscribe(SubscriberId::new(), QueryRequest::text("Q1"), cb_a)
            .await
            .unwrap();
        assert_eq!(log_a.lock().len(), 1);

        let (log_b, cb_b) = recorder();
        mux.subscribe(SubscriberId::new(), QueryRequest::text("Q1"), cb_b)
            .await
            .unwrap();

        // Replay is synchronous and does not reopen upstream.
        let replayed = log_b.lock();
        assert_eq!(replayed.len(), 1);
        assert_eq!(title(&replayed[0]).as_deref(), Some("hello"));
        assert_eq!(store.open_count(), 1);
    }

    #[tokio::test]
    async fn test_last_unsubscribe_closes_upstream() {
        let (store, mux) = setup();
        let a = SubscriberId::new();
        let b = SubscriberId::new();
        let key = mux.subscribe(a, QueryRequest::text("Q1"), |_| {}).await.unwrap();
        mux.subscribe(b, QueryRequest::text("Q1"), |_| {}).await.unwrap();

        assert!(mux.unsubscribe(a));
        assert_eq!(store.close_count(), 0);
        assert_eq!(mux.subscriber_count(&key), 1);

        assert!(mux.unsubscribe(b));
        assert_eq!(store.close_count(), 1);
        assert_eq!(store.live_count(), 0);
        assert_eq!(mux.shared_query_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (store, mux) = setup();
        let a = SubscriberId::new();
        mux.subscribe(a, QueryRequest::text("Q1"), |_| {}).await.unwrap();

        assert!(mux.unsubscribe(a));
        assert!(!mux.unsubscribe(a));
        assert!(!mux.unsubscribe(SubscriberId::new()));
        assert_eq!(store.close_count(), 1);
    }

    #[tokio::test]
    async fn test_no_delivery_after_unsubscribe() {
        let (store, mux) = setup();
        let (log, cb) = recorder();
        let a = SubscriberId::new();
        mux.subscribe(a, QueryRequest::text("Q1"), cb).await.unwrap();
        mux.subscribe(SubscriberId::new(), QueryRequest::text("Q1"), |_| {})
            .await
            .unwrap();

        mux.unsubscribe(a);
        store.publish(&QueryTarget::Text("Q1".into()), rows("late"));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_detached_during_fan_out_is_skipped() {
        let (store, mux) = setup();
        let b = SubscriberId::new();
        let handle = mux.clone();
        mux.subscribe(SubscriberId::new(), QueryRequest::text("Q1"), move |_| {
            handle.unsubscribe(b);
        })
        .await
        .unwrap();
        let (log_b, cb_b) = recorder();
        mux.subscribe(b, QueryRequest::text("Q1"), cb_b).await.unwrap();

        store.publish(&QueryTarget::Text("Q1".into()), rows("first"));
        assert!(log_b.lock().is_empty());
        assert!(!mux.is_subscribed(b));
    }

    #[tokio::test]
    async fn test_duplicate_subscriber_on_other_key_is_rejected() {
        let (_store, mux) = setup();
        let a = SubscriberId::new();
        let key = mux.subscribe(a, QueryRequest::text("Q1"), |_| {}).await.unwrap();

        let err = mux
            .subscribe(a, QueryRequest::text("Q2"), |_| {})
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MuxError::DuplicateSubscriber {
                subscriber: a,
                query_key: key.clone(),
            }
        );
        assert_eq!(mux.shared_query_count(), 1);
        assert_eq!(mux.query_of(a), Some(key));
    }

    #[tokio::test]
    async fn test_resubscribe_same_key_replaces_callback() {
        let (store, mux) = setup();
        let (old_log, old_cb) = recorder();
        let (new_log, new_cb) = recorder();
        let a = SubscriberId::new();

        let key = mux.subscribe(a, QueryRequest::text("Q1"), old_cb).await.unwrap();
        store.publish(&QueryTarget::Text("Q1".into()), rows("x"));
        assert_eq!(old_log.lock().len(), 1);

        // The replacement callback gets the current snapshot replayed.
        mux.subscribe(a, QueryRequest::text("Q1"), new_cb).await.unwrap();
        assert_eq!(mux.subscriber_count(&key), 1);
        {
            let replayed = new_log.lock();
            assert_eq!(replayed.len(), 1);
            assert_eq!(title(&replayed[0]).as_deref(), Some("x"));
        }

        store.publish(&QueryTarget::Text("Q1".into()), rows("y"));
        assert_eq!(old_log.lock().len(), 1);
        let updates = new_log.lock();
        assert_eq!(updates.len(), 2);
        assert_eq!(title(&updates[1]).as_deref(), Some("y"));
        assert_eq!(store.open_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_delivered_to_every_subscriber() {
        let (store, mux) = setup();
        let (log_a, cb_a) = recorder();
        let (log_b, cb_b) = recorder();
        let key = mux
            .subscribe(SubscriberId::new(), QueryRequest::text("Q1"), cb_a)
            .await
            .unwrap();
        mux.subscribe(SubscriberId::new(), QueryRequest::text("Q1"), cb_b)
            .await
            .unwrap();

        store.fail(&QueryTarget::Text("Q1".into()), "permission denied");

        for log in [&log_a, &log_b] {
            let updates = log.lock();
            assert_eq!(updates.len(), 1);
            let err = updates[0].error().unwrap();
            assert_eq!(err.query_key, key);
            assert!(err.message.contains("permission denied"));
        }
        assert_eq!(mux.upstream_status(&key), Some(UpstreamStatus::Failed));
        assert_eq!(store.close_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_open_then_retry_on_subscribe() {
        let (store, mux) = setup();
        store.fail_next_open(&QueryTarget::Text("Q1".into()), "bad query");

        let (log, cb) = recorder();
        let key = mux
            .subscribe(SubscriberId::new(), QueryRequest::text("Q1"), cb)
            .await
            .unwrap();
        assert!(log.lock()[0].error().is_some());
        assert_eq!(mux.upstream_status(&key), Some(UpstreamStatus::Failed));

        // Failed results are not replayed; joining reopens instead.
        let (late_log, late_cb) = recorder();
        mux.subscribe(SubscriberId::new(), QueryRequest::text("Q1"), late_cb)
            .await
            .unwrap();
        assert!(late_log.lock().is_empty());
        assert_eq!(store.open_count(), 2);
        assert_eq!(mux.upstream_status(&key), Some(UpstreamStatus::Open));

        store.publish(&QueryTarget::Text("Q1".into()), rows("back"));
        assert_eq!(log.lock().len(), 2);
        assert_eq!(late_log.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_metadata_only_builds_lazy_graph() {
        let (store, mux) = setup();
        let (log, cb) = recorder();
        let request = QueryRequest::text("Q1").with_options(QueryOptions::metadata_only());
        mux.subscribe(SubscriberId::new(), request, cb).await.unwrap();

        store.publish(&QueryTarget::Text("Q1".into()), rows("lazy"));
        let updates = log.lock();
        assert_eq!(updates[0].snapshot().unwrap().mode(), ResolveMode::Lazy);
    }

    #[tokio::test]
    async fn test_callback_may_unsubscribe_itself() {
        let (store, mux) = setup();
        let a = SubscriberId::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = mux.clone();
        let counter = calls.clone();
        mux.subscribe(a, QueryRequest::text("Q1"), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            handle.unsubscribe(a);
        })
        .await
        .unwrap();

        store.publish(&QueryTarget::Text("Q1".into()), rows("once"));
        store.publish(&QueryTarget::Text("Q1".into()), rows("twice"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.live_count(), 0);
    }

    #[tokio::test]
    async fn test_watch_stream_unsubscribes_on_drop() {
        let (store, mux) = setup();
        let id = SubscriberId::new();
        let mut stream = mux.watch(id, QueryRequest::text("Q1")).await.unwrap();

        store.publish(&QueryTarget::Text("Q1".into()), rows("streamed"));
        let update = stream.next_update().await.unwrap();
        assert_eq!(title(&update).as_deref(), Some("streamed"));

        drop(stream);
        assert!(!mux.is_subscribed(id));
        assert_eq!(store.close_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let (store, mux) = setup();
        mux.subscribe(SubscriberId::new(), QueryRequest::text("Q1"), |_| {})
            .await
            .unwrap();
        mux.subscribe(SubscriberId::new(), QueryRequest::for_type("$/schema/note"), |_| {})
            .await
            .unwrap();

        assert_eq!(mux.shutdown(), 2);
        assert_eq!(mux.shared_query_count(), 0);
        assert_eq!(store.live_count(), 0);
    }

    /// Store whose opens wait until released.
    struct GatedStore {
        gate: Notify,
        opens: AtomicUsize,
        closes: AtomicUsize,
    }

    #[async_trait]
    impl GraphStore for GatedStore {
        async fn open_query(
            &self,
            _request: &QueryRequest,
            _sink: UpstreamSink,
        ) -> Result<UpstreamHandle, StoreError> {
            let n = self.opens.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            Ok(UpstreamHandle(n as u64))
        }

        fn close_query(&self, _handle: UpstreamHandle) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn gated() -> (Arc<GatedStore>, SubscriptionMultiplexer) {
        let store = Arc::new(GatedStore {
            gate: Notify::new(),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        });
        let mux = SubscriptionMultiplexer::new(store.clone());
        (store, mux)
    }

    #[tokio::test]
    async fn test_join_during_pending_open_does_not_reopen() {
        let (store, mux) = gated();
        let first = tokio::spawn({
            let mux = mux.clone();
            async move { mux.subscribe(SubscriberId::new(), QueryRequest::text("Q1"), |_| {}).await }
        });
        while store.opens.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        // Returns without waiting for the pending open.
        let key = mux
            .subscribe(SubscriberId::new(), QueryRequest::text("Q1"), |_| {})
            .await
            .unwrap();
        assert_eq!(store.opens.load(Ordering::SeqCst), 1);
        assert_eq!(mux.upstream_status(&key), Some(UpstreamStatus::Opening));

        store.gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(mux.upstream_status(&key), Some(UpstreamStatus::Open));
        assert_eq!(store.closes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_resolving_after_last_unsubscribe_is_closed() {
        let (store, mux) = gated();
        let id = SubscriberId::new();
        let pending = tokio::spawn({
            let mux = mux.clone();
            async move { mux.subscribe(id, QueryRequest::text("Q1"), |_| {}).await }
        });
        while store.opens.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert!(mux.unsubscribe(id));
        assert_eq!(mux.shared_query_count(), 0);
        assert_eq!(store.closes.load(Ordering::SeqCst), 0);

        store.gate.notify_one();
        pending.await.unwrap().unwrap();
        assert_eq!(store.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abandoned_open_fails_and_next_subscribe_reopens() {
        let (store, mux) = gated();
        let (log, cb) = recorder();
        let first = tokio::spawn({
            let mux = mux.clone();
            async move { mux.subscribe(SubscriberId::new(), QueryRequest::text("Q1"), cb).await }
        });
        while store.opens.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        let key = QueryRequest::text("Q1").key();
        assert_eq!(mux.upstream_status(&key), Some(UpstreamStatus::Failed));
        assert!(log.lock()[0].error().is_some());

        let second = tokio::spawn({
            let mux = mux.clone();
            async move { mux.subscribe(SubscriberId::new(), QueryRequest::text("Q1"), |_| {}).await }
        });
        while store.opens.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(mux.upstream_status(&key), Some(UpstreamStatus::Opening));

        store.gate.notify_one();
        second.await.unwrap().unwrap();
        assert_eq!(mux.upstream_status(&key), Some(UpstreamStatus::Open));
        assert_eq!(store.closes.load(Ordering::SeqCst), 0);
    }
}
