//! # Subscribers
//!
//! Subscriber identity plus the two RAII handles built on the multiplexer:
//! `MountScope` for a UI mount that owns several subscriptions, and
//! `UpdateStream` for consuming one subscription as a `Stream`.

use crate::errors::MuxError;
use crate::multiplexer::{QueryUpdate, SubscriptionMultiplexer};
use crate::query::{QueryKey, QueryRequest};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;
use uuid::Uuid;

/// Caller-chosen identity of a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// A fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_raw(raw: u128) -> Self {
        Self(Uuid::from_u128(raw))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Subscriptions owned by one mounted view.
///
/// Every id obtained through the scope is unsubscribed when the scope is torn
/// down or dropped.
pub struct MountScope {
    mux: SubscriptionMultiplexer,
    name: String,
    ids: Mutex<Vec<SubscriberId>>,
}

impl MountScope {
    pub fn new(mux: SubscriptionMultiplexer, name: impl Into<String>) -> Self {
        Self {
            mux,
            name: name.into(),
            ids: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn multiplexer(&self) -> &SubscriptionMultiplexer {
        &self.mux
    }

    /// Subscribe under a fresh id owned by this scope.
    pub async fn subscribe<F>(
        &self,
        request: QueryRequest,
        callback: F,
    ) -> Result<SubscriberId, MuxError>
    where
        F: Fn(&QueryUpdate) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        // Recorded before the await so a teardown racing the open still
        // detaches it.
        self.ids.lock().push(id);
        match self.mux.subscribe(id, request, callback).await {
            Ok(_) => Ok(id),
            Err(err) => {
                self.ids.lock().retain(|owned| *owned != id);
                Err(err)
            }
        }
    }

    /// Release one subscription early.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let owned = {
            let mut ids = self.ids.lock();
            let before = ids.len();
            ids.retain(|owned| *owned != id);
            ids.len() != before
        };
        owned && self.mux.unsubscribe(id)
    }

    /// Unsubscribe everything this scope owns. Returns how many were detached.
    pub fn teardown(&self) -> usize {
        let ids: Vec<SubscriberId> = std::mem::take(&mut *self.ids.lock());
        let detached = ids.into_iter().filter(|id| self.mux.unsubscribe(*id)).count();
        if detached > 0 {
            debug!("[QueryBus] Scope '{}' released {} subscriptions", self.name, detached);
        }
        detached
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }
}

impl Drop for MountScope {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for MountScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountScope")
            .field("name", &self.name)
            .field("subscriptions", &self.len())
            .finish()
    }
}

/// One subscription consumed as a stream of updates.
///
/// Dropping the stream unsubscribes.
pub struct UpdateStream {
    inner: UnboundedReceiverStream<QueryUpdate>,
    mux: SubscriptionMultiplexer,
    id: SubscriberId,
    key: QueryKey,
}

impl UpdateStream {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<QueryUpdate>,
        mux: SubscriptionMultiplexer,
        id: SubscriberId,
        key: QueryKey,
    ) -> Self {
        Self {
            inner: UnboundedReceiverStream::new(receiver),
            mux,
            id,
            key,
        }
    }

    /// Wait for the next update.
    ///
    /// Returns `None` once the subscription is gone.
    pub async fn next_update(&mut self) -> Option<QueryUpdate> {
        self.inner.next().await
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn query_key(&self) -> &QueryKey {
        &self.key
    }
}

impl Stream for UpdateStream {
    type Item = QueryUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for UpdateStream {
    fn drop(&mut self) {
        self.mux.unsubscribe(self.id);
    }
}
