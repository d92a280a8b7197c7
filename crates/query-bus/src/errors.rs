//! Errors of the query bus.

use crate::query::QueryKey;
use crate::subscriber::SubscriberId;
use thiserror::Error;
use tracing::error;

/// Errors returned to callers of the multiplexer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MuxError {
    /// The subscriber id is already attached to a different shared query.
    #[error("Subscriber {subscriber} is already attached to query {}", query_key.short())]
    DuplicateSubscriber {
        subscriber: SubscriberId,
        query_key: QueryKey,
    },
}

/// Failures reported by a graph store adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store answered with an error.
    #[error("Remote store error: {0}")]
    Remote(String),

    /// The connection to the store is gone.
    #[error("Store disconnected")]
    Disconnected,

    /// The store refused the query.
    #[error("Query rejected: {0}")]
    Rejected(String),
}

/// Upstream failure as delivered to every subscriber of a shared query.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Upstream query {} failed: {message}", query_key.short())]
pub struct UpstreamQueryError {
    pub query_key: QueryKey,
    pub message: String,
}

impl UpstreamQueryError {
    pub fn new(query_key: QueryKey, source: &StoreError) -> Self {
        Self {
            query_key,
            message: source.to_string(),
        }
    }
}

/// Report a broken internal invariant.
///
/// Debug builds panic; release builds log and carry on.
pub(crate) fn invariant_violation(context: &str) {
    if cfg!(debug_assertions) {
        panic!("[QueryBus] invariant violated: {context}");
    }
    error!("[QueryBus] invariant violated: {}", context);
}
