//! # Graph Store Port
//!
//! The outbound seam to the remote graph database. The multiplexer is the
//! only caller; adapters only need to push rows into the sink they are given
//! until the handle is closed.

use crate::errors::StoreError;
use crate::multiplexer::UpstreamSink;
use crate::query::QueryRequest;
use async_trait::async_trait;
use std::fmt;

/// Opaque handle of an open upstream query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UpstreamHandle(pub u64);

impl fmt::Display for UpstreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream#{}", self.0)
    }
}

/// A remote graph store capable of live queries.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Open a live query.
    ///
    /// The store calls `sink.push` with the full result each time it changes
    /// and `sink.fail` if the query dies. Pushing before this future resolves
    /// is allowed.
    async fn open_query(
        &self,
        request: &QueryRequest,
        sink: UpstreamSink,
    ) -> Result<UpstreamHandle, StoreError>;

    /// Stop a live query. Must not block and must not call back into the sink.
    fn close_query(&self, handle: UpstreamHandle);
}
