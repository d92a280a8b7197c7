//! # Query Bus - Live Query Subscriptions
//!
//! Multiplexes UI subscribers onto shared upstream queries against a remote
//! graph store.
//!
//! ## Rules
//!
//! - At most one upstream query per distinct `QueryKey`, however many
//!   subscribers ask for it
//! - The upstream query lives exactly as long as its last subscriber
//! - A subscriber joining a query that already has a result gets it replayed
//!   before `subscribe` returns
//! - Upstream failures are delivered to every subscriber as data
//!
//! ```text
//! ┌────────────┐  subscribe(id, Q)   ┌──────────────────────────┐
//! │ view A     │ ──────────────────→ │                          │  open_query(Q)
//! └────────────┘                     │ SubscriptionMultiplexer  │ ─────────────→ GraphStore
//! ┌────────────┐  subscribe(id, Q')  │  key(Q) == key(Q')       │ ←───────────── sink.push(rows)
//! │ view B     │ ──────────────────→ │  one SharedQuery         │
//! └────────────┘                     └──────────────────────────┘
//!        ↑                                        │
//!        └──────── QueryUpdate::Snapshot ─────────┘
//! ```

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod errors;
pub mod memory_store;
pub mod multiplexer;
pub mod query;
pub mod store;
pub mod subscriber;

pub use errors::{MuxError, StoreError, UpstreamQueryError};
pub use memory_store::InMemoryGraphStore;
pub use multiplexer::{
    QueryUpdate, SubscriptionMultiplexer, UpdateCallback, UpstreamSink, UpstreamStatus,
};
pub use query::{QueryKey, QueryOptions, QueryRequest, QueryTarget, METADATA_ONLY};
pub use store::{GraphStore, UpstreamHandle};
pub use subscriber::{MountScope, SubscriberId, UpdateStream};
