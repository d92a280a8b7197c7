//! # Graph Model
//!
//! The typed object graph that every other crate in the workspace consumes.
//!
//! ## Layers
//!
//! - **Entities**: `GraphObject`, `Value`, `Primitive`, `Uid` and the
//!   `ObjectGraph` arena that owns them.
//! - **Builder**: `GraphBuilder` turns the flat rows pushed by the remote
//!   store into an `ObjectGraph`, resolving references eagerly or leaving
//!   them as lazy uid pointers.
//! - **View**: `ObjectView` and `Node`, the read-only navigation surface
//!   (`get("time_frame/start/datetime")`, `as_kind`, `type_id`).
//!
//! ```text
//!  flat rows ──build()──→ ObjectGraph (arena by uid)
//!                              │
//!                              └──view(uid)──→ ObjectView ──get(path)──→ Node
//! ```
//!
//! Cross-references are never followed as raw pointers: the arena is keyed by
//! uid and every traversal that can revisit an object carries its own visited
//! set.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod builder;
pub mod entities;
pub mod errors;
pub mod view;

pub use builder::{GraphBuilder, ResolveMode};
pub use entities::{GraphObject, ObjectGraph, Primitive, Uid, Value};
pub use errors::ModelError;
pub use view::{Kind, ListView, Node, ObjectView};

/// Field that carries an object's uid in flat result rows.
pub const UID_FIELD: &str = "uid";

/// Field that carries an object's type reference in flat result rows.
pub const TYPE_FIELD: &str = "type";

/// Separator between segments of a field path.
pub const PATH_SEPARATOR: char = '/';
