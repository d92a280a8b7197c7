//! # View Runtime
//!
//! Type-driven rendering of graph objects and live views over the query bus.
//!
//! ## Layers
//!
//! - **Registry**: `ViewRegistry` maps `(type id, detail level)` to a
//!   `Renderer` and an optional live query; also holds context menu and
//!   quick adder plugins.
//! - **Resolver**: `ViewResolver` renders an object with its registered view,
//!   falls back to a key/value dump, and guards recursion against cycles and
//!   runaway depth.
//! - **Host**: `ViewHost` mounts live views in a `MountScope` and re-renders
//!   on every snapshot from the `SubscriptionMultiplexer`.
//!
//! ```text
//!  ViewHost::mount ──subscribe──→ SubscriptionMultiplexer ──snapshot──┐
//!        ↑                                                           │
//!        └── ViewNode ←── ViewResolver::render ←── ViewRegistry ←────┘
//! ```

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod contributions;
pub mod errors;
pub mod host;
pub mod registry;
pub mod renderer;
pub mod resolver;
pub mod view_node;

pub use config::{RuntimeConfig, DEFAULT_MAX_RENDER_DEPTH};
pub use contributions::{ContextMenuContributor, ContextMenuItem, QuickAddDraft, QuickAdder};
pub use errors::{RegistryError, RenderError};
pub use host::{MountTarget, ViewHost};
pub use registry::{Resolution, ViewEntry, ViewQuery, ViewRegistry};
pub use renderer::{DetailLevel, FnRenderer, RenderContext, Renderer};
pub use resolver::{RenderCallbacks, ViewResolver};
pub use view_node::ViewNode;
