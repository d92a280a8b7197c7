//! # View Registry
//!
//! Maps `(type id, detail level)` to the renderer and the live query that
//! feed a view, plus the additive context menu and quick adder lists.
//!
//! ## Rules
//!
//! - Registration overwrites an existing entry for the same key, with a
//!   warning; already rendered views are not re-rendered
//! - Resolving an unregistered type yields `Resolution::Fallback`, never an
//!   error
//! - One process-wide registry via `ViewRegistry::global()`; tests build
//!   their own with `ViewRegistry::new()`
//!
//! ```rust,ignore
//! let registry = ViewRegistry::new();
//! registry.register_fn("$/schema/contact", DetailLevel::Summary, |obj, _ctx, _cb| {
//!     Ok(ViewNode::text(obj.text("name").unwrap_or_default()))
//! })?;
//! ```

use crate::contributions::{
    ContextMenuContributor, ContextMenuItem, Contributions, QuickAddDraft, QuickAdder,
};
use crate::errors::{is_valid_identifier, RegistryError, RenderError};
use crate::renderer::{DetailLevel, FnRenderer, RenderContext, Renderer};
use crate::resolver::RenderCallbacks;
use crate::view_node::ViewNode;
use graph_model::{ObjectView, Uid};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use query_bus::QueryRequest;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

lazy_static! {
    static ref GLOBAL_REGISTRY: ViewRegistry = ViewRegistry::new();
}

/// Builds the live query a view of one object subscribes to.
#[derive(Clone)]
pub struct ViewQuery(Arc<dyn Fn(&Uid) -> QueryRequest + Send + Sync>);

impl ViewQuery {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(&Uid) -> QueryRequest + Send + Sync + 'static,
    {
        Self(Arc::new(build))
    }

    pub fn for_object(&self, uid: &Uid) -> QueryRequest {
        (self.0)(uid)
    }
}

impl fmt::Debug for ViewQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ViewQuery(..)")
    }
}

/// A registered view.
pub struct ViewEntry {
    type_id: String,
    detail: DetailLevel,
    renderer: Arc<dyn Renderer>,
    query: Option<ViewQuery>,
}

impl ViewEntry {
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn detail(&self) -> DetailLevel {
        self.detail
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    /// The renderer, for registering it under another key.
    pub fn shared_renderer(&self) -> Arc<dyn Renderer> {
        self.renderer.clone()
    }

    pub fn query(&self) -> Option<&ViewQuery> {
        self.query.as_ref()
    }
}

impl fmt::Debug for ViewEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewEntry")
            .field("type_id", &self.type_id)
            .field("detail", &self.detail)
            .field("query", &self.query.is_some())
            .finish()
    }
}

/// Outcome of a registry lookup.
#[derive(Debug, Clone)]
pub enum Resolution {
    View(Arc<ViewEntry>),
    /// No view registered; render with the generic fallback.
    Fallback,
}

impl Resolution {
    pub fn entry(&self) -> Option<&Arc<ViewEntry>> {
        match self {
            Self::View(entry) => Some(entry),
            Self::Fallback => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback)
    }
}

#[derive(Default)]
struct RegistryState {
    views: HashMap<(String, DetailLevel), Arc<ViewEntry>>,
    context_menus: Contributions<ContextMenuContributor>,
    quick_adders: Contributions<QuickAdder>,
}

/// Registry of view plugins. Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct ViewRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl ViewRegistry {
    /// Create an empty, independent registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static ViewRegistry {
        &GLOBAL_REGISTRY
    }

    /// Register the view for `type_id` at `detail`, replacing any existing one.
    pub fn register_view(
        &self,
        type_id: &str,
        detail: DetailLevel,
        renderer: Arc<dyn Renderer>,
        query: Option<ViewQuery>,
    ) -> Result<(), RegistryError> {
        if !is_valid_identifier(type_id) {
            return Err(RegistryError::InvalidTypeId(type_id.to_string()));
        }

        let entry = Arc::new(ViewEntry {
            type_id: type_id.to_string(),
            detail,
            renderer,
            query,
        });

        let previous = self
            .state
            .write()
            .views
            .insert((type_id.to_string(), detail), entry);

        if previous.is_some() {
            warn!(type_id, ?detail, "[ViewRegistry] View already registered, replacing");
        } else {
            info!(type_id, ?detail, "[ViewRegistry] Registered view");
        }
        Ok(())
    }

    /// Register a closure renderer without a query.
    pub fn register_fn<F>(
        &self,
        type_id: &str,
        detail: DetailLevel,
        render: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(ObjectView<'_>, &RenderContext, &mut RenderCallbacks<'_>) -> Result<ViewNode, RenderError>
            + Send
            + Sync
            + 'static,
    {
        self.register_view(type_id, detail, Arc::new(FnRenderer(render)), None)
    }

    /// Look up the view for `type_id` at `detail`.
    pub fn resolve(&self, type_id: &str, detail: DetailLevel) -> Resolution {
        match self.state.read().views.get(&(type_id.to_string(), detail)) {
            Some(entry) => Resolution::View(entry.clone()),
            None => {
                debug!(type_id, ?detail, "[ViewRegistry] No view, falling back");
                Resolution::Fallback
            }
        }
    }

    pub fn is_registered(&self, type_id: &str, detail: DetailLevel) -> bool {
        self.state
            .read()
            .views
            .contains_key(&(type_id.to_string(), detail))
    }

    /// Remove one view. Returns whether it existed.
    pub fn unregister(&self, type_id: &str, detail: DetailLevel) -> bool {
        self.state
            .write()
            .views
            .remove(&(type_id.to_string(), detail))
            .is_some()
    }

    /// Registered `(type id, detail)` pairs, sorted.
    pub fn registered_types(&self) -> Vec<(String, DetailLevel)> {
        let mut keys: Vec<(String, DetailLevel)> =
            self.state.read().views.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop every registration.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.views.clear();
        state.context_menus.clear();
        state.quick_adders.clear();
        debug!("[ViewRegistry] Cleared");
    }

    /// Add a context menu contributor for objects of `type_id`.
    pub fn register_context_menu<F>(&self, type_id: &str, contributor: F) -> Result<(), RegistryError>
    where
        F: Fn(ObjectView<'_>, &RenderContext) -> Option<ContextMenuItem> + Send + Sync + 'static,
    {
        if !is_valid_identifier(type_id) {
            return Err(RegistryError::InvalidTypeId(type_id.to_string()));
        }
        self.state
            .write()
            .context_menus
            .add(type_id, Arc::new(contributor));
        Ok(())
    }

    /// Context menu items for `object`, in registration order.
    ///
    /// Empty for untyped objects and when the context sets `noContextMenu`.
    pub fn context_menu(&self, object: ObjectView<'_>, ctx: &RenderContext) -> Vec<ContextMenuItem> {
        if ctx.flag("noContextMenu") {
            return Vec::new();
        }
        let Ok(type_id) = object.type_id() else {
            return Vec::new();
        };
        let contributors: Vec<ContextMenuContributor> =
            self.state.read().context_menus.get(type_id).to_vec();
        contributors
            .iter()
            .filter_map(|contribute| contribute(object, ctx))
            .collect()
    }

    /// Add a quick adder under each of `triggers` (type ids or short aliases).
    pub fn register_quick_adder(&self, triggers: &[&str], adder: QuickAdder) -> Result<(), RegistryError> {
        if let Some(bad) = triggers.iter().find(|t| !is_valid_identifier(t)) {
            return Err(RegistryError::InvalidTrigger((*bad).to_string()));
        }
        let mut state = self.state.write();
        for trigger in triggers {
            state.quick_adders.add(trigger, adder.clone());
        }
        Ok(())
    }

    /// Drafts from every adder under `trigger`. Failing adders are skipped.
    pub fn quick_add(&self, trigger: &str, input: &str) -> Vec<QuickAddDraft> {
        let adders: Vec<QuickAdder> = self.state.read().quick_adders.get(trigger).to_vec();
        adders
            .iter()
            .filter_map(|adder| match adder.preview(input) {
                Ok(draft) => Some(draft),
                Err(err) => {
                    warn!(trigger, error = %err, "[ViewRegistry] Quick adder failed");
                    None
                }
            })
            .collect()
    }

    /// Registered quick adder triggers with their tooltips, sorted by trigger.
    pub fn quick_adder_triggers(&self) -> Vec<(String, Vec<String>)> {
        let state = self.state.read();
        let mut triggers: Vec<(String, Vec<String>)> = state
            .quick_adders
            .keys()
            .map(|trigger| {
                let tooltips = state
                    .quick_adders
                    .get(trigger)
                    .iter()
                    .map(|a| a.tooltip().to_string())
                    .collect();
                (trigger.to_string(), tooltips)
            })
            .collect();
        triggers.sort_by(|a, b| a.0.cmp(&b.0));
        triggers
    }
}

impl fmt::Debug for ViewRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewRegistry")
            .field("views", &self.state.read().views.len())
            .finish()
    }
}
