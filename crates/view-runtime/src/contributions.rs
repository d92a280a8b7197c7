//! Additive per-key plugin lists: context menu items and quick adders.

use crate::errors::RenderError;
use crate::renderer::RenderContext;
use graph_model::ObjectView;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Plugins registered under a key, in registration order.
pub(crate) struct Contributions<T> {
    entries: HashMap<String, Vec<T>>,
}

impl<T> Default for Contributions<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> Contributions<T> {
    pub(crate) fn add(&mut self, key: &str, item: T) {
        self.entries.entry(key.to_string()).or_default().push(item);
    }

    pub(crate) fn get(&self, key: &str) -> &[T] {
        self.entries.get(key).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A labelled command offered in an object's context menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextMenuItem {
    pub label: String,
    /// Command id the host dispatches when the item is picked.
    pub command: String,
}

impl ContextMenuItem {
    pub fn new(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: command.into(),
        }
    }
}

/// Produces menu items for one object; `None` to offer nothing.
pub type ContextMenuContributor =
    Arc<dyn Fn(ObjectView<'_>, &RenderContext) -> Option<ContextMenuItem> + Send + Sync>;

/// Preview of an object a quick adder would create.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuickAddDraft {
    pub payload: serde_json::Value,
    pub type_id: String,
}

/// Turns raw input text into a draft object.
#[derive(Clone)]
pub struct QuickAdder {
    tooltip: String,
    adder: Arc<dyn Fn(&str) -> Result<QuickAddDraft, RenderError> + Send + Sync>,
}

impl QuickAdder {
    pub fn new<F>(tooltip: impl Into<String>, adder: F) -> Self
    where
        F: Fn(&str) -> Result<QuickAddDraft, RenderError> + Send + Sync + 'static,
    {
        Self {
            tooltip: tooltip.into(),
            adder: Arc::new(adder),
        }
    }

    pub fn tooltip(&self) -> &str {
        &self.tooltip
    }

    pub fn preview(&self, input: &str) -> Result<QuickAddDraft, RenderError> {
        (self.adder)(input)
    }
}

impl std::fmt::Debug for QuickAdder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuickAdder")
            .field("tooltip", &self.tooltip)
            .finish()
    }
}
