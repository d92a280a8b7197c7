//! # Renderer Plugins
//!
//! A renderer turns one object into a `ViewNode`. It gets the object view,
//! the render context of its mount point, and a `RenderCallbacks` bag for
//! recursing into children through the resolver.

use crate::errors::RenderError;
use crate::resolver::RenderCallbacks;
use crate::view_node::ViewNode;
use graph_model::ObjectView;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which of a type's two views to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    /// Compact view used in lists and embeds.
    #[default]
    Summary,
    /// Full-page view.
    Detailed,
}

/// Flags a mount point passes down the render tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    /// Rendered inside running text.
    pub inline: bool,
    /// Rendered as an embed inside another object's view.
    pub is_embed: bool,
    flags: BTreeMap<String, bool>,
}

impl RenderContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn inline() -> Self {
        Self {
            inline: true,
            ..Self::default()
        }
    }

    /// Same flags, marked as an embed.
    #[must_use]
    pub fn embedded(&self) -> Self {
        Self {
            is_embed: true,
            ..self.clone()
        }
    }

    /// Set a named flag such as `noDate` or `noContextMenu`.
    #[must_use]
    pub fn with_flag(mut self, name: impl Into<String>, value: bool) -> Self {
        self.flags.insert(name.into(), value);
        self
    }

    /// Value of a named flag; unset flags are `false`.
    pub fn flag(&self, name: &str) -> bool {
        self.flags.get(name).copied().unwrap_or(false)
    }
}

/// A view plugin for one schema type.
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        object: ObjectView<'_>,
        ctx: &RenderContext,
        callbacks: &mut RenderCallbacks<'_>,
    ) -> Result<ViewNode, RenderError>;
}

/// Adapter for closure renderers.
pub struct FnRenderer<F>(pub F);

impl<F> Renderer for FnRenderer<F>
where
    F: Fn(ObjectView<'_>, &RenderContext, &mut RenderCallbacks<'_>) -> Result<ViewNode, RenderError>
        + Send
        + Sync,
{
    fn render(
        &self,
        object: ObjectView<'_>,
        ctx: &RenderContext,
        callbacks: &mut RenderCallbacks<'_>,
    ) -> Result<ViewNode, RenderError> {
        (self.0)(object, ctx, callbacks)
    }
}
