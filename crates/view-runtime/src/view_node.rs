//! The rendered view tree.
//!
//! Renderers return `ViewNode`s; a host turns them into whatever its UI
//! toolkit needs. The tree serializes to JSON for hosts across a process
//! boundary.

use graph_model::Uid;
use serde::Serialize;
use std::collections::BTreeMap;

/// One node of a rendered view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewNode {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
        children: Vec<ViewNode>,
    },
    Text {
        text: String,
    },
    /// Stand-in for an object that was not expanded: a cycle back to an
    /// ancestor, the depth limit, or a lazy pointer.
    Reference {
        uid: Uid,
        type_id: Option<String>,
    },
    /// Generic key/value dump for objects without a registered view.
    Fallback {
        type_id: Option<String>,
        fields: Vec<(String, ViewNode)>,
    },
    /// Inline marker for a failed render or a failed query.
    Error {
        type_id: Option<String>,
        message: String,
    },
    Empty,
}

impl ViewNode {
    pub fn element(tag: impl Into<String>, children: Vec<ViewNode>) -> Self {
        Self::Element {
            tag: tag.into(),
            attrs: BTreeMap::new(),
            children,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Add an attribute; no-op on anything but an element.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Element { attrs, .. } = &mut self {
            attrs.insert(key.into(), value.into());
        }
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        match self {
            Self::Element { attrs, .. } => attrs.get(key).map(String::as_str),
            _ => None,
        }
    }

    pub fn children(&self) -> &[ViewNode] {
        match self {
            Self::Element { children, .. } => children,
            _ => &[],
        }
    }

    /// All text in the subtree, space separated, depth first.
    pub fn text_content(&self) -> String {
        let mut parts = Vec::new();
        self.collect_text(&mut parts);
        parts.join(" ")
    }

    fn collect_text<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Text { text } if !text.is_empty() => out.push(text),
            Self::Element { children, .. } => children.iter().for_each(|c| c.collect_text(out)),
            Self::Fallback { fields, .. } => fields.iter().for_each(|(_, v)| v.collect_text(out)),
            Self::Error { message, .. } => out.push(message),
            _ => {}
        }
    }

    /// Whether the subtree contains a reference marker for `uid`.
    pub fn contains_reference(&self, uid: &Uid) -> bool {
        self.any(&|node| matches!(node, Self::Reference { uid: target, .. } if target == uid))
    }

    /// Whether the subtree contains an error marker.
    pub fn contains_error(&self) -> bool {
        self.any(&|node| matches!(node, Self::Error { .. }))
    }

    fn any(&self, pred: &dyn Fn(&ViewNode) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            Self::Element { children, .. } => children.iter().any(|c| c.any(pred)),
            Self::Fallback { fields, .. } => fields.iter().any(|(_, v)| v.any(pred)),
            _ => false,
        }
    }
}
