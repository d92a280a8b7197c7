//! # Dynamic View Resolver
//!
//! Renders an object with the view registered for its type, recursing into
//! children through `RenderCallbacks`.
//!
//! ## Guards
//!
//! - **Cycles**: the uids on the current render path are kept in an ancestor
//!   set. Rendering an object already on the path yields a
//!   `ViewNode::Reference` instead of recursing.
//! - **Depth**: past `max_depth` nested renders a reference marker is
//!   substituted as well.
//!
//! ## Failure Containment
//!
//! Untyped and unregistered objects get the generic key/value fallback. A
//! renderer error becomes a `ViewNode::Error` in place of that subtree; the
//! rest of the tree still renders.

use crate::config::{RuntimeConfig, DEFAULT_MAX_RENDER_DEPTH};
use crate::registry::{Resolution, ViewRegistry};
use crate::renderer::{DetailLevel, RenderContext};
use crate::view_node::ViewNode;
use graph_model::{Node, ObjectView, Uid};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};
use view_telemetry::metrics::{CYCLE_MARKERS, FALLBACK_RENDERS, RENDER_ERRORS};

/// Renders objects through a `ViewRegistry`.
#[derive(Debug, Clone)]
pub struct ViewResolver {
    registry: ViewRegistry,
    max_depth: usize,
}

impl ViewResolver {
    pub fn new(registry: ViewRegistry) -> Self {
        Self::with_max_depth(registry, DEFAULT_MAX_RENDER_DEPTH)
    }

    pub fn with_max_depth(registry: ViewRegistry, max_depth: usize) -> Self {
        Self {
            registry,
            max_depth,
        }
    }

    pub fn from_config(registry: ViewRegistry, config: &RuntimeConfig) -> Self {
        Self::with_max_depth(registry, config.max_render_depth)
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Render `object` as the root of a new tree. Never fails.
    pub fn render(&self, object: ObjectView<'_>, ctx: &RenderContext, detail: DetailLevel) -> ViewNode {
        let mut ancestors = HashSet::new();
        self.render_guarded(object, ctx, detail, &mut ancestors, 0)
    }

    fn render_guarded(
        &self,
        object: ObjectView<'_>,
        ctx: &RenderContext,
        detail: DetailLevel,
        ancestors: &mut HashSet<Uid>,
        depth: usize,
    ) -> ViewNode {
        let type_id = object.type_id().ok();

        if let Some(uid) = object.uid() {
            if ancestors.contains(uid) {
                debug!(uid = %uid, "Cycle in render path, substituting reference");
                CYCLE_MARKERS.inc();
                return reference(uid, type_id);
            }
        }
        if depth >= self.max_depth {
            CYCLE_MARKERS.inc();
            warn!(depth, type_id = ?type_id, "Render depth limit reached");
            return match object.uid() {
                Some(uid) => reference(uid, type_id),
                None => ViewNode::Error {
                    type_id: type_id.map(str::to_string),
                    message: format!("nesting deeper than {} levels", self.max_depth),
                },
            };
        }

        let entered = object.uid().cloned();
        if let Some(uid) = &entered {
            ancestors.insert(uid.clone());
        }

        let mut callbacks = RenderCallbacks {
            resolver: self,
            ancestors: &mut *ancestors,
            depth: depth + 1,
            ctx: ctx.clone(),
        };

        let resolution = match type_id {
            Some(type_id) => self.registry.resolve(type_id, detail),
            None => Resolution::Fallback,
        };
        let node = match resolution {
            Resolution::View(entry) => match entry.renderer().render(object, ctx, &mut callbacks) {
                Ok(node) => node,
                Err(err) => {
                    RENDER_ERRORS.inc();
                    warn!(type_id = ?type_id, error = %err, "Renderer failed");
                    ViewNode::Error {
                        type_id: type_id.map(str::to_string),
                        message: err.to_string(),
                    }
                }
            },
            Resolution::Fallback => fallback(object, type_id, &mut callbacks),
        };

        if let Some(uid) = &entered {
            ancestors.remove(uid);
        }
        node
    }
}

/// Generic key/value dump; children are rendered at summary detail.
fn fallback(object: ObjectView<'_>, type_id: Option<&str>, callbacks: &mut RenderCallbacks<'_>) -> ViewNode {
    FALLBACK_RENDERS.inc();
    let fields = object
        .fields()
        .map(|(name, node)| (name.to_string(), callbacks.render_node(node, DetailLevel::Summary)))
        .collect();
    ViewNode::Fallback {
        type_id: type_id.map(str::to_string),
        fields,
    }
}

fn reference(uid: &Uid, type_id: Option<&str>) -> ViewNode {
    ViewNode::Reference {
        uid: uid.clone(),
        type_id: type_id.map(str::to_string),
    }
}

/// Recursion hooks handed to a renderer.
///
/// Child renders go through the resolver, so they see the same registry and
/// the same cycle and depth guards as the root.
pub struct RenderCallbacks<'a> {
    resolver: &'a ViewResolver,
    ancestors: &'a mut HashSet<Uid>,
    depth: usize,
    ctx: RenderContext,
}

impl RenderCallbacks<'_> {
    /// Render a child with the parent's context.
    pub fn render(&mut self, object: ObjectView<'_>, detail: DetailLevel) -> ViewNode {
        let ctx = self.ctx.clone();
        self.render_with(object, &ctx, detail)
    }

    /// Render a child with its own context.
    pub fn render_with(&mut self, object: ObjectView<'_>, ctx: &RenderContext, detail: DetailLevel) -> ViewNode {
        self.resolver
            .render_guarded(object, ctx, detail, self.ancestors, self.depth)
    }

    /// Render whatever a path walk produced.
    pub fn render_node(&mut self, node: Node<'_>, detail: DetailLevel) -> ViewNode {
        match node {
            Node::Object(object) => self.render(object, detail),
            Node::Primitive(p) => ViewNode::text(p.to_string()),
            Node::List(list) => ViewNode::Element {
                tag: "list".to_string(),
                attrs: BTreeMap::new(),
                children: list.iter().map(|item| self.render_node(item, detail)).collect(),
            },
            Node::Reference(uid) => ViewNode::Reference {
                uid: uid.clone(),
                type_id: None,
            },
            Node::NotFound => ViewNode::Empty,
        }
    }

    /// Render the value at `path` of `object`, one node per list element.
    pub fn render_field(&mut self, object: ObjectView<'_>, path: &str, detail: DetailLevel) -> Vec<ViewNode> {
        match object.get(path) {
            Node::NotFound => Vec::new(),
            Node::List(list) => list.iter().map(|item| self.render_node(item, detail)).collect(),
            node => vec![self.render_node(node, detail)],
        }
    }

    /// Nesting depth of the renderer holding these callbacks; the root is 1.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.resolver.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RenderError;
    use graph_model::{GraphBuilder, Kind, ObjectGraph};
    use serde_json::json;

    fn graph(rows: serde_json::Value) -> ObjectGraph {
        let rows = rows.as_array().cloned().unwrap_or_default();
        GraphBuilder::eager().build(&rows)
    }

    fn view<'g>(graph: &'g ObjectGraph, uid: &str) -> ObjectView<'g> {
        graph.view(&Uid::from(uid)).unwrap()
    }

    fn linking_renderer(registry: &ViewRegistry, type_id: &str) {
        registry
            .register_fn(type_id, DetailLevel::Summary, |obj, _, cb| {
                let mut children = vec![ViewNode::text(obj.text("name").unwrap_or_default())];
                children.extend(cb.render_field(obj, "next", DetailLevel::Summary));
                Ok(ViewNode::element("item", children))
            })
            .unwrap();
    }

    #[test]
    fn test_registered_view_is_used() {
        let registry = ViewRegistry::new();
        registry
            .register_fn("$/schema/contact", DetailLevel::Summary, |obj, _, _| {
                Ok(ViewNode::text(obj.get("name").as_text()?))
            })
            .unwrap();
        let g = graph(json!([{ "uid": "0x1", "type": "$/schema/contact", "name": "Ada" }]));

        let node = ViewResolver::new(registry).render(view(&g, "0x1"), &RenderContext::new(), DetailLevel::Summary);
        assert_eq!(node, ViewNode::text("Ada"));
    }

    #[test]
    fn test_unregistered_and_untyped_fall_back() {
        let g = graph(json!([
            { "uid": "0x1", "type": "$/schema/unknown", "title": "T", "tags": ["a", "b"] },
            { "uid": "0x2", "title": "untyped" },
        ]));
        let resolver = ViewResolver::new(ViewRegistry::new());

        let node = resolver.render(view(&g, "0x1"), &RenderContext::new(), DetailLevel::Summary);
        let ViewNode::Fallback { type_id, fields } = node else {
            panic!("expected fallback");
        };
        assert_eq!(type_id.as_deref(), Some("$/schema/unknown"));
        assert_eq!(fields[0].0, "tags");
        assert_eq!(fields[0].1.text_content(), "a b");
        assert_eq!(fields[1], ("title".to_string(), ViewNode::text("T")));

        let untyped = resolver.render(view(&g, "0x2"), &RenderContext::new(), DetailLevel::Summary);
        assert!(matches!(untyped, ViewNode::Fallback { type_id: None, .. }));
    }

    #[test]
    fn test_cycle_renders_reference_marker() {
        let registry = ViewRegistry::new();
        linking_renderer(&registry, "$/schema/item");
        let g = graph(json!([
            { "uid": "0xa", "type": "$/schema/item", "name": "A", "next": { "uid": "0xb" } },
            { "uid": "0xb", "type": "$/schema/item", "name": "B", "next": { "uid": "0xa" } },
        ]));

        let node = ViewResolver::new(registry).render(view(&g, "0xa"), &RenderContext::new(), DetailLevel::Summary);
        assert_eq!(node.text_content(), "A B");
        assert!(node.contains_reference(&Uid::from("0xa")));
        assert!(!node.contains_reference(&Uid::from("0xb")));
    }

    #[test]
    fn test_self_reference_through_fallback() {
        let g = graph(json!([{ "uid": "0x1", "type": "$/schema/folder", "parent": { "uid": "0x1" } }]));
        let node = ViewResolver::new(ViewRegistry::new()).render(view(&g, "0x1"), &RenderContext::new(), DetailLevel::Summary);
        assert!(node.contains_reference(&Uid::from("0x1")));
    }

    #[test]
    fn test_siblings_are_not_cycles() {
        let registry = ViewRegistry::new();
        registry
            .register_fn("$/schema/list", DetailLevel::Summary, |obj, _, cb| {
                Ok(ViewNode::element("ul", cb.render_field(obj, "items", DetailLevel::Summary)))
            })
            .unwrap();
        registry
            .register_fn("$/schema/leaf", DetailLevel::Summary, |obj, _, _| {
                Ok(ViewNode::text(obj.text("name").unwrap_or_default()))
            })
            .unwrap();
        let g = graph(json!([
            { "uid": "0x1", "type": "$/schema/list", "items": [{ "uid": "0x2" }, { "uid": "0x2" }] },
            { "uid": "0x2", "type": "$/schema/leaf", "name": "same" },
        ]));

        let node = ViewResolver::new(registry).render(view(&g, "0x1"), &RenderContext::new(), DetailLevel::Summary);
        assert_eq!(node.children().len(), 2);
        assert_eq!(node.text_content(), "same same");
    }

    #[test]
    fn test_depth_limit_substitutes_reference() {
        let registry = ViewRegistry::new();
        linking_renderer(&registry, "$/schema/item");
        let rows: Vec<serde_json::Value> = (0..10)
            .map(|i| json!({ "uid": format!("0x{i}"), "type": "$/schema/item", "name": format!("n{i}"), "next": { "uid": format!("0x{}", i + 1) } }))
            .collect();
        let g = GraphBuilder::eager().build(&rows);

        let node = ViewResolver::with_max_depth(registry, 3).render(view(&g, "0x0"), &RenderContext::new(), DetailLevel::Summary);
        assert_eq!(node.text_content(), "n0 n1 n2");
        assert!(node.contains_reference(&Uid::from("0x3")));
    }

    #[test]
    fn test_renderer_error_is_contained() {
        let registry = ViewRegistry::new();
        registry
            .register_fn("$/schema/event", DetailLevel::Summary, |obj, _, _| {
                let count = obj.get_as("attendees", Kind::Number)?;
                Ok(ViewNode::text(count.to_string()))
            })
            .unwrap();
        registry
            .register_fn("$/schema/day", DetailLevel::Summary, |obj, _, cb| {
                Ok(ViewNode::element("day", cb.render_field(obj, "events", DetailLevel::Summary)))
            })
            .unwrap();
        registry
            .register_fn("$/schema/broken", DetailLevel::Summary, |_, _, _| {
                Err(RenderError::renderer("boom"))
            })
            .unwrap();
        let g = graph(json!([
            { "uid": "0x1", "type": "$/schema/day", "events": [{ "uid": "0x2" }, { "uid": "0x3" }, { "uid": "0x4" }] },
            { "uid": "0x2", "type": "$/schema/event", "attendees": "many" },
            { "uid": "0x3", "type": "$/schema/event", "attendees": 4 },
            { "uid": "0x4", "type": "$/schema/broken" },
        ]));

        let node = ViewResolver::new(registry).render(view(&g, "0x1"), &RenderContext::new(), DetailLevel::Summary);
        let children = node.children();
        assert_eq!(children.len(), 3);
        assert!(matches!(&children[0], ViewNode::Error { type_id: Some(t), .. } if t == "$/schema/event"));
        assert_eq!(children[1], ViewNode::text("4"));
        assert!(matches!(&children[2], ViewNode::Error { message, .. } if message == "boom"));
    }

    #[test]
    fn test_context_flags_reach_children() {
        let registry = ViewRegistry::new();
        registry
            .register_fn("$/schema/parent", DetailLevel::Summary, |obj, _, cb| {
                let inherited = cb.render_field(obj, "child", DetailLevel::Summary);
                let child = obj.get("child").as_object().ok_or_else(|| RenderError::renderer("no child"))?;
                let embed_ctx = cb.context().embedded();
                let embedded = cb.render_with(child, &embed_ctx, DetailLevel::Summary);
                let mut children = inherited;
                children.push(embedded);
                Ok(ViewNode::element("parent", children))
            })
            .unwrap();
        registry
            .register_fn("$/schema/child", DetailLevel::Summary, |_, ctx, cb| {
                Ok(ViewNode::text(format!(
                    "noDate={} embed={} depth={}",
                    ctx.flag("noDate"),
                    ctx.is_embed,
                    cb.depth()
                )))
            })
            .unwrap();
        let g = graph(json!([
            { "uid": "0x1", "type": "$/schema/parent", "child": { "uid": "0x2" } },
            { "uid": "0x2", "type": "$/schema/child" },
        ]));

        let ctx = RenderContext::new().with_flag("noDate", true);
        let node = ViewResolver::new(registry).render(view(&g, "0x1"), &ctx, DetailLevel::Summary);
        assert_eq!(
            node.text_content(),
            "noDate=true embed=false depth=2 noDate=true embed=true depth=2"
        );
    }

    #[test]
    fn test_lazy_pointers_render_as_references() {
        let rows = vec![
            json!({ "uid": "0x1", "type": "$/schema/contact", "employer": { "uid": "0x2" } }),
            json!({ "uid": "0x2", "type": "$/schema/company", "name": "AE" }),
        ];
        let g = GraphBuilder::lazy().build(&rows);
        let node = ViewResolver::new(ViewRegistry::new()).render(view(&g, "0x1"), &RenderContext::new(), DetailLevel::Summary);
        assert!(node.contains_reference(&Uid::from("0x2")));
        assert!(!node.text_content().contains("AE"));
    }
}
