//! # Object Navigation
//!
//! `ObjectView` is the read-only façade renderers use over one object of an
//! `ObjectGraph`. It owns nothing and is rebuilt whenever it is needed.
//!
//! ```rust,ignore
//! let start = event.get("time_frame/start/datetime").as_text()?;
//! let loc = event.get("location");          // Node::NotFound if absent
//! let kind = event.type_id()?;              // "$/schema/calendar_event"
//! ```
//!
//! Path segments walk embedded objects, resolved links, and list elements
//! (numeric segments). Lazy references and missing fields end the walk with
//! `Node::Reference` / `Node::NotFound`; nothing on this path ever fails.

use crate::entities::{GraphObject, ObjectGraph, Primitive, Uid, Value};
use crate::errors::ModelError;
use crate::PATH_SEPARATOR;
use std::fmt;

/// Semantic kinds a leaf can be coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Any scalar, including null.
    Primitive,
    Text,
    Number,
    Bool,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive => write!(f, "primitive"),
            Self::Text => write!(f, "text"),
            Self::Number => write!(f, "number"),
            Self::Bool => write!(f, "bool"),
        }
    }
}

/// Read-only view over one object of a graph.
///
/// Equality is identity of the underlying object: two views are equal when
/// they wrap objects with the same uid.
#[derive(Clone, Copy)]
pub struct ObjectView<'g> {
    graph: &'g ObjectGraph,
    object: &'g GraphObject,
}

impl<'g> ObjectView<'g> {
    pub fn new(graph: &'g ObjectGraph, object: &'g GraphObject) -> Self {
        Self { graph, object }
    }

    pub fn uid(&self) -> Option<&'g Uid> {
        self.object.uid()
    }

    pub fn object(&self) -> &'g GraphObject {
        self.object
    }

    pub fn graph(&self) -> &'g ObjectGraph {
        self.graph
    }

    /// Schema identifier of the wrapped object.
    pub fn type_id(&self) -> Result<&'g str, ModelError> {
        self.object.type_id().ok_or_else(|| ModelError::MissingType {
            uid: self
                .uid()
                .map_or_else(|| "<embedded>".to_string(), Uid::to_string),
        })
    }

    pub fn has_type(&self, type_id: &str) -> bool {
        self.object.type_id() == Some(type_id)
    }

    /// Walk a slash-separated field path.
    pub fn get(&self, path: &str) -> Node<'g> {
        Node::Object(*self).get(path)
    }

    /// Like `get`, but a missing path is an error.
    pub fn require(&self, path: &str) -> Result<Node<'g>, ModelError> {
        match self.get(path) {
            Node::NotFound => Err(ModelError::NotFound {
                path: path.to_string(),
            }),
            node => Ok(node),
        }
    }

    /// `get(path)` coerced to `kind`; errors name the path.
    pub fn get_as(&self, path: &str, kind: Kind) -> Result<&'g Primitive, ModelError> {
        self.require(path)?.as_kind(kind)
    }

    /// Text at `path`, if present and textual.
    pub fn text(&self, path: &str) -> Option<&'g str> {
        self.get(path).as_text().ok()
    }

    /// Fields of the object in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&'g str, Node<'g>)> + 'g {
        let graph = self.graph;
        self.object
            .fields()
            .map(move |(name, value)| (name, Node::from_value(graph, value)))
    }
}

impl PartialEq for ObjectView<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self.uid(), other.uid()) {
            (Some(a), Some(b)) => a == b,
            _ => std::ptr::eq(self.object, other.object),
        }
    }
}

impl fmt::Debug for ObjectView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectView")
            .field("uid", &self.uid())
            .field("type_id", &self.object.type_id())
            .finish()
    }
}

/// Read-only view over a list value.
#[derive(Clone, Copy)]
pub struct ListView<'g> {
    graph: &'g ObjectGraph,
    items: &'g [Value],
}

impl<'g> ListView<'g> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Node<'g> {
        self.items
            .get(index)
            .map_or(Node::NotFound, |v| Node::from_value(self.graph, v))
    }

    pub fn iter(&self) -> impl Iterator<Item = Node<'g>> + 'g {
        let graph = self.graph;
        self.items.iter().map(move |v| Node::from_value(graph, v))
    }
}

impl fmt::Debug for ListView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListView").field("len", &self.len()).finish()
    }
}

/// Result of a path walk.
#[derive(Debug, Clone, Copy)]
pub enum Node<'g> {
    Object(ObjectView<'g>),
    Primitive(&'g Primitive),
    List(ListView<'g>),
    /// Pointer that was not resolved while building.
    Reference(&'g Uid),
    /// Sentinel for a path with no match.
    NotFound,
}

impl<'g> Node<'g> {
    pub fn from_value(graph: &'g ObjectGraph, value: &'g Value) -> Self {
        match value {
            Value::Primitive(p) => Self::Primitive(p),
            Value::Object(object) => Self::Object(ObjectView::new(graph, object)),
            Value::List(items) => Self::List(ListView { graph, items }),
            Value::Ref(uid) => Self::Reference(uid),
            Value::Link(uid) => graph
                .view(uid)
                .map_or(Self::Reference(uid), Self::Object),
        }
    }

    /// Walk a slash-separated path from this node.
    pub fn get(&self, path: &str) -> Node<'g> {
        path.split(PATH_SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .fold(*self, |node, segment| node.step(segment))
    }

    fn step(self, segment: &str) -> Node<'g> {
        match self {
            Self::Object(view) => view
                .object
                .field(segment)
                .map_or(Self::NotFound, |v| Self::from_value(view.graph, v)),
            Self::List(list) => segment
                .parse::<usize>()
                .map_or(Self::NotFound, |index| list.get(index)),
            Self::Primitive(_) | Self::Reference(_) | Self::NotFound => Self::NotFound,
        }
    }

    pub fn is_found(&self) -> bool {
        !matches!(self, Self::NotFound)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Object(_) => "object",
            Self::Primitive(p) => p.kind_name(),
            Self::List(_) => "list",
            Self::Reference(_) => "reference",
            Self::NotFound => "missing value",
        }
    }

    /// Coerce a leaf to `kind`.
    pub fn as_kind(&self, kind: Kind) -> Result<&'g Primitive, ModelError> {
        let Self::Primitive(p) = self else {
            if let Self::NotFound = self {
                return Err(ModelError::NotFound {
                    path: String::new(),
                });
            }
            return Err(ModelError::TypeConversion {
                expected: kind,
                found: self.kind_name(),
            });
        };
        let matches = match kind {
            Kind::Primitive => true,
            Kind::Text => matches!(p, Primitive::Text(_)),
            Kind::Number => matches!(p, Primitive::Number(_)),
            Kind::Bool => matches!(p, Primitive::Bool(_)),
        };
        if matches {
            Ok(p)
        } else {
            Err(ModelError::TypeConversion {
                expected: kind,
                found: p.kind_name(),
            })
        }
    }

    pub fn as_primitive(&self) -> Result<&'g Primitive, ModelError> {
        self.as_kind(Kind::Primitive)
    }

    pub fn as_text(&self) -> Result<&'g str, ModelError> {
        match self.as_kind(Kind::Text)? {
            Primitive::Text(s) => Ok(s),
            other => Err(ModelError::TypeConversion {
                expected: Kind::Text,
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_f64(&self) -> Result<f64, ModelError> {
        match self.as_kind(Kind::Number)? {
            Primitive::Number(n) => n.as_f64().ok_or(ModelError::TypeConversion {
                expected: Kind::Number,
                found: "number",
            }),
            other => Err(ModelError::TypeConversion {
                expected: Kind::Number,
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ModelError> {
        match self.as_kind(Kind::Bool)? {
            Primitive::Bool(b) => Ok(*b),
            other => Err(ModelError::TypeConversion {
                expected: Kind::Bool,
                found: other.kind_name(),
            }),
        }
    }

    pub fn as_object(&self) -> Option<ObjectView<'g>> {
        match self {
            Self::Object(view) => Some(*view),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<ListView<'g>> {
        match self {
            Self::List(list) => Some(*list),
            _ => None,
        }
    }

    /// Uid this node points at, resolved or not.
    pub fn target_uid(&self) -> Option<&'g Uid> {
        match self {
            Self::Object(view) => view.uid(),
            Self::Reference(uid) => Some(uid),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use serde_json::{json, Value as Json};

    fn event_rows() -> Vec<Json> {
        vec![json!({
            "uid": "0xe1",
            "type": "$/schema/calendar_event",
            "name": "Standup",
            "all_day": false,
            "attendees": 4,
            "time_frame": {
                "uid": "0xf1",
                "type": "$/schema/time_frame",
                "start": { "datetime": "2024-03-04T09:00:00Z" },
                "end": { "datetime": "2024-03-04T09:15:00Z" },
            },
            "children": [
                { "uid": "0xc1", "type": "$/schema/note_block", "text": "agenda" },
                { "uid": "0xc2" },
            ],
            "calendar": { "uid": "0xcal" },
        })]
    }

    #[test]
    fn test_get_walks_nested_paths() {
        let graph = GraphBuilder::eager().build(&event_rows());
        let event = graph.view(&Uid::from("0xe1")).unwrap();

        assert_eq!(
            event.get("time_frame/start/datetime").as_text().unwrap(),
            "2024-03-04T09:00:00Z"
        );
        assert_eq!(event.text("name"), Some("Standup"));
        assert_eq!(event.get("attendees").as_f64().unwrap(), 4.0);
        assert!(!event.get("all_day").as_bool().unwrap());
    }

    #[test]
    fn test_missing_path_is_sentinel() {
        let graph = GraphBuilder::eager().build(&event_rows());
        let event = graph.view(&Uid::from("0xe1")).unwrap();

        assert!(!event.get("location").is_found());
        assert!(!event.get("time_frame/nowhere/datetime").is_found());
        assert!(!event.get("name/too/deep").is_found());
        assert_eq!(
            event.require("location").unwrap_err(),
            ModelError::NotFound {
                path: "location".into()
            }
        );
    }

    #[test]
    fn test_list_segments_select_elements() {
        let graph = GraphBuilder::eager().build(&event_rows());
        let event = graph.view(&Uid::from("0xe1")).unwrap();

        assert_eq!(event.text("children/0/text"), Some("agenda"));
        let children = event.get("children").as_list().unwrap();
        assert_eq!(children.len(), 2);
        // 0xc2 is a bare pointer with no definition in the batch.
        assert_eq!(
            children.get(1).target_uid(),
            Some(&Uid::from("0xc2"))
        );
        assert!(matches!(children.get(1), Node::Reference(_)));
        assert!(!event.get("children/7").is_found());
    }

    #[test]
    fn test_as_kind_rejects_objects_and_mismatches() {
        let graph = GraphBuilder::eager().build(&event_rows());
        let event = graph.view(&Uid::from("0xe1")).unwrap();

        let err = event.get("time_frame").as_primitive().unwrap_err();
        assert_eq!(
            err,
            ModelError::TypeConversion {
                expected: Kind::Primitive,
                found: "object"
            }
        );
        let err = event.get("calendar").as_kind(Kind::Text).unwrap_err();
        assert!(matches!(err, ModelError::TypeConversion { found: "reference", .. }));
        let err = event.get_as("name", Kind::Number).unwrap_err();
        assert!(matches!(err, ModelError::TypeConversion { found: "text", .. }));
        assert!(event.get_as("name", Kind::Primitive).is_ok());
    }

    #[test]
    fn test_type_id_and_missing_type() {
        let rows = vec![json!({ "uid": "0x1", "inner": { "name": "embedded" } })];
        let graph = GraphBuilder::eager().build(&rows);
        let object = graph.view(&Uid::from("0x1")).unwrap();

        assert_eq!(
            object.type_id().unwrap_err(),
            ModelError::MissingType { uid: "0x1".into() }
        );
        let inner = object.get("inner").as_object().unwrap();
        assert!(inner.uid().is_none());
        assert!(matches!(inner.type_id(), Err(ModelError::MissingType { .. })));

        let graph = GraphBuilder::eager().build(&event_rows());
        let event = graph.view(&Uid::from("0xe1")).unwrap();
        assert_eq!(event.type_id().unwrap(), "$/schema/calendar_event");
        assert!(event.has_type("$/schema/calendar_event"));
    }

    #[test]
    fn test_lazy_graph_does_not_follow_pointers() {
        let graph = GraphBuilder::lazy().build(&event_rows());
        let event = graph.view(&Uid::from("0xe1")).unwrap();

        assert!(matches!(event.get("time_frame"), Node::Reference(_)));
        assert!(!event.get("time_frame/start/datetime").is_found());
        // The hoisted object is still addressable directly.
        let frame = graph.view(&Uid::from("0xf1")).unwrap();
        assert_eq!(frame.text("start/datetime"), Some("2024-03-04T09:00:00Z"));
    }

    #[test]
    fn test_equality_is_by_uid() {
        let graph = GraphBuilder::eager().build(&event_rows());
        let direct = graph.view(&Uid::from("0xf1")).unwrap();
        let via_path = graph
            .view(&Uid::from("0xe1"))
            .unwrap()
            .get("time_frame")
            .as_object()
            .unwrap();
        assert_eq!(direct, via_path);
    }

    /// Assert that `node` holds exactly what the flat row had at `path`.
    fn assert_reproduced(node: Node<'_>, expected: &Json, path: &str) {
        match expected {
            Json::Object(map) => {
                let object = node
                    .as_object()
                    .unwrap_or_else(|| panic!("{path}: expected an object"));
                if let Some(uid) = map.get("uid").and_then(Json::as_str) {
                    assert_eq!(object.uid().map(Uid::as_str), Some(uid), "{path}");
                }
                if let Some(type_id) = map.get("type").and_then(Json::as_str) {
                    assert_eq!(object.type_id().ok(), Some(type_id), "{path}");
                }
                for (field, value) in map.iter().filter(|(k, _)| *k != "uid" && *k != "type") {
                    assert_reproduced(object.get(field), value, &format!("{path}/{field}"));
                }
            }
            Json::Array(items) => {
                let list = node
                    .as_list()
                    .unwrap_or_else(|| panic!("{path}: expected a list"));
                assert_eq!(list.len(), items.len(), "{path}");
                for (i, item) in items.iter().enumerate() {
                    assert_reproduced(list.get(i), item, &format!("{path}/{i}"));
                }
            }
            Json::String(s) => assert_eq!(node.as_text().ok(), Some(s.as_str()), "{path}"),
            Json::Number(n) => assert_eq!(node.as_f64().ok(), n.as_f64(), "{path}"),
            Json::Bool(b) => assert_eq!(node.as_bool().ok(), Some(*b), "{path}"),
            Json::Null => assert!(node.is_found(), "{path}"),
        }
    }

    #[test]
    fn test_round_trip_reproduces_flat_fields() {
        let rows = vec![
            json!({
                "uid": "0x1",
                "type": "$/schema/contact",
                "name": "Ada",
                "age": 36,
                "vip": true,
                "nickname": null,
                "tags": ["math", "engines"],
                "friends": [{ "uid": "0x2" }, { "uid": "0x3" }],
                "address": { "city": "London", "geo": { "lat": 51.5, "lon": -0.12 } },
                "history": [{ "year": 1843, "note": "notes" }, { "year": 1852 }],
            }),
            json!({ "uid": "0x2", "type": "$/schema/contact", "name": "Grace", "friend": { "uid": "0x1" } }),
            json!({
                "uid": "0x3",
                "type": "$/schema/contact",
                "name": "Charles",
                "employer": { "uid": "0x4", "type": "$/schema/company", "name": "Engines Ltd" },
            }),
        ];
        let graph = GraphBuilder::eager().build(&rows);

        for row in &rows {
            let uid = Uid::from(row["uid"].as_str().unwrap());
            let view = graph.view(&uid).unwrap();
            assert_reproduced(Node::Object(view), row, uid.as_str());
        }

        let ada = graph.view(&Uid::from("0x1")).unwrap();
        assert_eq!(ada.get("tags/1").as_text().unwrap(), "engines");
        assert_eq!(ada.get("friends/1/name").as_text().unwrap(), "Charles");
        assert_eq!(ada.get("friends/1/employer/name").as_text().unwrap(), "Engines Ltd");
        assert_eq!(ada.get("address/geo/lat").as_f64().unwrap(), 51.5);
        assert_eq!(ada.get("history/0/year").as_f64().unwrap(), 1843.0);
        assert!(!ada.get("history/1/note").is_found());
        assert!(!ada.get("tags/2").is_found());
    }
}
