//! # Graph Builder
//!
//! Reconstructs an `ObjectGraph` from the flat rows a store query returns.
//!
//! ## Row Format
//!
//! Each row is a JSON object with a string `uid`, an optional `type`
//! (either a schema id string or an object with a string `id`), and any
//! number of fields:
//!
//! | JSON field value                   | Graph value                    |
//! |------------------------------------|--------------------------------|
//! | `null` / bool / number / string    | `Value::Primitive`             |
//! | array                              | `Value::List`                  |
//! | object with only `uid`             | pointer to that uid            |
//! | object with `uid` and other fields | hoisted into the arena, pointer|
//! | object without `uid`               | `Value::Object` (embedded)     |
//!
//! Pointers become `Value::Link` in `ResolveMode::Eager` when the target is
//! defined anywhere in the batch, and stay `Value::Ref` otherwise.
//! Repeated definitions of one uid are merged; the first value seen for a
//! field wins.

use crate::entities::{GraphObject, ObjectGraph, Primitive, Uid, Value};
use crate::{TYPE_FIELD, UID_FIELD};
use serde_json::{Map, Value as Json};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// How uid pointers are treated while building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolveMode {
    /// Pointers to objects present in the batch become navigable links.
    #[default]
    Eager,
    /// Pointers stay lazy uid references (`metadataOnly` queries).
    Lazy,
}

/// Builds object graphs from flat store rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphBuilder {
    mode: ResolveMode,
}

impl GraphBuilder {
    #[must_use]
    pub fn new(mode: ResolveMode) -> Self {
        Self { mode }
    }

    #[must_use]
    pub fn eager() -> Self {
        Self::new(ResolveMode::Eager)
    }

    #[must_use]
    pub fn lazy() -> Self {
        Self::new(ResolveMode::Lazy)
    }

    pub fn mode(&self) -> ResolveMode {
        self.mode
    }

    /// Build a graph from `rows`.
    ///
    /// Never fails: rows that are not uid-carrying objects are skipped and
    /// counted in `ObjectGraph::rejected_rows`.
    pub fn build(&self, rows: &[Json]) -> ObjectGraph {
        let mut staging = Staging {
            objects: HashMap::new(),
            order: Vec::new(),
            defined: collect_defined(rows),
            mode: self.mode,
        };
        let mut roots = Vec::new();
        let mut seen_roots = HashSet::new();
        let mut rejected = 0;

        for (index, row) in rows.iter().enumerate() {
            let Some(map) = row.as_object() else {
                rejected += 1;
                warn!(row = index, "Skipping flat row that is not an object");
                continue;
            };
            let Some(uid) = uid_of(map) else {
                rejected += 1;
                warn!(row = index, "Skipping flat row without uid");
                continue;
            };
            staging.define(uid.clone(), map);
            if seen_roots.insert(uid.clone()) {
                roots.push(uid);
            }
        }

        let Staging {
            mut objects, order, ..
        } = staging;
        let arena: HashMap<Uid, Arc<GraphObject>> = order
            .iter()
            .filter_map(|uid| {
                let staged = objects.remove(uid)?;
                let object = GraphObject::new(Some(uid.clone()), staged.type_id, staged.fields);
                Some((uid.clone(), Arc::new(object)))
            })
            .collect();

        debug!(
            objects = arena.len(),
            roots = roots.len(),
            rejected,
            mode = ?self.mode,
            "Object graph built"
        );

        ObjectGraph::from_parts(arena, order, roots, self.mode, rejected)
    }
}

#[derive(Default)]
struct Staged {
    type_id: Option<String>,
    fields: BTreeMap<String, Value>,
}

struct Staging {
    objects: HashMap<Uid, Staged>,
    order: Vec<Uid>,
    defined: HashSet<Uid>,
    mode: ResolveMode,
}

impl Staging {
    fn define(&mut self, uid: Uid, map: &Map<String, Json>) {
        let type_id = type_of(map);
        let fields: Vec<(String, Value)> = map
            .iter()
            .filter(|(k, _)| k.as_str() != UID_FIELD && k.as_str() != TYPE_FIELD)
            .map(|(k, v)| (k.clone(), self.convert(v)))
            .collect();

        let staged = match self.objects.entry(uid.clone()) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                self.order.push(uid.clone());
                e.insert(Staged::default())
            }
        };

        if staged.type_id.is_none() {
            staged.type_id = type_id;
        } else if let (Some(existing), Some(other)) = (&staged.type_id, &type_id) {
            if existing != other {
                debug!(uid = %uid, kept = %existing, ignored = %other, "Conflicting type reference");
            }
        }
        for (name, value) in fields {
            staged.fields.entry(name).or_insert(value);
        }
    }

    fn convert(&mut self, value: &Json) -> Value {
        match value {
            Json::Null => Value::Primitive(Primitive::Null),
            Json::Bool(b) => Value::Primitive(Primitive::Bool(*b)),
            Json::Number(n) => Value::Primitive(Primitive::Number(n.clone())),
            Json::String(s) => Value::Primitive(Primitive::Text(s.clone())),
            Json::Array(items) => Value::List(items.iter().map(|item| self.convert(item)).collect()),
            Json::Object(map) => match uid_of(map) {
                Some(uid) => {
                    if is_definition(map) {
                        self.define(uid.clone(), map);
                    }
                    self.pointer(uid)
                }
                None => {
                    let fields = map
                        .iter()
                        .filter(|(k, _)| k.as_str() != TYPE_FIELD)
                        .map(|(k, v)| (k.clone(), self.convert(v)))
                        .collect();
                    Value::Object(Arc::new(GraphObject::new(None, type_of(map), fields)))
                }
            },
        }
    }

    fn pointer(&self, uid: Uid) -> Value {
        if self.mode == ResolveMode::Eager && self.defined.contains(&uid) {
            Value::Link(uid)
        } else {
            Value::Ref(uid)
        }
    }
}

fn uid_of(map: &Map<String, Json>) -> Option<Uid> {
    map.get(UID_FIELD)?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(Uid::from)
}

fn type_of(map: &Map<String, Json>) -> Option<String> {
    match map.get(TYPE_FIELD)? {
        Json::String(s) => Some(s.clone()),
        Json::Object(t) => t.get("id")?.as_str().map(str::to_string),
        _ => None,
    }
}

/// An object carrying more than its uid defines (part of) that object.
fn is_definition(map: &Map<String, Json>) -> bool {
    map.keys().any(|k| k != UID_FIELD)
}

/// Every uid the batch defines, so pointers can be resolved regardless of
/// the order definitions appear in.
fn collect_defined(rows: &[Json]) -> HashSet<Uid> {
    fn walk(value: &Json, top_level: bool, out: &mut HashSet<Uid>) {
        match value {
            Json::Object(map) => {
                if let Some(uid) = uid_of(map) {
                    if top_level || is_definition(map) {
                        out.insert(uid);
                    }
                }
                for (key, child) in map {
                    if key != TYPE_FIELD {
                        walk(child, false, out);
                    }
                }
            }
            Json::Array(items) => {
                for item in items {
                    walk(item, false, out);
                }
            }
            _ => {}
        }
    }

    let mut out = HashSet::new();
    for row in rows {
        walk(row, true, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn contact_rows() -> Vec<Json> {
        vec![
            json!({
                "uid": "0x1",
                "type": "$/schema/contact",
                "name": "Ada",
                "emails": ["ada@example.com"],
                "employer": { "uid": "0x2" },
            }),
            json!({
                "uid": "0x2",
                "type": { "id": "$/schema/company" },
                "name": "Analytical Engines",
            }),
        ]
    }

    #[test]
    fn test_build_resolves_references_eagerly() {
        let graph = GraphBuilder::eager().build(&contact_rows());

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.root_uids(), &[Uid::from("0x1"), Uid::from("0x2")]);

        let contact = graph.object(&Uid::from("0x1")).unwrap();
        assert_eq!(contact.field("employer"), Some(&Value::Link(Uid::from("0x2"))));
        assert_eq!(
            graph.object(&Uid::from("0x2")).unwrap().type_id(),
            Some("$/schema/company")
        );
    }

    #[test]
    fn test_build_lazy_keeps_pointers() {
        let graph = GraphBuilder::lazy().build(&contact_rows());
        let contact = graph.object(&Uid::from("0x1")).unwrap();
        assert_eq!(contact.field("employer"), Some(&Value::Ref(Uid::from("0x2"))));
        assert_eq!(graph.mode(), ResolveMode::Lazy);
    }

    #[test]
    fn test_dangling_reference_stays_lazy() {
        let rows = vec![json!({ "uid": "0x1", "parent": { "uid": "0x99" } })];
        let graph = GraphBuilder::eager().build(&rows);
        let object = graph.object(&Uid::from("0x1")).unwrap();
        assert_eq!(object.field("parent"), Some(&Value::Ref(Uid::from("0x99"))));
    }

    #[test]
    fn test_reference_before_definition_is_linked() {
        let rows = vec![
            json!({ "uid": "0x1", "next": { "uid": "0x2" } }),
            json!({ "uid": "0x2", "next": { "uid": "0x1" } }),
        ];
        let graph = GraphBuilder::eager().build(&rows);
        assert_eq!(
            graph.object(&Uid::from("0x1")).unwrap().field("next"),
            Some(&Value::Link(Uid::from("0x2")))
        );
        assert_eq!(
            graph.object(&Uid::from("0x2")).unwrap().field("next"),
            Some(&Value::Link(Uid::from("0x1")))
        );
    }

    #[test]
    fn test_nested_definitions_are_hoisted_and_merged() {
        let rows = vec![
            json!({
                "uid": "0x1",
                "time_frame": { "uid": "0x5", "start": { "datetime": "2024-01-01T09:00:00Z" } },
            }),
            json!({ "uid": "0x3", "frame": { "uid": "0x5", "end": { "datetime": "2024-01-01T10:00:00Z" } } }),
        ];
        let graph = GraphBuilder::eager().build(&rows);

        let frame = graph.object(&Uid::from("0x5")).unwrap();
        assert!(frame.field("start").is_some());
        assert!(frame.field("end").is_some());
        // Hoisted objects are in the arena but are not roots.
        assert_eq!(graph.root_uids(), &[Uid::from("0x1"), Uid::from("0x3")]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_first_field_value_wins_on_merge() {
        let rows = vec![
            json!({ "uid": "0x1", "name": "first" }),
            json!({ "uid": "0x1", "name": "second", "extra": 1 }),
        ];
        let graph = GraphBuilder::eager().build(&rows);
        let object = graph.object(&Uid::from("0x1")).unwrap();
        assert_eq!(
            object.field("name"),
            Some(&Value::Primitive(Primitive::Text("first".into())))
        );
        assert!(object.field("extra").is_some());
        assert_eq!(graph.root_uids().len(), 1);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let rows = vec![json!(42), json!({ "name": "no uid" }), json!({ "uid": "0x1" })];
        let graph = GraphBuilder::eager().build(&rows);
        assert_eq!(graph.rejected_rows(), 2);
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_build_is_deterministic() {
        let rows = contact_rows();
        let a = GraphBuilder::eager().build(&rows);
        let b = GraphBuilder::eager().build(&rows);

        assert_eq!(a.root_uids(), b.root_uids());
        let a_objects: Vec<GraphObject> = a.objects().map(|v| v.object().clone()).collect();
        let b_objects: Vec<GraphObject> = b.objects().map(|v| v.object().clone()).collect();
        assert_eq!(a_objects, b_objects);
    }
}
