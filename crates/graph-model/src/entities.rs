//! # Graph Entities
//!
//! Objects, values and the arena that owns them.
//!
//! ## Ownership
//!
//! An `ObjectGraph` owns every object that carries a uid, keyed by that uid.
//! Objects reference each other through `Value::Link` / `Value::Ref` uid
//! pointers rather than through shared pointers, so cyclic graphs (mutually
//! backlinked notes) cannot leak and cannot be walked without a lookup.
//! Objects without a uid are embedded inline as `Value::Object`.

use crate::builder::ResolveMode;
use crate::view::ObjectView;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Stable, globally unique identifier of a graph object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub String);

impl Uid {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uid {
    fn from(uid: &str) -> Self {
        Self(uid.to_string())
    }
}

impl From<String> for Uid {
    fn from(uid: String) -> Self {
        Self(uid)
    }
}

/// A scalar leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl Primitive {
    /// Short name of the primitive's kind, used in conversion errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Scalar leaf.
    Primitive(Primitive),
    /// Object without a uid, embedded in its parent.
    Object(Arc<GraphObject>),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Lazy uid pointer; navigation does not follow it.
    Ref(Uid),
    /// Resolved pointer; the target is present in the owning graph.
    Link(Uid),
}

/// A typed object as received from the store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GraphObject {
    uid: Option<Uid>,
    type_id: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl GraphObject {
    pub fn new(uid: Option<Uid>, type_id: Option<String>, fields: BTreeMap<String, Value>) -> Self {
        Self {
            uid,
            type_id,
            fields,
        }
    }

    pub fn uid(&self) -> Option<&Uid> {
        self.uid.as_ref()
    }

    /// Schema identifier of the object's type, if it carries one.
    pub fn type_id(&self) -> Option<&str> {
        self.type_id.as_deref()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}

/// Arena of graph objects addressed by uid, plus the forest roots of one
/// query result.
#[derive(Debug, Clone, Default)]
pub struct ObjectGraph {
    objects: HashMap<Uid, Arc<GraphObject>>,
    /// Arena insertion order, for deterministic iteration.
    order: Vec<Uid>,
    roots: Vec<Uid>,
    mode: ResolveMode,
    rejected_rows: usize,
}

impl ObjectGraph {
    pub(crate) fn from_parts(
        objects: HashMap<Uid, Arc<GraphObject>>,
        order: Vec<Uid>,
        roots: Vec<Uid>,
        mode: ResolveMode,
        rejected_rows: usize,
    ) -> Self {
        Self {
            objects,
            order,
            roots,
            mode,
            rejected_rows,
        }
    }

    pub fn object(&self, uid: &Uid) -> Option<&GraphObject> {
        self.objects.get(uid).map(Arc::as_ref)
    }

    pub fn contains(&self, uid: &Uid) -> bool {
        self.objects.contains_key(uid)
    }

    /// Navigation view over the object with `uid`.
    pub fn view(&self, uid: &Uid) -> Option<ObjectView<'_>> {
        self.object(uid).map(|object| ObjectView::new(self, object))
    }

    /// Views over the result's top-level objects, in row order.
    pub fn roots(&self) -> impl Iterator<Item = ObjectView<'_>> {
        self.roots.iter().filter_map(|uid| self.view(uid))
    }

    pub fn root_uids(&self) -> &[Uid] {
        &self.roots
    }

    /// Every object in the arena, in first-seen order.
    pub fn objects(&self) -> impl Iterator<Item = ObjectView<'_>> {
        self.order.iter().filter_map(|uid| self.view(uid))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn mode(&self) -> ResolveMode {
        self.mode
    }

    /// Number of flat rows skipped because they were not uid-carrying objects.
    pub fn rejected_rows(&self) -> usize {
        self.rejected_rows
    }
}
