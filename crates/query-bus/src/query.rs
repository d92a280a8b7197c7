//! # Query Requests and Identity
//!
//! A `QueryRequest` is what a UI surface asks for; a `QueryKey` is what the
//! multiplexer shares upstream connections by.
//!
//! ## Normalization
//!
//! Two requests share a key when they are the same after canonicalization:
//!
//! - query text: trimmed, whitespace runs outside string literals collapsed
//!   to one space;
//! - options: serialized as JSON with object keys sorted at every level.
//!
//! The key is the SHA-256 of the canonical target and canonical options, so
//! option key order never splits one query into two upstream connections.

use graph_model::{ResolveMode, Uid};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};

/// Option that asks for lazy (uid pointer) results.
pub const METADATA_ONLY: &str = "metadataOnly";

/// Query options, an arbitrary JSON object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryOptions(Map<String, Value>);

impl QueryOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a `metadataOnly` query.
    #[must_use]
    pub fn metadata_only() -> Self {
        Self::new().with(METADATA_ONLY, true)
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Options from a JSON value; `null` means no options.
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            Value::Null => Some(Self::new()),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_metadata_only(&self) -> bool {
        self.0
            .get(METADATA_ONLY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// How results of this query are built into a graph.
    pub fn resolve_mode(&self) -> ResolveMode {
        if self.is_metadata_only() {
            ResolveMode::Lazy
        } else {
            ResolveMode::Eager
        }
    }

    /// Order-independent serialization.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        write_canonical_map(&self.0, &mut out);
        out
    }
}

/// What a query asks the store for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryTarget {
    /// Query text in the store's query language.
    Text(String),
    /// Every object of a schema type.
    Type(String),
    /// A single object by uid.
    Object(String),
}

impl QueryTarget {
    pub fn canonical(&self) -> String {
        match self {
            Self::Text(text) => format!("text:{}", canonical_text(text)),
            Self::Type(type_id) => format!("type:{}", type_id.trim()),
            Self::Object(uid) => format!("uid:{}", uid.trim()),
        }
    }
}

/// A query as issued by a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    target: QueryTarget,
    options: QueryOptions,
}

impl QueryRequest {
    pub fn text(query: impl Into<String>) -> Self {
        Self {
            target: QueryTarget::Text(query.into()),
            options: QueryOptions::new(),
        }
    }

    pub fn for_type(type_id: impl Into<String>) -> Self {
        Self {
            target: QueryTarget::Type(type_id.into()),
            options: QueryOptions::new(),
        }
    }

    pub fn for_uid(uid: &Uid) -> Self {
        Self {
            target: QueryTarget::Object(uid.to_string()),
            options: QueryOptions::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn target(&self) -> &QueryTarget {
        &self.target
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Sharing key of this request.
    pub fn key(&self) -> QueryKey {
        QueryKey::normalize(self)
    }
}

/// Sharing key: digest of the canonical target and options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey(String);

impl QueryKey {
    pub fn normalize(request: &QueryRequest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(request.target.canonical().as_bytes());
        hasher.update([0x1f]);
        hasher.update(request.options.canonical().as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim and collapse whitespace outside double-quoted string literals.
pub fn canonical_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut pending_space = false;

    for ch in text.trim().chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if ch == '"' {
            in_string = true;
        }
        out.push(ch);
    }
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_canonical_map(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn write_canonical_map(map: &Map<String, Value>, out: &mut String) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}:", Value::from(key.as_str()));
        write_canonical(value, out);
    }
    out.push('}');
}
