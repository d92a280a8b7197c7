//! # Error Types
//!
//! Errors raised while navigating an object graph.
//!
//! Lookups that simply have no match are normally absorbed into the
//! `Node::NotFound` sentinel; these errors only surface when a caller asks
//! for an explicit conversion.

use crate::view::Kind;
use thiserror::Error;

/// Errors from object navigation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// A required field path has no match.
    #[error("Field not found: {path}")]
    NotFound { path: String },

    /// A leaf could not be coerced to the requested kind.
    #[error("Cannot convert {found} to {expected}")]
    TypeConversion { expected: Kind, found: &'static str },

    /// The object carries no type reference.
    #[error("Object {uid} carries no type reference")]
    MissingType { uid: String },
}
