//! View runtime errors.

use graph_model::ModelError;
use thiserror::Error;

/// Registration failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Type ids must be non-empty and contain no whitespace.
    #[error("Invalid type id: {0:?}")]
    InvalidTypeId(String),

    /// Quick adder triggers must be non-empty and contain no whitespace.
    #[error("Invalid quick adder trigger: {0:?}")]
    InvalidTrigger(String),
}

/// Failures inside a renderer.
///
/// Never escapes the resolver; it becomes an inline error marker in the
/// rendered tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("{0}")]
    Renderer(String),
}

impl RenderError {
    pub fn renderer(message: impl Into<String>) -> Self {
        Self::Renderer(message.into())
    }
}

/// Validate a schema type id or trigger alias.
pub(crate) fn is_valid_identifier(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(char::is_whitespace)
}
