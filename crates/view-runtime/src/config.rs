//! Runtime configuration from environment variables.

use std::env;
use tracing::warn;

/// Default bound on nested renders below one root.
pub const DEFAULT_MAX_RENDER_DEPTH: usize = 32;

/// Configuration for view resolution and live views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Nested renders deeper than this become reference markers
    pub max_render_depth: usize,

    /// Mount live views with `metadataOnly` queries unless the registered
    /// query says otherwise
    pub default_metadata_only: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_render_depth: DEFAULT_MAX_RENDER_DEPTH,
            default_metadata_only: false,
        }
    }
}

impl RuntimeConfig {
    /// Create configuration from environment variables.
    ///
    /// - `GV_MAX_RENDER_DEPTH`: Maximum nested render depth (default: 32)
    /// - `GV_DEFAULT_METADATA_ONLY`: Lazy live view queries (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_render_depth: lookup("GV_MAX_RENDER_DEPTH")
                .and_then(|v| match v.trim().parse::<usize>() {
                    Ok(depth) if depth > 0 => Some(depth),
                    _ => {
                        warn!(value = %v, "Ignoring invalid GV_MAX_RENDER_DEPTH");
                        None
                    }
                })
                .unwrap_or(defaults.max_render_depth),

            default_metadata_only: lookup("GV_DEFAULT_METADATA_ONLY")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.default_metadata_only),
        }
    }
}
