//! Cache keys for resolved configurations

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one resolvable configuration: a logical name plus the
/// thinking-mode flag.
///
/// Compared and hashed by value, so two keys built independently from the
/// same pair deduplicate against each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    name: String,
    thinking: bool,
}

impl CacheKey {
    pub fn new(name: impl Into<String>, thinking: bool) -> Self {
        Self {
            name: name.into(),
            thinking,
        }
    }

    /// Logical configuration name (e.g. `"assessment-feedback"`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether extended reasoning is requested.
    pub fn thinking(&self) -> bool {
        self.thinking
    }

    /// Both modes of a logical name.
    pub fn both_modes(name: &str) -> [CacheKey; 2] {
        [CacheKey::new(name, false), CacheKey::new(name, true)]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = if self.thinking { "thinking" } else { "standard" };
        write!(f, "{}:{mode}", self.name)
    }
}
