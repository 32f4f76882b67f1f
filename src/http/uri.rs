//! Request target normalization.

use std::fmt;

/// A request target whose path has been lowercased.
///
/// Routing keys and incoming request targets both go through `Uri::new`,
/// so lookups are case-insensitive without changing the path structure.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Uri {
    path: String,
}

impl Uri {
    pub fn new(path: &str) -> Self {
        Self {
            path: normalize(path),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: &str) {
        self.path = normalize(path);
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

impl From<&str> for Uri {
    fn from(path: &str) -> Self {
        Uri::new(path)
    }
}

/// Lowercase the ASCII letters of a path. Idempotent.
pub fn normalize(path: &str) -> String {
    path.to_ascii_lowercase()
}
