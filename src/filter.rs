//! Path filtering for entry/exit events
//!
//! The same predicate runs at entry and at exit against the callee path.
//! It must stay a pure function of the path, otherwise entries and exits of
//! one call can be filtered differently and the recorded stack desyncs.

use regex::Regex;

use crate::error::Result;

/// Inclusion filter over callee source paths
#[derive(Debug, Clone)]
pub struct PathFilter {
    /// Compiled inclusion pattern (None = all paths)
    include: Option<Regex>,
}

impl PathFilter {
    /// Create a filter that includes all paths
    pub fn all() -> Self {
        Self { include: None }
    }

    /// Compile an inclusion pattern, e.g. `^app/` or `lib/(billing|orders)/`
    pub fn from_pattern(pattern: &str) -> Result<Self> {
        Ok(Self {
            include: Some(Regex::new(pattern)?),
        })
    }

    /// Build from an optional pattern, falling back to [`PathFilter::all`]
    pub fn from_config(pattern: Option<&str>) -> Result<Self> {
        match pattern {
            Some(pattern) => Self::from_pattern(pattern),
            None => Ok(Self::all()),
        }
    }

    /// Check if an event at `path` should be recorded
    pub fn passes(&self, path: &str) -> bool {
        match &self.include {
            None => true, // No filter = trace all
            Some(regex) => regex.is_match(path),
        }
    }

    pub fn pattern(&self) -> Option<&str> {
        self.include.as_ref().map(Regex::as_str)
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::all()
    }
}
