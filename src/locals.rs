//! Locals snapshot for a lexical scope
//!
//! Every bound name produces exactly one entry. A value that cannot be read,
//! or whose type cannot be queried, is recorded with a sentinel naming the
//! failure kind instead of aborting the snapshot.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IntrospectionError;
use crate::name_resolver::NameResolver;
use crate::runtime::Scope;

/// One local variable and its resolved type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntry {
    pub name: String,
    /// Resolved type name, or a `((Kind during inspect))` sentinel
    pub type_text: String,
}

impl LocalEntry {
    pub fn new(name: impl Into<String>, type_text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_text: type_text.into(),
        }
    }
}

/// Snapshots the locals bound in a scope
#[derive(Debug, Clone)]
pub struct LocalsSnapshotter {
    resolver: NameResolver,
}

impl LocalsSnapshotter {
    pub fn new(resolver: NameResolver) -> Self {
        Self { resolver }
    }

    /// Entries for all locals of `scope`, in binding order
    pub fn snapshot(&self, scope: &dyn Scope) -> Vec<LocalEntry> {
        let names = match scope.local_names() {
            Ok(names) => names,
            Err(err) => {
                debug!(error = %err, "scope refused to enumerate locals");
                return Vec::new();
            }
        };

        names
            .into_iter()
            .map(|name| {
                let type_text = match self.type_text(scope, &name) {
                    Ok(text) => text,
                    Err(err) => {
                        debug!(local = %name, error = %err, "local introspection failed");
                        err.sentinel()
                    }
                };
                LocalEntry { name, type_text }
            })
            .collect()
    }

    fn type_text(&self, scope: &dyn Scope, name: &str) -> Result<String, IntrospectionError> {
        let value = scope.local(name)?;
        let ty = value.type_of()?;
        Ok(self.resolver.resolve_type(ty.as_ref()))
    }
}

impl Default for LocalsSnapshotter {
    fn default() -> Self {
        Self::new(NameResolver::default())
    }
}
