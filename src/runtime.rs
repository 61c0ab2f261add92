//! Introspection model of the observed runtime
//!
//! The tracer never talks to an interpreter directly. A runtime binding
//! exposes its types, values and lexical scopes through these traits, and
//! every query is fallible: traced code is free to redefine, break or raise
//! from anything it owns.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::IntrospectionError;

pub type TypeRef = Arc<dyn TypeObject>;
pub type ValueRef = Arc<dyn Value>;
pub type ScopeRef = Arc<dyn Scope>;

/// Kind of a type-like entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    #[default]
    Class,
    Module,
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeKind::Class => write!(f, "Class"),
            TypeKind::Module => write!(f, "Module"),
        }
    }
}

/// Intrinsic record of a type, as held by the runtime itself
///
/// Unlike [`TypeObject::name`], this is not reachable by user-level
/// redefinition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMetadata {
    pub kind: TypeKind,
    /// Registered constant name; `None` for anonymous types
    pub name: Option<String>,
    /// Default textual form, e.g. `#<Class:0x000055d5c0a1b2c3>`
    pub description: String,
}

/// A class-like or module-like entity
pub trait TypeObject: Send + Sync {
    /// Read the intrinsic metadata record
    fn metadata(&self) -> Result<TypeMetadata, IntrospectionError>;

    /// Name as reported through the type's own dispatch
    ///
    /// Traced code may redefine this. Name resolution must not call it.
    fn name(&self) -> Result<Option<String>, IntrospectionError> {
        self.metadata().map(|meta| meta.name)
    }

    /// Type that defines `member` in this type's dispatch chain
    fn owner_of(&self, _member: &str) -> Result<Option<TypeRef>, IntrospectionError> {
        Ok(None)
    }
}

/// Any runtime value
pub trait Value: Send + Sync {
    /// The value's runtime type
    fn type_of(&self) -> Result<TypeRef, IntrospectionError>;

    /// `Some` when the value is itself a type (class-level receivers)
    fn as_type(&self) -> Option<TypeRef> {
        None
    }

    /// Type searched when a member is dispatched on this value
    fn dispatch_type(&self) -> Result<TypeRef, IntrospectionError> {
        self.type_of()
    }
}

/// A lexical scope (binding) of the executing unit
pub trait Scope: Send + Sync {
    /// Names of the bound locals, in binding order
    fn local_names(&self) -> Result<Vec<String>, IntrospectionError>;

    fn local(&self, name: &str) -> Result<ValueRef, IntrospectionError>;

    fn receiver(&self) -> Result<ValueRef, IntrospectionError>;
}

/// Naming strategy invoked directly on a type
pub type NameFn =
    Arc<dyn Fn(&dyn TypeObject) -> Result<Option<String>, IntrospectionError> + Send + Sync>;

/// Naming strategies captured once, before traced code gets a chance to
/// redefine anything
#[derive(Clone)]
pub struct TypeIntrinsics {
    /// Registered name of a type
    pub name: NameFn,
    /// Fallback textual form, used for anonymous types
    pub describe: NameFn,
}

impl TypeIntrinsics {
    /// Strategies reading [`TypeObject::metadata`]
    pub fn from_metadata() -> Self {
        Self {
            name: Arc::new(|ty: &dyn TypeObject| ty.metadata().map(|meta| meta.name)),
            describe: Arc::new(|ty: &dyn TypeObject| {
                ty.metadata().map(|meta| Some(meta.description))
            }),
        }
    }
}

impl Default for TypeIntrinsics {
    fn default() -> Self {
        Self::from_metadata()
    }
}

impl fmt::Debug for TypeIntrinsics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeIntrinsics").finish_non_exhaustive()
    }
}
