//! Display names for type-like entities
//!
//! The naming strategies are captured once when the resolver is built and
//! invoked directly on each type, so traced code that later redefines a
//! type's own `name` cannot influence what ends up in the trace.

use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;
use tracing::debug;

use crate::runtime::{TypeIntrinsics, TypeObject, Value};

/// Returned when a type cannot be named at all
pub const BROKEN: &str = "(Broken)";

const GENERATED_ID_PATTERN: &str = r":0x[\dA-Fa-f]{16}";

/// Resolves display names using strategies captured at construction
#[derive(Debug, Clone)]
pub struct NameResolver {
    intrinsics: TypeIntrinsics,
}

impl NameResolver {
    pub fn new(intrinsics: TypeIntrinsics) -> Self {
        Self { intrinsics }
    }

    /// Display name of `entity` if it is a type, `None` otherwise
    pub fn resolve(&self, entity: &dyn Value) -> Option<String> {
        entity.as_type().map(|ty| self.resolve_type(ty.as_ref()))
    }

    /// Display name of a type; never fails
    pub fn resolve_type(&self, ty: &dyn TypeObject) -> String {
        match (self.intrinsics.name)(ty) {
            Ok(Some(name)) => name,
            Ok(None) => match (self.intrinsics.describe)(ty) {
                Ok(Some(description)) => self.sanitize(&description).into_owned(),
                Ok(None) => BROKEN.to_string(),
                Err(err) => {
                    debug!(error = %err, "type description failed");
                    BROKEN.to_string()
                }
            },
            Err(err) => {
                debug!(error = %err, "type name resolution failed");
                BROKEN.to_string()
            }
        }
    }

    /// Display name of the type of `value`; `(Broken)` if the type cannot be read
    pub fn type_name_of(&self, value: &dyn Value) -> String {
        match value.type_of() {
            Ok(ty) => self.resolve_type(ty.as_ref()),
            Err(err) => {
                debug!(error = %err, "value type query failed");
                BROKEN.to_string()
            }
        }
    }

    /// Replace generated object addresses with a stable marker
    pub fn sanitize<'a>(&self, name: &'a str) -> Cow<'a, str> {
        sanitize_generated_ids(name)
    }
}

impl Default for NameResolver {
    fn default() -> Self {
        Self::new(TypeIntrinsics::default())
    }
}

pub(crate) fn sanitize_generated_ids(name: &str) -> Cow<'_, str> {
    generated_ids().replace_all(name, "(generated)")
}

fn generated_ids() -> &'static Regex {
    static GENERATED: OnceLock<Regex> = OnceLock::new();
    GENERATED.get_or_init(|| {
        Regex::new(GENERATED_ID_PATTERN).expect("generated id pattern is a valid regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IntrospectionError;
    use crate::runtime::{TypeKind, TypeMetadata, TypeRef};
    use std::sync::Arc;

    struct FakeType {
        name: Option<&'static str>,
        description: &'static str,
        broken: bool,
    }

    impl TypeObject for FakeType {
        fn metadata(&self) -> Result<TypeMetadata, IntrospectionError> {
            if self.broken {
                return Err(IntrospectionError::new("TypeError", "metadata unavailable"));
            }
            Ok(TypeMetadata {
                kind: TypeKind::Class,
                name: self.name.map(str::to_string),
                description: self.description.to_string(),
            })
        }

        fn name(&self) -> Result<Option<String>, IntrospectionError> {
            Ok(Some("Overridden".to_string()))
        }
    }

    struct FakeValue {
        ty: Option<TypeRef>,
        is_type: bool,
    }

    impl Value for FakeValue {
        fn type_of(&self) -> Result<TypeRef, IntrospectionError> {
            self.ty
                .clone()
                .ok_or_else(|| IntrospectionError::new("NoMethodError", "undefined method"))
        }

        fn as_type(&self) -> Option<TypeRef> {
            if self.is_type {
                self.ty.clone()
            } else {
                None
            }
        }
    }

    fn named(name: &'static str) -> TypeRef {
        Arc::new(FakeType {
            name: Some(name),
            description: name,
            broken: false,
        })
    }

    #[test]
    fn test_resolve_named_type_ignores_override() {
        let resolver = NameResolver::default();
        let ty = named("Payments::Invoice");
        assert_eq!(resolver.resolve_type(ty.as_ref()), "Payments::Invoice");
    }

    #[test]
    fn test_anonymous_type_is_sanitized() {
        let resolver = NameResolver::default();
        let ty = FakeType {
            name: None,
            description: "#<Class:0xF2F5EAB2B2D35910>",
            broken: false,
        };
        assert_eq!(resolver.resolve_type(&ty), "#<Class(generated)>");
    }

    #[test]
    fn test_broken_type_yields_sentinel() {
        let resolver = NameResolver::default();
        let ty = FakeType {
            name: Some("Ignored"),
            description: "Ignored",
            broken: true,
        };
        assert_eq!(resolver.resolve_type(&ty), BROKEN);
    }

    #[test]
    fn test_resolve_non_type_is_absent() {
        let resolver = NameResolver::default();
        let value = FakeValue {
            ty: Some(named("String")),
            is_type: false,
        };
        assert_eq!(resolver.resolve(&value), None);
    }

    #[test]
    fn test_resolve_type_value() {
        let resolver = NameResolver::default();
        let value = FakeValue {
            ty: Some(named("Widget")),
            is_type: true,
        };
        assert_eq!(resolver.resolve(&value).as_deref(), Some("Widget"));
    }

    #[test]
    fn test_type_name_of_failing_value() {
        let resolver = NameResolver::default();
        let value = FakeValue {
            ty: None,
            is_type: false,
        };
        assert_eq!(resolver.type_name_of(&value), BROKEN);
    }

    #[test]
    fn test_sanitize_leaves_plain_names_untouched() {
        let resolver = NameResolver::default();
        assert!(matches!(
            resolver.sanitize("Regular::Ruby::Class"),
            Cow::Borrowed("Regular::Ruby::Class")
        ));
        assert_eq!(
            resolver.sanitize("#<Some::SingletonClass:0xF2F5EAB2B2D35910>"),
            "#<Some::SingletonClass(generated)>"
        );
    }

    #[test]
    fn test_captured_strategy_survives_later_changes() {
        // Strategy that reports a fixed name regardless of the type
        let intrinsics = TypeIntrinsics {
            name: Arc::new(|_: &dyn TypeObject| Ok(Some("Captured".to_string()))),
            describe: Arc::new(|_: &dyn TypeObject| Ok(None)),
        };
        let resolver = NameResolver::new(intrinsics);
        assert_eq!(resolver.resolve_type(named("Other").as_ref()), "Captured");
    }

    #[test]
    fn test_resolvers_share_one_compiled_pattern() {
        let first = NameResolver::default();
        let second = NameResolver::default();
        assert!(std::ptr::eq(generated_ids(), generated_ids()));
        assert_eq!(
            first.sanitize("#<Class:0x0000000000000001>"),
            second.sanitize("#<Class:0x0000000000000001>")
        );
        assert_eq!(
            sanitize_generated_ids("#<Class:0x0000000000000001>"),
            "#<Class(generated)>"
        );
    }
}
