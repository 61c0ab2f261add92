//! Frame construction from raw events
//!
//! A [`Frame`] is the record sent across the sink boundary when a unit is
//! entered. Exit frames carry the same metadata plus the return type, which
//! the tracer hands to `pop_frame`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::IntrospectionError;
use crate::event::{Event, EventKind, SourceSite};
use crate::locals::{LocalEntry, LocalsSnapshotter};
use crate::name_resolver::NameResolver;
use crate::runtime::{TypeIntrinsics, TypeRef};

/// One recorded entry or exit with its resolved metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub kind: EventKind,
    pub caller: SourceSite,
    pub callee: SourceSite,
    /// Type that actually owns the executing member
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defining_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    /// Present only for class-level invocations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_type: Option<String>,
    /// Present only on `Return`/`BlockReturn` exit frames
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

/// Builds frames, return types and locals snapshots for events
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    resolver: NameResolver,
    locals: LocalsSnapshotter,
}

impl FrameBuilder {
    pub fn new(intrinsics: TypeIntrinsics) -> Self {
        let resolver = NameResolver::new(intrinsics);
        Self {
            locals: LocalsSnapshotter::new(resolver.clone()),
            resolver,
        }
    }

    pub fn resolver(&self) -> &NameResolver {
        &self.resolver
    }

    /// Assemble the frame for `event`
    pub fn build(&self, event: &Event) -> Frame {
        Frame {
            kind: event.kind,
            caller: event.caller.clone(),
            callee: event.callee.clone(),
            defining_type: self.defining_type(event),
            member: event.member.clone(),
            receiver_type: self.receiver_type(event),
            return_type: self.return_type(event),
        }
    }

    /// Locals of the event's scope at the moment of the event
    pub fn locals(&self, event: &Event) -> Vec<LocalEntry> {
        self.locals.snapshot(event.scope.as_ref())
    }

    /// Return type for `Return`/`BlockReturn` exits, absent otherwise
    pub fn return_type(&self, event: &Event) -> Option<String> {
        if !event.kind.returns_value() {
            return None;
        }
        event
            .return_value
            .as_ref()
            .map(|value| self.resolver.type_name_of(value.as_ref()))
    }

    fn defining_type(&self, event: &Event) -> Option<String> {
        let Some(member) = event.member.as_deref() else {
            return self.lexical_type(event);
        };

        match self.dispatch_owner(event, member) {
            Ok(Some(owner)) => Some(self.resolver.resolve_type(owner.as_ref())),
            Ok(None) => self.lexical_type(event),
            Err(err) => {
                debug!(member, error = %err, "owner lookup failed");
                None
            }
        }
    }

    fn lexical_type(&self, event: &Event) -> Option<String> {
        event
            .defined_type
            .as_ref()
            .map(|ty| self.resolver.resolve_type(ty.as_ref()))
    }

    /// Owner of `member` on the receiver's runtime dispatch type
    fn dispatch_owner(
        &self,
        event: &Event,
        member: &str,
    ) -> Result<Option<TypeRef>, IntrospectionError> {
        let receiver = event.scope.receiver()?;
        let dispatch = receiver.dispatch_type()?;
        dispatch.owner_of(member)
    }

    fn receiver_type(&self, event: &Event) -> Option<String> {
        match event.scope.receiver() {
            Ok(receiver) => self.resolver.resolve(receiver.as_ref()),
            Err(err) => {
                debug!(error = %err, "receiver unreadable");
                None
            }
        }
    }
}

impl Default for FrameBuilder {
    fn default() -> Self {
        Self::new(TypeIntrinsics::default())
    }
}
