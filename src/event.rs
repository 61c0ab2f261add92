//! Entry/exit events and the event source seam

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::TracerError;
use crate::runtime::{ScopeRef, TypeIntrinsics, TypeRef, ValueRef};

/// Kind of an entry or exit event
///
/// Raw values start at 1; ordinal 0 is unused so the numbering stays
/// compatible with consumers of the foreign boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum EventKind {
    #[serde(alias = "b_call")]
    BlockEntry = 1,
    #[serde(alias = "class")]
    TypeBodyEntry = 2,
    Call = 3,
    Return = 4,
    #[serde(alias = "b_return")]
    BlockReturn = 5,
    #[serde(alias = "end")]
    ScopeEnd = 6,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::BlockEntry,
        EventKind::TypeBodyEntry,
        EventKind::Call,
        EventKind::Return,
        EventKind::BlockReturn,
        EventKind::ScopeEnd,
    ];

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    pub fn from_raw(raw: i32) -> Result<Self, TracerError> {
        match raw {
            1 => Ok(EventKind::BlockEntry),
            2 => Ok(EventKind::TypeBodyEntry),
            3 => Ok(EventKind::Call),
            4 => Ok(EventKind::Return),
            5 => Ok(EventKind::BlockReturn),
            6 => Ok(EventKind::ScopeEnd),
            _ => Err(TracerError::InvalidEventKind(raw)),
        }
    }

    pub fn is_entry(self) -> bool {
        matches!(
            self,
            EventKind::BlockEntry | EventKind::TypeBodyEntry | EventKind::Call
        )
    }

    pub fn is_exit(self) -> bool {
        !self.is_entry()
    }

    /// Exit kinds that carry a meaningful return value
    pub fn returns_value(self) -> bool {
        matches!(self, EventKind::Return | EventKind::BlockReturn)
    }
}

impl TryFrom<i32> for EventKind {
    type Error = TracerError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        EventKind::from_raw(raw)
    }
}

/// A source location
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceSite {
    pub path: String,
    pub line: u32,
}

impl SourceSite {
    pub fn new(path: impl Into<String>, line: u32) -> Self {
        Self {
            path: path.into(),
            line,
        }
    }
}

impl fmt::Display for SourceSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.line)
    }
}

/// One entry or exit event delivered by an event source
#[derive(Clone)]
pub struct Event {
    pub kind: EventKind,
    /// Site of the instruction that triggered the event
    pub caller: SourceSite,
    /// Site where execution now stands
    pub callee: SourceSite,
    pub scope: ScopeRef,
    /// Lexically defining type of the executing member
    pub defined_type: Option<TypeRef>,
    pub member: Option<String>,
    /// Produced value, for exit kinds
    pub return_value: Option<ValueRef>,
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("caller", &self.caller)
            .field("callee", &self.callee)
            .field("member", &self.member)
            .field("has_defined_type", &self.defined_type.is_some())
            .field("has_return_value", &self.return_value.is_some())
            .finish()
    }
}

/// Receiver of entry/exit callbacks
pub trait EventHandler: Send + Sync {
    fn on_entry(&self, event: &Event) -> Result<(), TracerError>;

    fn on_exit(&self, event: &Event) -> Result<(), TracerError>;
}

/// Instrumentation hook of the observed runtime
///
/// Implementations deliver events synchronously, in call order, on the
/// thread executing the instrumented unit, and only while enabled.
pub trait EventSource {
    /// Naming strategies captured when a tracer is built
    fn intrinsics(&self) -> TypeIntrinsics {
        TypeIntrinsics::from_metadata()
    }

    /// Register the handler, replacing any previous one
    fn subscribe(&mut self, handler: Arc<dyn EventHandler>);

    fn enable(&mut self);

    fn disable(&mut self);
}

/// Route an event to the matching callback of `handler`
pub fn dispatch(handler: &dyn EventHandler, event: &Event) -> Result<(), TracerError> {
    if event.kind.is_entry() {
        handler.on_entry(event)
    } else {
        handler.on_exit(event)
    }
}
