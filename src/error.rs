//! Error types for the tracing pipeline
//!
//! Three failure families:
//! - `IntrospectionError`: the observed runtime refused to answer a question
//!   about a type, value or scope. Always recovered locally.
//! - `SinkError`: a trace sink call failed. Fatal for the session.
//! - `TracerError`: orchestration failures, including stack imbalance and
//!   lifecycle misuse.

use thiserror::Error;

use crate::event::EventKind;

/// Failure raised by the observed runtime while answering an introspection query
///
/// `kind` names the failure category the runtime reported (for a Ruby-like
/// runtime this would be the exception class, e.g. `NoMethodError`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct IntrospectionError {
    pub kind: String,
    pub message: String,
}

impl IntrospectionError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Sentinel text recorded in place of a local's type when introspection fails
    pub fn sentinel(&self) -> String {
        format!("(({} during inspect))", self.kind)
    }
}

/// Errors reported by a trace sink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Unknown trace handle {0}")]
    UnknownTrace(u64),

    #[error("No open frame on the calling thread")]
    NoOpenFrame,

    #[error("Trace storage lock poisoned")]
    Poisoned,

    #[error("Sink rejected call: {0}")]
    Rejected(String),
}

/// Errors raised by the tracer orchestrator
#[derive(Error, Debug)]
pub enum TracerError {
    #[error("Tracer is already tracing")]
    AlreadyTracing,

    #[error("Tracer is not tracing")]
    NotTracing,

    #[error("Stack imbalance: {kind:?} exit at {path}:{line} with no open frame")]
    StackImbalance {
        kind: EventKind,
        path: String,
        line: u32,
    },

    #[error("Trace sink failure: {0}")]
    Boundary(#[from] SinkError),

    #[error("Tracing session faulted by an earlier failure")]
    SessionFaulted,

    #[error("Invalid inclusion pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid event kind ordinal {0} (expected 1..=6)")]
    InvalidEventKind(i32),
}

pub type Result<T> = std::result::Result<T, TracerError>;
