//! Exposure - call-stack tracer for dynamic-language runtimes
//!
//! This library records every method call, block and type body executed by
//! a traced program as a call tree, including the locals bound at entry and
//! exit and the runtime type of each return value. It is hardened against
//! traced code that redefines or breaks reflective methods.

pub mod cli;
pub mod error;
pub mod event;
pub mod ffi;
pub mod filter;
pub mod frame;
pub mod json_output;
pub mod locals;
pub mod name_resolver;
pub mod replay;
pub mod runtime;
pub mod sink;
pub mod store;
pub mod tracer;

pub use error::{Result, TracerError};
pub use event::{Event, EventHandler, EventKind, EventSource, SourceSite};
pub use sink::TraceSink;
pub use store::TraceStore;
pub use tracer::{Tracer, TracerConfig};
