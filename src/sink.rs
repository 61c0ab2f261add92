//! Trace sink boundary
//!
//! A sink owns call-tree storage behind an opaque handle. The tracer drives
//! it with push/add/pop calls in strict stack order; everything else about
//! storage is the sink's business.
//!
//! Text arguments are borrowed for the duration of a call. A sink copies
//! whatever it keeps.

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::error::SinkError;
use crate::frame::Frame;

/// Call contract of a trace store
///
/// Implementations must serialize concurrent calls: several traced threads
/// share one handle and each expects its own levels to stay intact.
pub trait TraceSink: Send + Sync {
    /// Opaque handle identifying one trace session
    type Handle: Send + Sync;

    /// Allocate fresh, empty trace storage
    fn create_trace(&self) -> Result<Self::Handle, SinkError>;

    /// Open one stack level
    fn push_frame(&self, handle: &Self::Handle, frame: &Frame) -> Result<(), SinkError>;

    /// Attach a local to the topmost open level
    fn add_local(&self, handle: &Self::Handle, name: &str, type_text: &str)
        -> Result<(), SinkError>;

    /// Close the topmost open level
    fn pop_frame(&self, handle: &Self::Handle, return_type: Option<&str>)
        -> Result<(), SinkError>;

    /// Release all storage behind `handle`
    fn destroy_trace(&self, handle: Self::Handle);
}

/// Scoped ownership of a sink handle
///
/// The handle is destroyed exactly once: on [`SinkHandle::release`] or on
/// drop, whichever comes first.
pub struct SinkHandle<S: TraceSink> {
    sink: Arc<S>,
    handle: Option<S::Handle>,
}

impl<S: TraceSink> SinkHandle<S> {
    /// Create a new trace on `sink`
    pub fn acquire(sink: Arc<S>) -> Result<Self, SinkError> {
        let handle = sink.create_trace()?;
        debug!("trace handle acquired");
        Ok(Self {
            sink,
            handle: Some(handle),
        })
    }

    pub fn push_frame(&self, frame: &Frame) -> Result<(), SinkError> {
        self.sink.push_frame(self.live()?, frame)
    }

    pub fn add_local(&self, name: &str, type_text: &str) -> Result<(), SinkError> {
        self.sink.add_local(self.live()?, name, type_text)
    }

    pub fn pop_frame(&self, return_type: Option<&str>) -> Result<(), SinkError> {
        self.sink.pop_frame(self.live()?, return_type)
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_some()
    }

    /// Destroy the handle now; later calls are no-ops
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.sink.destroy_trace(handle);
            debug!("trace handle released");
        }
    }

    fn live(&self) -> Result<&S::Handle, SinkError> {
        self.handle
            .as_ref()
            .ok_or_else(|| SinkError::Rejected("trace handle already released".to_string()))
    }
}

impl<S: TraceSink> Drop for SinkHandle<S> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<S: TraceSink> fmt::Debug for SinkHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkHandle")
            .field("live", &self.is_live())
            .finish()
    }
}
