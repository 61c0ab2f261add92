//! C ABI over the trace store
//!
//! Lets a native extension that hosts the tracer drive a [`TraceStore`]
//! directly. Every function returns `0` on success and `-1` on failure, and
//! failures are logged. Strings are NUL-terminated, borrowed for the
//! duration of the call and decoded lossily; a null optional string means
//! the value is absent.

use libc::{c_char, c_int};
use std::ffi::CStr;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

use crate::error::{SinkError, TracerError};
use crate::event::{EventKind, SourceSite};
use crate::frame::Frame;
use crate::sink::TraceSink;
use crate::store::{CallTree, TraceId, TraceStore};

const OK: c_int = 0;
const FAILED: c_int = -1;

/// One trace owned by a foreign caller
#[derive(Debug)]
pub struct ForeignTrace {
    store: TraceStore,
    id: TraceId,
}

impl ForeignTrace {
    fn new() -> Result<Self, TracerError> {
        let store = TraceStore::new();
        let id = store.create_trace()?;
        Ok(Self { store, id })
    }

    /// Run `f` against the call tree recorded so far
    pub fn inspect<R>(&self, f: impl FnOnce(&CallTree) -> R) -> Option<R> {
        self.store.inspect(self.id, f)
    }
}

impl Drop for ForeignTrace {
    fn drop(&mut self) {
        self.store.destroy_trace(self.id);
    }
}

/// Borrow an optional C string
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn optional_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: non-null and NUL-terminated per the caller's contract
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

/// Run a boundary operation, mapping errors and panics to `-1`
fn guarded(op: &str, f: impl FnOnce() -> Result<(), TracerError>) -> c_int {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => OK,
        Ok(Err(err)) => {
            error!(op, error = %err, "trace boundary call failed");
            FAILED
        }
        Err(_) => {
            error!(op, "trace boundary call panicked");
            FAILED
        }
    }
}

fn null_handle(op: &str) -> c_int {
    error!(op, "null trace handle");
    FAILED
}

/// Allocate a new, empty trace. Returns null on failure.
#[no_mangle]
pub extern "C" fn create_trace() -> *mut ForeignTrace {
    match panic::catch_unwind(ForeignTrace::new) {
        Ok(Ok(trace)) => Box::into_raw(Box::new(trace)),
        Ok(Err(err)) => {
            error!(error = %err, "create_trace failed");
            std::ptr::null_mut()
        }
        Err(_) => {
            error!("create_trace panicked");
            std::ptr::null_mut()
        }
    }
}

fn line_number(line: c_int) -> Result<u32, SinkError> {
    u32::try_from(line).map_err(|_| SinkError::Rejected(format!("negative line number {}", line)))
}

/// Release a trace created by [`create_trace`]. Null is ignored.
///
/// # Safety
/// `trace` must be null or a pointer returned by [`create_trace`] that has
/// not been destroyed yet.
#[no_mangle]
pub unsafe extern "C" fn destroy_trace(trace: *mut ForeignTrace) {
    if trace.is_null() {
        return;
    }
    // SAFETY: pointer came from Box::into_raw in create_trace
    drop(unsafe { Box::from_raw(trace) });
}

/// Open a stack level
///
/// # Safety
/// `trace` must be null or a live pointer from [`create_trace`]. Every string
/// argument must be null or NUL-terminated. `callee_path` is required.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn push_frame(
    trace: *mut ForeignTrace,
    kind: c_int,
    caller_path: *const c_char,
    caller_line: c_int,
    callee_path: *const c_char,
    callee_line: c_int,
    defining_type: *const c_char,
    member_name: *const c_char,
    receiver_type: *const c_char,
) -> c_int {
    // SAFETY: null or live per the caller's contract
    let Some(trace) = (unsafe { trace.as_ref() }) else {
        return null_handle("push_frame");
    };
    // SAFETY: string arguments are null or NUL-terminated
    let (caller_path, callee_path, defining_type, member, receiver_type) = unsafe {
        (
            optional_str(caller_path),
            optional_str(callee_path),
            optional_str(defining_type),
            optional_str(member_name),
            optional_str(receiver_type),
        )
    };

    guarded("push_frame", || {
        let kind = EventKind::from_raw(kind)?;
        let callee_path = callee_path
            .ok_or_else(|| SinkError::Rejected("callee path is required".to_string()))?;
        let caller_line = line_number(caller_line)?;
        let callee_line = line_number(callee_line)?;
        let frame = Frame {
            kind,
            caller: SourceSite::new(caller_path.unwrap_or_default(), caller_line),
            callee: SourceSite::new(callee_path, callee_line),
            defining_type,
            member,
            receiver_type,
            return_type: None,
        };
        trace.store.push_frame(&trace.id, &frame)?;
        Ok(())
    })
}

/// Attach a local to the topmost open level
///
/// # Safety
/// `trace` must be null or a live pointer from [`create_trace`]; `name` and
/// `type_text` must be null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn add_local(
    trace: *mut ForeignTrace,
    name: *const c_char,
    type_text: *const c_char,
) -> c_int {
    // SAFETY: null or live per the caller's contract
    let Some(trace) = (unsafe { trace.as_ref() }) else {
        return null_handle("add_local");
    };
    // SAFETY: string arguments are null or NUL-terminated
    let (name, type_text) = unsafe { (optional_str(name), optional_str(type_text)) };

    guarded("add_local", || {
        let name = name.unwrap_or_default();
        let type_text = type_text.unwrap_or_default();
        trace.store.add_local(&trace.id, &name, &type_text)?;
        Ok(())
    })
}

/// Close the topmost open level
///
/// # Safety
/// `trace` must be null or a live pointer from [`create_trace`];
/// `return_type` must be null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn pop_frame(trace: *mut ForeignTrace, return_type: *const c_char) -> c_int {
    // SAFETY: null or live per the caller's contract
    let Some(trace) = (unsafe { trace.as_ref() }) else {
        return null_handle("pop_frame");
    };
    // SAFETY: null or NUL-terminated
    let return_type = unsafe { optional_str(return_type) };

    guarded("pop_frame", || {
        trace.store.pop_frame(&trace.id, return_type.as_deref())?;
        Ok(())
    })
}
