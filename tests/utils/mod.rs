// Integration Test Utilities
//
// A sink that records every boundary call and a source that lets tests fire
// events by hand, from any thread.

#![allow(dead_code)]

use exposure::error::SinkError;
use exposure::event::{dispatch, Event, EventHandler, EventSource};
use exposure::frame::Frame;
use exposure::replay::{ReplayLog, ReplaySource};
use exposure::{TraceSink, TracerError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One call received by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Create(u64),
    Push(Frame),
    AddLocal { name: String, type_text: String },
    Pop { return_type: Option<String> },
    Destroy(u64),
}

/// Sink recording every call in arrival order
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    next_handle: AtomicU64,
    fail_after_pushes: Option<usize>,
    pushes: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sink rejecting every push after the first `count`
    pub fn failing_after(count: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_after_pushes: Some(count),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn pushes(&self) -> Vec<Frame> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Push(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    pub fn pops(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::Pop { return_type } => Some(return_type),
                _ => None,
            })
            .collect()
    }

    pub fn locals(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SinkCall::AddLocal { name, type_text } => Some((name, type_text)),
                _ => None,
            })
            .collect()
    }

    /// Stack depth after every push and pop
    pub fn depth_sequence(&self) -> Vec<usize> {
        let mut depth = 0usize;
        let mut sequence = Vec::new();
        for call in self.calls() {
            match call {
                SinkCall::Push(_) => depth += 1,
                SinkCall::Pop { .. } => depth -= 1,
                _ => continue,
            }
            sequence.push(depth);
        }
        sequence
    }

    /// Number of boundary calls other than create/destroy
    pub fn traffic(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| !matches!(call, SinkCall::Create(_) | SinkCall::Destroy(_)))
            .count()
    }

    pub fn destroyed(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SinkCall::Destroy(_)))
            .count()
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl TraceSink for RecordingSink {
    type Handle = u64;

    fn create_trace(&self) -> Result<u64, SinkError> {
        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(SinkCall::Create(handle));
        Ok(handle)
    }

    fn push_frame(&self, _handle: &u64, frame: &Frame) -> Result<(), SinkError> {
        let seen = self.pushes.fetch_add(1, Ordering::SeqCst);
        if self.fail_after_pushes.is_some_and(|limit| seen >= limit) {
            return Err(SinkError::Rejected("store full".to_string()));
        }
        self.record(SinkCall::Push(frame.clone()));
        Ok(())
    }

    fn add_local(&self, _handle: &u64, name: &str, type_text: &str) -> Result<(), SinkError> {
        self.record(SinkCall::AddLocal {
            name: name.to_string(),
            type_text: type_text.to_string(),
        });
        Ok(())
    }

    fn pop_frame(&self, _handle: &u64, return_type: Option<&str>) -> Result<(), SinkError> {
        self.record(SinkCall::Pop {
            return_type: return_type.map(str::to_string),
        });
        Ok(())
    }

    fn destroy_trace(&self, handle: u64) {
        self.record(SinkCall::Destroy(handle));
    }
}

/// Source whose events are fired explicitly by the test
#[derive(Default)]
pub struct ScriptedSource {
    handler: Option<Arc<dyn EventHandler>>,
    enabled: bool,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler to fire from other threads, while enabled
    pub fn handler(&self) -> Option<Arc<dyn EventHandler>> {
        if self.enabled {
            self.handler.clone()
        } else {
            None
        }
    }

    pub fn fire(&self, event: &Event) -> Result<(), TracerError> {
        match self.handler() {
            Some(handler) => dispatch(handler.as_ref(), event),
            None => Ok(()),
        }
    }

    pub fn fire_all(&self, events: &[Event]) -> Result<(), TracerError> {
        events.iter().try_for_each(|event| self.fire(event))
    }
}

impl EventSource for ScriptedSource {
    fn subscribe(&mut self, handler: Arc<dyn EventHandler>) {
        self.handler = Some(handler);
    }

    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }
}

/// Materialize the events of a replay log written as JSON
pub fn events_from(log: serde_json::Value) -> Vec<Event> {
    let log: ReplayLog = serde_json::from_value(log).unwrap();
    ReplaySource::new(&log).events().to_vec()
}

/// Replay log from JSON
pub fn replay_log(log: serde_json::Value) -> ReplayLog {
    serde_json::from_value(log).unwrap()
}
