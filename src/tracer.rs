//! Tracer orchestration
//!
//! A [`Tracer`] owns the sink handle of the current session and routes
//! events from an [`EventSource`] through the path filter and frame builder
//! into the sink. States are `Idle` and `Tracing`; `start` while tracing and
//! `stop` while idle are rejected with an error and leave the state as is.
//!
//! The event source only holds a weak reference to the session. The tracer
//! is the single owner of the sink handle, and an event still running on
//! another thread keeps the session alive until it returns, so the handle is
//! never destroyed in the middle of a push/pop pair.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, ThreadId};
use tracing::{debug, error, trace, warn};

use crate::error::{Result, SinkError, TracerError};
use crate::event::{Event, EventHandler, EventSource};
use crate::filter::PathFilter;
use crate::frame::FrameBuilder;
use crate::sink::{SinkHandle, TraceSink};

/// Tracer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Inclusion regex over callee paths (None = trace everything)
    pub include_pattern: Option<String>,
    /// Forward a second locals snapshot when a unit exits
    pub snapshot_exit_locals: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            include_pattern: None,
            snapshot_exit_locals: true,
        }
    }
}

impl TracerConfig {
    /// Configuration tracing only callee paths matching `pattern`
    pub fn including(pattern: impl Into<String>) -> Self {
        Self {
            include_pattern: Some(pattern.into()),
            ..Self::default()
        }
    }
}

/// Lifecycle state of a tracer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracerState {
    Idle,
    Tracing,
}

/// Counters of one tracing session, reported by [`Tracer::stop`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_pushed: u64,
    pub frames_popped: u64,
    pub events_filtered: u64,
    /// Levels still open when the session ended
    pub open_frames: u64,
}

struct Session<S: TraceSink> {
    handle: SinkHandle<S>,
    builder: Arc<FrameBuilder>,
    filter: Arc<PathFilter>,
    snapshot_exit_locals: bool,
    /// Open levels per thread; each thread has its own push/pop sequence
    depths: Mutex<HashMap<ThreadId, usize>>,
    pushed: AtomicU64,
    popped: AtomicU64,
    filtered: AtomicU64,
    faulted: AtomicBool,
}

impl<S: TraceSink> Session<S> {
    fn new(
        handle: SinkHandle<S>,
        builder: Arc<FrameBuilder>,
        filter: Arc<PathFilter>,
        snapshot_exit_locals: bool,
    ) -> Self {
        Self {
            handle,
            builder,
            filter,
            snapshot_exit_locals,
            depths: Mutex::new(HashMap::new()),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            faulted: AtomicBool::new(false),
        }
    }

    fn accepts(&self, event: &Event) -> Result<bool> {
        if self.faulted.load(Ordering::Acquire) {
            return Err(TracerError::SessionFaulted);
        }
        if self.filter.passes(&event.callee.path) {
            Ok(true)
        } else {
            self.filtered.fetch_add(1, Ordering::Relaxed);
            Ok(false)
        }
    }

    fn enter(&self, event: &Event) -> Result<()> {
        if !self.accepts(event)? {
            return Ok(());
        }

        let frame = self.builder.build(event);
        let locals = self.builder.locals(event);
        trace!(kind = ?frame.kind, callee = %frame.callee, member = ?frame.member, "push_frame");

        self.handle.push_frame(&frame).map_err(|e| self.fault(e.into()))?;
        *self.lock_depths()?.entry(thread::current().id()).or_insert(0) += 1;
        self.pushed.fetch_add(1, Ordering::Relaxed);

        for local in &locals {
            self.handle
                .add_local(&local.name, &local.type_text)
                .map_err(|e| self.fault(e.into()))?;
        }
        Ok(())
    }

    fn exit(&self, event: &Event) -> Result<()> {
        if !self.accepts(event)? {
            return Ok(());
        }

        if !self.release_level()? {
            return Err(self.fault(TracerError::StackImbalance {
                kind: event.kind,
                path: event.callee.path.clone(),
                line: event.callee.line,
            }));
        }

        if self.snapshot_exit_locals {
            for local in self.builder.locals(event) {
                self.handle
                    .add_local(&local.name, &local.type_text)
                    .map_err(|e| self.fault(e.into()))?;
            }
        }

        let return_type = self.builder.return_type(event);
        trace!(kind = ?event.kind, callee = %event.callee, return_type = ?return_type, "pop_frame");
        self.handle
            .pop_frame(return_type.as_deref())
            .map_err(|e| self.fault(e.into()))?;
        self.popped.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn lock_depths(&self) -> Result<MutexGuard<'_, HashMap<ThreadId, usize>>> {
        self.depths
            .lock()
            .map_err(|_| self.fault(SinkError::Poisoned.into()))
    }

    /// Close one level opened by the calling thread; false if it has none
    fn release_level(&self) -> Result<bool> {
        let mut depths = self.lock_depths()?;
        let thread = thread::current().id();
        let Some(depth) = depths.get_mut(&thread) else {
            return Ok(false);
        };
        *depth -= 1;
        if *depth == 0 {
            depths.remove(&thread);
        }
        Ok(true)
    }

    fn fault(&self, err: TracerError) -> TracerError {
        if !self.faulted.swap(true, Ordering::AcqRel) {
            error!(error = %err, "tracing session faulted");
        }
        err
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            frames_pushed: self.pushed.load(Ordering::Relaxed),
            frames_popped: self.popped.load(Ordering::Relaxed),
            events_filtered: self.filtered.load(Ordering::Relaxed),
            open_frames: self
                .depths
                .lock()
                .map(|depths| depths.values().sum::<usize>() as u64)
                .unwrap_or(0),
        }
    }
}

/// Handler registered with the event source
struct SessionHandler<S: TraceSink> {
    session: Weak<Session<S>>,
}

impl<S: TraceSink> EventHandler for SessionHandler<S> {
    fn on_entry(&self, event: &Event) -> Result<()> {
        match self.session.upgrade() {
            Some(session) => session.enter(event),
            None => Ok(()),
        }
    }

    fn on_exit(&self, event: &Event) -> Result<()> {
        match self.session.upgrade() {
            Some(session) => session.exit(event),
            None => Ok(()),
        }
    }
}

/// Call-stack tracer driving a trace sink from an event source
pub struct Tracer<E: EventSource, S: TraceSink + 'static> {
    config: TracerConfig,
    source: E,
    sink: Arc<S>,
    builder: Arc<FrameBuilder>,
    filter: Arc<PathFilter>,
    session: Option<Arc<Session<S>>>,
}

impl<E: EventSource, S: TraceSink + 'static> Tracer<E, S> {
    /// Build an idle tracer
    ///
    /// Naming strategies are captured from `source` here, once.
    pub fn new(config: TracerConfig, source: E, sink: Arc<S>) -> Result<Self> {
        let filter = PathFilter::from_config(config.include_pattern.as_deref())?;
        let builder = FrameBuilder::new(source.intrinsics());
        Ok(Self {
            config,
            source,
            sink,
            builder: Arc::new(builder),
            filter: Arc::new(filter),
            session: None,
        })
    }

    pub fn state(&self) -> TracerState {
        if self.session.is_some() {
            TracerState::Tracing
        } else {
            TracerState::Idle
        }
    }

    pub fn is_tracing(&self) -> bool {
        self.state() == TracerState::Tracing
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    pub fn source(&self) -> &E {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut E {
        &mut self.source
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    /// Counters of the running session, if any
    pub fn stats(&self) -> Option<SessionStats> {
        self.session.as_ref().map(|session| session.stats())
    }

    /// Idle -> Tracing: acquire a handle, subscribe, enable delivery
    pub fn start(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(TracerError::AlreadyTracing);
        }

        let handle = SinkHandle::acquire(self.sink.clone())?;
        let session = Arc::new(Session::new(
            handle,
            self.builder.clone(),
            self.filter.clone(),
            self.config.snapshot_exit_locals,
        ));

        self.source.subscribe(Arc::new(SessionHandler {
            session: Arc::downgrade(&session),
        }));
        self.source.enable();
        self.session = Some(session);

        debug!(pattern = ?self.filter.pattern(), "tracing started");
        Ok(())
    }

    /// Tracing -> Idle: disable delivery, then release the handle
    pub fn stop(&mut self) -> Result<SessionStats> {
        let session = self.session.take().ok_or(TracerError::NotTracing)?;
        self.source.disable();

        let stats = session.stats();
        if stats.open_frames > 0 {
            warn!(open_frames = stats.open_frames, "tracing stopped with open frames");
        }
        drop(session);

        debug!(
            pushed = stats.frames_pushed,
            popped = stats.frames_popped,
            filtered = stats.events_filtered,
            "tracing stopped"
        );
        Ok(stats)
    }
}

impl<E: EventSource, S: TraceSink + 'static> Drop for Tracer<E, S> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.source.disable();
            drop(session);
            debug!("tracer dropped while tracing; handle released");
        }
    }
}
