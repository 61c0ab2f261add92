//! In-process trace store
//!
//! [`TraceStore`] is the default [`TraceSink`]: it turns the push/add/pop
//! stream into a call tree. Each traced OS thread gets its own open-frame
//! stack, so concurrent threads sharing one handle never close each other's
//! levels. Destroyed traces are archived and can be drained with
//! [`TraceStore::take_finished`].

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread::{self, ThreadId};
use tracing::trace;

use crate::error::SinkError;
use crate::event::EventKind;
use crate::frame::Frame;
use crate::locals::LocalEntry;
use crate::name_resolver::sanitize_generated_ids;
use crate::sink::TraceSink;

/// Identifier of one trace inside a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TraceId(pub u64);

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace-{}", self.0)
    }
}

/// One stack level of a recorded trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallNode {
    pub frame: Frame,
    /// Ordinal of the thread that opened the level (1-based, per trace)
    pub thread: u64,
    pub depth: usize,
    /// Entry-time and exit-time locals, in arrival order
    pub locals: Vec<LocalEntry>,
    pub return_type: Option<String>,
    pub closed: bool,
    pub children: Vec<usize>,
}

impl CallNode {
    /// Human-readable name of the executing unit
    pub fn label(&self) -> String {
        format_call(&self.frame)
    }
}

/// Call tree of one trace
#[derive(Debug, Clone)]
pub struct CallTree {
    id: TraceId,
    nodes: Vec<CallNode>,
    roots: Vec<usize>,
    open: HashMap<ThreadId, Vec<usize>>,
    threads: HashMap<ThreadId, u64>,
}

impl CallTree {
    fn new(id: TraceId) -> Self {
        Self {
            id,
            nodes: Vec::new(),
            roots: Vec::new(),
            open: HashMap::new(),
            threads: HashMap::new(),
        }
    }

    pub fn id(&self) -> TraceId {
        self.id
    }

    pub fn nodes(&self) -> &[CallNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&CallNode> {
        self.nodes.get(index)
    }

    /// Indices of the top-level nodes, in push order
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Levels that were pushed but never popped
    pub fn open_frames(&self) -> usize {
        self.open.values().map(Vec::len).sum()
    }

    pub fn max_depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth + 1).max().unwrap_or(0)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    fn push(&mut self, thread: ThreadId, frame: &Frame) {
        let next_ordinal = self.threads.len() as u64 + 1;
        let ordinal = *self.threads.entry(thread).or_insert(next_ordinal);
        let stack = self.open.entry(thread).or_default();
        let index = self.nodes.len();

        match stack.last() {
            Some(&parent) => self.nodes[parent].children.push(index),
            None => self.roots.push(index),
        }

        self.nodes.push(CallNode {
            frame: frame.clone(),
            thread: ordinal,
            depth: stack.len(),
            locals: Vec::new(),
            return_type: None,
            closed: false,
            children: Vec::new(),
        });
        stack.push(index);
    }

    fn top(&self, thread: ThreadId) -> Result<usize, SinkError> {
        self.open
            .get(&thread)
            .and_then(|stack| stack.last().copied())
            .ok_or(SinkError::NoOpenFrame)
    }

    fn add_local(&mut self, thread: ThreadId, name: &str, type_text: &str) -> Result<(), SinkError> {
        let top = self.top(thread)?;
        self.nodes[top].locals.push(LocalEntry::new(name, type_text));
        Ok(())
    }

    fn pop(&mut self, thread: ThreadId, return_type: Option<&str>) -> Result<(), SinkError> {
        let stack = self.open.get_mut(&thread).ok_or(SinkError::NoOpenFrame)?;
        let top = stack.pop().ok_or(SinkError::NoOpenFrame)?;
        let node = &mut self.nodes[top];
        node.return_type = return_type.map(str::to_string);
        node.closed = true;
        Ok(())
    }

    /// Indented text rendering of the tree
    pub fn render_text(&self, show_locals: bool) -> String {
        let mut out = String::new();
        let multi_thread = self.thread_count() > 1;
        for &root in &self.roots {
            if multi_thread {
                let _ = writeln!(out, "[thread {}]", self.nodes[root].thread);
            }
            self.render_node(&mut out, root, 0, show_locals);
        }
        out
    }

    fn render_node(&self, out: &mut String, index: usize, indent: usize, show_locals: bool) {
        let node = &self.nodes[index];
        let pad = "  ".repeat(indent);
        let outcome = match (&node.return_type, node.closed) {
            (Some(ty), _) => format!(" -> {}", ty),
            (None, true) => String::new(),
            (None, false) => " (open)".to_string(),
        };
        let _ = writeln!(out, "{}{}  {}{}", pad, node.label(), node.frame.callee, outcome);

        if show_locals {
            for local in &node.locals {
                let _ = writeln!(out, "{}  . {}: {}", pad, local.name, local.type_text);
            }
        }
        for &child in &node.children {
            self.render_node(out, child, indent + 1, show_locals);
        }
    }
}

/// Format the executing unit of a frame
///
/// Instance members print as `Type#member`; members of a singleton type
/// (`#<Class:Type>`) print as `Type.member`.
pub fn format_call(frame: &Frame) -> String {
    let owner = frame
        .defining_type
        .as_deref()
        .map(|name| sanitize_generated_ids(name).into_owned());

    let call = match (&owner, frame.member.as_deref()) {
        (Some(owner), Some(member)) => match singleton_class().captures(owner) {
            Some(caps) => format!("{}.{}", &caps[1], member),
            None => format!("{}#{}", owner, member),
        },
        (None, Some(member)) => member.to_string(),
        (Some(owner), None) => owner.clone(),
        (None, None) => String::new(),
    };

    match frame.kind {
        EventKind::BlockEntry | EventKind::BlockReturn if call.is_empty() => "block".to_string(),
        EventKind::BlockEntry | EventKind::BlockReturn => format!("block in {}", call),
        EventKind::TypeBodyEntry if call.is_empty() => "<body>".to_string(),
        EventKind::TypeBodyEntry => format!("<body of {}>", call),
        _ if call.is_empty() => "<top>".to_string(),
        _ => call,
    }
}

fn singleton_class() -> &'static Regex {
    static SINGLETON: OnceLock<Regex> = OnceLock::new();
    SINGLETON.get_or_init(|| {
        Regex::new(r"^#?<Class:([^\s>]+)").expect("singleton class pattern is a valid regex")
    })
}

/// Call-tree store shared by all tracing sessions of a process
#[derive(Debug, Default)]
pub struct TraceStore {
    next_id: AtomicU64,
    live: Mutex<HashMap<TraceId, CallTree>>,
    finished: Mutex<Vec<CallTree>>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of traces not yet destroyed
    pub fn live_traces(&self) -> usize {
        self.live.lock().map(|live| live.len()).unwrap_or(0)
    }

    /// Run `f` against a live trace
    pub fn inspect<R>(&self, id: TraceId, f: impl FnOnce(&CallTree) -> R) -> Option<R> {
        let live = self.live.lock().ok()?;
        live.get(&id).map(f)
    }

    /// Drain the archive of destroyed traces
    pub fn take_finished(&self) -> Vec<CallTree> {
        match self.finished.lock() {
            Ok(mut finished) => std::mem::take(&mut *finished),
            Err(_) => Vec::new(),
        }
    }

    fn lock_live(&self) -> Result<MutexGuard<'_, HashMap<TraceId, CallTree>>, SinkError> {
        self.live.lock().map_err(|_| SinkError::Poisoned)
    }

    fn with_tree<R>(
        &self,
        id: TraceId,
        f: impl FnOnce(&mut CallTree) -> Result<R, SinkError>,
    ) -> Result<R, SinkError> {
        let mut live = self.lock_live()?;
        let tree = live.get_mut(&id).ok_or(SinkError::UnknownTrace(id.0))?;
        f(tree)
    }
}

impl TraceSink for TraceStore {
    type Handle = TraceId;

    fn create_trace(&self) -> Result<TraceId, SinkError> {
        let id = TraceId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.lock_live()?.insert(id, CallTree::new(id));
        trace!(%id, "trace created");
        Ok(id)
    }

    fn push_frame(&self, handle: &TraceId, frame: &Frame) -> Result<(), SinkError> {
        let thread = thread::current().id();
        self.with_tree(*handle, |tree| {
            tree.push(thread, frame);
            Ok(())
        })
    }

    fn add_local(&self, handle: &TraceId, name: &str, type_text: &str) -> Result<(), SinkError> {
        let thread = thread::current().id();
        self.with_tree(*handle, |tree| tree.add_local(thread, name, type_text))
    }

    fn pop_frame(&self, handle: &TraceId, return_type: Option<&str>) -> Result<(), SinkError> {
        let thread = thread::current().id();
        self.with_tree(*handle, |tree| tree.pop(thread, return_type))
    }

    fn destroy_trace(&self, handle: TraceId) {
        let tree = match self.live.lock() {
            Ok(mut live) => live.remove(&handle),
            Err(_) => None,
        };
        if let Some(tree) = tree {
            trace!(id = %handle, nodes = tree.len(), "trace destroyed");
            if let Ok(mut finished) = self.finished.lock() {
                finished.push(tree);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SourceSite;
    use std::sync::Arc;

    fn frame(kind: EventKind, owner: Option<&str>, member: Option<&str>) -> Frame {
        Frame {
            kind,
            caller: SourceSite::new("main.rb", 1),
            callee: SourceSite::new("lib/a.rb", 3),
            defining_type: owner.map(str::to_string),
            member: member.map(str::to_string),
            receiver_type: None,
            return_type: None,
        }
    }

    #[test]
    fn test_format_call_instance_and_singleton() {
        let f = frame(EventKind::Call, Some("Regular::Ruby::Class"), Some("just_do_it"));
        assert_eq!(format_call(&f), "Regular::Ruby::Class#just_do_it");

        let f = frame(EventKind::Call, Some("#<Class:Object>"), Some("compute"));
        assert_eq!(format_call(&f), "Object.compute");
    }

    #[test]
    fn test_format_call_sanitizes_generated_ids() {
        let f = frame(
            EventKind::Call,
            Some("#<Some::SingletonClass:0xF2F5EAB2B2D35910>"),
            Some("run"),
        );
        assert_eq!(format_call(&f), "#<Some::SingletonClass(generated)>#run");
    }

    #[test]
    fn test_format_blocks_and_bodies() {
        assert_eq!(format_call(&frame(EventKind::BlockEntry, None, None)), "block");
        assert_eq!(
            format_call(&frame(EventKind::BlockEntry, Some("Cart"), Some("each_item"))),
            "block in Cart#each_item"
        );
        assert_eq!(
            format_call(&frame(EventKind::TypeBodyEntry, Some("Cart"), None)),
            "<body of Cart>"
        );
        assert_eq!(format_call(&frame(EventKind::Call, None, None)), "<top>");
    }

    #[test]
    fn test_store_builds_nested_tree() {
        let store = TraceStore::new();
        let id = store.create_trace().unwrap();

        store.push_frame(&id, &frame(EventKind::Call, Some("A"), Some("outer"))).unwrap();
        store.add_local(&id, "x", "Integer").unwrap();
        store.push_frame(&id, &frame(EventKind::Call, Some("A"), Some("inner"))).unwrap();
        store.pop_frame(&id, Some("String")).unwrap();
        store.pop_frame(&id, Some("NilClass")).unwrap();

        let (len, roots, open, depth) = store
            .inspect(id, |t| (t.len(), t.roots().to_vec(), t.open_frames(), t.max_depth()))
            .unwrap();
        assert_eq!(len, 2);
        assert_eq!(roots, vec![0]);
        assert_eq!(open, 0);
        assert_eq!(depth, 2);

        store.inspect(id, |t| {
            let outer = t.node(0).unwrap();
            assert_eq!(outer.children, vec![1]);
            assert_eq!(outer.locals, vec![LocalEntry::new("x", "Integer")]);
            assert_eq!(outer.return_type.as_deref(), Some("NilClass"));
            assert_eq!(t.node(1).unwrap().depth, 1);
        });
    }

    #[test]
    fn test_pop_without_open_frame_fails() {
        let store = TraceStore::new();
        let id = store.create_trace().unwrap();
        assert_eq!(store.pop_frame(&id, None), Err(SinkError::NoOpenFrame));
        assert_eq!(store.add_local(&id, "a", "b"), Err(SinkError::NoOpenFrame));
    }

    #[test]
    fn test_unknown_handle_fails() {
        let store = TraceStore::new();
        let err = store
            .push_frame(&TraceId(99), &frame(EventKind::Call, None, Some("go")))
            .unwrap_err();
        assert_eq!(err, SinkError::UnknownTrace(99));
    }

    #[test]
    fn test_destroy_archives_tree() {
        let store = TraceStore::new();
        let id = store.create_trace().unwrap();
        store.push_frame(&id, &frame(EventKind::Call, None, Some("go"))).unwrap();
        assert_eq!(store.live_traces(), 1);

        store.destroy_trace(id);
        assert_eq!(store.live_traces(), 0);

        let finished = store.take_finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].id(), id);
        assert_eq!(finished[0].open_frames(), 1);
        assert!(store.take_finished().is_empty());
    }

    #[test]
    fn test_threads_keep_separate_stacks() {
        let store = Arc::new(TraceStore::new());
        let id = store.create_trace().unwrap();
        store.push_frame(&id, &frame(EventKind::Call, None, Some("main"))).unwrap();

        let worker_store = store.clone();
        thread::spawn(move || {
            worker_store
                .push_frame(&id, &frame(EventKind::Call, None, Some("work")))
                .unwrap();
            worker_store.pop_frame(&id, Some("Integer")).unwrap();
        })
        .join()
        .unwrap();

        store.pop_frame(&id, None).unwrap();
        store.inspect(id, |t| {
            assert_eq!(t.roots().len(), 2);
            assert_eq!(t.thread_count(), 2);
            assert_eq!(t.open_frames(), 0);
            assert!(t.nodes().iter().all(|n| n.depth == 0));
        });
    }

    #[test]
    fn test_render_text_marks_open_frames() {
        let store = TraceStore::new();
        let id = store.create_trace().unwrap();
        store.push_frame(&id, &frame(EventKind::Call, Some("Shop"), Some("checkout"))).unwrap();
        store.add_local(&id, "qty", "Integer").unwrap();
        store.push_frame(&id, &frame(EventKind::Call, Some("Cart"), Some("total"))).unwrap();
        store.pop_frame(&id, Some("Integer")).unwrap();

        let text = store.inspect(id, |t| t.render_text(true)).unwrap();
        assert_eq!(
            text,
            "Shop#checkout  lib/a.rb:3 (open)\n  . qty: Integer\n  Cart#total  lib/a.rb:3 -> Integer\n"
        );
    }
}
