//! JSON output format for recorded call trees
//!
//! `--format json` implementation

use serde::{Deserialize, Serialize};

use crate::event::{EventKind, SourceSite};
use crate::locals::LocalEntry;
use crate::store::{CallNode, CallTree};
use crate::tracer::SessionStats;

/// A single recorded call with its nested calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonCall {
    /// Formatted unit name (e.g., "Cart#total", "block in Cart#each")
    pub call: String,
    pub kind: EventKind,
    pub caller: SourceSite,
    pub callee: SourceSite,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defining_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    /// Only for class-level invocations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// Thread ordinal within the trace
    pub thread: u64,
    /// False if the call never returned while tracing
    pub closed: bool,
    /// Locals (only with --locals)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locals: Option<Vec<LocalEntry>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub calls: Vec<JsonCall>,
}

impl JsonCall {
    fn from_node(tree: &CallTree, node: &CallNode, show_locals: bool) -> Self {
        Self {
            call: node.label(),
            kind: node.frame.kind,
            caller: node.frame.caller.clone(),
            callee: node.frame.callee.clone(),
            defining_type: node.frame.defining_type.clone(),
            member: node.frame.member.clone(),
            receiver_type: node.frame.receiver_type.clone(),
            return_type: node.return_type.clone(),
            thread: node.thread,
            closed: node.closed,
            locals: show_locals.then(|| node.locals.clone()),
            calls: node
                .children
                .iter()
                .filter_map(|&child| tree.node(child))
                .map(|child| JsonCall::from_node(tree, child, show_locals))
                .collect(),
        }
    }
}

/// Summary statistics for the trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSummary {
    pub total_calls: usize,
    pub max_depth: usize,
    pub threads: usize,
    /// Calls that were still open when tracing stopped
    pub open_calls: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events_filtered: Option<u64>,
}

/// Root JSON output structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonOutput {
    /// Format version identifier
    pub version: String,
    /// Format name
    pub format: String,
    /// Top-level calls of every finished trace, in order
    pub calls: Vec<JsonCall>,
    pub summary: JsonSummary,
}

impl JsonOutput {
    /// Create an empty JSON output structure
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "exposure-json-v1".to_string(),
            calls: Vec::new(),
            summary: JsonSummary {
                total_calls: 0,
                max_depth: 0,
                threads: 0,
                open_calls: 0,
                events_filtered: None,
            },
        }
    }

    /// Add every root call of `tree` to the output
    pub fn add_tree(&mut self, tree: &CallTree, show_locals: bool) {
        self.summary.total_calls += tree.len();
        self.summary.max_depth = self.summary.max_depth.max(tree.max_depth());
        self.summary.threads = self.summary.threads.max(tree.thread_count());
        self.summary.open_calls += tree.nodes().iter().filter(|n| !n.closed).count();

        self.calls.extend(
            tree.roots()
                .iter()
                .filter_map(|&root| tree.node(root))
                .map(|root| JsonCall::from_node(tree, root, show_locals)),
        );
    }

    /// Record the counters of the session that produced the trees
    pub fn set_session_stats(&mut self, stats: &SessionStats) {
        self.summary.events_filtered = Some(stats.events_filtered);
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for JsonOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::sink::TraceSink;
    use crate::store::TraceStore;

    fn frame(kind: EventKind, owner: &str, member: &str) -> Frame {
        Frame {
            kind,
            caller: SourceSite::new("main.rb", 1),
            callee: SourceSite::new("lib/cart.rb", 4),
            defining_type: Some(owner.to_string()),
            member: Some(member.to_string()),
            receiver_type: None,
            return_type: None,
        }
    }

    fn nested_tree() -> CallTree {
        let store = TraceStore::new();
        let id = store.create_trace().unwrap();
        store.push_frame(&id, &frame(EventKind::Call, "Cart", "checkout")).unwrap();
        store.add_local(&id, "items", "Array").unwrap();
        store.push_frame(&id, &frame(EventKind::Call, "Cart", "total")).unwrap();
        store.pop_frame(&id, Some("Integer")).unwrap();
        store.pop_frame(&id, Some("Receipt")).unwrap();
        store.destroy_trace(id);
        store.take_finished().remove(0)
    }

    #[test]
    fn test_json_output_creation() {
        let output = JsonOutput::new();
        assert_eq!(output.format, "exposure-json-v1");
        assert!(output.calls.is_empty());
        assert_eq!(output.summary.total_calls, 0);
    }

    #[test]
    fn test_add_tree_nests_calls() {
        let mut output = JsonOutput::new();
        output.add_tree(&nested_tree(), false);

        assert_eq!(output.summary.total_calls, 2);
        assert_eq!(output.summary.max_depth, 2);
        assert_eq!(output.summary.open_calls, 0);
        assert_eq!(output.calls.len(), 1);

        let outer = &output.calls[0];
        assert_eq!(outer.call, "Cart#checkout");
        assert_eq!(outer.return_type.as_deref(), Some("Receipt"));
        assert_eq!(outer.calls.len(), 1);
        assert_eq!(outer.calls[0].call, "Cart#total");
        assert!(outer.locals.is_none());
    }

    #[test]
    fn test_json_serialization() {
        let mut output = JsonOutput::new();
        output.add_tree(&nested_tree(), true);
        output.set_session_stats(&SessionStats {
            frames_pushed: 2,
            frames_popped: 2,
            events_filtered: 3,
            open_frames: 0,
        });

        let json = output.to_json().unwrap();
        assert!(json.contains("\"format\": \"exposure-json-v1\""));
        assert!(json.contains("\"call\": \"Cart#total\""));
        assert!(json.contains("\"type_text\": \"Array\""));
        assert!(json.contains("\"events_filtered\": 3"));
    }

    #[test]
    fn test_optional_fields_omitted() {
        let mut output = JsonOutput::new();
        output.add_tree(&nested_tree(), false);
        let json = serde_json::to_string(&output.calls[0].calls[0]).unwrap();
        assert!(!json.contains("receiver_type"));
        assert!(!json.contains("locals"));
        assert!(!json.contains("\"calls\""));
    }
}
