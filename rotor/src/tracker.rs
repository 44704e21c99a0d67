//! Per-agent tool-use tracking.
//!
//! The runner needs to know whether an agent has already invoked a tool in
//! its most recent active turn so it can clear a forced tool choice after
//! first use (see [`Agent::reset_tool_choice`](crate::agent::Agent)).
//! The tracker is keyed by agent name so it survives snapshot restores,
//! where object identity is not preserved.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Records which tool names each agent invoked in its most recent turn.
///
/// Consumers only ever ask the boolean question "has this agent used any
/// tool"; the name list exists for snapshot inspection, not as a multiset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolUseTracker {
    used: BTreeMap<String, Vec<String>>,
}

impl ToolUseTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `agent_name` invoked the given tools this turn.
    ///
    /// Names accumulate across turns for the same agent; duplicates are
    /// kept out to keep the snapshot form stable.
    pub fn add_tool_use(&mut self, agent_name: &str, tool_names: &[String]) {
        if tool_names.is_empty() {
            return;
        }
        let entry = self.used.entry(agent_name.to_owned()).or_default();
        for name in tool_names {
            if !entry.contains(name) {
                entry.push(name.clone());
            }
        }
    }

    /// Whether the agent has invoked any tool so far.
    #[must_use]
    pub fn has_used_tools(&self, agent_name: &str) -> bool {
        self.used.get(agent_name).is_some_and(|v| !v.is_empty())
    }

    /// Agent names present in the tracker (used to validate a snapshot).
    pub fn agent_names(&self) -> impl Iterator<Item = &str> {
        self.used.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_reports_no_use() {
        let tracker = ToolUseTracker::new();
        assert!(!tracker.has_used_tools("triage"));
    }

    #[test]
    fn recorded_use_is_visible() {
        let mut tracker = ToolUseTracker::new();
        tracker.add_tool_use("triage", &["lookup".to_owned()]);
        assert!(tracker.has_used_tools("triage"));
        assert!(!tracker.has_used_tools("billing"));
    }

    #[test]
    fn empty_tool_list_is_a_no_op() {
        let mut tracker = ToolUseTracker::new();
        tracker.add_tool_use("triage", &[]);
        assert!(!tracker.has_used_tools("triage"));
    }

    #[test]
    fn duplicate_names_are_not_repeated() {
        let mut tracker = ToolUseTracker::new();
        tracker.add_tool_use("a", &["t".to_owned()]);
        tracker.add_tool_use("a", &["t".to_owned(), "u".to_owned()]);
        let json = serde_json::to_value(&tracker).unwrap();
        assert_eq!(json, serde_json::json!({"a": ["t", "u"]}));
    }

    #[test]
    fn serde_roundtrip() {
        let mut tracker = ToolUseTracker::new();
        tracker.add_tool_use("a", &["t".to_owned()]);
        let json = serde_json::to_string(&tracker).unwrap();
        let parsed: ToolUseTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tracker);
    }
}
