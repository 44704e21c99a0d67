//! The approval ledger.
//!
//! Tools may declare that individual calls need a human (or programmatic)
//! decision before they execute. Decisions are recorded here, keyed by tool
//! name, either permanently (`always`) or per call id. The turn executor
//! consults the ledger before running any tool that requires approval.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A grant or denial scope for one side of an approval record.
///
/// Serializes as either a plain `bool` (permanent decision) or a list of
/// call ids, matching the snapshot wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Decision {
    /// A permanent decision covering every call to the tool.
    Always(bool),
    /// A decision covering only the listed call ids.
    Calls(Vec<String>),
}

impl Decision {
    fn covers(&self, call_id: &str) -> bool {
        match self {
            Self::Always(always) => *always,
            Self::Calls(ids) => ids.iter().any(|id| id == call_id),
        }
    }

    fn add(&mut self, call_id: &str) {
        if let Self::Calls(ids) = self
            && !ids.iter().any(|id| id == call_id)
        {
            ids.push(call_id.to_owned());
        }
    }
}

impl Default for Decision {
    fn default() -> Self {
        Self::Calls(Vec::new())
    }
}

/// Approve/reject record for a single tool name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Approved scope: permanent or per call id.
    #[serde(default)]
    pub approved: Decision,
    /// Rejected scope: permanent or per call id.
    #[serde(default)]
    pub rejected: Decision,
}

/// Per-tool-name record of approve/reject decisions.
///
/// A permanent decision takes precedence over per-call-id lists. If both a
/// grant and a denial could apply to the same call, the grant wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalLedger {
    records: BTreeMap<String, ApprovalRecord>,
}

impl ApprovalLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an approval for `call_id` on `tool_name`.
    ///
    /// With `always`, the grant becomes permanent for the tool and any
    /// previously-recorded call ids are subsumed. Re-approving an already
    /// approved call id does not change the effective decision.
    pub fn approve(&mut self, tool_name: &str, call_id: &str, always: bool) {
        let record = self.records.entry(tool_name.to_owned()).or_default();
        if always {
            record.approved = Decision::Always(true);
        } else {
            record.approved.add(call_id);
        }
    }

    /// Record a rejection for `call_id` on `tool_name`.
    pub fn reject(&mut self, tool_name: &str, call_id: &str, always: bool) {
        let record = self.records.entry(tool_name.to_owned()).or_default();
        if always {
            record.rejected = Decision::Always(true);
        } else {
            record.rejected.add(call_id);
        }
    }

    /// Return the effective decision for a call, if one exists.
    ///
    /// `Some(true)` means approved, `Some(false)` rejected, and `None`
    /// that no decision is recorded yet (the turn executor surfaces an
    /// interruption).
    #[must_use]
    pub fn check(&self, tool_name: &str, call_id: &str) -> Option<bool> {
        let record = self.records.get(tool_name)?;
        // Permanent decisions beat per-call lists; a grant beats a denial.
        if matches!(record.approved, Decision::Always(true)) {
            return Some(true);
        }
        if matches!(record.rejected, Decision::Always(true)) {
            return Some(false);
        }
        if record.approved.covers(call_id) {
            return Some(true);
        }
        if record.rejected.covers(call_id) {
            return Some(false);
        }
        None
    }

    /// Whether the ledger holds no records at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_record_means_no_decision() {
        let ledger = ApprovalLedger::new();
        assert_eq!(ledger.check("delete_file", "call_1"), None);
    }

    #[test]
    fn per_call_approval_covers_only_that_call() {
        let mut ledger = ApprovalLedger::new();
        ledger.approve("delete_file", "call_1", false);
        assert_eq!(ledger.check("delete_file", "call_1"), Some(true));
        assert_eq!(ledger.check("delete_file", "call_2"), None);
    }

    #[test]
    fn permanent_approval_covers_every_call() {
        let mut ledger = ApprovalLedger::new();
        ledger.approve("delete_file", "call_1", true);
        assert_eq!(ledger.check("delete_file", "call_999"), Some(true));
    }

    #[test]
    fn rejection_is_recorded() {
        let mut ledger = ApprovalLedger::new();
        ledger.reject("delete_file", "call_1", false);
        assert_eq!(ledger.check("delete_file", "call_1"), Some(false));
    }

    #[test]
    fn grant_wins_over_denial_for_same_call() {
        let mut ledger = ApprovalLedger::new();
        ledger.reject("delete_file", "call_1", false);
        ledger.approve("delete_file", "call_1", false);
        assert_eq!(ledger.check("delete_file", "call_1"), Some(true));
    }

    #[test]
    fn permanent_grant_wins_over_permanent_denial() {
        let mut ledger = ApprovalLedger::new();
        ledger.reject("delete_file", "call_1", true);
        ledger.approve("delete_file", "call_1", true);
        assert_eq!(ledger.check("delete_file", "anything"), Some(true));
    }

    #[test]
    fn re_approving_is_idempotent() {
        let mut ledger = ApprovalLedger::new();
        ledger.approve("t", "call_1", false);
        let before = ledger.clone();
        ledger.approve("t", "call_1", false);
        assert_eq!(ledger, before);
        assert_eq!(ledger.check("t", "call_1"), Some(true));
    }

    #[test]
    fn serde_wire_shape() {
        let mut ledger = ApprovalLedger::new();
        ledger.approve("a", "call_1", false);
        ledger.reject("b", "call_2", true);
        let json = serde_json::to_value(&ledger).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "a": {"approved": ["call_1"], "rejected": []},
                "b": {"approved": [], "rejected": true},
            })
        );
        let parsed: ApprovalLedger = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ledger);
    }
}
