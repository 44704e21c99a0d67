//! Run-scoped context shared with tools and guardrails.
//!
//! A [`RunContext`] travels with one run: cumulative usage, the approval
//! ledger, and an opaque JSON blob of caller-supplied context data. It is
//! exclusively owned by the run's [`RunState`](crate::state::RunState);
//! concurrent runs never share one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::approvals::ApprovalLedger;
use crate::usage::Usage;

/// Mutable per-run context: usage counters, approvals, and caller data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    /// Cumulative token/request usage across turns.
    #[serde(default)]
    pub usage: Usage,

    /// Approve/reject decisions for tools requiring approval.
    #[serde(default)]
    pub approvals: ApprovalLedger,

    /// Opaque caller-supplied context data, available to tools and
    /// guardrails but never interpreted by the runtime.
    #[serde(default, rename = "contextData")]
    pub context_data: Value,
}

impl RunContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context carrying caller data.
    #[must_use]
    pub fn with_data(context_data: Value) -> Self {
        Self {
            context_data,
            ..Self::default()
        }
    }

    /// Accumulate usage from one model response.
    pub fn add_usage(&mut self, usage: Usage) {
        self.usage += usage;
    }
}

/// Cooperative cancellation signal threaded through model calls.
///
/// Cloning shares the underlying flag. Cancellation is observed at the
/// runtime's suspension points: the streaming consumer loop stops
/// forwarding chunks once the signal fires, and collaborators are expected
/// to poll it around their own await points.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    sig: Arc<AtomicBool>,
    reason: Arc<OnceLock<String>>,
}

impl CancelSignal {
    /// Create a fresh, un-fired signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal.
    pub fn cancel(&self) {
        self.sig.store(true, Ordering::SeqCst);
    }

    /// Fire the signal with a reason message.
    pub fn cancel_with_reason(&self, reason: &str) {
        let _ = self.reason.set(reason.to_owned());
        self.cancel();
    }

    /// Whether the signal has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.sig.load(Ordering::SeqCst)
    }

    /// The reason supplied at cancellation time, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }
}
