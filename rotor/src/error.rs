//! Unified error taxonomy for the runtime.
//!
//! The taxonomy distinguishes who is at fault and what a caller may do:
//! [`Error::User`] is caller misconfiguration and never retried;
//! [`Error::ModelBehavior`] means the model produced something the run
//! cannot act on; tripwire variants are the expected, policy-driven abort
//! path and carry the triggering guardrail result. Fatal variants carry
//! the [`RunState`](crate::state::RunState) so a caller can inspect how
//! far execution progressed before failing.

use crate::guardrail::{InputGuardrailResult, OutputGuardrailResult};
use crate::state::RunState;

/// Result type alias for runtime operations.
///
/// The error parameter defaults to [`Error`]; tool implementations
/// substitute [`ToolError`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The main error type for the runtime.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Caller misconfiguration: bad snapshot version, missing model,
    /// unresolvable agent name, invalid policy value.
    #[error("User error: {0}")]
    User(String),

    /// The model produced output the run cannot act on: an unknown tool
    /// name, unparseable structured output, or a computer action with no
    /// computer tool configured.
    #[error("Model behavior error: {message}")]
    ModelBehavior {
        /// What the model did wrong.
        message: String,
        /// Run state at the point of failure.
        state: Option<Box<RunState>>,
    },

    /// The turn ceiling was exceeded. The carried state can be resumed
    /// with a higher limit.
    #[error("Maximum turns ({max_turns}) exceeded")]
    MaxTurnsExceeded {
        /// The configured ceiling.
        max_turns: u64,
        /// Run state at the point of failure.
        state: Option<Box<RunState>>,
    },

    /// A guardrail failed to execute (as opposed to tripping). The turn
    /// counter is rolled back for input guardrails so a rerun does not
    /// double-count a turn.
    #[error("Guardrail '{guardrail}' failed to execute: {message}")]
    GuardrailExecution {
        /// Name of the failing guardrail.
        guardrail: String,
        /// The underlying failure.
        message: String,
        /// Run state at the point of failure.
        state: Option<Box<RunState>>,
    },

    /// An input guardrail tripped its tripwire.
    #[error("Input guardrail '{}' tripwire triggered", result.guardrail_name)]
    InputGuardrailTripwire {
        /// The triggering result.
        result: InputGuardrailResult,
        /// Run state at the point of failure.
        state: Option<Box<RunState>>,
    },

    /// An output guardrail tripped its tripwire. The turn's side effects
    /// are already recorded in the carried state; there is no rollback.
    #[error("Output guardrail '{}' tripwire triggered", result.guardrail_name)]
    OutputGuardrailTripwire {
        /// The triggering result.
        result: OutputGuardrailResult,
        /// Run state at the point of failure.
        state: Option<Box<RunState>>,
    },

    /// Unexpected failure while dispatching a function tool. User-code
    /// failures inside a tool are not this variant: those are caught per
    /// call and reported as the tool's output text.
    #[error("Tool '{tool}' dispatch failed: {message}")]
    ToolCall {
        /// Name of the tool being dispatched.
        tool: String,
        /// The underlying failure.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a user error.
    #[must_use]
    pub fn user(message: impl Into<String>) -> Self {
        Self::User(message.into())
    }

    /// Create a model behavior error with no state attached yet.
    #[must_use]
    pub fn model_behavior(message: impl Into<String>) -> Self {
        Self::ModelBehavior {
            message: message.into(),
            state: None,
        }
    }

    /// Attach the run state to a fatal error, if the variant carries one.
    #[must_use]
    pub fn with_state(mut self, run_state: RunState) -> Self {
        match &mut self {
            Self::ModelBehavior { state, .. }
            | Self::MaxTurnsExceeded { state, .. }
            | Self::GuardrailExecution { state, .. }
            | Self::InputGuardrailTripwire { state, .. }
            | Self::OutputGuardrailTripwire { state, .. } => *state = Some(Box::new(run_state)),
            Self::User(_) | Self::ToolCall { .. } | Self::Json(_) => {}
        }
        self
    }

    /// The run state carried by a fatal error, if any.
    #[must_use]
    pub fn state(&self) -> Option<&RunState> {
        match self {
            Self::ModelBehavior { state, .. }
            | Self::MaxTurnsExceeded { state, .. }
            | Self::GuardrailExecution { state, .. }
            | Self::InputGuardrailTripwire { state, .. }
            | Self::OutputGuardrailTripwire { state, .. } => state.as_deref(),
            Self::User(_) | Self::ToolCall { .. } | Self::Json(_) => None,
        }
    }
}

/// Error type for failures inside a tool invocation.
///
/// Tool errors are contained per call: the turn executor turns them into
/// that call's output text and sibling concurrent calls keep running.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ToolError {
    /// Error during tool execution.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Invalid arguments provided to the tool.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Generic error.
    #[error("Tool error: {0}")]
    Other(String),
}

impl ToolError {
    /// Create an execution error.
    #[must_use]
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Create an invalid arguments error.
    #[must_use]
    pub fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }
}

impl From<String> for ToolError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for ToolError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_owned())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArguments(err.to_string())
    }
}
