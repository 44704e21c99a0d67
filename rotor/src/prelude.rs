//! Prelude module for convenient imports.
//!
//! This module re-exports commonly used types and traits for easy access.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rotor::prelude::*;
//! ```

pub use crate::agent::{
    Agent, Instructions, OutputType, ToolOutputDecider, ToolUseBehavior,
};
pub use crate::approvals::{ApprovalLedger, Decision};
pub use crate::context::{CancelSignal, RunContext};
pub use crate::error::{Error, Result, ToolError};
pub use crate::events::{AgentHooks, NoopRunHooks, RunEvent, RunHooks};
pub use crate::executor::{
    APPROVAL_REJECTION_MESSAGE, MULTIPLE_HANDOFFS_MESSAGE, NextStep,
};
pub use crate::guardrail::{
    FinalRunOutput, GuardrailOutput, InputGuardrail, InputGuardrailCheck, InputGuardrailResult,
    OutputGuardrail, OutputGuardrailCheck, OutputGuardrailResult,
};
pub use crate::handoff::{
    Handoff, HandoffInputData, HandoffInputFilter, HandoffResolver, handoff, remove_all_tools,
};
pub use crate::items::{AgentInput, ApprovalRequestPayload, ItemLog, RunItem, ToolCallPayload};
pub use crate::model::{
    ComputerAction, FunctionCall, Model, ModelInputItem, ModelRequest, ModelResponse,
    ModelSettings, ModelStream, ResponseOutputItem, Role, StreamEvent, ToolChoice,
};
pub use crate::runner::{
    DEFAULT_MAX_TURNS, RunConfig, RunInput, RunResult, Runner,
};
pub use crate::state::{RunState, SCHEMA_VERSION};
pub use crate::tool::{
    BoxedFunctionTool, Computer, ComputerTool, FunctionTool, FunctionToolResult, HostedApproval,
    HostedApprovalCallback, HostedTool, ToolDefinition,
};
pub use crate::tracker::ToolUseTracker;
pub use crate::usage::Usage;
