//! Model collaborator contract.
//!
//! The language-model call itself is external to this runtime. A [`Model`]
//! receives a fully-serialized request (instructions, input history, tool
//! and handoff catalogs, settings) and returns either one complete
//! [`ModelResponse`] or a single-pass stream of [`StreamEvent`]s ending in
//! a completed response.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::CancelSignal;
use crate::error::Result;
use crate::tool::ToolDefinition;
use crate::usage::Usage;

/// A function call produced by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Provider-assigned call id, echoed back with the call's output.
    pub call_id: String,
    /// Name of the function or handoff being invoked.
    pub name: String,
    /// Raw argument text, exactly as produced by the model.
    #[serde(default)]
    pub arguments: String,
}

impl FunctionCall {
    /// Create a function call record.
    #[must_use]
    pub fn new(
        call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// One action within a computer-use call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComputerAction {
    /// Click at a screen coordinate.
    Click {
        /// X coordinate.
        x: i64,
        /// Y coordinate.
        y: i64,
    },
    /// Double-click at a screen coordinate.
    DoubleClick {
        /// X coordinate.
        x: i64,
        /// Y coordinate.
        y: i64,
    },
    /// Type literal text.
    Type {
        /// The text to type.
        text: String,
    },
    /// Press one or more keys.
    Keypress {
        /// Key names, in press order.
        keys: Vec<String>,
    },
    /// Scroll from a coordinate.
    Scroll {
        /// X coordinate.
        x: i64,
        /// Y coordinate.
        y: i64,
        /// Horizontal scroll delta.
        scroll_x: i64,
        /// Vertical scroll delta.
        scroll_y: i64,
    },
    /// Move the pointer.
    Move {
        /// X coordinate.
        x: i64,
        /// Y coordinate.
        y: i64,
    },
    /// Wait for the screen to settle.
    Wait,
    /// Take a screenshot.
    Screenshot,
}

/// One entry in a model response's ordered output list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseOutputItem {
    /// An assistant message.
    Message {
        /// Message text.
        content: String,
    },
    /// A call to a function tool or handoff.
    FunctionCall(FunctionCall),
    /// A call to a provider-hosted tool, executed provider-side.
    HostedToolCall {
        /// Provider-assigned id.
        id: String,
        /// Hosted tool name.
        name: String,
        /// MCP server label, for MCP-backed hosted tools.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_label: Option<String>,
    },
    /// An MCP approval request: a hosted call that cannot proceed without
    /// an approve/reject decision.
    McpApprovalRequest {
        /// Provider-assigned approval id.
        id: String,
        /// MCP server label the request originates from.
        server_label: String,
        /// Name of the MCP tool awaiting approval.
        tool_name: String,
        /// Raw argument text of the pending call.
        #[serde(default)]
        arguments: String,
    },
    /// A computer-use action.
    ComputerCall {
        /// Provider-assigned call id.
        call_id: String,
        /// The requested action.
        action: ComputerAction,
    },
    /// A reasoning trace entry.
    Reasoning {
        /// Reasoning text.
        content: String,
    },
}

/// A complete model response for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Token usage for this response.
    #[serde(default)]
    pub usage: Usage,
    /// Ordered output items.
    #[serde(default)]
    pub output: Vec<ResponseOutputItem>,
    /// Provider-side response id, for continuation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl ModelResponse {
    /// Text of the last assistant message, if the response contains one.
    #[must_use]
    pub fn last_message_text(&self) -> Option<&str> {
        self.output.iter().rev().find_map(|item| match item {
            ResponseOutputItem::Message { content } => Some(content.as_str()),
            _ => None,
        })
    }
}

/// Role of a conversation input item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Prior assistant output.
    Assistant,
}

/// One entry in the serialized input history sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelInputItem {
    /// A conversation message.
    Message {
        /// Who produced the message.
        role: Role,
        /// Message text.
        content: String,
    },
    /// A prior function/handoff call.
    FunctionCall(FunctionCall),
    /// The output of a prior function/handoff call.
    FunctionOutput {
        /// Call id this output answers.
        call_id: String,
        /// Output text.
        output: String,
    },
    /// The observation produced by a prior computer action.
    ComputerOutput {
        /// Call id this output answers.
        call_id: String,
        /// Observation text.
        output: String,
    },
    /// A prior reasoning entry.
    Reasoning {
        /// Reasoning text.
        content: String,
    },
    /// The answer to a prior MCP approval request.
    McpApprovalResponse {
        /// Approval request id being answered.
        approval_id: String,
        /// Whether the request was approved.
        approve: bool,
    },
}

impl ModelInputItem {
    /// A user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::Message {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// How the model is allowed to pick tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoice {
    /// The model decides freely.
    #[default]
    Auto,
    /// The model must call some tool.
    Required,
    /// The model must not call tools.
    None,
    /// The model must call the named tool.
    Named(String),
}

impl ToolChoice {
    /// Whether this choice forces tool use and is subject to the
    /// first-use reset.
    #[must_use]
    pub const fn is_forced(&self) -> bool {
        matches!(self, Self::Required | Self::Named(_))
    }
}

/// Sampling and tool-selection settings for a model call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Tool selection constraint, `None` for the provider default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Whether the model may emit several tool calls in one turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
}

/// A fully-serialized request for one model invocation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Resolved system instructions, if the agent has any.
    pub system_instructions: Option<String>,
    /// Serialized conversation history (original input plus run items).
    pub input: Vec<ModelInputItem>,
    /// Function-tool catalog, including the computer tool's definition.
    pub tools: Vec<ToolDefinition>,
    /// Handoff catalog, serialized as function tools.
    pub handoffs: Vec<ToolDefinition>,
    /// Sampling and tool-choice settings.
    pub settings: ModelSettings,
    /// JSON schema the final output must satisfy, `None` for free text.
    pub output_schema: Option<Value>,
    /// Whether span data may include verbose payloads.
    pub tracing_enabled: bool,
    /// Provider-side id of the previous response, for continuation.
    pub previous_response_id: Option<String>,
    /// Cooperative cancellation signal.
    pub cancel: CancelSignal,
}

/// Raw events produced by a streaming model call.
///
/// The stream is single-pass: it can only be consumed once, and restarting
/// means re-running the turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The provider accepted the request and started responding.
    ResponseStarted,
    /// An incremental chunk of assistant text.
    TextDelta {
        /// The text fragment.
        delta: String,
    },
    /// One output item finished streaming.
    OutputItemDone {
        /// The completed item.
        item: ResponseOutputItem,
    },
    /// The response completed; always the final event of a stream.
    ResponseDone {
        /// The assembled response.
        response: ModelResponse,
    },
}

/// Boxed single-pass stream of model events.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// The language-model collaborator consumed by the runner.
#[async_trait]
pub trait Model: Send + Sync {
    /// Perform one model invocation and return the complete response.
    async fn get_response(&self, request: ModelRequest) -> Result<ModelResponse>;

    /// Perform one model invocation, streaming events as they arrive.
    ///
    /// The default implementation adapts [`get_response`](Model::get_response)
    /// into a two-event stream for models without native streaming.
    async fn get_streamed_response(&self, request: ModelRequest) -> Result<ModelStream> {
        let response = self.get_response(request).await?;
        let events = vec![
            Ok(StreamEvent::ResponseStarted),
            Ok(StreamEvent::ResponseDone { response }),
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
