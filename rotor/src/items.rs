//! Typed run records and the append-only item log.
//!
//! Every observable thing a run produces (messages, tool calls and their
//! outputs, handoffs, reasoning, approval requests) is recorded as a
//! [`RunItem`]. Items are created once, appended to the [`ItemLog`], and
//! never mutated afterward; the log is the canonical history of a run.
//! Agents are referenced by name so items survive snapshot restores.

use serde::{Deserialize, Serialize};

use crate::model::{ComputerAction, FunctionCall, ModelInputItem};

/// The raw payload of a recorded tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallPayload {
    /// A function-tool call.
    Function(FunctionCall),
    /// A provider-hosted tool call.
    Hosted {
        /// Provider-assigned id.
        id: String,
        /// Hosted tool name.
        name: String,
        /// MCP server label, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_label: Option<String>,
    },
    /// A computer-use action.
    Computer {
        /// Provider-assigned call id.
        call_id: String,
        /// The requested action.
        action: ComputerAction,
    },
    /// The answer to an MCP approval request, emitted when a hosted tool
    /// resolves approval synchronously.
    McpApprovalResponse {
        /// Approval request id being answered.
        approval_id: String,
        /// Whether the request was approved.
        approve: bool,
    },
}

/// A pending approval request awaiting an external decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalRequestPayload {
    /// A function-tool call blocked on approval.
    Function(FunctionCall),
    /// A hosted MCP call blocked on approval.
    HostedMcp {
        /// Provider-assigned approval id.
        id: String,
        /// MCP server label.
        server_label: String,
        /// Name of the MCP tool awaiting approval.
        tool_name: String,
        /// Raw argument text of the pending call.
        #[serde(default)]
        arguments: String,
    },
}

impl ApprovalRequestPayload {
    /// The tool name the approval decision is keyed by.
    #[must_use]
    pub fn tool_name(&self) -> &str {
        match self {
            Self::Function(call) => &call.name,
            Self::HostedMcp { tool_name, .. } => tool_name,
        }
    }

    /// The call (or approval) id the decision applies to.
    #[must_use]
    pub fn call_id(&self) -> &str {
        match self {
            Self::Function(call) => &call.call_id,
            Self::HostedMcp { id, .. } => id,
        }
    }
}

/// One record in a run's item log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunItem {
    /// An assistant message.
    MessageOutput {
        /// Name of the agent that produced the message.
        agent: String,
        /// Message text.
        content: String,
    },
    /// A tool call the model requested.
    ToolCall {
        /// Name of the agent that produced the call.
        agent: String,
        /// The raw call payload.
        call: ToolCallPayload,
    },
    /// The textualized output of an executed (or rejected) tool call.
    ToolOutput {
        /// Name of the agent the tool belongs to.
        agent: String,
        /// Call id this output answers.
        call_id: String,
        /// Name of the tool that ran.
        tool_name: String,
        /// Output text.
        output: String,
        /// Whether this output came from a computer action.
        #[serde(default)]
        computer: bool,
    },
    /// A reasoning trace entry.
    Reasoning {
        /// Name of the agent that produced it.
        agent: String,
        /// Reasoning text.
        content: String,
    },
    /// A function call that matched the handoff catalog.
    HandoffCall {
        /// Name of the agent that requested the handoff.
        agent: String,
        /// The raw call.
        call: FunctionCall,
    },
    /// A completed delegation from one agent to another.
    HandoffOutput {
        /// Agent that handed off.
        source_agent: String,
        /// Agent that took over.
        target_agent: String,
        /// Call id of the honored handoff call.
        call_id: String,
    },
    /// A pending approval request surfaced to the caller.
    ApprovalRequest {
        /// Name of the agent whose tool is blocked.
        agent: String,
        /// The pending request.
        request: ApprovalRequestPayload,
    },
}

impl RunItem {
    /// Name of the agent that produced this item.
    #[must_use]
    pub fn agent_name(&self) -> &str {
        match self {
            Self::MessageOutput { agent, .. }
            | Self::ToolCall { agent, .. }
            | Self::ToolOutput { agent, .. }
            | Self::Reasoning { agent, .. }
            | Self::HandoffCall { agent, .. }
            | Self::ApprovalRequest { agent, .. } => agent,
            Self::HandoffOutput { source_agent, .. } => source_agent,
        }
    }

    /// Render this item into model input history entries.
    ///
    /// Pending approval requests and provider-hosted calls render to
    /// nothing: the former have no outcome yet, the latter live on the
    /// provider side.
    #[must_use]
    pub fn to_input_items(&self) -> Vec<ModelInputItem> {
        match self {
            Self::MessageOutput { content, .. } => vec![ModelInputItem::assistant(content.clone())],
            Self::ToolCall { call, .. } => match call {
                ToolCallPayload::Function(function_call) => {
                    vec![ModelInputItem::FunctionCall(function_call.clone())]
                }
                ToolCallPayload::McpApprovalResponse {
                    approval_id,
                    approve,
                } => vec![ModelInputItem::McpApprovalResponse {
                    approval_id: approval_id.clone(),
                    approve: *approve,
                }],
                ToolCallPayload::Hosted { .. } | ToolCallPayload::Computer { .. } => Vec::new(),
            },
            Self::ToolOutput {
                call_id,
                output,
                computer,
                ..
            } => {
                if *computer {
                    vec![ModelInputItem::ComputerOutput {
                        call_id: call_id.clone(),
                        output: output.clone(),
                    }]
                } else {
                    vec![ModelInputItem::FunctionOutput {
                        call_id: call_id.clone(),
                        output: output.clone(),
                    }]
                }
            }
            Self::Reasoning { content, .. } => vec![ModelInputItem::Reasoning {
                content: content.clone(),
            }],
            Self::HandoffCall { call, .. } => vec![ModelInputItem::FunctionCall(call.clone())],
            Self::HandoffOutput {
                target_agent,
                call_id,
                ..
            } => vec![ModelInputItem::FunctionOutput {
                call_id: call_id.clone(),
                output: format!(r#"{{"assistant": "{target_agent}"}}"#),
            }],
            Self::ApprovalRequest { .. } => Vec::new(),
        }
    }
}

/// The original input a run started from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentInput {
    /// A single user message.
    Text(String),
    /// Pre-built input history.
    Items(Vec<ModelInputItem>),
}

impl AgentInput {
    /// Render the original input into model input history entries.
    #[must_use]
    pub fn to_input_items(&self) -> Vec<ModelInputItem> {
        match self {
            Self::Text(text) => vec![ModelInputItem::user(text.clone())],
            Self::Items(items) => items.clone(),
        }
    }
}

impl From<&str> for AgentInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for AgentInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ModelInputItem>> for AgentInput {
    fn from(items: Vec<ModelInputItem>) -> Self {
        Self::Items(items)
    }
}

/// Ordered, append-only sequence of [`RunItem`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemLog {
    items: Vec<RunItem>,
}

impl ItemLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one item.
    pub fn push(&mut self, item: RunItem) {
        self.items.push(item);
    }

    /// Append a batch of items, preserving their order.
    pub fn extend(&mut self, items: impl IntoIterator<Item = RunItem>) {
        self.items.extend(items);
    }

    /// View the log contents.
    #[must_use]
    pub fn as_slice(&self) -> &[RunItem] {
        &self.items
    }

    /// Number of items recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over the recorded items.
    pub fn iter(&self) -> std::slice::Iter<'_, RunItem> {
        self.items.iter()
    }

    /// Consume the log, yielding its items in order. Used when a handoff
    /// input filter rewrites the accumulated history.
    #[must_use]
    pub fn into_vec(self) -> Vec<RunItem> {
        self.items
    }
}

impl From<Vec<RunItem>> for ItemLog {
    fn from(items: Vec<RunItem>) -> Self {
        Self { items }
    }
}

impl<'a> IntoIterator for &'a ItemLog {
    type Item = &'a RunItem;
    type IntoIter = std::slice::Iter<'a, RunItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;

    #[test]
    fn agent_name_for_each_variant() {
        let call = FunctionCall::new("c1", "lookup", "{}");
        assert_eq!(
            RunItem::MessageOutput {
                agent: "a".to_owned(),
                content: "hi".to_owned()
            }
            .agent_name(),
            "a"
        );
        assert_eq!(
            RunItem::HandoffOutput {
                source_agent: "from".to_owned(),
                target_agent: "to".to_owned(),
                call_id: call.call_id.clone(),
            }
            .agent_name(),
            "from"
        );
    }

    #[test]
    fn message_renders_as_assistant_input() {
        let item = RunItem::MessageOutput {
            agent: "a".to_owned(),
            content: "hello".to_owned(),
        };
        let rendered = item.to_input_items();
        assert_eq!(
            rendered,
            vec![ModelInputItem::Message {
                role: Role::Assistant,
                content: "hello".to_owned()
            }]
        );
    }

    #[test]
    fn pending_approval_renders_to_nothing() {
        let item = RunItem::ApprovalRequest {
            agent: "a".to_owned(),
            request: ApprovalRequestPayload::Function(FunctionCall::new("c1", "t", "{}")),
        };
        assert!(item.to_input_items().is_empty());
    }

    #[test]
    fn handoff_output_renders_assistant_marker() {
        let item = RunItem::HandoffOutput {
            source_agent: "a".to_owned(),
            target_agent: "b".to_owned(),
            call_id: "c9".to_owned(),
        };
        let rendered = item.to_input_items();
        assert_eq!(
            rendered,
            vec![ModelInputItem::FunctionOutput {
                call_id: "c9".to_owned(),
                output: r#"{"assistant": "b"}"#.to_owned()
            }]
        );
    }

    #[test]
    fn computer_output_renders_as_computer_input() {
        let item = RunItem::ToolOutput {
            agent: "a".to_owned(),
            call_id: "c1".to_owned(),
            tool_name: "computer_use".to_owned(),
            output: "screen".to_owned(),
            computer: true,
        };
        assert!(matches!(
            item.to_input_items().as_slice(),
            [ModelInputItem::ComputerOutput { .. }]
        ));
    }

    #[test]
    fn agent_input_text_renders_as_user_message() {
        let input: AgentInput = "what time is it".into();
        assert_eq!(
            input.to_input_items(),
            vec![ModelInputItem::user("what time is it")]
        );
    }

    #[test]
    fn item_log_preserves_order_and_serde() {
        let mut log = ItemLog::new();
        log.push(RunItem::Reasoning {
            agent: "a".to_owned(),
            content: "r".to_owned(),
        });
        log.push(RunItem::MessageOutput {
            agent: "a".to_owned(),
            content: "m".to_owned(),
        });
        assert_eq!(log.len(), 2);

        let json = serde_json::to_string(&log).unwrap();
        let parsed: ItemLog = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, log);
        assert!(matches!(parsed.as_slice()[0], RunItem::Reasoning { .. }));
    }

    #[test]
    fn approval_payload_accessors() {
        let payload = ApprovalRequestPayload::HostedMcp {
            id: "apr_1".to_owned(),
            server_label: "db".to_owned(),
            tool_name: "query".to_owned(),
            arguments: "{}".to_owned(),
        };
        assert_eq!(payload.tool_name(), "query");
        assert_eq!(payload.call_id(), "apr_1");
    }
}
