//! Classification of one raw model response.
//!
//! The classifier walks the response's output items in order, turns each
//! into its item-log record, and buckets the actionable ones (function
//! calls, computer actions, handoffs, MCP approval requests) for the turn
//! executor. Item order always equals model-output order.

use std::fmt;

use tracing::debug;

use crate::agent::Agent;
use crate::error::{Error, Result};
use crate::handoff::Handoff;
use crate::items::{RunItem, ToolCallPayload};
use crate::model::{ComputerAction, FunctionCall, ModelResponse, ResponseOutputItem};
use crate::tool::{BoxedFunctionTool, ComputerTool, HostedTool};

/// A function-tool call matched to its tool.
#[derive(Clone)]
pub struct FunctionCandidate {
    /// The tool to invoke.
    pub tool: BoxedFunctionTool,
    /// The call as the model produced it.
    pub call: FunctionCall,
}

impl fmt::Debug for FunctionCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCandidate")
            .field("call", &self.call)
            .finish_non_exhaustive()
    }
}

/// A handoff call matched to its declaration.
#[derive(Debug, Clone)]
pub struct HandoffCandidate {
    /// The matched handoff declaration.
    pub handoff: Handoff,
    /// The call as the model produced it.
    pub call: FunctionCall,
}

/// A computer action matched to the agent's computer tool.
#[derive(Debug, Clone)]
pub struct ComputerCandidate {
    /// The agent's computer tool.
    pub computer: ComputerTool,
    /// Provider-assigned call id.
    pub call_id: String,
    /// The requested screen action.
    pub action: ComputerAction,
}

/// An MCP approval request matched to its hosted tool.
#[derive(Debug, Clone)]
pub struct McpApprovalCandidate {
    /// The hosted tool the request belongs to.
    pub tool: HostedTool,
    /// Provider-assigned approval id.
    pub id: String,
    /// MCP server label.
    pub server_label: String,
    /// Name of the MCP tool awaiting approval.
    pub tool_name: String,
    /// Raw argument text of the pending call.
    pub arguments: String,
}

/// One model response, partitioned for execution.
#[derive(Debug, Clone, Default)]
pub struct ProcessedResponse {
    /// Item-log records in model-output order.
    pub new_items: Vec<RunItem>,
    /// Handoff calls, in model-output order.
    pub handoffs: Vec<HandoffCandidate>,
    /// Function-tool calls to execute.
    pub functions: Vec<FunctionCandidate>,
    /// Computer actions to execute.
    pub computer_actions: Vec<ComputerCandidate>,
    /// MCP approval requests awaiting a decision.
    pub approval_requests: Vec<McpApprovalCandidate>,
    /// Names of tools and handoffs the model invoked this turn.
    pub tools_used: Vec<String>,
}

impl ProcessedResponse {
    /// Whether this response left any tool, handoff or approval work.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        !self.handoffs.is_empty()
            || !self.functions.is_empty()
            || !self.computer_actions.is_empty()
            || !self.approval_requests.is_empty()
    }
}

/// Partition one model response against the agent's tool and handoff
/// catalogs.
///
/// A function name claimed by both a handoff and a function tool
/// resolves to the handoff. Unknown function names, computer actions
/// without a configured computer tool, and approval requests naming an
/// unknown MCP server label are model-behavior errors.
pub fn process_model_response(agent: &Agent, response: &ModelResponse) -> Result<ProcessedResponse> {
    let mut processed = ProcessedResponse::default();
    let agent_name = agent.name().to_owned();

    for item in &response.output {
        match item {
            ResponseOutputItem::Message { content } => {
                processed.new_items.push(RunItem::MessageOutput {
                    agent: agent_name.clone(),
                    content: content.clone(),
                });
            }
            ResponseOutputItem::Reasoning { content } => {
                processed.new_items.push(RunItem::Reasoning {
                    agent: agent_name.clone(),
                    content: content.clone(),
                });
            }
            ResponseOutputItem::FunctionCall(call) => {
                if let Some(handoff) = agent.handoff_named(&call.name) {
                    debug!(handoff = %call.name, "classified handoff call");
                    processed.new_items.push(RunItem::HandoffCall {
                        agent: agent_name.clone(),
                        call: call.clone(),
                    });
                    processed.handoffs.push(HandoffCandidate {
                        handoff: handoff.clone(),
                        call: call.clone(),
                    });
                    // A handoff is invoked like a tool, so it counts
                    // toward the forced-tool-choice reset.
                    processed.tools_used.push(call.name.clone());
                } else if let Some(tool) = agent.function_tool(&call.name) {
                    processed.new_items.push(RunItem::ToolCall {
                        agent: agent_name.clone(),
                        call: ToolCallPayload::Function(call.clone()),
                    });
                    processed.functions.push(FunctionCandidate {
                        tool: tool.clone(),
                        call: call.clone(),
                    });
                    processed.tools_used.push(call.name.clone());
                } else {
                    return Err(Error::model_behavior(format!(
                        "model produced a call to unknown tool '{}'",
                        call.name
                    )));
                }
            }
            ResponseOutputItem::HostedToolCall {
                id,
                name,
                server_label,
            } => {
                processed.new_items.push(RunItem::ToolCall {
                    agent: agent_name.clone(),
                    call: ToolCallPayload::Hosted {
                        id: id.clone(),
                        name: name.clone(),
                        server_label: server_label.clone(),
                    },
                });
                processed.tools_used.push(name.clone());
            }
            ResponseOutputItem::McpApprovalRequest {
                id,
                server_label,
                tool_name,
                arguments,
            } => {
                let Some(tool) = agent.mcp_tool_for_label(server_label) else {
                    return Err(Error::model_behavior(format!(
                        "MCP approval request for unknown server label '{server_label}'"
                    )));
                };
                processed.new_items.push(RunItem::ToolCall {
                    agent: agent_name.clone(),
                    call: ToolCallPayload::Hosted {
                        id: id.clone(),
                        name: tool_name.clone(),
                        server_label: Some(server_label.clone()),
                    },
                });
                processed.approval_requests.push(McpApprovalCandidate {
                    tool: tool.clone(),
                    id: id.clone(),
                    server_label: server_label.clone(),
                    tool_name: tool_name.clone(),
                    arguments: arguments.clone(),
                });
            }
            ResponseOutputItem::ComputerCall { call_id, action } => {
                let Some(computer) = agent.computer_tool() else {
                    return Err(Error::model_behavior(
                        "model produced a computer action but no computer tool is configured",
                    ));
                };
                processed.new_items.push(RunItem::ToolCall {
                    agent: agent_name.clone(),
                    call: ToolCallPayload::Computer {
                        call_id: call_id.clone(),
                        action: action.clone(),
                    },
                });
                processed.computer_actions.push(ComputerCandidate {
                    computer: computer.clone(),
                    call_id: call_id.clone(),
                    action: action.clone(),
                });
                processed.tools_used.push(computer.name.clone());
            }
        }
    }

    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::error::ToolError;
    use crate::handoff::handoff;
    use crate::usage::Usage;
    use crate::tool::{FunctionTool, HostedTool};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Arc;

    struct Lookup;

    #[async_trait]
    impl FunctionTool for Lookup {
        fn name(&self) -> &str {
            "lookup"
        }

        fn description(&self) -> String {
            "Look something up".to_owned()
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn invoke(&self, _context: &RunContext, _arguments: &str) -> Result<Value, ToolError> {
            Ok(Value::Null)
        }
    }

    fn response(output: Vec<ResponseOutputItem>) -> ModelResponse {
        ModelResponse {
            usage: Usage::zero(),
            output,
            response_id: None,
        }
    }

    fn call(name: &str, call_id: &str) -> FunctionCall {
        FunctionCall {
            call_id: call_id.into(),
            name: name.into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn message_only_response_has_no_pending_work() {
        let agent = Agent::new("A");
        let processed = process_model_response(
            &agent,
            &response(vec![ResponseOutputItem::Message {
                content: "hello".into(),
            }]),
        )
        .unwrap();

        assert_eq!(processed.new_items.len(), 1);
        assert!(!processed.has_pending_work());
        assert!(processed.tools_used.is_empty());
    }

    #[test]
    fn unknown_tool_name_is_a_model_behavior_error() {
        let agent = Agent::new("A");
        let err = process_model_response(
            &agent,
            &response(vec![ResponseOutputItem::FunctionCall(call(
                "missing", "call_1",
            ))]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ModelBehavior { .. }));
    }

    #[test]
    fn handoff_takes_priority_over_same_named_tool() {
        struct Shadow;

        #[async_trait]
        impl FunctionTool for Shadow {
            fn name(&self) -> &str {
                "transfer_to_billing"
            }

            fn description(&self) -> String {
                String::new()
            }

            fn parameters_schema(&self) -> Value {
                serde_json::json!({"type": "object"})
            }

            async fn invoke(
                &self,
                _context: &RunContext,
                _arguments: &str,
            ) -> Result<Value, ToolError> {
                Ok(Value::Null)
            }
        }

        let billing = Arc::new(Agent::new("Billing"));
        let agent = Agent::new("Triage")
            .tool(Arc::new(Shadow))
            .handoff(handoff(billing));

        let processed = process_model_response(
            &agent,
            &response(vec![ResponseOutputItem::FunctionCall(call(
                "transfer_to_billing",
                "call_1",
            ))]),
        )
        .unwrap();

        assert_eq!(processed.handoffs.len(), 1);
        assert!(processed.functions.is_empty());
        assert!(matches!(
            processed.new_items[0],
            RunItem::HandoffCall { .. }
        ));
    }

    #[test]
    fn handoff_call_counts_as_tool_use() {
        let billing = Arc::new(Agent::new("Billing"));
        let agent = Agent::new("Triage").handoff(handoff(billing));

        let processed = process_model_response(
            &agent,
            &response(vec![ResponseOutputItem::FunctionCall(call(
                "transfer_to_billing",
                "call_1",
            ))]),
        )
        .unwrap();

        assert_eq!(processed.tools_used, vec!["transfer_to_billing".to_owned()]);
    }

    #[test]
    fn computer_action_without_computer_tool_fails() {
        let agent = Agent::new("A");
        let err = process_model_response(
            &agent,
            &response(vec![ResponseOutputItem::ComputerCall {
                call_id: "call_1".into(),
                action: ComputerAction::Screenshot,
            }]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ModelBehavior { .. }));
    }

    #[test]
    fn mcp_approval_request_requires_known_server_label() {
        let agent = Agent::new("A");
        let request = ResponseOutputItem::McpApprovalRequest {
            id: "req_1".into(),
            server_label: "db".into(),
            tool_name: "query".into(),
            arguments: "{}".into(),
        };
        let err = process_model_response(&agent, &response(vec![request.clone()])).unwrap_err();
        assert!(matches!(err, Error::ModelBehavior { .. }));

        let agent = Agent::new("A").hosted_tool(HostedTool::mcp("query", "db"));
        let processed = process_model_response(&agent, &response(vec![request])).unwrap();
        assert_eq!(processed.approval_requests.len(), 1);
        assert_eq!(processed.approval_requests[0].tool_name, "query");
    }

    #[test]
    fn items_preserve_model_output_order() {
        let agent = Agent::new("A").tool(Arc::new(Lookup));
        let processed = process_model_response(
            &agent,
            &response(vec![
                ResponseOutputItem::Reasoning {
                    content: "thinking".into(),
                },
                ResponseOutputItem::FunctionCall(call("lookup", "call_1")),
                ResponseOutputItem::Message {
                    content: "done".into(),
                },
            ]),
        )
        .unwrap();

        assert_eq!(processed.new_items.len(), 3);
        assert!(matches!(processed.new_items[0], RunItem::Reasoning { .. }));
        assert!(matches!(processed.new_items[1], RunItem::ToolCall { .. }));
        assert!(matches!(
            processed.new_items[2],
            RunItem::MessageOutput { .. }
        ));
        assert_eq!(processed.tools_used, vec!["lookup".to_owned()]);
    }
}
