//! The turn executor.
//!
//! Takes one classified model response and produces the next step of the
//! run: execute function tools and computer actions concurrently, gate
//! approval-requiring calls through the ledger, honor at most one
//! handoff, then decide between running the model again, interrupting
//! for approvals, or finishing with a final output.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{Instrument, debug, info_span, warn};

use crate::agent::{Agent, OutputType, ToolUseBehavior};
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::events::HookSet;
use crate::handoff::{HandoffInputData, HandoffInputFilter};
use crate::items::{AgentInput, ApprovalRequestPayload, RunItem, ToolCallPayload};
use crate::processor::{ComputerCandidate, FunctionCandidate, ProcessedResponse};
use crate::tool::{FunctionToolResult, stringify_tool_output};

/// Output text recorded for a call whose approval was denied.
pub const APPROVAL_REJECTION_MESSAGE: &str = "Tool execution was not approved.";

/// Output text recorded for every handoff beyond the first in one turn.
pub const MULTIPLE_HANDOFFS_MESSAGE: &str = "Multiple handoffs detected, ignoring this one.";

/// Where the run goes after one executed turn.
#[derive(Debug, Clone)]
pub enum NextStep {
    /// Feed the new items back to the model and take another turn.
    RunAgain,
    /// Control passes to another agent; the loop continues with it.
    Handoff {
        /// The agent taking over.
        new_agent: Arc<Agent>,
    },
    /// The run finished successfully.
    FinalOutput {
        /// The final output text.
        output: String,
    },
    /// The run cannot proceed without external approval decisions.
    Interruption {
        /// The blocking `ApprovalRequest` items.
        interruptions: Vec<RunItem>,
    },
}

/// Result of executing one turn.
#[derive(Debug)]
pub struct SingleStepResult {
    /// The run input, possibly rewritten by a handoff input filter.
    pub original_input: AgentInput,
    /// Items from earlier turns, possibly rewritten by a handoff filter.
    pub pre_step_items: Vec<RunItem>,
    /// Items produced this turn, in order.
    pub new_step_items: Vec<RunItem>,
    /// The computed next step.
    pub next_step: NextStep,
}

/// Outcome of one gated function-tool call.
enum ToolOutcome {
    /// Executed; carries the output item and its result record.
    Ran(RunItem, FunctionToolResult),
    /// Denied in the ledger; carries the rejection output item.
    Rejected(RunItem),
    /// No decision yet; carries the approval-request item.
    Blocked(RunItem),
}

/// Execute one classified turn against the current state.
pub(crate) async fn execute_turn(
    agent: &Arc<Agent>,
    context: &RunContext,
    mut original_input: AgentInput,
    mut pre_step_items: Vec<RunItem>,
    processed: ProcessedResponse,
    hooks: &HookSet<'_>,
    default_filter: Option<&HandoffInputFilter>,
) -> Result<SingleStepResult> {
    let no_pending_work = !processed.has_pending_work();
    let mut new_step_items = processed.new_items;
    let mut interruptions = Vec::new();
    let mut results = Vec::new();

    // Fan out all independent side effects, then barrier-join in
    // candidate order.
    let function_futures = processed
        .functions
        .iter()
        .map(|candidate| run_function_candidate(agent, context, candidate, hooks));
    let computer_futures = processed
        .computer_actions
        .iter()
        .map(|candidate| run_computer_candidate(agent, context, candidate, hooks));
    let (function_outcomes, computer_items) =
        futures::join!(join_all(function_futures), join_all(computer_futures));

    for outcome in function_outcomes {
        match outcome {
            ToolOutcome::Ran(item, result) => {
                new_step_items.push(item);
                results.push(result);
            }
            ToolOutcome::Rejected(item) => new_step_items.push(item),
            ToolOutcome::Blocked(item) => {
                new_step_items.push(item.clone());
                interruptions.push(item);
            }
        }
    }
    new_step_items.extend(computer_items);

    // MCP approval requests with a synchronous callback are answered
    // inline; the rest block the run.
    for request in &processed.approval_requests {
        match &request.tool.on_approval {
            Some(callback) => {
                let approve = matches!(callback(context), crate::tool::HostedApproval::Approve);
                debug!(tool = %request.tool_name, approve, "answered MCP approval inline");
                new_step_items.push(RunItem::ToolCall {
                    agent: agent.name().to_owned(),
                    call: ToolCallPayload::McpApprovalResponse {
                        approval_id: request.id.clone(),
                        approve,
                    },
                });
            }
            None => {
                let item = RunItem::ApprovalRequest {
                    agent: agent.name().to_owned(),
                    request: ApprovalRequestPayload::HostedMcp {
                        id: request.id.clone(),
                        server_label: request.server_label.clone(),
                        tool_name: request.tool_name.clone(),
                        arguments: request.arguments.clone(),
                    },
                };
                new_step_items.push(item.clone());
                interruptions.push(item);
            }
        }
    }

    // At most one handoff per turn; the rest get rejection outputs.
    if let Some((honored, rest)) = processed.handoffs.split_first() {
        for rejected in rest {
            warn!(handoff = %rejected.call.name, "ignoring extra handoff");
            new_step_items.push(RunItem::ToolOutput {
                agent: agent.name().to_owned(),
                call_id: rejected.call.call_id.clone(),
                tool_name: rejected.call.name.clone(),
                output: MULTIPLE_HANDOFFS_MESSAGE.to_owned(),
                computer: false,
            });
        }

        let new_agent = honored.handoff.resolve(context, &honored.call.arguments)?;
        new_step_items.push(RunItem::HandoffOutput {
            source_agent: agent.name().to_owned(),
            target_agent: new_agent.name().to_owned(),
            call_id: honored.call.call_id.clone(),
        });

        if let Some(filter) = honored.handoff.filter().or(default_filter) {
            let filtered = filter(HandoffInputData {
                input_history: original_input,
                pre_handoff_items: pre_step_items,
                new_items: new_step_items,
            });
            original_input = filtered.input_history;
            pre_step_items = filtered.pre_handoff_items;
            new_step_items = filtered.new_items;
        }

        return Ok(SingleStepResult {
            original_input,
            pre_step_items,
            new_step_items,
            next_step: NextStep::Handoff { new_agent },
        });
    }

    let next_step = next_step_from_tools(
        agent,
        context,
        interruptions,
        &results,
        no_pending_work,
        &new_step_items,
    )
    .await?;

    Ok(SingleStepResult {
        original_input,
        pre_step_items,
        new_step_items,
        next_step,
    })
}

/// Re-execute only the previously blocked calls of an interrupted step.
///
/// Calls the ledger now approves run normally, denied ones get the
/// rejection output, undecided ones stay blocked and the step remains an
/// interruption. The `ApprovalRequest` items are already in the log from
/// the turn that produced them and are not re-appended.
pub(crate) async fn resume_interrupted_step(
    agent: &Arc<Agent>,
    context: &RunContext,
    original_input: AgentInput,
    pre_step_items: Vec<RunItem>,
    interruptions: Vec<RunItem>,
    hooks: &HookSet<'_>,
) -> Result<SingleStepResult> {
    let mut new_step_items = Vec::new();
    let mut still_blocked = Vec::new();
    let mut approved_calls = Vec::new();

    for item in interruptions {
        let request = match &item {
            RunItem::ApprovalRequest { request, .. } => request.clone(),
            _ => return Err(Error::user("interrupted step holds a non-approval item")),
        };
        match request {
            ApprovalRequestPayload::Function(call) => {
                match context.approvals.check(&call.name, &call.call_id) {
                    Some(true) => approved_calls.push(call.clone()),
                    Some(false) => new_step_items.push(RunItem::ToolOutput {
                        agent: agent.name().to_owned(),
                        call_id: call.call_id.clone(),
                        tool_name: call.name.clone(),
                        output: APPROVAL_REJECTION_MESSAGE.to_owned(),
                        computer: false,
                    }),
                    None => still_blocked.push(item),
                }
            }
            ApprovalRequestPayload::HostedMcp { id, tool_name, .. } => {
                match context.approvals.check(&tool_name, &id) {
                    Some(approve) => new_step_items.push(RunItem::ToolCall {
                        agent: agent.name().to_owned(),
                        call: ToolCallPayload::McpApprovalResponse {
                            approval_id: id.clone(),
                            approve,
                        },
                    }),
                    None => still_blocked.push(item),
                }
            }
        }
    }

    let futures = approved_calls.iter().map(|call| async move {
        let Some(tool) = agent.function_tool(&call.name) else {
            return Err(Error::user(format!(
                "cannot resume: tool '{}' is no longer configured on agent '{}'",
                call.name,
                agent.name()
            )));
        };
        hooks.tool_start(context, agent, &call.name).await;
        let output = invoke_contained(context, tool.as_ref(), &call.arguments).await;
        hooks.tool_end(context, agent, &call.name, &output).await;
        Ok((
            RunItem::ToolOutput {
                agent: agent.name().to_owned(),
                call_id: call.call_id.clone(),
                tool_name: call.name.clone(),
                output: output.clone(),
                computer: false,
            },
            FunctionToolResult {
                tool_name: call.name.clone(),
                call_id: call.call_id.clone(),
                output,
            },
        ))
    });

    let mut results = Vec::new();
    for executed in join_all(futures).await {
        let (item, result) = executed?;
        new_step_items.push(item);
        results.push(result);
    }

    let next_step = if still_blocked.is_empty() {
        match tool_behavior_output(agent, context, &results).await? {
            Some(output) => NextStep::FinalOutput { output },
            None => NextStep::RunAgain,
        }
    } else {
        NextStep::Interruption {
            interruptions: still_blocked,
        }
    };

    Ok(SingleStepResult {
        original_input,
        pre_step_items,
        new_step_items,
        next_step,
    })
}

async fn run_function_candidate(
    agent: &Arc<Agent>,
    context: &RunContext,
    candidate: &FunctionCandidate,
    hooks: &HookSet<'_>,
) -> ToolOutcome {
    let call = &candidate.call;
    let parsed = serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null);

    if candidate
        .tool
        .needs_approval(context, &parsed, &call.call_id)
        .await
    {
        match context.approvals.check(&call.name, &call.call_id) {
            Some(true) => {}
            Some(false) => {
                return ToolOutcome::Rejected(RunItem::ToolOutput {
                    agent: agent.name().to_owned(),
                    call_id: call.call_id.clone(),
                    tool_name: call.name.clone(),
                    output: APPROVAL_REJECTION_MESSAGE.to_owned(),
                    computer: false,
                });
            }
            None => {
                return ToolOutcome::Blocked(RunItem::ApprovalRequest {
                    agent: agent.name().to_owned(),
                    request: ApprovalRequestPayload::Function(call.clone()),
                });
            }
        }
    }

    let span = info_span!("tool_call", tool.name = %call.name, call_id = %call.call_id);
    let output = async {
        hooks.tool_start(context, agent, &call.name).await;
        let output = invoke_contained(context, candidate.tool.as_ref(), &call.arguments).await;
        hooks.tool_end(context, agent, &call.name, &output).await;
        output
    }
    .instrument(span)
    .await;

    ToolOutcome::Ran(
        RunItem::ToolOutput {
            agent: agent.name().to_owned(),
            call_id: call.call_id.clone(),
            tool_name: call.name.clone(),
            output: output.clone(),
            computer: false,
        },
        FunctionToolResult {
            tool_name: call.name.clone(),
            call_id: call.call_id.clone(),
            output,
        },
    )
}

async fn run_computer_candidate(
    agent: &Arc<Agent>,
    context: &RunContext,
    candidate: &ComputerCandidate,
    hooks: &HookSet<'_>,
) -> RunItem {
    let name = candidate.computer.name.clone();
    hooks.tool_start(context, agent, &name).await;
    let output = match candidate
        .computer
        .computer
        .perform(context, &candidate.action)
        .await
    {
        Ok(observation) => observation,
        Err(err) => {
            warn!(tool.name = %name, error = %err, "computer action failed");
            err.to_string()
        }
    };
    hooks.tool_end(context, agent, &name, &output).await;

    RunItem::ToolOutput {
        agent: agent.name().to_owned(),
        call_id: candidate.call_id.clone(),
        tool_name: name,
        output,
        computer: true,
    }
}

/// Invoke a function tool, containing any failure as output text so one
/// bad call never aborts its siblings.
async fn invoke_contained(
    context: &RunContext,
    tool: &dyn crate::tool::FunctionTool,
    arguments: &str,
) -> String {
    match tool.invoke(context, arguments).await {
        Ok(value) => stringify_tool_output(&value),
        Err(err) => {
            warn!(tool.name = %tool.name(), error = %err, "tool call failed");
            err.to_string()
        }
    }
}

/// Decide the step after tool execution: interruptions first, then the
/// tool-use policy, then a final message if nothing else is pending.
async fn next_step_from_tools(
    agent: &Arc<Agent>,
    context: &RunContext,
    interruptions: Vec<RunItem>,
    results: &[FunctionToolResult],
    nothing_pending: bool,
    new_step_items: &[RunItem],
) -> Result<NextStep> {
    if !interruptions.is_empty() {
        return Ok(NextStep::Interruption { interruptions });
    }

    if let Some(output) = tool_behavior_output(agent, context, results).await? {
        return Ok(NextStep::FinalOutput { output });
    }

    if nothing_pending {
        if let Some(text) = last_message_text(new_step_items) {
            return final_output_for(agent, text);
        }
    }

    Ok(NextStep::RunAgain)
}

/// Apply the agent's tool-use policy to this turn's function results.
async fn tool_behavior_output(
    agent: &Arc<Agent>,
    context: &RunContext,
    results: &[FunctionToolResult],
) -> Result<Option<String>> {
    if results.is_empty() {
        return Ok(None);
    }
    match agent.behavior() {
        ToolUseBehavior::RunLlmAgain => Ok(None),
        ToolUseBehavior::StopOnFirstTool => Ok(Some(results[0].output.clone())),
        ToolUseBehavior::StopAtNames(names) => Ok(results
            .iter()
            .find(|r| names.contains(&r.tool_name))
            .map(|r| r.output.clone())),
        ToolUseBehavior::Custom(decider) => decider.decide(context, results).await,
    }
}

/// Validate a candidate final text against the agent's output type.
fn final_output_for(agent: &Arc<Agent>, text: String) -> Result<NextStep> {
    if let OutputType::JsonSchema { name, .. } = agent.output_type() {
        if let Err(err) = serde_json::from_str::<serde_json::Value>(&text) {
            return Err(Error::model_behavior(format!(
                "final output does not parse as JSON for schema '{name}': {err}"
            )));
        }
    }
    Ok(NextStep::FinalOutput { output: text })
}

fn last_message_text(items: &[RunItem]) -> Option<String> {
    items.iter().rev().find_map(|item| match item {
        RunItem::MessageOutput { content, .. } => Some(content.clone()),
        _ => None,
    })
}
