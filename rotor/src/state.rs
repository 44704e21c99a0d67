//! Serializable run state.
//!
//! A [`RunState`] owns everything a run accumulates: the turn counter,
//! the item log, model-response history, the approval ledger, the
//! tool-use tracker, and the current step. It round-trips through a
//! versioned JSON snapshot so an interrupted run can be persisted,
//! resolved out-of-band, and resumed later.
//!
//! Agents are never serialized. The snapshot stores names only, and
//! restoring rebuilds the name-to-agent map by walking the initial
//! agent's handoff graph breadth-first (cycles are fine, a visited set
//! keyed by name guards re-traversal).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::Agent;
use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::executor::{NextStep, SingleStepResult};
use crate::guardrail::{InputGuardrailResult, OutputGuardrailResult};
use crate::items::{AgentInput, ItemLog, RunItem};
use crate::model::{ModelInputItem, ModelResponse};
use crate::tracker::ToolUseTracker;
use crate::usage::Usage;

/// Snapshot schema version this build reads and writes. Any other
/// version is rejected without migration.
pub const SCHEMA_VERSION: &str = "1.0";

/// The complete, serializable state of one run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub(crate) current_agent: Arc<Agent>,
    pub(crate) original_input: AgentInput,
    pub(crate) turn: u64,
    pub(crate) max_turns: u64,
    pub(crate) items: ItemLog,
    pub(crate) model_responses: Vec<ModelResponse>,
    pub(crate) current_step: Option<NextStep>,
    pub(crate) no_active_agent_run: bool,
    pub(crate) context: RunContext,
    pub(crate) tracker: ToolUseTracker,
    pub(crate) input_guardrail_results: Vec<InputGuardrailResult>,
    pub(crate) output_guardrail_results: Vec<OutputGuardrailResult>,
}

impl RunState {
    /// Fresh state for a run starting at `agent` with `input`.
    #[must_use]
    pub fn new(agent: Arc<Agent>, input: impl Into<AgentInput>, max_turns: u64) -> Self {
        Self {
            current_agent: agent,
            original_input: input.into(),
            turn: 0,
            max_turns,
            items: ItemLog::new(),
            model_responses: Vec::new(),
            current_step: None,
            no_active_agent_run: true,
            context: RunContext::new(),
            tracker: ToolUseTracker::default(),
            input_guardrail_results: Vec::new(),
            output_guardrail_results: Vec::new(),
        }
    }

    /// Replaces the caller-supplied context data.
    #[must_use]
    pub fn with_context(mut self, context: RunContext) -> Self {
        self.context = context;
        self
    }

    /// The turn counter. Only ever increases, except for the rollback
    /// after an input-guardrail execution failure.
    #[must_use]
    pub fn turn(&self) -> u64 {
        self.turn
    }

    #[must_use]
    pub fn max_turns(&self) -> u64 {
        self.max_turns
    }

    /// The agent currently driving the run.
    #[must_use]
    pub fn current_agent(&self) -> &Arc<Agent> {
        &self.current_agent
    }

    #[must_use]
    pub fn original_input(&self) -> &AgentInput {
        &self.original_input
    }

    /// The item log: everything the run has produced, in order.
    #[must_use]
    pub fn items(&self) -> &ItemLog {
        &self.items
    }

    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.context
    }

    #[must_use]
    pub fn context_mut(&mut self) -> &mut RunContext {
        &mut self.context
    }

    /// Cumulative usage across all model calls so far.
    #[must_use]
    pub fn usage(&self) -> Usage {
        self.context.usage
    }

    #[must_use]
    pub fn current_step(&self) -> Option<&NextStep> {
        self.current_step.as_ref()
    }

    #[must_use]
    pub fn model_responses(&self) -> &[ModelResponse] {
        &self.model_responses
    }

    #[must_use]
    pub fn last_model_response(&self) -> Option<&ModelResponse> {
        self.model_responses.last()
    }

    #[must_use]
    pub fn input_guardrail_results(&self) -> &[InputGuardrailResult] {
        &self.input_guardrail_results
    }

    #[must_use]
    pub fn output_guardrail_results(&self) -> &[OutputGuardrailResult] {
        &self.output_guardrail_results
    }

    /// The approval requests blocking the run, if it is interrupted.
    #[must_use]
    pub fn interruptions(&self) -> &[RunItem] {
        match &self.current_step {
            Some(NextStep::Interruption { interruptions }) => interruptions,
            _ => &[],
        }
    }

    /// Approve one blocked call. A no-op for non-approval items.
    pub fn approve(&mut self, item: &RunItem) {
        self.decide(item, true, false);
    }

    /// Approve a blocked call's tool permanently, for every future call.
    pub fn approve_always(&mut self, item: &RunItem) {
        self.decide(item, true, true);
    }

    /// Reject one blocked call. A no-op for non-approval items.
    pub fn reject(&mut self, item: &RunItem) {
        self.decide(item, false, false);
    }

    /// Reject a blocked call's tool permanently, for every future call.
    pub fn reject_always(&mut self, item: &RunItem) {
        self.decide(item, false, true);
    }

    fn decide(&mut self, item: &RunItem, approve: bool, always: bool) {
        let RunItem::ApprovalRequest { request, .. } = item else {
            return;
        };
        if approve {
            self.context
                .approvals
                .approve(request.tool_name(), request.call_id(), always);
        } else {
            self.context
                .approvals
                .reject(request.tool_name(), request.call_id(), always);
        }
    }

    /// Fold one executed step back into the state.
    pub(crate) fn apply_step(&mut self, result: SingleStepResult) {
        self.original_input = result.original_input;
        let mut items: Vec<RunItem> = result.pre_step_items;
        items.extend(result.new_step_items);
        self.items = ItemLog::from(items);
        self.current_step = Some(result.next_step);
    }

    /// Render the full conversation (original input plus item log) as
    /// model input history.
    pub(crate) fn build_model_input(&self) -> Vec<ModelInputItem> {
        let mut input = self.original_input.to_input_items();
        for item in &self.items {
            input.extend(item.to_input_items());
        }
        input
    }

    /// Serialize to the versioned snapshot.
    pub fn to_json(&self) -> Result<Value> {
        let snapshot = Snapshot {
            schema_version: SCHEMA_VERSION.to_owned(),
            current_turn: self.turn,
            current_agent: AgentRef {
                name: self.current_agent.name().to_owned(),
            },
            original_input: self.original_input.clone(),
            model_responses: self.model_responses.clone(),
            context: self.context.clone(),
            tool_use_tracker: self.tracker.clone(),
            max_turns: self.max_turns,
            current_agent_span: None,
            no_active_agent_run: self.no_active_agent_run,
            input_guardrail_results: self.input_guardrail_results.clone(),
            output_guardrail_results: self.output_guardrail_results.clone(),
            current_step: self.current_step.as_ref().map(StepSnapshot::from),
            last_model_response: self.model_responses.last().cloned(),
            generated_items: self.items.as_slice().to_vec(),
            last_processed_response: None,
            trace: None,
        };
        Ok(serde_json::to_value(&snapshot)?)
    }

    /// Serialize to a snapshot string.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_json()?)?)
    }

    /// Restore from a snapshot, resolving agent names against the
    /// handoff graph reachable from `initial_agent`.
    pub fn from_json(initial_agent: &Arc<Agent>, value: &Value) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_value(value.clone())?;
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(Error::user(format!(
                "unsupported snapshot schema version '{}' (expected '{SCHEMA_VERSION}')",
                snapshot.schema_version
            )));
        }

        let agents = agent_map(initial_agent);
        let resolve = |name: &str| -> Result<Arc<Agent>> {
            agents.get(name).cloned().ok_or_else(|| {
                Error::user(format!(
                    "snapshot references agent '{name}', which is not reachable from '{}'",
                    initial_agent.name()
                ))
            })
        };

        let current_agent = resolve(&snapshot.current_agent.name)?;
        for name in snapshot.tool_use_tracker.agent_names() {
            resolve(name)?;
        }
        for result in &snapshot.input_guardrail_results {
            resolve(&result.agent_name)?;
        }
        for result in &snapshot.output_guardrail_results {
            resolve(&result.agent_name)?;
        }
        let current_step = snapshot
            .current_step
            .map(|step| step.into_next_step(&resolve))
            .transpose()?;

        Ok(Self {
            current_agent,
            original_input: snapshot.original_input,
            turn: snapshot.current_turn,
            max_turns: snapshot.max_turns,
            items: ItemLog::from(snapshot.generated_items),
            model_responses: snapshot.model_responses,
            current_step,
            no_active_agent_run: snapshot.no_active_agent_run,
            context: snapshot.context,
            tracker: snapshot.tool_use_tracker,
            input_guardrail_results: snapshot.input_guardrail_results,
            output_guardrail_results: snapshot.output_guardrail_results,
        })
    }

    /// Restore from a snapshot string.
    pub fn from_json_str(initial_agent: &Arc<Agent>, json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_json(initial_agent, &value)
    }
}

/// Name-to-agent map over the handoff graph reachable from `root`.
fn agent_map(root: &Arc<Agent>) -> BTreeMap<String, Arc<Agent>> {
    let mut agents = BTreeMap::new();
    let mut queue = VecDeque::from([Arc::clone(root)]);
    while let Some(agent) = queue.pop_front() {
        if agents.contains_key(agent.name()) {
            continue;
        }
        for handoff in agent.all_handoffs() {
            queue.push_back(Arc::clone(handoff.agent()));
        }
        agents.insert(agent.name().to_owned(), agent);
    }
    agents
}

#[derive(Serialize, Deserialize)]
struct AgentRef {
    name: String,
}

/// The on-the-wire snapshot shape.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    schema_version: String,
    current_turn: u64,
    current_agent: AgentRef,
    original_input: AgentInput,
    model_responses: Vec<ModelResponse>,
    context: RunContext,
    tool_use_tracker: ToolUseTracker,
    max_turns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_agent_span: Option<Value>,
    no_active_agent_run: bool,
    input_guardrail_results: Vec<InputGuardrailResult>,
    output_guardrail_results: Vec<OutputGuardrailResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_step: Option<StepSnapshot>,
    last_model_response: Option<ModelResponse>,
    generated_items: Vec<RunItem>,
    last_processed_response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace: Option<Value>,
}

/// Serializable form of [`NextStep`]; agents are stored by name.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
enum StepSnapshot {
    RunAgain,
    Handoff { new_agent: String },
    FinalOutput { output: String },
    Interruption { interruptions: Vec<RunItem> },
}

impl From<&NextStep> for StepSnapshot {
    fn from(step: &NextStep) -> Self {
        match step {
            NextStep::RunAgain => Self::RunAgain,
            NextStep::Handoff { new_agent } => Self::Handoff {
                new_agent: new_agent.name().to_owned(),
            },
            NextStep::FinalOutput { output } => Self::FinalOutput {
                output: output.clone(),
            },
            NextStep::Interruption { interruptions } => Self::Interruption {
                interruptions: interruptions.clone(),
            },
        }
    }
}

impl StepSnapshot {
    fn into_next_step(self, resolve: &impl Fn(&str) -> Result<Arc<Agent>>) -> Result<NextStep> {
        Ok(match self {
            Self::RunAgain => NextStep::RunAgain,
            Self::Handoff { new_agent } => NextStep::Handoff {
                new_agent: resolve(&new_agent)?,
            },
            Self::FinalOutput { output } => NextStep::FinalOutput { output },
            Self::Interruption { interruptions } => NextStep::Interruption { interruptions },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::handoff;
    use crate::items::ApprovalRequestPayload;
    use crate::model::{FunctionCall, ResponseOutputItem};

    fn triage_graph() -> Arc<Agent> {
        let billing = Arc::new(Agent::new("Billing"));
        let refunds = Arc::new(Agent::new("Refunds").handoff(handoff(Arc::clone(&billing))));
        Arc::new(
            Agent::new("Triage")
                .handoff(handoff(billing))
                .handoff(handoff(refunds)),
        )
    }

    fn populated_state(root: &Arc<Agent>) -> RunState {
        let mut state = RunState::new(Arc::clone(root), "I need a refund", 10);
        state.turn = 2;
        state.items.push(RunItem::MessageOutput {
            agent: "Triage".into(),
            content: "routing".into(),
        });
        state.items.push(RunItem::ToolCall {
            agent: "Triage".into(),
            call: crate::items::ToolCallPayload::Function(FunctionCall::new("c1", "lookup", "{}")),
        });
        state.model_responses.push(ModelResponse {
            usage: Usage::new(12, 7),
            output: vec![ResponseOutputItem::Message {
                content: "routing".into(),
            }],
            response_id: Some("resp_1".into()),
        });
        state.context.add_usage(Usage::new(12, 7));
        state.context.approvals.approve("lookup", "c1", false);
        state.tracker.add_tool_use("Triage", &["lookup".to_owned()]);
        state.current_step = Some(NextStep::RunAgain);
        state
    }

    mod snapshot {
        use super::*;

        #[test]
        fn round_trip_preserves_identity_and_history() {
            let root = triage_graph();
            let state = populated_state(&root);

            let json = state.to_json().unwrap();
            let restored = RunState::from_json(&root, &json).unwrap();

            assert_eq!(restored.turn(), state.turn());
            assert_eq!(restored.max_turns(), state.max_turns());
            assert_eq!(
                restored.current_agent().name(),
                state.current_agent().name()
            );
            assert_eq!(restored.items(), state.items());
            assert_eq!(restored.context().approvals, state.context().approvals);
            assert_eq!(restored.usage(), state.usage());
            assert!(matches!(restored.current_step(), Some(NextStep::RunAgain)));
        }

        #[test]
        fn wire_shape_is_camel_case_and_versioned() {
            let root = triage_graph();
            let json = populated_state(&root).to_json().unwrap();

            assert_eq!(json["schemaVersion"], SCHEMA_VERSION);
            assert_eq!(json["currentTurn"], 2);
            assert_eq!(json["currentAgent"]["name"], "Triage");
            assert_eq!(json["maxTurns"], 10);
            assert!(json["generatedItems"].is_array());
            assert!(json["toolUseTracker"]["Triage"].is_array());
            assert!(json["lastProcessedResponse"].is_null());
            assert_eq!(json["currentStep"]["type"], "runAgain");
        }

        #[test]
        fn version_mismatch_is_a_user_error() {
            let root = triage_graph();
            let mut json = populated_state(&root).to_json().unwrap();
            json["schemaVersion"] = Value::String("2.0".into());

            let err = RunState::from_json(&root, &json).unwrap_err();
            assert!(matches!(err, Error::User(_)));
        }

        #[test]
        fn unresolvable_agent_name_is_a_user_error() {
            let root = triage_graph();
            let mut json = populated_state(&root).to_json().unwrap();
            json["currentAgent"]["name"] = Value::String("Shipping".into());

            let err = RunState::from_json(&root, &json).unwrap_err();
            assert!(matches!(err, Error::User(_)));
        }

        #[test]
        fn interrupted_step_round_trips() {
            let root = triage_graph();
            let mut state = populated_state(&root);
            let request = RunItem::ApprovalRequest {
                agent: "Triage".into(),
                request: ApprovalRequestPayload::Function(FunctionCall::new("c2", "wipe", "{}")),
            };
            state.items.push(request.clone());
            state.current_step = Some(NextStep::Interruption {
                interruptions: vec![request],
            });

            let json = state.to_json().unwrap();
            let restored = RunState::from_json(&root, &json).unwrap();
            assert_eq!(restored.interruptions().len(), 1);
        }

        #[test]
        fn handoff_step_resolves_by_name() {
            let root = triage_graph();
            let mut state = populated_state(&root);
            let billing = Arc::clone(root.all_handoffs()[0].agent());
            state.current_step = Some(NextStep::Handoff { new_agent: billing });

            let json = state.to_json().unwrap();
            let restored = RunState::from_json(&root, &json).unwrap();
            match restored.current_step() {
                Some(NextStep::Handoff { new_agent }) => assert_eq!(new_agent.name(), "Billing"),
                other => panic!("expected handoff step, got {other:?}"),
            }
        }
    }

    mod approvals {
        use super::*;

        fn pending_item() -> RunItem {
            RunItem::ApprovalRequest {
                agent: "Triage".into(),
                request: ApprovalRequestPayload::Function(FunctionCall::new("c1", "wipe", "{}")),
            }
        }

        #[test]
        fn approve_records_a_per_call_grant() {
            let root = triage_graph();
            let mut state = RunState::new(root, "hi", 5);
            state.approve(&pending_item());
            assert_eq!(state.context().approvals.check("wipe", "c1"), Some(true));
            assert_eq!(state.context().approvals.check("wipe", "c2"), None);
        }

        #[test]
        fn approve_always_covers_future_calls() {
            let root = triage_graph();
            let mut state = RunState::new(root, "hi", 5);
            state.approve_always(&pending_item());
            assert_eq!(state.context().approvals.check("wipe", "c99"), Some(true));
        }

        #[test]
        fn re_approving_is_idempotent() {
            let root = triage_graph();
            let mut state = RunState::new(root, "hi", 5);
            state.approve(&pending_item());
            let before = state.context().approvals.clone();
            state.approve(&pending_item());
            assert_eq!(state.context().approvals, before);
        }

        #[test]
        fn non_approval_items_are_ignored() {
            let root = triage_graph();
            let mut state = RunState::new(root, "hi", 5);
            state.approve(&RunItem::MessageOutput {
                agent: "Triage".into(),
                content: "hi".into(),
            });
            assert!(state.context().approvals.is_empty());
        }
    }

    mod graph {
        use super::*;

        #[test]
        fn agent_map_walks_nested_handoffs_once() {
            let root = triage_graph();
            let map = agent_map(&root);
            assert_eq!(map.len(), 3);
            assert!(map.contains_key("Triage"));
            assert!(map.contains_key("Billing"));
            assert!(map.contains_key("Refunds"));
        }
    }
}
