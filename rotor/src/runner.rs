//! The driving loop.
//!
//! A [`Runner`] wires an external [`Model`] to the classifier, the turn
//! executor, the guardrail executor and the run state, and drives the
//! step machine until a final output, an interruption, or a fatal
//! error. [`Runner::run`] awaits the whole run; [`Runner::run_streamed`]
//! yields events as the run progresses.

use std::fmt;
use std::sync::Arc;

use async_stream::try_stream;
use futures::{Stream, StreamExt as _};
use serde_json::Value;
use tracing::{Instrument, Span, debug, info, info_span};

use crate::agent::{Agent, OutputType};
use crate::context::{CancelSignal, RunContext};
use crate::error::{Error, Result};
use crate::events::{HookSet, NoopRunHooks, RunEvent, RunHooks};
use crate::executor::{NextStep, execute_turn, resume_interrupted_step};
use crate::guardrail::{
    FinalRunOutput, InputGuardrail, OutputGuardrail, run_input_guardrails, run_output_guardrails,
};
use crate::handoff::HandoffInputFilter;
use crate::items::RunItem;
use crate::model::{
    Model, ModelInputItem, ModelRequest, ModelResponse, ModelSettings, StreamEvent, ToolChoice,
};
use crate::processor::process_model_response;
use crate::state::RunState;
use crate::tool::ToolDefinition;
use crate::usage::Usage;

/// Turn ceiling applied when the caller does not set one.
pub const DEFAULT_MAX_TURNS: u64 = 10;

/// What a run starts from.
#[derive(Debug)]
pub enum RunInput {
    /// A single user message.
    Text(String),
    /// Pre-built input history.
    Items(Vec<ModelInputItem>),
    /// A previously saved (typically interrupted) run state.
    State(Box<RunState>),
}

impl From<&str> for RunInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for RunInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ModelInputItem>> for RunInput {
    fn from(items: Vec<ModelInputItem>) -> Self {
        Self::Items(items)
    }
}

impl From<RunState> for RunInput {
    fn from(state: RunState) -> Self {
        Self::State(Box::new(state))
    }
}

/// Per-run configuration.
#[derive(Clone, Default)]
pub struct RunConfig {
    max_turns: Option<u64>,
    hooks: Option<Arc<dyn RunHooks>>,
    context: Option<RunContext>,
    model_settings: Option<ModelSettings>,
    handoff_input_filter: Option<HandoffInputFilter>,
    input_guardrails: Vec<InputGuardrail>,
    output_guardrails: Vec<OutputGuardrail>,
    tracing_disabled: bool,
    cancel: CancelSignal,
    previous_response_id: Option<String>,
}

impl RunConfig {
    /// Configuration with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the turn ceiling (default [`DEFAULT_MAX_TURNS`]).
    /// Ignored when resuming from a saved state, which carries its own.
    #[must_use]
    pub fn max_turns(mut self, max_turns: u64) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    /// Attaches run-level lifecycle hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn RunHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Seeds the run context (caller data, pre-approved tools).
    #[must_use]
    pub fn context(mut self, context: RunContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Model settings overriding the agent's own where set.
    #[must_use]
    pub fn model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = Some(settings);
        self
    }

    /// Run-level default handoff input filter, used when a handoff has
    /// none of its own.
    #[must_use]
    pub fn handoff_input_filter(mut self, filter: HandoffInputFilter) -> Self {
        self.handoff_input_filter = Some(filter);
        self
    }

    /// Adds a run-level input guardrail.
    #[must_use]
    pub fn input_guardrail(mut self, guardrail: InputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    /// Adds a run-level output guardrail.
    #[must_use]
    pub fn output_guardrail(mut self, guardrail: OutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    /// Disables verbose payloads in model-call span data.
    #[must_use]
    pub fn disable_tracing(mut self) -> Self {
        self.tracing_disabled = true;
        self
    }

    /// Threads a cancellation signal through every model call.
    #[must_use]
    pub fn cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Provider-side response id to continue from on the first call.
    #[must_use]
    pub fn previous_response_id(mut self, id: impl Into<String>) -> Self {
        self.previous_response_id = Some(id.into());
        self
    }
}

impl fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunConfig")
            .field("max_turns", &self.max_turns)
            .field("has_hooks", &self.hooks.is_some())
            .field("input_guardrails", &self.input_guardrails)
            .field("output_guardrails", &self.output_guardrails)
            .field("tracing_disabled", &self.tracing_disabled)
            .finish_non_exhaustive()
    }
}

/// The outcome of a completed or interrupted run.
#[derive(Debug)]
pub struct RunResult {
    final_output: Option<String>,
    new_items: Vec<RunItem>,
    state: RunState,
}

impl RunResult {
    /// The final output text, `None` if the run was interrupted.
    #[must_use]
    pub fn final_output(&self) -> Option<&str> {
        self.final_output.as_deref()
    }

    /// Items appended during this invocation.
    #[must_use]
    pub fn new_items(&self) -> &[RunItem] {
        &self.new_items
    }

    /// Whether the run stopped on pending approval requests.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.final_output.is_none()
    }

    /// The approval requests blocking an interrupted run.
    #[must_use]
    pub fn interruptions(&self) -> &[RunItem] {
        self.state.interruptions()
    }

    /// Cumulative usage across the whole run so far.
    #[must_use]
    pub fn usage(&self) -> Usage {
        self.state.usage()
    }

    /// The run state, for inspection or persistence.
    #[must_use]
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Consume the result, keeping the state for a later resume.
    #[must_use]
    pub fn into_state(self) -> RunState {
        self.state
    }
}

/// Drives agents through the turn loop against one model.
#[derive(Clone)]
pub struct Runner {
    model: Arc<dyn Model>,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner").finish_non_exhaustive()
    }
}

impl Runner {
    /// A runner backed by the given model.
    #[must_use]
    pub fn new(model: Arc<dyn Model>) -> Self {
        Self { model }
    }

    /// Run `agent` to completion (or interruption) with default
    /// configuration.
    pub async fn run(&self, agent: Arc<Agent>, input: impl Into<RunInput>) -> Result<RunResult> {
        self.run_with_config(agent, input, RunConfig::default())
            .await
    }

    /// Run `agent` to completion (or interruption).
    pub async fn run_with_config(
        &self,
        agent: Arc<Agent>,
        input: impl Into<RunInput>,
        config: RunConfig,
    ) -> Result<RunResult> {
        let mut state = initial_state(agent, input.into(), &config);
        let run_hooks: Arc<dyn RunHooks> = config
            .hooks
            .clone()
            .unwrap_or_else(|| Arc::new(NoopRunHooks));
        let hooks = HookSet::new(run_hooks.as_ref());
        let base_items = state.items.len();

        // One span per agent segment: the active agent's span is entered
        // around every await of its turns and replaced (closing the old
        // one) when a handoff swaps the agent.
        let mut span = agent_span(&state);
        loop {
            let settled = async {
                if let Some(NextStep::Interruption { interruptions }) = state.current_step.take() {
                    resume_step(&mut state, interruptions, &hooks).await?;
                } else {
                    begin_turn(&mut state, &config, &hooks).await?;
                    let request = build_request(&state, &config);
                    let response = match self.model.get_response(request).await {
                        Ok(response) => response,
                        Err(err) => return Err(err.with_state(state.clone())),
                    };
                    execute_response(&mut state, response, &config, &hooks).await?;
                }
                settle_step(&mut state, &config, &hooks).await
            }
            .instrument(span.clone())
            .await?;

            match settled {
                Settled::Continue => {
                    if state.no_active_agent_run {
                        span = agent_span(&state);
                    }
                }
                Settled::Finished(output) => {
                    return Ok(finish(state, Some(output), base_items));
                }
                Settled::Interrupted => return Ok(finish(state, None, base_items)),
            }
        }
    }

    /// Run `agent`, yielding [`RunEvent`]s as the run progresses.
    ///
    /// The stream is single-pass. A successful run ends with
    /// [`RunEvent::Completed`]; an interrupted run does too, with an
    /// interrupted result. Cancellation stops the stream without an
    /// error once observed between events.
    pub fn run_streamed<I: Into<RunInput>>(
        &self,
        agent: Arc<Agent>,
        input: I,
        config: RunConfig,
    ) -> impl Stream<Item = Result<RunEvent>> + Send + use<I> {
        let model = Arc::clone(&self.model);
        let input = input.into();

        try_stream! {
            let mut state = initial_state(agent, input, &config);
            let run_hooks: Arc<dyn RunHooks> = config
                .hooks
                .clone()
                .unwrap_or_else(|| Arc::new(NoopRunHooks));
            let hooks = HookSet::new(run_hooks.as_ref());
            let base_items = state.items.len();
            let mut active_agent = String::new();
            let mut span = Span::none();

            loop {
                if state.current_agent.name() != active_agent {
                    active_agent = state.current_agent.name().to_owned();
                    // Close the previous agent's span before opening the
                    // next one.
                    span = agent_span(&state);
                    yield RunEvent::AgentUpdated { agent: active_agent.clone() };
                }

                let step_items;
                if let Some(NextStep::Interruption { interruptions }) = state.current_step.take() {
                    step_items = resume_step(&mut state, interruptions, &hooks)
                        .instrument(span.clone())
                        .await?;
                } else {
                    begin_turn(&mut state, &config, &hooks)
                        .instrument(span.clone())
                        .await?;
                    let request = build_request(&state, &config);
                    let mut stream = model
                        .get_streamed_response(request)
                        .instrument(span.clone())
                        .await
                        .map_err(|err| err.with_state(state.clone()))?;

                    // Forward raw events until the response completes.
                    // Once cancellation is observed, stop forwarding and
                    // end the stream without an error.
                    let mut response: Option<ModelResponse> = None;
                    while let Some(event) = stream.next().instrument(span.clone()).await {
                        if config.cancel.is_cancelled() {
                            debug!("run cancelled, dropping remaining stream events");
                            return;
                        }
                        let event = event.map_err(|err| err.with_state(state.clone()))?;
                        if let StreamEvent::ResponseDone { response: done } = &event {
                            response = Some(done.clone());
                        }
                        yield RunEvent::RawModel(event);
                    }
                    if response.is_none() && config.cancel.is_cancelled() {
                        return;
                    }
                    let response = response.ok_or_else(|| {
                        Error::model_behavior("model stream ended without a completed response")
                            .with_state(state.clone())
                    })?;

                    let items_before = execute_response(&mut state, response, &config, &hooks)
                        .instrument(span.clone())
                        .await?;
                    step_items = state
                        .items
                        .as_slice()
                        .get(items_before..)
                        .unwrap_or(&[])
                        .to_vec();
                }

                for item in step_items {
                    yield RunEvent::ItemCreated(item);
                }

                match settle_step(&mut state, &config, &hooks)
                    .instrument(span.clone())
                    .await?
                {
                    Settled::Continue => {}
                    Settled::Finished(output) => {
                        let result = finish(state, Some(output), base_items);
                        yield RunEvent::Completed { result: Box::new(result) };
                        return;
                    }
                    Settled::Interrupted => {
                        let result = finish(state, None, base_items);
                        yield RunEvent::Completed { result: Box::new(result) };
                        return;
                    }
                }
            }
        }
    }
}

/// Outcome of settling one computed step.
enum Settled {
    Continue,
    Finished(String),
    Interrupted,
}

fn agent_span(state: &RunState) -> Span {
    info_span!("agent_run", agent.name = %state.current_agent.name())
}

fn initial_state(agent: Arc<Agent>, input: RunInput, config: &RunConfig) -> RunState {
    let max_turns = config.max_turns.unwrap_or(DEFAULT_MAX_TURNS);
    let mut state = match input {
        RunInput::State(state) => return *state,
        RunInput::Text(text) => RunState::new(agent, text, max_turns),
        RunInput::Items(items) => RunState::new(agent, items, max_turns),
    };
    if let Some(context) = &config.context {
        state.context = context.clone();
    }
    state
}

/// Emit the agent-start notification if needed, advance and bound-check
/// the turn counter, and run input guardrails on the first turn.
///
/// Errors carry a snapshot of the state at the failure point.
async fn begin_turn(state: &mut RunState, config: &RunConfig, hooks: &HookSet<'_>) -> Result<()> {
    let agent = Arc::clone(&state.current_agent);
    if state.no_active_agent_run {
        hooks.agent_start(&state.context, &agent).await;
        state.no_active_agent_run = false;
    }

    state.turn += 1;
    if state.turn > state.max_turns {
        return Err(Error::MaxTurnsExceeded {
            max_turns: state.max_turns,
            state: None,
        }
        .with_state(state.clone()));
    }
    debug!(turn = state.turn, agent.name = %agent.name(), "starting turn");

    // Input guardrails run exactly once, on the run's first turn. An
    // execution failure rolls the turn counter back so a rerun does not
    // double-count; a tripwire does not.
    if state.turn == 1 {
        let mut guardrails = config.input_guardrails.clone();
        guardrails.extend_from_slice(agent.input_guardrails());
        let input = state.original_input.to_input_items();
        match run_input_guardrails(&guardrails, &state.context, agent.name(), &input).await {
            Ok(results) => state.input_guardrail_results.extend(results),
            Err(err) => {
                if matches!(err, Error::GuardrailExecution { .. }) {
                    state.turn -= 1;
                }
                return Err(err.with_state(state.clone()));
            }
        }
    }

    Ok(())
}

/// Record the model response, classify it, execute the turn, and fold
/// the step back into the state. Returns the item-log length before the
/// step, so callers can diff out the step's items.
async fn execute_response(
    state: &mut RunState,
    response: ModelResponse,
    config: &RunConfig,
    hooks: &HookSet<'_>,
) -> Result<usize> {
    state.context.add_usage(response.usage);
    state.model_responses.push(response.clone());

    let agent = Arc::clone(&state.current_agent);
    let processed = match process_model_response(&agent, &response) {
        Ok(processed) => processed,
        Err(err) => return Err(err.with_state(state.clone())),
    };
    state
        .tracker
        .add_tool_use(agent.name(), &processed.tools_used);

    let original_input = state.original_input.clone();
    let items_before = state.items.len();
    let pre_step_items = state.items.as_slice().to_vec();
    let result = execute_turn(
        &agent,
        &state.context,
        original_input,
        pre_step_items,
        processed,
        hooks,
        config.handoff_input_filter.as_ref(),
    )
    .await;
    match result {
        Ok(result) => {
            state.apply_step(result);
            Ok(items_before)
        }
        Err(err) => Err(err.with_state(state.clone())),
    }
}

/// Re-execute the previously blocked calls of an interrupted run.
/// Returns the items the resumed step appended.
async fn resume_step(
    state: &mut RunState,
    interruptions: Vec<RunItem>,
    hooks: &HookSet<'_>,
) -> Result<Vec<RunItem>> {
    let agent = Arc::clone(&state.current_agent);
    let original_input = state.original_input.clone();
    let pre_step_items = state.items.as_slice().to_vec();
    let result = resume_interrupted_step(
        &agent,
        &state.context,
        original_input,
        pre_step_items,
        interruptions,
        hooks,
    )
    .await;
    match result {
        Ok(result) => {
            let new_items = result.new_step_items.clone();
            state.apply_step(result);
            Ok(new_items)
        }
        Err(err) => Err(err.with_state(state.clone())),
    }
}

/// Act on the step the executor computed: swap agents on a handoff, run
/// output guardrails and finish on a final output, or hand control back
/// to the caller on an interruption.
async fn settle_step(
    state: &mut RunState,
    config: &RunConfig,
    hooks: &HookSet<'_>,
) -> Result<Settled> {
    match state.current_step.clone() {
        None | Some(NextStep::RunAgain) => Ok(Settled::Continue),
        Some(NextStep::Handoff { new_agent }) => {
            let from = Arc::clone(&state.current_agent);
            info!(from = %from.name(), to = %new_agent.name(), "handoff");
            hooks.handoff(&state.context, &from, &new_agent).await;
            state.current_agent = new_agent;
            // Forces a fresh agent-start notification on the next
            // iteration.
            state.no_active_agent_run = true;
            Ok(Settled::Continue)
        }
        Some(NextStep::FinalOutput { output }) => {
            let agent = Arc::clone(&state.current_agent);
            let final_output = FinalRunOutput {
                text: output.clone(),
                parsed: parse_final_output(&agent, &output),
            };
            // Output guardrails run once, when the final output is first
            // produced. The turn's side effects are already in the item
            // log; a tripwire here aborts without rollback.
            let mut guardrails = config.output_guardrails.clone();
            guardrails.extend_from_slice(agent.output_guardrails());
            let results = run_output_guardrails(
                &guardrails,
                &state.context,
                agent.name(),
                &final_output,
                state.model_responses.last(),
            )
            .await;
            match results {
                Ok(results) => state.output_guardrail_results.extend(results),
                Err(err) => return Err(err.with_state(state.clone())),
            }

            hooks.agent_end(&state.context, &agent, &output).await;
            info!(agent.name = %agent.name(), "run finished");
            Ok(Settled::Finished(output))
        }
        Some(NextStep::Interruption { interruptions }) => {
            info!(pending = interruptions.len(), "run interrupted on approvals");
            Ok(Settled::Interrupted)
        }
    }
}

fn finish(state: RunState, final_output: Option<String>, base_items: usize) -> RunResult {
    let new_items = state
        .items
        .as_slice()
        .get(base_items..)
        .unwrap_or(&[])
        .to_vec();
    RunResult {
        final_output,
        new_items,
        state,
    }
}

fn parse_final_output(agent: &Agent, text: &str) -> Value {
    match agent.output_type() {
        OutputType::Text => Value::String(text.to_owned()),
        OutputType::JsonSchema { .. } => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
        }
    }
}

/// Assemble the model request for the state's current agent.
fn build_request(state: &RunState, config: &RunConfig) -> ModelRequest {
    let agent = &state.current_agent;
    let mut settings = merge_settings(agent.settings(), config.model_settings.as_ref());

    // A forced tool choice is cleared after the agent's first tool use,
    // so the model cannot loop on the pinned tool forever.
    if agent.resets_tool_choice()
        && settings.tool_choice.as_ref().is_some_and(ToolChoice::is_forced)
        && state.tracker.has_used_tools(agent.name())
    {
        debug!(agent.name = %agent.name(), "resetting forced tool choice");
        settings.tool_choice = Some(ToolChoice::Auto);
    }

    let mut tools = agent.tool_definitions();
    if let Some(computer) = agent.computer_tool() {
        tools.push(ToolDefinition::new(
            computer.name.clone(),
            "Control a computer via screen actions.",
            serde_json::json!({"type": "object", "properties": {}}),
        ));
    }

    ModelRequest {
        system_instructions: agent.system_prompt(&state.context),
        input: state.build_model_input(),
        tools,
        handoffs: agent.handoff_definitions(),
        settings,
        output_schema: match agent.output_type() {
            OutputType::JsonSchema { schema, .. } => Some(schema.clone()),
            OutputType::Text => None,
        },
        tracing_enabled: !config.tracing_disabled,
        previous_response_id: state
            .model_responses
            .last()
            .and_then(|r| r.response_id.clone())
            .or_else(|| config.previous_response_id.clone()),
        cancel: config.cancel.clone(),
    }
}

/// Overlay run-level settings on the agent's own: explicit overrides win
/// field by field.
fn merge_settings(agent: &ModelSettings, overrides: Option<&ModelSettings>) -> ModelSettings {
    let Some(overrides) = overrides else {
        return agent.clone();
    };
    ModelSettings {
        temperature: overrides.temperature.or(agent.temperature),
        top_p: overrides.top_p.or(agent.top_p),
        max_tokens: overrides.max_tokens.or(agent.max_tokens),
        tool_choice: overrides
            .tool_choice
            .clone()
            .or_else(|| agent.tool_choice.clone()),
        parallel_tool_calls: overrides.parallel_tool_calls.or(agent.parallel_tool_calls),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_explicit_overrides() {
        let agent = ModelSettings {
            temperature: Some(0.2),
            top_p: Some(0.9),
            max_tokens: Some(512),
            tool_choice: Some(ToolChoice::Required),
            parallel_tool_calls: Some(true),
        };
        let overrides = ModelSettings {
            temperature: Some(0.7),
            ..ModelSettings::default()
        };
        let merged = merge_settings(&agent, Some(&overrides));
        assert_eq!(merged.temperature, Some(0.7));
        assert_eq!(merged.top_p, Some(0.9));
        assert_eq!(merged.tool_choice, Some(ToolChoice::Required));
    }

    #[test]
    fn merge_can_override_a_pinned_choice_back_to_auto() {
        let agent = ModelSettings {
            tool_choice: Some(ToolChoice::Required),
            ..ModelSettings::default()
        };
        let overrides = ModelSettings {
            tool_choice: Some(ToolChoice::Auto),
            ..ModelSettings::default()
        };
        let merged = merge_settings(&agent, Some(&overrides));
        assert_eq!(merged.tool_choice, Some(ToolChoice::Auto));
    }

    #[test]
    fn run_input_conversions() {
        assert!(matches!(RunInput::from("hi"), RunInput::Text(_)));
        assert!(matches!(
            RunInput::from(vec![ModelInputItem::user("hi")]),
            RunInput::Items(_)
        ));
    }

    #[test]
    fn config_defaults() {
        let config = RunConfig::new();
        assert!(config.max_turns.is_none());
        assert!(!config.tracing_disabled);
        assert!(config.hooks.is_none());
    }
}
