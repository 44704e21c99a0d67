//! Agent configuration.
//!
//! An [`Agent`] is an immutable bundle of everything one participant in
//! a run needs: instructions, tools, handoffs, guardrails, output shape
//! and loop-control policy. Agents are built once, wrapped in an `Arc`,
//! and shared across runs; per-run mutable state lives in
//! [`RunState`](crate::state::RunState) instead.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context::RunContext;
use crate::error::Result;
use crate::events::AgentHooks;
use crate::guardrail::{InputGuardrail, OutputGuardrail};
use crate::handoff::Handoff;
use crate::model::ModelSettings;
use crate::tool::{BoxedFunctionTool, ComputerTool, FunctionToolResult, HostedTool, ToolDefinition};

/// System instructions, either fixed text or derived from the run
/// context at request time.
#[derive(Clone)]
pub enum Instructions {
    /// Fixed instruction text.
    Static(String),
    /// Instructions computed per request.
    Dynamic(Arc<dyn Fn(&RunContext, &Agent) -> String + Send + Sync>),
}

impl fmt::Debug for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Shape of the run's final output.
#[derive(Debug, Clone, Default)]
pub enum OutputType {
    /// Plain text; the last message of the final turn is the output.
    #[default]
    Text,
    /// Structured output validated against a JSON schema.
    JsonSchema {
        /// Schema name reported to the model.
        name: String,
        /// The JSON schema itself.
        schema: Value,
    },
}

impl OutputType {
    /// Whether the final output must parse as JSON.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::JsonSchema { .. })
    }
}

/// Decides whether a batch of tool results ends the run, for
/// [`ToolUseBehavior::Custom`].
#[async_trait]
pub trait ToolOutputDecider: Send + Sync {
    /// Inspect the turn's tool results; `Some(text)` makes `text` the
    /// run's final output, `None` sends the results back to the model.
    async fn decide(
        &self,
        context: &RunContext,
        results: &[FunctionToolResult],
    ) -> Result<Option<String>>;
}

/// What happens after an agent's function tools produce output.
#[derive(Clone, Default)]
pub enum ToolUseBehavior {
    /// Feed tool results back to the model and run another turn.
    #[default]
    RunLlmAgain,
    /// The first tool result of the turn becomes the final output.
    StopOnFirstTool,
    /// Stop when any tool in this list ran; its result is the final
    /// output.
    StopAtNames(Vec<String>),
    /// Delegate the decision to a custom decider.
    Custom(Arc<dyn ToolOutputDecider>),
}

impl fmt::Debug for ToolUseBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunLlmAgain => f.write_str("RunLlmAgain"),
            Self::StopOnFirstTool => f.write_str("StopOnFirstTool"),
            Self::StopAtNames(names) => f.debug_tuple("StopAtNames").field(names).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One participant in a run.
#[derive(Clone)]
pub struct Agent {
    name: String,
    instructions: Option<Instructions>,
    model_settings: ModelSettings,
    tools: Vec<BoxedFunctionTool>,
    hosted_tools: Vec<HostedTool>,
    computer: Option<ComputerTool>,
    handoffs: Vec<Handoff>,
    output_type: OutputType,
    tool_use_behavior: ToolUseBehavior,
    reset_tool_choice: bool,
    input_guardrails: Vec<InputGuardrail>,
    output_guardrails: Vec<OutputGuardrail>,
    hooks: Option<Arc<dyn AgentHooks>>,
}

impl Agent {
    /// Creates an agent with the given name and all defaults.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: None,
            model_settings: ModelSettings::default(),
            tools: Vec::new(),
            hosted_tools: Vec::new(),
            computer: None,
            handoffs: Vec::new(),
            output_type: OutputType::default(),
            tool_use_behavior: ToolUseBehavior::default(),
            reset_tool_choice: true,
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            hooks: None,
        }
    }

    /// Sets fixed system instructions.
    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(Instructions::Static(instructions.into()));
        self
    }

    /// Sets system instructions computed from the run context at request
    /// time.
    #[must_use]
    pub fn dynamic_instructions(
        mut self,
        f: impl Fn(&RunContext, &Agent) -> String + Send + Sync + 'static,
    ) -> Self {
        self.instructions = Some(Instructions::Dynamic(Arc::new(f)));
        self
    }

    /// Overrides the default model settings.
    #[must_use]
    pub fn model_settings(mut self, settings: ModelSettings) -> Self {
        self.model_settings = settings;
        self
    }

    /// Adds a function tool.
    #[must_use]
    pub fn tool(mut self, tool: BoxedFunctionTool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Adds several function tools.
    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = BoxedFunctionTool>) -> Self {
        self.tools.extend(tools);
        self
    }

    /// Adds a provider-hosted tool.
    #[must_use]
    pub fn hosted_tool(mut self, tool: HostedTool) -> Self {
        self.hosted_tools.push(tool);
        self
    }

    /// Attaches a computer-use tool.
    #[must_use]
    pub fn computer(mut self, computer: ComputerTool) -> Self {
        self.computer = Some(computer);
        self
    }

    /// Adds a handoff target.
    #[must_use]
    pub fn handoff(mut self, handoff: Handoff) -> Self {
        self.handoffs.push(handoff);
        self
    }

    /// Adds several handoff targets.
    #[must_use]
    pub fn handoffs(mut self, handoffs: impl IntoIterator<Item = Handoff>) -> Self {
        self.handoffs.extend(handoffs);
        self
    }

    /// Requires the final output to match a JSON schema.
    #[must_use]
    pub fn output_schema(mut self, name: impl Into<String>, schema: Value) -> Self {
        self.output_type = OutputType::JsonSchema {
            name: name.into(),
            schema,
        };
        self
    }

    /// Sets the tool-use policy.
    #[must_use]
    pub fn tool_use_behavior(mut self, behavior: ToolUseBehavior) -> Self {
        self.tool_use_behavior = behavior;
        self
    }

    /// Controls whether a forced tool choice is reset to `Auto` after
    /// this agent uses a tool. Defaults to `true`.
    #[must_use]
    pub fn reset_tool_choice(mut self, reset: bool) -> Self {
        self.reset_tool_choice = reset;
        self
    }

    /// Adds an input guardrail. Input guardrails run once, before the
    /// run's first model call.
    #[must_use]
    pub fn input_guardrail(mut self, guardrail: InputGuardrail) -> Self {
        self.input_guardrails.push(guardrail);
        self
    }

    /// Adds an output guardrail, checked against the run's final output.
    #[must_use]
    pub fn output_guardrail(mut self, guardrail: OutputGuardrail) -> Self {
        self.output_guardrails.push(guardrail);
        self
    }

    /// Attaches per-agent lifecycle hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn AgentHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// The agent's name, which identifies it in items, snapshots and
    /// handoff graphs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves the system instructions for one request.
    #[must_use]
    pub fn system_prompt(&self, context: &RunContext) -> Option<String> {
        match &self.instructions {
            Some(Instructions::Static(text)) => Some(text.clone()),
            Some(Instructions::Dynamic(f)) => Some(f(context, self)),
            None => None,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &ModelSettings {
        &self.model_settings
    }

    /// Looks up a function tool by name.
    #[must_use]
    pub fn function_tool(&self, name: &str) -> Option<&BoxedFunctionTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Looks up a hosted tool by name.
    #[must_use]
    pub fn hosted_tool_named(&self, name: &str) -> Option<&HostedTool> {
        self.hosted_tools.iter().find(|t| t.name == name)
    }

    /// Looks up a hosted MCP tool by its server label.
    #[must_use]
    pub fn mcp_tool_for_label(&self, server_label: &str) -> Option<&HostedTool> {
        self.hosted_tools
            .iter()
            .find(|t| t.server_label.as_deref() == Some(server_label))
    }

    #[must_use]
    pub fn computer_tool(&self) -> Option<&ComputerTool> {
        self.computer.as_ref()
    }

    /// Looks up an enabled handoff by its tool name.
    #[must_use]
    pub fn handoff_named(&self, tool_name: &str) -> Option<&Handoff> {
        self.enabled_handoffs().find(|h| h.name() == tool_name)
    }

    /// All handoffs, including disabled ones. Disabled handoffs still
    /// count as graph edges when rebuilding an agent map from a
    /// snapshot.
    #[must_use]
    pub fn all_handoffs(&self) -> &[Handoff] {
        &self.handoffs
    }

    /// Enabled handoffs only, in declaration order.
    pub fn enabled_handoffs(&self) -> impl Iterator<Item = &Handoff> {
        self.handoffs.iter().filter(|h| h.is_enabled())
    }

    /// Function and enabled handoff tool definitions for a model
    /// request. Hosted and computer tools are advertised separately by
    /// the provider adapter.
    #[must_use]
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Enabled handoff tool definitions for a model request.
    #[must_use]
    pub fn handoff_definitions(&self) -> Vec<ToolDefinition> {
        self.enabled_handoffs().map(Handoff::definition).collect()
    }

    #[must_use]
    pub fn output_type(&self) -> &OutputType {
        &self.output_type
    }

    #[must_use]
    pub fn behavior(&self) -> &ToolUseBehavior {
        &self.tool_use_behavior
    }

    #[must_use]
    pub fn resets_tool_choice(&self) -> bool {
        self.reset_tool_choice
    }

    #[must_use]
    pub fn input_guardrails(&self) -> &[InputGuardrail] {
        &self.input_guardrails
    }

    #[must_use]
    pub fn output_guardrails(&self) -> &[OutputGuardrail] {
        &self.output_guardrails
    }

    pub(crate) fn hooks(&self) -> Option<&dyn AgentHooks> {
        self.hooks.as_deref()
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("hosted_tools", &self.hosted_tools)
            .field("has_computer", &self.computer.is_some())
            .field("handoffs", &self.handoffs.iter().map(Handoff::name).collect::<Vec<_>>())
            .field("output_type", &self.output_type)
            .field("tool_use_behavior", &self.tool_use_behavior)
            .field("reset_tool_choice", &self.reset_tool_choice)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::handoff::handoff;
    use async_trait::async_trait;

    struct Adder;

    #[async_trait]
    impl crate::tool::FunctionTool for Adder {
        fn name(&self) -> &str {
            "add"
        }

        fn description(&self) -> String {
            "Add two numbers".to_owned()
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn invoke(&self, _context: &RunContext, _arguments: &str) -> Result<Value, ToolError> {
            Ok(serde_json::json!(3))
        }
    }

    #[test]
    fn lookup_by_name() {
        let agent = Agent::new("Assistant").tool(Arc::new(Adder));
        assert!(agent.function_tool("add").is_some());
        assert!(agent.function_tool("sub").is_none());
    }

    #[test]
    fn disabled_handoffs_are_hidden_from_the_model() {
        let billing = Arc::new(Agent::new("Billing"));
        let refunds = Arc::new(Agent::new("Refunds"));
        let agent = Agent::new("Triage")
            .handoff(handoff(billing))
            .handoff(handoff(refunds).enabled(false));

        assert_eq!(agent.handoff_definitions().len(), 1);
        assert_eq!(agent.all_handoffs().len(), 2);
        assert!(agent.handoff_named("transfer_to_refunds").is_none());
        assert!(agent.handoff_named("transfer_to_billing").is_some());
    }

    #[test]
    fn dynamic_instructions_see_the_context() {
        let agent = Agent::new("Greeter")
            .dynamic_instructions(|_ctx, agent| format!("You are {}.", agent.name()));
        let ctx = RunContext::new();
        assert_eq!(agent.system_prompt(&ctx).as_deref(), Some("You are Greeter."));
    }

    #[test]
    fn defaults() {
        let agent = Agent::new("A");
        assert!(agent.resets_tool_choice());
        assert!(!agent.output_type().is_structured());
        assert!(matches!(agent.behavior(), ToolUseBehavior::RunLlmAgain));
        assert!(agent.system_prompt(&RunContext::new()).is_none());
    }
}
