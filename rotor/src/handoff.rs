//! Delegation of a run from one agent to another.
//!
//! A [`Handoff`] exposes a target agent to the model as an ordinary
//! function tool. When the model calls it, the runner swaps the active
//! agent and continues the loop with the target, optionally passing the
//! conversation history through an input filter first.

use std::fmt;
use std::sync::Arc;

use serde_json::json;

use crate::agent::Agent;
use crate::context::RunContext;
use crate::error::Result;
use crate::items::{AgentInput, RunItem};
use crate::tool::ToolDefinition;

/// Rewrites the conversation handed to the target agent.
pub type HandoffInputFilter = Arc<dyn Fn(HandoffInputData) -> HandoffInputData + Send + Sync>;

/// Resolves the target agent at invocation time, given the raw call
/// arguments. Lets one handoff route to different agents.
pub type HandoffResolver = Arc<dyn Fn(&RunContext, &str) -> Result<Arc<Agent>> + Send + Sync>;

/// The conversation as seen by an input filter.
///
/// `input_history` is the original run input, `pre_handoff_items` are
/// the items generated on earlier turns, and `new_items` are the items
/// generated on the turn that triggered the handoff.
#[derive(Debug, Clone)]
pub struct HandoffInputData {
    /// The input the run started with.
    pub input_history: AgentInput,
    /// Items generated before the current turn.
    pub pre_handoff_items: Vec<RunItem>,
    /// Items generated on the current turn, including the handoff call
    /// and its output.
    pub new_items: Vec<RunItem>,
}

/// A delegation target, presented to the model as a function tool.
#[derive(Clone)]
pub struct Handoff {
    tool_name: String,
    tool_description: String,
    agent: Arc<Agent>,
    resolver: Option<HandoffResolver>,
    input_filter: Option<HandoffInputFilter>,
    enabled: bool,
}

impl Handoff {
    /// Creates a handoff to `agent` with the default tool name
    /// `transfer_to_<agent_name>`.
    pub fn new(agent: Arc<Agent>) -> Self {
        let slug = slugify(agent.name());
        Self {
            tool_name: format!("transfer_to_{slug}"),
            tool_description: format!(
                "Handoff to the {} agent to handle the request.",
                agent.name()
            ),
            agent,
            resolver: None,
            input_filter: None,
            enabled: true,
        }
    }

    /// Overrides the tool name the model sees.
    #[must_use]
    pub fn tool_name(mut self, name: impl Into<String>) -> Self {
        self.tool_name = name.into();
        self
    }

    /// Overrides the tool description the model sees.
    #[must_use]
    pub fn tool_description(mut self, description: impl Into<String>) -> Self {
        self.tool_description = description.into();
        self
    }

    /// Installs a resolver that picks the target agent at call time.
    #[must_use]
    pub fn resolver(mut self, resolver: HandoffResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Installs an input filter applied before the target agent runs.
    #[must_use]
    pub fn input_filter(mut self, filter: HandoffInputFilter) -> Self {
        self.input_filter = Some(filter);
        self
    }

    /// Enables or disables this handoff. Disabled handoffs are not
    /// advertised to the model.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The name of the function tool backing this handoff.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.tool_name
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The statically configured target agent.
    #[must_use]
    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// The input filter, if one is installed.
    #[must_use]
    pub fn filter(&self) -> Option<&HandoffInputFilter> {
        self.input_filter.as_ref()
    }

    /// Resolves the agent that should take over, consulting the
    /// resolver if one is installed.
    pub fn resolve(&self, context: &RunContext, arguments: &str) -> Result<Arc<Agent>> {
        match &self.resolver {
            Some(resolver) => resolver(context, arguments),
            None => Ok(Arc::clone(&self.agent)),
        }
    }

    /// The function tool definition advertised to the model.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.tool_name.clone(),
            description: self.tool_description.clone(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false,
                "required": [],
            }),
        }
    }
}

impl fmt::Debug for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("tool_name", &self.tool_name)
            .field("agent", &self.agent.name())
            .field("has_resolver", &self.resolver.is_some())
            .field("has_input_filter", &self.input_filter.is_some())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Shorthand for [`Handoff::new`].
pub fn handoff(agent: Arc<Agent>) -> Handoff {
    Handoff::new(agent)
}

/// Input filter that strips all tool calls and tool outputs from the
/// conversation handed to the target agent.
pub fn remove_all_tools(mut data: HandoffInputData) -> HandoffInputData {
    data.pre_handoff_items.retain(keep_non_tool);
    data.new_items.retain(keep_non_tool);
    if let AgentInput::Items(items) = &mut data.input_history {
        items.retain(|item| {
            !matches!(
                item,
                crate::model::ModelInputItem::FunctionCall(_)
                    | crate::model::ModelInputItem::FunctionOutput { .. }
                    | crate::model::ModelInputItem::ComputerOutput { .. }
                    | crate::model::ModelInputItem::McpApprovalResponse { .. }
            )
        });
    }
    data
}

fn keep_non_tool(item: &RunItem) -> bool {
    !matches!(
        item,
        RunItem::ToolCall { .. }
            | RunItem::ToolOutput { .. }
            | RunItem::HandoffCall { .. }
            | RunItem::HandoffOutput { .. }
            | RunItem::ApprovalRequest { .. }
    )
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
