//! Lifecycle hooks and streamed run events.
//!
//! Notifications are emitted on two surfaces: a run-level [`RunHooks`]
//! implementation supplied via [`RunConfig`](crate::runner::RunConfig),
//! and the active agent's own [`AgentHooks`]. All methods default to
//! no-ops, so implementors only override what they observe.

use async_trait::async_trait;

use crate::agent::Agent;
use crate::context::RunContext;
use crate::items::RunItem;
use crate::model::StreamEvent;
use crate::runner::RunResult;

/// Run-level lifecycle observer.
#[async_trait]
pub trait RunHooks: Send + Sync {
    /// An agent is about to take its first turn (or its first turn after
    /// a handoff).
    #[allow(unused_variables)]
    async fn on_agent_start(&self, context: &RunContext, agent: &Agent) {}

    /// An agent produced the run's final output.
    #[allow(unused_variables)]
    async fn on_agent_end(&self, context: &RunContext, agent: &Agent, output: &str) {}

    /// Control was delegated from one agent to another.
    #[allow(unused_variables)]
    async fn on_handoff(&self, context: &RunContext, from: &Agent, to: &Agent) {}

    /// A tool is about to execute.
    #[allow(unused_variables)]
    async fn on_tool_start(&self, context: &RunContext, agent: &Agent, tool_name: &str) {}

    /// A tool finished executing (successfully or not).
    #[allow(unused_variables)]
    async fn on_tool_end(&self, context: &RunContext, agent: &Agent, tool_name: &str, result: &str) {
    }
}

/// Per-agent lifecycle observer, configured on the [`Agent`] itself.
#[async_trait]
pub trait AgentHooks: Send + Sync {
    /// This agent is about to take its first turn in the run.
    #[allow(unused_variables)]
    async fn on_start(&self, context: &RunContext, agent: &Agent) {}

    /// This agent produced the run's final output.
    #[allow(unused_variables)]
    async fn on_end(&self, context: &RunContext, agent: &Agent, output: &str) {}

    /// This agent received control via a handoff.
    #[allow(unused_variables)]
    async fn on_handoff(&self, context: &RunContext, agent: &Agent, source: &Agent) {}

    /// One of this agent's tools is about to execute.
    #[allow(unused_variables)]
    async fn on_tool_start(&self, context: &RunContext, agent: &Agent, tool_name: &str) {}

    /// One of this agent's tools finished executing.
    #[allow(unused_variables)]
    async fn on_tool_end(&self, context: &RunContext, agent: &Agent, tool_name: &str, result: &str) {
    }
}

/// No-op run hooks, used when the caller supplies none.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRunHooks;

#[async_trait]
impl RunHooks for NoopRunHooks {}

/// Dispatches one notification to both the run-level hooks and the
/// active agent's own hooks.
pub(crate) struct HookSet<'a> {
    run: &'a dyn RunHooks,
}

impl<'a> HookSet<'a> {
    pub(crate) fn new(run: &'a dyn RunHooks) -> Self {
        Self { run }
    }

    pub(crate) async fn agent_start(&self, context: &RunContext, agent: &Agent) {
        self.run.on_agent_start(context, agent).await;
        if let Some(hooks) = agent.hooks() {
            hooks.on_start(context, agent).await;
        }
    }

    pub(crate) async fn agent_end(&self, context: &RunContext, agent: &Agent, output: &str) {
        self.run.on_agent_end(context, agent, output).await;
        if let Some(hooks) = agent.hooks() {
            hooks.on_end(context, agent, output).await;
        }
    }

    pub(crate) async fn handoff(&self, context: &RunContext, from: &Agent, to: &Agent) {
        self.run.on_handoff(context, from, to).await;
        if let Some(hooks) = to.hooks() {
            hooks.on_handoff(context, to, from).await;
        }
    }

    pub(crate) async fn tool_start(&self, context: &RunContext, agent: &Agent, tool_name: &str) {
        self.run.on_tool_start(context, agent, tool_name).await;
        if let Some(hooks) = agent.hooks() {
            hooks.on_tool_start(context, agent, tool_name).await;
        }
    }

    pub(crate) async fn tool_end(
        &self,
        context: &RunContext,
        agent: &Agent,
        tool_name: &str,
        result: &str,
    ) {
        self.run.on_tool_end(context, agent, tool_name, result).await;
        if let Some(hooks) = agent.hooks() {
            hooks.on_tool_end(context, agent, tool_name, result).await;
        }
    }
}

/// Events yielded by the streaming run variant.
///
/// The stream is single-pass: once consumed it cannot be replayed, only
/// re-run.
#[derive(Debug)]
pub enum RunEvent {
    /// Raw model stream passthrough.
    RawModel(StreamEvent),
    /// One item was appended to the item log.
    ItemCreated(RunItem),
    /// The active agent changed (run start or handoff).
    AgentUpdated {
        /// Name of the now-active agent.
        agent: String,
    },
    /// The run finished; always the last event of a successful stream.
    Completed {
        /// The final result, including the run state.
        result: Box<RunResult>,
    },
}
