//! Tool contracts: function tools, hosted tools, and computer use.
//!
//! Tools are opaque, already-validated collaborators. The runtime only
//! needs their wire definition (to serialize into a model request), an
//! invocation entry point, and an approval predicate. How a tool parses
//! its arguments or produces its result is its own business.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RunContext;
use crate::error::ToolError;

/// Definition of a function tool as serialized into a model request.
///
/// Serializes to the function-calling wire format:
/// `{"type": "function", "function": {"name", "description", "parameters"}}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolDefinition {
    /// Name of the tool (snake_case by convention).
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON schema for the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

impl Serialize for ToolDefinition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        let mut function = serde_json::Map::new();
        function.insert("name".to_owned(), Value::String(self.name.clone()));
        function.insert(
            "description".to_owned(),
            Value::String(self.description.clone()),
        );
        function.insert("parameters".to_owned(), self.parameters.clone());

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "function")?;
        map.serialize_entry("function", &function)?;
        map.end()
    }
}

/// Object-safe contract for a function tool.
///
/// `invoke` receives the raw argument text exactly as the model produced
/// it; parsing and validation happen inside the tool. A failure is caught
/// per call by the turn executor and reported as that call's output text;
/// it never aborts sibling calls.
#[async_trait]
pub trait FunctionTool: Send + Sync {
    /// Name of the tool, matched against model function calls.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> String;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Whether this specific call needs an approval decision first.
    ///
    /// `parsed_args` is the argument text parsed as JSON when possible
    /// (`Value::Null` otherwise); `call_id` identifies the call in the
    /// approval ledger.
    #[allow(unused_variables)]
    async fn needs_approval(&self, context: &RunContext, parsed_args: &Value, call_id: &str) -> bool {
        false
    }

    /// Execute the tool with the raw argument text.
    async fn invoke(&self, context: &RunContext, arguments: &str) -> Result<Value, ToolError>;

    /// Wire definition for the model request.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            self.name().to_owned(),
            self.description(),
            self.parameters_schema(),
        )
    }
}

/// Shared handle to a function tool.
pub type BoxedFunctionTool = Arc<dyn FunctionTool>;

/// Outcome of one executed function tool call, as handed to a custom
/// tool-use decider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionToolResult {
    /// Name of the tool that ran.
    pub tool_name: String,
    /// The call id the model assigned.
    pub call_id: String,
    /// The stringified tool output.
    pub output: String,
}

/// Approval decision produced by a hosted tool's synchronous callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostedApproval {
    /// Approve the request immediately.
    Approve,
    /// Reject the request immediately.
    Reject,
}

/// Synchronous approval callback for a hosted tool.
pub type HostedApprovalCallback = Arc<dyn Fn(&RunContext) -> HostedApproval + Send + Sync>;

/// A provider-hosted tool (web search, file search, MCP, ...).
///
/// Hosted tools execute on the provider side; the runtime only records
/// their calls and, for MCP tools, mediates approval requests. When
/// `on_approval` is set, approval requests are answered inline instead of
/// interrupting the run.
#[derive(Clone)]
pub struct HostedTool {
    /// Tool name as it appears in model output.
    pub name: String,
    /// MCP server label, present only for MCP tools.
    pub server_label: Option<String>,
    /// Optional synchronous approval callback.
    pub on_approval: Option<HostedApprovalCallback>,
}

impl HostedTool {
    /// A plain hosted tool (no MCP mediation).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_label: None,
            on_approval: None,
        }
    }

    /// A hosted MCP tool identified by its server label.
    #[must_use]
    pub fn mcp(name: impl Into<String>, server_label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_label: Some(server_label.into()),
            on_approval: None,
        }
    }

    /// Attach a synchronous approval callback.
    #[must_use]
    pub fn with_approval_callback(
        mut self,
        callback: impl Fn(&RunContext) -> HostedApproval + Send + Sync + 'static,
    ) -> Self {
        self.on_approval = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for HostedTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostedTool")
            .field("name", &self.name)
            .field("server_label", &self.server_label)
            .field("has_approval_callback", &self.on_approval.is_some())
            .finish()
    }
}

/// Object-safe contract for a computer-use backend.
///
/// The runtime forwards each computer action produced by the model and
/// records the returned observation (typically a screenshot reference) as
/// the action's output.
#[async_trait]
pub trait Computer: Send + Sync {
    /// Perform one action and return its observation text.
    async fn perform(
        &self,
        context: &RunContext,
        action: &crate::model::ComputerAction,
    ) -> Result<String, ToolError>;
}

/// A configured computer-use tool.
#[derive(Clone)]
pub struct ComputerTool {
    /// Name under which computer calls are recorded.
    pub name: String,
    /// The backend that performs actions.
    pub computer: Arc<dyn Computer>,
}

impl ComputerTool {
    /// Create a computer tool around a backend.
    #[must_use]
    pub fn new(computer: Arc<dyn Computer>) -> Self {
        Self {
            name: "computer_use".to_owned(),
            computer,
        }
    }
}

impl fmt::Debug for ComputerTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputerTool")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Textualize a tool's JSON result for the item log and the model.
///
/// Primitives keep their literal form (`null` stringifies to `"null"`),
/// strings pass through unquoted, and compound values serialize to JSON,
/// falling back to a placeholder if serialization fails.
#[must_use]
pub fn stringify_tool_output(value: &Value) -> String {
    match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => {
            serde_json::to_string(other).unwrap_or_else(|_| "[unserializable object]".to_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl FunctionTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> String {
            "Echo the input".to_owned()
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn invoke(&self, _context: &RunContext, arguments: &str) -> Result<Value, ToolError> {
            Ok(Value::String(arguments.to_owned()))
        }
    }

    #[test]
    fn definition_serializes_to_function_wire_format() {
        let def = Echo.definition();
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "echo");
        assert!(json["function"]["parameters"].is_object());
    }

    #[tokio::test]
    async fn needs_approval_defaults_to_false() {
        let ctx = RunContext::new();
        assert!(!Echo.needs_approval(&ctx, &Value::Null, "call_1").await);
    }

    #[test]
    fn stringify_primitives() {
        assert_eq!(stringify_tool_output(&Value::Null), "null");
        assert_eq!(stringify_tool_output(&serde_json::json!(true)), "true");
        assert_eq!(stringify_tool_output(&serde_json::json!(42)), "42");
        assert_eq!(stringify_tool_output(&serde_json::json!("hi")), "hi");
    }

    #[test]
    fn stringify_compound_values() {
        assert_eq!(
            stringify_tool_output(&serde_json::json!({"a": 1})),
            r#"{"a":1}"#
        );
        assert_eq!(stringify_tool_output(&serde_json::json!([1, 2])), "[1,2]");
    }

    #[test]
    fn hosted_tool_builders() {
        let plain = HostedTool::new("web_search");
        assert!(plain.server_label.is_none());

        let mcp = HostedTool::mcp("query_db", "db-server")
            .with_approval_callback(|_ctx| HostedApproval::Approve);
        assert_eq!(mcp.server_label.as_deref(), Some("db-server"));
        assert!(mcp.on_approval.is_some());
    }
}
