//! Guardrails: admission and exit policy checks for a run.
//!
//! Input guardrails run exactly once, at the first turn; output guardrails
//! run exactly once, when a final output is first produced. Each returns a
//! [`GuardrailOutput`] with a tripwire flag: a tripped wire aborts the run
//! through the typed tripwire errors, while a check that *fails to
//! execute* surfaces as a distinct
//! [`GuardrailExecution`](crate::error::Error::GuardrailExecution) error
//! so callers can tell policy from plumbing.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::model::{ModelInputItem, ModelResponse};

/// The output of a guardrail check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailOutput {
    /// Whether the tripwire was triggered. If `true`, the run aborts.
    pub tripwire_triggered: bool,

    /// Optional structured information about the check, included in the
    /// resulting error for observability.
    #[serde(default)]
    pub output_info: Value,
}

impl GuardrailOutput {
    /// A passing output (tripwire not triggered).
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            tripwire_triggered: false,
            output_info: Value::Null,
        }
    }

    /// A failing output (tripwire triggered), with a reason.
    #[must_use]
    pub fn tripwire(info: impl Into<Value>) -> Self {
        Self {
            tripwire_triggered: true,
            output_info: info.into(),
        }
    }

    /// A passing output carrying diagnostic information.
    #[must_use]
    pub fn pass_with_info(info: impl Into<Value>) -> Self {
        Self {
            tripwire_triggered: false,
            output_info: info.into(),
        }
    }

    /// Returns `true` if the tripwire was triggered.
    #[must_use]
    pub const fn is_triggered(&self) -> bool {
        self.tripwire_triggered
    }
}

/// The parsed final output handed to output guardrails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRunOutput {
    /// The final output text.
    pub text: String,
    /// The text parsed against the agent's declared output type
    /// (`Value::String` for free-text agents).
    pub parsed: Value,
}

/// Check logic for an input guardrail.
#[async_trait]
pub trait InputGuardrailCheck: Send + Sync {
    /// Check the run's input history before the first model call.
    async fn check(
        &self,
        context: &RunContext,
        agent_name: &str,
        input: &[ModelInputItem],
    ) -> Result<GuardrailOutput>;
}

/// Check logic for an output guardrail.
#[async_trait]
pub trait OutputGuardrailCheck: Send + Sync {
    /// Check the run's final output. `last_response` is the model response
    /// that produced it, when one exists.
    async fn check(
        &self,
        context: &RunContext,
        agent_name: &str,
        output: &FinalRunOutput,
        last_response: Option<&ModelResponse>,
    ) -> Result<GuardrailOutput>;
}

/// An input guardrail: named check logic run at the first turn.
#[derive(Clone)]
pub struct InputGuardrail {
    name: String,
    check: Arc<dyn InputGuardrailCheck>,
}

impl InputGuardrail {
    /// Create an input guardrail with the given name and check logic.
    #[must_use]
    pub fn new(name: impl Into<String>, check: impl InputGuardrailCheck + 'static) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// The guardrail's name, used in results and error messages.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for InputGuardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputGuardrail")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// An output guardrail: named check logic run at final output.
#[derive(Clone)]
pub struct OutputGuardrail {
    name: String,
    check: Arc<dyn OutputGuardrailCheck>,
}

impl OutputGuardrail {
    /// Create an output guardrail with the given name and check logic.
    #[must_use]
    pub fn new(name: impl Into<String>, check: impl OutputGuardrailCheck + 'static) -> Self {
        Self {
            name: name.into(),
            check: Arc::new(check),
        }
    }

    /// The guardrail's name, used in results and error messages.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for OutputGuardrail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputGuardrail")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Result of one input guardrail execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputGuardrailResult {
    /// Name of the guardrail that ran.
    pub guardrail_name: String,
    /// Name of the agent active when it ran.
    pub agent_name: String,
    /// The check's output.
    pub output: GuardrailOutput,
}

/// Result of one output guardrail execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputGuardrailResult {
    /// Name of the guardrail that ran.
    pub guardrail_name: String,
    /// Name of the agent active when it ran.
    pub agent_name: String,
    /// The check's output.
    pub output: GuardrailOutput,
}

/// Run all input guardrails concurrently.
///
/// The first tripped wire aborts with
/// [`Error::InputGuardrailTripwire`]; an execution failure aborts with
/// [`Error::GuardrailExecution`]. Results join in guardrail order.
pub(crate) async fn run_input_guardrails(
    guardrails: &[InputGuardrail],
    context: &RunContext,
    agent_name: &str,
    input: &[ModelInputItem],
) -> Result<Vec<InputGuardrailResult>> {
    if guardrails.is_empty() {
        return Ok(Vec::new());
    }

    let futures: Vec<_> = guardrails
        .iter()
        .map(|g| g.check.check(context, agent_name, input))
        .collect();
    let outputs = join_all(futures).await;

    let mut results = Vec::with_capacity(outputs.len());
    for (guardrail, output) in guardrails.iter().zip(outputs) {
        let output = output.map_err(|e| Error::GuardrailExecution {
            guardrail: guardrail.name.clone(),
            message: e.to_string(),
            state: None,
        })?;
        let result = InputGuardrailResult {
            guardrail_name: guardrail.name.clone(),
            agent_name: agent_name.to_owned(),
            output,
        };
        if result.output.is_triggered() {
            return Err(Error::InputGuardrailTripwire {
                result,
                state: None,
            });
        }
        results.push(result);
    }

    Ok(results)
}

/// Run all output guardrails concurrently. Same error contract as
/// [`run_input_guardrails`].
pub(crate) async fn run_output_guardrails(
    guardrails: &[OutputGuardrail],
    context: &RunContext,
    agent_name: &str,
    output: &FinalRunOutput,
    last_response: Option<&ModelResponse>,
) -> Result<Vec<OutputGuardrailResult>> {
    if guardrails.is_empty() {
        return Ok(Vec::new());
    }

    let futures: Vec<_> = guardrails
        .iter()
        .map(|g| g.check.check(context, agent_name, output, last_response))
        .collect();
    let outputs = join_all(futures).await;

    let mut results = Vec::with_capacity(outputs.len());
    for (guardrail, checked) in guardrails.iter().zip(outputs) {
        let checked = checked.map_err(|e| Error::GuardrailExecution {
            guardrail: guardrail.name.clone(),
            message: e.to_string(),
            state: None,
        })?;
        let result = OutputGuardrailResult {
            guardrail_name: guardrail.name.clone(),
            agent_name: agent_name.to_owned(),
            output: checked,
        };
        if result.output.is_triggered() {
            return Err(Error::OutputGuardrailTripwire {
                result,
                state: None,
            });
        }
        results.push(result);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BlockWord(&'static str);

    #[async_trait]
    impl InputGuardrailCheck for BlockWord {
        async fn check(
            &self,
            _context: &RunContext,
            _agent_name: &str,
            input: &[ModelInputItem],
        ) -> Result<GuardrailOutput> {
            let hit = input.iter().any(|item| {
                matches!(item, ModelInputItem::Message { content, .. } if content.contains(self.0))
            });
            if hit {
                Ok(GuardrailOutput::tripwire(format!("contains '{}'", self.0)))
            } else {
                Ok(GuardrailOutput::pass())
            }
        }
    }

    struct Failing;

    #[async_trait]
    impl InputGuardrailCheck for Failing {
        async fn check(
            &self,
            _context: &RunContext,
            _agent_name: &str,
            _input: &[ModelInputItem],
        ) -> Result<GuardrailOutput> {
            Err(Error::user("guardrail backend unreachable"))
        }
    }

    struct LengthCap(usize);

    #[async_trait]
    impl OutputGuardrailCheck for LengthCap {
        async fn check(
            &self,
            _context: &RunContext,
            _agent_name: &str,
            output: &FinalRunOutput,
            _last_response: Option<&ModelResponse>,
        ) -> Result<GuardrailOutput> {
            if output.text.len() > self.0 {
                Ok(GuardrailOutput::tripwire("too long"))
            } else {
                Ok(GuardrailOutput::pass())
            }
        }
    }

    #[tokio::test]
    async fn passing_input_guardrails_return_results() {
        let guardrails = vec![InputGuardrail::new("block-secret", BlockWord("secret"))];
        let ctx = RunContext::new();
        let input = vec![ModelInputItem::user("hello")];
        let results = run_input_guardrails(&guardrails, &ctx, "triage", &input)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].guardrail_name, "block-secret");
        assert!(!results[0].output.is_triggered());
    }

    #[tokio::test]
    async fn tripwire_aborts_with_triggering_result() {
        let guardrails = vec![InputGuardrail::new("block-secret", BlockWord("secret"))];
        let ctx = RunContext::new();
        let input = vec![ModelInputItem::user("tell me the secret")];
        let err = run_input_guardrails(&guardrails, &ctx, "triage", &input)
            .await
            .unwrap_err();
        match err {
            Error::InputGuardrailTripwire { result, .. } => {
                assert_eq!(result.guardrail_name, "block-secret");
                assert!(result.output.is_triggered());
            }
            other => panic!("expected tripwire error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn execution_failure_is_distinct_from_tripwire() {
        let guardrails = vec![InputGuardrail::new("flaky", Failing)];
        let ctx = RunContext::new();
        let err = run_input_guardrails(&guardrails, &ctx, "triage", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::GuardrailExecution { .. }));
    }

    #[tokio::test]
    async fn output_guardrail_checks_final_output() {
        let guardrails = vec![OutputGuardrail::new("length-cap", LengthCap(5))];
        let ctx = RunContext::new();
        let output = FinalRunOutput {
            text: "way too long".to_owned(),
            parsed: Value::String("way too long".to_owned()),
        };
        let err = run_output_guardrails(&guardrails, &ctx, "triage", &output, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OutputGuardrailTripwire { .. }));
    }

    #[tokio::test]
    async fn no_guardrails_is_a_no_op() {
        let ctx = RunContext::new();
        let results = run_input_guardrails(&[], &ctx, "triage", &[]).await.unwrap();
        assert!(results.is_empty());
    }
}
