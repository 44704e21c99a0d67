//! Token and request usage tracking for a run.
//!
//! Every model invocation reports its token counters; the run accumulates
//! them into a single [`Usage`] record that survives handoffs and
//! pause/resume cycles.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Cumulative token and request counters for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of model invocations made so far.
    #[serde(default)]
    pub requests: u32,

    /// Number of tokens in the input/prompt.
    #[serde(default, alias = "prompt_tokens")]
    pub input_tokens: u32,

    /// Number of tokens in the output/completion.
    #[serde(default, alias = "completion_tokens")]
    pub output_tokens: u32,

    /// Total tokens used (input + output).
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Create a usage record for a single request.
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            requests: 1,
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Create an empty usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            requests: 0,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        }
    }

    /// Check if no usage has been recorded.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.requests == 0 && self.total_tokens == 0
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            requests: self.requests + rhs.requests,
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
