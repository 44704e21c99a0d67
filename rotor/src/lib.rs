//! Rotor - a turn-loop runtime for tool-using AI agents
//!
//! This crate drives agents through a model/tool conversation loop:
//! classify each model response, execute the tools and handoffs it
//! requests, enforce guardrails, and either finish with a final output
//! or pause on pending approvals. A paused run serializes to JSON and
//! resumes later, on another process if need be.

pub mod agent;
pub mod approvals;
pub mod context;
pub mod error;
pub mod events;
pub mod executor;
pub mod guardrail;
pub mod handoff;
pub mod items;
pub mod model;
pub mod prelude;
pub mod processor;
pub mod runner;
pub mod state;
pub mod tool;
pub mod tracker;
pub mod usage;

pub use error::{Error, Result, ToolError};
pub use runner::{RunConfig, RunResult, Runner};
pub use state::RunState;
