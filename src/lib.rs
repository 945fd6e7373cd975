//! # Spiral Core
//!
//! Spiral Core is the coordination engine for an AI agent orchestration
//! system: it decomposes product requirements into a hierarchy of issues
//! and atomic tasks, schedules those tasks onto a pool of worker agents,
//! enforces task-category-aware quality gates on their output, and
//! intervenes when agents fail in recognisable ways.
//!
//! ## Architecture
//!
//! - **DependencyResolver**: builds and validates the task DAG.
//! - **TaskScheduler**: assigns tasks to agent slots, predicts completion.
//! - **TacticalPatternMatcher**: maps agent error text to recoverable
//!   intervention strategies.
//! - **QualityGateRunner**: runs the applicable gates per task category.
//! - **SupervisorLoop**: drives the task lifecycle end to end.
//! - **BlockerStore**: persists blocking questions and their answers.
//! - **AgentRegistry**: loads agent definitions and hands out worker agents.
//! - **EvidenceVerifier**: gates completion on empirical test evidence.
//! - **LanguageProbe / TestRunner**: detect project language and run tests.
//!
//! The LLM adapter, HTTP surface, and on-disk agent-definition syntax are
//! consumed through narrow interfaces (see [`llm_adapter`] and
//! [`persistence`]) rather than implemented here.

/// Worker-agent definitions and the registry that loads and hands them out.
pub mod agent_registry;
/// Synchronous/asynchronous blocker persistence and resume machinery.
pub mod blocker_store;
/// Task classification for quality-gate applicability.
pub mod classifier;
/// System configuration, loaded from the environment.
pub mod config;
/// DAG-based task dependency resolution.
pub mod dependency_resolver;
/// Error types and handling.
pub mod error;
/// Gates task completion on empirical test evidence.
pub mod evidence;
/// Detects a project's language and test framework.
pub mod language_probe;
/// The narrow LLM-adapter contract consumed by the supervisor loop.
pub mod llm_adapter;
/// Core data models: Project, Issue, Task, Blocker, and friends.
pub mod models;
/// Implementation-free persistence contract plus an in-memory reference.
pub mod persistence;
/// Task-category-aware quality-gate pipeline.
pub mod quality_gates;
/// Wave-by-wave greedy list scheduling over a built dependency graph.
pub mod scheduler;
/// The supervisor/worker execution loop with tactical intervention.
pub mod supervisor;
/// Maps raw agent error text to recoverable intervention strategies.
pub mod tactical_patterns;
/// Runs a project's test suite and parses its output.
pub mod test_runner;

#[cfg(test)]
mod tests;

pub use error::{Result, SpiralError};
