//! Core types and error definitions for the Attestor orchestration core.
//!
//! This crate provides the foundational types shared by the agent, registry,
//! and workflow crates.
//!
//! # Main types
//!
//! - [`AttestorError`] — Unified error enum for every orchestration failure.
//! - [`AttestorResult`] — Convenience alias for `Result<T, AttestorError>`.
//! - [`ErrorKind`] — Coarse error classification for callers.
//! - [`ExecutionContext`] — Project, session, and shared workflow state passed to agents.
//! - [`HealthCheckable`] / [`HealthReport`] — Uniform health reporting.

/// Execution context handed to agents.
pub mod context;
/// Error types.
pub mod error;
/// Health reporting.
pub mod health;

pub use context::{ConversationTurn, ExecutionContext, Role};
pub use error::{AttestorError, AttestorResult, ErrorKind, AGENT_EXECUTION, TASK_EXECUTION};
pub use health::{HealthCheckable, HealthReport, HealthStatus};
