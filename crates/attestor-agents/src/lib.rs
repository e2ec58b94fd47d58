//! Agent contract and built-in compliance agents.
//!
//! # Main types
//!
//! - [`Agent`] — Trait every worker implements (`execute` + `health_check`).
//! - [`AgentMetadata`] — Identity, kind, capabilities, and tags of an agent.
//! - [`AgentKind`] — The closed set of agent templates.
//! - [`CapabilityName`] — The closed capability vocabulary used for discovery.
//! - [`AgentStatus`] — Lifecycle state tracked by the registry.

/// Agent trait, metadata, and lifecycle status.
pub mod agent;
/// Rule-based classification, ideation, grading, and improvement agents.
pub mod builtin;
/// Capability vocabulary.
pub mod capability;

pub use agent::{Agent, AgentId, AgentKind, AgentMetadata, AgentStatus};
pub use capability::{Capability, CapabilityName};
