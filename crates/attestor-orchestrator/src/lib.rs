//! Agent registry, dependency-aware task queue, and workflow engine.
//!
//! Agents are created from templates by the [`AgentFactory`], owned by the
//! [`AgentRegistry`] (which also runs queued tasks against them), and
//! composed into multi-step workflows by the [`WorkflowOrchestrator`].
//! [`OrchestrationContext`] wires the three together.
//!
//! # Main types
//!
//! - [`OrchestrationContext`] — Owns one registry, factory, and orchestrator with an `init`/`shutdown` lifecycle.
//! - [`AgentRegistry`] — Agent pool: registration, discovery, direct invocation, task queue, health.
//! - [`AgentFactory`] — Builds agents from templates and assembles project teams.
//! - [`WorkflowOrchestrator`] — Runs sequential, parallel, and hybrid workflows with cancel and recovery.
//! - [`TaskQueue`] — Priority queue with dependency gating and cycle detection.
//! - [`AgentMonitor`] — Per-agent status and invocation metrics.
//! - [`OrchestratorConfig`] — TOML-loadable configuration for all of the above.

/// Configuration sections and retry policy.
pub mod config;
/// The orchestration context.
pub mod context;
/// Workflow execution engine.
pub mod engine;
/// Workflow execution records, results, and aggregate metrics.
pub mod execution;
/// Template-based agent creation.
pub mod factory;
/// Agent status and metrics monitoring.
pub mod monitor;
/// Built-in agent templates.
pub mod profiles;
/// Agent registry and task dispatch.
pub mod registry;
/// Priority task queue.
pub mod task_queue;
/// Shared task and monitoring types.
pub mod types;
/// Workflow definitions and the built-in workflows.
pub mod workflow;

pub use config::{OrchestratorConfig, QueueConfig, RegistryConfig, RetryPolicy, WorkflowConfig};
pub use context::OrchestrationContext;
pub use engine::{RecoveryOptions, WorkflowOrchestrator};
pub use execution::{
    ExecutionStatus, OrchestratorMetrics, StepError, StepStatus, WorkflowExecution, WorkflowResult,
};
pub use factory::{AgentFactory, AgentRequest, TEAM_TAG};
pub use monitor::AgentMonitor;
pub use profiles::{default_templates, AgentTemplate, TemplateInfo};
pub use registry::{
    project_tag, AgentHandle, AgentRegistry, DiscoveryQuery, SystemStatus, PROJECT_TAG_PREFIX,
    TEST_AGENT_TAG,
};
pub use task_queue::TaskQueue;
pub use types::{
    AgentMetrics, AgentState, Priority, TaskOptions, TaskSnapshot, TaskSpec, TaskStatus,
    WorkerStatus,
};
pub use workflow::{
    default_workflows, ErrorHandling, ExecutionMode, StepDefinition, WorkflowDefinition,
    WorkflowSummary,
};
