use crate::config::OrchestratorConfig;
use crate::engine::WorkflowOrchestrator;
use crate::factory::AgentFactory;
use crate::registry::AgentRegistry;
use crate::workflow::default_workflows;
use attestor_core::{AttestorResult, HealthCheckable, HealthReport};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use tracing::info;

/// Owns one registry, one factory, and one workflow orchestrator.
///
/// Build it once with [`OrchestrationContext::init`] and pass it (or clones
/// of its parts) to whatever needs them.
#[derive(Clone)]
pub struct OrchestrationContext {
    config: OrchestratorConfig,
    registry: AgentRegistry,
    factory: AgentFactory,
    orchestrator: WorkflowOrchestrator,
}

impl OrchestrationContext {
    /// Validate the config, wire the components, and register the built-in
    /// workflows. Must be called from inside a tokio runtime so the task
    /// dispatcher can start.
    pub fn init(config: OrchestratorConfig) -> AttestorResult<Self> {
        config.validate()?;
        let registry = AgentRegistry::new(config.registry.clone(), config.queue.clone());
        let factory = AgentFactory::new(registry.clone());
        let orchestrator = WorkflowOrchestrator::new(registry.clone(), config.workflow.clone());
        for definition in default_workflows() {
            orchestrator.register_workflow(definition)?;
        }
        registry.start();

        info!(
            workflows = orchestrator.list_workflows().len(),
            templates = factory.get_supported_types().len(),
            "Orchestration context initialized"
        );
        Ok(Self {
            config,
            registry,
            factory,
            orchestrator,
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn factory(&self) -> &AgentFactory {
        &self.factory
    }

    pub fn orchestrator(&self) -> &WorkflowOrchestrator {
        &self.orchestrator
    }

    /// Health of every component, keyed by component name.
    pub async fn health(&self) -> BTreeMap<String, HealthReport> {
        let components: Vec<&dyn HealthCheckable> = vec![&self.registry, &self.orchestrator];
        let reports = join_all(components.iter().map(|c| c.health_check())).await;
        components
            .iter()
            .map(|c| c.component())
            .zip(reports)
            .collect()
    }

    /// Cancel running executions, then stop the registry and its agents.
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown();
        self.registry.shutdown().await;
        info!("Orchestration context shut down");
    }
}
