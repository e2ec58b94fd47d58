use crate::profiles::{default_templates, AgentTemplate, TemplateInfo};
use crate::registry::{project_tag, AgentRegistry, DiscoveryQuery};
use attestor_agents::{AgentId, AgentKind, AgentMetadata};
use attestor_core::{AttestorError, AttestorResult};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Tag added to every agent created as part of a project team.
pub const TEAM_TAG: &str = "team";

/// Request to create one agent from a template.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    /// Template name, e.g. `"grader"`.
    pub agent_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Merged over the template's default config.
    #[serde(default)]
    pub custom_config: Map<String, Value>,
}

impl AgentRequest {
    pub fn new(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.custom_config.insert(key.into(), value);
        self
    }
}

/// Creates agents from templates and registers them.
#[derive(Clone)]
pub struct AgentFactory {
    registry: AgentRegistry,
    templates: Arc<RwLock<HashMap<AgentKind, AgentTemplate>>>,
}

impl AgentFactory {
    pub fn new(registry: AgentRegistry) -> Self {
        let templates = default_templates()
            .into_iter()
            .map(|t| (t.kind, t))
            .collect();
        Self {
            registry,
            templates: Arc::new(RwLock::new(templates)),
        }
    }

    /// Add or replace the template for its kind.
    pub fn register_template(&self, template: AgentTemplate) {
        info!(kind = %template.kind, "Agent template registered");
        self.templates.write().insert(template.kind, template);
    }

    pub fn get_supported_types(&self) -> Vec<AgentKind> {
        let templates = self.templates.read();
        AgentKind::ALL
            .into_iter()
            .filter(|k| templates.contains_key(k))
            .collect()
    }

    pub fn list_templates(&self) -> Vec<TemplateInfo> {
        let templates = self.templates.read();
        AgentKind::ALL
            .iter()
            .filter_map(|k| templates.get(k).map(AgentTemplate::info))
            .collect()
    }

    /// Build an agent from its template and register it.
    pub async fn create_and_register_agent(&self, request: AgentRequest) -> AttestorResult<AgentId> {
        let kind: AgentKind = request.agent_type.parse()?;
        let template = self
            .templates
            .read()
            .get(&kind)
            .cloned()
            .ok_or_else(|| AttestorError::UnsupportedType(request.agent_type.clone()))?;

        let id = format!("{}-{}", kind.as_str(), Uuid::new_v4().simple());
        let name = request
            .name
            .unwrap_or_else(|| template.display_name.clone());
        let mut metadata = AgentMetadata::new(id, name, kind)
            .with_tags(template.default_tags.iter().cloned())
            .with_tags(request.tags)
            .with_config(template.default_config.clone())
            .with_config(request.custom_config);
        for capability in &template.capabilities {
            metadata = metadata.with_capability(capability.clone());
        }

        let agent = (template.builder)(metadata)?;
        self.registry.register(agent).await
    }

    /// Create one agent of every supported kind, bound to the project through
    /// its project tag.
    ///
    /// If any creation fails, the agents created so far are unregistered and
    /// the error is returned.
    pub async fn create_project_agent_team(&self, project_id: &str) -> AttestorResult<Vec<AgentId>> {
        if project_id.trim().is_empty() {
            return Err(AttestorError::Validation(
                "project id must not be empty".into(),
            ));
        }

        let mut created = Vec::new();
        for kind in self.get_supported_types() {
            let request = AgentRequest::new(kind.as_str())
                .with_tags([project_tag(project_id), TEAM_TAG.to_string()]);
            match self.create_and_register_agent(request).await {
                Ok(id) => created.push(id),
                Err(err) => {
                    warn!(
                        project_id = %project_id,
                        kind = %kind,
                        error = %err,
                        rolled_back = created.len(),
                        "Team creation failed; rolling back"
                    );
                    for id in created.iter().rev() {
                        if let Err(rollback_err) = self.registry.unregister(id).await {
                            warn!(agent_id = %id, error = %rollback_err, "Rollback unregister failed");
                        }
                    }
                    return Err(err);
                }
            }
        }
        info!(project_id = %project_id, agents = created.len(), "Project agent team created");
        Ok(created)
    }

    /// Unregister every agent bound to the project. Returns how many were
    /// removed; calling it again is a no-op.
    pub async fn destroy_project_agent_team(&self, project_id: &str) -> AttestorResult<usize> {
        let members = self
            .registry
            .discover(&DiscoveryQuery::new().with_project(project_id));
        let mut removed = 0;
        for member in members {
            match self.registry.unregister(&member.id).await {
                Ok(()) => removed += 1,
                Err(AttestorError::AgentNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        info!(project_id = %project_id, removed, "Project agent team destroyed");
        Ok(removed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{QueueConfig, RegistryConfig};
    use attestor_agents::{AgentStatus, CapabilityName};
    use serde_json::json;

    fn factory() -> (AgentFactory, AgentRegistry) {
        let registry = AgentRegistry::new(RegistryConfig::default(), QueueConfig::default());
        (AgentFactory::new(registry.clone()), registry)
    }

    #[tokio::test]
    async fn test_create_agent_merges_config_and_tags() {
        let (factory, registry) = factory();
        let id = factory
            .create_and_register_agent(
                AgentRequest::new("grader")
                    .with_name("Strict Grader")
                    .with_tags(["proj-1"])
                    .with_config("passThreshold", json!(90.0)),
            )
            .await
            .unwrap();

        assert!(id.starts_with("grader-"));
        let handle = registry.get(&id).unwrap();
        assert_eq!(handle.name, "Strict Grader");
        assert_eq!(handle.status, AgentStatus::Ready);
        assert!(handle.tags.contains("proj-1"));
        assert!(handle.tags.contains("grader"));
        assert!(handle.capabilities.contains(&CapabilityName::Grading));
    }

    #[tokio::test]
    async fn test_unknown_type_is_unsupported() {
        let (factory, _) = factory();
        let err = factory
            .create_and_register_agent(AgentRequest::new("astrologer"))
            .await
            .unwrap_err();
        assert!(matches!(err, AttestorError::UnsupportedType(_)));
    }

    #[tokio::test]
    async fn test_team_has_one_agent_per_kind() {
        let (factory, registry) = factory();
        let ids = factory.create_project_agent_team("proj-9").await.unwrap();
        assert_eq!(ids.len(), 4);
        let members = registry.discover(&DiscoveryQuery::new().with_project("proj-9").with_tag(TEAM_TAG));
        assert_eq!(members.len(), 4);
        assert!(registry.discover(&DiscoveryQuery::new().with_tag("proj-9")).is_empty());
    }

    #[tokio::test]
    async fn test_project_named_like_a_tag_stays_isolated() {
        let (factory, registry) = factory();
        factory.create_project_agent_team("p1").await.unwrap();
        factory.create_project_agent_team("grader").await.unwrap();

        assert_eq!(factory.destroy_project_agent_team("team").await.unwrap(), 0);
        assert_eq!(factory.destroy_project_agent_team("test").await.unwrap(), 0);
        assert_eq!(factory.destroy_project_agent_team("grader").await.unwrap(), 4);

        let p1 = registry.discover(&DiscoveryQuery::new().with_project("p1"));
        assert_eq!(p1.len(), 4);
        assert_eq!(registry.len(), 4);
    }

    #[tokio::test]
    async fn test_team_creation_rolls_back() {
        let (factory, registry) = factory();
        let broken = default_templates()
            .into_iter()
            .find(|t| t.kind == AgentKind::Improvement)
            .unwrap()
            .with_builder(|_| Err(AttestorError::Agent("builder exploded".into())));
        factory.register_template(broken);

        let err = factory.create_project_agent_team("proj-r").await.unwrap_err();
        assert!(err.to_string().contains("builder exploded"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_destroy_team_is_idempotent() {
        let (factory, registry) = factory();
        factory.create_project_agent_team("p").await.unwrap();
        factory.create_project_agent_team("other").await.unwrap();

        assert_eq!(factory.destroy_project_agent_team("p").await.unwrap(), 4);
        assert_eq!(factory.destroy_project_agent_team("p").await.unwrap(), 0);
        assert_eq!(registry.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_project_id_rejected() {
        let (factory, _) = factory();
        assert!(matches!(
            factory.create_project_agent_team("  ").await,
            Err(AttestorError::Validation(_))
        ));
    }

    #[test]
    fn test_supported_types_and_templates() {
        let (factory, _) = factory();
        assert_eq!(factory.get_supported_types(), AgentKind::ALL.to_vec());
        let infos = factory.list_templates();
        assert_eq!(infos.len(), 4);
        assert_eq!(infos[0].kind, AgentKind::ALL[0]);
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: AgentRequest = serde_json::from_value(json!({
            "agentType": "ideation",
            "customConfig": {"maxIdeas": 3}
        }))
        .unwrap();
        assert_eq!(request.agent_type, "ideation");
        assert_eq!(request.custom_config["maxIdeas"], 3);
        assert!(request.tags.is_empty());
    }
}
