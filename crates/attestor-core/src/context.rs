use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// The role of the participant that authored a [`ConversationTurn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human end-user.
    User,
    /// An agent response.
    Assistant,
    /// A system-level instruction.
    System,
}

/// A single turn of the conversation that led to an agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Everything an agent knows about the call it is serving.
///
/// `shared_state` is the workflow blackboard: each workflow step merges its
/// output into it before dependent steps start. Steps that run in the same
/// tier must write disjoint keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub project_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub session_id: Uuid,
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(default)]
    pub shared_state: Map<String, Value>,
    #[serde(default)]
    pub preferences: HashMap<String, Value>,
}

impl ExecutionContext {
    /// Creates a fresh context for a project with a new session id.
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            user_id: None,
            session_id: Uuid::new_v4(),
            conversation_history: Vec::new(),
            shared_state: Map::new(),
            preferences: HashMap::new(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_preference(mut self, key: impl Into<String>, value: Value) -> Self {
        self.preferences.insert(key.into(), value);
        self
    }

    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.shared_state.insert(key.into(), value);
        self
    }

    /// Merge a step output into the shared state.
    ///
    /// Object outputs contribute each top-level key; anything else is stored
    /// under `key`.
    pub fn merge_output(&mut self, key: &str, output: &Value) {
        match output {
            Value::Object(fields) => {
                for (k, v) in fields {
                    self.shared_state.insert(k.clone(), v.clone());
                }
            }
            other => {
                self.shared_state.insert(key.to_string(), other.clone());
            }
        }
    }

    /// Read a string field from the shared state.
    pub fn state_str(&self, key: &str) -> Option<&str> {
        self.shared_state.get(key).and_then(Value::as_str)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_object_output_spreads_keys() {
        let mut ctx = ExecutionContext::new("p1");
        ctx.merge_output("classify", &json!({"riskLevel": "high", "score": 3}));
        assert_eq!(ctx.state_str("riskLevel"), Some("high"));
        assert_eq!(ctx.shared_state["score"], json!(3));
        assert!(!ctx.shared_state.contains_key("classify"));
    }

    #[test]
    fn test_merge_scalar_output_uses_step_key() {
        let mut ctx = ExecutionContext::new("p1");
        ctx.merge_output("summary", &json!("done"));
        assert_eq!(ctx.state_str("summary"), Some("done"));
    }

    #[test]
    fn test_context_serializes_camel_case() {
        let ctx = ExecutionContext::new("p1").with_user("u1");
        let json = serde_json::to_value(&ctx).unwrap_or_default();
        assert_eq!(json["projectId"], "p1");
        assert_eq!(json["userId"], "u1");
        assert!(json["sharedState"].is_object());
    }

    #[test]
    fn test_conversation_turn_roles() {
        let turn = ConversationTurn::user("assess my chatbot");
        assert_eq!(turn.role, Role::User);
        assert_eq!(ConversationTurn::assistant("ok").role, Role::Assistant);
    }
}
