//! Loads [`AgentDefinition`]s from a directory of declarative documents and
//! hands out configured [`WorkerAgent`] handles.
//!
//! Syntax of the on-disk definitions is a consumer-side concern (spec.md
//! §6); this crate reads them as YAML via `serde_yaml`, following the
//! teacher's existing `serde_yaml` dependency, but any format that parses
//! into [`AgentDefinition`] would satisfy the contract.

use crate::models::{AgentDefinition, Maturity};
use crate::{Result, SpiralError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

impl AgentDefinition {
    /// Validates a loaded definition, beyond what serde's required-field
    /// deserialization already enforces.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SpiralError::InvalidAgentDefinition(
                "name must not be empty".to_string(),
            ));
        }
        if self.agent_type.trim().is_empty() {
            return Err(SpiralError::InvalidAgentDefinition(format!(
                "{}: type must not be empty",
                self.name
            )));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(SpiralError::InvalidAgentDefinition(format!(
                "{}: system_prompt must not be empty",
                self.name
            )));
        }
        if self.constraints.max_tokens == 0 {
            return Err(SpiralError::InvalidAgentDefinition(format!(
                "{}: constraints.max_tokens must be positive",
                self.name
            )));
        }
        if !(0.0..=2.0).contains(&self.constraints.temperature) {
            return Err(SpiralError::InvalidAgentDefinition(format!(
                "{}: constraints.temperature must be in [0.0, 2.0]",
                self.name
            )));
        }
        if self.constraints.timeout_seconds == 0 {
            return Err(SpiralError::InvalidAgentDefinition(format!(
                "{}: constraints.timeout_seconds must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Parses one YAML document into an [`AgentDefinition`], surfacing a
/// precise remediation message on missing/invalid required fields
/// (unknown `maturity`, wrong type for `capabilities`/`tools`/`constraints`/
/// `metadata`), per spec.md §6.
pub fn parse_agent_definition(source: &str) -> Result<AgentDefinition> {
    let def: AgentDefinition = serde_yaml::from_str(source).map_err(|e| {
        SpiralError::InvalidAgentDefinition(format!("failed to parse agent definition: {}", e))
    })?;
    def.validate()?;
    Ok(def)
}

/// Holds loaded agent definitions and produces configured [`WorkerAgent`]
/// handles. Reload is atomic: a partially-parsed directory never replaces a
/// previously good registry.
#[derive(Clone)]
pub struct AgentRegistry {
    definitions: Arc<RwLock<HashMap<String, AgentDefinition>>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            definitions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Loads every `*.yaml`/`*.yml` file in `dir`, validating each before
    /// committing any of them — an invalid file in the directory leaves the
    /// registry untouched.
    pub async fn load(&self, dir: &Path) -> Result<usize> {
        let mut loaded = HashMap::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| SpiralError::Internal(anyhow::anyhow!("reading agent dir {:?}: {}", dir, e)))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SpiralError::Internal(anyhow::anyhow!(e)))?
        {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yaml" || e == "yml")
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| SpiralError::Internal(anyhow::anyhow!("reading {:?}: {}", path, e)))?;
            let def = parse_agent_definition(&content)?;
            if loaded.contains_key(&def.name) {
                return Err(SpiralError::InvalidAgentDefinition(format!(
                    "duplicate agent name: {}",
                    def.name
                )));
            }
            loaded.insert(def.name.clone(), def);
        }

        let count = loaded.len();
        let mut definitions = self.definitions.write().await;
        *definitions = loaded;
        tracing::info!("Loaded {} agent definitions from {:?}", count, dir);
        Ok(count)
    }

    /// Registers a single already-parsed definition (tests, programmatic
    /// setup). Refuses invalid definitions.
    pub async fn register(&self, def: AgentDefinition) -> Result<()> {
        def.validate()?;
        let mut definitions = self.definitions.write().await;
        definitions.insert(def.name.clone(), def);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<AgentDefinition> {
        self.definitions.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<AgentDefinition> {
        let mut defs: Vec<AgentDefinition> = self.definitions.read().await.values().cloned().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub async fn filter_by_type(&self, agent_type: &str) -> Vec<AgentDefinition> {
        let mut defs: Vec<AgentDefinition> = self
            .definitions
            .read()
            .await
            .values()
            .filter(|d| d.agent_type == agent_type)
            .cloned()
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub async fn len(&self) -> usize {
        self.definitions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Produces a configured [`WorkerAgent`] handle for `name`, or
    /// `UnknownAgent` if no such definition is registered.
    pub async fn create_agent(&self, name: &str, id: impl Into<String>) -> Result<WorkerAgent> {
        let definition = self
            .get(name)
            .await
            .ok_or_else(|| SpiralError::UnknownAgent(name.to_string()))?;
        Ok(WorkerAgent {
            id: id.into(),
            definition,
        })
    }
}

/// One worker agent, carrying an [`AgentDefinition`]. Worker variants
/// (review, frontend, ...) are data, not code (spec.md §9): behavior
/// differences live entirely in the definition's prompt, tool list, and
/// maturity, never in a distinct Rust type.
#[derive(Debug, Clone)]
pub struct WorkerAgent {
    pub id: String,
    pub definition: AgentDefinition,
}

impl WorkerAgent {
    /// The amount of contextual scaffolding the prompt builder should
    /// include for this agent's maturity level: lower maturity gets more
    /// explicit scaffolding, higher maturity gets a terser prompt.
    pub fn scaffolding_budget(&self) -> usize {
        match self.definition.maturity {
            Maturity::D1 => 20,
            Maturity::D2 => 12,
            Maturity::D3 => 6,
            Maturity::D4 => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_YAML: &str = r#"
name: backend-dev
type: software_developer
maturity: D2
system_prompt: "You are a senior backend engineer."
capabilities: ["rust", "sql"]
tools: ["read_file", "write_file"]
constraints:
  max_tokens: 8192
  temperature: 0.3
  timeout_seconds: 120
metadata:
  version: "1"
"#;

    #[test]
    fn parses_and_validates_a_definition() {
        let def = parse_agent_definition(VALID_YAML).unwrap();
        assert_eq!(def.name, "backend-dev");
        assert_eq!(def.maturity, Maturity::D2);
        assert_eq!(def.constraints.max_tokens, 8192);
    }

    #[test]
    fn missing_required_field_refuses_to_register() {
        let missing_prompt = r#"
name: x
type: y
"#;
        assert!(parse_agent_definition(missing_prompt).is_err());
    }

    #[test]
    fn unknown_maturity_is_rejected() {
        let bad_maturity = r#"
name: x
type: y
system_prompt: "hi"
maturity: D9
"#;
        assert!(parse_agent_definition(bad_maturity).is_err());
    }

    #[tokio::test]
    async fn create_agent_for_unknown_name_errors() {
        let registry = AgentRegistry::new();
        let err = registry.create_agent("nope", "run-1").await.unwrap_err();
        assert!(matches!(err, SpiralError::UnknownAgent(_)));
    }

    #[tokio::test]
    async fn register_and_create_agent() {
        let registry = AgentRegistry::new();
        let def = parse_agent_definition(VALID_YAML).unwrap();
        registry.register(def).await.unwrap();

        let agent = registry.create_agent("backend-dev", "run-1").await.unwrap();
        assert_eq!(agent.id, "run-1");
        assert_eq!(agent.scaffolding_budget(), 12);
    }

    #[tokio::test]
    async fn reload_is_atomic_on_bad_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("good.yaml"), VALID_YAML).unwrap();
        std::fs::write(dir.path().join("bad.yaml"), "name: onlyname\n").unwrap();

        let registry = AgentRegistry::new();
        let result = registry.load(dir.path()).await;
        assert!(result.is_err());
        assert!(registry.is_empty().await);
    }
}
