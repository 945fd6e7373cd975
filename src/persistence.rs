//! Implementation-free persistence contract (spec.md §6) plus an in-memory
//! reference implementation so the supervisor loop and tests are runnable
//! without a configured database — mirroring the teacher's orchestrator,
//! which keeps its own `task_storage`/`task_results` maps in memory rather
//! than requiring one.

use crate::models::{
    AgentDefinition, Blocker, BlockerKind, Issue, Project, ProjectPhase, Task, TaskId, TaskStatus,
};
use crate::{Result, SpiralError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Filter for listing blockers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockerFilter {
    All,
    Pending,
    Answered,
}

/// A recorded LLM call, as observed by the supervisor loop (spec.md §4.5
/// token-accounting paragraph).
#[derive(Debug, Clone)]
pub struct TokenUsageRecord {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub model: String,
    pub call_type: String,
    pub session_id: Option<String>,
    pub task_id: Option<TaskId>,
    pub agent_id: Option<String>,
}

/// Valid project phase transitions (spec.md §6 phase transition table).
/// `complete` is terminal; every other transition not listed here is an
/// error.
fn is_valid_phase_transition(from: ProjectPhase, to: ProjectPhase) -> bool {
    use ProjectPhase::*;
    matches!(
        (from, to),
        (Discovery, Planning)
            | (Planning, Discovery)
            | (Planning, Active)
            | (Active, Planning)
            | (Active, Review)
            | (Review, Active)
            | (Review, Complete)
    )
}

/// The narrow, implementation-free persistence contract consumed by the
/// rest of the core. Each listed operation is atomic.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn create_project(&self, name: &str) -> Result<Project>;
    async fn get_project(&self, id: &str) -> Result<Project>;
    async fn update_project_phase(&self, id: &str, phase: ProjectPhase) -> Result<Project>;
    async fn list_projects(&self) -> Result<Vec<Project>>;

    async fn create_issue(&self, issue: Issue) -> Result<Issue>;
    async fn list_issues_by_project(&self, project_id: &str) -> Result<Vec<Issue>>;
    async fn get_issue(&self, project_id: &str, issue_number: &str) -> Result<Issue>;

    async fn create_task_with_issue(&self, task: Task) -> Result<Task>;
    async fn add_task_dependency(&self, project_id: &str, task_id: &str, dep_id: &str) -> Result<()>;
    async fn remove_task_dependency(&self, project_id: &str, task_id: &str, dep_id: &str) -> Result<()>;
    async fn list_tasks_by_project(
        &self,
        project_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>>;
    async fn update_task_status(&self, project_id: &str, task_id: &str, status: TaskStatus) -> Result<Task>;
    async fn set_intervention_context(
        &self,
        project_id: &str,
        task_id: &str,
        context: serde_json::Value,
    ) -> Result<()>;
    async fn get_intervention_context(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> Result<Option<serde_json::Value>>;

    async fn create_blocker(&self, blocker: Blocker) -> Result<Blocker>;
    async fn answer_blocker(&self, id: &str, answer: &str) -> Result<Blocker>;
    async fn list_blockers_by_project(&self, project_id: &str, filter: BlockerFilter) -> Result<Vec<Blocker>>;
    async fn get_blocker(&self, id: &str) -> Result<Blocker>;

    async fn upsert_memory(&self, project_id: &str, category: &str, key: &str, value: serde_json::Value) -> Result<()>;
    async fn get_memories_by_category(&self, project_id: &str, category: &str) -> Result<Vec<(String, serde_json::Value)>>;
    async fn delete_memories_by_category(&self, project_id: &str, category: &str) -> Result<()>;

    async fn record_token_usage(&self, record: TokenUsageRecord) -> Result<()>;
}

#[derive(Default)]
struct InMemoryState {
    projects: HashMap<String, Project>,
    issues: HashMap<String, Vec<Issue>>,
    tasks: HashMap<String, HashMap<TaskId, Task>>,
    blockers: HashMap<String, Blocker>,
    memories: HashMap<String, HashMap<String, HashMap<String, serde_json::Value>>>,
    token_usage: Vec<TokenUsageRecord>,
    agent_definitions: HashMap<String, AgentDefinition>,
}

/// In-memory reference implementation of [`PersistenceStore`]. Not durable
/// across process restarts; exists so the coordination engine (and its
/// tests) runs without a configured database.
#[derive(Clone, Default)]
pub struct InMemoryPersistenceStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryPersistenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryPersistenceStore {
    async fn create_project(&self, name: &str) -> Result<Project> {
        let project = Project::new(name);
        let mut state = self.state.write().await;
        state.projects.insert(project.id.clone(), project.clone());
        state.tasks.entry(project.id.clone()).or_default();
        state.issues.entry(project.id.clone()).or_default();
        Ok(project)
    }

    async fn get_project(&self, id: &str) -> Result<Project> {
        let state = self.state.read().await;
        state
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| SpiralError::ProjectNotFound(id.to_string()))
    }

    async fn update_project_phase(&self, id: &str, phase: ProjectPhase) -> Result<Project> {
        let mut state = self.state.write().await;
        let project = state
            .projects
            .get_mut(id)
            .ok_or_else(|| SpiralError::ProjectNotFound(id.to_string()))?;

        if project.phase == phase {
            return Ok(project.clone());
        }
        if project.phase == ProjectPhase::Complete || !is_valid_phase_transition(project.phase, phase) {
            return Err(SpiralError::InvalidPhaseTransition {
                from: project.phase.as_str().to_string(),
                to: phase.as_str().to_string(),
            });
        }
        project.phase = phase;
        project.updated_at = chrono::Utc::now();
        Ok(project.clone())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let state = self.state.read().await;
        let mut projects: Vec<Project> = state.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(projects)
    }

    async fn create_issue(&self, issue: Issue) -> Result<Issue> {
        let mut state = self.state.write().await;
        if !state.projects.contains_key(&issue.project_id) {
            return Err(SpiralError::ProjectNotFound(issue.project_id.clone()));
        }
        let issues = state.issues.entry(issue.project_id.clone()).or_default();
        if issues.iter().any(|i| i.issue_number == issue.issue_number) {
            return Err(SpiralError::Validation(format!(
                "Issue {} already exists in project {}",
                issue.issue_number, issue.project_id
            )));
        }
        issues.push(issue.clone());
        Ok(issue)
    }

    async fn list_issues_by_project(&self, project_id: &str) -> Result<Vec<Issue>> {
        let state = self.state.read().await;
        Ok(state.issues.get(project_id).cloned().unwrap_or_default())
    }

    async fn get_issue(&self, project_id: &str, issue_number: &str) -> Result<Issue> {
        let state = self.state.read().await;
        state
            .issues
            .get(project_id)
            .and_then(|issues| issues.iter().find(|i| i.issue_number == issue_number))
            .cloned()
            .ok_or_else(|| SpiralError::NotFound(format!("issue {}", issue_number)))
    }

    async fn create_task_with_issue(&self, task: Task) -> Result<Task> {
        let mut state = self.state.write().await;
        if !state.projects.contains_key(&task.project_id) {
            return Err(SpiralError::ProjectNotFound(task.project_id.clone()));
        }
        let tasks = state.tasks.entry(task.project_id.clone()).or_default();
        if tasks.contains_key(&task.task_number) {
            return Err(SpiralError::Validation(format!(
                "Task {} already exists in project {}",
                task.task_number, task.project_id
            )));
        }
        tasks.insert(task.task_number.clone(), task.clone());
        Ok(task)
    }

    async fn add_task_dependency(&self, project_id: &str, task_id: &str, dep_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let tasks = state
            .tasks
            .get_mut(project_id)
            .ok_or_else(|| SpiralError::ProjectNotFound(project_id.to_string()))?;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| SpiralError::UnknownTask(task_id.to_string()))?;
        if !task.depends_on.iter().any(|d| d == dep_id) {
            task.depends_on.push(dep_id.to_string());
        }
        Ok(())
    }

    async fn remove_task_dependency(&self, project_id: &str, task_id: &str, dep_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let tasks = state
            .tasks
            .get_mut(project_id)
            .ok_or_else(|| SpiralError::ProjectNotFound(project_id.to_string()))?;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| SpiralError::UnknownTask(task_id.to_string()))?;
        task.depends_on.retain(|d| d != dep_id);
        Ok(())
    }

    async fn list_tasks_by_project(
        &self,
        project_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        let state = self.state.read().await;
        let mut tasks: Vec<Task> = state
            .tasks
            .get(project_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        if let Some(status) = status {
            tasks.retain(|t| t.status == status);
        }
        tasks.sort_by(|a, b| a.task_number.cmp(&b.task_number));
        Ok(tasks)
    }

    async fn update_task_status(&self, project_id: &str, task_id: &str, status: TaskStatus) -> Result<Task> {
        let mut state = self.state.write().await;
        let tasks = state
            .tasks
            .get_mut(project_id)
            .ok_or_else(|| SpiralError::ProjectNotFound(project_id.to_string()))?;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| SpiralError::UnknownTask(task_id.to_string()))?;

        if task.status != status && !task.status.can_transition_to(status) {
            return Err(SpiralError::InvalidStatusTransition {
                from: format!("{:?}", task.status),
                to: format!("{:?}", status),
            });
        }
        task.status = status;
        Ok(task.clone())
    }

    async fn set_intervention_context(
        &self,
        project_id: &str,
        task_id: &str,
        context: serde_json::Value,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let tasks = state
            .tasks
            .get_mut(project_id)
            .ok_or_else(|| SpiralError::ProjectNotFound(project_id.to_string()))?;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| SpiralError::UnknownTask(task_id.to_string()))?;
        task.intervention_context = Some(context);
        Ok(())
    }

    async fn get_intervention_context(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> Result<Option<serde_json::Value>> {
        let state = self.state.read().await;
        let task = state
            .tasks
            .get(project_id)
            .and_then(|m| m.get(task_id))
            .ok_or_else(|| SpiralError::UnknownTask(task_id.to_string()))?;
        Ok(task.intervention_context.clone())
    }

    async fn create_blocker(&self, mut blocker: Blocker) -> Result<Blocker> {
        if blocker.id.is_empty() {
            blocker.id = Uuid::new_v4().to_string();
        }
        let mut state = self.state.write().await;
        state.blockers.insert(blocker.id.clone(), blocker.clone());
        Ok(blocker)
    }

    async fn answer_blocker(&self, id: &str, answer: &str) -> Result<Blocker> {
        let mut state = self.state.write().await;
        let blocker = state
            .blockers
            .get_mut(id)
            .ok_or_else(|| SpiralError::BlockerNotFound(id.to_string()))?;
        // Idempotent: answering twice is a no-op, not an error.
        if blocker.answered_at.is_none() {
            blocker.answer = Some(answer.to_string());
            blocker.answered_at = Some(chrono::Utc::now());
        }
        Ok(blocker.clone())
    }

    async fn list_blockers_by_project(&self, project_id: &str, filter: BlockerFilter) -> Result<Vec<Blocker>> {
        let state = self.state.read().await;
        let mut blockers: Vec<Blocker> = state
            .blockers
            .values()
            .filter(|b| b.project_id == project_id)
            .filter(|b| match filter {
                BlockerFilter::All => true,
                BlockerFilter::Pending => b.answered_at.is_none(),
                BlockerFilter::Answered => b.answered_at.is_some(),
            })
            .cloned()
            .collect();
        blockers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(blockers)
    }

    async fn get_blocker(&self, id: &str) -> Result<Blocker> {
        let state = self.state.read().await;
        state
            .blockers
            .get(id)
            .cloned()
            .ok_or_else(|| SpiralError::BlockerNotFound(id.to_string()))
    }

    async fn upsert_memory(&self, project_id: &str, category: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .memories
            .entry(project_id.to_string())
            .or_default()
            .entry(category.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get_memories_by_category(&self, project_id: &str, category: &str) -> Result<Vec<(String, serde_json::Value)>> {
        let state = self.state.read().await;
        let mut items: Vec<(String, serde_json::Value)> = state
            .memories
            .get(project_id)
            .and_then(|c| c.get(category))
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(items)
    }

    async fn delete_memories_by_category(&self, project_id: &str, category: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(categories) = state.memories.get_mut(project_id) {
            categories.remove(category);
        }
        Ok(())
    }

    async fn record_token_usage(&self, record: TokenUsageRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.token_usage.push(record);
        Ok(())
    }
}

impl InMemoryPersistenceStore {
    /// Total input/output tokens recorded so far, optionally scoped to a
    /// project's task ids. Not part of the abstract contract (spec.md §6
    /// only requires `record_token_usage`); a convenience for the reference
    /// implementation's own callers (CLI, tests).
    pub async fn total_token_usage(&self) -> (u64, u64) {
        let state = self.state.read().await;
        state.token_usage.iter().fold((0u64, 0u64), |(i, o), r| {
            (i + r.input_tokens as u64, o + r.output_tokens as u64)
        })
    }

    pub async fn register_agent_definition(&self, def: AgentDefinition) {
        let mut state = self.state.write().await;
        state.agent_definitions.insert(def.name.clone(), def);
    }

    pub async fn blocker_count(&self, kind: Option<BlockerKind>) -> usize {
        let state = self.state.read().await;
        state
            .blockers
            .values()
            .filter(|b| kind.map(|k| b.kind == k).unwrap_or(true))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Task, UncertaintyLevel};

    fn sample_task(project_id: &str, task_number: &str) -> Task {
        Task {
            project_id: project_id.to_string(),
            task_number: task_number.to_string(),
            issue_number: "1".to_string(),
            title: "do it".to_string(),
            description: String::new(),
            status: TaskStatus::Pending,
            depends_on: vec![],
            can_parallelize: false,
            priority: Priority::Medium,
            estimated_hours: 1.0,
            complexity_score: 1,
            uncertainty_level: UncertaintyLevel::Low,
            intervention_context: None,
            assigned_agent_id: None,
            category: None,
        }
    }

    #[tokio::test]
    async fn phase_transitions_follow_the_table() {
        let store = InMemoryPersistenceStore::new();
        let project = store.create_project("demo").await.unwrap();

        store
            .update_project_phase(&project.id, ProjectPhase::Planning)
            .await
            .unwrap();
        store
            .update_project_phase(&project.id, ProjectPhase::Active)
            .await
            .unwrap();

        // Active cannot jump straight to Discovery.
        let err = store
            .update_project_phase(&project.id, ProjectPhase::Discovery)
            .await
            .unwrap_err();
        assert!(matches!(err, SpiralError::InvalidPhaseTransition { .. }));

        store
            .update_project_phase(&project.id, ProjectPhase::Review)
            .await
            .unwrap();
        let completed = store
            .update_project_phase(&project.id, ProjectPhase::Complete)
            .await
            .unwrap();
        assert_eq!(completed.phase, ProjectPhase::Complete);

        let err = store
            .update_project_phase(&project.id, ProjectPhase::Active)
            .await
            .unwrap_err();
        assert!(matches!(err, SpiralError::InvalidPhaseTransition { .. }));
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let store = InMemoryPersistenceStore::new();
        let err = store.get_project("missing").await.unwrap_err();
        assert!(matches!(err, SpiralError::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn task_status_transitions_are_validated() {
        let store = InMemoryPersistenceStore::new();
        let project = store.create_project("demo").await.unwrap();
        store
            .create_task_with_issue(sample_task(&project.id, "1.1"))
            .await
            .unwrap();

        store
            .update_task_status(&project.id, "1.1", TaskStatus::Ready)
            .await
            .unwrap();
        store
            .update_task_status(&project.id, "1.1", TaskStatus::InProgress)
            .await
            .unwrap();
        let completed = store
            .update_task_status(&project.id, "1.1", TaskStatus::Completed)
            .await
            .unwrap();
        assert_eq!(completed.status, TaskStatus::Completed);

        // Completed is terminal.
        let err = store
            .update_task_status(&project.id, "1.1", TaskStatus::InProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, SpiralError::InvalidStatusTransition { .. }));
    }

    #[tokio::test]
    async fn answering_a_blocker_twice_is_idempotent() {
        let store = InMemoryPersistenceStore::new();
        let project = store.create_project("demo").await.unwrap();
        let blocker = store
            .create_blocker(Blocker {
                id: String::new(),
                project_id: project.id.clone(),
                kind: BlockerKind::Sync,
                question: "why?".to_string(),
                task_id: None,
                session_id: None,
                answer: None,
                created_at: chrono::Utc::now(),
                answered_at: None,
                resume_metadata: None,
            })
            .await
            .unwrap();

        let first = store.answer_blocker(&blocker.id, "because").await.unwrap();
        let second = store.answer_blocker(&blocker.id, "something else").await.unwrap();
        assert_eq!(first.answered_at, second.answered_at);
        assert_eq!(second.answer.as_deref(), Some("because"));
    }
}
