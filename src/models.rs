//! Core data model: Project, Issue, Task, Blocker, AgentDefinition,
//! TacticalPattern, ScheduleResult, and Evidence.
//!
//! Tasks and Issues are never deleted once scheduled; abandonment is a
//! status, not a removal. See `error::SpiralError` for the failure modes
//! that accompany invalid transitions on these types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type TaskId = String;
pub type ProjectId = String;

/// Root container. Owns Issues, Tasks, Blockers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub phase: ProjectPhase,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPhase {
    Discovery,
    Planning,
    Active,
    Review,
    Complete,
}

impl ProjectPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectPhase::Discovery => "discovery",
            ProjectPhase::Planning => "planning",
            ProjectPhase::Active => "active",
            ProjectPhase::Review => "review",
            ProjectPhase::Complete => "complete",
        }
    }
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            phase: ProjectPhase::Discovery,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A feature-level unit, decomposed into 3-8 Tasks before scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub project_id: ProjectId,
    /// Hierarchical string, e.g. "2.1".
    pub issue_number: String,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub workflow_step: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// The atomic unit of agent work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub project_id: ProjectId,
    /// Pattern `<issue>.<idx>`; unique per project, a strict refinement of
    /// the parent issue's number.
    pub task_number: TaskId,
    pub issue_number: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    /// Ordered dependency task numbers.
    pub depends_on: Vec<TaskId>,
    /// Always false for tasks within the same issue (they form a linear chain).
    pub can_parallelize: bool,
    pub priority: Priority,
    pub estimated_hours: f64,
    /// 1..=5.
    pub complexity_score: u8,
    pub uncertainty_level: UncertaintyLevel,
    /// Opaque JSON set by the supervisor across a retry.
    pub intervention_context: Option<serde_json::Value>,
    pub assigned_agent_id: Option<String>,
    pub category: Option<TaskCategory>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    InProgress,
    Blocked,
    Completed,
    Failed,
    Abandoned,
}

impl TaskStatus {
    /// Valid next statuses per spec.md §3: PENDING→READY→IN_PROGRESS→
    /// {COMPLETED, FAILED, BLOCKED}; BLOCKED→IN_PROGRESS on answer;
    /// FAILED→IN_PROGRESS on retry; COMPLETED and ABANDONED are terminal.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Ready, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Blocked)
                | (Blocked, InProgress)
                | (Failed, InProgress)
                | (_, Abandoned)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Abandoned)
    }
}

/// Task category produced by the classifier; drives the quality-gate matrix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    CodeImplementation,
    Design,
    Documentation,
    Configuration,
    Testing,
    Refactoring,
    Mixed,
}

/// A pause point requiring external input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blocker {
    pub id: String,
    pub project_id: ProjectId,
    pub kind: BlockerKind,
    pub question: String,
    pub task_id: Option<TaskId>,
    pub session_id: Option<String>,
    pub answer: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub answered_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Opaque resume metadata, e.g. a discovery session id + progress tuple.
    pub resume_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockerKind {
    /// Halts the task.
    Sync,
    /// Allows the task to continue but must eventually be answered.
    Async,
}

/// A four-step agent capability ladder carried in the definition; consumed
/// as metadata by the prompt builder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Maturity {
    D1,
    D2,
    D3,
    D4,
}

impl Default for Maturity {
    fn default() -> Self {
        Maturity::D1
    }
}

/// Declarative worker spec. Validated at load; invalid definitions refuse to
/// register.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    #[serde(default)]
    pub maturity: Maturity,
    pub system_prompt: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub constraints: ExecutionConstraints,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConstraints {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.7
}
fn default_timeout_seconds() -> u64 {
    300
}

impl Default for ExecutionConstraints {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Recoverable-error recipe. Ordered; first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TacticalPattern {
    pub id: String,
    /// Case-insensitive regex matched against raw agent error text.
    pub matcher: String,
    pub category: String,
    pub strategy: InterventionStrategy,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterventionStrategy {
    ConvertCreateToEdit,
    SkipFileCreation,
    CreateBackup,
    RetryWithContext,
}

/// Output of the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleResult {
    pub assignments: HashMap<TaskId, TaskAssignment>,
    pub total_duration: f64,
    pub timeline: Vec<TimelineEvent>,
    pub agent_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub start_time: f64,
    pub end_time: f64,
    pub assigned_agent_slot: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    Start,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub task_id: TaskId,
    pub time: f64,
    pub kind: TimelineEventKind,
}

/// Verification envelope produced by the EvidenceVerifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub skipped_tests: u32,
    pub pass_rate: f64,
    pub coverage_percent: Option<f64>,
    pub raw_output: String,
    pub skip_violations: Vec<String>,
    pub quality_metrics: HashMap<String, f64>,
    pub agent_id: String,
    pub task_description: String,
    pub detected_language: String,
    pub detected_framework: Option<String>,
    pub verified: bool,
    pub errors: Vec<String>,
}

/// A single code-review or analyzer finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub category: FindingCategory,
    pub severity: Severity,
    pub file_path: String,
    pub line_number: Option<u32>,
    pub message: String,
    pub suggestion: Option<String>,
    pub tool: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Complexity,
    Security,
    Style,
    Maintainability,
    Performance,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// One of the six checks the `QualityGateRunner` can run for a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QualityGateType {
    Tests,
    Coverage,
    TypeCheck,
    Linting,
    CodeReview,
    SkipDetection,
}

impl QualityGateType {
    pub const ALL: [QualityGateType; 6] = [
        QualityGateType::Tests,
        QualityGateType::Coverage,
        QualityGateType::TypeCheck,
        QualityGateType::Linting,
        QualityGateType::CodeReview,
        QualityGateType::SkipDetection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityGateType::Tests => "tests",
            QualityGateType::Coverage => "coverage",
            QualityGateType::TypeCheck => "type_check",
            QualityGateType::Linting => "linting",
            QualityGateType::CodeReview => "code_review",
            QualityGateType::SkipDetection => "skip_detection",
        }
    }
}
