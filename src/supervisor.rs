//! Drives the dispatch -> monitor -> intervene -> block -> resume task
//! lifecycle (spec.md §4.5), wiring together every other module in the
//! crate. Nothing downstream of this module talks to an LLM or a quality
//! gate directly; the loop is the only place those concerns meet.

use crate::agent_registry::AgentRegistry;
use crate::blocker_store::BlockerStore;
use crate::classifier::TaskClassifier;
use crate::config::SupervisorConfig;
use crate::dependency_resolver::DependencyResolver;
use crate::evidence::EvidenceVerifier;
use crate::language_probe::LanguageProbe;
use crate::llm_adapter::{CompletionPurpose, CompletionRequest, LlmAdapter, Message};
use crate::models::{BlockerKind, Task, TaskId, TaskStatus};
use crate::persistence::{PersistenceStore, TokenUsageRecord};
use crate::quality_gates::{GateInputs, QualityGateRunner};
use crate::scheduler::TaskScheduler;
use crate::tactical_patterns::TacticalPatternMatcher;
use crate::test_runner::TestRunner;
use crate::{Result, SpiralError};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What happened to a single dispatched task, decided without touching any
/// shared state so a whole wave can run concurrently and be applied after.
enum DispatchOutcome {
    Completed {
        task_id: TaskId,
        files_touched: Vec<String>,
    },
    Retry {
        task_id: TaskId,
        intervention_context: serde_json::Value,
    },
    Blocked {
        task_id: TaskId,
        question: String,
    },
}

/// Tallies produced by one [`SupervisorLoop::run`] call.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub completed: Vec<TaskId>,
    pub blocked: Vec<TaskId>,
    pub cancelled: bool,
}

/// Drives a single project's tasks to completion (or a blocker) one wave at
/// a time. Stateless across calls except for what is persisted through
/// `PersistenceStore` and `DependencyResolver::build`'s re-derivation from
/// it, so `run` can be called again after a crash or a blocker answer.
pub struct SupervisorLoop {
    project_id: String,
    persistence: Arc<dyn PersistenceStore>,
    llm: Arc<dyn LlmAdapter>,
    agents: AgentRegistry,
    blockers: BlockerStore,
    gates: QualityGateRunner,
    classifier: TaskClassifier,
    matcher: TacticalPatternMatcher,
    evidence: EvidenceVerifier,
    language_probe: LanguageProbe,
    test_runner: TestRunner,
    config: SupervisorConfig,
    /// Directory of the project under coordination; used only to probe its
    /// language and run its test command after a task claims completion.
    project_dir: PathBuf,
    /// Overrides agent selection; default picks the task's own
    /// `assigned_agent_id`, falling back to the first registered agent.
    default_agent_name: Option<String>,
    cancel: Arc<AtomicBool>,
}

impl SupervisorLoop {
    pub fn new(
        project_id: impl Into<String>,
        persistence: Arc<dyn PersistenceStore>,
        llm: Arc<dyn LlmAdapter>,
        agents: AgentRegistry,
        config: SupervisorConfig,
        project_dir: PathBuf,
    ) -> Self {
        let blockers = BlockerStore::new(persistence.clone());
        Self {
            project_id: project_id.into(),
            persistence,
            llm,
            agents,
            blockers,
            gates: QualityGateRunner::new(),
            classifier: TaskClassifier::new(),
            matcher: TacticalPatternMatcher::new(),
            evidence: EvidenceVerifier::new(crate::config::EvidenceConfig::default()),
            language_probe: LanguageProbe::new(),
            test_runner: TestRunner::new(),
            config,
            project_dir,
            default_agent_name: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_evidence_config(mut self, config: crate::config::EvidenceConfig) -> Self {
        self.evidence = EvidenceVerifier::new(config);
        self
    }

    pub fn with_default_agent(mut self, name: impl Into<String>) -> Self {
        self.default_agent_name = Some(name.into());
        self
    }

    /// A cheap handle a caller can use to request cooperative cancellation
    /// from another task; `run` stops issuing new dispatches once set, but
    /// lets any in-flight wave finish.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Runs the dispatch loop to quiescence: every task either reaches
    /// COMPLETED or BLOCKED, dependencies are exhausted, or cancellation is
    /// requested between waves.
    pub async fn run(&self) -> Result<RunOutcome> {
        let tasks = self
            .persistence
            .list_tasks_by_project(&self.project_id, None)
            .await?;

        let mut resolver = DependencyResolver::new();
        resolver.build(&tasks)?;

        let mut tasks_by_id: HashMap<TaskId, Task> =
            tasks.into_iter().map(|t| (t.task_number.clone(), t)).collect();

        let mut attempts: HashMap<TaskId, u32> = HashMap::new();
        let mut known_files: HashSet<String> = HashSet::new();
        for task in tasks_by_id.values() {
            if let Some(ctx) = &task.intervention_context {
                if let Some(n) = ctx.get("attempts").and_then(|v| v.as_u64()) {
                    attempts.insert(task.task_number.clone(), n as u32);
                }
                if let Some(files) = ctx.get("existing_files").and_then(|v| v.as_array()) {
                    for f in files {
                        if let Some(s) = f.as_str() {
                            known_files.insert(s.to_string());
                        }
                    }
                }
            }
        }

        let durations: HashMap<TaskId, f64> = tasks_by_id
            .values()
            .map(|t| (t.task_number.clone(), t.estimated_hours))
            .collect();
        let scheduler = TaskScheduler::new();
        let plan = scheduler.schedule_tasks(&resolver, &durations, self.config.default_agent_slots);
        tracing::info!(
            project_id = %self.project_id,
            total_duration = plan.total_duration,
            agent_count = plan.agent_count,
            "Computed schedule before dispatch"
        );

        let mut retry_queue: Vec<TaskId> = Vec::new();
        let mut outcome = RunOutcome::default();

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                outcome.cancelled = true;
                break;
            }

            let mut dispatch_ids: Vec<TaskId> = resolver
                .ready(true)
                .into_iter()
                .filter(|id| {
                    matches!(
                        tasks_by_id.get(id).map(|t| t.status),
                        Some(TaskStatus::Pending) | Some(TaskStatus::Ready)
                    )
                })
                .collect();
            dispatch_ids.append(&mut retry_queue);
            dispatch_ids.sort();
            dispatch_ids.dedup();

            if dispatch_ids.is_empty() {
                break;
            }

            let slots = self.config.default_agent_slots.max(1);
            let known_files_snapshot: Vec<String> = known_files.iter().cloned().collect();
            let mut wave_results = Vec::with_capacity(dispatch_ids.len());
            for chunk in dispatch_ids.chunks(slots) {
                let futures = chunk.iter().map(|id| {
                    let task = tasks_by_id.get(id).expect("dispatch id came from tasks_by_id").clone();
                    let attempt = attempts.get(id).copied().unwrap_or(0);
                    self.dispatch_one(task, attempt, &known_files_snapshot)
                });
                let mut results = futures::future::join_all(futures).await;
                wave_results.append(&mut results);
            }

            for result in wave_results {
                let outcome_for_task = result?;
                self.apply_outcome(
                    outcome_for_task,
                    &mut resolver,
                    &mut tasks_by_id,
                    &mut attempts,
                    &mut known_files,
                    &mut retry_queue,
                    &mut outcome,
                )
                .await?;
            }
        }

        Ok(outcome)
    }

    /// Answers a pending blocker and, if it is tied to a task, transitions
    /// that task BLOCKED -> IN_PROGRESS so the next `run` call picks it back
    /// up with the answer folded into its intervention context.
    pub async fn resume_blocked_task(&self, blocker_id: &str, answer: &str) -> Result<()> {
        let blocker = self.blockers.answer(blocker_id, answer).await?;
        let Some(task_id) = blocker.task_id else {
            return Ok(());
        };
        self.persistence
            .update_task_status(&self.project_id, &task_id, TaskStatus::InProgress)
            .await?;
        self.persistence
            .set_intervention_context(
                &self.project_id,
                &task_id,
                serde_json::json!({ "resumed_with_answer": answer, "attempts": 0 }),
            )
            .await?;
        Ok(())
    }

    fn resolve_agent_name(&self, task: &Task) -> Option<String> {
        task.assigned_agent_id
            .clone()
            .or_else(|| self.default_agent_name.clone())
    }

    /// Dispatches one task: resolves its agent, calls the LLM, gathers
    /// evidence, and runs quality gates. Pure with respect to shared state;
    /// callers apply the returned outcome afterward.
    async fn dispatch_one(
        &self,
        task: Task,
        attempt: u32,
        known_files: &[String],
    ) -> Result<DispatchOutcome> {
        let task_id = task.task_number.clone();
        if task.status == TaskStatus::Pending {
            self.persistence
                .update_task_status(&self.project_id, &task_id, TaskStatus::Ready)
                .await?;
        }
        self.persistence
            .update_task_status(&self.project_id, &task_id, TaskStatus::InProgress)
            .await?;

        let agent_name = self.resolve_agent_name(&task).ok_or_else(|| {
            SpiralError::UnknownAgent("no agent assigned and no default configured".to_string())
        })?;
        let agent = self.agents.create_agent(&agent_name, &task_id).await?;

        let category = self.classifier.classify(&task.title, &task.description);

        let mut user_content = format!(
            "Task {}: {}\n\n{}\n\nDependencies: {}",
            task.task_number,
            task.title,
            task.description,
            task.depends_on.join(", ")
        );
        if let Some(ctx) = &task.intervention_context {
            user_content.push_str(&format!("\n\nSupervisor guidance from a previous attempt: {}", ctx));
        }
        if !known_files.is_empty() {
            user_content.push_str(&format!("\n\nFiles already known to exist: {}", known_files.join(", ")));
        }

        let request = CompletionRequest {
            messages: vec![Message::user(user_content)],
            purpose: if attempt > 0 {
                CompletionPurpose::Retry
            } else {
                CompletionPurpose::TaskDispatch
            },
            tools: vec![],
            max_tokens: agent.definition.constraints.max_tokens,
            temperature: agent.definition.constraints.temperature,
            system: Some(agent.definition.system_prompt.clone()),
        };

        let response = match self.llm.complete(request).await {
            Ok(response) => response,
            Err(err) => {
                return Ok(self.handle_dispatch_error(&task_id, attempt, &err));
            }
        };

        self.persistence
            .record_token_usage(TokenUsageRecord {
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
                model: response.model.clone(),
                call_type: "task_dispatch".to_string(),
                session_id: None,
                task_id: Some(task_id.clone()),
                agent_id: Some(agent.id.clone()),
            })
            .await?;

        let files_touched = extract_file_paths(&response.tool_calls);

        let detection = self.language_probe.detect(&self.project_dir).await;
        let Some(candidate) = detection.best else {
            let report = self.gates.run(
                category,
                &GateInputs {
                    source_text: Some(&response.content),
                    file_path: files_touched.first().map(|s| s.as_str()),
                    ..Default::default()
                },
            );
            return Ok(self.outcome_from_gate_report(task_id, report, files_touched));
        };

        let test_outcome = self
            .test_runner
            .run(&self.project_dir, candidate.language, candidate.framework.as_deref())
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(task_id = %task_id, error = %e, "test run failed to execute");
                crate::evidence::TestOutcome::default()
            });

        let skip_violations = self
            .test_runner
            .scan_skip_violations(candidate.language, &response.content);

        let evidence = self.evidence.verify(
            &test_outcome,
            skip_violations,
            candidate.language.as_str(),
            candidate.framework.clone(),
            agent.id.clone(),
            task.description.clone(),
        );

        let report = self.gates.run(
            category,
            &GateInputs {
                evidence: Some(&evidence),
                source_text: Some(&response.content),
                file_path: files_touched.first().map(|s| s.as_str()),
                type_check_passed: None,
                lint_passed: None,
            },
        );

        Ok(self.outcome_from_gate_report(task_id, report, files_touched))
    }

    fn outcome_from_gate_report(
        &self,
        task_id: TaskId,
        report: crate::quality_gates::QualityGateReport,
        files_touched: Vec<String>,
    ) -> DispatchOutcome {
        if report.all_passed {
            DispatchOutcome::Completed {
                task_id,
                files_touched,
            }
        } else {
            DispatchOutcome::Blocked {
                task_id,
                question: report.blocker_message.unwrap_or_else(|| "Quality gates failed".to_string()),
            }
        }
    }

    /// Decides retry-with-intervention vs. a hard blocker for a failed LLM
    /// call (spec.md §4.5): a matched tactical pattern is retried up to
    /// `max_interventions` times before giving up.
    fn handle_dispatch_error(&self, task_id: &str, attempt: u32, err: &SpiralError) -> DispatchOutcome {
        let error_text = err.to_string();
        let (matched, _diagnostics) = self.matcher.match_error_with_diagnostics(Some(&error_text));

        match matched {
            Some(pattern) if attempt < self.config.max_interventions => {
                let existing_files = self
                    .matcher
                    .extract_file_path(&error_text)
                    .into_iter()
                    .collect::<Vec<_>>();
                let context = serde_json::json!({
                    "matched_pattern_id": pattern.id,
                    "strategy": pattern.strategy,
                    "instruction": pattern.description,
                    "existing_files": existing_files,
                    "attempts": attempt + 1,
                });
                DispatchOutcome::Retry {
                    task_id: task_id.to_string(),
                    intervention_context: context,
                }
            }
            Some(_) => DispatchOutcome::Blocked {
                task_id: task_id.to_string(),
                question: format!("Task keeps failing after {} interventions: {}", attempt, error_text),
            },
            None => DispatchOutcome::Blocked {
                task_id: task_id.to_string(),
                question: format!("Unrecognized agent error: {}", error_text),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_outcome(
        &self,
        result: DispatchOutcome,
        resolver: &mut DependencyResolver,
        tasks_by_id: &mut HashMap<TaskId, Task>,
        attempts: &mut HashMap<TaskId, u32>,
        known_files: &mut HashSet<String>,
        retry_queue: &mut Vec<TaskId>,
        outcome: &mut RunOutcome,
    ) -> Result<()> {
        match result {
            DispatchOutcome::Completed { task_id, files_touched } => {
                self.persistence
                    .update_task_status(&self.project_id, &task_id, TaskStatus::Completed)
                    .await?;
                if let Some(task) = tasks_by_id.get_mut(&task_id) {
                    task.status = TaskStatus::Completed;
                }
                known_files.extend(files_touched);
                let newly_ready = resolver.unblock(&task_id);
                for id in newly_ready {
                    if let Some(task) = tasks_by_id.get_mut(&id) {
                        if task.status == TaskStatus::Pending {
                            task.status = TaskStatus::Ready;
                        }
                    }
                }
                outcome.completed.push(task_id);
            }
            DispatchOutcome::Retry {
                task_id,
                intervention_context,
            } => {
                self.persistence
                    .update_task_status(&self.project_id, &task_id, TaskStatus::Failed)
                    .await?;
                self.persistence
                    .update_task_status(&self.project_id, &task_id, TaskStatus::InProgress)
                    .await?;
                self.persistence
                    .set_intervention_context(&self.project_id, &task_id, intervention_context.clone())
                    .await?;
                if let Some(n) = intervention_context.get("attempts").and_then(|v| v.as_u64()) {
                    attempts.insert(task_id.clone(), n as u32);
                }
                if let Some(task) = tasks_by_id.get_mut(&task_id) {
                    task.status = TaskStatus::InProgress;
                    task.intervention_context = Some(intervention_context);
                }
                retry_queue.push(task_id);
            }
            DispatchOutcome::Blocked { task_id, question } => {
                self.persistence
                    .update_task_status(&self.project_id, &task_id, TaskStatus::Blocked)
                    .await?;
                if let Some(task) = tasks_by_id.get_mut(&task_id) {
                    task.status = TaskStatus::Blocked;
                }
                self.blockers
                    .create(&self.project_id, BlockerKind::Sync, question, Some(task_id.clone()), None)
                    .await?;
                outcome.blocked.push(task_id);
            }
        }
        Ok(())
    }
}

/// Scans a completion's tool calls for common file-path argument keys,
/// tracking which paths an agent has touched across a run.
fn extract_file_paths(tool_calls: &[crate::llm_adapter::ToolCall]) -> Vec<String> {
    const KEYS: &[&str] = &["path", "file_path", "filename", "file"];
    let mut paths = Vec::new();
    for call in tool_calls {
        if let Some(obj) = call.input.as_object() {
            for key in KEYS {
                if let Some(value) = obj.get(*key).and_then(|v| v.as_str()) {
                    paths.push(value.to_string());
                }
            }
        }
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_adapter::{CompletionResponse, StopReason, TextStream};
    use crate::models::{AgentDefinition, Maturity, Priority, Task, UncertaintyLevel};
    use crate::persistence::InMemoryPersistenceStore;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::atomic::AtomicU32;

    fn sample_task(project_id: &str, number: &str, title: &str, depends_on: Vec<&str>) -> Task {
        Task {
            project_id: project_id.to_string(),
            task_number: number.to_string(),
            issue_number: "1".to_string(),
            title: title.to_string(),
            description: "do the thing".to_string(),
            status: TaskStatus::Pending,
            depends_on: depends_on.into_iter().map(String::from).collect(),
            can_parallelize: false,
            priority: Priority::Medium,
            estimated_hours: 1.0,
            complexity_score: 1,
            uncertainty_level: UncertaintyLevel::Low,
            intervention_context: None,
            assigned_agent_id: Some("worker".to_string()),
            category: None,
        }
    }

    struct ScriptedAdapter {
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmAdapter for ScriptedAdapter {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CompletionResponse {
                content: "Document describing the design, no branching logic here.".to_string(),
                tool_calls: vec![],
                stop_reason: StopReason::EndTurn,
                model: "test-model".to_string(),
                input_tokens: 10,
                output_tokens: 10,
            })
        }

        async fn stream(&self, request: CompletionRequest) -> Result<TextStream> {
            let response = self.complete(request).await?;
            Ok(Box::pin(stream::iter(vec![Ok(crate::llm_adapter::StreamChunk {
                text: response.content,
                done: true,
            })])))
        }
    }

    async fn registry_with_worker() -> AgentRegistry {
        let registry = AgentRegistry::new();
        registry
            .register(AgentDefinition {
                name: "worker".to_string(),
                agent_type: "software_developer".to_string(),
                maturity: Maturity::D2,
                system_prompt: "You write small design documents.".to_string(),
                description: None,
                capabilities: vec![],
                tools: vec![],
                constraints: Default::default(),
                metadata: Default::default(),
            })
            .await
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn design_task_completes_through_code_review_only() {
        let persistence = Arc::new(InMemoryPersistenceStore::new());
        let project = persistence.create_project("demo").await.unwrap();
        persistence
            .create_task_with_issue(sample_task(&project.id, "1.1", "Design the schema", vec![]))
            .await
            .unwrap();

        let llm = Arc::new(ScriptedAdapter {
            calls: AtomicU32::new(0),
        });
        let registry = registry_with_worker().await;

        let supervisor = SupervisorLoop::new(
            project.id.clone(),
            persistence.clone(),
            llm,
            registry,
            SupervisorConfig::default(),
            std::env::temp_dir(),
        );

        let outcome = supervisor.run().await.unwrap();
        assert_eq!(outcome.completed, vec!["1.1".to_string()]);
        assert!(outcome.blocked.is_empty());

        let tasks = persistence.list_tasks_by_project(&project.id, None).await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn dependency_chain_dispatches_in_order() {
        let persistence = Arc::new(InMemoryPersistenceStore::new());
        let project = persistence.create_project("demo").await.unwrap();
        persistence
            .create_task_with_issue(sample_task(&project.id, "1.1", "Design the plan", vec![]))
            .await
            .unwrap();
        persistence
            .create_task_with_issue(sample_task(&project.id, "1.2", "Design the follow-up", vec!["1.1"]))
            .await
            .unwrap();

        let llm = Arc::new(ScriptedAdapter {
            calls: AtomicU32::new(0),
        });
        let registry = registry_with_worker().await;
        let supervisor = SupervisorLoop::new(
            project.id.clone(),
            persistence.clone(),
            llm,
            registry,
            SupervisorConfig::default(),
            std::env::temp_dir(),
        );

        let outcome = supervisor.run().await.unwrap();
        assert_eq!(outcome.completed.len(), 2);
        assert!(outcome.completed.contains(&"1.1".to_string()));
        assert!(outcome.completed.contains(&"1.2".to_string()));
    }

    struct AlwaysFailsAdapter;

    #[async_trait]
    impl LlmAdapter for AlwaysFailsAdapter {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            Err(SpiralError::TaskExecution {
                task_id: "x".to_string(),
                message: "FileExistsError: File already exists: src/a.rs".to_string(),
            })
        }

        async fn stream(&self, _request: CompletionRequest) -> Result<TextStream> {
            Err(SpiralError::TaskExecution {
                task_id: "x".to_string(),
                message: "unused".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn repeated_matched_failures_eventually_raise_a_blocker() {
        let persistence = Arc::new(InMemoryPersistenceStore::new());
        let project = persistence.create_project("demo").await.unwrap();
        persistence
            .create_task_with_issue(sample_task(&project.id, "1.1", "Implement the writer", vec![]))
            .await
            .unwrap();

        let llm = Arc::new(AlwaysFailsAdapter);
        let registry = registry_with_worker().await;
        let supervisor = SupervisorLoop::new(
            project.id.clone(),
            persistence.clone(),
            llm,
            registry,
            SupervisorConfig::default(),
            std::env::temp_dir(),
        );

        let outcome = supervisor.run().await.unwrap();
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.blocked, vec!["1.1".to_string()]);

        let (pending, _) = supervisor.blockers.list(&project.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, BlockerKind::Sync);
    }

    #[tokio::test]
    async fn unknown_agent_surfaces_as_error() {
        let persistence = Arc::new(InMemoryPersistenceStore::new());
        let project = persistence.create_project("demo").await.unwrap();
        let mut task = sample_task(&project.id, "1.1", "Design the plan", vec![]);
        task.assigned_agent_id = Some("ghost".to_string());
        persistence.create_task_with_issue(task).await.unwrap();

        let llm = Arc::new(ScriptedAdapter {
            calls: AtomicU32::new(0),
        });
        let registry = AgentRegistry::new();
        let supervisor = SupervisorLoop::new(
            project.id.clone(),
            persistence.clone(),
            llm,
            registry,
            SupervisorConfig::default(),
            std::env::temp_dir(),
        );

        let err = supervisor.run().await.unwrap_err();
        assert!(matches!(err, SpiralError::UnknownAgent(_)));
    }

    #[test]
    fn extract_file_paths_reads_common_keys() {
        let calls = vec![crate::llm_adapter::ToolCall {
            id: "1".to_string(),
            name: "write_file".to_string(),
            input: serde_json::json!({"path": "src/lib.rs"}),
        }];
        assert_eq!(extract_file_paths(&calls), vec!["src/lib.rs".to_string()]);
    }
}
