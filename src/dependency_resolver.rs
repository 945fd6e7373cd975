//! DAG-based task dependency resolution.
//!
//! Owns the project task graph and answers: what is ready now, what becomes
//! ready when a task completes, is adding an edge safe, what is the critical
//! path, how much slack does each task have, which tasks can run in
//! parallel, and which tasks are bottlenecks.

use crate::models::TaskId;
use crate::{Result, SpiralError};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct TaskTimings {
    pub earliest_start: f64,
    pub earliest_finish: f64,
    pub latest_start: f64,
    pub latest_finish: f64,
}

#[derive(Debug, Clone)]
pub struct CriticalPathResult {
    pub critical_task_ids: Vec<TaskId>,
    pub total_duration: f64,
    pub task_timings: HashMap<TaskId, TaskTimings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSeverity {
    Critical,
    High,
    Medium,
}

#[derive(Debug, Clone)]
pub struct DependencyConflict {
    pub task_id: TaskId,
    pub kind: &'static str,
    pub severity: ConflictSeverity,
    pub recommendation: String,
}

/// DAG-based dependency resolver for task coordination.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    dependencies: HashMap<TaskId, HashSet<TaskId>>,
    dependents: HashMap<TaskId, HashSet<TaskId>>,
    completed_tasks: HashSet<TaskId>,
    all_tasks: HashSet<TaskId>,
}

/// Parses a `depends_on` string as either a bracketed JSON array (`[1, 2]`)
/// or a comma-separated list (`1,2`). Malformed input returns an empty list;
/// the caller logs a warning.
pub fn parse_depends_on(raw: &str) -> Vec<TaskId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        match serde_json::from_str::<Vec<serde_json::Value>>(trimmed) {
            Ok(values) => values
                .into_iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            Err(_) => {
                tracing::warn!("Invalid JSON in depends_on: {}", trimmed);
                Vec::new()
            }
        }
    } else {
        trimmed
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every task, parses `depends_on`, rejects self-loops and
    /// cycles, and warns (without failing) on edges to unknown tasks.
    pub fn build(&mut self, tasks: &[crate::models::Task]) -> Result<()> {
        self.dependencies.clear();
        self.dependents.clear();
        self.completed_tasks.clear();
        self.all_tasks.clear();

        for task in tasks {
            self.all_tasks.insert(task.task_number.clone());
            if task.status == crate::models::TaskStatus::Completed {
                self.completed_tasks.insert(task.task_number.clone());
            }
        }

        for task in tasks {
            let task_id = &task.task_number;
            for dep_id in &task.depends_on {
                if dep_id == task_id {
                    return Err(SpiralError::Validation(format!(
                        "Task {} cannot depend on itself (self-dependency)",
                        task_id
                    )));
                }
                if !self.all_tasks.contains(dep_id) {
                    tracing::warn!(
                        "Task {} depends on unknown task {}. Dependency tracked; may permanently block the dependent.",
                        task_id, dep_id
                    );
                }
                self.dependencies
                    .entry(task_id.clone())
                    .or_default()
                    .insert(dep_id.clone());
                self.dependents
                    .entry(dep_id.clone())
                    .or_default()
                    .insert(task_id.clone());
            }
        }

        if let Some(cycle) = self.find_cycle() {
            return Err(SpiralError::CycleDetected(cycle));
        }

        tracing::info!(
            "Built dependency graph: {} tasks, {} dependencies",
            self.all_tasks.len(),
            self.dependencies.values().map(|d| d.len()).sum::<usize>()
        );
        Ok(())
    }

    /// Sorted list of task ids whose dependency set is a subset of the
    /// completed set.
    pub fn ready(&self, exclude_completed: bool) -> Vec<TaskId> {
        let mut ready: Vec<TaskId> = self
            .all_tasks
            .iter()
            .filter(|task_id| !(exclude_completed && self.completed_tasks.contains(*task_id)))
            .filter(|task_id| {
                self.dependencies
                    .get(*task_id)
                    .map(|deps| deps.is_subset(&self.completed_tasks))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        ready.sort();
        ready
    }

    /// Marks `task_id` completed; returns the sorted newly-ready subset of
    /// its direct dependents. Idempotent: a repeat call yields an empty set.
    pub fn unblock(&mut self, task_id: &str) -> Vec<TaskId> {
        if !self.completed_tasks.insert(task_id.to_string()) {
            return Vec::new();
        }

        let dependents = self.dependents.get(task_id).cloned().unwrap_or_default();
        let mut unblocked: Vec<TaskId> = dependents
            .into_iter()
            .filter(|dep_id| {
                self.dependencies
                    .get(dep_id)
                    .map(|deps| deps.is_subset(&self.completed_tasks))
                    .unwrap_or(true)
            })
            .collect();
        unblocked.sort();
        unblocked
    }

    /// True iff adding edge (u depends on v) would not create a cycle.
    /// Self-edges raise; other invalid edges return false.
    pub fn valid_edge(&mut self, u: &str, v: &str) -> Result<bool> {
        if u == v {
            return Err(SpiralError::Validation(format!(
                "Task {} cannot depend on itself (self-dependency)",
                u
            )));
        }

        self.dependencies
            .entry(u.to_string())
            .or_default()
            .insert(v.to_string());
        self.dependents
            .entry(v.to_string())
            .or_default()
            .insert(u.to_string());

        let has_cycle = self.find_cycle().is_some();

        if let Some(deps) = self.dependencies.get_mut(u) {
            deps.remove(v);
        }
        if let Some(deps) = self.dependents.get_mut(v) {
            deps.remove(u);
        }

        if has_cycle {
            tracing::warn!("Cannot add dependency: {} -> {} would create a cycle", u, v);
        }
        Ok(!has_cycle)
    }

    /// Kahn's algorithm; returns `None` if the graph is cyclic.
    pub fn topological_order(&self) -> Option<Vec<TaskId>> {
        let mut in_degree: HashMap<TaskId, usize> = self
            .all_tasks
            .iter()
            .map(|t| (t.clone(), self.dependencies.get(t).map_or(0, |d| d.len())))
            .collect();

        let mut queue: VecDeque<TaskId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(t, _)| t.clone())
            .collect();
        let mut ordered: Vec<TaskId> = queue.iter().cloned().collect();
        ordered.sort();
        let mut queue: VecDeque<TaskId> = ordered.into();

        let mut result = Vec::new();
        while let Some(task_id) = queue.pop_front() {
            result.push(task_id.clone());
            if let Some(dependents) = self.dependents.get(&task_id) {
                let mut ready_now: Vec<TaskId> = Vec::new();
                for dependent in dependents {
                    if let Some(deg) = in_degree.get_mut(dependent) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready_now.push(dependent.clone());
                        }
                    }
                }
                ready_now.sort();
                for t in ready_now {
                    queue.push_back(t);
                }
            }
        }

        if result.len() == self.all_tasks.len() {
            Some(result)
        } else {
            tracing::error!("Cannot perform topological sort: cycle detected");
            None
        }
    }

    /// Forward pass for earliest start/finish, backward pass for latest
    /// start/finish from the project end. A task is critical iff slack == 0.
    pub fn critical_path(&self, durations: &HashMap<TaskId, f64>) -> Option<CriticalPathResult> {
        let order = self.topological_order()?;
        let duration_of = |id: &str| *durations.get(id).unwrap_or(&0.0);

        let mut earliest_start: HashMap<TaskId, f64> = HashMap::new();
        let mut earliest_finish: HashMap<TaskId, f64> = HashMap::new();
        for task_id in &order {
            let es = self
                .dependencies
                .get(task_id)
                .map(|deps| {
                    deps.iter()
                        .map(|d| *earliest_finish.get(d).unwrap_or(&0.0))
                        .fold(0.0_f64, f64::max)
                })
                .unwrap_or(0.0);
            let ef = es + duration_of(task_id);
            earliest_start.insert(task_id.clone(), es);
            earliest_finish.insert(task_id.clone(), ef);
        }

        let total_duration = earliest_finish
            .values()
            .cloned()
            .fold(0.0_f64, f64::max);

        let mut latest_finish: HashMap<TaskId, f64> = HashMap::new();
        let mut latest_start: HashMap<TaskId, f64> = HashMap::new();
        for task_id in order.iter().rev() {
            let lf = self
                .dependents
                .get(task_id)
                .map(|deps| {
                    deps.iter()
                        .map(|d| *latest_start.get(d).unwrap_or(&total_duration))
                        .fold(total_duration, f64::min)
                })
                .unwrap_or(total_duration);
            let ls = lf - duration_of(task_id);
            latest_finish.insert(task_id.clone(), lf);
            latest_start.insert(task_id.clone(), ls);
        }

        let mut task_timings = HashMap::new();
        let mut critical_task_ids = Vec::new();
        for task_id in &order {
            let es = *earliest_start.get(task_id).unwrap();
            let ef = *earliest_finish.get(task_id).unwrap();
            let ls = *latest_start.get(task_id).unwrap();
            let lf = *latest_finish.get(task_id).unwrap();
            if (ls - es).abs() < 1e-9 {
                critical_task_ids.push(task_id.clone());
            }
            task_timings.insert(
                task_id.clone(),
                TaskTimings {
                    earliest_start: es,
                    earliest_finish: ef,
                    latest_start: ls,
                    latest_finish: lf,
                },
            );
        }
        critical_task_ids.sort();

        Some(CriticalPathResult {
            critical_task_ids,
            total_duration,
            task_timings,
        })
    }

    /// Map task_id -> latest_start - earliest_start.
    pub fn slack(&self, durations: &HashMap<TaskId, f64>) -> HashMap<TaskId, f64> {
        match self.critical_path(durations) {
            Some(result) => result
                .task_timings
                .into_iter()
                .map(|(id, t)| (id, t.latest_start - t.earliest_start))
                .collect(),
            None => HashMap::new(),
        }
    }

    /// Partitions tasks into waves: wave\[k\] = tasks whose longest
    /// dependency chain from a root has length k.
    pub fn parallel_waves(&self) -> Vec<Vec<TaskId>> {
        let mut depths: HashMap<TaskId, usize> = HashMap::new();
        for task_id in &self.all_tasks {
            depths.insert(task_id.clone(), self.get_dependency_depth(task_id));
        }
        let max_depth = depths.values().cloned().max().unwrap_or(0);
        let mut waves = vec![Vec::new(); max_depth + 1];
        for (task_id, depth) in depths {
            waves[depth].push(task_id);
        }
        for wave in &mut waves {
            wave.sort();
        }
        waves
    }

    /// Maximum dependency chain depth for a task (0 for no dependencies).
    pub fn get_dependency_depth(&self, task_id: &str) -> usize {
        if !self.all_tasks.contains(task_id) {
            return 0;
        }
        match self.dependencies.get(task_id) {
            None => 0,
            Some(deps) if deps.is_empty() => 0,
            Some(deps) => deps
                .iter()
                .map(|d| 1 + self.get_dependency_depth(d))
                .max()
                .unwrap_or(0),
        }
    }

    /// Sorted list of task ids that `task_id` depends on.
    pub fn dependencies_of(&self, task_id: &str) -> Vec<TaskId> {
        let mut deps: Vec<TaskId> = self
            .dependencies
            .get(task_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        deps.sort();
        deps
    }

    /// Sorted list of task ids that depend on `task_id`.
    pub fn dependents_of(&self, task_id: &str) -> Vec<TaskId> {
        let mut deps: Vec<TaskId> = self
            .dependents
            .get(task_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        deps.sort();
        deps
    }

    /// Map task -> sorted list of incomplete dependency ids.
    pub fn get_blocked_tasks(&self) -> HashMap<TaskId, Vec<TaskId>> {
        let mut blocked = HashMap::new();
        for task_id in &self.all_tasks {
            if self.completed_tasks.contains(task_id) {
                continue;
            }
            if let Some(deps) = self.dependencies.get(task_id) {
                let mut incomplete: Vec<TaskId> = deps
                    .difference(&self.completed_tasks)
                    .cloned()
                    .collect();
                if !incomplete.is_empty() {
                    incomplete.sort();
                    blocked.insert(task_id.clone(), incomplete);
                }
            }
        }
        blocked
    }

    /// Flags (a) tasks with too many dependents on the critical path
    /// ("bottleneck"), and (b) chains longer than 5 nodes ("long_chain").
    pub fn detect_conflicts(&self, durations: &HashMap<TaskId, f64>) -> Vec<DependencyConflict> {
        let mut conflicts = Vec::new();
        let critical: HashSet<TaskId> = self
            .critical_path(durations)
            .map(|r| r.critical_task_ids.into_iter().collect())
            .unwrap_or_default();

        for task_id in &self.all_tasks {
            if !critical.contains(task_id) {
                continue;
            }
            let dependent_count = self.dependents.get(task_id).map_or(0, |d| d.len());
            if dependent_count >= 3 {
                conflicts.push(DependencyConflict {
                    task_id: task_id.clone(),
                    kind: "bottleneck",
                    severity: if dependent_count >= 5 {
                        ConflictSeverity::Critical
                    } else {
                        ConflictSeverity::High
                    },
                    recommendation: format!(
                        "Task {} blocks {} dependents; prioritise or parallelise its predecessors",
                        task_id, dependent_count
                    ),
                });
            }

            let depth = self.get_dependency_depth(task_id);
            if depth > 5 {
                conflicts.push(DependencyConflict {
                    task_id: task_id.clone(),
                    kind: "long_chain",
                    severity: ConflictSeverity::Medium,
                    recommendation: format!(
                        "Task {} sits {} levels deep in a dependency chain; consider splitting the chain",
                        task_id, depth
                    ),
                });
            }
        }
        conflicts
    }

    pub fn clear(&mut self) {
        self.dependencies.clear();
        self.dependents.clear();
        self.completed_tasks.clear();
        self.all_tasks.clear();
    }

    fn find_cycle(&self) -> Option<String> {
        let mut visited: HashSet<TaskId> = HashSet::new();
        let mut rec_stack: Vec<TaskId> = Vec::new();
        let mut rec_set: HashSet<TaskId> = HashSet::new();

        let mut sorted_tasks: Vec<TaskId> = self.all_tasks.iter().cloned().collect();
        sorted_tasks.sort();

        for task_id in &sorted_tasks {
            if !visited.contains(task_id) {
                if let Some(cycle) = self.find_cycle_from(
                    task_id,
                    &mut visited,
                    &mut rec_stack,
                    &mut rec_set,
                ) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn find_cycle_from(
        &self,
        node: &str,
        visited: &mut HashSet<TaskId>,
        rec_stack: &mut Vec<TaskId>,
        rec_set: &mut HashSet<TaskId>,
    ) -> Option<String> {
        visited.insert(node.to_string());
        rec_stack.push(node.to_string());
        rec_set.insert(node.to_string());

        if let Some(deps) = self.dependencies.get(node) {
            let mut deps: Vec<&TaskId> = deps.iter().collect();
            deps.sort();
            for dep in deps {
                if !visited.contains(dep) {
                    if let Some(cycle) = self.find_cycle_from(dep, visited, rec_stack, rec_set) {
                        return Some(cycle);
                    }
                } else if rec_set.contains(dep) {
                    let start = rec_stack.iter().position(|x| x == dep).unwrap();
                    let mut cycle: Vec<TaskId> = rec_stack[start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle.join(" \u{2192} "));
                }
            }
        }

        rec_stack.pop();
        rec_set.remove(node);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Task, TaskStatus, UncertaintyLevel};

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            project_id: "p".into(),
            task_number: id.into(),
            issue_number: "1".into(),
            title: id.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
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

    #[test]
    fn linear_chain_topological_order() {
        let mut resolver = DependencyResolver::new();
        let tasks = vec![
            task("1", &[]),
            task("2", &["1"]),
            task("3", &["2"]),
            task("4", &["3"]),
        ];
        resolver.build(&tasks).unwrap();
        assert_eq!(
            resolver.topological_order(),
            Some(vec!["1".into(), "2".into(), "3".into(), "4".into()])
        );
    }

    #[test]
    fn cycle_is_rejected() {
        let mut resolver = DependencyResolver::new();
        let tasks = vec![task("1", &["3"]), task("2", &["1"]), task("3", &["2"])];
        let err = resolver.build(&tasks).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("1") && msg.contains("2") && msg.contains("3"));
    }

    #[test]
    fn diamond_critical_path() {
        let mut resolver = DependencyResolver::new();
        let tasks = vec![
            task("A", &[]),
            task("B", &["A"]),
            task("C", &["A"]),
            task("D", &["B", "C"]),
        ];
        resolver.build(&tasks).unwrap();
        let durations: HashMap<TaskId, f64> = [
            ("A".to_string(), 2.0),
            ("B".to_string(), 3.0),
            ("C".to_string(), 1.0),
            ("D".to_string(), 2.0),
        ]
        .into_iter()
        .collect();

        let result = resolver.critical_path(&durations).unwrap();
        assert_eq!(result.total_duration, 7.0);
        let mut critical = result.critical_task_ids.clone();
        critical.sort();
        assert_eq!(critical, vec!["A", "B", "D"]);

        let slack = resolver.slack(&durations);
        assert_eq!(slack["A"], 0.0);
        assert_eq!(slack["B"], 0.0);
        assert_eq!(slack["C"], 2.0);
        assert_eq!(slack["D"], 0.0);
    }

    #[test]
    fn ready_and_unblock() {
        let mut resolver = DependencyResolver::new();
        let tasks = vec![task("1", &[]), task("2", &["1"])];
        resolver.build(&tasks).unwrap();
        assert_eq!(resolver.ready(true), vec!["1".to_string()]);

        let unblocked = resolver.unblock("1");
        assert_eq!(unblocked, vec!["2".to_string()]);

        // idempotent: unblocking again yields nothing new
        assert_eq!(resolver.unblock("1"), Vec::<TaskId>::new());
    }

    #[test]
    fn self_dependency_rejected() {
        let mut resolver = DependencyResolver::new();
        let tasks = vec![task("1", &["1"])];
        assert!(resolver.build(&tasks).is_err());
    }

    #[test]
    fn parse_depends_on_accepts_both_forms() {
        assert_eq!(parse_depends_on("[1, 2]"), vec!["1", "2"]);
        assert_eq!(parse_depends_on("1,2"), vec!["1", "2"]);
        assert_eq!(parse_depends_on(""), Vec::<String>::new());
    }
}
