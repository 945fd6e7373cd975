//! Wave-by-wave greedy list scheduling over a built [`DependencyResolver`].

use crate::dependency_resolver::DependencyResolver;
use crate::models::{ScheduleResult, TaskAssignment, TaskId, TaskStatus, TimelineEvent, TimelineEventKind};
use std::collections::HashMap;

/// Fixed uncertainty band applied to completion-date predictions (±20%).
const UNCERTAINTY_FACTOR: f64 = 0.2;
/// A task whose duration exceeds this multiple of the average is flagged as
/// a duration bottleneck.
const DURATION_BOTTLENECK_MULTIPLE: f64 = 2.0;
/// A task with at least this many dependents on the critical path is
/// flagged as a dependency bottleneck.
const DEPENDENTS_BOTTLENECK_THRESHOLD: usize = 3;

pub struct TaskScheduler;

#[derive(Debug, Clone)]
pub struct ScheduleOptimization {
    pub optimized_schedule: ScheduleResult,
    pub improvement_percentage: f64,
    pub changes_made: Vec<String>,
    pub original_duration: f64,
    pub optimized_duration: f64,
}

#[derive(Debug, Clone)]
pub struct CompletionPrediction {
    pub predicted_days: f64,
    pub early_days: f64,
    pub late_days: f64,
    pub remaining_hours: f64,
    pub completed_percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BottleneckKind {
    Duration,
    Dependencies,
}

#[derive(Debug, Clone)]
pub struct BottleneckInfo {
    pub task_id: TaskId,
    pub kind: BottleneckKind,
    pub impact_hours: f64,
    pub recommendation: String,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        TaskScheduler
    }

    /// Greedy wave-by-wave list scheduling: within a wave, longest-duration
    /// tasks pack first; each task is assigned to the slot minimizing
    /// `max(earliest_start, slot_end_time)`, with ties broken toward the
    /// lowest-indexed slot.
    pub fn schedule_tasks(
        &self,
        resolver: &DependencyResolver,
        durations: &HashMap<TaskId, f64>,
        agents_available: usize,
    ) -> ScheduleResult {
        let agents_available = agents_available.max(1);
        let waves = resolver.parallel_waves();

        let mut assignments: HashMap<TaskId, TaskAssignment> = HashMap::new();
        let mut timeline: Vec<TimelineEvent> = Vec::new();
        let mut agent_end_times = vec![0.0_f64; agents_available];

        for wave in &waves {
            let mut wave_tasks: Vec<&TaskId> = wave.iter().collect();
            wave_tasks.sort_by(|a, b| {
                let da = durations.get(*a).copied().unwrap_or(0.0);
                let db = durations.get(*b).copied().unwrap_or(0.0);
                db.partial_cmp(&da).unwrap()
            });

            for task_id in wave_tasks {
                let duration = durations.get(task_id).copied().unwrap_or(0.0);

                let earliest_start = resolver
                    .dependencies_of(task_id)
                    .into_iter()
                    .filter_map(|dep| assignments.get(&dep).map(|a| a.end_time))
                    .fold(0.0_f64, f64::max);

                let mut best_agent = 0;
                let mut best_start = earliest_start.max(agent_end_times[0]);
                for (idx, &agent_end) in agent_end_times.iter().enumerate() {
                    let potential_start = earliest_start.max(agent_end);
                    if potential_start < best_start {
                        best_start = potential_start;
                        best_agent = idx;
                    }
                }

                let end_time = best_start + duration;
                assignments.insert(
                    task_id.clone(),
                    TaskAssignment {
                        task_id: task_id.clone(),
                        start_time: best_start,
                        end_time,
                        assigned_agent_slot: best_agent,
                    },
                );
                agent_end_times[best_agent] = end_time;

                timeline.push(TimelineEvent {
                    task_id: task_id.clone(),
                    time: best_start,
                    kind: TimelineEventKind::Start,
                });
                timeline.push(TimelineEvent {
                    task_id: task_id.clone(),
                    time: end_time,
                    kind: TimelineEventKind::End,
                });
            }
        }

        timeline.sort_by(|a, b| {
            a.time.partial_cmp(&b.time).unwrap().then_with(|| {
                let a_rank = if a.kind == TimelineEventKind::Start { 0 } else { 1 };
                let b_rank = if b.kind == TimelineEventKind::Start { 0 } else { 1 };
                a_rank.cmp(&b_rank)
            })
        });

        let total_duration = assignments
            .values()
            .map(|a| a.end_time)
            .fold(0.0_f64, f64::max);

        ScheduleResult {
            assignments,
            total_duration,
            timeline,
            agent_count: agents_available,
        }
    }

    /// Re-runs the scheduler with more agent slots if `max_parallel` exceeds
    /// the current schedule's agent count; otherwise reports no improvement.
    pub fn optimize_schedule(
        &self,
        schedule: &ScheduleResult,
        resolver: &DependencyResolver,
        max_parallel: usize,
    ) -> ScheduleOptimization {
        let original_duration = schedule.total_duration;

        if max_parallel > schedule.agent_count {
            let durations: HashMap<TaskId, f64> = schedule
                .assignments
                .iter()
                .map(|(id, a)| (id.clone(), a.end_time - a.start_time))
                .collect();

            let optimized = self.schedule_tasks(resolver, &durations, max_parallel);

            let mut changes_made = Vec::new();
            if optimized.total_duration < original_duration {
                changes_made.push(format!(
                    "Increased parallelization from {} to {} agents",
                    schedule.agent_count, max_parallel
                ));
            }

            let improvement = if original_duration > 0.0 {
                (original_duration - optimized.total_duration) / original_duration * 100.0
            } else {
                0.0
            };

            return ScheduleOptimization {
                optimized_duration: optimized.total_duration,
                optimized_schedule: optimized,
                improvement_percentage: improvement,
                changes_made,
                original_duration,
            };
        }

        ScheduleOptimization {
            optimized_schedule: schedule.clone(),
            improvement_percentage: 0.0,
            changes_made: vec!["No optimizations found".to_string()],
            original_duration,
            optimized_duration: original_duration,
        }
    }

    /// Estimates remaining working days and a ±20% confidence band from a
    /// schedule, a progress map, and working hours per day.
    pub fn predict_completion(
        &self,
        schedule: &ScheduleResult,
        progress: &HashMap<TaskId, TaskStatus>,
        hours_per_day: f64,
    ) -> CompletionPrediction {
        let total_hours = schedule.total_duration;
        let completed_hours: f64 = progress
            .iter()
            .filter(|(_, status)| **status == TaskStatus::Completed)
            .filter_map(|(task_id, _)| schedule.assignments.get(task_id))
            .map(|a| a.end_time - a.start_time)
            .sum();

        let remaining_hours = (total_hours - completed_hours).max(0.0);
        let completed_percentage = if total_hours > 0.0 {
            completed_hours / total_hours * 100.0
        } else {
            100.0
        };

        let days_needed = remaining_hours / hours_per_day;
        CompletionPrediction {
            predicted_days: days_needed,
            early_days: days_needed * (1.0 - UNCERTAINTY_FACTOR),
            late_days: days_needed * (1.0 + UNCERTAINTY_FACTOR),
            remaining_hours,
            completed_percentage,
        }
    }

    /// A task with duration > 2x average on the critical path is a duration
    /// bottleneck; any task with >=3 dependents on the critical path is a
    /// dependencies bottleneck. Both checks are independent.
    pub fn identify_bottlenecks(
        &self,
        resolver: &DependencyResolver,
        durations: &HashMap<TaskId, f64>,
    ) -> Vec<BottleneckInfo> {
        let mut bottlenecks = Vec::new();
        let critical_path = match resolver.critical_path(durations) {
            Some(r) => r,
            None => return bottlenecks,
        };
        let critical: std::collections::HashSet<TaskId> =
            critical_path.critical_task_ids.iter().cloned().collect();

        let avg_duration = if durations.is_empty() {
            0.0
        } else {
            durations.values().sum::<f64>() / durations.len() as f64
        };
        let threshold = avg_duration * DURATION_BOTTLENECK_MULTIPLE;

        let mut critical_sorted: Vec<&TaskId> = critical.iter().collect();
        critical_sorted.sort();
        for task_id in critical_sorted {
            let duration = durations.get(task_id).copied().unwrap_or(0.0);
            if duration > threshold {
                let dependent_count = resolver.dependents_of(task_id).len();
                bottlenecks.push(BottleneckInfo {
                    task_id: task_id.clone(),
                    kind: BottleneckKind::Duration,
                    impact_hours: duration - avg_duration,
                    recommendation: format!(
                        "Task {} takes {:.1}h ({}x average). Consider splitting into smaller tasks. Blocks {} downstream tasks.",
                        task_id, duration, DURATION_BOTTLENECK_MULTIPLE as u32, dependent_count
                    ),
                });
            }
        }

        for task_id in critical_sorted_all(resolver) {
            if !critical.contains(&task_id) {
                continue;
            }
            let dependent_count = resolver.dependents_of(&task_id).len();
            if dependent_count >= DEPENDENTS_BOTTLENECK_THRESHOLD {
                let duration = durations.get(&task_id).copied().unwrap_or(0.0);
                let impact = duration * (dependent_count as f64 - 1.0);
                bottlenecks.push(BottleneckInfo {
                    task_id: task_id.clone(),
                    kind: BottleneckKind::Dependencies,
                    impact_hours: impact,
                    recommendation: format!(
                        "Task {} blocks {} tasks. Prioritize this task or consider parallelizing dependents.",
                        task_id, dependent_count
                    ),
                });
            }
        }

        bottlenecks
    }
}

fn critical_sorted_all(resolver: &DependencyResolver) -> Vec<TaskId> {
    let mut all: Vec<TaskId> = resolver.parallel_waves().into_iter().flatten().collect();
    all.sort();
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Task, UncertaintyLevel};

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

    fn diamond() -> (DependencyResolver, HashMap<TaskId, f64>) {
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
        (resolver, durations)
    }

    #[test]
    fn two_agent_speedup() {
        let (resolver, durations) = diamond();
        let scheduler = TaskScheduler::new();

        let one_agent = scheduler.schedule_tasks(&resolver, &durations, 1);
        let two_agents = scheduler.schedule_tasks(&resolver, &durations, 2);

        assert_eq!(two_agents.total_duration, 7.0);
        assert_eq!(one_agent.total_duration, 8.0);
    }

    #[test]
    fn more_slots_never_increases_duration() {
        let (resolver, durations) = diamond();
        let scheduler = TaskScheduler::new();
        let mut previous = scheduler.schedule_tasks(&resolver, &durations, 1).total_duration;
        for slots in 2..=4 {
            let current = scheduler.schedule_tasks(&resolver, &durations, slots).total_duration;
            assert!(current <= previous);
            previous = current;
        }
    }
}
