//! Task dependency graph
//!
//! Holds every tracked task together with its dependency edges and decides
//! when a task becomes eligible for assignment. Every insertion is validated
//! with a full topological sort (Kahn's algorithm) before anything is
//! committed, so a rejected call leaves the graph exactly as it was.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DelegationError, Result};
use crate::types::{AgentId, Capabilities, TaskId, TaskRequest, TaskStatus, TaskStatusView};

/// A unit of work tracked by the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Opaque to the scheduler
    pub description: String,
    pub required_capabilities: Capabilities,
    /// Lower is more urgent
    pub priority: i32,
    pub dependencies: Vec<TaskId>,
    pub status: TaskStatus,
    /// Set only while `status == Assigned`
    pub assigned_agent: Option<AgentId>,
    pub task_type: Option<String>,
    pub parent_agent: Option<AgentId>,
    /// Agent that completed or failed the task
    pub executed_by: Option<AgentId>,
    pub result: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Creation order, used to break priority ties
    pub seq: u64,
}

impl Task {
    /// Create a task with default priority 5 and no requirements
    pub fn new(id: TaskId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            required_capabilities: Capabilities::new(),
            priority: 5,
            dependencies: Vec::new(),
            status: TaskStatus::Pending,
            assigned_agent: None,
            task_type: None,
            parent_agent: None,
            executed_by: None,
            result: None,
            failure_reason: None,
            created_at: Utc::now(),
            assigned_at: None,
            finished_at: None,
            seq: 0,
        }
    }

    pub(crate) fn from_request(request: TaskRequest, default_priority: i32) -> Self {
        let TaskRequest {
            id,
            description,
            required_capabilities,
            priority,
            dependencies,
            task_type,
            parent_agent,
        } = request;

        let mut task = Task::new(id.unwrap_or_default(), description);
        task.required_capabilities = required_capabilities;
        task.priority = priority.unwrap_or(default_priority);
        task.dependencies = dependencies;
        task.task_type = task_type;
        task.parent_agent = parent_agent;
        task
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_capabilities(mut self, required: Capabilities) -> Self {
        self.required_capabilities = required;
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    pub fn status_view(&self) -> TaskStatusView {
        TaskStatusView {
            status: self.status,
            assigned_agent: self.assigned_agent,
        }
    }
}

/// Outcome of failing a task: the task itself plus every dependent that
/// failed along with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCascade {
    pub task: TaskId,
    pub reason: String,
    /// Transitive dependents, in the order they were reached
    pub dependents: Vec<TaskId>,
}

/// The task dependency graph
pub struct TaskGraph {
    tasks: HashMap<TaskId, Task>,
    /// Reverse edges: task -> tasks that depend on it
    dependents: HashMap<TaskId, Vec<TaskId>>,
    /// Creation order
    order: Vec<TaskId>,
}

impl TaskGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            dependents: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Insert a task with the dependencies it carries
    ///
    /// Returns the initial status: `Ready` when every dependency is already
    /// completed, `Pending` otherwise, and `Failed` when a dependency has
    /// already failed.
    pub fn add_task(&mut self, mut task: Task) -> Result<TaskStatus> {
        let id = task.id;
        if self.tasks.contains_key(&id) {
            return Err(DelegationError::DuplicateTask(id));
        }

        task.dependencies = dedup(task.dependencies);
        self.validate_edges(id, &task.dependencies, true)?;

        task.seq = self.order.len() as u64;
        task.assigned_agent = None;
        task.status = TaskStatus::Pending;

        let failed_dep = task
            .dependencies
            .iter()
            .find(|dep| self.status_of(dep) == Some(TaskStatus::Failed))
            .copied();

        if let Some(dep) = failed_dep {
            task.status = TaskStatus::Failed;
            task.failure_reason = Some(format!("dependency {} failed", dep));
            task.finished_at = Some(Utc::now());
            warn!(task_id = %id, dependency = %dep, "Task added behind a failed dependency");
        } else if self.dependencies_completed(&task.dependencies) {
            task.status = TaskStatus::Ready;
        }

        for dep in &task.dependencies {
            self.dependents.entry(*dep).or_default().push(id);
        }

        let status = task.status;
        debug!(
            task_id = %id,
            dependencies = task.dependencies.len(),
            status = %status,
            "Task added to graph"
        );

        self.order.push(id);
        self.tasks.insert(id, task);
        Ok(status)
    }

    /// Add dependency edges to a task that has not started
    ///
    /// A ready task falls back to pending if a new dependency is unfinished.
    /// Linking to an already failed task fails this task (and its
    /// dependents), which is reported as the returned cascade.
    pub fn add_dependencies(
        &mut self,
        id: &TaskId,
        deps: impl IntoIterator<Item = TaskId>,
    ) -> Result<Option<FailureCascade>> {
        let status = self.status_of(id).ok_or(DelegationError::UnknownTask(*id))?;
        if !matches!(status, TaskStatus::Pending | TaskStatus::Ready) {
            return Err(DelegationError::InvalidStateTransition {
                task: *id,
                from: status,
                to: TaskStatus::Pending,
            });
        }

        let existing: HashSet<TaskId> = self.tasks[id].dependencies.iter().copied().collect();
        let new_deps: Vec<TaskId> = dedup(deps.into_iter().collect())
            .into_iter()
            .filter(|dep| !existing.contains(dep))
            .collect();
        if new_deps.is_empty() {
            return Ok(None);
        }

        self.validate_edges(*id, &new_deps, false)?;

        for dep in &new_deps {
            self.dependents.entry(*dep).or_default().push(*id);
        }
        let failed_dep = new_deps
            .iter()
            .find(|dep| self.status_of(dep) == Some(TaskStatus::Failed))
            .copied();

        if let Some(task) = self.tasks.get_mut(id) {
            task.dependencies.extend(new_deps.iter().copied());
        }

        if let Some(dep) = failed_dep {
            let cascade = self.fail_cascade(*id, format!("dependency {} failed", dep));
            return Ok(Some(cascade));
        }

        let deps = self.tasks[id].dependencies.clone();
        if !self.dependencies_completed(&deps) {
            if let Some(task) = self.tasks.get_mut(id) {
                task.status = TaskStatus::Pending;
            }
        }

        debug!(task_id = %id, added = new_deps.len(), "Dependencies linked");
        Ok(None)
    }

    /// Bind a ready task to an agent
    pub fn assign(&mut self, id: &TaskId, agent: AgentId) -> Result<()> {
        let task = self.tasks.get_mut(id).ok_or(DelegationError::UnknownTask(*id))?;
        if task.status != TaskStatus::Ready {
            return Err(DelegationError::InvalidStateTransition {
                task: *id,
                from: task.status,
                to: TaskStatus::Assigned,
            });
        }

        task.status = TaskStatus::Assigned;
        task.assigned_agent = Some(agent);
        task.assigned_at = Some(Utc::now());
        Ok(())
    }

    /// Return an assigned task to the ready pool, keeping its priority
    ///
    /// Returns the agent it was bound to.
    pub fn release(&mut self, id: &TaskId) -> Result<AgentId> {
        let task = self.tasks.get_mut(id).ok_or(DelegationError::UnknownTask(*id))?;
        let agent = match (task.status, task.assigned_agent) {
            (TaskStatus::Assigned, Some(agent)) => agent,
            (from, _) => {
                return Err(DelegationError::InvalidStateTransition {
                    task: *id,
                    from,
                    to: TaskStatus::Ready,
                })
            }
        };

        task.status = TaskStatus::Ready;
        task.assigned_agent = None;
        task.assigned_at = None;
        Ok(agent)
    }

    /// Mark an assigned task completed
    ///
    /// Returns the dependents that became ready as a result.
    pub fn mark_completed(&mut self, id: &TaskId, result: Option<String>) -> Result<Vec<TaskId>> {
        let task = self.tasks.get_mut(id).ok_or(DelegationError::UnknownTask(*id))?;
        if task.status != TaskStatus::Assigned {
            return Err(DelegationError::InvalidStateTransition {
                task: *id,
                from: task.status,
                to: TaskStatus::Completed,
            });
        }

        task.status = TaskStatus::Completed;
        task.executed_by = task.assigned_agent.take();
        task.result = result;
        task.finished_at = Some(Utc::now());

        let mut unlocked = Vec::new();
        for dependent in self.dependents.get(id).cloned().unwrap_or_default() {
            let Some(dep_task) = self.tasks.get(&dependent) else {
                continue;
            };
            if dep_task.status != TaskStatus::Pending {
                continue;
            }
            if self.dependencies_completed(&dep_task.dependencies) {
                if let Some(dep_task) = self.tasks.get_mut(&dependent) {
                    dep_task.status = TaskStatus::Ready;
                }
                unlocked.push(dependent);
            }
        }

        info!(task_id = %id, unlocked = unlocked.len(), "Task completed");
        Ok(unlocked)
    }

    /// Mark a task failed, failing every transitive dependent with it
    pub fn mark_failed(&mut self, id: &TaskId, reason: impl Into<String>) -> Result<FailureCascade> {
        let status = self.status_of(id).ok_or(DelegationError::UnknownTask(*id))?;
        if status.is_terminal() {
            return Err(DelegationError::InvalidStateTransition {
                task: *id,
                from: status,
                to: TaskStatus::Failed,
            });
        }

        Ok(self.fail_cascade(*id, reason.into()))
    }

    fn fail_cascade(&mut self, id: TaskId, reason: String) -> FailureCascade {
        let now = Utc::now();
        if let Some(task) = self.tasks.get_mut(&id) {
            task.status = TaskStatus::Failed;
            task.executed_by = task.assigned_agent.take().or(task.executed_by);
            task.failure_reason = Some(reason.clone());
            task.finished_at = Some(now);
        }

        let mut dependents = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);

        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents.get(&current).cloned().unwrap_or_default() {
                if !seen.insert(dependent) {
                    continue;
                }
                let Some(task) = self.tasks.get_mut(&dependent) else {
                    continue;
                };
                if task.status.is_terminal() {
                    continue;
                }
                // A dependent of an unfinished task is never assigned
                debug_assert_ne!(task.status, TaskStatus::Assigned);

                task.status = TaskStatus::Failed;
                task.failure_reason = Some(format!("dependency {} failed", current));
                task.finished_at = Some(now);
                dependents.push(dependent);
                queue.push_back(dependent);
            }
        }

        if dependents.is_empty() {
            info!(task_id = %id, reason = %reason, "Task failed");
        } else {
            warn!(
                task_id = %id,
                reason = %reason,
                cascaded = dependents.len(),
                "Task failed, dependents failed with it"
            );
        }

        FailureCascade {
            task: id,
            reason,
            dependents,
        }
    }

    /// Ready tasks by ascending priority, then creation order
    pub fn ready_set(&self) -> Vec<&Task> {
        self.tasks(Some(TaskStatus::Ready))
    }

    /// Tasks, optionally filtered by status, by ascending priority then
    /// creation order
    pub fn tasks(&self, status: Option<TaskStatus>) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| status.map_or(true, |s| t.status == s))
            .collect();
        tasks.sort_by_key(|t| (t.priority, t.seq));
        tasks
    }

    /// Tasks currently assigned to `agent`, in creation order
    pub fn assigned_to(&self, agent: &AgentId) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| {
                self.tasks.get(id).is_some_and(|t| {
                    t.status == TaskStatus::Assigned && t.assigned_agent.as_ref() == Some(agent)
                })
            })
            .copied()
            .collect()
    }

    /// All tasks in a dependency-respecting order
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let sorted = self
            .kahn(&HashMap::new(), None)
            .map_err(DelegationError::CyclicDependency)?;

        Ok(sorted.iter().filter_map(|id| self.tasks.get(id)).collect())
    }

    /// Get a task by ID
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// Tasks that list `id` as a dependency
    pub fn dependents(&self, id: &TaskId) -> Vec<TaskId> {
        self.dependents.get(id).cloned().unwrap_or_default()
    }

    /// Get total task count
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if graph is empty
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn status_of(&self, id: &TaskId) -> Option<TaskStatus> {
        self.tasks.get(id).map(|t| t.status)
    }

    fn dependencies_completed(&self, deps: &[TaskId]) -> bool {
        deps.iter()
            .all(|dep| self.status_of(dep) == Some(TaskStatus::Completed))
    }

    /// Reject self edges, unknown dependencies and cycles for `deps` added
    /// to `id`. `new_node` is set when `id` is not tracked yet.
    fn validate_edges(&self, id: TaskId, deps: &[TaskId], new_node: bool) -> Result<()> {
        if deps.contains(&id) {
            return Err(DelegationError::CyclicDependency(id));
        }

        if let Some(unknown) = deps.iter().find(|dep| !self.tasks.contains_key(dep)) {
            return Err(DelegationError::UnknownDependency {
                task: id,
                dependency: *unknown,
            });
        }

        let extra = HashMap::from([(id, deps.to_vec())]);
        self.kahn(&extra, new_node.then_some(id))
            .map(|_| ())
            .map_err(DelegationError::CyclicDependency)
    }

    /// Kahn's algorithm over the tracked graph plus `extra` edges
    /// (task -> additional dependencies) and an optional untracked node.
    ///
    /// Emits in creation order among nodes that are free at the same time.
    /// On a cycle, returns the earliest-created node left unemitted.
    fn kahn(
        &self,
        extra: &HashMap<TaskId, Vec<TaskId>>,
        new_node: Option<TaskId>,
    ) -> std::result::Result<Vec<TaskId>, TaskId> {
        let nodes: Vec<TaskId> = self.order.iter().copied().chain(new_node).collect();
        let index: HashMap<TaskId, usize> =
            nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut in_degree = vec![0usize; nodes.len()];
        let mut edges_out: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

        for (i, id) in nodes.iter().enumerate() {
            let tracked = self.tasks.get(id).map(|t| t.dependencies.as_slice()).unwrap_or(&[]);
            let added = extra.get(id).map(Vec::as_slice).unwrap_or(&[]);
            for dep in tracked.iter().chain(added) {
                if let Some(&d) = index.get(dep) {
                    edges_out[d].push(i);
                    in_degree[i] += 1;
                }
            }
        }

        let mut frontier: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut sorted = Vec::with_capacity(nodes.len());
        while let Some(Reverse(i)) = frontier.pop() {
            sorted.push(nodes[i]);
            for &next in &edges_out[i] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    frontier.push(Reverse(next));
                }
            }
        }

        if sorted.len() < nodes.len() {
            let stuck = in_degree
                .iter()
                .position(|deg| *deg > 0)
                .map(|i| nodes[i])
                .unwrap_or_default();
            return Err(stuck);
        }

        Ok(sorted)
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.tasks.len())
            .field("edges", &self.dependents.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

fn dedup(ids: Vec<TaskId>) -> Vec<TaskId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
