//! Scheduler - matches ready tasks to capable, live, least-loaded agents
//!
//! The task graph and the agent registry live behind a single mutex. Every
//! public operation takes it once, fetches a liveness snapshot if it needs
//! one, decides, commits, and releases. Nothing inside the section blocks on
//! I/O or on another agent.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::config::SchedulerConfig;
use crate::error::{DelegationError, Result};
use crate::graph::{FailureCascade, Task, TaskGraph};
use crate::liveness::LivenessOracle;
use crate::registry::AgentRegistry;
use crate::types::{AgentId, Capabilities, TaskId, TaskRequest, TaskStatus, TaskStatusView};

/// Events emitted by the scheduler for task and agent lifecycle changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    AgentRegistered {
        agent_id: AgentId,
        capabilities: Capabilities,
    },
    /// A task entered the graph
    TaskDelegated {
        task_id: TaskId,
        status: TaskStatus,
    },
    TaskAssigned {
        task_id: TaskId,
        agent_id: AgentId,
    },
    TaskCompleted {
        task_id: TaskId,
        agent_id: AgentId,
    },
    /// A task failed, together with every dependent that failed with it
    TaskFailed {
        task_id: TaskId,
        reason: String,
        cascaded: Vec<TaskId>,
    },
    /// An assigned task went back to the ready pool
    TaskRequeued {
        task_id: TaskId,
        agent_id: AgentId,
    },
    AgentLost {
        agent_id: AgentId,
        requeued: Vec<TaskId>,
    },
}

/// A single task-to-agent binding made by an assignment pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    pub task_id: TaskId,
    pub agent_id: AgentId,
}

/// Shared scheduling state, only ever touched under the scheduler lock
struct SchedulerState {
    graph: TaskGraph,
    registry: AgentRegistry,
    /// Reported lost while the oracle still lists them as alive. Kept out
    /// of matching until the oracle drops them or they are reported alive.
    quarantined: HashSet<AgentId>,
}

/// The delegation scheduler
///
/// Share it as `Arc<Scheduler>`; all methods take `&self`.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    liveness: Arc<dyn LivenessOracle>,
    config: SchedulerConfig,
    event_tx: Option<mpsc::UnboundedSender<SchedulerEvent>>,
}

impl Scheduler {
    pub fn new(liveness: Arc<dyn LivenessOracle>, config: SchedulerConfig) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                graph: TaskGraph::new(),
                registry: AgentRegistry::new(),
                quarantined: HashSet::new(),
            }),
            liveness,
            config,
            event_tx: None,
        }
    }

    /// Create a scheduler and return the receiving end of its event stream
    pub fn with_channel(
        liveness: Arc<dyn LivenessOracle>,
        config: SchedulerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(liveness, config).with_events(tx), rx)
    }

    pub fn with_events(mut self, event_tx: mpsc::UnboundedSender<SchedulerEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn liveness(&self) -> &Arc<dyn LivenessOracle> {
        &self.liveness
    }

    // ========== Agents ==========

    /// Register a new agent and offer it any queued work
    pub fn register_agent(&self, capabilities: Capabilities) -> Result<AgentId> {
        self.register_agent_with_id(AgentId::new(), capabilities)
    }

    pub fn register_agent_with_id(&self, id: AgentId, capabilities: Capabilities) -> Result<AgentId> {
        let mut state = self.state.lock();
        state
            .registry
            .register_with_capacity(id, capabilities.clone(), self.config.agent_capacity)?;
        self.emit(SchedulerEvent::AgentRegistered {
            agent_id: id,
            capabilities,
        });

        self.assignment_pass(&mut state)?;
        Ok(id)
    }

    /// Change how many concurrent assignments an agent may hold
    ///
    /// Raising the limit offers queued work straight away.
    pub fn set_agent_capacity(&self, id: &AgentId, capacity: Option<u32>) -> Result<Vec<Assignment>> {
        let mut state = self.state.lock();
        state.registry.set_capacity(id, capacity)?;
        self.assignment_pass(&mut state)
    }

    /// Hook for the liveness layer: the agent is (again) reported alive
    pub fn agent_alive(&self, id: &AgentId) -> Result<Vec<Assignment>> {
        let mut state = self.state.lock();
        if !state.registry.contains(id) {
            return Err(DelegationError::UnknownAgent(*id));
        }
        state.quarantined.remove(id);
        debug!(agent_id = %id, "Agent reported alive");
        self.assignment_pass(&mut state)
    }

    /// Requeue everything assigned to an agent that is no longer alive
    ///
    /// Returns the requeued tasks. They keep their priority and are offered
    /// to the remaining agents straight away. If the oracle still lists the
    /// agent as alive, it is left out of matching until the oracle drops it
    /// or [`agent_alive`](Self::agent_alive) is called for it.
    pub fn reconcile_agent_loss(&self, id: &AgentId) -> Result<Vec<TaskId>> {
        let mut state = self.state.lock();
        if !state.registry.contains(id) {
            return Err(DelegationError::UnknownAgent(*id));
        }

        if self.liveness.is_alive(id) && state.quarantined.insert(*id) {
            debug!(agent_id = %id, "Lost agent still listed alive, excluded from matching");
        }
        let requeued = self.release_agent(&mut state, id)?;
        self.assignment_pass(&mut state)?;
        Ok(requeued)
    }

    /// Drain lost-agent notifications from the oracle and reconcile them
    ///
    /// Also sweeps assignments held by agents missing from the alive
    /// snapshot, so a dropped notification cannot strand a task, and then
    /// offers queued work to whoever is alive now. That last step is what
    /// picks up agents whose heartbeats resumed.
    pub fn poll_liveness(&self) -> Result<Vec<TaskId>> {
        let lost = self.liveness.take_lost();

        let mut state = self.state.lock();
        let alive = self.liveness.alive_agents();
        state.quarantined.retain(|id| alive.contains(id));

        let holders = state
            .graph
            .tasks(Some(TaskStatus::Assigned))
            .into_iter()
            .filter_map(|t| t.assigned_agent);

        let mut seen = HashSet::new();
        let dead: Vec<AgentId> = lost
            .into_iter()
            .chain(holders)
            .filter(|id| !alive.contains(id) && state.registry.contains(id))
            .filter(|id| seen.insert(*id))
            .collect();

        let mut requeued = Vec::new();
        for id in &dead {
            requeued.extend(self.release_agent(&mut state, id)?);
        }

        self.assignment_pass(&mut state)?;
        Ok(requeued)
    }

    // ========== Tasks ==========

    /// Add a task to the graph and assign it right away if possible
    ///
    /// The id is returned whether or not an agent was found; a task with no
    /// capable agent simply stays `Ready`.
    pub fn delegate_task(&self, request: TaskRequest) -> Result<TaskId> {
        let task = Task::from_request(request, self.config.default_priority);
        let id = task.id;
        let priority = task.priority;

        let mut state = self.state.lock();
        let status = state.graph.add_task(task)?;

        info!(task_id = %id, priority, status = %status, "Task delegated");
        self.emit(SchedulerEvent::TaskDelegated { task_id: id, status });

        match status {
            TaskStatus::Ready => {
                self.assignment_pass(&mut state)?;
            }
            TaskStatus::Failed => {
                let reason = state
                    .graph
                    .get(&id)
                    .and_then(|t| t.failure_reason.clone())
                    .unwrap_or_default();
                self.emit(SchedulerEvent::TaskFailed {
                    task_id: id,
                    reason,
                    cascaded: Vec::new(),
                });
            }
            _ => {}
        }

        Ok(id)
    }

    /// Link extra dependencies to a task that has not been assigned yet
    pub fn add_dependencies(
        &self,
        id: &TaskId,
        deps: impl IntoIterator<Item = TaskId>,
    ) -> Result<TaskStatus> {
        let mut state = self.state.lock();
        if let Some(cascade) = state.graph.add_dependencies(id, deps)? {
            self.emit_failure(cascade);
        }

        state
            .graph
            .get(id)
            .map(|t| t.status)
            .ok_or(DelegationError::UnknownTask(*id))
    }

    /// Mark an assigned task completed and hand out whatever it unlocked
    pub fn complete_task(&self, id: &TaskId, result: Option<String>) -> Result<()> {
        let mut state = self.state.lock();
        let agent = Self::assigned_agent(&state, id, TaskStatus::Completed)?;

        state.registry.decrement_workload(&agent)?;
        let unlocked = state.graph.mark_completed(id, result)?;

        info!(task_id = %id, agent_id = %agent, unlocked = unlocked.len(), "Task completed");
        self.emit(SchedulerEvent::TaskCompleted {
            task_id: *id,
            agent_id: agent,
        });

        self.assignment_pass(&mut state)?;
        Ok(())
    }

    /// Mark an assigned task failed; every transitive dependent fails too
    pub fn fail_task(&self, id: &TaskId, reason: impl Into<String>) -> Result<FailureCascade> {
        let mut state = self.state.lock();
        let agent = Self::assigned_agent(&state, id, TaskStatus::Failed)?;

        state.registry.decrement_workload(&agent)?;
        let cascade = state.graph.mark_failed(id, reason)?;
        self.emit_failure(cascade.clone());

        self.assignment_pass(&mut state)?;
        Ok(cascade)
    }

    /// Re-run the assignment pass over the current ready set
    ///
    /// Idempotent: with nothing changed since the last pass it assigns
    /// nothing.
    pub fn retry_queued_assignments(&self) -> Result<Vec<Assignment>> {
        let mut state = self.state.lock();
        self.assignment_pass(&mut state)
    }

    // ========== Queries ==========

    pub fn get_task_status(&self, id: &TaskId) -> Result<TaskStatusView> {
        self.state
            .lock()
            .graph
            .get(id)
            .map(Task::status_view)
            .ok_or(DelegationError::UnknownTask(*id))
    }

    /// Full snapshot of a task
    pub fn task(&self, id: &TaskId) -> Result<Task> {
        self.state
            .lock()
            .graph
            .get(id)
            .cloned()
            .ok_or(DelegationError::UnknownTask(*id))
    }

    /// Tasks by priority then creation order, optionally filtered by status
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        self.state
            .lock()
            .graph
            .tasks(status)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Ready, unassigned tasks in the order they will be offered
    pub fn ready_set(&self) -> Vec<TaskId> {
        self.state.lock().graph.ready_set().iter().map(|t| t.id).collect()
    }

    pub fn agent(&self, id: &AgentId) -> Result<Agent> {
        self.state
            .lock()
            .registry
            .get(id)
            .cloned()
            .ok_or(DelegationError::UnknownAgent(*id))
    }

    /// All agents in registration order
    pub fn agents(&self) -> Vec<Agent> {
        self.state.lock().registry.agents().into_iter().cloned().collect()
    }

    pub fn workload(&self, id: &AgentId) -> Result<u32> {
        self.agent(id).map(|a| a.workload)
    }

    // ========== Internals ==========

    /// Offer every ready task, most urgent first, to the least-loaded
    /// capable live agent. The liveness snapshot is taken fresh here and
    /// quarantined agents are removed from it.
    fn assignment_pass(&self, state: &mut SchedulerState) -> Result<Vec<Assignment>> {
        let ready: Vec<(TaskId, Capabilities)> = state
            .graph
            .ready_set()
            .iter()
            .map(|t| (t.id, t.required_capabilities.clone()))
            .collect();
        if ready.is_empty() {
            return Ok(Vec::new());
        }

        let mut alive = self.liveness.alive_agents();
        alive.retain(|id| !state.quarantined.contains(id));
        let mut assignments = Vec::new();

        for (task_id, required) in ready {
            let Some(agent_id) = state.registry.least_loaded(&required, &alive) else {
                debug!(task_id = %task_id, required = ?required, "No capable agent, task stays queued");
                continue;
            };

            state.graph.assign(&task_id, agent_id)?;
            let workload = state.registry.increment_workload(&agent_id)?;

            info!(task_id = %task_id, agent_id = %agent_id, workload, "Task assigned");
            self.emit(SchedulerEvent::TaskAssigned { task_id, agent_id });
            assignments.push(Assignment { task_id, agent_id });
        }

        Ok(assignments)
    }

    /// Put every task held by `agent` back to `Ready`
    fn release_agent(&self, state: &mut SchedulerState, agent: &AgentId) -> Result<Vec<TaskId>> {
        let held = state.graph.assigned_to(agent);

        for task_id in &held {
            state.graph.release(task_id)?;
            state.registry.decrement_workload(agent)?;
            self.emit(SchedulerEvent::TaskRequeued {
                task_id: *task_id,
                agent_id: *agent,
            });
        }

        warn!(agent_id = %agent, requeued = held.len(), "Agent lost, work requeued");
        self.emit(SchedulerEvent::AgentLost {
            agent_id: *agent,
            requeued: held.clone(),
        });
        Ok(held)
    }

    fn assigned_agent(state: &SchedulerState, id: &TaskId, to: TaskStatus) -> Result<AgentId> {
        let task = state.graph.get(id).ok_or(DelegationError::UnknownTask(*id))?;
        match (task.status, task.assigned_agent) {
            (TaskStatus::Assigned, Some(agent)) => Ok(agent),
            (from, _) => Err(DelegationError::InvalidStateTransition { task: *id, from, to }),
        }
    }

    fn emit_failure(&self, cascade: FailureCascade) {
        self.emit(SchedulerEvent::TaskFailed {
            task_id: cascade.task,
            reason: cascade.reason,
            cascaded: cascade.dependents,
        });
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::StaticLiveness;
    use crate::types::capabilities;

    fn setup() -> (Scheduler, Arc<StaticLiveness>) {
        setup_with(SchedulerConfig::default())
    }

    fn setup_with(config: SchedulerConfig) -> (Scheduler, Arc<StaticLiveness>) {
        let liveness = Arc::new(StaticLiveness::new());
        let scheduler = Scheduler::new(liveness.clone(), config);
        (scheduler, liveness)
    }

    fn live_agent(scheduler: &Scheduler, liveness: &StaticLiveness, caps: &[&str]) -> AgentId {
        let id = AgentId::new();
        liveness.mark_alive(id);
        scheduler
            .register_agent_with_id(id, capabilities(caps.iter().copied()))
            .unwrap();
        id
    }

    fn status(scheduler: &Scheduler, id: &TaskId) -> TaskStatus {
        scheduler.get_task_status(id).unwrap().status
    }

    // === Delegation Tests ===

    #[test]
    fn test_delegate_assigns_immediately() {
        let (scheduler, liveness) = setup();
        let a = live_agent(&scheduler, &liveness, &["build"]);

        let t = scheduler
            .delegate_task(TaskRequest::new("compile").with_capabilities(["build"]))
            .unwrap();

        let view = scheduler.get_task_status(&t).unwrap();
        assert_eq!(view.status, TaskStatus::Assigned);
        assert_eq!(view.assigned_agent, Some(a));
        assert_eq!(scheduler.workload(&a).unwrap(), 1);
    }

    #[test]
    fn test_delegate_without_capable_agent_queues() {
        let (scheduler, liveness) = setup();
        live_agent(&scheduler, &liveness, &["build"]);

        let t = scheduler
            .delegate_task(TaskRequest::new("ship").with_capabilities(["deploy"]))
            .unwrap();

        assert_eq!(status(&scheduler, &t), TaskStatus::Ready);
        assert_eq!(scheduler.ready_set(), vec![t]);
    }

    #[test]
    fn test_delegate_uses_default_priority() {
        let (scheduler, _liveness) = setup();
        let t = scheduler.delegate_task(TaskRequest::new("x")).unwrap();
        assert_eq!(scheduler.task(&t).unwrap().priority, 5);
    }

    #[test]
    fn test_delegate_duplicate_id_rejected() {
        let (scheduler, _liveness) = setup();
        let id = TaskId::new();
        scheduler.delegate_task(TaskRequest::new("a").with_id(id)).unwrap();

        let err = scheduler
            .delegate_task(TaskRequest::new("b").with_id(id))
            .unwrap_err();
        assert_eq!(err, DelegationError::DuplicateTask(id));
        assert_eq!(scheduler.task(&id).unwrap().description, "a");
    }

    #[test]
    fn test_dead_agent_is_never_chosen() {
        let (scheduler, liveness) = setup();
        let a = live_agent(&scheduler, &liveness, &["build"]);
        liveness.mark_dead(a);

        let t = scheduler
            .delegate_task(TaskRequest::new("compile").with_capabilities(["build"]))
            .unwrap();
        assert_eq!(status(&scheduler, &t), TaskStatus::Ready);
    }

    #[test]
    fn test_registration_picks_up_queued_work() {
        let (scheduler, liveness) = setup();
        let t = scheduler
            .delegate_task(TaskRequest::new("ship").with_capabilities(["deploy"]))
            .unwrap();

        let b = live_agent(&scheduler, &liveness, &["deploy"]);
        assert_eq!(scheduler.get_task_status(&t).unwrap().assigned_agent, Some(b));
    }

    #[test]
    fn test_agent_alive_picks_up_queued_work() {
        let (scheduler, liveness) = setup();
        let a = AgentId::new();
        scheduler.register_agent_with_id(a, capabilities(["build"])).unwrap();
        let t = scheduler
            .delegate_task(TaskRequest::new("compile").with_capabilities(["build"]))
            .unwrap();
        assert_eq!(status(&scheduler, &t), TaskStatus::Ready);

        liveness.mark_alive(a);
        let assigned = scheduler.agent_alive(&a).unwrap();
        assert_eq!(assigned, vec![Assignment { task_id: t, agent_id: a }]);
    }

    // === Balancing Tests ===

    #[test]
    fn test_least_loaded_agent_chosen() {
        let (scheduler, liveness) = setup();
        let a = live_agent(&scheduler, &liveness, &["build"]);
        let b = live_agent(&scheduler, &liveness, &["build"]);

        let t1 = scheduler.delegate_task(TaskRequest::new("1").with_capabilities(["build"])).unwrap();
        let t2 = scheduler.delegate_task(TaskRequest::new("2").with_capabilities(["build"])).unwrap();
        let t3 = scheduler.delegate_task(TaskRequest::new("3").with_capabilities(["build"])).unwrap();

        assert_eq!(scheduler.get_task_status(&t1).unwrap().assigned_agent, Some(a));
        assert_eq!(scheduler.get_task_status(&t2).unwrap().assigned_agent, Some(b));
        assert_eq!(scheduler.get_task_status(&t3).unwrap().assigned_agent, Some(a));
        assert_eq!(scheduler.workload(&a).unwrap(), 2);
        assert_eq!(scheduler.workload(&b).unwrap(), 1);
    }

    #[test]
    fn test_priority_wins_single_agent() {
        let (scheduler, liveness) = setup_with(SchedulerConfig {
            agent_capacity: Some(1),
            ..Default::default()
        });
        let low = scheduler
            .delegate_task(TaskRequest::new("low").with_capabilities(["x"]).with_priority(5))
            .unwrap();
        let high = scheduler
            .delegate_task(TaskRequest::new("high").with_capabilities(["x"]).with_priority(1))
            .unwrap();

        let a = live_agent(&scheduler, &liveness, &["x"]);

        assert_eq!(scheduler.get_task_status(&high).unwrap().assigned_agent, Some(a));
        assert_eq!(status(&scheduler, &low), TaskStatus::Ready);

        scheduler.complete_task(&high, None).unwrap();
        assert_eq!(scheduler.get_task_status(&low).unwrap().assigned_agent, Some(a));
    }

    #[test]
    fn test_unbounded_agent_takes_all_work_in_priority_order() {
        let (scheduler, liveness) = setup();
        let low = scheduler
            .delegate_task(TaskRequest::new("low").with_priority(5))
            .unwrap();
        let high = scheduler
            .delegate_task(TaskRequest::new("high").with_priority(1))
            .unwrap();

        let a = live_agent(&scheduler, &liveness, &[]);
        assert_eq!(scheduler.workload(&a).unwrap(), 2);

        let order: Vec<TaskId> = scheduler
            .list_tasks(Some(TaskStatus::Assigned))
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(order, vec![high, low]);
    }

    #[test]
    fn test_raising_capacity_assigns_queued_work() {
        let (scheduler, liveness) = setup_with(SchedulerConfig {
            agent_capacity: Some(1),
            ..Default::default()
        });
        let a = live_agent(&scheduler, &liveness, &[]);
        scheduler.delegate_task(TaskRequest::new("1")).unwrap();
        let t2 = scheduler.delegate_task(TaskRequest::new("2")).unwrap();
        assert_eq!(status(&scheduler, &t2), TaskStatus::Ready);

        let assigned = scheduler.set_agent_capacity(&a, Some(2)).unwrap();
        assert_eq!(assigned, vec![Assignment { task_id: t2, agent_id: a }]);
    }

    // === Completion Tests ===

    #[test]
    fn test_complete_unlocks_dependent() {
        let (scheduler, liveness) = setup();
        let a = live_agent(&scheduler, &liveness, &["build"]);

        let t1 = scheduler.delegate_task(TaskRequest::new("1").with_capabilities(["build"])).unwrap();
        let t2 = scheduler
            .delegate_task(
                TaskRequest::new("2")
                    .with_capabilities(["build"])
                    .with_dependencies([t1]),
            )
            .unwrap();
        assert_eq!(status(&scheduler, &t2), TaskStatus::Pending);

        scheduler.complete_task(&t1, Some("built".into())).unwrap();

        assert_eq!(status(&scheduler, &t1), TaskStatus::Completed);
        assert_eq!(scheduler.task(&t1).unwrap().result.as_deref(), Some("built"));
        assert_eq!(scheduler.get_task_status(&t2).unwrap().assigned_agent, Some(a));
        assert_eq!(scheduler.workload(&a).unwrap(), 1);
    }

    #[test]
    fn test_complete_requires_assigned() {
        let (scheduler, _liveness) = setup();
        let t = scheduler.delegate_task(TaskRequest::new("queued")).unwrap();

        let err = scheduler.complete_task(&t, None).unwrap_err();
        assert_eq!(
            err,
            DelegationError::InvalidStateTransition {
                task: t,
                from: TaskStatus::Ready,
                to: TaskStatus::Completed
            }
        );
        assert!(matches!(
            scheduler.fail_task(&t, "nope").unwrap_err(),
            DelegationError::InvalidStateTransition { .. }
        ));
    }

    #[test]
    fn test_complete_unknown_task() {
        let (scheduler, _liveness) = setup();
        let ghost = TaskId::new();
        assert_eq!(
            scheduler.complete_task(&ghost, None).unwrap_err(),
            DelegationError::UnknownTask(ghost)
        );
        assert_eq!(
            scheduler.get_task_status(&ghost).unwrap_err(),
            DelegationError::UnknownTask(ghost)
        );
    }

    // === Failure Tests ===

    #[test]
    fn test_fail_cascades_and_frees_agent() {
        let (scheduler, liveness) = setup();
        let a = live_agent(&scheduler, &liveness, &["build"]);

        let t1 = scheduler.delegate_task(TaskRequest::new("1").with_capabilities(["build"])).unwrap();
        let t2 = scheduler
            .delegate_task(TaskRequest::new("2").with_dependencies([t1]))
            .unwrap();
        let t3 = scheduler
            .delegate_task(TaskRequest::new("3").with_dependencies([t2]))
            .unwrap();

        let cascade = scheduler.fail_task(&t1, "tests failed").unwrap();
        assert_eq!(cascade.dependents, vec![t2, t3]);
        assert_eq!(scheduler.workload(&a).unwrap(), 0);
        for t in [t1, t2, t3] {
            assert_eq!(status(&scheduler, &t), TaskStatus::Failed);
        }
        assert!(scheduler.retry_queued_assignments().unwrap().is_empty());
    }

    #[test]
    fn test_delegate_behind_failed_task_fails() {
        let (scheduler, liveness) = setup();
        live_agent(&scheduler, &liveness, &[]);
        let t1 = scheduler.delegate_task(TaskRequest::new("1")).unwrap();
        scheduler.fail_task(&t1, "x").unwrap();

        let t2 = scheduler
            .delegate_task(TaskRequest::new("2").with_dependencies([t1]))
            .unwrap();
        assert_eq!(status(&scheduler, &t2), TaskStatus::Failed);
    }

    // === Reconciliation Tests ===

    #[test]
    fn test_reconcile_requeues_to_survivor() {
        let (scheduler, liveness) = setup();
        let a = live_agent(&scheduler, &liveness, &["build"]);
        let t = scheduler.delegate_task(TaskRequest::new("1").with_capabilities(["build"])).unwrap();
        let b = live_agent(&scheduler, &liveness, &["build"]);
        assert_eq!(scheduler.get_task_status(&t).unwrap().assigned_agent, Some(a));

        liveness.mark_dead(a);
        let requeued = scheduler.reconcile_agent_loss(&a).unwrap();

        assert_eq!(requeued, vec![t]);
        assert_eq!(scheduler.workload(&a).unwrap(), 0);
        assert_eq!(scheduler.get_task_status(&t).unwrap().assigned_agent, Some(b));
        assert!(scheduler.retry_queued_assignments().unwrap().is_empty());
    }

    #[test]
    fn test_reconcile_without_survivor_leaves_ready() {
        let (scheduler, liveness) = setup();
        let a = live_agent(&scheduler, &liveness, &["build"]);
        let t = scheduler
            .delegate_task(TaskRequest::new("1").with_capabilities(["build"]).with_priority(2))
            .unwrap();

        liveness.mark_dead(a);
        scheduler.reconcile_agent_loss(&a).unwrap();

        let task = scheduler.task(&t).unwrap();
        assert_eq!(task.status, TaskStatus::Ready);
        assert_eq!(task.priority, 2);
        assert!(task.assigned_agent.is_none());
        assert!(scheduler.complete_task(&t, None).is_err());
    }

    #[test]
    fn test_reconcile_skips_agent_still_listed_alive() {
        let (scheduler, liveness) = setup();
        let a = live_agent(&scheduler, &liveness, &["build"]);
        let t = scheduler.delegate_task(TaskRequest::new("1").with_capabilities(["build"])).unwrap();
        let b = live_agent(&scheduler, &liveness, &["build"]);

        // The oracle has not caught up with the report yet
        assert_eq!(scheduler.reconcile_agent_loss(&a).unwrap(), vec![t]);
        assert_eq!(scheduler.get_task_status(&t).unwrap().assigned_agent, Some(b));

        let t2 = scheduler.delegate_task(TaskRequest::new("2").with_capabilities(["build"])).unwrap();
        assert_eq!(scheduler.get_task_status(&t2).unwrap().assigned_agent, Some(b));
        assert!(scheduler.retry_queued_assignments().unwrap().is_empty());
        assert_eq!(scheduler.workload(&a).unwrap(), 0);

        scheduler.agent_alive(&a).unwrap();
        let t3 = scheduler.delegate_task(TaskRequest::new("3").with_capabilities(["build"])).unwrap();
        assert_eq!(scheduler.get_task_status(&t3).unwrap().assigned_agent, Some(a));
    }

    #[test]
    fn test_quarantine_lifts_once_oracle_drops_agent() {
        let (scheduler, liveness) = setup();
        let a = live_agent(&scheduler, &liveness, &["build"]);
        scheduler.reconcile_agent_loss(&a).unwrap();

        let t = scheduler.delegate_task(TaskRequest::new("1").with_capabilities(["build"])).unwrap();
        assert_eq!(status(&scheduler, &t), TaskStatus::Ready);

        liveness.mark_dead(a);
        scheduler.poll_liveness().unwrap();
        liveness.mark_alive(a);
        scheduler.poll_liveness().unwrap();

        assert_eq!(scheduler.get_task_status(&t).unwrap().assigned_agent, Some(a));
    }

    #[test]
    fn test_poll_liveness_assigns_to_revived_agent() {
        let (scheduler, liveness) = setup();
        let a = live_agent(&scheduler, &liveness, &["build"]);
        let t = scheduler.delegate_task(TaskRequest::new("1").with_capabilities(["build"])).unwrap();

        liveness.mark_dead(a);
        assert_eq!(scheduler.poll_liveness().unwrap(), vec![t]);
        assert_eq!(status(&scheduler, &t), TaskStatus::Ready);

        liveness.mark_alive(a);
        assert!(scheduler.poll_liveness().unwrap().is_empty());
        assert_eq!(scheduler.get_task_status(&t).unwrap().assigned_agent, Some(a));
    }

    #[test]
    fn test_reconcile_unknown_agent() {
        let (scheduler, _liveness) = setup();
        let ghost = AgentId::new();
        assert_eq!(
            scheduler.reconcile_agent_loss(&ghost).unwrap_err(),
            DelegationError::UnknownAgent(ghost)
        );
    }

    #[test]
    fn test_poll_liveness_drains_notifications() {
        let (scheduler, liveness) = setup();
        let a = live_agent(&scheduler, &liveness, &["build"]);
        let t = scheduler.delegate_task(TaskRequest::new("1").with_capabilities(["build"])).unwrap();

        liveness.mark_dead(a);
        assert_eq!(scheduler.poll_liveness().unwrap(), vec![t]);
        assert_eq!(status(&scheduler, &t), TaskStatus::Ready);
        assert!(scheduler.poll_liveness().unwrap().is_empty());
    }

    #[test]
    fn test_poll_liveness_sweeps_missed_notifications() {
        let (scheduler, liveness) = setup();
        let a = live_agent(&scheduler, &liveness, &["build"]);
        let t = scheduler.delegate_task(TaskRequest::new("1").with_capabilities(["build"])).unwrap();

        liveness.mark_dead(a);
        // Notification consumed elsewhere
        liveness.take_lost();

        assert_eq!(scheduler.poll_liveness().unwrap(), vec![t]);
        assert_eq!(scheduler.workload(&a).unwrap(), 0);
    }

    // === Event Tests ===

    #[test]
    fn test_events_follow_lifecycle() {
        let liveness = Arc::new(StaticLiveness::new());
        let (scheduler, mut rx) = Scheduler::with_channel(liveness.clone(), SchedulerConfig::default());
        let a = AgentId::new();
        liveness.mark_alive(a);
        scheduler.register_agent_with_id(a, capabilities(["build"])).unwrap();

        let t = scheduler.delegate_task(TaskRequest::new("1").with_capabilities(["build"])).unwrap();
        scheduler.complete_task(&t, None).unwrap();

        let events: Vec<SchedulerEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                SchedulerEvent::AgentRegistered {
                    agent_id: a,
                    capabilities: capabilities(["build"])
                },
                SchedulerEvent::TaskDelegated {
                    task_id: t,
                    status: TaskStatus::Ready
                },
                SchedulerEvent::TaskAssigned { task_id: t, agent_id: a },
                SchedulerEvent::TaskCompleted { task_id: t, agent_id: a },
            ]
        );
    }

    #[test]
    fn test_events_survive_dropped_receiver() {
        let liveness = Arc::new(StaticLiveness::new());
        let (scheduler, rx) = Scheduler::with_channel(liveness, SchedulerConfig::default());
        drop(rx);

        assert!(scheduler.delegate_task(TaskRequest::new("1")).is_ok());
    }

    // === Linking Tests ===

    #[test]
    fn test_add_dependencies_through_scheduler() {
        let (scheduler, _liveness) = setup();
        let t1 = scheduler.delegate_task(TaskRequest::new("1")).unwrap();
        let t2 = scheduler.delegate_task(TaskRequest::new("2")).unwrap();

        assert_eq!(scheduler.add_dependencies(&t2, [t1]).unwrap(), TaskStatus::Pending);
        assert!(matches!(
            scheduler.add_dependencies(&t1, [t2]).unwrap_err(),
            DelegationError::CyclicDependency(_)
        ));
        assert_eq!(scheduler.ready_set(), vec![t1]);
    }
}
