//! Delegation error types

use thiserror::Error;

use crate::types::{AgentId, TaskId, TaskStatus};

/// Errors that can occur while delegating and tracking work
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DelegationError {
    /// Adding the dependency edges would close a cycle
    #[error("Dependency cycle through task {0}")]
    CyclicDependency(TaskId),

    /// A dependency refers to a task that is not tracked
    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    /// Task id already tracked
    #[error("Task already exists: {0}")]
    DuplicateTask(TaskId),

    /// Agent id already registered
    #[error("Agent already registered: {0}")]
    DuplicateAgent(AgentId),

    /// Task not found
    #[error("Task not found: {0}")]
    UnknownTask(TaskId),

    /// Agent not found
    #[error("Agent not found: {0}")]
    UnknownAgent(AgentId),

    /// The task is not in a state that allows the requested transition
    #[error("Task {task} cannot move from {from} to {to}")]
    InvalidStateTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Workload counter would go negative. Always a bug in the scheduler.
    #[error("Workload underflow for agent {0}")]
    WorkloadUnderflow(AgentId),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The service side of a channel has gone away
    #[error("Channel is closed")]
    ChannelClosed,
}

impl DelegationError {
    /// Internal-consistency violations that must never be recovered from
    pub fn is_fatal(&self) -> bool {
        matches!(self, DelegationError::WorkloadUnderflow(_))
    }
}

pub type Result<T> = std::result::Result<T, DelegationError>;
