//! Identifiers and value types shared by the graph, registry and scheduler

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AgentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Set of capability tags. Ordered so logs and snapshots are stable.
pub type Capabilities = BTreeSet<String>;

/// Build a capability set from anything string-like
pub fn capabilities<I, S>(tags: I) -> Capabilities
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter().map(Into::into).collect()
}

/// Lifecycle state of a task
///
/// `Pending → Ready → Assigned → {Completed | Ready | Failed}`.
/// `Pending`/`Ready` reach `Failed` only through a dependency cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on at least one dependency
    Pending,
    /// Eligible for assignment, not bound to an agent
    Ready,
    /// Bound to an agent
    Assigned,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status answer for `get_task_status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub status: TaskStatus,
    pub assigned_agent: Option<AgentId>,
}

/// A request to delegate a unit of work
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Caller-chosen id; generated when absent
    pub id: Option<TaskId>,
    pub description: String,
    pub required_capabilities: Capabilities,
    /// Lower is more urgent; the scheduler default applies when absent
    pub priority: Option<i32>,
    pub dependencies: Vec<TaskId>,
    pub task_type: Option<String>,
    /// Agent that handed this work off, if any
    pub parent_agent: Option<AgentId>,
}

impl TaskRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_capabilities<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities(tags);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies = deps.into_iter().collect();
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_parent(mut self, parent: AgentId) -> Self {
        self.parent_agent = Some(parent);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::Assigned).unwrap();
        assert_eq!(json, "\"assigned\"");
        let parsed: TaskStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(parsed, TaskStatus::Pending);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Assigned.is_terminal());
        assert!(!TaskStatus::Ready.is_terminal());
    }

    #[test]
    fn test_request_builder() {
        let dep = TaskId::new();
        let parent = AgentId::new();
        let req = TaskRequest::new("audit auth module")
            .with_capabilities(["security", "code-analysis"])
            .with_priority(1)
            .with_dependencies([dep])
            .with_task_type("security_audit")
            .with_parent(parent);

        assert_eq!(req.description, "audit auth module");
        assert!(req.required_capabilities.contains("security"));
        assert_eq!(req.required_capabilities.len(), 2);
        assert_eq!(req.priority, Some(1));
        assert_eq!(req.dependencies, vec![dep]);
        assert_eq!(req.task_type.as_deref(), Some("security_audit"));
        assert_eq!(req.parent_agent, Some(parent));
        assert!(req.id.is_none());
    }

    #[test]
    fn test_ids_are_transparent_in_json() {
        let id = TaskId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.0));
    }
}
