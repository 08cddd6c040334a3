//! Communication channels for the delegation service

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{DelegationError, Result};
use crate::graph::FailureCascade;
use crate::scheduler::{Assignment, SchedulerEvent};
use crate::types::{AgentId, Capabilities, TaskId, TaskRequest, TaskStatusView};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Operations understood by the [`Orchestrator`](crate::orchestrator::Orchestrator)
#[derive(Debug)]
pub enum Op {
    RegisterAgent {
        capabilities: Capabilities,
        reply: Reply<AgentId>,
    },
    DelegateTask {
        request: TaskRequest,
        reply: Reply<TaskId>,
    },
    CompleteTask {
        task_id: TaskId,
        result: Option<String>,
        reply: Reply<()>,
    },
    FailTask {
        task_id: TaskId,
        reason: String,
        reply: Reply<FailureCascade>,
    },
    TaskStatus {
        task_id: TaskId,
        reply: Reply<TaskStatusView>,
    },
    /// The liveness layer reports an agent (again) alive
    AgentAlive {
        agent_id: AgentId,
        reply: Reply<Vec<Assignment>>,
    },
    /// The liveness layer reports an agent gone
    AgentLost {
        agent_id: AgentId,
        reply: Reply<Vec<TaskId>>,
    },
    RetryQueued {
        reply: Reply<Vec<Assignment>>,
    },
}

/// Service-side ends of a [`DelegationChannel`]
pub struct ChannelPair {
    /// Receiver for operations
    pub op_rx: mpsc::UnboundedReceiver<Op>,
    /// Sender for events
    pub event_tx: mpsc::UnboundedSender<SchedulerEvent>,
}

/// Client-side channel for talking to the delegation service
#[derive(Clone)]
pub struct DelegationChannel {
    op_tx: mpsc::UnboundedSender<Op>,
    event_rx: Arc<Mutex<mpsc::UnboundedReceiver<SchedulerEvent>>>,
}

impl DelegationChannel {
    /// Create a new channel pair
    ///
    /// Returns the client channel and the service channel pair
    pub fn new() -> (Self, ChannelPair) {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let channel = Self {
            op_tx,
            event_rx: Arc::new(Mutex::new(event_rx)),
        };

        (channel, ChannelPair { op_rx, event_tx })
    }

    pub async fn register_agent(&self, capabilities: Capabilities) -> Result<AgentId> {
        self.request(|reply| Op::RegisterAgent {
            capabilities,
            reply,
        })
        .await
    }

    pub async fn delegate_task(&self, request: TaskRequest) -> Result<TaskId> {
        self.request(|reply| Op::DelegateTask { request, reply }).await
    }

    pub async fn complete_task(&self, task_id: TaskId, result: Option<String>) -> Result<()> {
        self.request(|reply| Op::CompleteTask {
            task_id,
            result,
            reply,
        })
        .await
    }

    pub async fn fail_task(&self, task_id: TaskId, reason: impl Into<String>) -> Result<FailureCascade> {
        let reason = reason.into();
        self.request(|reply| Op::FailTask {
            task_id,
            reason,
            reply,
        })
        .await
    }

    pub async fn task_status(&self, task_id: TaskId) -> Result<TaskStatusView> {
        self.request(|reply| Op::TaskStatus { task_id, reply }).await
    }

    pub async fn agent_alive(&self, agent_id: AgentId) -> Result<Vec<Assignment>> {
        self.request(|reply| Op::AgentAlive { agent_id, reply }).await
    }

    pub async fn agent_lost(&self, agent_id: AgentId) -> Result<Vec<TaskId>> {
        self.request(|reply| Op::AgentLost { agent_id, reply }).await
    }

    pub async fn retry_queued(&self) -> Result<Vec<Assignment>> {
        self.request(|reply| Op::RetryQueued { reply }).await
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Option<SchedulerEvent> {
        self.event_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Receive the next event
    pub async fn recv(&self) -> Option<SchedulerEvent> {
        self.event_rx.lock().await.recv().await
    }

    /// Check if the service has stopped
    pub fn is_closed(&self) -> bool {
        self.op_tx.is_closed()
    }

    async fn request<T>(&self, op: impl FnOnce(Reply<T>) -> Op) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.op_tx
            .send(op(reply))
            .map_err(|_| DelegationError::ChannelClosed)?;
        rx.await.map_err(|_| DelegationError::ChannelClosed)?
    }
}

impl Default for DelegationChannel {
    fn default() -> Self {
        Self::new().0
    }
}
