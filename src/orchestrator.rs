//! Delegation service - drives a scheduler from a channel of operations

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::channel::{ChannelPair, DelegationChannel, Op};
use crate::config::SchedulerConfig;
use crate::error::{DelegationError, Result};
use crate::liveness::LivenessOracle;
use crate::scheduler::Scheduler;

/// The delegation service
///
/// Owns the op receiver and a shared [`Scheduler`]. Besides serving
/// operations it polls the liveness oracle on a fixed tick: work held by
/// lost agents is requeued and queued work is offered to agents that came
/// (back) alive, both without an operator.
pub struct Orchestrator {
    scheduler: Arc<Scheduler>,
    /// Channel for receiving operations
    op_rx: mpsc::UnboundedReceiver<Op>,
    poll_interval: Duration,
}

impl Orchestrator {
    /// Create an orchestrator with the given channel pair
    pub fn new(
        liveness: Arc<dyn LivenessOracle>,
        config: SchedulerConfig,
        channels: ChannelPair,
    ) -> Self {
        let poll_interval = config.liveness_poll_interval();
        let scheduler = Scheduler::new(liveness, config).with_events(channels.event_tx);

        Self {
            scheduler: Arc::new(scheduler),
            op_rx: channels.op_rx,
            poll_interval,
        }
    }

    /// Create an orchestrator and return a channel for communication
    pub fn with_channel(
        liveness: Arc<dyn LivenessOracle>,
        config: SchedulerConfig,
    ) -> (Self, DelegationChannel) {
        let (channel, pair) = DelegationChannel::new();
        (Self::new(liveness, config, pair), channel)
    }

    /// Shared handle to the scheduler, for in-process callers
    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Run the service loop until every client channel is dropped
    ///
    /// Returns early only on an internal-consistency violation.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> Result<()> {
        info!(poll_interval = ?self.poll_interval, "Starting delegation service");

        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                op = self.op_rx.recv() => {
                    let Some(op) = op else { break };
                    if let Some(fatal) = self.handle_op(op) {
                        error!(error = %fatal, "Scheduler state is inconsistent, stopping");
                        return Err(fatal);
                    }
                }
                _ = tick.tick() => {
                    match self.scheduler.poll_liveness() {
                        Ok(requeued) if !requeued.is_empty() => {
                            info!(requeued = requeued.len(), "Requeued work from lost agents");
                        }
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "Scheduler state is inconsistent, stopping");
                            return Err(e);
                        }
                        Err(e) => warn!(error = %e, "Liveness poll failed"),
                    }
                }
            }
        }

        info!("Delegation service stopped");
        Ok(())
    }

    /// Handle a single operation. Returns a fatal error if one occurred.
    fn handle_op(&self, op: Op) -> Option<DelegationError> {
        let scheduler = &self.scheduler;

        match op {
            Op::RegisterAgent { capabilities, reply } => {
                respond(reply, scheduler.register_agent(capabilities))
            }
            Op::DelegateTask { request, reply } => respond(reply, scheduler.delegate_task(request)),
            Op::CompleteTask {
                task_id,
                result,
                reply,
            } => respond(reply, scheduler.complete_task(&task_id, result)),
            Op::FailTask {
                task_id,
                reason,
                reply,
            } => respond(reply, scheduler.fail_task(&task_id, reason)),
            Op::TaskStatus { task_id, reply } => respond(reply, scheduler.get_task_status(&task_id)),
            Op::AgentAlive { agent_id, reply } => respond(reply, scheduler.agent_alive(&agent_id)),
            Op::AgentLost { agent_id, reply } => {
                respond(reply, scheduler.reconcile_agent_loss(&agent_id))
            }
            Op::RetryQueued { reply } => respond(reply, scheduler.retry_queued_assignments()),
        }
    }
}

fn respond<T>(reply: oneshot::Sender<Result<T>>, result: Result<T>) -> Option<DelegationError> {
    let fatal = match &result {
        Err(e) if e.is_fatal() => Some(e.clone()),
        Err(e) => {
            debug!(error = %e, "Operation rejected");
            None
        }
        Ok(_) => None,
    };

    if reply.send(result).is_err() {
        debug!("Caller went away before the reply");
    }
    fatal
}
