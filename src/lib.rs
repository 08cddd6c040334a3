//! # Warband
//!
//! Task delegation for pools of worker agents.
//!
//! Tasks carry required capabilities, a priority and dependencies on other
//! tasks. The scheduler keeps them in an acyclic graph and hands each task,
//! once its dependencies are complete, to the least-loaded live agent that
//! offers every required capability.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                    ORCHESTRATOR (service loop)                    │
//! │      ops ◄── DelegationChannel ──► events      liveness tick      │
//! └────────────────────────────┬─────────────────────────────────────┘
//!                              │
//! ┌────────────────────────────▼─────────────────────────────────────┐
//! │                           SCHEDULER                               │
//! │  ┌──────────────┐   ┌──────────────┐        ┌──────────────────┐  │
//! │  │  Task Graph  │   │Agent Registry│ ◄───── │ Liveness Oracle  │  │
//! │  │  (acyclic)   │   │ (workloads)  │snapshot│ (heartbeats etc) │  │
//! │  └──────────────┘   └──────────────┘        └──────────────────┘  │
//! └────────────────────────────┬─────────────────────────────────────┘
//!                              │ assignments
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!   ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//!   │  Agent A    │     │  Agent B    │     │  Agent C    │
//!   │ {build}     │     │{build,deploy│     │ {test}      │
//!   └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Task**: A unit of work with capabilities, priority and dependencies
//! - **Agent**: A worker with a capability set and a workload counter
//! - **Ready set**: Unassigned tasks whose dependencies are all complete
//! - **Liveness oracle**: Source of truth for which agents are alive
//! - **Reconciliation**: Requeueing work held by an agent that was lost

pub mod agent;
pub mod channel;
pub mod config;
pub mod error;
pub mod graph;
pub mod liveness;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;
pub mod types;

pub use agent::Agent;
pub use channel::{ChannelPair, DelegationChannel, Op};
pub use config::SchedulerConfig;
pub use error::{DelegationError, Result};
pub use graph::{FailureCascade, Task, TaskGraph};
pub use liveness::{HeartbeatMonitor, HeartbeatStatus, LivenessOracle, StaticLiveness};
pub use orchestrator::Orchestrator;
pub use registry::AgentRegistry;
pub use scheduler::{Assignment, Scheduler, SchedulerEvent};
pub use types::{capabilities, AgentId, Capabilities, TaskId, TaskRequest, TaskStatus, TaskStatusView};
