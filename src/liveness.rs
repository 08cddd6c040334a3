//! Liveness oracle - who is alive right now
//!
//! The scheduler never caches liveness: it asks the oracle for a fresh
//! snapshot on every matching pass and drains [`LivenessOracle::take_lost`]
//! to find agents whose in-flight work must be requeued.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::types::AgentId;

/// Read-only view of agent liveness
///
/// Implementations must answer without blocking: the scheduler calls them
/// while holding its critical section.
pub trait LivenessOracle: Send + Sync {
    /// Agents currently considered alive
    fn alive_agents(&self) -> HashSet<AgentId>;

    /// Agents that went from alive to not-alive since the previous call
    fn take_lost(&self) -> Vec<AgentId>;

    fn is_alive(&self, id: &AgentId) -> bool {
        self.alive_agents().contains(id)
    }
}

/// Liveness driven explicitly by the embedding program
#[derive(Default)]
pub struct StaticLiveness {
    inner: Mutex<StaticInner>,
}

#[derive(Default)]
struct StaticInner {
    alive: HashSet<AgentId>,
    lost: Vec<AgentId>,
}

impl StaticLiveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_alive(&self, id: AgentId) {
        let mut inner = self.inner.lock();
        inner.alive.insert(id);
        inner.lost.retain(|lost| *lost != id);
    }

    /// Returns false if the agent was not alive
    pub fn mark_dead(&self, id: AgentId) -> bool {
        let mut inner = self.inner.lock();
        if inner.alive.remove(&id) {
            inner.lost.push(id);
            true
        } else {
            false
        }
    }
}

impl LivenessOracle for StaticLiveness {
    fn alive_agents(&self) -> HashSet<AgentId> {
        self.inner.lock().alive.clone()
    }

    fn take_lost(&self) -> Vec<AgentId> {
        std::mem::take(&mut self.inner.lock().lost)
    }

    fn is_alive(&self, id: &AgentId) -> bool {
        self.inner.lock().alive.contains(id)
    }
}

/// Snapshot of a single agent's heartbeat state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatStatus {
    pub alive: bool,
    pub since_last_heartbeat: Duration,
}

/// In-memory heartbeat tracker
///
/// An agent is alive while its last heartbeat is younger than the timeout.
/// Loss is reported once per transition: an agent that resumes beating and
/// later times out again is reported again.
pub struct HeartbeatMonitor {
    timeout: Duration,
    inner: Mutex<MonitorInner>,
}

#[derive(Default)]
struct MonitorInner {
    last_beat: HashMap<AgentId, Instant>,
    /// Already handed out through `take_lost`
    reported: HashSet<AgentId>,
    /// Removed before their loss was reported
    departed: Vec<AgentId>,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            inner: Mutex::new(MonitorInner::default()),
        }
    }

    /// Monitor using the configured `heartbeat_timeout_secs`
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.heartbeat_timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start tracking an agent; counts as its first heartbeat
    pub fn register(&self, id: AgentId) {
        let mut inner = self.inner.lock();
        inner.last_beat.insert(id, Instant::now());
        inner.reported.remove(&id);
        inner.departed.retain(|d| *d != id);
        debug!(agent_id = %id, "Heartbeat tracking started");
    }

    /// Record a heartbeat. Returns false for an unknown agent.
    pub fn heartbeat(&self, id: &AgentId) -> bool {
        let mut inner = self.inner.lock();
        match inner.last_beat.get_mut(id) {
            Some(last) => {
                *last = Instant::now();
                inner.reported.remove(id);
                true
            }
            None => false,
        }
    }

    /// Stop tracking an agent (graceful shutdown)
    pub fn unregister(&self, id: &AgentId) -> bool {
        let mut inner = self.inner.lock();
        let was_alive = match inner.last_beat.remove(id) {
            Some(last) => last.elapsed() < self.timeout,
            None => return false,
        };
        if was_alive || !inner.reported.remove(id) {
            inner.departed.push(*id);
        }
        info!(agent_id = %id, "Agent unregistered from heartbeat monitor");
        true
    }

    /// Drop agents whose heartbeat has expired. Returns the removed ids.
    pub fn cleanup_stale(&self) -> Vec<AgentId> {
        let mut inner = self.inner.lock();
        let stale: Vec<AgentId> = inner
            .last_beat
            .iter()
            .filter(|(_, last)| last.elapsed() >= self.timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &stale {
            inner.last_beat.remove(id);
            if !inner.reported.remove(id) {
                inner.departed.push(*id);
            }
        }

        if !stale.is_empty() {
            warn!(removed = stale.len(), "Removed stale agents");
        }
        stale
    }

    pub fn agent_status(&self, id: &AgentId) -> Option<HeartbeatStatus> {
        let inner = self.inner.lock();
        inner.last_beat.get(id).map(|last| {
            let since = last.elapsed();
            HeartbeatStatus {
                alive: since < self.timeout,
                since_last_heartbeat: since,
            }
        })
    }

    pub fn tracked(&self) -> usize {
        self.inner.lock().last_beat.len()
    }
}

impl LivenessOracle for HeartbeatMonitor {
    fn alive_agents(&self) -> HashSet<AgentId> {
        let inner = self.inner.lock();
        inner
            .last_beat
            .iter()
            .filter(|(_, last)| last.elapsed() < self.timeout)
            .map(|(id, _)| *id)
            .collect()
    }

    fn take_lost(&self) -> Vec<AgentId> {
        let mut inner = self.inner.lock();
        let mut lost = std::mem::take(&mut inner.departed);

        let expired: Vec<AgentId> = inner
            .last_beat
            .iter()
            .filter(|(id, last)| last.elapsed() >= self.timeout && !inner.reported.contains(id))
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            inner.reported.insert(id);
            lost.push(id);
        }

        if !lost.is_empty() {
            warn!(lost = lost.len(), "Agents stopped sending heartbeats");
        }
        lost
    }

    fn is_alive(&self, id: &AgentId) -> bool {
        self.inner
            .lock()
            .last_beat
            .get(id)
            .is_some_and(|last| last.elapsed() < self.timeout)
    }
}
