//! Agent record - a single worker known to the registry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, Capabilities};

/// A registered worker agent
///
/// Liveness is not stored here; it is asked of the
/// [`LivenessOracle`](crate::liveness::LivenessOracle) at decision time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier
    pub id: AgentId,
    /// Capability tags this agent offers
    pub capabilities: Capabilities,
    /// Number of tasks currently assigned and unfinished
    pub workload: u32,
    /// Maximum concurrent assignments; unlimited when `None`
    pub capacity: Option<u32>,
    /// Registration order, used to break workload ties
    pub seq: u64,
    pub registered_at: DateTime<Utc>,
}

impl Agent {
    pub(crate) fn new(id: AgentId, capabilities: Capabilities, capacity: Option<u32>, seq: u64) -> Self {
        Self {
            id,
            capabilities,
            workload: 0,
            capacity,
            seq,
            registered_at: Utc::now(),
        }
    }

    /// Check if this agent offers every required capability
    pub fn can_handle(&self, required: &Capabilities) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// Whether one more assignment fits under the capacity limit
    pub fn has_free_slot(&self) -> bool {
        self.capacity.map_or(true, |cap| self.workload < cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::capabilities;

    #[test]
    fn test_agent_creation() {
        let agent = Agent::new(AgentId::new(), capabilities(["build"]), None, 0);
        assert_eq!(agent.workload, 0);
        assert!(agent.has_free_slot());
    }

    #[test]
    fn test_capacity_limit() {
        let mut agent = Agent::new(AgentId::new(), Capabilities::new(), Some(1), 0);
        assert!(agent.has_free_slot());
        agent.workload = 1;
        assert!(!agent.has_free_slot());
    }

    #[test]
    fn test_capability_superset() {
        let agent = Agent::new(AgentId::new(), capabilities(["build", "deploy"]), None, 0);

        assert!(agent.can_handle(&capabilities(["deploy"])));
        assert!(agent.can_handle(&capabilities(["build", "deploy"])));
        assert!(agent.can_handle(&Capabilities::new()));
        assert!(!agent.can_handle(&capabilities(["deploy", "security"])));
    }
}
