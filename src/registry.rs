//! Agent registry - identity, capabilities and workload counters

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, info};

use crate::agent::Agent;
use crate::error::{DelegationError, Result};
use crate::types::{AgentId, Capabilities};

/// Tracks every agent ever registered
///
/// Records are never removed here; dead agents are filtered out through the
/// alive set handed to [`capable_agents`](Self::capable_agents).
pub struct AgentRegistry {
    agents: HashMap<AgentId, Agent>,
    /// Registration order
    order: Vec<AgentId>,
}

impl AgentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Register an agent with zero workload and no capacity limit
    pub fn register(&mut self, id: AgentId, capabilities: Capabilities) -> Result<&Agent> {
        self.register_with_capacity(id, capabilities, None)
    }

    pub fn register_with_capacity(
        &mut self,
        id: AgentId,
        capabilities: Capabilities,
        capacity: Option<u32>,
    ) -> Result<&Agent> {
        if self.agents.contains_key(&id) {
            return Err(DelegationError::DuplicateAgent(id));
        }

        let seq = self.order.len() as u64;
        info!(agent_id = %id, capabilities = ?capabilities, capacity = ?capacity, "Registered agent");

        self.order.push(id);
        Ok(&*self
            .agents
            .entry(id)
            .or_insert(Agent::new(id, capabilities, capacity, seq)))
    }

    /// Agents offering every required capability that are in `alive`
    ///
    /// `alive` must be a snapshot taken from the liveness oracle for the
    /// current scheduling pass. Results come back in registration order.
    pub fn capable_agents(&self, required: &Capabilities, alive: &HashSet<AgentId>) -> Vec<&Agent> {
        self.order
            .iter()
            .filter(|id| alive.contains(id))
            .filter_map(|id| self.agents.get(id))
            .filter(|agent| agent.can_handle(required))
            .collect()
    }

    /// The least-loaded capable live agent with a free slot, earliest
    /// registration on ties
    pub fn least_loaded(&self, required: &Capabilities, alive: &HashSet<AgentId>) -> Option<AgentId> {
        self.capable_agents(required, alive)
            .into_iter()
            .filter(|agent| agent.has_free_slot())
            .min_by_key(|agent| (agent.workload, agent.seq))
            .map(|agent| agent.id)
    }

    /// Change an agent's concurrent assignment limit
    ///
    /// Lowering it below the current workload does not revoke anything; the
    /// agent just receives no more work until it drains.
    pub fn set_capacity(&mut self, id: &AgentId, capacity: Option<u32>) -> Result<()> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or(DelegationError::UnknownAgent(*id))?;
        agent.capacity = capacity;
        debug!(agent_id = %id, capacity = ?capacity, "Capacity changed");
        Ok(())
    }

    pub fn increment_workload(&mut self, id: &AgentId) -> Result<u32> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or(DelegationError::UnknownAgent(*id))?;
        agent.workload += 1;
        debug!(agent_id = %id, workload = agent.workload, "Workload incremented");
        Ok(agent.workload)
    }

    /// Fails with [`DelegationError::WorkloadUnderflow`] rather than go below zero
    pub fn decrement_workload(&mut self, id: &AgentId) -> Result<u32> {
        let agent = self
            .agents
            .get_mut(id)
            .ok_or(DelegationError::UnknownAgent(*id))?;

        if agent.workload == 0 {
            error!(agent_id = %id, "Workload would drop below zero");
            return Err(DelegationError::WorkloadUnderflow(*id));
        }

        agent.workload -= 1;
        debug!(agent_id = %id, workload = agent.workload, "Workload decremented");
        Ok(agent.workload)
    }

    /// Get an agent by ID
    pub fn get(&self, id: &AgentId) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents.contains_key(id)
    }

    /// All agents in registration order
    pub fn agents(&self) -> Vec<&Agent> {
        self.order.iter().filter_map(|id| self.agents.get(id)).collect()
    }

    /// Get total agent count
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
