//! Scheduler configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DelegationError, Result};

/// Tunables for the scheduler and its liveness plumbing
///
/// Every field has a default, so a config file only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Priority given to tasks submitted without one (1 = most urgent)
    pub default_priority: i32,
    /// Heartbeat age after which an agent is considered dead. Read by
    /// [`HeartbeatMonitor::from_config`](crate::liveness::HeartbeatMonitor::from_config).
    pub heartbeat_timeout_secs: u64,
    /// How often the service loop drains the oracle for lost agents
    pub liveness_poll_interval_ms: u64,
    /// Concurrent assignment limit given to newly registered agents.
    /// `None` leaves the workload counter as a pure balancing signal.
    pub agent_capacity: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_priority: 5,
            heartbeat_timeout_secs: 60,
            liveness_poll_interval_ms: 1_000,
            agent_capacity: None,
        }
    }
}

impl SchedulerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DelegationError::Config(format!("invalid scheduler config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DelegationError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_timeout_secs == 0 {
            return Err(DelegationError::Config(
                "heartbeat_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.liveness_poll_interval_ms == 0 {
            return Err(DelegationError::Config(
                "liveness_poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.agent_capacity == Some(0) {
            return Err(DelegationError::Config(
                "agent_capacity must be greater than zero when set".into(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn liveness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.default_priority, 5);
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(60));
        assert_eq!(config.liveness_poll_interval(), Duration::from_secs(1));
        assert!(config.agent_capacity.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SchedulerConfig::from_json_str(r#"{ "heartbeat_timeout_secs": 10 }"#).unwrap();
        assert_eq!(config.heartbeat_timeout_secs, 10);
        assert_eq!(config.default_priority, 5);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = SchedulerConfig::from_json_str(r#"{ "heartbeat_timeout_secs": 0 }"#).unwrap_err();
        assert!(matches!(err, DelegationError::Config(_)));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(SchedulerConfig::from_json_str(r#"{ "agent_capacity": 0 }"#).is_err());
        let config = SchedulerConfig::from_json_str(r#"{ "agent_capacity": 2 }"#).unwrap();
        assert_eq!(config.agent_capacity, Some(2));
    }

    #[test]
    fn test_malformed_json_rejected() {
        let err = SchedulerConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, DelegationError::Config(msg) if msg.contains("invalid scheduler config")));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "default_priority": 3, "liveness_poll_interval_ms": 250 }}"#).unwrap();

        let config = SchedulerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.default_priority, 3);
        assert_eq!(config.liveness_poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SchedulerConfig::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, DelegationError::Config(_)));
    }
}
