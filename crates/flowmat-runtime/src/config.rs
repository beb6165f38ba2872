use flowmat_core::WorkflowError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds applied to every run of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Longest any single send or receive may wait for its counterpart.
    pub rendezvous_timeout_ms: u64,
    /// Longest the run waits for a started process or relay to hand back control.
    pub completion_timeout_ms: u64,
}

impl RunConfig {
    pub fn rendezvous_timeout(&self) -> Duration {
        Duration::from_millis(self.rendezvous_timeout_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.rendezvous_timeout_ms == 0 {
            return Err(WorkflowError::InvalidConfig(
                "rendezvous_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.completion_timeout_ms < self.rendezvous_timeout_ms {
            return Err(WorkflowError::InvalidConfig(format!(
                "completion_timeout_ms ({}) must not be shorter than rendezvous_timeout_ms ({})",
                self.completion_timeout_ms, self.rendezvous_timeout_ms
            )));
        }
        Ok(())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            rendezvous_timeout_ms: 5_000,
            completion_timeout_ms: 10_000,
        }
    }
}
