use crate::process::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What one workflow run accomplished. Returned on success and attached to a
/// failure so partial progress can be inspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Workflow input ports whose staged value was delivered, in delivery order.
    pub delivered: Vec<String>,
    /// Workflow output ports whose value was collected, in collection order.
    pub collected: Vec<String>,
    /// Processes that finished without error.
    pub completed: Vec<String>,
    pub relays_fired: usize,
}

impl RunReport {
    pub fn new(run_id: RunId, workflow: impl Into<String>) -> Self {
        Self {
            run_id,
            workflow: workflow.into(),
            started_at: Utc::now(),
            duration_ms: 0,
            delivered: Vec::new(),
            collected: Vec::new(),
            completed: Vec::new(),
            relays_fired: 0,
        }
    }
}
