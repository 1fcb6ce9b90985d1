use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::NodeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Blocked,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Failed)
    }

    pub fn is_pending(self) -> bool {
        matches!(self, StepStatus::Queued | StepStatus::Running | StepStatus::Blocked)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLock {
    pub worker_id: String,
    pub locked_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepMetrics {
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_atomic: Option<u128>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub run_id: String,
    pub workspace_id: String,
    pub step_id: String,
    pub node_type: NodeType,
    pub status: StepStatus,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<StepLock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StepMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_eligible_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Step {
    pub fn new_queued(run_id: &str, workspace_id: &str, step_id: &str, node_type: NodeType) -> Self {
        let ts = crate::now();
        Self {
            run_id: run_id.to_string(),
            workspace_id: workspace_id.to_string(),
            step_id: step_id.to_string(),
            node_type,
            status: StepStatus::Queued,
            attempt: 0,
            locked_by: None,
            inputs: None,
            outputs: None,
            error: None,
            metrics: None,
            next_eligible_at: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    pub fn new_blocked(run_id: &str, workspace_id: &str, step_id: &str, node_type: NodeType) -> Self {
        let mut step = Self::new_queued(run_id, workspace_id, step_id, node_type);
        step.status = StepStatus::Blocked;
        step
    }
}

/// Overflow storage for a step output too large to inline on the `Step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepArtifact {
    pub id: String,
    pub run_id: String,
    pub step_id: String,
    pub kind: String,
    pub blob: Vec<u8>,
}
