use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    System,
    Agent,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub actor_type: ActorType,
    pub id: String,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            id: "system".to_string(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::User,
            id: id.into(),
        }
    }
}

/// Append-only per-run event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub run_id: String,
    pub workspace_id: String,
    pub event_type: String,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub data: Value,
    pub actor: Actor,
}

impl Event {
    pub fn new(
        run_id: impl Into<String>,
        workspace_id: impl Into<String>,
        event_type: impl Into<String>,
        data: Value,
        actor: Actor,
    ) -> Self {
        Self {
            id: crate::new_id(),
            run_id: run_id.into(),
            workspace_id: workspace_id.into(),
            event_type: event_type.into(),
            ts: crate::now(),
            data,
            actor,
        }
    }
}

pub mod event_types {
    pub const RUN_CREATED: &str = "RUN_CREATED";
    pub const RUN_STARTED: &str = "RUN_STARTED";
    pub const RUN_PAUSED: &str = "RUN_PAUSED";
    pub const RUN_RESUMED: &str = "RUN_RESUMED";
    pub const RUN_SUCCEEDED: &str = "RUN_SUCCEEDED";
    pub const RUN_FAILED: &str = "RUN_FAILED";
    pub const RUN_CANCELED: &str = "RUN_CANCELED";
    pub const RUN_PLANNING_FAILED: &str = "RUN_PLANNING_FAILED";
    pub const STEP_STARTED: &str = "STEP_STARTED";
    pub const STEP_SUCCEEDED: &str = "STEP_SUCCEEDED";
    pub const STEP_FAILED: &str = "STEP_FAILED";
    pub const STEP_BLOCKED: &str = "STEP_BLOCKED";
    pub const STEP_RETRY_SCHEDULED: &str = "STEP_RETRY_SCHEDULED";
    pub const STEP_SKIPPED: &str = "STEP_SKIPPED";
    pub const PAYMENT_REQUIRED_RECEIVED: &str = "402_RECEIVED";
    pub const PAYMENT_SENT: &str = "PAYMENT_SENT";
    pub const PAYMENT_CONFIRMED: &str = "PAYMENT_CONFIRMED";
    pub const PAYMENT_FAILED: &str = "PAYMENT_FAILED";
    pub const EXECUTION_ERROR: &str = "EXECUTION_ERROR";
}
