use serde::{Deserialize, Serialize};

use crate::{Graph, WorkspaceSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Draft,
    Queued,
    Running,
    PausedForApproval,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled)
    }

    pub fn is_executable(self) -> bool {
        matches!(
            self,
            RunStatus::Queued | RunStatus::Running | RunStatus::PausedForApproval
        )
    }

    /// The wire-format (snake_case) rendering of this status — kept in sync
    /// with the `#[serde(rename_all = "snake_case")]` derive above so every
    /// caller that needs a bare string gets the same spelling serde does.
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Draft => "draft",
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::PausedForApproval => "paused_for_approval",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunInput {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_transcript: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBudget {
    pub asset: String,
    pub network: String,
    pub max_atomic: u128,
    #[serde(default)]
    pub spent_atomic: u128,
}

/// `workspace.settings` frozen at run creation — never re-read at execution
/// time, so a workspace policy change never mutates an in-flight run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoPayPolicySnapshot {
    pub auto_pay_enabled: bool,
    pub auto_pay_max_per_step_atomic: u128,
    pub auto_pay_max_per_run_atomic: u128,
    pub tool_allowlist: Vec<String>,
}

impl From<WorkspaceSettings> for AutoPayPolicySnapshot {
    fn from(settings: WorkspaceSettings) -> Self {
        Self {
            auto_pay_enabled: settings.auto_pay_enabled,
            auto_pay_max_per_step_atomic: settings.auto_pay_max_per_step_atomic,
            auto_pay_max_per_run_atomic: settings.auto_pay_max_per_run_atomic,
            tool_allowlist: settings.tool_allowlist,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub workspace_id: String,
    pub created_by: String,
    pub status: RunStatus,
    pub input: RunInput,
    pub graph: Graph,
    pub budget: RunBudget,
    pub auto_pay_policy: AutoPayPolicySnapshot,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Run {
    pub fn new(
        workspace_id: impl Into<String>,
        created_by: impl Into<String>,
        input: RunInput,
        graph: Graph,
        budget: RunBudget,
        auto_pay_policy: AutoPayPolicySnapshot,
    ) -> Self {
        let ts = crate::now();
        Self {
            id: crate::new_id(),
            workspace_id: workspace_id.into(),
            created_by: created_by.into(),
            status: RunStatus::Draft,
            input,
            graph,
            budget,
            auto_pay_policy,
            tags: Vec::new(),
            created_at: ts,
            updated_at: ts,
            last_heartbeat_at: None,
        }
    }
}
