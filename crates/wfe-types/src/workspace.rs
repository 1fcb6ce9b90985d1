use serde::{Deserialize, Serialize};

/// Tenant boundary. Identity is immutable; `settings` is the only mutable
/// part and is snapshotted onto each `Run` at creation time (see `run.rs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub settings: WorkspaceSettings,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default)]
    pub auto_pay_enabled: bool,
    #[serde(default = "default_per_step_cap")]
    pub auto_pay_max_per_step_atomic: u128,
    #[serde(default = "default_per_run_cap")]
    pub auto_pay_max_per_run_atomic: u128,
    #[serde(default)]
    pub tool_allowlist: Vec<String>,
}

fn default_per_step_cap() -> u128 {
    1_000_000
}

fn default_per_run_cap() -> u128 {
    10_000_000
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            auto_pay_enabled: false,
            auto_pay_max_per_step_atomic: default_per_step_cap(),
            auto_pay_max_per_run_atomic: default_per_run_cap(),
            tool_allowlist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: String,
    pub workspace_id: String,
    pub role: MemberRole,
}

impl Workspace {
    pub fn new(name: impl Into<String>) -> Self {
        let ts = crate::now();
        Self {
            id: crate::new_id(),
            name: name.into(),
            settings: WorkspaceSettings::default(),
            created_at: ts,
            updated_at: ts,
        }
    }
}
