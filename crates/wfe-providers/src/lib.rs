//! Contracts for external collaborators the engine calls out to: the
//! planner, tool discovery, the LLM, the wallet, and identity. Each is a
//! plain `async_trait` seam — no implementation lives in this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use wfe_types::Graph;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanResult {
    pub success: bool,
    pub graph: Option<Graph>,
    pub reasoning: Option<String>,
    pub estimated_cost_atomic: Option<u128>,
    pub error: Option<String>,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        intent: &str,
        available_tools: &[wfe_types::Tool],
        budget_ceiling_atomic: u128,
        auto_pay_enabled: bool,
    ) -> anyhow::Result<PlanResult>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDiscoveryMatch {
    pub tool: wfe_types::Tool,
    pub score: f64,
}

#[async_trait]
pub trait ToolDiscovery: Send + Sync {
    async fn discover(
        &self,
        intent: &str,
        workspace_id: &str,
        max_results: usize,
    ) -> anyhow::Result<Vec<ToolDiscoveryMatch>>;
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    pub reasoning: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub reasoning: Option<bool>,
    pub store: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub usage: LlmUsage,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn call(&self, request: LlmRequest) -> anyhow::Result<LlmResponse>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequirement {
    pub scheme: String,
    pub network: String,
    pub asset: String,
    pub amount_atomic: u128,
    pub recipient: String,
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
    pub raw: Value,
}

#[async_trait]
pub trait Wallet: Send + Sync {
    async fn balance(&self, address: &str, network: &str) -> anyhow::Result<u128>;
    async fn sign(&self, requirement: &PaymentRequirement) -> anyhow::Result<Vec<u8>>;
    fn address(&self) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// Session authentication and workspace membership. The boundary never
/// implements these itself — it calls out to whatever identity provider
/// the deployment wires in.
#[async_trait]
pub trait Identity: Send + Sync {
    async fn authn(&self, token: &str) -> anyhow::Result<Option<AuthenticatedUser>>;
    async fn is_member(&self, user_id: &str, workspace_id: &str) -> anyhow::Result<bool>;
}
