use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Imported,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEndpoint {
    pub path: String,
    pub method: HttpMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolReputation {
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    #[serde(default)]
    pub avg_latency_ms: f64,
    #[serde(default)]
    pub dispute_rate: f64,
}

fn default_success_rate() -> f64 {
    1.0
}

impl Default for ToolReputation {
    fn default() -> Self {
        Self {
            success_rate: default_success_rate(),
            avg_latency_ms: 0.0,
            dispute_rate: 0.0,
        }
    }
}

/// Exponential moving average smoothing factor for reputation updates.
pub const REPUTATION_EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typical_amount_atomic: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub description: String,
    pub base_url: String,
    #[serde(default)]
    pub endpoints: Vec<ToolEndpoint>,
    pub source: ToolSource,
    #[serde(default)]
    pub reputation: ToolReputation,
    #[serde(default)]
    pub pricing_hints: PricingHints,
}

impl Tool {
    /// Updates `reputation` with an exponential moving average over the
    /// latest invocation's outcome, alpha = 0.1.
    pub fn record_invocation(&mut self, success: bool, latency_ms: f64) {
        let alpha = REPUTATION_EMA_ALPHA;
        let outcome = if success { 1.0 } else { 0.0 };
        self.reputation.success_rate =
            alpha * outcome + (1.0 - alpha) * self.reputation.success_rate;
        self.reputation.avg_latency_ms =
            alpha * latency_ms + (1.0 - alpha) * self.reputation.avg_latency_ms;
        if !success {
            self.reputation.dispute_rate =
                alpha * 1.0 + (1.0 - alpha) * self.reputation.dispute_rate;
        } else {
            self.reputation.dispute_rate = (1.0 - alpha) * self.reputation.dispute_rate;
        }
    }
}
