use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Settled,
    Rejected,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub id: String,
    pub run_id: String,
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    pub network: String,
    pub asset: String,
    pub amount_atomic: u128,
    pub payment_required_encoded: String,
    pub payment_signature_encoded: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_response_encoded: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub status: ReceiptStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
