//! HTTP request/response and SSE frame shapes for the engine's public
//! surface.

pub mod atomic_amount;

use serde::{Deserialize, Serialize};

use wfe_scheduler::{StreamItem, TickResult};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRunRequest {
    pub workspace_id: String,
    pub intent: String,
    #[serde(default)]
    pub voice_transcript: Option<String>,
    #[serde(default, with = "atomic_amount::option")]
    pub budget_max_atomic: Option<u128>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRunResponse {
    pub run_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickCountsResponse {
    pub success: bool,
    pub claimed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub retrying: u32,
    pub blocked: u32,
    pub latency_ms: u64,
}

impl TickCountsResponse {
    pub fn from_tick(result: TickResult, latency_ms: u64) -> Self {
        Self {
            success: true,
            claimed: result.claimed,
            succeeded: result.succeeded,
            failed: result.failed,
            retrying: result.retrying,
            blocked: result.blocked,
            latency_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseFrame {
    Connected {
        #[serde(rename = "runId")]
        run_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
    #[serde(rename = "event")]
    Record {
        id: String,
        #[serde(rename = "type")]
        event_type: String,
        ts: chrono::DateTime<chrono::Utc>,
        data: serde_json::Value,
        actor: wfe_types::Actor,
    },
    RunComplete {
        status: String,
    },
}

/// Maps an internal `StreamItem` to its wire frame. `Ping` has no JSON body
/// — the transport layer writes the raw `: ping\n\n` comment line instead.
pub fn to_sse_frame(item: StreamItem) -> Option<SseFrame> {
    match item {
        StreamItem::Connected { run_id, timestamp } => Some(SseFrame::Connected { run_id, timestamp }),
        StreamItem::Event(frame) => Some(SseFrame::Record {
            id: frame.id,
            event_type: frame.event_type,
            ts: frame.ts,
            data: frame.data,
            actor: frame.actor,
        }),
        StreamItem::RunComplete { status } => Some(SseFrame::RunComplete { status }),
        StreamItem::Ping => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_run_request_parses_decimal_string_budget() {
        let json = r#"{"workspaceId":"w1","intent":"book a flight","budgetMaxAtomic":"5000000"}"#;
        let request: CreateRunRequest = serde_json::from_str(
            &json.replace("workspaceId", "workspace_id").replace("budgetMaxAtomic", "budget_max_atomic"),
        )
        .unwrap();
        assert_eq!(request.budget_max_atomic, Some(5_000_000));
    }

    #[test]
    fn connected_frame_serializes_with_tagged_type() {
        let frame = SseFrame::RunComplete { status: "succeeded".to_string() };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "run_complete");
        assert_eq!(value["status"], "succeeded");
    }
}
