use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;

use wfe_config::EngineConfig;
use wfe_store::SharedStore;
use wfe_types::{Actor, Event};

#[derive(Debug, Clone, Serialize)]
pub struct EventFrame {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub ts: DateTime<Utc>,
    pub data: serde_json::Value,
    pub actor: Actor,
}

impl From<Event> for EventFrame {
    fn from(e: Event) -> Self {
        Self {
            id: e.id,
            event_type: e.event_type,
            ts: e.ts,
            data: e.data,
            actor: e.actor,
        }
    }
}

/// One item pushed down the per-connection cursor. `Ping` maps to the raw
/// `: ping\n\n` comment frame; everything else is a `data:` JSON record.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Connected { run_id: String, timestamp: DateTime<Utc> },
    Event(EventFrame),
    Ping,
    RunComplete { status: String },
}

const POLL_BACKOFF_MS: u64 = 4_000;

/// Polls `eventsSince(runId, last)` on a fixed interval, forwarding new
/// events in order and pinging on the keep-alive interval. Closes after the
/// `run_complete` frame once the run reaches a terminal status. Cancellation
/// is entirely the caller's responsibility: dropping the returned stream
/// stops all polling, which is the "safe close" discipline the spec asks
/// for — nothing here holds a lock or a timer past that point.
pub fn subscribe(
    store: SharedStore,
    run_id: String,
    config: std::sync::Arc<EngineConfig>,
) -> impl Stream<Item = StreamItem> {
    async_stream::stream! {
        let started_at = Utc::now();
        yield StreamItem::Connected { run_id: run_id.clone(), timestamp: started_at };

        let mut last = started_at;
        let mut last_ping = started_at;
        let mut poll_interval_ms = config.poll_interval_ms;

        loop {
            tokio::time::sleep(std::time::Duration::from_millis(poll_interval_ms)).await;

            let events = store.events_since(&run_id, last).await;
            poll_interval_ms = config.poll_interval_ms;
            for event in events {
                last = event.ts;
                yield StreamItem::Event(EventFrame::from(event));
            }

            let now = Utc::now();
            if (now - last_ping).num_milliseconds() as u64 >= config.ping_interval_ms {
                yield StreamItem::Ping;
                last_ping = now;
            }

            match store.get_run(&run_id).await {
                Ok(run) if run.status.is_terminal() => {
                    yield StreamItem::RunComplete {
                        status: run.status.as_str().to_string(),
                    };
                    break;
                }
                Ok(_) => {}
                Err(_) => {
                    poll_interval_ms = POLL_BACKOFF_MS;
                }
            }
        }
    }
}
