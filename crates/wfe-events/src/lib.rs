//! Append-only event log plus a low-latency broadcast tap for same-process
//! subscribers.

use std::sync::Arc;

use tokio::sync::broadcast;

use wfe_store::{SharedStore, StoreResult};
use wfe_types::Event;

/// Broadcasts newly appended events to in-process listeners. Purely an
/// optimization: a lagged or dropped receiver never loses correctness
/// because `EventLog::events_since` always re-derives state from the store.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(4096);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct EventLog {
    store: SharedStore,
    bus: EventBus,
}

impl EventLog {
    pub fn new(store: SharedStore, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// `append(event)` is infallible on a valid event and sets `ts = now`
    /// (already stamped by `Event::new`). Events are never mutated or
    /// deleted after this call.
    pub async fn append(&self, event: Event) -> StoreResult<()> {
        self.store.append_event(event.clone()).await?;
        self.bus.publish(event);
        Ok(())
    }

    /// Returns events with `ts > after`, ordered ascending.
    pub async fn events_since(
        &self,
        run_id: &str,
        after: chrono::DateTime<chrono::Utc>,
    ) -> Vec<Event> {
        self.store.events_since(run_id, after).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }
}

pub type SharedEventLog = Arc<EventLog>;

#[cfg(test)]
mod tests {
    use super::*;
    use wfe_types::{Actor, Event};

    #[tokio::test]
    async fn events_since_is_monotonic_and_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let store: SharedStore = Arc::new(wfe_store::Store::new(dir.path()).await.unwrap());
        let log = EventLog::new(store, EventBus::new());

        let t0 = chrono::Utc::now() - chrono::Duration::seconds(1);
        log.append(Event::new("r1", "w1", "A", serde_json::json!({}), Actor::system()))
            .await
            .unwrap();
        log.append(Event::new("r1", "w1", "B", serde_json::json!({}), Actor::system()))
            .await
            .unwrap();

        let events = log.events_since("r1", t0).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].ts <= events[1].ts);
        assert_eq!(events[0].event_type, "A");
    }
}
