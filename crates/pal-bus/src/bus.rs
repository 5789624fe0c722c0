use std::sync::Mutex;

use pal_store::Store;
use pal_types::{BusEvent, PushType, Result};
use rusqlite::Transaction;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;

use crate::EventFilter;

/// Ring size of each subscriber's inbox. A subscriber that falls further
/// behind than this loses the oldest events and receives a single
/// `events:lag` notice instead.
pub const DEFAULT_CAPACITY: usize = 256;

/// Ordered publish/subscribe with at-least-once delivery to live
/// subscribers. Every mutation that produces events goes through
/// [`EventBus::publish_with`], which couples the store transaction to the
/// fan-out under one lock, so subscribers observe events in commit order.
#[derive(Clone)]
pub struct EventBus {
    store: Store,
    sender: broadcast::Sender<BusEvent>,
    order: std::sync::Arc<Mutex<()>>,
}

impl EventBus {
    pub fn new(store: Store) -> Self {
        Self::with_capacity(store, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(store: Store, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            store,
            sender,
            order: std::sync::Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run a write transaction that may append session events, then fan the
    /// produced [`BusEvent`]s out to subscribers.
    ///
    /// The closure receives the transaction and an event buffer; it appends
    /// its event rows itself (so ids are assigned inside the transaction)
    /// and pushes the matching bus events. The buffer is cleared on each
    /// retry attempt, so an aborted attempt leaks nothing. If the
    /// transaction fails, no event is delivered anywhere.
    pub fn publish_with<T>(
        &self,
        mut f: impl FnMut(&Transaction, &mut Vec<BusEvent>) -> pal_store::Result<T>,
    ) -> Result<T> {
        let _guard = self.order.lock().unwrap();

        let mut events: Vec<BusEvent> = Vec::new();
        let value = {
            let events = &mut events;
            self.store.write(move |tx| {
                events.clear();
                f(tx, events)
            })?
        };

        for event in events {
            debug!(kind = event.kind.as_str(), "bus event");
            // send only fails when nobody is subscribed
            let _ = self.sender.send(event);
        }

        Ok(value)
    }

    /// Fan out a push-only event (never persisted).
    pub fn publish_push(&self, event: BusEvent) {
        let _guard = self.order.lock().unwrap();
        debug!(kind = event.kind.as_str(), "bus push event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A bounded inbox over the bus. Dropped events surface as a synthetic
/// `events:lag` notice to this subscriber only; the bus never blocks
/// publishers on a slow subscriber.
pub struct Subscription {
    receiver: broadcast::Receiver<BusEvent>,
    filter: EventFilter,
}

impl Subscription {
    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    return Some(BusEvent::push(
                        PushType::EventsLag,
                        json!({ "dropped": dropped }),
                    ));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant for callers polling from sync code.
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(dropped)) => {
                    return Some(BusEvent::push(
                        PushType::EventsLag,
                        json!({ "dropped": dropped }),
                    ));
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pal_store::queries;
    use pal_types::{EventKind, EventType};

    fn bus() -> EventBus {
        EventBus::new(Store::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn test_publish_persists_then_fans_out() {
        let bus = bus();
        let mut sub = bus.subscribe(EventFilter::all());

        bus.publish_with(|tx, events| {
            let id = queries::event::append(tx, "S1", EventType::Decision, "{}", Utc::now())?;
            let mut event = BusEvent::session("S1", EventType::Decision, json!({}));
            event.id = id;
            events.push(event);
            Ok(())
        })
        .unwrap();

        let received = sub.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::Session(EventType::Decision));
        assert!(received.id > 0);

        // the row exists with the forwarded id
        let rows = bus
            .store()
            .read(|conn| queries::event::list_for_session(conn, "S1", None))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, received.id);
    }

    #[tokio::test]
    async fn test_failed_transaction_delivers_nothing() {
        let bus = bus();
        let mut sub = bus.subscribe(EventFilter::all());

        let result = bus.publish_with(|tx, events| {
            queries::event::append(tx, "S1", EventType::Decision, "{}", Utc::now())?;
            events.push(BusEvent::session("S1", EventType::Decision, json!({})));
            Err::<(), _>(pal_store::Error::Query("forced".to_string()))
        });
        assert!(result.is_err());

        assert!(sub.try_recv().is_none());
        let rows = bus
            .store()
            .read(|conn| queries::event::list_for_session(conn, "S1", None))
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_slow_subscriber_gets_lag_notice() {
        let store = Store::open_in_memory().unwrap();
        let bus = EventBus::with_capacity(store, 4);
        let mut sub = bus.subscribe(EventFilter::all());

        for i in 0..10 {
            bus.publish_push(BusEvent::push(
                PushType::WorkerSpawn,
                json!({ "seq": i }),
            ));
        }

        let first = sub.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Push(PushType::EventsLag));
        assert!(first.data["dropped"].as_u64().unwrap() > 0);

        // the tail of the ring is still delivered in order
        let next = sub.recv().await.unwrap();
        assert_eq!(next.kind, EventKind::Push(PushType::WorkerSpawn));
    }

    #[tokio::test]
    async fn test_filtered_subscription() {
        let bus = bus();
        let mut sub = bus.subscribe(EventFilter::for_kinds(["worker:spawn"]));

        bus.publish_push(BusEvent::push(PushType::AttentionWarning, json!({})));
        bus.publish_push(BusEvent::push(PushType::WorkerSpawn, json!({})));

        let received = sub.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::Push(PushType::WorkerSpawn));
    }

    #[tokio::test]
    async fn test_unknown_kinds_are_forwarded() {
        let bus = bus();
        let mut sub = bus.subscribe(EventFilter::all());

        let mut event = BusEvent::push(PushType::EventsLag, json!({}));
        event.kind = EventKind::Other("future:type".to_string());
        bus.publish_push(event);

        let received = sub.recv().await.unwrap();
        assert_eq!(received.kind.as_str(), "future:type");
    }
}
