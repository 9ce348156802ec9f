//! Dispatch table for inbound events.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::connection::DisconnectReason;

/// Callback invoked with the payload of a matching inbound event.
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Callback invoked once when the connection closes.
pub type DisconnectHandler = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;

/// Event name to handler table, shared between the connection handle and its
/// reader task.
#[derive(Default)]
pub(crate) struct Subscriptions {
    handlers: parking_lot::RwLock<HashMap<String, Vec<EventHandler>>>,
    waiters: parking_lot::Mutex<HashMap<String, Vec<oneshot::Sender<Value>>>>,
    on_disconnect: parking_lot::Mutex<Vec<DisconnectHandler>>,
}

impl Subscriptions {
    pub(crate) fn subscribe(&self, event: &str, handler: EventHandler) {
        self.handlers
            .write()
            .entry(event.to_string())
            .or_default()
            .push(handler);
    }

    pub(crate) fn once(&self, event: &str) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        // Drop waiters whose receiver gave up, e.g. a ping that timed out.
        waiters.retain(|_, pending| {
            pending.retain(|tx| !tx.is_closed());
            !pending.is_empty()
        });
        waiters.entry(event.to_string()).or_default().push(tx);
        rx
    }

    pub(crate) fn on_disconnect(&self, handler: DisconnectHandler) {
        self.on_disconnect.lock().push(handler);
    }

    /// Deliver one inbound event. Returns how many receivers saw it.
    pub(crate) fn dispatch(&self, event: &str, payload: &Value) -> usize {
        // Clone out so handlers may subscribe without deadlocking.
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .get(event)
            .cloned()
            .unwrap_or_default();
        let waiters = self.waiters.lock().remove(event).unwrap_or_default();

        let mut delivered = 0;
        for handler in &handlers {
            handler(payload);
            delivered += 1;
        }
        for waiter in waiters {
            if waiter.send(payload.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Fire lifecycle handlers and drop pending one-shot waiters.
    pub(crate) fn notify_disconnect(&self, reason: &DisconnectReason) {
        self.waiters.lock().clear();
        let handlers: Vec<DisconnectHandler> = self.on_disconnect.lock().clone();
        for handler in &handlers {
            handler(reason);
        }
    }
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let events: Vec<String> = self.handlers.read().keys().cloned().collect();
        f.debug_struct("Subscriptions")
            .field("events", &events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_reaches_matching_handlers_only() {
        let subs = Subscriptions::default();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let hits = hits.clone();
            subs.subscribe(
                "deviceCommand",
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        assert_eq!(subs.dispatch("deviceCommand", &json!({"command": "STOP"})), 2);
        assert_eq!(subs.dispatch("other", &Value::Null), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_once_fires_a_single_time() {
        let subs = Subscriptions::default();
        let rx = subs.once("pingResponse");
        assert_eq!(subs.dispatch("pingResponse", &Value::Null), 1);
        assert_eq!(rx.await.unwrap(), Value::Null);
        assert_eq!(subs.dispatch("pingResponse", &Value::Null), 0);
    }

    #[test]
    fn test_abandoned_waiters_are_pruned() {
        let subs = Subscriptions::default();
        for _ in 0..10 {
            drop(subs.once("pingResponse"));
        }
        let _live = subs.once("pingResponse");
        assert_eq!(subs.waiters.lock().get("pingResponse").map(Vec::len), Some(1));

        drop(subs.once("other"));
        let _next = subs.once("pingResponse");
        let waiters = subs.waiters.lock();
        assert!(!waiters.contains_key("other"));
        assert_eq!(waiters.get("pingResponse").map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_disconnect_drops_waiters() {
        let subs = Subscriptions::default();
        let rx = subs.once("pingResponse");
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let sink = seen.clone();
        subs.on_disconnect(Arc::new(move |reason| {
            *sink.lock() = Some(reason.clone());
        }));

        subs.notify_disconnect(&DisconnectReason::Error("reset".into()));
        assert!(rx.await.is_err());
        assert_eq!(*seen.lock(), Some(DisconnectReason::Error("reset".into())));
    }
}
