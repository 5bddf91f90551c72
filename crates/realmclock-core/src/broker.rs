//! Message broker for lifecycle and informational notifications.
//!
//! Periods and worlds publish [`EngineMessage`]s through a
//! [`MessageBroker`] handed to them at construction. The broker is an
//! injected collaborator: nothing in the core reaches for a process-wide
//! instance.
//!
//! [`InMemoryBroker`] is the in-process implementation. It fans messages
//! out through a [`tokio::sync::broadcast`] channel and runs one delivery
//! task per subscriber, so every subscriber sees messages in publish
//! order and a slow subscriber never blocks a publisher.

use std::sync::Arc;

use realmclock_types::{PeriodId, RealmId, TimeOfDay, WorldId};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::events::Subscription;

/// Default capacity of the broadcast channel.
///
/// A subscriber that falls behind by more than this many messages skips
/// ahead to the oldest message still buffered.
pub const DEFAULT_BROKER_CAPACITY: usize = 1024;

/// A notification published by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineMessage {
    /// A period started its clock.
    PeriodInitialized {
        /// The period.
        period_id: PeriodId,
        /// Period name.
        name: String,
        /// Time the period's clock starts from.
        start_time: TimeOfDay,
        /// Real-world milliseconds between clock ticks.
        interval_ms: u64,
    },
    /// A period stopped its clock and went back to its start time.
    PeriodReset {
        /// The period.
        period_id: PeriodId,
        /// Period name.
        name: String,
    },
    /// A world swapped its active period.
    WorldTimeChanged {
        /// The world.
        world_id: WorldId,
        /// World name.
        world: String,
        /// Name of the period that was active before the swap, if any.
        previous: Option<String>,
        /// Name of the period that is active now.
        current: String,
        /// World time at the swap.
        time: TimeOfDay,
    },
    /// A realm joined a world.
    RealmAttached {
        /// The world.
        world_id: WorldId,
        /// The realm.
        realm_id: RealmId,
        /// Realm name.
        realm: String,
    },
    /// A realm left a world.
    RealmDetached {
        /// The world.
        world_id: WorldId,
        /// The realm.
        realm_id: RealmId,
        /// Realm name.
        realm: String,
    },
    /// Free-form informational text.
    Information {
        /// The message text.
        message: String,
    },
}

impl EngineMessage {
    /// Build an [`EngineMessage::Information`] message.
    pub fn information(message: impl Into<String>) -> Self {
        Self::Information {
            message: message.into(),
        }
    }

    /// Return the serialized `kind` tag of this message.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PeriodInitialized { .. } => "period_initialized",
            Self::PeriodReset { .. } => "period_reset",
            Self::WorldTimeChanged { .. } => "world_time_changed",
            Self::RealmAttached { .. } => "realm_attached",
            Self::RealmDetached { .. } => "realm_detached",
            Self::Information { .. } => "information",
        }
    }
}

/// Predicate deciding whether a subscriber receives a message.
pub type MessageFilter = Box<dyn Fn(&EngineMessage) -> bool + Send + Sync>;

/// Receiver of the messages a subscriber accepted.
pub type MessageHandler = Box<dyn FnMut(EngineMessage) + Send>;

/// Publish/subscribe channel for [`EngineMessage`]s.
pub trait MessageBroker: Send + Sync {
    /// Publish `message` to every current subscriber.
    fn publish(&self, message: EngineMessage);

    /// Register `handler` for every message accepted by `filter` (all
    /// messages when `filter` is `None`). Dropping the returned
    /// [`Subscription`] stops delivery.
    fn subscribe(&self, filter: Option<MessageFilter>, handler: MessageHandler) -> Subscription;
}

/// Shared handle to a broker.
pub type SharedBroker = Arc<dyn MessageBroker>;

/// In-process broker backed by a [`broadcast`] channel.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    tx: broadcast::Sender<EngineMessage>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_BROKER_CAPACITY)
    }
}

impl InMemoryBroker {
    /// Create a broker buffering up to `capacity` messages per subscriber.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Return the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl MessageBroker for InMemoryBroker {
    fn publish(&self, message: EngineMessage) {
        let kind = message.kind();
        if self.tx.send(message).is_err() {
            debug!(kind, "no broker subscribers, message dropped");
        }
    }

    fn subscribe(
        &self,
        filter: Option<MessageFilter>,
        mut handler: MessageHandler,
    ) -> Subscription {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("broker subscription requested outside a tokio runtime, ignoring");
            return Subscription::new(|| {});
        };

        let mut rx = self.tx.subscribe();
        let task = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if filter.as_ref().is_none_or(|accept| accept(&message)) {
                            handler(message);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "broker subscriber lagged, skipping ahead");
                    }
                    Err(RecvError::Closed) => {
                        debug!("broker channel closed, ending delivery");
                        return;
                    }
                }
            }
        });

        Subscription::new(move || task.abort())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    fn collecting_handler() -> (MessageHandler, mpsc::UnboundedReceiver<EngineMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: MessageHandler = Box::new(move |message| {
            let _ = tx.send(message);
        });
        (handler, rx)
    }

    fn reset(name: &str) -> EngineMessage {
        EngineMessage::PeriodReset {
            period_id: PeriodId::new(),
            name: name.to_owned(),
        }
    }

    #[tokio::test]
    async fn subscriber_sees_messages_in_publish_order() {
        let broker = InMemoryBroker::default();
        let (handler, mut rx) = collecting_handler();
        let _sub = broker.subscribe(None, handler);

        broker.publish(EngineMessage::information("one"));
        broker.publish(EngineMessage::information("two"));
        broker.publish(EngineMessage::information("three"));

        for expected in ["one", "two", "three"] {
            let message = rx.recv().await.unwrap();
            assert_eq!(message, EngineMessage::information(expected));
        }
    }

    #[tokio::test]
    async fn filter_limits_delivery() {
        let broker = InMemoryBroker::default();
        let (handler, mut rx) = collecting_handler();
        let _sub = broker.subscribe(
            Some(Box::new(|m| matches!(m, EngineMessage::PeriodReset { .. }))),
            handler,
        );

        broker.publish(EngineMessage::information("ignored"));
        broker.publish(reset("Evening"));

        let message = rx.recv().await.unwrap();
        assert_eq!(message.kind(), "period_reset");
    }

    #[tokio::test]
    async fn dropping_subscription_stops_delivery() {
        let broker = InMemoryBroker::default();
        let (handler, mut rx) = collecting_handler();
        let sub = broker.subscribe(None, handler);
        assert_eq!(broker.subscriber_count(), 1);

        drop(sub);
        broker.publish(EngineMessage::information("too late"));

        // The aborted delivery task drops the handler, closing the channel.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_harmless() {
        let broker = InMemoryBroker::new(0);
        broker.publish(EngineMessage::information("nobody listening"));
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[test]
    fn messages_serialize_with_kind_tag() {
        let json = serde_json::to_value(EngineMessage::information("hello")).unwrap();
        assert_eq!(json["kind"], "information");
        assert_eq!(json["message"], "hello");

        let json = serde_json::to_value(reset("Morning")).unwrap();
        assert_eq!(json["kind"], "period_reset");
        assert_eq!(json["name"], "Morning");
    }
}
