use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

use murmur_types::events::GatewayEvent;

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Identifies one live connection (device, tab). A principal may hold many.
pub type SubscriberId = Uuid;

/// Outcome of a single publish.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Per-conversation broadcast of gateway events.
///
/// Every subscriber owns a bounded queue. Publishing never waits: a full
/// queue loses the event, a closed queue is removed on the spot. All
/// publishes go through one lock, so every subscriber of a conversation
/// sees that conversation's events in the same order.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    queue_depth: usize,
    state: Mutex<FanoutState>,
}

#[derive(Default)]
struct FanoutState {
    /// subscriber_id -> owning principal + queue
    subscribers: HashMap<SubscriberId, Subscriber>,

    /// conversation_id -> subscribers joined to it
    rooms: HashMap<Uuid, HashSet<SubscriberId>>,
}

struct Subscriber {
    user_id: Uuid,
    tx: mpsc::Sender<Arc<GatewayEvent>>,
    rooms: HashSet<Uuid>,
}

impl Subscriber {
    fn ack(&self, event: GatewayEvent) {
        if let Err(e) = self.tx.try_send(Arc::new(event)) {
            debug!("Ack for {} not queued: {}", self.user_id, e);
        }
    }
}

impl FanoutState {
    fn remove_subscriber(&mut self, subscriber_id: SubscriberId) -> Option<Subscriber> {
        let subscriber = self.subscribers.remove(&subscriber_id)?;
        for conversation_id in &subscriber.rooms {
            self.leave_room(*conversation_id, subscriber_id);
        }
        Some(subscriber)
    }

    fn leave_room(&mut self, conversation_id: Uuid, subscriber_id: SubscriberId) {
        if let Some(members) = self.rooms.get_mut(&conversation_id) {
            members.remove(&subscriber_id);
            if members.is_empty() {
                self.rooms.remove(&conversation_id);
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl Dispatcher {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                queue_depth: queue_depth.max(1),
                state: Mutex::new(FanoutState::default()),
            }),
        }
    }

    // The maps stay consistent even if a holder panicked, so recover the guard.
    fn state(&self) -> MutexGuard<'_, FanoutState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a connection for `user_id`. Returns its handle and the
    /// receiving end of its event queue.
    pub fn register(&self, user_id: Uuid) -> (SubscriberId, mpsc::Receiver<Arc<GatewayEvent>>) {
        let subscriber_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.inner.queue_depth);
        self.state().subscribers.insert(
            subscriber_id,
            Subscriber {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        debug!("Registered subscriber {} for {}", subscriber_id, user_id);
        (subscriber_id, rx)
    }

    /// Join `subscriber_id` to a conversation. Returns false if the handle is
    /// unknown (already disconnected).
    ///
    /// The `Joined` ack is queued under the same lock as publishes, so it
    /// reaches the subscriber ahead of any event for that conversation.
    pub fn subscribe(&self, conversation_id: Uuid, subscriber_id: SubscriberId) -> bool {
        let mut state = self.state();
        let Some(subscriber) = state.subscribers.get_mut(&subscriber_id) else {
            return false;
        };
        subscriber.rooms.insert(conversation_id);
        subscriber.ack(GatewayEvent::Joined { conversation_id });
        state
            .rooms
            .entry(conversation_id)
            .or_default()
            .insert(subscriber_id);
        true
    }

    /// Leave a conversation. The `Left` ack follows every event already
    /// queued for it.
    pub fn unsubscribe(&self, conversation_id: Uuid, subscriber_id: SubscriberId) {
        let mut state = self.state();
        if let Some(subscriber) = state.subscribers.get_mut(&subscriber_id) {
            if subscriber.rooms.remove(&conversation_id) {
                subscriber.ack(GatewayEvent::Left { conversation_id });
            }
        }
        state.leave_room(conversation_id, subscriber_id);
    }

    /// Drop a connection from every conversation at once.
    pub fn disconnect(&self, subscriber_id: SubscriberId) {
        if let Some(subscriber) = self.state().remove_subscriber(subscriber_id) {
            debug!(
                "Subscriber {} for {} disconnected from {} conversations",
                subscriber_id,
                subscriber.user_id,
                subscriber.rooms.len()
            );
        }
    }

    /// Broadcast `event` to everyone currently joined to the conversation it
    /// is scoped to. Unscoped events reach nobody.
    pub fn publish(&self, event: GatewayEvent) -> PublishReport {
        let mut report = PublishReport::default();
        let Some(conversation_id) = event.conversation_id() else {
            warn!("Refusing to publish unscoped event {:?}", event);
            return report;
        };
        let event = Arc::new(event);
        let mut closed = Vec::new();

        let mut state = self.state();
        let Some(members) = state.rooms.get(&conversation_id) else {
            return report;
        };

        for subscriber_id in members {
            let Some(subscriber) = state.subscribers.get(subscriber_id) else {
                continue;
            };
            match subscriber.tx.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Subscriber {} ({}) queue full, dropping event for conversation {}",
                        subscriber_id, subscriber.user_id, conversation_id
                    );
                    report.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    report.dropped += 1;
                    closed.push(*subscriber_id);
                }
            }
        }

        for subscriber_id in closed {
            state.remove_subscriber(subscriber_id);
        }

        report
    }

    pub fn subscriber_count(&self, conversation_id: Uuid) -> usize {
        self.state()
            .rooms
            .get(&conversation_id)
            .map_or(0, HashSet::len)
    }

    pub fn is_subscribed(&self, conversation_id: Uuid, subscriber_id: SubscriberId) -> bool {
        self.state()
            .rooms
            .get(&conversation_id)
            .is_some_and(|members| members.contains(&subscriber_id))
    }
}

#[cfg(test)]
mod tests {
    use murmur_types::models::MessageStatus;

    use super::*;

    fn update(conversation_id: Uuid, count: usize) -> GatewayEvent {
        GatewayEvent::MessageStatusUpdate {
            conversation_id,
            status: MessageStatus::Delivered,
            message_ids: vec![],
            count,
            updated_by: Uuid::nil(),
        }
    }

    /// Register and join, consuming the `Joined` ack.
    async fn joined_subscriber(
        dispatcher: &Dispatcher,
        conversation_id: Uuid,
    ) -> (SubscriberId, mpsc::Receiver<Arc<GatewayEvent>>) {
        let (sub, mut rx) = dispatcher.register(Uuid::new_v4());
        assert!(dispatcher.subscribe(conversation_id, sub));
        assert_eq!(*rx.recv().await.unwrap(), GatewayEvent::Joined { conversation_id });
        (sub, rx)
    }

    #[tokio::test]
    async fn every_handle_of_a_principal_receives_events() {
        let dispatcher = Dispatcher::default();
        let user = Uuid::new_v4();
        let conv = Uuid::new_v4();

        let (phone, mut phone_rx) = dispatcher.register(user);
        let (laptop, mut laptop_rx) = dispatcher.register(user);
        assert!(dispatcher.subscribe(conv, phone));
        assert!(dispatcher.subscribe(conv, laptop));
        phone_rx.recv().await.unwrap();
        laptop_rx.recv().await.unwrap();

        let report = dispatcher.publish(update(conv, 1));
        assert_eq!(report, PublishReport { delivered: 2, dropped: 0 });
        assert_eq!(*phone_rx.recv().await.unwrap(), update(conv, 1));
        assert_eq!(*laptop_rx.recv().await.unwrap(), update(conv, 1));
    }

    #[tokio::test]
    async fn join_ack_precedes_conversation_events() {
        let dispatcher = Dispatcher::default();
        let conv = Uuid::new_v4();
        let (sub, mut rx) = dispatcher.register(Uuid::new_v4());

        dispatcher.subscribe(conv, sub);
        dispatcher.publish(update(conv, 1));
        dispatcher.unsubscribe(conv, sub);
        dispatcher.publish(update(conv, 2));

        assert_eq!(*rx.recv().await.unwrap(), GatewayEvent::Joined { conversation_id: conv });
        assert_eq!(*rx.recv().await.unwrap(), update(conv, 1));
        assert_eq!(*rx.recv().await.unwrap(), GatewayEvent::Left { conversation_id: conv });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_backlog() {
        let dispatcher = Dispatcher::default();
        let conv = Uuid::new_v4();

        dispatcher.publish(update(conv, 1));

        let (_sub, mut rx) = joined_subscriber(&dispatcher, conv).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn events_scoped_to_their_conversation() {
        let dispatcher = Dispatcher::default();
        let (conv_a, conv_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (_sub, mut rx) = joined_subscriber(&dispatcher, conv_a).await;

        assert_eq!(dispatcher.publish(update(conv_b, 1)).delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unscoped_events_are_not_published() {
        let dispatcher = Dispatcher::default();
        let user = Uuid::new_v4();
        let (_sub, mut rx) = joined_subscriber(&dispatcher, Uuid::new_v4()).await;

        let report = dispatcher.publish(GatewayEvent::Ready { user_id: user });
        assert_eq!(report, PublishReport::default());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn order_preserved_per_subscriber() {
        let dispatcher = Dispatcher::default();
        let conv = Uuid::new_v4();
        let (_sub, mut rx) = joined_subscriber(&dispatcher, conv).await;

        for i in 0..10 {
            dispatcher.publish(update(conv, i));
        }
        for i in 0..10 {
            assert_eq!(*rx.recv().await.unwrap(), update(conv, i));
        }
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_others() {
        let dispatcher = Dispatcher::new(1);
        let conv = Uuid::new_v4();
        let (_slow, _slow_rx) = joined_subscriber(&dispatcher, conv).await;
        let (_fast, mut fast_rx) = joined_subscriber(&dispatcher, conv).await;

        dispatcher.publish(update(conv, 1));
        fast_rx.recv().await.unwrap();

        // Slow queue is full now; its copy is dropped, fast still gets it
        let report = dispatcher.publish(update(conv, 2));
        assert_eq!(report, PublishReport { delivered: 1, dropped: 1 });
        assert_eq!(*fast_rx.recv().await.unwrap(), update(conv, 2));
        assert_eq!(dispatcher.subscriber_count(conv), 2);
    }

    #[tokio::test]
    async fn closed_subscriber_is_removed() {
        let dispatcher = Dispatcher::default();
        let conv = Uuid::new_v4();
        let (sub, rx) = joined_subscriber(&dispatcher, conv).await;
        drop(rx);

        let report = dispatcher.publish(update(conv, 1));
        assert_eq!(report.dropped, 1);
        assert_eq!(dispatcher.subscriber_count(conv), 0);
        assert!(!dispatcher.subscribe(conv, sub));
    }

    #[tokio::test]
    async fn unsubscribe_and_disconnect_take_effect_immediately() {
        let dispatcher = Dispatcher::default();
        let (conv_a, conv_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (sub, mut rx) = joined_subscriber(&dispatcher, conv_a).await;
        dispatcher.subscribe(conv_b, sub);
        rx.recv().await.unwrap();

        dispatcher.unsubscribe(conv_a, sub);
        assert_eq!(*rx.recv().await.unwrap(), GatewayEvent::Left { conversation_id: conv_a });
        assert!(!dispatcher.is_subscribed(conv_a, sub));
        assert_eq!(dispatcher.publish(update(conv_a, 1)).delivered, 0);

        // Leaving twice does not ack twice
        dispatcher.unsubscribe(conv_a, sub);
        assert!(rx.try_recv().is_err());

        dispatcher.disconnect(sub);
        assert_eq!(dispatcher.subscriber_count(conv_b), 0);
        assert_eq!(dispatcher.publish(update(conv_b, 1)).delivered, 0);
        // Queue is closed once the dispatcher dropped its sender
        assert!(rx.recv().await.is_none());
    }
}
