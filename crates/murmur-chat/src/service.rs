use std::sync::Arc;

use tracing::{debug, error, info};
use uuid::Uuid;

use murmur_db::Database;
use murmur_types::error::ChatError;
use murmur_types::events::GatewayEvent;
use murmur_types::models::{Conversation, Message};

use crate::delivery::{self, Transition};
use crate::fanout::{Dispatcher, SubscriberId};
use crate::store::NewMessage;
use crate::{activity, resolver, store};

/// Entry point for every chat operation.
///
/// Blocking SQLite work runs on the blocking pool. Mutations commit first
/// and publish to the fanout afterwards; the publish result never changes
/// the outcome returned to the caller.
#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

impl ChatService {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self { db, dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database) -> Result<T, ChatError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::StorageFailure(e.to_string())
            })?;

        if let Err(ChatError::StorageFailure(reason)) = &result {
            error!("Storage failure: {}", reason);
        }
        result
    }

    fn publish(&self, event: GatewayEvent) {
        let report = self.dispatcher.publish(event);
        debug!(
            "Published: {} delivered, {} dropped",
            report.delivered, report.dropped
        );
    }

    // -- Conversations --

    pub async fn resolve(&self, a: Uuid, b: Uuid) -> Result<Conversation, ChatError> {
        self.blocking(move |db| resolver::resolve(db, a, b)).await
    }

    /// Fetch a conversation on behalf of one of its participants.
    pub async fn get_conversation(
        &self,
        principal: Uuid,
        conversation_id: Uuid,
    ) -> Result<Conversation, ChatError> {
        let conversation = self
            .blocking(move |db| resolver::get(db, conversation_id))
            .await?;
        if !conversation.has_participant(principal) {
            return Err(ChatError::NotParticipant);
        }
        Ok(conversation)
    }

    pub async fn conversations_for(&self, principal: Uuid) -> Result<Vec<Conversation>, ChatError> {
        self.blocking(move |db| resolver::conversations_for(db, principal))
            .await
    }

    // -- Messages --

    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        new: NewMessage,
    ) -> Result<Message, ChatError> {
        let message = self
            .blocking(move |db| store::append(db, conversation_id, sender_id, new))
            .await?;

        info!(
            "Message {} from {} to {} in {}",
            message.id, message.sender_id, message.receiver_id, conversation_id
        );
        self.publish(GatewayEvent::MessageCreate {
            message: message.clone(),
        });
        Ok(message)
    }

    /// Message history for a participant of the conversation.
    pub async fn list_messages(
        &self,
        principal: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>, ChatError> {
        self.get_conversation(principal, conversation_id).await?;
        self.blocking(move |db| store::list_by_conversation(db, conversation_id))
            .await
    }

    /// One `(counterpart, latest message)` entry per counterpart, newest first.
    pub async fn last_messages_for(&self, principal: Uuid) -> Result<Vec<(Uuid, Message)>, ChatError> {
        self.blocking(move |db| activity::last_messages_for(db, principal))
            .await
    }

    // -- Delivery state --

    /// Returns how many messages moved from `sent` to `delivered`.
    pub async fn mark_delivered(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        receiver_id: Uuid,
    ) -> Result<usize, ChatError> {
        let transition = self
            .blocking(move |db| delivery::mark_delivered(db, actor, conversation_id, receiver_id))
            .await?;
        let count = transition.count();
        self.publish_transition(transition);
        Ok(count)
    }

    /// Returns the ids of messages that became `seen`.
    pub async fn mark_seen(
        &self,
        actor: Uuid,
        conversation_id: Uuid,
        viewer_id: Uuid,
    ) -> Result<Vec<Uuid>, ChatError> {
        let transition = self
            .blocking(move |db| delivery::mark_seen(db, actor, conversation_id, viewer_id))
            .await?;
        let ids = transition.message_ids.clone();
        self.publish_transition(transition);
        Ok(ids)
    }

    fn publish_transition(&self, transition: Transition) {
        if transition.is_empty() {
            return;
        }
        debug!(
            "{} messages in {} now {}",
            transition.count(),
            transition.conversation_id,
            transition.status
        );
        self.publish(GatewayEvent::MessageStatusUpdate {
            conversation_id: transition.conversation_id,
            status: transition.status,
            count: transition.count(),
            message_ids: transition.message_ids,
            updated_by: transition.receiver_id,
        });
    }

    // -- Real-time subscriptions --

    /// Join a live connection to a conversation. Only participants may join.
    /// The connection's queue receives `Joined` before any event of the
    /// conversation.
    pub async fn join(
        &self,
        principal: Uuid,
        conversation_id: Uuid,
        subscriber_id: SubscriberId,
    ) -> Result<(), ChatError> {
        self.get_conversation(principal, conversation_id).await?;
        if !self.dispatcher.subscribe(conversation_id, subscriber_id) {
            return Err(ChatError::NotFound);
        }
        debug!("{} joined conversation {} via {}", principal, conversation_id, subscriber_id);
        Ok(())
    }

    pub fn leave(&self, conversation_id: Uuid, subscriber_id: SubscriberId) {
        self.dispatcher.unsubscribe(conversation_id, subscriber_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use murmur_types::models::MessageStatus;

    use super::*;
    use crate::test_support::test_db;

    fn service() -> (tempfile::TempDir, Arc<Database>, ChatService) {
        let (dir, db) = test_db();
        let db = Arc::new(db);
        (dir, db.clone(), ChatService::new(db, Dispatcher::default()))
    }

    async fn join(
        chat: &ChatService,
        user: Uuid,
        conversation_id: Uuid,
    ) -> mpsc::Receiver<Arc<GatewayEvent>> {
        let (sub, mut rx) = chat.dispatcher().register(user);
        chat.join(user, conversation_id, sub).await.unwrap();
        assert_eq!(*rx.recv().await.unwrap(), GatewayEvent::Joined { conversation_id });
        rx
    }

    fn fail_on(db: &Database, trigger: &str) {
        db.with_conn_mut(|conn| {
            conn.execute_batch(trigger)?;
            Ok(())
        })
        .unwrap();
    }

    #[tokio::test]
    async fn send_deliver_see_scenario() {
        let (_dir, _db, chat) = service();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());

        let c1 = chat.resolve(u1, u2).await.unwrap();
        let mut rx = join(&chat, u2, c1.id).await;

        let m1 = chat.send_message(c1.id, u1, NewMessage::text("hi")).await.unwrap();
        assert_eq!(m1.status, MessageStatus::Sent);
        assert_eq!(m1.receiver_id, u2);
        assert_eq!(chat.get_conversation(u1, c1.id).await.unwrap().last_message_id, Some(m1.id));
        assert_eq!(*rx.recv().await.unwrap(), GatewayEvent::MessageCreate { message: m1.clone() });

        assert_eq!(chat.mark_delivered(u2, c1.id, u2).await.unwrap(), 1);
        match &*rx.recv().await.unwrap() {
            GatewayEvent::MessageStatusUpdate { status, count, message_ids, updated_by, .. } => {
                assert_eq!(*status, MessageStatus::Delivered);
                assert_eq!(*count, 1);
                assert_eq!(message_ids, &vec![m1.id]);
                assert_eq!(*updated_by, u2);
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(chat.mark_seen(u2, c1.id, u2).await.unwrap(), vec![m1.id]);
        rx.recv().await.unwrap();

        // Idempotent and silent on repeat
        assert!(chat.mark_seen(u2, c1.id, u2).await.unwrap().is_empty());
        assert_eq!(chat.mark_delivered(u2, c1.id, u2).await.unwrap(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_send_publishes_nothing() {
        let (_dir, _db, chat) = service();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = chat.resolve(u1, u2).await.unwrap();
        let mut rx = join(&chat, u2, conv.id).await;

        let err = chat.send_message(conv.id, u1, NewMessage::text("")).await;
        assert_eq!(err, Err(ChatError::EmptyMessage));
        assert!(rx.try_recv().is_err());
        assert!(chat.list_messages(u1, conv.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_during_send_rolls_back_and_publishes_nothing() {
        let (_dir, db, chat) = service();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = chat.resolve(u1, u2).await.unwrap();
        let first = chat.send_message(conv.id, u1, NewMessage::text("first")).await.unwrap();
        let mut rx = join(&chat, u2, conv.id).await;

        // The message row is written before the conversation pointer moves;
        // failing the second statement must undo the first.
        fail_on(
            &db,
            "CREATE TRIGGER fail_pointer BEFORE UPDATE ON conversations
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        );

        let err = chat.send_message(conv.id, u1, NewMessage::text("second")).await;
        assert!(matches!(err, Err(ChatError::StorageFailure(_))));
        assert!(rx.try_recv().is_err());

        let history = chat.list_messages(u1, conv.id).await.unwrap();
        assert_eq!(history, vec![first.clone()]);
        assert_eq!(chat.get_conversation(u1, conv.id).await.unwrap().last_message_id, Some(first.id));
    }

    #[tokio::test]
    async fn storage_failure_during_transition_changes_nothing() {
        let (_dir, db, chat) = service();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = chat.resolve(u1, u2).await.unwrap();
        chat.send_message(conv.id, u1, NewMessage::text("hi")).await.unwrap();
        let mut rx = join(&chat, u1, conv.id).await;

        fail_on(
            &db,
            "CREATE TRIGGER fail_status BEFORE UPDATE OF status ON messages
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
        );

        let err = chat.mark_seen(u2, conv.id, u2).await;
        assert!(matches!(&err, Err(e) if e.is_retryable()));
        assert!(rx.try_recv().is_err());

        let statuses: Vec<MessageStatus> = chat
            .list_messages(u2, conv.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.status)
            .collect();
        assert_eq!(statuses, vec![MessageStatus::Sent]);
    }

    #[tokio::test]
    async fn forbidden_transition_publishes_nothing() {
        let (_dir, _db, chat) = service();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = chat.resolve(u1, u2).await.unwrap();
        chat.send_message(conv.id, u1, NewMessage::text("hi")).await.unwrap();

        let mut rx = join(&chat, u1, conv.id).await;
        assert_eq!(chat.mark_seen(u1, conv.id, u2).await, Err(ChatError::Forbidden));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn outsiders_cannot_join_or_read() {
        let (_dir, _db, chat) = service();
        let conv = chat.resolve(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        let outsider = Uuid::new_v4();
        let (sub, mut rx) = chat.dispatcher().register(outsider);

        assert_eq!(chat.join(outsider, conv.id, sub).await, Err(ChatError::NotParticipant));
        assert_eq!(chat.dispatcher().subscriber_count(conv.id), 0);
        assert!(rx.try_recv().is_err());
        assert_eq!(chat.list_messages(outsider, conv.id).await, Err(ChatError::NotParticipant));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolve_returns_one_conversation() {
        let (_dir, _db, chat) = service();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let chat = chat.clone();
                tokio::spawn(async move {
                    let (x, y) = if i % 2 == 0 { (a, b) } else { (b, a) };
                    chat.resolve(x, y).await.unwrap().id
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(chat.conversations_for(a).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_leave_pointer_on_newest() {
        let (_dir, _db, chat) = service();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = chat.resolve(u1, u2).await.unwrap();

        let tasks: Vec<_> = (0..24)
            .map(|i| {
                let chat = chat.clone();
                let sender = if i % 2 == 0 { u1 } else { u2 };
                tokio::spawn(async move {
                    chat.send_message(conv.id, sender, NewMessage::text(format!("m{}", i)))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let history = chat.list_messages(u1, conv.id).await.unwrap();
        assert_eq!(history.len(), 24);
        assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let newest = history.last().unwrap();
        let stored = chat.get_conversation(u1, conv.id).await.unwrap();
        assert_eq!(stored.last_message_id, Some(newest.id));

        let previews = chat.last_messages_for(u1).await.unwrap();
        assert_eq!(previews, vec![(u2, newest.clone())]);
    }

    #[tokio::test]
    async fn last_messages_track_latest_send() {
        let (_dir, _db, chat) = service();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = chat.resolve(u1, u2).await.unwrap();

        let mut last = None;
        for body in ["one", "two", "three"] {
            last = Some(chat.send_message(conv.id, u1, NewMessage::text(body)).await.unwrap());
        }

        let latest = chat.last_messages_for(u1).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].0, u2);
        assert_eq!(Some(&latest[0].1), last.as_ref());
        assert_eq!(latest[0].1.body, "three");
    }
}
