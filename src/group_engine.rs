//! Chat group membership, message persistence, and broadcast-with-filtering.
//!
//! `broadcast` generalizes the teacher's `ConnectionRegistry::broadcast`
//! (`websocket::mod`): instead of fanning out to every subscriber of a
//! topic, it fans out to every *online, currently-viewing* member of a
//! group, and a failed send closes that one recipient via the session
//! registry without aborting delivery to the others.

use crate::error::{AppError, AppResult};
use crate::session::SessionRegistry;
use crate::store::models::*;
use crate::store::Store;
use serde_json::json;
use std::sync::Arc;

pub struct GroupEngine {
    store: Arc<dyn Store>,
    sessions: SessionRegistry,
}

impl GroupEngine {
    pub fn new(store: Arc<dyn Store>, sessions: SessionRegistry) -> Self {
        Self { store, sessions }
    }

    /// Creates a group. Non-private groups always get the AI user as a
    /// member; for private groups `initial_members` (deduplicated, minus
    /// unknown ids) are added alongside the creator. For non-private groups
    /// `initial_members` is ignored — members must `join` explicitly.
    pub async fn create(
        &self,
        name: &str,
        creator_id: UserId,
        initial_members: &[UserId],
        is_private: bool,
    ) -> AppResult<ChatGroup> {
        let mut members = vec![creator_id];
        if !is_private {
            members.push(AI_USER_ID);
        } else {
            for &m in initial_members {
                if m != creator_id && !members.contains(&m) && self.store.get_user(m).await?.is_some() {
                    members.push(m);
                }
            }
        }
        let id = self.store.create_group_with_members(name, is_private, &members).await?;
        self.store.get_group(id).await?.ok_or(AppError::ChatGroupNotFound)
    }

    /// Idempotent membership add. Does not change the caller's current group.
    pub async fn join(&self, group_name: &str, user_id: UserId) -> AppResult<ChatGroup> {
        let group = self
            .store
            .get_group_by_name(group_name)
            .await?
            .ok_or(AppError::ChatGroupNotFound)?;
        self.store.add_member(group.id, user_id).await?;
        Ok(group)
    }

    /// Requires existing membership; sets the caller's current group.
    pub async fn enter(&self, group_name: &str, user_id: UserId) -> AppResult<ChatGroup> {
        let group = self
            .store
            .get_group_by_name(group_name)
            .await?
            .ok_or(AppError::ChatGroupNotFound)?;
        if !self.store.is_member(group.id, user_id).await? {
            return Err(AppError::PermissionDenied);
        }
        self.sessions.set_current_group(user_id, group.id).await;
        Ok(group)
    }

    /// Authorizes, persists, and broadcasts a chat message. The AI and admin
    /// users are exempt from the ban check; the AI self-heals its own
    /// membership rather than being rejected for a group it isn't in yet.
    pub async fn send(&self, sender_id: UserId, group_id: GroupId, content: &str) -> AppResult<Message> {
        self.authorize_send(sender_id, group_id).await?;
        let kind = if sender_id == AI_USER_ID {
            MessageKind::Ai
        } else {
            MessageKind::Text
        };
        let message = self.store.save_message(group_id, sender_id, content, kind).await?;
        self.broadcast(&message).await;
        Ok(message)
    }

    async fn authorize_send(&self, sender_id: UserId, group_id: GroupId) -> AppResult<()> {
        let group = self.store.get_group(group_id).await?.ok_or(AppError::ChatGroupNotFound)?;

        if sender_id == AI_USER_ID {
            self.store.add_member(group_id, sender_id).await?;
            return Ok(());
        }

        if !self.store.is_member(group_id, sender_id).await? {
            return Err(AppError::PermissionDenied);
        }

        if sender_id != ADMIN_USER_ID {
            if self.store.is_user_banned(sender_id).await? || group.is_banned {
                return Err(AppError::PermissionDenied);
            }
        }
        Ok(())
    }

    /// Delivers `message` to every member whose session is online and
    /// currently viewing `message.group_id`. A send failure closes that
    /// recipient's connection but never aborts delivery to the others.
    pub async fn broadcast(&self, message: &Message) {
        let frame = json!({
            "message_type": "chat_message",
            "message_id": message.id,
            "chat_group_id": message.group_id,
            "sender_id": message.sender_id,
            "content": message.content,
            "kind": message.kind,
            "timestamp": message.timestamp.timestamp(),
        })
        .to_string();

        let members = match self.store.members_of(message.group_id).await {
            Ok(m) => m,
            Err(e) => {
                tracing::error!(error = %e, group_id = message.group_id, "broadcast: failed to list members");
                return;
            }
        };

        for member in members {
            let Some(session) = self.sessions.get(member.id).await else { continue };
            if session.current_group_id != Some(message.group_id) {
                continue;
            }
            if session.outbound.send(frame.clone()).is_err() {
                self.sessions.disconnect(session.conn_id).await;
            }
        }
    }

    pub async fn history_for(&self, group_id: GroupId, user_id: UserId, limit: i64) -> AppResult<Vec<Message>> {
        if !self.store.is_member(group_id, user_id).await? {
            return Err(AppError::PermissionDenied);
        }
        self.store.history(group_id, limit).await
    }

    /// Finds an existing private group containing exactly `u1` and `u2`, or
    /// creates one named `u1name_u2name`.
    pub async fn find_or_create_private(&self, u1: UserId, u2: UserId) -> AppResult<ChatGroup> {
        if let Some(id) = self.store.find_private_group_between(u1, u2).await? {
            return self.store.get_group(id).await?.ok_or(AppError::ChatGroupNotFound);
        }
        let name1 = self.store.get_user(u1).await?.ok_or(AppError::UserNotFound)?.username;
        let name2 = self.store.get_user(u2).await?.ok_or(AppError::UserNotFound)?.username;
        let name = format!("{name1}_{name2}");
        self.create(&name, u1, &[u2], true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use tokio::sync::mpsc::unbounded_channel;

    async fn engine() -> (GroupEngine, Arc<dyn Store>, SessionRegistry) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.bootstrap("adminpass1").await.unwrap();
        let sessions = SessionRegistry::new(store.clone());
        (GroupEngine::new(store.clone(), sessions.clone()), store, sessions)
    }

    #[tokio::test]
    async fn non_member_send_is_rejected() {
        let (engine, store, _sessions) = engine().await;
        let alice = store.create_user("alice", "password1").await.unwrap();
        let bob = store.create_user("bob", "password1").await.unwrap();
        let group = engine.create("room1", alice, &[], false).await.unwrap();

        let err = engine.send(bob, group.id, "hi").await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));

        engine.join("room1", bob).await.unwrap();
        assert!(engine.send(bob, group.id, "hi").await.is_ok());
    }

    #[tokio::test]
    async fn non_private_group_includes_ai() {
        let (engine, store, _sessions) = engine().await;
        let alice = store.create_user("alice", "password1").await.unwrap();
        let group = engine.create("room1", alice, &[], false).await.unwrap();
        assert!(store.is_member(group.id, AI_USER_ID).await.unwrap());
    }

    #[tokio::test]
    async fn broadcast_filters_by_current_group() {
        let (engine, store, sessions) = engine().await;
        let alice = store.create_user("alice", "password1").await.unwrap();
        let bob = store.create_user("bob", "password1").await.unwrap();
        let room1 = engine.create("room1", alice, &[], false).await.unwrap();
        let room2 = engine.create("room2", alice, &[], false).await.unwrap();
        engine.join("room1", bob).await.unwrap();
        engine.join("room2", bob).await.unwrap();

        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        sessions
            .login(alice, crate::session::ConnId(1), tx_a, Default::default())
            .await;
        sessions
            .login(bob, crate::session::ConnId(2), tx_b, Default::default())
            .await;
        sessions.set_current_group(alice, room1.id).await;
        sessions.set_current_group(bob, room2.id).await;

        engine.send(alice, room1.id, "hello").await.unwrap();

        let received_a = rx_a.try_recv().unwrap();
        assert!(received_a.contains("hello"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn banned_user_cannot_send() {
        let (engine, store, _sessions) = engine().await;
        let alice = store.create_user("alice", "password1").await.unwrap();
        let group = engine.create("room1", alice, &[], false).await.unwrap();
        store.set_user_banned(alice, true).await.unwrap();
        let err = engine.send(alice, group.id, "hi").await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
    }
}
