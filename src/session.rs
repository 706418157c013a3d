//! In-memory session registry: user_id -> live connection, and the reverse
//! lookup for disconnect handling. Generalizes the teacher's per-topic
//! subscriber registry (`websocket::ConnectionRegistry`) to a single
//! connection per user instead of many subscribers per topic.

use crate::store::models::{GroupId, UserId};
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc::UnboundedSender, Notify, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(pub u64);

#[derive(Clone)]
pub struct Session {
    pub user_id: UserId,
    pub conn_id: ConnId,
    pub outbound: UnboundedSender<String>,
    pub current_group_id: Option<GroupId>,
    /// Signalled when this session is evicted by a re-login elsewhere, so
    /// the connection's read loop can close the socket instead of sitting
    /// idle on a session nobody owns anymore.
    pub shutdown: Arc<Notify>,
}

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<Inner>>,
    store: Arc<dyn Store>,
}

#[derive(Default)]
struct Inner {
    by_user: HashMap<UserId, Session>,
    by_conn: HashMap<ConnId, UserId>,
}

impl SessionRegistry {
    /// `store` is used to clear `is_online` on every path that ends a
    /// session (explicit logout, eviction by re-login, and the connection
    /// worker's post-loop cleanup), so the flag never gets stuck `true`
    /// after a client just drops its socket.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { inner: Arc::new(RwLock::new(Inner::default())), store }
    }

    /// Installs a session for `user_id`, closing any prior connection for
    /// the same user first. The write lock is dropped before the old
    /// connection is signalled to close, so that I/O never happens while
    /// holding the lock.
    pub async fn login(
        &self,
        user_id: UserId,
        conn_id: ConnId,
        outbound: UnboundedSender<String>,
        shutdown: Arc<Notify>,
    ) {
        let previous = {
            let mut guard = self.inner.write().await;
            let previous = guard.by_user.remove(&user_id);
            if let Some(ref prev) = previous {
                guard.by_conn.remove(&prev.conn_id);
            }
            guard.by_conn.insert(conn_id, user_id);
            guard.by_user.insert(
                user_id,
                Session {
                    user_id,
                    conn_id,
                    outbound,
                    current_group_id: None,
                    shutdown,
                },
            );
            previous
        };

        if let Some(prev) = previous {
            // `notify_one` stores a permit if no one is waiting yet, so this
            // is safe regardless of whether the old connection's read loop
            // has reached its `shutdown.notified()` select arm already.
            prev.shutdown.notify_one();
        }
    }

    /// Removes the session and clears `is_online` in the Store. Safe to call
    /// even if `user_id` has no live session.
    pub async fn logout(&self, user_id: UserId) {
        let removed = {
            let mut guard = self.inner.write().await;
            if let Some(session) = guard.by_user.remove(&user_id) {
                guard.by_conn.remove(&session.conn_id);
                true
            } else {
                false
            }
        };
        if removed {
            if let Err(e) = self.store.set_online(user_id, false).await {
                tracing::warn!(error = %e, user_id, "logout: failed to clear is_online");
            }
        }
    }

    /// Invokes [`Self::logout`] for `conn_id`'s user, but only if `conn_id`
    /// is still the session's current connection — a stale disconnect for a
    /// connection that was already evicted by a re-login must not log out
    /// the new one.
    pub async fn disconnect(&self, conn_id: ConnId) -> Option<UserId> {
        let user_id = {
            let guard = self.inner.read().await;
            guard.by_conn.get(&conn_id).copied()
        }?;
        let still_this_conn = {
            let guard = self.inner.read().await;
            guard
                .by_user
                .get(&user_id)
                .map(|s| s.conn_id == conn_id)
                .unwrap_or(false)
        };
        if still_this_conn {
            self.logout(user_id).await;
        }
        Some(user_id)
    }

    pub async fn set_current_group(&self, user_id: UserId, group_id: GroupId) {
        if let Some(session) = self.inner.write().await.by_user.get_mut(&user_id) {
            session.current_group_id = Some(group_id);
        }
    }

    pub async fn get_current_group(&self, user_id: UserId) -> Option<GroupId> {
        self.inner.read().await.by_user.get(&user_id).and_then(|s| s.current_group_id)
    }

    pub async fn get_by_conn(&self, conn_id: ConnId) -> Option<Session> {
        let guard = self.inner.read().await;
        let user_id = guard.by_conn.get(&conn_id)?;
        guard.by_user.get(user_id).cloned()
    }

    pub async fn get(&self, user_id: UserId) -> Option<Session> {
        self.inner.read().await.by_user.get(&user_id).cloned()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.read().await.by_user.contains_key(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn relogin_replaces_prior_session_and_closes_it() {
        let registry = SessionRegistry::new(Arc::new(MemoryStore::new()));
        let (tx1, _rx1) = unbounded_channel();
        let shutdown1 = Arc::new(Notify::new());
        registry.login(1, ConnId(1), tx1, shutdown1.clone()).await;

        let (tx2, _rx2) = unbounded_channel();
        registry.login(1, ConnId(2), tx2, Arc::new(Notify::new())).await;

        // The stale connection's read loop is woken so it can close the socket.
        // `notify_one` left a stored permit, so this resolves immediately.
        shutdown1.notified().await;
        let session = registry.get(1).await.unwrap();
        assert_eq!(session.conn_id, ConnId(2));
        assert!(registry.get_by_conn(ConnId(1)).await.is_none());
    }

    #[tokio::test]
    async fn disconnect_only_logs_out_if_conn_still_current() {
        let registry = SessionRegistry::new(Arc::new(MemoryStore::new()));
        let (tx1, _rx1) = unbounded_channel();
        registry.login(1, ConnId(1), tx1, Arc::new(Notify::new())).await;
        let (tx2, _rx2) = unbounded_channel();
        registry.login(1, ConnId(2), tx2, Arc::new(Notify::new())).await;

        // A stale disconnect for conn 1 must not evict the live session on conn 2.
        registry.disconnect(ConnId(1)).await;
        assert!(registry.is_online(1).await);

        registry.disconnect(ConnId(2)).await;
        assert!(!registry.is_online(1).await);
    }

    #[tokio::test]
    async fn disconnect_clears_store_is_online() {
        let store = Arc::new(MemoryStore::new());
        store.bootstrap("adminpass1").await.unwrap();
        let alice = store.create_user("alice", "password1").await.unwrap();
        store.set_online(alice, true).await.unwrap();

        let registry = SessionRegistry::new(store.clone());
        let (tx, _rx) = unbounded_channel();
        registry.login(alice, ConnId(1), tx, Arc::new(Notify::new())).await;

        registry.disconnect(ConnId(1)).await;

        let user = store.get_user(alice).await.unwrap().unwrap();
        assert!(!user.is_online);
    }
}
