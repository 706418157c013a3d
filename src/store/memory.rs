//! In-memory [`Store`] used by unit tests so they don't need a real Postgres
//! instance. Mirrors [`super::postgres::PgStore`]'s semantics, including the
//! reserved-id and `public`-group protections.

use crate::auth::{hash_password, verify_password};
use crate::error::AppError;
use crate::store::models::*;
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    next_user_id: UserId,
    groups: HashMap<GroupId, ChatGroup>,
    next_group_id: GroupId,
    members: HashMap<GroupId, BTreeSet<UserId>>,
    messages: Vec<Message>,
    next_message_id: MessageId,
    files: HashMap<FileId, FileMeta>,
    next_file_id: FileId,
}

pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                next_user_id: 2,
                next_group_id: 1,
                next_message_id: 1,
                next_file_id: 1,
                ..Default::default()
            }),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, username: &str, password: &str) -> Result<UserId, AppError> {
        let hash = hash_password(password)?;
        let mut s = self.state.lock().unwrap();
        if s.users.values().any(|u| u.username == username) {
            return Err(AppError::UserAlreadyExists);
        }
        let id = s.next_user_id;
        s.next_user_id += 1;
        s.users.insert(
            id,
            User {
                id,
                username: username.to_string(),
                password_hash: hash,
                is_online: false,
                is_banned: false,
            },
        );
        if let Some(public) = s.groups.values().find(|g| g.name == PUBLIC_GROUP_NAME).map(|g| g.id) {
            s.members.entry(public).or_default().insert(id);
        }
        Ok(id)
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, AppError> {
        let user = {
            let s = self.state.lock().unwrap();
            s.users.values().find(|u| u.username == username).cloned()
        };
        match user {
            Some(u) if verify_password(password, &u.password_hash)? => Ok(Some(u)),
            _ => Ok(None),
        }
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, AppError> {
        Ok(self.state.lock().unwrap().users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn set_online(&self, id: UserId, online: bool) -> Result<(), AppError> {
        if let Some(u) = self.state.lock().unwrap().users.get_mut(&id) {
            u.is_online = online;
        }
        Ok(())
    }

    async fn delete_user(&self, id: UserId) -> Result<(), AppError> {
        if is_reserved_user(id) {
            return Err(AppError::PermissionDenied);
        }
        let mut s = self.state.lock().unwrap();
        if s.users.remove(&id).is_none() {
            return Err(AppError::UserNotFound);
        }
        for members in s.members.values_mut() {
            members.remove(&id);
        }
        s.messages.retain(|m| m.sender_id != id);
        s.files.retain(|_, f| f.uploader_id != id);
        Ok(())
    }

    async fn update_username(&self, id: UserId, new_name: &str) -> Result<(), AppError> {
        if is_reserved_user(id) {
            return Err(AppError::PermissionDenied);
        }
        let mut s = self.state.lock().unwrap();
        if s.users.values().any(|u| u.username == new_name && u.id != id) {
            return Err(AppError::UserAlreadyExists);
        }
        match s.users.get_mut(&id) {
            Some(u) => {
                u.username = new_name.to_string();
                Ok(())
            }
            None => Err(AppError::UserNotFound),
        }
    }

    async fn update_password(&self, id: UserId, new_password: &str) -> Result<(), AppError> {
        let hash = hash_password(new_password)?;
        match self.state.lock().unwrap().users.get_mut(&id) {
            Some(u) => {
                u.password_hash = hash;
                Ok(())
            }
            None => Err(AppError::UserNotFound),
        }
    }

    async fn all_users(&self) -> Result<Vec<User>, AppError> {
        let mut users: Vec<User> = self.state.lock().unwrap().users.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn create_group_with_members(
        &self,
        name: &str,
        is_private: bool,
        members: &[UserId],
    ) -> Result<GroupId, AppError> {
        let mut s = self.state.lock().unwrap();
        if s.groups.values().any(|g| g.name == name) {
            return Err(AppError::ChatGroupAlreadyExists);
        }
        let id = s.next_group_id;
        s.next_group_id += 1;
        s.groups.insert(
            id,
            ChatGroup {
                id,
                name: name.to_string(),
                is_private_chat: is_private,
                is_banned: false,
            },
        );
        s.members.entry(id).or_default().extend(members.iter().copied());
        Ok(id)
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<ChatGroup>, AppError> {
        Ok(self.state.lock().unwrap().groups.get(&id).cloned())
    }

    async fn get_group_by_name(&self, name: &str) -> Result<Option<ChatGroup>, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .groups
            .values()
            .find(|g| g.name == name)
            .cloned())
    }

    async fn delete_group(&self, id: GroupId) -> Result<(), AppError> {
        let mut s = self.state.lock().unwrap();
        let group = s.groups.get(&id).cloned().ok_or(AppError::ChatGroupNotFound)?;
        if group.name == PUBLIC_GROUP_NAME {
            return Err(AppError::PermissionDenied);
        }
        s.groups.remove(&id);
        s.members.remove(&id);
        s.messages.retain(|m| m.group_id != id);
        s.files.retain(|_, f| f.group_id != id);
        Ok(())
    }

    async fn rename_group(&self, id: GroupId, new_name: &str) -> Result<(), AppError> {
        let mut s = self.state.lock().unwrap();
        if s.groups.values().any(|g| g.name == new_name && g.id != id) {
            return Err(AppError::ChatGroupAlreadyExists);
        }
        match s.groups.get_mut(&id) {
            Some(g) => {
                g.name = new_name.to_string();
                Ok(())
            }
            None => Err(AppError::ChatGroupNotFound),
        }
    }

    async fn all_groups(&self, include_private: bool) -> Result<Vec<ChatGroup>, AppError> {
        let mut groups: Vec<ChatGroup> = self
            .state
            .lock()
            .unwrap()
            .groups
            .values()
            .filter(|g| include_private || !g.is_private_chat)
            .cloned()
            .collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    async fn add_member(&self, group: GroupId, user: UserId) -> Result<(), AppError> {
        self.state.lock().unwrap().members.entry(group).or_default().insert(user);
        Ok(())
    }

    async fn is_member(&self, group: GroupId, user: UserId) -> Result<bool, AppError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .members
            .get(&group)
            .map(|m| m.contains(&user))
            .unwrap_or(false))
    }

    async fn groups_for_user(&self, user: UserId) -> Result<Vec<ChatGroup>, AppError> {
        let s = self.state.lock().unwrap();
        let mut groups: Vec<ChatGroup> = s
            .members
            .iter()
            .filter(|(_, members)| members.contains(&user))
            .filter_map(|(gid, _)| s.groups.get(gid).cloned())
            .collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    async fn members_of(&self, group: GroupId) -> Result<Vec<User>, AppError> {
        let s = self.state.lock().unwrap();
        let mut users: Vec<User> = s
            .members
            .get(&group)
            .map(|ids| ids.iter().filter_map(|id| s.users.get(id).cloned()).collect())
            .unwrap_or_default();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn find_private_group_between(
        &self,
        u1: UserId,
        u2: UserId,
    ) -> Result<Option<GroupId>, AppError> {
        let s = self.state.lock().unwrap();
        Ok(s.groups
            .values()
            .find(|g| {
                g.is_private_chat
                    && s.members
                        .get(&g.id)
                        .map(|m| m.contains(&u1) && m.contains(&u2))
                        .unwrap_or(false)
            })
            .map(|g| g.id))
    }

    async fn is_user_banned(&self, id: UserId) -> Result<bool, AppError> {
        self.state
            .lock()
            .unwrap()
            .users
            .get(&id)
            .map(|u| u.is_banned)
            .ok_or(AppError::UserNotFound)
    }

    async fn is_group_banned(&self, id: GroupId) -> Result<bool, AppError> {
        self.state
            .lock()
            .unwrap()
            .groups
            .get(&id)
            .map(|g| g.is_banned)
            .ok_or(AppError::ChatGroupNotFound)
    }

    async fn set_user_banned(&self, id: UserId, banned: bool) -> Result<(), AppError> {
        if banned && is_reserved_user(id) {
            return Err(AppError::PermissionDenied);
        }
        match self.state.lock().unwrap().users.get_mut(&id) {
            Some(u) => {
                u.is_banned = banned;
                Ok(())
            }
            None => Err(AppError::UserNotFound),
        }
    }

    async fn set_group_banned(&self, id: GroupId, banned: bool) -> Result<(), AppError> {
        let mut s = self.state.lock().unwrap();
        let group = s.groups.get(&id).cloned().ok_or(AppError::ChatGroupNotFound)?;
        if banned && group.name == PUBLIC_GROUP_NAME {
            return Err(AppError::PermissionDenied);
        }
        s.groups.get_mut(&id).unwrap().is_banned = banned;
        Ok(())
    }

    async fn list_banned(&self) -> Result<(Vec<User>, Vec<ChatGroup>), AppError> {
        let s = self.state.lock().unwrap();
        let mut users: Vec<User> = s.users.values().filter(|u| u.is_banned).cloned().collect();
        let mut groups: Vec<ChatGroup> = s.groups.values().filter(|g| g.is_banned).cloned().collect();
        users.sort_by_key(|u| u.id);
        groups.sort_by_key(|g| g.id);
        Ok((users, groups))
    }

    async fn save_message(
        &self,
        group: GroupId,
        sender: UserId,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, AppError> {
        let mut s = self.state.lock().unwrap();
        let id = s.next_message_id;
        s.next_message_id += 1;
        let message = Message {
            id,
            group_id: group,
            sender_id: sender,
            content: content.to_string(),
            kind,
            timestamp: Utc::now(),
        };
        s.messages.push(message.clone());
        Ok(message)
    }

    async fn history(&self, group: GroupId, limit: i64) -> Result<Vec<Message>, AppError> {
        let s = self.state.lock().unwrap();
        let mut msgs: Vec<Message> = s.messages.iter().filter(|m| m.group_id == group).cloned().collect();
        let total = msgs.len();
        let take = limit.max(0) as usize;
        if total > take {
            msgs.drain(0..total - take);
        }
        Ok(msgs)
    }

    async fn save_file_meta(&self, meta: FileMeta) -> Result<FileId, AppError> {
        let mut s = self.state.lock().unwrap();
        let id = s.next_file_id;
        s.next_file_id += 1;
        let mut meta = meta;
        meta.id = id;
        s.files.insert(id, meta);
        Ok(id)
    }

    async fn get_file(&self, id: FileId) -> Result<Option<FileMeta>, AppError> {
        Ok(self.state.lock().unwrap().files.get(&id).cloned())
    }

    async fn files_for_group(&self, group: GroupId) -> Result<Vec<FileMeta>, AppError> {
        let mut files: Vec<FileMeta> = self
            .state
            .lock()
            .unwrap()
            .files
            .values()
            .filter(|f| f.group_id == group)
            .cloned()
            .collect();
        files.sort_by_key(|f| f.id);
        Ok(files)
    }

    async fn delete_file(&self, id: FileId) -> Result<(), AppError> {
        match self.state.lock().unwrap().files.remove(&id) {
            Some(_) => Ok(()),
            None => Err(AppError::FileNotFound),
        }
    }

    async fn bootstrap(&self, admin_password: &str) -> Result<(), AppError> {
        let mut s = self.state.lock().unwrap();
        if !s.groups.values().any(|g| g.name == PUBLIC_GROUP_NAME) {
            let id = s.next_group_id;
            s.next_group_id += 1;
            s.groups.insert(
                id,
                ChatGroup {
                    id,
                    name: PUBLIC_GROUP_NAME.to_string(),
                    is_private_chat: false,
                    is_banned: false,
                },
            );
            s.members.entry(id).or_default();
        }
        let public_id = s.groups.values().find(|g| g.name == PUBLIC_GROUP_NAME).unwrap().id;

        if !s.users.contains_key(&ADMIN_USER_ID) {
            drop(s);
            let hash = hash_password(admin_password)?;
            let mut s = self.state.lock().unwrap();
            s.users.insert(
                ADMIN_USER_ID,
                User {
                    id: ADMIN_USER_ID,
                    username: "admin".to_string(),
                    password_hash: hash,
                    is_online: false,
                    is_banned: false,
                },
            );
            s.members.entry(public_id).or_default().insert(ADMIN_USER_ID);
        } else {
            s.members.entry(public_id).or_default().insert(ADMIN_USER_ID);
        }

        let mut s = self.state.lock().unwrap();
        if !s.users.contains_key(&AI_USER_ID) {
            drop(s);
            let hash = hash_password(&uuid::Uuid::new_v4().to_string())?;
            let mut s = self.state.lock().unwrap();
            s.users.insert(
                AI_USER_ID,
                User {
                    id: AI_USER_ID,
                    username: "AI".to_string(),
                    password_hash: hash,
                    is_online: false,
                    is_banned: false,
                },
            );
            s.members.entry(public_id).or_default().insert(AI_USER_ID);
        } else {
            s.members.entry(public_id).or_default().insert(AI_USER_ID);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_user_joins_public() {
        let store = MemoryStore::new();
        store.bootstrap("adminpass1").await.unwrap();
        let uid = store.create_user("alice", "password1").await.unwrap();
        let public = store.get_group_by_name(PUBLIC_GROUP_NAME).await.unwrap().unwrap();
        assert!(store.is_member(public.id, uid).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_username_rejected() {
        let store = MemoryStore::new();
        store.bootstrap("adminpass1").await.unwrap();
        store.create_user("alice", "password1").await.unwrap();
        let err = store.create_user("alice", "password2").await.unwrap_err();
        assert!(matches!(err, AppError::UserAlreadyExists));
    }

    #[tokio::test]
    async fn add_member_is_idempotent() {
        let store = MemoryStore::new();
        let gid = store.create_group("room1", false).await.unwrap();
        store.add_member(gid, 5).await.unwrap();
        store.add_member(gid, 5).await.unwrap();
        let members = store.members_of(gid).await.unwrap();
        assert_eq!(members.iter().filter(|u| u.id == 5).count(), 0); // user 5 doesn't exist, members_of filters unknown ids
        assert!(store.is_member(gid, 5).await.unwrap());
    }

    #[tokio::test]
    async fn reserved_ids_cannot_be_deleted_or_banned() {
        let store = MemoryStore::new();
        store.bootstrap("adminpass1").await.unwrap();
        assert!(matches!(
            store.delete_user(ADMIN_USER_ID).await.unwrap_err(),
            AppError::PermissionDenied
        ));
        assert!(matches!(
            store.set_user_banned(AI_USER_ID, true).await.unwrap_err(),
            AppError::PermissionDenied
        ));
    }

    #[tokio::test]
    async fn public_group_cannot_be_deleted_or_banned() {
        let store = MemoryStore::new();
        store.bootstrap("adminpass1").await.unwrap();
        let public = store.get_group_by_name(PUBLIC_GROUP_NAME).await.unwrap().unwrap();
        assert!(matches!(
            store.delete_group(public.id).await.unwrap_err(),
            AppError::PermissionDenied
        ));
        assert!(matches!(
            store.set_group_banned(public.id, true).await.unwrap_err(),
            AppError::PermissionDenied
        ));
    }

    #[tokio::test]
    async fn history_returns_chronological_order() {
        let store = MemoryStore::new();
        let gid = store.create_group("room1", false).await.unwrap();
        store.save_message(gid, 7, "first", MessageKind::Text).await.unwrap();
        store.save_message(gid, 7, "second", MessageKind::Text).await.unwrap();
        let history = store.history(gid, 10).await.unwrap();
        assert_eq!(history.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), vec!["first", "second"]);
    }
}
