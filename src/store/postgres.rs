//! PostgreSQL-backed [`Store`].
//!
//! Schema (provisioned externally; this is its source of truth):
//!
//! ```sql
//! CREATE TABLE users (
//!     id BIGINT PRIMARY KEY,
//!     username TEXT UNIQUE NOT NULL,
//!     password_hash TEXT NOT NULL,
//!     is_online BOOLEAN NOT NULL DEFAULT false,
//!     is_banned BOOLEAN NOT NULL DEFAULT false
//! );
//! CREATE SEQUENCE users_id_seq START WITH 2; -- 0, 1 reserved
//!
//! CREATE TABLE chat_groups (
//!     id BIGSERIAL PRIMARY KEY,
//!     name TEXT UNIQUE NOT NULL,
//!     is_private_chat BOOLEAN NOT NULL DEFAULT false,
//!     is_banned BOOLEAN NOT NULL DEFAULT false
//! );
//!
//! CREATE TABLE group_members (
//!     group_id BIGINT NOT NULL REFERENCES chat_groups(id),
//!     user_id BIGINT NOT NULL REFERENCES users(id),
//!     joined_at TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     PRIMARY KEY (group_id, user_id)
//! );
//!
//! CREATE TABLE messages (
//!     id BIGSERIAL PRIMARY KEY,
//!     group_id BIGINT NOT NULL REFERENCES chat_groups(id),
//!     sender_id BIGINT NOT NULL REFERENCES users(id),
//!     content TEXT NOT NULL,
//!     kind TEXT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//!
//! CREATE TABLE files_metadata (
//!     id BIGSERIAL PRIMARY KEY,
//!     original_name TEXT NOT NULL,
//!     server_path TEXT UNIQUE NOT NULL,
//!     size BIGINT NOT NULL,
//!     uploader_id BIGINT NOT NULL REFERENCES users(id),
//!     group_id BIGINT NOT NULL REFERENCES chat_groups(id),
//!     upload_time TIMESTAMPTZ NOT NULL DEFAULT now(),
//!     message_id BIGINT REFERENCES messages(id)
//! );
//! ```

use crate::auth::{hash_password, verify_password};
use crate::error::AppError;
use crate::store::models::*;
use crate::store::Store;
use async_trait::async_trait;
use db_pool::PgPool;
use tokio_postgres::Row;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &Row) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        is_online: row.get("is_online"),
        is_banned: row.get("is_banned"),
    }
}

fn row_to_group(row: &Row) -> ChatGroup {
    ChatGroup {
        id: row.get("id"),
        name: row.get("name"),
        is_private_chat: row.get("is_private_chat"),
        is_banned: row.get("is_banned"),
    }
}

fn row_to_message(row: &Row) -> Message {
    let kind_str: String = row.get("kind");
    let kind = match kind_str.as_str() {
        "system" => MessageKind::System,
        "ai" => MessageKind::Ai,
        _ => MessageKind::Text,
    };
    Message {
        id: row.get("id"),
        group_id: row.get("group_id"),
        sender_id: row.get("sender_id"),
        content: row.get("content"),
        kind,
        timestamp: row.get("created_at"),
    }
}

fn row_to_file(row: &Row) -> FileMeta {
    let size: i64 = row.get("size");
    FileMeta {
        id: row.get("id"),
        original_name: row.get("original_name"),
        server_path: row.get("server_path"),
        size: size as u64,
        uploader_id: row.get("uploader_id"),
        group_id: row.get("group_id"),
        upload_time: row.get("upload_time"),
        message_id: row.get("message_id"),
    }
}

fn kind_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::System => "system",
        MessageKind::Ai => "ai",
    }
}

fn is_unique_violation(e: &tokio_postgres::Error) -> bool {
    e.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION)
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, username: &str, password: &str) -> Result<UserId, AppError> {
        let hash = hash_password(password)?;
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                "INSERT INTO users (id, username, password_hash) \
                 VALUES (nextval('users_id_seq'), $1, $2) RETURNING id",
                &[&username, &hash],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::UserAlreadyExists
                } else {
                    AppError::from(e)
                }
            })?;
        let id: UserId = row.get(0);

        tx.execute(
            "INSERT INTO group_members (group_id, user_id) \
             SELECT id, $1 FROM chat_groups WHERE name = $2 \
             ON CONFLICT DO NOTHING",
            &[&id, &PUBLIC_GROUP_NAME],
        )
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM users WHERE username = $1", &[&username])
            .await?;
        let Some(row) = row else { return Ok(None) };
        let user = row_to_user(&row);
        if verify_password(password, &user.password_hash)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM users WHERE id = $1", &[&id])
            .await?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM users WHERE username = $1", &[&username])
            .await?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn set_online(&self, id: UserId, online: bool) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client
            .execute("UPDATE users SET is_online = $2 WHERE id = $1", &[&id, &online])
            .await?;
        Ok(())
    }

    async fn delete_user(&self, id: UserId) -> Result<(), AppError> {
        if is_reserved_user(id) {
            return Err(AppError::PermissionDenied);
        }
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute("DELETE FROM files_metadata WHERE uploader_id = $1", &[&id])
            .await?;
        tx.execute("DELETE FROM messages WHERE sender_id = $1", &[&id])
            .await?;
        tx.execute("DELETE FROM group_members WHERE user_id = $1", &[&id])
            .await?;
        let deleted = tx.execute("DELETE FROM users WHERE id = $1", &[&id]).await?;
        if deleted == 0 {
            return Err(AppError::UserNotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_username(&self, id: UserId, new_name: &str) -> Result<(), AppError> {
        if is_reserved_user(id) {
            return Err(AppError::PermissionDenied);
        }
        let client = self.pool.get().await?;
        client
            .execute("UPDATE users SET username = $2 WHERE id = $1", &[&id, &new_name])
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::UserAlreadyExists
                } else {
                    AppError::from(e)
                }
            })?;
        Ok(())
    }

    async fn update_password(&self, id: UserId, new_password: &str) -> Result<(), AppError> {
        let hash = hash_password(new_password)?;
        let client = self.pool.get().await?;
        client
            .execute("UPDATE users SET password_hash = $2 WHERE id = $1", &[&id, &hash])
            .await?;
        Ok(())
    }

    async fn all_users(&self) -> Result<Vec<User>, AppError> {
        let client = self.pool.get().await?;
        let rows = client.query("SELECT * FROM users ORDER BY id", &[]).await?;
        Ok(rows.iter().map(row_to_user).collect())
    }

    async fn create_group_with_members(
        &self,
        name: &str,
        is_private: bool,
        members: &[UserId],
    ) -> Result<GroupId, AppError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                "INSERT INTO chat_groups (name, is_private_chat) VALUES ($1, $2) RETURNING id",
                &[&name, &is_private],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::ChatGroupAlreadyExists
                } else {
                    AppError::from(e)
                }
            })?;
        let id: GroupId = row.get(0);

        for member in members {
            tx.execute(
                "INSERT INTO group_members (group_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
                &[&id, member],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(id)
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<ChatGroup>, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM chat_groups WHERE id = $1", &[&id])
            .await?;
        Ok(row.as_ref().map(row_to_group))
    }

    async fn get_group_by_name(&self, name: &str) -> Result<Option<ChatGroup>, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM chat_groups WHERE name = $1", &[&name])
            .await?;
        Ok(row.as_ref().map(row_to_group))
    }

    async fn delete_group(&self, id: GroupId) -> Result<(), AppError> {
        let group = self.get_group(id).await?.ok_or(AppError::ChatGroupNotFound)?;
        if group.name == PUBLIC_GROUP_NAME {
            return Err(AppError::PermissionDenied);
        }
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        tx.execute("DELETE FROM files_metadata WHERE group_id = $1", &[&id])
            .await?;
        tx.execute("DELETE FROM messages WHERE group_id = $1", &[&id])
            .await?;
        tx.execute("DELETE FROM group_members WHERE group_id = $1", &[&id])
            .await?;
        tx.execute("DELETE FROM chat_groups WHERE id = $1", &[&id]).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn rename_group(&self, id: GroupId, new_name: &str) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE chat_groups SET name = $2 WHERE id = $1",
                &[&id, &new_name],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::ChatGroupAlreadyExists
                } else {
                    AppError::from(e)
                }
            })?;
        if updated == 0 {
            return Err(AppError::ChatGroupNotFound);
        }
        Ok(())
    }

    async fn all_groups(&self, include_private: bool) -> Result<Vec<ChatGroup>, AppError> {
        let client = self.pool.get().await?;
        let rows = if include_private {
            client.query("SELECT * FROM chat_groups ORDER BY id", &[]).await?
        } else {
            client
                .query(
                    "SELECT * FROM chat_groups WHERE is_private_chat = false ORDER BY id",
                    &[],
                )
                .await?
        };
        Ok(rows.iter().map(row_to_group).collect())
    }

    async fn add_member(&self, group: GroupId, user: UserId) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO group_members (group_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
                &[&group, &user],
            )
            .await?;
        Ok(())
    }

    async fn is_member(&self, group: GroupId, user: UserId) -> Result<bool, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM group_members WHERE group_id = $1 AND user_id = $2",
                &[&group, &user],
            )
            .await?;
        Ok(row.is_some())
    }

    async fn groups_for_user(&self, user: UserId) -> Result<Vec<ChatGroup>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT g.* FROM chat_groups g \
                 JOIN group_members m ON m.group_id = g.id \
                 WHERE m.user_id = $1 ORDER BY g.id",
                &[&user],
            )
            .await?;
        Ok(rows.iter().map(row_to_group).collect())
    }

    async fn members_of(&self, group: GroupId) -> Result<Vec<User>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT u.* FROM users u \
                 JOIN group_members m ON m.user_id = u.id \
                 WHERE m.group_id = $1 ORDER BY u.id",
                &[&group],
            )
            .await?;
        Ok(rows.iter().map(row_to_user).collect())
    }

    async fn find_private_group_between(
        &self,
        u1: UserId,
        u2: UserId,
    ) -> Result<Option<GroupId>, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT g.id FROM chat_groups g \
                 JOIN group_members m1 ON m1.group_id = g.id AND m1.user_id = $1 \
                 JOIN group_members m2 ON m2.group_id = g.id AND m2.user_id = $2 \
                 WHERE g.is_private_chat = true LIMIT 1",
                &[&u1, &u2],
            )
            .await?;
        Ok(row.map(|r| r.get(0)))
    }

    async fn is_user_banned(&self, id: UserId) -> Result<bool, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT is_banned FROM users WHERE id = $1", &[&id])
            .await?
            .ok_or(AppError::UserNotFound)?;
        Ok(row.get(0))
    }

    async fn is_group_banned(&self, id: GroupId) -> Result<bool, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT is_banned FROM chat_groups WHERE id = $1", &[&id])
            .await?
            .ok_or(AppError::ChatGroupNotFound)?;
        Ok(row.get(0))
    }

    async fn set_user_banned(&self, id: UserId, banned: bool) -> Result<(), AppError> {
        if banned && is_reserved_user(id) {
            return Err(AppError::PermissionDenied);
        }
        let client = self.pool.get().await?;
        let updated = client
            .execute("UPDATE users SET is_banned = $2 WHERE id = $1", &[&id, &banned])
            .await?;
        if updated == 0 {
            return Err(AppError::UserNotFound);
        }
        Ok(())
    }

    async fn set_group_banned(&self, id: GroupId, banned: bool) -> Result<(), AppError> {
        if banned {
            let group = self.get_group(id).await?.ok_or(AppError::ChatGroupNotFound)?;
            if group.name == PUBLIC_GROUP_NAME {
                return Err(AppError::PermissionDenied);
            }
        }
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE chat_groups SET is_banned = $2 WHERE id = $1",
                &[&id, &banned],
            )
            .await?;
        if updated == 0 {
            return Err(AppError::ChatGroupNotFound);
        }
        Ok(())
    }

    async fn list_banned(&self) -> Result<(Vec<User>, Vec<ChatGroup>), AppError> {
        let client = self.pool.get().await?;
        let user_rows = client
            .query("SELECT * FROM users WHERE is_banned = true ORDER BY id", &[])
            .await?;
        let group_rows = client
            .query(
                "SELECT * FROM chat_groups WHERE is_banned = true ORDER BY id",
                &[],
            )
            .await?;
        Ok((
            user_rows.iter().map(row_to_user).collect(),
            group_rows.iter().map(row_to_group).collect(),
        ))
    }

    async fn save_message(
        &self,
        group: GroupId,
        sender: UserId,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO messages (group_id, sender_id, content, kind) \
                 VALUES ($1, $2, $3, $4) RETURNING *",
                &[&group, &sender, &content, &kind_str(kind)],
            )
            .await?;
        Ok(row_to_message(&row))
    }

    async fn history(&self, group: GroupId, limit: i64) -> Result<Vec<Message>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT * FROM (\
                     SELECT * FROM messages WHERE group_id = $1 \
                     ORDER BY id DESC LIMIT $2\
                 ) recent ORDER BY id ASC",
                &[&group, &limit],
            )
            .await?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    async fn save_file_meta(&self, meta: FileMeta) -> Result<FileId, AppError> {
        let client = self.pool.get().await?;
        let size = meta.size as i64;
        let row = client
            .query_one(
                "INSERT INTO files_metadata \
                 (original_name, server_path, size, uploader_id, group_id, message_id) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
                &[
                    &meta.original_name,
                    &meta.server_path,
                    &size,
                    &meta.uploader_id,
                    &meta.group_id,
                    &meta.message_id,
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Validation("server_path collision".into())
                } else {
                    AppError::from(e)
                }
            })?;
        Ok(row.get(0))
    }

    async fn get_file(&self, id: FileId) -> Result<Option<FileMeta>, AppError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM files_metadata WHERE id = $1", &[&id])
            .await?;
        Ok(row.as_ref().map(row_to_file))
    }

    async fn files_for_group(&self, group: GroupId) -> Result<Vec<FileMeta>, AppError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT * FROM files_metadata WHERE group_id = $1 ORDER BY id",
                &[&group],
            )
            .await?;
        Ok(rows.iter().map(row_to_file).collect())
    }

    async fn delete_file(&self, id: FileId) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM files_metadata WHERE id = $1", &[&id])
            .await?;
        if deleted == 0 {
            return Err(AppError::FileNotFound);
        }
        Ok(())
    }

    async fn bootstrap(&self, admin_password: &str) -> Result<(), AppError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let public_id: GroupId = {
            let row = tx
                .query_opt("SELECT id FROM chat_groups WHERE name = $1", &[&PUBLIC_GROUP_NAME])
                .await?;
            match row {
                Some(r) => r.get(0),
                None => {
                    let r = tx
                        .query_one(
                            "INSERT INTO chat_groups (name, is_private_chat) VALUES ($1, false) RETURNING id",
                            &[&PUBLIC_GROUP_NAME],
                        )
                        .await?;
                    r.get(0)
                }
            }
        };

        let admin_exists = tx
            .query_opt("SELECT 1 FROM users WHERE id = $1", &[&ADMIN_USER_ID])
            .await?
            .is_some();
        if !admin_exists {
            let hash = hash_password(admin_password)?;
            tx.execute(
                "INSERT INTO users (id, username, password_hash) VALUES ($1, 'admin', $2)",
                &[&ADMIN_USER_ID, &hash],
            )
            .await?;
            tx.execute(
                "INSERT INTO group_members (group_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&public_id, &ADMIN_USER_ID],
            )
            .await?;
        }

        let ai_exists = tx
            .query_opt("SELECT 1 FROM users WHERE id = $1", &[&AI_USER_ID])
            .await?
            .is_some();
        if !ai_exists {
            let random_hash = hash_password(&uuid::Uuid::new_v4().to_string())?;
            tx.execute(
                "INSERT INTO users (id, username, password_hash) VALUES ($1, 'AI', $2)",
                &[&AI_USER_ID, &random_hash],
            )
            .await?;
            tx.execute(
                "INSERT INTO group_members (group_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                &[&public_id, &AI_USER_ID],
            )
            .await?;
        }

        tx.execute(
            "SELECT setval('users_id_seq', GREATEST((SELECT COALESCE(MAX(id), 1) FROM users), 2), false)",
            &[],
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }
}
