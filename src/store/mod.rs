pub mod memory;
pub mod models;
pub mod postgres;

pub use models::*;

use crate::error::AppResult;
use async_trait::async_trait;

/// Durable relational state: users, groups, memberships, messages, files.
/// Every write that touches more than one row runs in a single transaction;
/// partial failure rolls back. Implementations must treat reserved ids
/// (`ADMIN_USER_ID`, `AI_USER_ID`) and the `public` group as immutable where
/// the spec says so — this is enforced here, not just by the admin layer,
/// since the Store is the final authority.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, username: &str, password: &str) -> AppResult<UserId>;
    async fn authenticate(&self, username: &str, password: &str) -> AppResult<Option<User>>;
    async fn get_user(&self, id: UserId) -> AppResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>>;
    async fn set_online(&self, id: UserId, online: bool) -> AppResult<()>;
    async fn delete_user(&self, id: UserId) -> AppResult<()>;
    async fn update_username(&self, id: UserId, new_name: &str) -> AppResult<()>;
    async fn update_password(&self, id: UserId, new_password: &str) -> AppResult<()>;
    async fn all_users(&self) -> AppResult<Vec<User>>;

    async fn create_group(&self, name: &str, is_private: bool) -> AppResult<GroupId> {
        self.create_group_with_members(name, is_private, &[]).await
    }
    /// Creates the group and adds `members` to it in one transaction.
    async fn create_group_with_members(
        &self,
        name: &str,
        is_private: bool,
        members: &[UserId],
    ) -> AppResult<GroupId>;
    async fn get_group(&self, id: GroupId) -> AppResult<Option<ChatGroup>>;
    async fn get_group_by_name(&self, name: &str) -> AppResult<Option<ChatGroup>>;
    async fn delete_group(&self, id: GroupId) -> AppResult<()>;
    async fn rename_group(&self, id: GroupId, new_name: &str) -> AppResult<()>;
    async fn all_groups(&self, include_private: bool) -> AppResult<Vec<ChatGroup>>;

    async fn add_member(&self, group: GroupId, user: UserId) -> AppResult<()>;
    async fn is_member(&self, group: GroupId, user: UserId) -> AppResult<bool>;
    async fn groups_for_user(&self, user: UserId) -> AppResult<Vec<ChatGroup>>;
    async fn members_of(&self, group: GroupId) -> AppResult<Vec<User>>;
    async fn find_private_group_between(
        &self,
        u1: UserId,
        u2: UserId,
    ) -> AppResult<Option<GroupId>>;

    async fn is_user_banned(&self, id: UserId) -> AppResult<bool>;
    async fn is_group_banned(&self, id: GroupId) -> AppResult<bool>;
    async fn set_user_banned(&self, id: UserId, banned: bool) -> AppResult<()>;
    async fn set_group_banned(&self, id: GroupId, banned: bool) -> AppResult<()>;
    async fn list_banned(&self) -> AppResult<(Vec<User>, Vec<ChatGroup>)>;

    async fn save_message(
        &self,
        group: GroupId,
        sender: UserId,
        content: &str,
        kind: MessageKind,
    ) -> AppResult<Message>;
    async fn history(&self, group: GroupId, limit: i64) -> AppResult<Vec<Message>>;

    async fn save_file_meta(&self, meta: FileMeta) -> AppResult<FileId>;
    async fn get_file(&self, id: FileId) -> AppResult<Option<FileMeta>>;
    async fn files_for_group(&self, group: GroupId) -> AppResult<Vec<FileMeta>>;
    async fn delete_file(&self, id: FileId) -> AppResult<()>;

    /// Creates `public`, the admin user, and the AI user if they don't
    /// already exist. Idempotent; safe to call on every startup.
    async fn bootstrap(&self, admin_password: &str) -> AppResult<()>;
}
