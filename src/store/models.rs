use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type GroupId = i64;
pub type MessageId = i64;
pub type FileId = i64;

/// Reserved user id for the admin account. Immutable: cannot be deleted,
/// banned, or renamed through the normal admin grammar.
pub const ADMIN_USER_ID: UserId = 0;
/// Reserved user id for the AI participant.
pub const AI_USER_ID: UserId = 1;
/// Name of the bootstrap group every user is a member of.
pub const PUBLIC_GROUP_NAME: &str = "public";

pub fn is_reserved_user(id: UserId) -> bool {
    id == ADMIN_USER_ID || id == AI_USER_ID
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_online: bool,
    pub is_banned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatGroup {
    pub id: GroupId,
    pub name: String,
    pub is_private_chat: bool,
    pub is_banned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    System,
    Ai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    pub id: FileId,
    pub original_name: String,
    pub server_path: String,
    pub size: u64,
    pub uploader_id: UserId,
    pub group_id: GroupId,
    pub upload_time: DateTime<Utc>,
    pub message_id: Option<MessageId>,
}
