//! Admin command grammar: `/VERB -OBJECT ARG*`.
//!
//! A plain tokenizer plus a dispatch table, not string-chained conditionals.
//! Every invocation — success or failure — is appended to the audit trail
//! via the same `tracing` sink as the rest of the server.

use crate::error::{AppError, AppResult};
use crate::group_engine::GroupEngine;
use crate::store::models::*;
use crate::store::Store;
use crate::validation;
use std::sync::Arc;

pub struct AdminSubsystem {
    store: Arc<dyn Store>,
    engine: Arc<GroupEngine>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AdminOutcome {
    UserCreated { id: UserId },
    UserDeleted,
    GroupDeleted,
    FileDeleted,
    UserModified,
    GroupRenamed,
    Banned,
    Freed,
    BannedList { users: Vec<String>, groups: Vec<String> },
}

impl AdminSubsystem {
    pub fn new(store: Arc<dyn Store>, engine: Arc<GroupEngine>) -> Self {
        Self { store, engine }
    }

    /// `caller_id` must be `ADMIN_USER_ID` or every command is rejected.
    pub async fn dispatch(&self, caller_id: UserId, line: &str) -> AppResult<AdminOutcome> {
        let result = self.dispatch_inner(caller_id, line).await;
        match &result {
            Ok(_outcome) => {
                tracing::info!(operator = caller_id, command = line, "admin command succeeded");
            }
            Err(e) => {
                tracing::warn!(operator = caller_id, command = line, error = %e, "admin command failed");
            }
        }
        result
    }

    async fn dispatch_inner(&self, caller_id: UserId, line: &str) -> AppResult<AdminOutcome> {
        if caller_id != ADMIN_USER_ID {
            return Err(AppError::PermissionDenied);
        }
        let tokens = tokenize(line)?;
        let verb = tokens.first().ok_or_else(|| AppError::InvalidCommand("empty command".into()))?;
        let object = tokens.get(1).ok_or_else(|| AppError::InvalidCommand("missing object flag".into()))?;
        let args = &tokens[2.min(tokens.len())..];

        match (verb.as_str(), object.as_str()) {
            ("add", "-u") => self.add_user(args).await,
            ("del", "-u") => self.del_user(caller_id, args).await,
            ("del", "-g") => self.del_group(args).await,
            ("del", "-f") => self.del_file(args).await,
            ("modify", "-u") => self.modify_user(args).await,
            ("modify", "-g") => self.modify_group(args).await,
            ("ban", "-u") => self.ban_user(caller_id, args, true).await,
            ("ban", "-g") => self.ban_group(args, true).await,
            ("free", "-u") => self.ban_user(caller_id, args, false).await,
            ("free", "-g") => self.ban_group(args, false).await,
            ("free", "-l") => self.list_banned().await,
            _ => Err(AppError::InvalidCommand(format!("unknown command: {verb} {object}"))),
        }
    }

    async fn add_user(&self, args: &[String]) -> AppResult<AdminOutcome> {
        let [username, password] = require_args(args)?;
        validation::validate_username(username)?;
        validation::validate_password(password)?;
        let id = self.store.create_user(username, password).await?;
        Ok(AdminOutcome::UserCreated { id })
    }

    async fn del_user(&self, caller_id: UserId, args: &[String]) -> AppResult<AdminOutcome> {
        let [id_str] = require_args(args)?;
        let id = parse_id(id_str)?;
        if id == caller_id || is_reserved_user(id) {
            return Err(AppError::PermissionDenied);
        }
        self.store.delete_user(id).await?;
        Ok(AdminOutcome::UserDeleted)
    }

    async fn del_group(&self, args: &[String]) -> AppResult<AdminOutcome> {
        let [id_str] = require_args(args)?;
        let id = parse_id(id_str)?;
        self.store.delete_group(id).await?;
        Ok(AdminOutcome::GroupDeleted)
    }

    async fn del_file(&self, args: &[String]) -> AppResult<AdminOutcome> {
        let [id_str] = require_args(args)?;
        let id = parse_id(id_str)?;
        self.store.delete_file(id).await?;
        Ok(AdminOutcome::FileDeleted)
    }

    async fn modify_user(&self, args: &[String]) -> AppResult<AdminOutcome> {
        let [id_str, field, new_value] = require_args(args)?;
        let id = parse_id(id_str)?;
        match field.as_str() {
            "username" => {
                validation::validate_username(new_value)?;
                self.store.update_username(id, new_value).await?;
            }
            "password" => {
                validation::validate_password(new_value)?;
                self.store.update_password(id, new_value).await?;
            }
            other => return Err(AppError::InvalidCommand(format!("unknown user field: {other}"))),
        }
        Ok(AdminOutcome::UserModified)
    }

    async fn modify_group(&self, args: &[String]) -> AppResult<AdminOutcome> {
        let [id_str, field, new_value] = require_args(args)?;
        let id = parse_id(id_str)?;
        if field != "name" {
            return Err(AppError::InvalidCommand(format!("unknown group field: {field}")));
        }
        validation::validate_group_name(new_value)?;
        self.store.rename_group(id, new_value).await?;
        Ok(AdminOutcome::GroupRenamed)
    }

    async fn resolve_user(&self, target: &str) -> AppResult<UserId> {
        if let Ok(id) = target.parse::<UserId>() {
            if self.store.get_user(id).await?.is_some() {
                return Ok(id);
            }
        }
        self.store
            .get_user_by_username(target)
            .await?
            .map(|u| u.id)
            .ok_or(AppError::UserNotFound)
    }

    async fn resolve_group(&self, target: &str) -> AppResult<GroupId> {
        if let Ok(id) = target.parse::<GroupId>() {
            if self.store.get_group(id).await?.is_some() {
                return Ok(id);
            }
        }
        self.store
            .get_group_by_name(target)
            .await?
            .map(|g| g.id)
            .ok_or(AppError::ChatGroupNotFound)
    }

    async fn ban_user(&self, caller_id: UserId, args: &[String], banned: bool) -> AppResult<AdminOutcome> {
        let [target] = require_args(args)?;
        let id = self.resolve_user(target).await?;
        if banned && (id == caller_id || is_reserved_user(id)) {
            return Err(AppError::PermissionDenied);
        }
        if !banned && !self.store.is_user_banned(id).await? {
            return Err(AppError::InvalidCommand("user is not banned".into()));
        }
        self.store.set_user_banned(id, banned).await?;
        Ok(if banned { AdminOutcome::Banned } else { AdminOutcome::Freed })
    }

    async fn ban_group(&self, args: &[String], banned: bool) -> AppResult<AdminOutcome> {
        let [target] = require_args(args)?;
        let id = self.resolve_group(target).await?;
        if !banned && !self.store.is_group_banned(id).await? {
            return Err(AppError::InvalidCommand("group is not banned".into()));
        }
        self.store.set_group_banned(id, banned).await?;
        Ok(if banned { AdminOutcome::Banned } else { AdminOutcome::Freed })
    }

    async fn list_banned(&self) -> AppResult<AdminOutcome> {
        let (users, groups) = self.store.list_banned().await?;
        Ok(AdminOutcome::BannedList {
            users: users.into_iter().map(|u| u.username).collect(),
            groups: groups.into_iter().map(|g| g.name).collect(),
        })
    }
}

fn parse_id<T: std::str::FromStr>(s: &str) -> AppResult<T> {
    s.parse().map_err(|_| AppError::InvalidCommand(format!("invalid id: {s}")))
}

fn require_args<const N: usize>(args: &[String]) -> AppResult<[&String; N]> {
    args.get(..N)
        .map(|slice| std::array::from_fn(|i| &slice[i]))
        .ok_or_else(|| AppError::InvalidCommand(format!("expected {N} argument(s)")))
}

/// Splits on whitespace, respecting double-quoted segments so a renamed
/// group or password containing a space can still be passed as one arg.
fn tokenize(line: &str) -> AppResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = line.trim().chars().peekable();
    let mut current = String::new();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(AppError::InvalidCommand("unterminated quote".into()));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;
    use crate::store::memory::MemoryStore;

    async fn subsystem() -> AdminSubsystem {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store.bootstrap("adminpass1").await.unwrap();
        let engine = Arc::new(GroupEngine::new(store.clone(), SessionRegistry::new(store.clone())));
        AdminSubsystem::new(store, engine)
    }

    #[tokio::test]
    async fn non_admin_caller_rejected() {
        let admin = subsystem().await;
        let err = admin.dispatch(42, "/add -u alice password1").await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
    }

    #[tokio::test]
    async fn add_user_then_ban_and_free() {
        let admin = subsystem().await;
        let outcome = admin.dispatch(ADMIN_USER_ID, "/add -u alice password1").await.unwrap();
        let AdminOutcome::UserCreated { id } = outcome else { panic!("wrong outcome") };

        admin.dispatch(ADMIN_USER_ID, &format!("/ban -u {id}")).await.unwrap();
        let err = admin
            .dispatch(ADMIN_USER_ID, &format!("/ban -u {id}"))
            .await;
        assert!(err.is_ok()); // re-banning is allowed, it's just a flag set

        admin.dispatch(ADMIN_USER_ID, &format!("/free -u {id}")).await.unwrap();
    }

    #[tokio::test]
    async fn cannot_ban_reserved_ids() {
        let admin = subsystem().await;
        let err = admin
            .dispatch(ADMIN_USER_ID, &format!("/ban -u {AI_USER_ID}"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
    }

    #[tokio::test]
    async fn cannot_delete_self_or_reserved() {
        let admin = subsystem().await;
        let err = admin
            .dispatch(ADMIN_USER_ID, &format!("/del -u {ADMIN_USER_ID}"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied));
    }

    #[test]
    fn tokenize_respects_quotes() {
        let tokens = tokenize(r#"/modify -g 3 name "new room name""#).unwrap();
        assert_eq!(tokens, vec!["/modify", "-g", "3", "name", "new room name"]);
    }
}
