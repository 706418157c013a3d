use super::{now_ts, ConnContext};
use crate::error::{AppError, AppResult};
use crate::session::Session;
use crate::state::AppState;
use crate::store::models::*;
use crate::validation;
use serde_json::{json, Value};

fn field_str<'a>(value: &'a Value, key: &str) -> AppResult<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation(format!("missing or invalid field: {key}")))
}

fn field_i64(value: &Value, key: &str) -> AppResult<i64> {
    value
        .get(key)
        .and_then(Value::as_i64)
        .ok_or_else(|| AppError::Validation(format!("missing or invalid field: {key}")))
}

fn field_u64(value: &Value, key: &str) -> AppResult<u64> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| AppError::Validation(format!("missing or invalid field: {key}")))
}

fn field_str_array(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

async fn current_session(state: &AppState, ctx: &ConnContext) -> AppResult<Session> {
    state.sessions.get_by_conn(ctx.id).await.ok_or(AppError::Authentication)
}

fn group_summary(group: &ChatGroup) -> Value {
    json!({
        "chat_group_id": group.id,
        "name": group.name,
        "is_private_chat": group.is_private_chat,
    })
}

fn user_summary(user: &User) -> Value {
    json!({
        "user_id": user.id,
        "username": user.username,
        "is_online": user.is_online,
    })
}

pub async fn register(state: &AppState, ctx: &ConnContext, req: &Value) -> AppResult<()> {
    let username = field_str(req, "username")?;
    let password = field_str(req, "password")?;
    validation::validate_username(username)?;
    validation::validate_password(password)?;

    let id = state.store.create_user(username, password).await?;
    ctx.send(json!({
        "message_type": "register_response",
        "success": true,
        "user_id": id,
        "username": username,
        "timestamp": now_ts(),
    }));
    Ok(())
}

pub async fn login(state: &AppState, ctx: &ConnContext, req: &Value) -> AppResult<()> {
    let username = field_str(req, "username")?;
    let password = field_str(req, "password")?;

    let user = state
        .store
        .authenticate(username, password)
        .await?
        .ok_or(AppError::Authentication)?;

    let public = state
        .store
        .get_group_by_name(PUBLIC_GROUP_NAME)
        .await?
        .ok_or_else(|| AppError::Internal("public group missing".into()))?;
    state.store.add_member(public.id, user.id).await?;

    state
        .sessions
        .login(user.id, ctx.id, ctx.outbound.clone(), ctx.shutdown.clone())
        .await;
    state.sessions.set_current_group(user.id, public.id).await;
    state.store.set_online(user.id, true).await?;

    ctx.send(json!({
        "message_type": "login_response",
        "success": true,
        "user_id": user.id,
        "username": user.username,
        "current_chat_group_id": public.id,
        "timestamp": now_ts(),
    }));
    Ok(())
}

pub async fn chat_message(state: &AppState, ctx: &ConnContext, req: &Value) -> AppResult<()> {
    let session = current_session(state, ctx).await?;
    let group_id = field_i64(req, "chat_group_id")?;
    let raw_content = field_str(req, "content")?;
    let content = validation::sanitize_message_content(raw_content)?;

    if session.user_id == ADMIN_USER_ID && content.starts_with('/') {
        let outcome = state.admin.dispatch(session.user_id, &content).await;
        match outcome {
            Ok(result) => ctx.send(json!({
                "message_type": "admin_response",
                "success": true,
                "result": format!("{result:?}"),
                "timestamp": now_ts(),
            })),
            Err(e) => ctx.send_error(&e),
        }
        return Ok(());
    }

    state.group_engine.send(session.user_id, group_id, &content).await?;

    if let Some(group) = state.store.get_group(group_id).await? {
        state.ai.maybe_respond(session.user_id, &group, &content);
    }
    Ok(())
}

pub async fn user_info(state: &AppState, ctx: &ConnContext, _req: &Value) -> AppResult<()> {
    let session = current_session(state, ctx).await?;
    let user = state.store.get_user(session.user_id).await?.ok_or(AppError::UserNotFound)?;
    let groups = state.store.groups_for_user(session.user_id).await?;
    let (group_count, private_count) = groups.iter().fold((0, 0), |(g, p), group| {
        if group.is_private_chat { (g, p + 1) } else { (g + 1, p) }
    });

    let all_users = state.store.all_users().await?;
    let total_users_count = all_users.len();
    let online_users_count = all_users.iter().filter(|u| u.is_online).count();

    ctx.send(json!({
        "message_type": "user_info_response",
        "user_id": user.id,
        "username": user.username,
        "group_chat_count": group_count,
        "private_chat_count": private_count,
        "total_users_count": total_users_count,
        "online_users_count": online_users_count,
        "timestamp": now_ts(),
    }));
    Ok(())
}

pub async fn list_users(state: &AppState, ctx: &ConnContext, req: &Value) -> AppResult<()> {
    let session = current_session(state, ctx).await?;
    let list_type = req.get("list_type").and_then(Value::as_str).unwrap_or("all");

    let users = if list_type == "current_chat" {
        let group_id = state.sessions.get_current_group(session.user_id).await;
        match group_id {
            Some(gid) => state.store.members_of(gid).await?,
            None => Vec::new(),
        }
    } else {
        state.store.all_users().await?
    };

    ctx.send(json!({
        "message_type": "list_users_response",
        "users": users.iter().map(user_summary).collect::<Vec<_>>(),
        "timestamp": now_ts(),
    }));
    Ok(())
}

pub async fn list_chats(state: &AppState, ctx: &ConnContext, req: &Value) -> AppResult<()> {
    let session = current_session(state, ctx).await?;
    let list_type = req.get("list_type").and_then(Value::as_str).unwrap_or("user_chats");

    let groups = if list_type == "group_chats" {
        state.store.all_groups(false).await?
    } else {
        state.store.groups_for_user(session.user_id).await?
    };

    ctx.send(json!({
        "message_type": "list_chats_response",
        "chats": groups.iter().map(group_summary).collect::<Vec<_>>(),
        "timestamp": now_ts(),
    }));
    Ok(())
}

pub async fn create_chat(state: &AppState, ctx: &ConnContext, req: &Value) -> AppResult<()> {
    let session = current_session(state, ctx).await?;
    let chat_name = field_str(req, "chat_name")?;
    validation::validate_group_name(chat_name)?;
    let member_usernames = field_str_array(req, "member_usernames");

    let mut member_ids = Vec::with_capacity(member_usernames.len());
    for username in &member_usernames {
        let user = state
            .store
            .get_user_by_username(username)
            .await?
            .ok_or(AppError::UserNotFound)?;
        member_ids.push(user.id);
    }

    let is_private = req.get("is_private").and_then(Value::as_bool).unwrap_or(false);
    let group = state
        .group_engine
        .create(chat_name, session.user_id, &member_ids, is_private)
        .await?;

    ctx.send(json!({
        "message_type": "create_chat_response",
        "success": true,
        "chat_group_id": group.id,
        "chat_name": group.name,
        "timestamp": now_ts(),
    }));
    Ok(())
}

pub async fn join_chat(state: &AppState, ctx: &ConnContext, req: &Value) -> AppResult<()> {
    let session = current_session(state, ctx).await?;
    let chat_name = field_str(req, "chat_name")?;
    let group = state.group_engine.join(chat_name, session.user_id).await?;

    ctx.send(json!({
        "message_type": "join_chat_response",
        "success": true,
        "chat_group_id": group.id,
        "chat_name": group.name,
        "timestamp": now_ts(),
    }));
    Ok(())
}

pub async fn enter_chat(state: &AppState, ctx: &ConnContext, req: &Value) -> AppResult<()> {
    let session = current_session(state, ctx).await?;
    let chat_name = field_str(req, "chat_name")?;
    let group = state.group_engine.enter(chat_name, session.user_id).await?;

    ctx.send(json!({
        "message_type": "enter_chat_response",
        "success": true,
        "chat_group_id": group.id,
        "chat_name": group.name,
        "timestamp": now_ts(),
    }));

    let history = state.store.history(group.id, 50).await?;
    for message in &history {
        ctx.send(json!({
            "message_type": "chat_message",
            "message_id": message.id,
            "chat_group_id": message.group_id,
            "sender_id": message.sender_id,
            "content": message.content,
            "kind": message.kind,
            "timestamp": message.timestamp.timestamp(),
        }));
    }
    ctx.send(json!({
        "message_type": "chat_history_complete",
        "chat_group_id": group.id,
        "message_count": history.len(),
        "timestamp": now_ts(),
    }));
    Ok(())
}

pub async fn file_upload(state: &AppState, ctx: &ConnContext, req: &Value) -> AppResult<()> {
    let session = current_session(state, ctx).await?;
    let original_name = field_str(req, "original_name")?;
    let size = field_u64(req, "size")?;
    let group_id = field_i64(req, "chat_group_id")?;

    if !state.store.is_member(group_id, session.user_id).await? {
        return Err(AppError::PermissionDenied);
    }
    validation::validate_file_name(original_name, &state.config.allowed_file_extensions)?;
    validation::validate_file_size(size, state.config.max_file_size_bytes)?;

    let server_path = state.blobs.allocate_path(original_name).await?;
    let meta = FileMeta {
        id: 0,
        original_name: original_name.to_string(),
        server_path: server_path.clone(),
        size,
        uploader_id: session.user_id,
        group_id,
        upload_time: chrono::Utc::now(),
        message_id: None,
    };
    let id = state.store.save_file_meta(meta).await?;

    ctx.send(json!({
        "message_type": "file_upload_response",
        "success": true,
        "file_id": id,
        "server_path": server_path,
        "timestamp": now_ts(),
    }));
    Ok(())
}

pub async fn file_list(state: &AppState, ctx: &ConnContext, req: &Value) -> AppResult<()> {
    let session = current_session(state, ctx).await?;
    let group_id = field_i64(req, "chat_group_id")?;
    if !state.store.is_member(group_id, session.user_id).await? {
        return Err(AppError::PermissionDenied);
    }
    let files = state.store.files_for_group(group_id).await?;
    ctx.send(json!({
        "message_type": "file_list_response",
        "files": files.iter().map(|f| json!({
            "file_id": f.id,
            "original_name": f.original_name,
            "size": f.size,
            "uploader_id": f.uploader_id,
        })).collect::<Vec<_>>(),
        "timestamp": now_ts(),
    }));
    Ok(())
}

pub async fn file_download(state: &AppState, ctx: &ConnContext, req: &Value) -> AppResult<()> {
    current_session(state, ctx).await?;
    let file_id = field_i64(req, "file_id")?;
    let meta = state.store.get_file(file_id).await?.ok_or(AppError::FileNotFound)?;
    if !state.blobs.exists(&meta.server_path).await {
        return Err(AppError::FileNotFound);
    }
    ctx.send(json!({
        "message_type": "file_download_response",
        "success": true,
        "file_id": meta.id,
        "original_name": meta.original_name,
        "server_path": meta.server_path,
        "size": meta.size,
        "timestamp": now_ts(),
    }));
    Ok(())
}

pub async fn logout(state: &AppState, ctx: &ConnContext, _req: &Value) -> AppResult<()> {
    let session = current_session(state, ctx).await?;
    state.sessions.logout(session.user_id).await;
    ctx.send(json!({
        "message_type": "logout_response",
        "success": true,
        "timestamp": now_ts(),
    }));
    Ok(())
}
