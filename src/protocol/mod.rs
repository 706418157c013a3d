//! Newline-delimited JSON framing and tag-based request routing.

pub mod handlers;

use crate::error::AppError;
use crate::session::ConnId;
use crate::state::AppState;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Notify;

/// Per-connection handle passed to every handler: where to write frames
/// destined for *this* connection specifically (as opposed to a broadcast,
/// which goes through the session registry instead), and the notifier a
/// re-login elsewhere uses to wake this connection's read loop so it can
/// close the socket instead of idling on a session nobody owns anymore.
#[derive(Clone)]
pub struct ConnContext {
    pub id: ConnId,
    pub outbound: UnboundedSender<String>,
    pub shutdown: Arc<Notify>,
}

impl ConnContext {
    pub fn send(&self, value: Value) {
        if let Ok(text) = serde_json::to_string(&value) {
            let _ = self.outbound.send(text);
        }
    }

    pub fn send_error(&self, err: &AppError) {
        self.send(error_frame(err));
    }
}

pub fn now_ts() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn error_frame(err: &AppError) -> Value {
    json!({
        "message_type": "error_message",
        "error_code": err.wire_code(),
        "error_message": err.wire_message(),
        "timestamp": now_ts(),
    })
}

/// Parses and routes one line. Never panics on malformed input; UTF-8 and
/// JSON failures, and unknown tags, all turn into an `INVALID_COMMAND` frame
/// back on the same connection.
pub async fn dispatch(state: &AppState, ctx: &ConnContext, line: &str) {
    let parsed: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            ctx.send_error(&AppError::InvalidCommand("malformed JSON frame".into()));
            return;
        }
    };

    let Some(tag) = parsed.get("message_type").and_then(Value::as_str) else {
        ctx.send_error(&AppError::InvalidCommand("missing message_type".into()));
        return;
    };

    let result = match tag {
        "register_request" => handlers::register(state, ctx, &parsed).await,
        "login_request" => handlers::login(state, ctx, &parsed).await,
        "chat_message" => handlers::chat_message(state, ctx, &parsed).await,
        "user_info_request" => handlers::user_info(state, ctx, &parsed).await,
        "list_users_request" => handlers::list_users(state, ctx, &parsed).await,
        "list_chats_request" => handlers::list_chats(state, ctx, &parsed).await,
        "create_chat_request" => handlers::create_chat(state, ctx, &parsed).await,
        "join_chat_request" => handlers::join_chat(state, ctx, &parsed).await,
        "enter_chat_request" => handlers::enter_chat(state, ctx, &parsed).await,
        "file_upload_request" => handlers::file_upload(state, ctx, &parsed).await,
        "file_list_request" => handlers::file_list(state, ctx, &parsed).await,
        "file_download_request" => handlers::file_download(state, ctx, &parsed).await,
        "logout_request" => handlers::logout(state, ctx, &parsed).await,
        other => Err(AppError::InvalidCommand(format!("unknown message_type: {other}"))),
    };

    if let Err(e) = result {
        if e.is_internal() {
            tracing::error!(error = ?e, tag, "handler failed");
        }
        ctx.send_error(&e);
    }
}
