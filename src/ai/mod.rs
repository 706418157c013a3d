pub mod http_backend;

use crate::config::AiConfig;
use crate::group_engine::GroupEngine;
use crate::store::models::{GroupId, Message, MessageKind, UserId, AI_USER_ID};
use crate::store::Store;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A chat-completion request passed to the configured LLM provider.
pub struct AiRequest {
    pub system_prompt: String,
    pub context: Vec<(String, String)>, // (speaker, content), oldest first
    pub prompt: String,
}

/// The narrow seam the core depends on for text generation. The concrete
/// provider (OpenAI, Anthropic, a local model server, ...) is an external
/// collaborator; this trait is the entire contract.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn generate(&self, request: AiRequest) -> Result<String, String>;
}

/// Decides whether an incoming chat message should trigger an AI reply, and
/// if so, runs the backend call on a bounded worker pool so a slow or
/// misbehaving backend can never stall the chat path.
pub struct AiParticipant {
    config: AiConfig,
    backend: Arc<dyn AiBackend>,
    engine: Arc<GroupEngine>,
    store: Arc<dyn Store>,
    jobs: Arc<Semaphore>,
}

impl AiParticipant {
    pub fn new(
        config: AiConfig,
        backend: Arc<dyn AiBackend>,
        engine: Arc<GroupEngine>,
        store: Arc<dyn Store>,
    ) -> Self {
        let permits = config.max_concurrent_jobs.max(1);
        Self {
            config,
            backend,
            engine,
            store,
            jobs: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Call after a chat message from a non-AI sender has been persisted and
    /// broadcast. Spawns the reply job without blocking the caller.
    ///
    /// The private-chat rule additionally requires the AI to already be a
    /// member of the group (non-private groups always add it at creation;
    /// private ones usually don't, per [`crate::group_engine::GroupEngine::create`]),
    /// so that check runs inside the spawned task where an async Store call
    /// is available, rather than in the synchronous [`Self::should_trigger`].
    pub fn maybe_respond(self: &Arc<Self>, sender_id: UserId, group: &crate::store::models::ChatGroup, content: &str) {
        if !self.config.enabled || sender_id == AI_USER_ID {
            return;
        }
        let triggered_by_content = self.should_trigger(content);
        let private_trigger_possible = self.config.trigger_on_private && group.is_private_chat;
        if !triggered_by_content && !private_trigger_possible {
            return;
        }

        let Ok(permit) = self.jobs.clone().try_acquire_owned() else {
            tracing::warn!(group_id = group.id, "AI worker pool saturated, dropping job");
            return;
        };

        let this = Arc::clone(self);
        let group_id = group.id;
        let content = content.to_string();
        tokio::spawn(async move {
            let _permit = permit;
            if !triggered_by_content {
                match this.store.is_member(group_id, AI_USER_ID).await {
                    Ok(true) => {}
                    Ok(false) => return,
                    Err(e) => {
                        tracing::warn!(error = %e, group_id, "AI: failed to check membership for private trigger");
                        return;
                    }
                }
            }
            this.respond(group_id, &content).await;
        });
    }

    fn should_trigger(&self, content: &str) -> bool {
        if self.config.trigger_on_mention && content.to_ascii_lowercase().contains("@ai") {
            return true;
        }
        if self.config.trigger_on_keyword {
            let lower = content.to_ascii_lowercase();
            if self
                .config
                .trigger_keywords
                .iter()
                .any(|kw| lower.contains(&kw.to_ascii_lowercase()))
            {
                return true;
            }
        }
        false
    }

    async fn respond(&self, group_id: GroupId, prompt: &str) {
        let context = match self.store.history(group_id, self.config.context_messages as i64).await {
            Ok(messages) => messages.iter().map(format_context_entry).collect(),
            Err(e) => {
                tracing::warn!(error = %e, group_id, "AI: failed to load context, responding without it");
                Vec::new()
            }
        };

        let request = AiRequest {
            system_prompt: self.config.system_prompt.clone(),
            context,
            prompt: prompt.to_string(),
        };

        let reply = match tokio::time::timeout(
            std::time::Duration::from_secs(self.config.request_timeout_secs),
            self.backend.generate(request),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, group_id, "AI backend call failed, dropping");
                return;
            }
            Err(_) => {
                tracing::warn!(group_id, "AI backend call timed out, dropping");
                return;
            }
        };

        if let Err(e) = self.engine.send(AI_USER_ID, group_id, &reply).await {
            tracing::warn!(error = %e, group_id, "AI: failed to send generated reply");
        }
    }
}

fn format_context_entry(message: &Message) -> (String, String) {
    let speaker = match message.kind {
        MessageKind::Ai => "assistant".to_string(),
        _ => message.sender_id.to_string(),
    };
    (speaker, message.content.clone())
}
