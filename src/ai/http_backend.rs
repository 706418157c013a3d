//! Default [`AiBackend`] implementation: an OpenAI-compatible chat
//! completions endpoint over HTTP. Grounded in the teacher's `reqwest`
//! JSON-client usage for its media-upload service, generalized to a JSON
//! POST/response cycle instead of a multipart upload.

use super::{AiBackend, AiRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct HttpAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpAiBackend {
    pub fn new(base_url: String, api_key: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, base_url, api_key, model }
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl AiBackend for HttpAiBackend {
    async fn generate(&self, request: AiRequest) -> Result<String, String> {
        let mut messages = vec![ChatMessage {
            role: "system",
            content: request.system_prompt,
        }];
        for (speaker, content) in request.context {
            messages.push(ChatMessage {
                role: "user",
                content: format!("{speaker}: {content}"),
            });
        }
        messages.push(ChatMessage { role: "user", content: request.prompt });

        let body = ChatCompletionRequest { model: self.model.clone(), messages };

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("ai backend request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("ai backend returned status {}", response.status()));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| format!("ai backend response parse failed: {e}"))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| "ai backend returned no choices".to_string())
    }
}
