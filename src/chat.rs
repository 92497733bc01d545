use crate::config::ChatConfig;
use crate::error::{ApiError, ApiResult};
use crate::models::{ChatMessage, Identity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const ALLOWED_ROLES: [&str; 3] = ["user", "assistant", "system"];

/// Something that turns a conversation into the assistant's next reply.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// False when the client has no credentials to call out with.
    fn is_configured(&self) -> bool;

    async fn complete(&self, messages: &[ChatMessage]) -> ApiResult<String>;
}

/// Talks to an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: &ChatConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(OpenAiClient {
            http,
            api_key: config.api_key.clone(),
            endpoint: format!("{}/chat/completions", config.api_url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, messages: &[ChatMessage]) -> ApiResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ApiError::validation("Chat API key is not configured"))?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&CompletionRequest {
                model: &self.model,
                messages,
            })
            .send()
            .await
            .map_err(|e| ApiError::upstream(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::debug!("completion service answered {}: {}", status, body);
            return Err(ApiError::upstream(format!("service returned {}", status)));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ApiError::upstream(format!("unreadable response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ApiError::upstream("response contained no message"))
    }
}

/// Prepends a study-assistant instruction to the caller's conversation and
/// relays it upstream. Failures are surfaced as-is, never retried.
#[derive(Clone)]
pub struct ConversationForwarder {
    client: Arc<dyn CompletionClient>,
}

impl ConversationForwarder {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        ConversationForwarder { client }
    }

    pub async fn chat(
        &self,
        identity: &Identity,
        specialty: &str,
        messages: Vec<ChatMessage>,
    ) -> ApiResult<String> {
        if messages.is_empty() {
            return Err(ApiError::validation("No messages provided"));
        }
        if let Some(bad) = messages
            .iter()
            .find(|m| !ALLOWED_ROLES.contains(&m.role.as_str()))
        {
            return Err(ApiError::validation(format!("Unknown message role: {}", bad.role)));
        }
        if !self.client.is_configured() {
            return Err(ApiError::validation("Chat API key is not configured"));
        }

        let mut conversation = Vec::with_capacity(messages.len() + 1);
        conversation.push(ChatMessage::new("system", system_instruction(specialty)));
        conversation.extend(messages);

        log::debug!(
            "forwarding {} messages for {}",
            conversation.len(),
            identity.account_id
        );
        self.client.complete(&conversation).await
    }
}

pub fn system_instruction(specialty: &str) -> String {
    let specialty = specialty.trim();
    let role = if specialty.is_empty() {
        "You are a helpful study assistant.".to_string()
    } else {
        format!("You are a helpful study assistant specialized in {}.", specialty)
    };
    format!(
        "{} Answer clearly and concisely and help the student understand the material.",
        role
    )
}
