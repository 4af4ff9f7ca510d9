//! Generation backend abstraction and HTTP implementations.
//!
//! [`CompletionBackend`] is the seam the dispatcher is generic over: tests
//! plug in scripted backends, production uses [`LlmBackend`], an enum over
//! the three supported wire protocols. All HTTP traffic goes through
//! `reqwest`; the dispatcher never sees status codes, only
//! [`TransportError`] values.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{BackendType, LlmBackendConfig};
use crate::error::{RunnerError, TransportError};

/// Per-request timeout for generation calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Persona and context.
    System,
    /// Stage instruction.
    User,
    /// Model output.
    Assistant,
}

/// One message of a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single generation request as the dispatcher sends it.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// Conversation, usually `[system, user]`.
    pub messages: Vec<ChatMessage>,
    /// Output token ceiling.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Sampling seed, where the backend supports one.
    pub seed: Option<u64>,
}

impl GenerationRequest {
    /// The same request with a different seed.
    #[must_use]
    pub fn with_seed(&self, seed: Option<u64>) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }

    /// Concatenated system text, empty if there is none.
    pub fn system_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Text of the last user message, empty if there is none.
    pub fn user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map_or("", |m| m.content.as_str())
    }
}

/// Fold system messages into the first user message.
fn merge_system_into_user(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    if system.is_empty() {
        return messages.to_vec();
    }
    let prefix = system.join("\n\n");
    let mut merged = false;
    let mut out: Vec<ChatMessage> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            if !merged && m.role == Role::User {
                merged = true;
                ChatMessage::user(format!("{prefix}\n\n{}", m.content))
            } else {
                m.clone()
            }
        })
        .collect();
    if !merged {
        out.insert(0, ChatMessage::user(prefix));
    }
    out
}

// ---------------------------------------------------------------------------
// Backend trait
// ---------------------------------------------------------------------------

/// Anything that turns a [`GenerationRequest`] into text.
pub trait CompletionBackend: Send + Sync {
    /// Generate one completion.
    fn complete(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<String, TransportError>> + Send;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}

/// A production backend, one variant per wire protocol.
#[derive(Debug, Clone)]
pub enum LlmBackend {
    /// Chat-completions API with bearer authentication.
    ChatCompletion(HttpBackend),
    /// Messages API with a top-level system field.
    Messages(HttpBackend),
    /// Self-hosted chat-completions endpoint without authentication.
    LocalModel(HttpBackend),
}

impl CompletionBackend for LlmBackend {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        match self {
            Self::ChatCompletion(http) => http.chat_completion(request, true).await,
            Self::Messages(http) => http.messages(request).await,
            Self::LocalModel(http) => http.chat_completion(request, false).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::ChatCompletion(_) => "chat-completion",
            Self::Messages(_) => "messages",
            Self::LocalModel(_) => "local-model",
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP plumbing
// ---------------------------------------------------------------------------

/// Connection details shared by all protocol variants.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    merge_system_prompt: bool,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("merge_system_prompt", &self.merge_system_prompt)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    fn new(config: &LlmBackendConfig, api_url: &str) -> Result<Self, RunnerError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RunnerError::LlmBackend(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            merge_system_prompt: config.merge_system_prompt,
        })
    }

    /// Base URL requests are sent to.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn chat_completion(
        &self,
        request: &GenerationRequest,
        bearer: bool,
    ) -> Result<String, TransportError> {
        let url = format!("{}/chat/completions", self.api_url);
        let messages = if self.merge_system_prompt {
            merge_system_into_user(&request.messages)
        } else {
            request.messages.clone()
        };

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if let Some(seed) = request.seed
            && let Some(object) = body.as_object_mut()
        {
            object.insert("seed".to_owned(), serde_json::Value::from(seed));
        }

        let mut builder = self.client.post(&url).json(&body);
        if bearer {
            builder = builder.bearer_auth(&self.api_key);
        }
        let json = send(builder).await?;
        extract_chat_content(&json)
    }

    async fn messages(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        let url = format!("{}/messages", self.api_url);
        let turns: Vec<&ChatMessage> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system_text(),
            "messages": turns,
        });

        let builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body);
        let json = send(builder).await?;
        extract_messages_content(&json)
    }
}

/// Send a request and classify the outcome.
async fn send(builder: reqwest::RequestBuilder) -> Result<serde_json::Value, TransportError> {
    let response = builder
        .send()
        .await
        .map_err(|e| TransportError::Hard(format!("request failed: {e}")))?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(TransportError::RateLimited { retry_after });
    }
    if !status.is_success() {
        let error_body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read error body".to_owned());
        return Err(TransportError::Hard(format!("backend returned {status}: {error_body}")));
    }

    response
        .json()
        .await
        .map_err(|e| TransportError::Hard(format!("response body is not JSON: {e}")))
}

/// Pull `choices[0].message.content` out of a chat-completions response.
fn extract_chat_content(json: &serde_json::Value) -> Result<String, TransportError> {
    json.pointer("/choices/0/message/content")
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            TransportError::Hard("response missing choices[0].message.content".to_owned())
        })
}

/// Pull `content[0].text` out of a messages response.
fn extract_messages_content(json: &serde_json::Value) -> Result<String, TransportError> {
    json.pointer("/content/0/text")
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| TransportError::Hard("response missing content[0].text".to_owned()))
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Create a backend for one base URL.
///
/// # Errors
///
/// Returns [`RunnerError::Config`] if the protocol needs an API key and none
/// is configured, or [`RunnerError::LlmBackend`] if the HTTP client cannot
/// be built.
pub fn create_backend(config: &LlmBackendConfig, api_url: &str) -> Result<LlmBackend, RunnerError> {
    if config.requires_api_key() && config.api_key.is_empty() {
        return Err(RunnerError::Config(format!(
            "backend {:?} needs an API key in ${}",
            config.backend, config.api_key_env
        )));
    }
    let http = HttpBackend::new(config, api_url)?;
    Ok(match config.backend {
        BackendType::ChatCompletion => LlmBackend::ChatCompletion(http),
        BackendType::Messages => LlmBackend::Messages(http),
        BackendType::LocalModel => LlmBackend::LocalModel(http),
    })
}

/// Create one backend per configured endpoint.
///
/// # Errors
///
/// See [`create_backend`].
pub fn create_backends(config: &LlmBackendConfig) -> Result<Vec<LlmBackend>, RunnerError> {
    config
        .endpoints()
        .iter()
        .map(|url| create_backend(config, url))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            messages: vec![ChatMessage::system("You are Ada."), ChatMessage::user("Rate it.")],
            max_tokens: 150,
            temperature: 0.7,
            seed: Some(1),
        }
    }

    #[test]
    fn extract_chat_content_valid() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": "{\"attitude_dist\": [0.1, 0.2, 0.3, 0.4]}"}}]
        });
        assert!(extract_chat_content(&json).unwrap().contains("attitude_dist"));
    }

    #[test]
    fn extract_chat_content_missing_choices() {
        let json = serde_json::json!({"error": "overloaded"});
        assert!(matches!(extract_chat_content(&json), Err(TransportError::Hard(_))));
    }

    #[test]
    fn extract_messages_content_valid_and_missing() {
        let json = serde_json::json!({"content": [{"type": "text", "text": "*Got my shot."}]});
        assert_eq!(extract_messages_content(&json).unwrap(), "*Got my shot.");
        let empty = serde_json::json!({"content": []});
        assert!(extract_messages_content(&empty).is_err());
    }

    #[test]
    fn merge_moves_system_into_first_user_turn() {
        let merged = merge_system_into_user(&request().messages);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].role, Role::User);
        assert_eq!(merged[0].content, "You are Ada.\n\nRate it.");

        let only_system = merge_system_into_user(&[ChatMessage::system("persona")]);
        assert_eq!(only_system, vec![ChatMessage::user("persona")]);
    }

    #[test]
    fn request_accessors() {
        let req = request();
        assert_eq!(req.system_text(), "You are Ada.");
        assert_eq!(req.user_text(), "Rate it.");
        assert_eq!(req.with_seed(Some(9)).seed, Some(9));
    }

    #[test]
    fn create_backend_dispatches_and_checks_key() {
        let mut config = LlmBackendConfig::default();
        assert!(matches!(
            create_backend(&config, "http://x/v1"),
            Err(RunnerError::Config(_))
        ));

        config.api_key = "test".to_owned();
        assert_eq!(create_backend(&config, "http://x/v1").unwrap().name(), "chat-completion");

        config.backend = BackendType::Messages;
        assert_eq!(create_backend(&config, "http://x/v1").unwrap().name(), "messages");

        config.backend = BackendType::LocalModel;
        config.api_key.clear();
        config.targets = vec!["http://a/v1/".to_owned(), "http://b/v1".to_owned()];
        let backends = create_backends(&config).unwrap();
        assert_eq!(backends.len(), 2);
        match &backends[0] {
            LlmBackend::LocalModel(http) => assert_eq!(http.api_url(), "http://a/v1"),
            other => panic!("unexpected backend {}", other.name()),
        }
    }
}
