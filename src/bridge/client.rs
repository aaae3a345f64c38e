//! LLM client abstraction: the outbound chat-completion contract, an
//! HTTP implementation, and a scriptable mock for tests.

use serde::{Deserialize, Serialize};

use super::BridgeError;

/// One outbound completion request: system + user message pair.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Blocking LLM client. The bridge drives it from a worker thread and
/// owns retry, backoff, and the request-level deadline.
pub trait LlmClient: Send + Sync {
    fn complete(&self, request: &ChatRequest) -> Result<String, BridgeError>;
}

/// HTTP client for an OpenAI-style chat-completions endpoint.
pub struct HttpLlmClient {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpLlmClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            timeout_secs,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Request body for POST /v1/chat/completions
#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl LlmClient for HttpLlmClient {
    fn complete(&self, request: &ChatRequest) -> Result<String, BridgeError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        // A per-attempt timeout is a transport failure (retryable); the
        // bridge's request-level deadline owns BridgeError::Timeout.
        let response = req.send().map_err(|e| {
            if e.is_timeout() {
                BridgeError::Transport(format!(
                    "attempt timed out after {}s",
                    self.timeout_secs
                ))
            } else {
                BridgeError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(BridgeError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BridgeError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .map_err(|e| BridgeError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| BridgeError::InvalidResponse("response carried no choices".into()))
    }
}

/// Mock LLM client for testing: scripted outcomes, then a default.
pub struct MockLlmClient {
    default_response: String,
    scripted: std::sync::Mutex<std::collections::VecDeque<Result<String, BridgeError>>>,
    calls: std::sync::atomic::AtomicU32,
}

impl MockLlmClient {
    pub fn new(response: &str) -> Self {
        Self {
            default_response: response.to_string(),
            scripted: std::sync::Mutex::new(std::collections::VecDeque::new()),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Queue an outcome ahead of the default response.
    pub fn script(self, outcome: Result<String, BridgeError>) -> Self {
        if let Ok(mut q) = self.scripted.lock() {
            q.push_back(outcome);
        }
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl LlmClient for MockLlmClient {
    fn complete(&self, _request: &ChatRequest) -> Result<String, BridgeError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Ok(mut q) = self.scripted.lock() {
            if let Some(outcome) = q.pop_front() {
                return outcome;
            }
        }
        Ok(self.default_response.clone())
    }
}
