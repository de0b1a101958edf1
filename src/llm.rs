use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::types::{Role, Turn};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash-latest";
pub const PREMIUM_MODEL: &str = "gemini-1.5-pro-latest";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Role vocabulary on the backend side of the seam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Model,
}

impl From<Role> for ChatRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Model,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role.into(),
            text: turn.text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendRequest {
    pub model: String,
    pub system_instruction: Option<String>,
    pub contents: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("backend returned an empty response")]
    EmptyResponse,
}

#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate_content(&self, request: BackendRequest) -> Result<String, BackendError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

fn to_wire(request: &BackendRequest) -> GenerateContentRequest {
    GenerateContentRequest {
        system_instruction: request.system_instruction.as_ref().map(|text| Content {
            role: None,
            parts: vec![Part { text: text.clone() }],
        }),
        contents: request
            .contents
            .iter()
            .map(|m| Content {
                // contents only accept user/model; a stray system message rides as user text.
                role: Some(match m.role {
                    ChatRole::Model => "model",
                    ChatRole::User | ChatRole::System => "user",
                }),
                parts: vec![Part {
                    text: m.text.clone(),
                }],
            })
            .collect(),
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate_content(&self, request: BackendRequest) -> Result<String, BackendError> {
        let body = to_wire(&request);

        let response = self
            .http
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.timeout)
                } else {
                    BackendError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http { status, body });
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))?;

        let text: String = parsed
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        Ok(text)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    type Responder = Box<dyn Fn(&BackendRequest) -> Result<String, BackendError> + Send + Sync>;

    /// Backend double that answers through a closure and keeps every request.
    pub struct FnBackend {
        respond: Responder,
        delay: Option<Duration>,
        pub requests: parking_lot::Mutex<Vec<BackendRequest>>,
    }

    impl FnBackend {
        pub fn new(
            respond: impl Fn(&BackendRequest) -> Result<String, BackendError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                respond: Box::new(respond),
                delay: None,
                requests: parking_lot::Mutex::new(Vec::new()),
            }
        }

        /// Replies "echo: <last user text>".
        pub fn echo() -> Self {
            Self::new(|req| {
                let last = req.contents.last().map(|m| m.text.clone()).unwrap_or_default();
                Ok(format!("echo: {}", last))
            })
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn requests(&self) -> Vec<BackendRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl GenerativeBackend for FnBackend {
        async fn generate_content(&self, request: BackendRequest) -> Result<String, BackendError> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            let out = (self.respond)(&request);
            self.requests.lock().push(request);
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> BackendRequest {
        BackendRequest {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: Some("persona".into()),
            contents: vec![
                ChatMessage::user("hi"),
                ChatMessage::from(&Turn::assistant("hello")),
                ChatMessage::user("how are you"),
            ],
        }
    }

    #[test]
    fn wire_request_separates_system_instruction() {
        let v = serde_json::to_value(to_wire(&request())).unwrap();
        assert_eq!(v["systemInstruction"]["parts"][0]["text"], "persona");
        assert!(v["systemInstruction"].get("role").is_none());
        assert_eq!(v["contents"][0]["role"], "user");
        assert_eq!(v["contents"][1]["role"], "model");
        assert_eq!(v["contents"][2]["parts"][0]["text"], "how are you");
    }

    #[test]
    fn wire_request_omits_missing_system_instruction() {
        let mut req = request();
        req.system_instruction = None;
        let v = serde_json::to_value(to_wire(&req)).unwrap();
        assert!(v.get("systemInstruction").is_none());
    }

    #[tokio::test]
    async fn gemini_client_returns_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/v1beta/models/{}:generateContent", DEFAULT_MODEL)))
            .and(header("x-goog-api-key", "k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "わろた"}, {"text": "ｗ"}]}}]
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new("k".into(), Some(server.uri()), DEFAULT_TIMEOUT).unwrap();
        let text = client.generate_content(request()).await.unwrap();
        assert_eq!(text, "わろたｗ");
    }

    #[tokio::test]
    async fn gemini_client_maps_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota"))
            .mount(&server)
            .await;

        let client = GeminiClient::new("k".into(), Some(server.uri()), DEFAULT_TIMEOUT).unwrap();
        let err = client.generate_content(request()).await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Http {
                status: 429,
                body: "quota".into()
            }
        );
    }

    #[tokio::test]
    async fn gemini_client_rejects_empty_candidates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"candidates": []})),
            )
            .mount(&server)
            .await;

        let client = GeminiClient::new("k".into(), Some(server.uri()), DEFAULT_TIMEOUT).unwrap();
        let err = client.generate_content(request()).await.unwrap_err();
        assert_eq!(err, BackendError::EmptyResponse);
    }
}
