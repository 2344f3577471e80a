use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use mailgen_core::completion::{CompletionProvider, CompletionRequest};
use mailgen_core::errors::GatewayError;
use mailgen_core::security::ApiKey;

pub const API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama3-8b-8192";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Groq chat completions (OpenAI-compatible wire format, non-streaming).
pub struct GroqProvider {
    client: Client,
    api_key: ApiKey,
    endpoint: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: [ChatMessage<'a>; 2],
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl GroqProvider {
    pub fn new(api_key: ApiKey) -> Result<Self, GatewayError> {
        Self::with_endpoint(api_key, API_URL)
    }

    /// Point the provider at another OpenAI-compatible endpoint.
    pub fn with_endpoint(api_key: ApiKey, endpoint: impl Into<String>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn build_body(request: &CompletionRequest) -> ChatRequest<'_> {
    ChatRequest {
        messages: [
            ChatMessage {
                role: "system",
                content: &request.system_prompt,
            },
            ChatMessage {
                role: "user",
                content: &request.user_prompt,
            },
        ],
        model: &request.model,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    }
}

/// First choice's message content; absent content is an empty completion.
fn extract_completion(raw: &str) -> Result<String, GatewayError> {
    let parsed: ChatResponse = serde_json::from_str(raw)
        .map_err(|e| GatewayError::MalformedResponse(format!("completion body: {e}")))?;

    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .unwrap_or_default())
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(GatewayError::parse_retry_after)
}

#[async_trait]
impl CompletionProvider for GroqProvider {
    fn name(&self) -> &str {
        "groq"
    }

    #[instrument(skip(self, request), fields(model = %request.model, max_tokens = request.max_tokens))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .header("content-type", "application/json")
            .json(&build_body(request))
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let hint = retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status.as_u16(), body, hint));
        }

        let raw = resp
            .text()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;
        extract_completion(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest {
            system_prompt: "Return only the subject line.".into(),
            user_prompt: "Generate a subject line for: team offsite".into(),
            model: DEFAULT_MODEL.into(),
            temperature: 0.5,
            max_tokens: 100,
        }
    }

    #[test]
    fn body_has_system_then_user() {
        let req = request();
        let json = serde_json::to_value(build_body(&req)).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "Generate a subject line for: team offsite");
        assert_eq!(json["model"], "llama3-8b-8192");
        assert_eq!(json["max_tokens"], 100);
        assert!((json["temperature"].as_f64().unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn extracts_first_choice() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"  Offsite plan  "}},{"message":{"content":"second"}}]}"#;
        assert_eq!(extract_completion(raw).unwrap(), "  Offsite plan  ");
    }

    #[test]
    fn missing_content_is_empty() {
        assert_eq!(extract_completion(r#"{"choices":[]}"#).unwrap(), "");
        assert_eq!(extract_completion(r#"{"choices":[{"message":null}]}"#).unwrap(), "");
        assert_eq!(extract_completion(r#"{}"#).unwrap(), "");
    }

    #[test]
    fn non_json_is_malformed() {
        let err = extract_completion("<html>gateway</html>").unwrap_err();
        assert!(matches!(err, GatewayError::MalformedResponse(_)));
    }

    #[test]
    fn retry_after_header_parsed() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(7)));
        assert_eq!(retry_after(&reqwest::header::HeaderMap::new()), None);
    }

    #[test]
    fn provider_properties() {
        let provider = GroqProvider::new(ApiKey::new("gsk_test")).unwrap();
        assert_eq!(provider.name(), "groq");
        assert_eq!(provider.endpoint(), API_URL);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_network_error() {
        let provider =
            GroqProvider::with_endpoint(ApiKey::new("gsk_test"), "http://127.0.0.1:9/v1/chat").unwrap();
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NetworkError(_)), "got: {err:?}");
    }

    fn groq_at(server: &MockServer) -> GroqProvider {
        GroqProvider::with_endpoint(
            ApiKey::new("gsk_test"),
            format!("{}/openai/v1/chat/completions", server.uri()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn completion_sent_with_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/chat/completions"))
            .and(header("authorization", "Bearer gsk_test"))
            .and(body_partial_json(serde_json::json!({ "model": DEFAULT_MODEL, "max_tokens": 100 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{ "message": { "role": "assistant", "content": "Team offsite: save the date" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = groq_at(&server).complete(&request()).await.unwrap();
        assert_eq!(text, "Team offsite: save the date");
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_string("slow down"),
            )
            .mount(&server)
            .await;

        let err = groq_at(&server).complete(&request()).await.unwrap_err();
        assert!(
            matches!(err, GatewayError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(7)),
            "got: {err:?}"
        );
    }

    #[tokio::test]
    async fn rejected_key_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = groq_at(&server).complete(&request()).await.unwrap_err();
        assert!(matches!(err, GatewayError::AuthenticationFailed(ref body) if body == "invalid api key"));
        assert!(err.is_fatal());
    }

    #[cfg(feature = "integration")]
    #[tokio::test]
    async fn live_completion() {
        let key = ApiKey::from_env("GROQ_API_KEY").expect("GROQ_API_KEY must be set");
        let provider = GroqProvider::new(key).unwrap();
        let text = provider.complete(&request()).await.unwrap();
        assert!(!text.trim().is_empty());
    }
}
