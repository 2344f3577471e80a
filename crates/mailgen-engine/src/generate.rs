use std::sync::Arc;
use std::time::{Duration, Instant};

use mailgen_core::completion::{CompletionProvider, CompletionRequest};
use mailgen_core::errors::GatewayError;
use mailgen_core::ids::{DraftId, UserId};
use mailgen_store::{Database, DraftRepo, NewDraft};
use mailgen_telemetry::MetricsRecorder;
use tracing::{info, instrument, warn};

use crate::error::EngineError;

pub const DEFAULT_MODEL: &str = "llama3-8b-8192";

const SUBJECT_SYSTEM_PROMPT: &str = "You are a professional email writer. Generate only a concise, \
professional email subject line based on the user's prompt. Return only the subject line text, \
no quotes, no formatting, no additional text.";

const BODY_SYSTEM_PROMPT: &str = "You are a professional email writer. Generate a well-structured, \
professional email body based on the user's prompt. Write only the email content, no subject line, \
no JSON formatting. Use proper paragraph breaks and professional tone. Include appropriate \
greetings and closing.";

#[derive(Clone, Debug)]
pub struct GenerationConfig {
    pub model: String,
    pub subject_temperature: f32,
    pub subject_max_tokens: u32,
    pub body_temperature: f32,
    pub body_max_tokens: u32,
    /// Upper bound on each completion call.
    pub timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            subject_temperature: 0.5,
            subject_max_tokens: 100,
            body_temperature: 0.7,
            body_max_tokens: 1000,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedEmail {
    pub subject: String,
    pub content: String,
}

#[derive(Clone, Debug)]
pub struct GeneratedDraft {
    pub id: DraftId,
    pub subject: String,
    pub content: String,
    pub recipients: Vec<String>,
}

/// Runs the subject and body completions for a prompt and persists the
/// result as a draft once both are usable.
pub struct GenerationOrchestrator {
    provider: Option<Arc<dyn CompletionProvider>>,
    drafts: DraftRepo,
    config: GenerationConfig,
    metrics: Arc<MetricsRecorder>,
}

impl GenerationOrchestrator {
    pub fn new(
        provider: Option<Arc<dyn CompletionProvider>>,
        db: Database,
        config: GenerationConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            provider,
            drafts: DraftRepo::new(db),
            config,
            metrics,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    /// Both completions are issued together and both must settle before the
    /// outcome is decided.
    pub async fn generate(&self, prompt: &str) -> Result<GeneratedEmail, EngineError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| GatewayError::NotConfigured("AI service".into()))?;

        let subject_req = CompletionRequest {
            system_prompt: SUBJECT_SYSTEM_PROMPT.to_string(),
            user_prompt: format!("Generate a subject line for: {prompt}"),
            model: self.config.model.clone(),
            temperature: self.config.subject_temperature,
            max_tokens: self.config.subject_max_tokens,
        };
        let body_req = CompletionRequest {
            system_prompt: BODY_SYSTEM_PROMPT.to_string(),
            user_prompt: format!("Generate email content for: {prompt}"),
            model: self.config.model.clone(),
            temperature: self.config.body_temperature,
            max_tokens: self.config.body_max_tokens,
        };

        let (subject, body) = tokio::join!(
            self.complete_bounded(provider.as_ref(), &subject_req),
            self.complete_bounded(provider.as_ref(), &body_req),
        );

        let subject = subject?.trim().to_string();
        let content = body?.trim().to_string();

        if subject.is_empty() {
            return Err(EngineError::GenerationFailed("empty subject completion".into()));
        }
        if content.is_empty() {
            return Err(EngineError::GenerationFailed("empty body completion".into()));
        }
        Ok(GeneratedEmail { subject, content })
    }

    async fn complete_bounded(
        &self,
        provider: &dyn CompletionProvider,
        request: &CompletionRequest,
    ) -> Result<String, GatewayError> {
        match tokio::time::timeout(self.config.timeout, provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.config.timeout)),
        }
    }

    /// Generate, then persist a `draft`-status record owned by `owner`.
    #[instrument(skip(self, prompt, recipients), fields(user_id = %owner, recipients = recipients.len()))]
    pub async fn generate_draft(
        &self,
        owner: &UserId,
        prompt: &str,
        recipients: Vec<String>,
    ) -> Result<GeneratedDraft, EngineError> {
        let started = Instant::now();
        let result = self.generate(prompt).await;
        self.metrics.histogram_observe(
            "generation.duration_ms",
            &[],
            started.elapsed().as_secs_f64() * 1000.0,
        );

        let email = match result {
            Ok(email) => email,
            Err(e) => {
                let outcome = match &e {
                    EngineError::GenerationFailed(_) => "empty",
                    _ => "upstream_error",
                };
                warn!(error = %e, "email generation failed");
                self.metrics
                    .counter_inc("generation.requests", &[("outcome", outcome)], 1);
                return Err(e);
            }
        };

        let draft = self.drafts.create(NewDraft {
            user_id: owner,
            prompt,
            subject: &email.subject,
            content: &email.content,
            recipients: &recipients,
        })?;

        self.metrics
            .counter_inc("generation.requests", &[("outcome", "success")], 1);
        info!(draft_id = %draft.id, "draft generated");

        Ok(GeneratedDraft {
            id: draft.id,
            subject: draft.subject,
            content: draft.content,
            recipients,
        })
    }
}
