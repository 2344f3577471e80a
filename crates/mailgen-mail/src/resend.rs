use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use mailgen_core::delivery::{DeliveryReceipt, Mailer, OutboundEmail};
use mailgen_core::errors::GatewayError;
use mailgen_core::security::ApiKey;

pub const API_URL: &str = "https://api.resend.com/emails";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transactional mail through the Resend HTTP API, one message per call.
pub struct ResendMailer {
    client: Client,
    api_key: ApiKey,
    endpoint: String,
}

#[derive(Serialize)]
struct SendBody<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

#[derive(Deserialize)]
struct SendResponse {
    id: Option<String>,
}

impl ResendMailer {
    pub fn new(api_key: ApiKey) -> Result<Self, GatewayError> {
        Self::with_endpoint(api_key, API_URL)
    }

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
}

fn build_body(email: &OutboundEmail) -> SendBody<'_> {
    SendBody {
        from: &email.from,
        to: [email.to.as_str()],
        subject: &email.subject,
        html: &email.html,
    }
}

fn parse_receipt(raw: &str) -> DeliveryReceipt {
    let message_id = serde_json::from_str::<SendResponse>(raw)
        .ok()
        .and_then(|r| r.id);
    DeliveryReceipt { message_id }
}

#[async_trait]
impl Mailer for ResendMailer {
    fn name(&self) -> &str {
        "resend"
    }

    #[instrument(skip(self, email), fields(to = %email.to))]
    async fn send_one(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, GatewayError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose())
            .json(&build_body(email))
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        let status = resp.status();
        let hint = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(GatewayError::parse_retry_after);
        let raw = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GatewayError::from_status(status.as_u16(), raw, hint));
        }

        Ok(parse_receipt(&raw))
    }
}
