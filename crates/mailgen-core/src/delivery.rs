use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;

/// One provider call: a single recipient, pre-rendered HTML.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

/// Provider acknowledgement for an accepted message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Provider-assigned message id, when the provider returns one.
    pub message_id: Option<String>,
}

/// Async email dispatch. Invoked once per recipient.
#[async_trait]
pub trait Mailer: Send + Sync {
    fn name(&self) -> &str;

    async fn send_one(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, GatewayError>;
}
