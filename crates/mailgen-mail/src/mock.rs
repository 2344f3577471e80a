use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use mailgen_core::delivery::{DeliveryReceipt, Mailer, OutboundEmail};
use mailgen_core::errors::GatewayError;

/// In-memory mailer for tests. Records every accepted message and fails
/// sends to addresses registered with [`MockMailer::fail_for`].
#[derive(Default)]
pub struct MockMailer {
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    delivered: Mutex<Vec<OutboundEmail>>,
    attempts: Mutex<Vec<String>>,
}

impl MockMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send to `recipient` fails with a provider server error.
    pub fn fail_for(self, recipient: &str) -> Self {
        self.failing.lock().insert(recipient.to_string());
        self
    }

    /// Sends to `recipient` settle only after `delay`.
    pub fn delay_for(self, recipient: &str, delay: Duration) -> Self {
        self.delays.lock().insert(recipient.to_string(), delay);
        self
    }

    /// Messages the provider accepted, in completion order.
    pub fn delivered(&self) -> Vec<OutboundEmail> {
        self.delivered.lock().clone()
    }

    /// Every recipient a send was attempted for, in call order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Mailer for MockMailer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send_one(&self, email: &OutboundEmail) -> Result<DeliveryReceipt, GatewayError> {
        self.attempts.lock().push(email.to.clone());

        let delay = self.delays.lock().get(&email.to).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().contains(&email.to) {
            return Err(GatewayError::ServerError {
                status: 500,
                body: format!("mock failure for {}", email.to),
            });
        }

        let mut delivered = self.delivered.lock();
        delivered.push(email.clone());
        Ok(DeliveryReceipt {
            message_id: Some(format!("mock-{}", delivered.len())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(to: &str) -> OutboundEmail {
        OutboundEmail {
            from: "noreply@localhost.com".into(),
            to: to.into(),
            subject: "s".into(),
            html: "h".into(),
        }
    }

    #[tokio::test]
    async fn records_deliveries_and_failures() {
        let mailer = MockMailer::new().fail_for("b@example.com");

        assert!(mailer.send_one(&email("a@example.com")).await.is_ok());
        assert!(mailer.send_one(&email("b@example.com")).await.is_err());

        assert_eq!(mailer.attempts(), vec!["a@example.com", "b@example.com"]);
        let delivered: Vec<_> = mailer.delivered().into_iter().map(|e| e.to).collect();
        assert_eq!(delivered, vec!["a@example.com"]);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_recipient_waits() {
        let mailer = MockMailer::new().delay_for("slow@example.com", Duration::from_secs(3));
        let started = tokio::time::Instant::now();
        let receipt = mailer.send_one(&email("slow@example.com")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(receipt.message_id.as_deref(), Some("mock-1"));
    }
}
