use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use mailgen_core::completion::{CompletionProvider, CompletionRequest};
use mailgen_core::errors::GatewayError;

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockCompletion {
    /// Return this completion text.
    Text(String),
    /// Fail the call.
    Error(GatewayError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockCompletion>),
}

impl MockCompletion {
    pub fn text(text: &str) -> Self {
        Self::Text(text.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockCompletion) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that hands out responses in call order.
///
/// Calls are numbered when `complete` is first polled, so two calls joined in
/// the same task receive responses in the order they were polled.
pub struct MockCompletionProvider {
    responses: Mutex<VecDeque<MockCompletion>>,
    requests: Mutex<Vec<CompletionRequest>>,
    call_count: AtomicUsize,
}

impl MockCompletionProvider {
    pub fn new(responses: Vec<MockCompletion>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Convenience: subject response then body response.
    pub fn subject_and_body(subject: &str, body: &str) -> Self {
        Self::new(vec![MockCompletion::text(subject), MockCompletion::text(body)])
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());

        let Some(mut response) = self.responses.lock().pop_front() else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockCompletionProvider: no response configured for call {idx}"
            )));
        };

        loop {
            match response {
                MockCompletion::Text(text) => return Ok(text),
                MockCompletion::Error(e) => return Err(e),
                MockCompletion::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user: &str) -> CompletionRequest {
        CompletionRequest {
            system_prompt: "sys".into(),
            user_prompt: user.into(),
            model: "mock-model".into(),
            temperature: 0.7,
            max_tokens: 10,
        }
    }

    #[tokio::test]
    async fn responses_in_order() {
        let mock = MockCompletionProvider::subject_and_body("Subject", "Body");
        assert_eq!(mock.complete(&request("a")).await.unwrap(), "Subject");
        assert_eq!(mock.complete(&request("b")).await.unwrap(), "Body");
        assert_eq!(mock.call_count(), 2);
        let seen: Vec<_> = mock.requests().into_iter().map(|r| r.user_prompt).collect();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn exhausted_is_error() {
        let mock = MockCompletionProvider::new(vec![]);
        let err = mock.complete(&request("a")).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_then_inner() {
        let mock = MockCompletionProvider::new(vec![MockCompletion::delayed(
            Duration::from_secs(5),
            MockCompletion::Error(GatewayError::ProviderOverloaded),
        )]);
        let started = tokio::time::Instant::now();
        let err = mock.complete(&request("a")).await.unwrap_err();
        assert!(matches!(err, GatewayError::ProviderOverloaded));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
