//! Call-level exponential backoff for rate-limited requests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use super::{GenerationError, GenerationRequest, TextGenerator};

/// Wraps a generator and retries [`GenerationError::RateLimited`] with
/// delays of `base`, `2 * base`, `4 * base`, ... plus up to 10% jitter.
/// A larger `retry_after` from the service wins. Other errors are returned
/// immediately.
pub struct RetryingGenerator {
    inner: Arc<dyn TextGenerator>,
    max_retries: u32,
    base: Duration,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, max_retries: u32, base: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base,
        }
    }

    /// Backoff before retry number `attempt` (0-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[async_trait]
impl TextGenerator for RetryingGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let mut attempt = 0;
        loop {
            match self.inner.generate(request).await {
                Err(GenerationError::RateLimited { retry_after }) if attempt < self.max_retries => {
                    let backoff = self.backoff(attempt);
                    let jitter_ms = (backoff.as_millis() / 10) as u64;
                    let jitter = Duration::from_millis(rand::rng().random_range(0..=jitter_ms));
                    let delay = retry_after.map_or(backoff, |r| r.max(backoff)) + jitter;
                    warn!(
                        model = %request.model,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
