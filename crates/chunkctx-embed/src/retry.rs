//! Bounded retry with exponential backoff around embedding providers.

use std::time::Duration;

use chunkctx_core::config::EmbeddingSettings;
use chunkctx_core::error::{Error, Result};
use chunkctx_core::traits::Embedder;
use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first call.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&EmbeddingSettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            multiplier: 2.0,
        }
    }

    /// A policy that never sleeps; useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay: Duration::ZERO, max_delay: Duration::ZERO, multiplier: 2.0 }
    }

    /// Delay before retry number `retry` (1-based): base, base*m, base*m^2, ... capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only `Error::TransientProvider` is retried. Exhaustion is reported as
    /// `Error::ProviderFailed` carrying the last transient message.
    pub fn run<T>(&self, mut op: impl FnMut(u32) -> Result<T>) -> Result<T> {
        let mut last_message = String::new();
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let delay = self.delay_for(attempt - 1);
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(Error::TransientProvider(message)) => {
                    warn!(attempt, max_attempts = self.max_attempts, %message, "transient provider failure");
                    last_message = message;
                }
                Err(other) => return Err(other),
            }
        }
        Err(Error::ProviderFailed { attempts: self.max_attempts, message: last_message })
    }
}

/// Wraps an embedder so transient failures are retried under a `RetryPolicy`.
pub struct RetryingEmbedder<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E: Embedder> RetryingEmbedder<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self { Self { inner, policy } }

    pub fn inner(&self) -> &E { &self.inner }

    pub fn policy(&self) -> &RetryPolicy { &self.policy }
}

impl<E: Embedder> Embedder for RetryingEmbedder<E> {
    fn dim(&self) -> usize { self.inner.dim() }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let dim = self.inner.dim();
        self.policy.run(|_| {
            let vectors = self.inner.embed_batch(texts)?;
            if vectors.len() != texts.len() {
                return Err(Error::TransientProvider(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                )));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
                return Err(Error::DimensionMismatch { expected: dim, actual: bad.len(), chunk_id: None });
            }
            Ok(vectors)
        })
    }
}
