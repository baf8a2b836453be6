use crate::error::WaitError;
use crate::rate_limit::strategies::TokenBucket;
use crate::rate_limit::RateLimiter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Maps quota token names to their limiters.
///
/// Tokens without an explicit limiter share the global limiter. The pool is
/// assembled by [`ComplexityServerBuilder`](crate::ComplexityServerBuilder) and
/// is read-only once the server is built.
#[derive(Debug, Clone)]
pub struct QuotaPool {
    limiters: HashMap<String, Arc<dyn RateLimiter>>,
    global: Arc<dyn RateLimiter>,
}

impl Default for QuotaPool {
    fn default() -> Self {
        Self::new(Arc::new(TokenBucket::unlimited()))
    }
}

impl QuotaPool {
    /// Create a pool whose unknown tokens fall back to `global`.
    pub fn new(global: Arc<dyn RateLimiter>) -> Self {
        Self { limiters: HashMap::new(), global }
    }

    /// Bind `token` to `limiter`, replacing any previous binding.
    pub fn insert(&mut self, token: impl Into<String>, limiter: Arc<dyn RateLimiter>) {
        self.limiters.insert(token.into(), limiter);
    }

    /// Replace the fallback limiter.
    pub fn set_global(&mut self, limiter: Arc<dyn RateLimiter>) {
        self.global = limiter;
    }

    /// Limiter for `token`: its own if configured, otherwise the global one.
    pub fn resolve(&self, token: &str) -> &Arc<dyn RateLimiter> {
        self.limiters.get(token).unwrap_or(&self.global)
    }

    /// The fallback limiter.
    pub fn global(&self) -> &Arc<dyn RateLimiter> {
        &self.global
    }

    /// Whether `token` has a dedicated limiter.
    pub fn is_configured(&self, token: &str) -> bool {
        self.limiters.contains_key(token)
    }

    /// Wait for `weight` units of `token`, giving up at `deadline`.
    pub async fn acquire(
        &self,
        token: &str,
        weight: u64,
        deadline: Instant,
    ) -> Result<(), WaitError> {
        self.resolve(token).acquire(weight, deadline).await
    }
}
