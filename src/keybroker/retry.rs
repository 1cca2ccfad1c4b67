//! Timeout and bounded retry around a key broker client

use super::KeyBrokerClient;
use crate::config::schema::BrokerConfig;
use crate::crypto::DecryptionKey;
use crate::error::{LoaderError, LoaderResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// How long to wait for the broker and how often to try again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry, doubled after each
    pub backoff: Duration,
}

impl From<&BrokerConfig> for RetryPolicy {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            backoff: config.backoff(),
        }
    }
}

/// Retries transient broker failures with exponential backoff.
///
/// Only `KeyBrokerUnavailable` (network errors, timeouts, 5xx) is retried;
/// rejections and unknown keys are returned immediately.
pub struct RetryingBroker {
    inner: Box<dyn KeyBrokerClient>,
    policy: RetryPolicy,
}

impl RetryingBroker {
    pub fn new(inner: Box<dyn KeyBrokerClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl KeyBrokerClient for RetryingBroker {
    async fn get_key(&self, endpoint: &Url, key_id: &str) -> LoaderResult<DecryptionKey> {
        let mut delay = self.policy.backoff;
        let mut attempt = 0;

        loop {
            let result =
                match tokio::time::timeout(self.policy.timeout, self.inner.get_key(endpoint, key_id))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(LoaderError::KeyBrokerUnavailable {
                        endpoint: endpoint.to_string(),
                        reason: format!("no response within {:?}", self.policy.timeout),
                    }),
                };

            match result {
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    attempt += 1;
                    warn!(
                        "Key request failed ({}), retry {}/{} in {:?}",
                        e, attempt, self.policy.max_retries, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                other => return other,
            }
        }
    }

    fn broker_name(&self) -> &'static str {
        self.inner.broker_name()
    }
}
