//! Key broker clients
//!
//! A key broker releases the symmetric key for an encrypted snapshot once the
//! requesting environment has proven itself. Each broker kind named in a
//! manifest maps to a constructor in a `BrokerRegistry`; kinds without one
//! are refused before any network activity.

mod attester;
pub mod ita;
mod retry;

pub use attester::{Attester, CommandAttester, WrappedKey};
pub use ita::ItaKeyBrokerClient;
pub use retry::{RetryPolicy, RetryingBroker};

use crate::config::schema::BrokerConfig;
use crate::crypto::DecryptionKey;
use crate::error::{LoaderError, LoaderResult};
use crate::manifest::BrokerKind;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// Releases decryption keys from a remote broker
#[async_trait]
pub trait KeyBrokerClient: Send + Sync {
    /// Perform the broker handshake and return the released key
    async fn get_key(&self, endpoint: &Url, key_id: &str) -> LoaderResult<DecryptionKey>;

    /// Human-readable broker name for logs
    fn broker_name(&self) -> &'static str;
}

/// Builds a client for one broker kind
pub type BrokerFactory = Box<dyn Fn() -> LoaderResult<Box<dyn KeyBrokerClient>> + Send + Sync>;

/// Maps manifest `broker_kind` literals to client constructors
#[derive(Default)]
pub struct BrokerRegistry {
    factories: BTreeMap<String, BrokerFactory>,
}

impl BrokerRegistry {
    /// An empty registry that refuses every kind
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in brokers, each wrapped in the retry policy
    pub fn with_defaults(config: &BrokerConfig) -> Self {
        let mut registry = Self::new();
        let config = config.clone();

        registry.register(BrokerKind::ITA_KBS, move || {
            let helper = config.attestation_helper.clone().ok_or_else(|| {
                LoaderError::Attestation("no attestation helper configured".to_string())
            })?;
            let attester: Arc<dyn Attester> = Arc::new(CommandAttester::new(helper));
            let client = ItaKeyBrokerClient::new(attester, config.timeout());
            Ok(Box::new(RetryingBroker::new(
                Box::new(client),
                RetryPolicy::from(&config),
            )) as Box<dyn KeyBrokerClient>)
        });

        registry
    }

    /// Register (or replace) the constructor for `kind`
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn() -> LoaderResult<Box<dyn KeyBrokerClient>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    /// Construct the client for `kind`, failing closed on unknown kinds
    pub fn resolve(&self, kind: &BrokerKind) -> LoaderResult<Box<dyn KeyBrokerClient>> {
        let factory = self
            .factories
            .get(kind.as_str())
            .ok_or_else(|| LoaderError::UnsupportedBroker(kind.to_string()))?;
        factory()
    }

    pub fn supports(&self, kind: &BrokerKind) -> bool {
        self.factories.contains_key(kind.as_str())
    }

    /// Registered kinds in sorted order
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}
