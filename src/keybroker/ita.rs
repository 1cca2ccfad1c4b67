//! Intel Trust Authority key broker client
//!
//! Key transfer is a single attested request:
//! `POST {endpoint}/kbs/v1/keys/{key_id}/transfer` carrying a TDX attestation
//! token. The broker answers with the key wrapped for this environment, which
//! the `Attester` then unwraps.

use super::attester::{Attester, WrappedKey};
use super::KeyBrokerClient;
use crate::crypto::DecryptionKey;
use crate::error::{LoaderError, LoaderResult};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const ATTESTATION_TYPE: &str = "TDX";

#[derive(Serialize)]
struct TransferRequest<'a> {
    attestation_token: &'a str,
}

/// Client for the ITA key broker service
pub struct ItaKeyBrokerClient {
    agent: ureq::Agent,
    attester: Arc<dyn Attester>,
}

impl ItaKeyBrokerClient {
    /// `timeout` bounds a single HTTP exchange
    pub fn new(attester: Arc<dyn Attester>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent, attester }
    }

    /// `{endpoint}/kbs/v1/keys/{key_id}/transfer`, keeping any base path
    pub fn transfer_url(endpoint: &Url, key_id: &str) -> LoaderResult<Url> {
        let mut url = endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| LoaderError::KeyBrokerRejected {
                endpoint: endpoint.to_string(),
                key_id: key_id.to_string(),
                reason: "endpoint cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .extend(["kbs", "v1", "keys", key_id, "transfer"]);
        Ok(url)
    }

    /// Blocking POST of the transfer request, returning the response body
    fn post_transfer(agent: &ureq::Agent, url: &Url, body: &str) -> Result<String, ureq::Error> {
        let mut response = agent
            .post(url.as_str())
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("Attestation-Type", ATTESTATION_TYPE)
            .send(body)?;
        response.body_mut().read_to_string()
    }
}

/// Map a non-success HTTP status onto the broker error family
pub fn status_error(endpoint: &Url, key_id: &str, status: u16) -> LoaderError {
    match status {
        404 => LoaderError::KeyNotFound {
            endpoint: endpoint.to_string(),
            key_id: key_id.to_string(),
        },
        401 | 403 => LoaderError::KeyBrokerRejected {
            endpoint: endpoint.to_string(),
            key_id: key_id.to_string(),
            reason: format!("attestation refused (HTTP {})", status),
        },
        400..=499 => LoaderError::KeyBrokerRejected {
            endpoint: endpoint.to_string(),
            key_id: key_id.to_string(),
            reason: format!("HTTP {}", status),
        },
        _ => LoaderError::KeyBrokerUnavailable {
            endpoint: endpoint.to_string(),
            reason: format!("HTTP {}", status),
        },
    }
}

fn transport_error(endpoint: &Url, key_id: &str, err: ureq::Error) -> LoaderError {
    match err {
        ureq::Error::StatusCode(status) => status_error(endpoint, key_id, status),
        other => LoaderError::KeyBrokerUnavailable {
            endpoint: endpoint.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl KeyBrokerClient for ItaKeyBrokerClient {
    async fn get_key(&self, endpoint: &Url, key_id: &str) -> LoaderResult<DecryptionKey> {
        let url = Self::transfer_url(endpoint, key_id)?;
        let token = self.attester.attestation_token(key_id).await?;
        let body = serde_json::to_string(&TransferRequest {
            attestation_token: &token,
        })?;

        debug!("Requesting key transfer from {}", url);
        let agent = self.agent.clone();
        let request_url = url.clone();
        let response =
            tokio::task::spawn_blocking(move || Self::post_transfer(&agent, &request_url, &body))
                .await
                .map_err(|e| LoaderError::Internal(format!("key transfer task failed: {}", e)))?
                .map_err(|e| transport_error(endpoint, key_id, e))?;

        let wrapped: WrappedKey =
            serde_json::from_str(&response).map_err(|e| LoaderError::KeyBrokerRejected {
                endpoint: endpoint.to_string(),
                key_id: key_id.to_string(),
                reason: format!("unexpected response: {}", e),
            })?;

        let key = self.attester.unwrap_key(&wrapped).await?;
        if key.is_empty() {
            return Err(LoaderError::Attestation(
                "unwrapped key is empty".to_string(),
            ));
        }

        info!("Key {} released by {}", key_id, endpoint);
        Ok(key)
    }

    fn broker_name(&self) -> &'static str {
        "Intel Trust Authority KBS"
    }
}
