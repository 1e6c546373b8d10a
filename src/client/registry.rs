//! Endpoint registry for the endpoints methods refer to.
//!
//! Epistemic foundation:
//! - K_i: All endpoints are OpenAI-compatible
//! - B_i: Endpoints are reachable (verified via health checks)
//! - I^R: User configures which endpoints to use

use crate::client::{HealthCheckResult, HealthStatus, LLMClient};
use crate::models::{Config, ConfigError, expand_headers};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Clients for every endpoint referenced by a `chat` method.
///
/// Endpoints nobody references are not built, so an unused endpoint with a
/// missing API key does not block a run.
pub struct EndpointRegistry {
    endpoints: BTreeMap<String, Arc<LLMClient>>,
}

impl EndpointRegistry {
    /// Build registry from configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EndpointNotFound` for a reference to an
    /// unconfigured endpoint, `ConfigError::MissingApiKey` if an API key env
    /// var is unset, and `ConfigError::Invalid` if client creation fails.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut endpoints = BTreeMap::new();

        for name in config.referenced_endpoints() {
            let endpoint_config = config
                .endpoints
                .get(&name)
                .ok_or_else(|| ConfigError::EndpointNotFound(name.clone()))?;
            let api_key = config.resolve_endpoint_api_key(&name)?;
            let headers = expand_headers(&endpoint_config.headers);

            let client = LLMClient::new(
                name.clone(),
                api_key,
                endpoint_config.base_url.clone(),
                headers,
                endpoint_config.timeout_secs,
                endpoint_config.max_retries,
            )
            .map_err(|e| ConfigError::Invalid(format!("Failed to create '{name}' client: {e}")))?;

            endpoints.insert(name, Arc::new(client));
        }

        Ok(Self { endpoints })
    }

    /// Get client by endpoint name.
    pub fn get(&self, name: &str) -> Option<&Arc<LLMClient>> {
        self.endpoints.get(name)
    }

    pub fn endpoint_names(&self) -> Vec<&str> {
        self.endpoints.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Run health checks on all endpoints, logging each result.
    pub async fn health_check_all(&self) -> Vec<HealthCheckResult> {
        let mut results = Vec::with_capacity(self.endpoints.len());

        for (name, client) in &self.endpoints {
            let result = client.health_check().await;
            let error = result.error.as_deref().unwrap_or("unknown");
            match result.status {
                HealthStatus::Healthy => {
                    info!(endpoint = %name, latency_ms = ?result.latency_ms, "Endpoint healthy")
                }
                HealthStatus::Unhealthy => warn!(endpoint = %name, error, "Endpoint unhealthy"),
                HealthStatus::Unreachable => warn!(endpoint = %name, error, "Endpoint unreachable"),
            }
            results.push(result);
        }

        results
    }

    /// Token usage summed over all endpoints as (input, output).
    pub fn total_tokens(&self) -> (u64, u64) {
        self.endpoints
            .values()
            .map(|c| c.total_tokens())
            .fold((0, 0), |(i, o), (ci, co)| (i + ci, o + co))
    }
}
