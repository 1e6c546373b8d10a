//! Method registry: name → prediction method, built once at startup.
//!
//! Epistemic foundation:
//! - K_i: Every name resolves before the first dataset is touched
//! - K_i: Evaluation order is registration order
//! - I^R: Which methods run is configured by the user

use crate::client::EndpointRegistry;
use crate::methods::{ChatMethod, ConstantMethod, DEFAULT_PROMPT, PredictionMethod, PromptTemplate};
use crate::models::{Config, ConfigError, MethodKind, SENTENCE1, SENTENCE2};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::info;

/// Ordered registry of prediction methods.
#[derive(Default)]
pub struct MethodRegistry {
    methods: IndexMap<String, Arc<dyn PredictionMethod>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from configuration, resolving endpoints and prompt files.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let endpoints = EndpointRegistry::from_config(config)?;
        Self::from_config_with(config, &endpoints)
    }

    /// Like [`MethodRegistry::from_config`], with endpoints already built.
    pub fn from_config_with(
        config: &Config,
        endpoints: &EndpointRegistry,
    ) -> Result<Self, ConfigError> {
        let mut registry = Self::new();

        for spec in &config.methods {
            let method: Arc<dyn PredictionMethod> = match &spec.kind {
                MethodKind::Constant { value } => Arc::new(ConstantMethod::new(*value)),
                MethodKind::Chat(chat) => {
                    let client = endpoints
                        .get(&chat.endpoint)
                        .ok_or_else(|| ConfigError::EndpointNotFound(chat.endpoint.clone()))?;
                    let text = match &chat.prompt {
                        Some(path) => std::fs::read_to_string(path).map_err(|source| {
                            ConfigError::PromptRead {
                                path: path.clone(),
                                source,
                            }
                        })?,
                        None => DEFAULT_PROMPT.to_string(),
                    };
                    let template = PromptTemplate::new(text)?;
                    Arc::new(ChatMethod::new(Arc::clone(client), chat, template)?)
                }
            };
            registry.register_arc(&spec.name, method)?;
        }

        info!(methods = registry.len(), "Method registry built");
        Ok(registry)
    }

    /// Register a method under `name`.
    ///
    /// Names must be unique and must not shadow the sentence fields.
    pub fn register(
        &mut self,
        name: &str,
        method: impl PredictionMethod + 'static,
    ) -> Result<(), ConfigError> {
        self.register_arc(name, Arc::new(method))
    }

    pub fn register_arc(
        &mut self,
        name: &str,
        method: Arc<dyn PredictionMethod>,
    ) -> Result<(), ConfigError> {
        if name.is_empty() || name == SENTENCE1 || name == SENTENCE2 {
            return Err(ConfigError::Invalid(format!(
                "'{name}' cannot be used as a method name"
            )));
        }
        if self.methods.contains_key(name) {
            return Err(ConfigError::DuplicateMethod(name.to_string()));
        }
        self.methods.insert(name.to_string(), method);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn PredictionMethod>> {
        self.methods.get(name)
    }

    /// Methods in evaluation order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn PredictionMethod)> {
        self.methods
            .iter()
            .map(|(name, method)| (name.as_str(), method.as_ref()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
