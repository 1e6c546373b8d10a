//! Configuration models for parabench.
//!
//! All I^R (resolvable ignorance) is parameterized here.
//! The user resolves these unknowns at runtime via config file.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::record::{SENTENCE1, SENTENCE2};
use crate::report::AVERAGES_KEY;

const RESERVED_FIELDS: [&str; 2] = [SENTENCE1, SENTENCE2];

/// Top-level configuration for parabench.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Run settings
    #[serde(default)]
    pub bench: BenchConfig,

    /// OpenAI-compatible endpoints referenced by `chat` methods
    #[serde(default)]
    pub endpoints: HashMap<String, EndpointConfig>,

    /// Method registry, in evaluation order
    #[serde(default)]
    pub methods: Vec<MethodSpec>,

    /// Report groups for error-rate aggregation
    #[serde(default)]
    pub report: ReportConfig,
}

/// Settings of one bench (run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Run identifier; a date/time-derived one is generated when absent
    #[serde(default)]
    pub id: Option<String>,

    /// Directory holding the pristine, result-free dataset files
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Directory under which each run gets `<id>/`
    #[serde(default = "default_benches_dir")]
    pub benches_dir: PathBuf,

    /// Pairs handed to a method per invocation
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Invocations per batch before it is abandoned
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Strip existing verdicts of every configured method before running
    #[serde(default)]
    pub purge: bool,

    /// What to do with records whose batches were abandoned in an earlier pass
    #[serde(default)]
    pub failed_batches: FailurePolicy,

    /// Dataset base names (without `.json`); empty means every dataset in `source_dir`
    #[serde(default)]
    pub datasets: Vec<String>,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("datasets_no_results")
}

fn default_benches_dir() -> PathBuf {
    PathBuf::from("benches")
}

fn default_batch_size() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            id: None,
            source_dir: default_source_dir(),
            benches_dir: default_benches_dir(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            purge: false,
            failed_batches: FailurePolicy::default(),
            datasets: Vec::new(),
        }
    }
}

/// Treatment of records that appear in the failure ledger.
///
/// `Skip` makes an abandoned batch final for the lifetime of the bench
/// directory. `Retry` lets a later pass plan those records again, which is
/// what you want after fixing a method under the same bench id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Skip,
    Retry,
}

/// Configuration for an OpenAI-compatible endpoint.
///
/// Covers on-prem servers (LM Studio, vLLM, Ollama, llama.cpp) as well as
/// hosted aggregators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL for the API (e.g., "http://localhost:1234/v1")
    pub base_url: String,

    /// API key (optional, can be omitted for local endpoints)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable name for API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Custom headers to include in requests
    /// Values can contain ${ENV_VAR} for environment variable expansion
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request timeout in seconds (default: 180)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Transport-level retries per request (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_timeout() -> u64 {
    180
}

fn default_max_retries() -> u32 {
    3
}

/// One entry of the method registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSpec {
    /// Name under which verdicts are stored in the records
    pub name: String,

    #[serde(flatten)]
    pub kind: MethodKind,
}

/// How a method produces its verdicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MethodKind {
    /// Same verdict for every pair
    Constant { value: bool },
    /// One chat completion per pair against a configured endpoint
    Chat(ChatMethodConfig),
}

/// Settings of a `chat` method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMethodConfig {
    /// Endpoint name, a key of `[endpoints.*]`
    pub endpoint: String,

    /// Model identifier as served by the endpoint
    pub model: String,

    /// Prompt template file with `{sentence1}` / `{sentence2}` placeholders
    #[serde(default)]
    pub prompt: Option<PathBuf>,

    /// Optional system message
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Drop `<think>...</think>` blocks before reading the verdict
    #[serde(default)]
    pub strip_thinking: bool,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub temperature: f64,
}

fn default_max_tokens() -> u32 {
    512
}

/// Error-rate aggregation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub groups: Vec<ReportGroup>,
}

/// A named group of datasets sharing one notion of the correct verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportGroup {
    pub name: String,
    pub datasets: Vec<String>,
    pub expected: Expected,

    /// Heading the group is listed under in `results.json`; averages are
    /// taken per category, then over categories
    #[serde(default)]
    pub category: Option<String>,

    /// Only count records whose score lies in a range
    #[serde(default)]
    pub score: Option<ScoreFilter>,
}

/// Keeps records whose numeric `field` lies in `[min, max)`.
///
/// Records without a numeric value in `field` are left out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreFilter {
    pub field: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl ScoreFilter {
    pub fn admits(&self, score: f64) -> bool {
        self.min.map_or(true, |min| score >= min) && self.max.map_or(true, |max| score < max)
    }
}

/// The verdict a method should give on a group's records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expected {
    /// Every record should get this verdict
    Constant(bool),
    /// Each record carries its label in this field
    Field(String),
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// B_i(file exists) → Result
    /// B_i(file is valid TOML) → Result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Check everything that can be checked before any dataset is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bench.batch_size == 0 {
            return Err(ConfigError::Invalid("bench.batch_size must be at least 1".to_string()));
        }
        if self.bench.max_attempts == 0 {
            return Err(ConfigError::Invalid("bench.max_attempts must be at least 1".to_string()));
        }
        if self.methods.is_empty() {
            return Err(ConfigError::NoMethods);
        }

        let mut seen = HashSet::new();
        for method in &self.methods {
            if RESERVED_FIELDS.contains(&method.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "method name '{}' collides with a record text field",
                    method.name
                )));
            }
            if !seen.insert(method.name.as_str()) {
                return Err(ConfigError::DuplicateMethod(method.name.clone()));
            }
        }

        for group in &self.report.groups {
            if group.category.as_deref() == Some(AVERAGES_KEY) {
                return Err(ConfigError::Invalid(format!(
                    "report group '{}': category '{AVERAGES_KEY}' is reserved for the averages",
                    group.name
                )));
            }
        }

        self.validate_endpoints()
    }

    /// Get all unique endpoint names referenced by methods.
    pub fn referenced_endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self
            .methods
            .iter()
            .filter_map(|m| match &m.kind {
                MethodKind::Chat(chat) => Some(chat.endpoint.clone()),
                MethodKind::Constant { .. } => None,
            })
            .collect();
        endpoints.sort();
        endpoints.dedup();
        endpoints
    }

    /// Validate that all referenced endpoints are configured.
    pub fn validate_endpoints(&self) -> Result<(), ConfigError> {
        for endpoint in self.referenced_endpoints() {
            if !self.endpoints.contains_key(&endpoint) {
                return Err(ConfigError::EndpointNotFound(endpoint));
            }
        }
        Ok(())
    }

    /// Resolve API key for a specific endpoint.
    ///
    /// B_i(api key available) → Result
    pub fn resolve_endpoint_api_key(
        &self,
        endpoint_name: &str,
    ) -> Result<Option<String>, ConfigError> {
        let endpoint = self
            .endpoints
            .get(endpoint_name)
            .ok_or_else(|| ConfigError::EndpointNotFound(endpoint_name.to_string()))?;

        if let Some(key) = &endpoint.api_key {
            return Ok(Some(expand_env_vars(key)));
        }

        if let Some(env_var) = &endpoint.api_key_env {
            return std::env::var(env_var)
                .map(Some)
                .map_err(|_| ConfigError::MissingApiKey {
                    endpoint: endpoint_name.to_string(),
                    env_var: env_var.clone(),
                });
        }

        // No API key configured (valid for local endpoints)
        Ok(None)
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Expand environment variables in all headers.
pub fn expand_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), expand_env_vars(v)))
        .collect()
}

/// Configuration errors.
///
/// All of these are fatal at startup, before any dataset is processed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No methods configured (add at least one [[methods]] entry)")]
    NoMethods,

    #[error("Method '{0}' is configured more than once")]
    DuplicateMethod(String),

    #[error("Failed to read prompt template {path}: {source}")]
    PromptRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(
        "Missing API key for endpoint '{endpoint}': set {env_var} env var or api_key in config"
    )]
    MissingApiKey { endpoint: String, env_var: String },

    #[error("Endpoint not found: '{0}' (referenced by a method but not configured in [endpoints.*])")]
    EndpointNotFound(String),
}
