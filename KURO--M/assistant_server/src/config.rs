use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use kuro_actions::security::PolicyMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file read when `--config` is not given; optional.
pub const DEFAULT_CONFIG_PATH: &str = "kuro.toml";

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading config {}: {source}", path.display())]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for [`AssistantConfig`].
    #[error("parsing config {}: {source}", path.display())]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },
    /// A value is out of range or unparseable.
    #[error("invalid {key}: {reason}")]
    Invalid {
        /// Dotted key or environment variable.
        key: String,
        /// What was wrong.
        reason: String,
    },
}

/// Which memory backend serves context and the memory capabilities.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    /// Pinecone serverless index with Gemini embeddings.
    #[default]
    Pinecone,
    /// Process-local store; nothing survives a restart.
    Memory,
}

impl FromStr for MemoryBackend {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pinecone" => Ok(Self::Pinecone),
            "memory" | "in_memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("unknown memory backend '{other}'")),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// Origins allowed by CORS.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".into(),
            cors_origins: vec!["http://localhost:3000".into()],
        }
    }
}

/// Gemini decision oracle settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OracleConfig {
    /// Google API key; usually from `GOOGLE_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Generative model name.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Request deadline in seconds.
    pub timeout_secs: u64,
    /// API base URL.
    pub base_url: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".into(),
            temperature: 0.3,
            timeout_secs: 20,
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
        }
    }
}

/// Memory store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Backend selection.
    pub backend: MemoryBackend,
    /// Pinecone API key; usually from `PINECONE_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Pinecone index name.
    pub index_name: String,
    /// Cloud for index creation.
    pub cloud: String,
    /// Region for index creation.
    pub region: String,
    /// Deadline for store calls in seconds.
    pub timeout_secs: u64,
    /// Memories used as oracle context.
    pub context_top_k: usize,
    /// Capacity of the in-memory backend.
    pub capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::Pinecone,
            api_key: None,
            index_name: "kuro-memory".into(),
            cloud: "aws".into(),
            region: "us-east-1".into(),
            timeout_secs: 10,
            context_top_k: 3,
            capacity: 1024,
        }
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-action deadline in seconds.
    pub action_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: 30,
        }
    }
}

/// Safety gate settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SafetyConfig {
    /// Global command policy.
    pub command_policy: PolicyMode,
    /// Hard kill deadline for shell commands in seconds.
    pub command_timeout_secs: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            command_policy: PolicyMode::Denylist,
            command_timeout_secs: 10,
        }
    }
}

/// Groq text-to-speech settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TtsConfig {
    /// Groq API key; usually from `GROQ_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Speech model.
    pub model: String,
    /// Voice name.
    pub voice: String,
    /// Audio container.
    pub response_format: String,
    /// Request deadline in seconds.
    pub timeout_secs: u64,
    /// API base URL.
    pub base_url: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "canopylabs/orpheus-v1-english".into(),
            voice: "autumn".into(),
            response_format: "wav".into(),
            timeout_secs: 30,
            base_url: "https://api.groq.com/openai/v1".into(),
        }
    }
}

/// Structured log and event sinks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for JSONL logs.
    pub dir: PathBuf,
    /// Optional JSONL file receiving every event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_log: Option<PathBuf>,
    /// Events retained by the in-memory bus.
    pub event_capacity: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs/kuro"),
            event_log: None,
            event_capacity: 512,
        }
    }
}

/// Settings for the built-in capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CapabilitiesConfig {
    /// Screenshot directory; `~/Pictures` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot_dir: Option<PathBuf>,
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssistantConfig {
    /// HTTP listener.
    pub server: ServerConfig,
    /// Decision oracle.
    pub oracle: OracleConfig,
    /// Memory store.
    pub memory: MemoryConfig,
    /// Dispatcher.
    pub dispatch: DispatchConfig,
    /// Safety gate.
    pub safety: SafetyConfig,
    /// Text-to-speech.
    pub tts: TtsConfig,
    /// Logs and events.
    pub logging: LoggingConfig,
    /// Built-in capabilities.
    pub capabilities: CapabilitiesConfig,
}

impl AssistantConfig {
    /// Loads `path`, or [`DEFAULT_CONFIG_PATH`] when present, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Applies environment overrides read through `lookup`; blank values are
    /// ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(key) = get("GOOGLE_API_KEY") {
            self.oracle.api_key = Some(key);
        }
        if let Some(key) = get("PINECONE_API_KEY") {
            self.memory.api_key = Some(key);
        }
        if let Some(index) = get("PINECONE_INDEX_NAME") {
            self.memory.index_name = index;
        }
        if let Some(region) = get("PINECONE_ENV") {
            self.memory.region = region;
        }
        if let Some(key) = get("GROQ_API_KEY") {
            self.tts.api_key = Some(key);
        }
        if let Some(bind) = get("KURO_BIND") {
            self.server.bind = bind;
        }
        if let Some(raw) = get("KURO_MEMORY_BACKEND") {
            self.memory.backend = raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "KURO_MEMORY_BACKEND".into(),
                reason,
            })?;
        }
        if let Some(raw) = get("KURO_COMMAND_POLICY") {
            self.safety.command_policy = raw.parse().map_err(|reason| ConfigError::Invalid {
                key: "KURO_COMMAND_POLICY".into(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Checks ranges and the listen address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        let timeouts = [
            ("oracle.timeout_secs", self.oracle.timeout_secs),
            ("memory.timeout_secs", self.memory.timeout_secs),
            ("dispatch.action_timeout_secs", self.dispatch.action_timeout_secs),
            ("safety.command_timeout_secs", self.safety.command_timeout_secs),
            ("tts.timeout_secs", self.tts.timeout_secs),
        ];
        for (key, secs) in timeouts {
            if secs == 0 {
                return Err(ConfigError::Invalid {
                    key: key.into(),
                    reason: "must be at least 1 second".into(),
                });
            }
        }
        if !(0.0..=2.0).contains(&self.oracle.temperature) {
            return Err(ConfigError::Invalid {
                key: "oracle.temperature".into(),
                reason: format!("{} is outside 0.0..=2.0", self.oracle.temperature),
            });
        }
        Ok(())
    }

    /// Parsed listen address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server.bind.parse().map_err(|err| ConfigError::Invalid {
            key: "server.bind".into(),
            reason: format!("'{}': {err}", self.server.bind),
        })
    }

    /// Environment variables whose absence disables a feature.
    #[must_use]
    pub fn missing_secrets(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.oracle.api_key.is_none() {
            missing.push("GOOGLE_API_KEY");
        }
        if self.memory.backend == MemoryBackend::Pinecone && self.memory.api_key.is_none() {
            missing.push("PINECONE_API_KEY");
        }
        if self.tts.api_key.is_none() {
            missing.push("GROQ_API_KEY");
        }
        missing
    }

    /// Oracle deadline.
    #[must_use]
    pub const fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle.timeout_secs)
    }

    /// Memory store deadline.
    #[must_use]
    pub const fn memory_timeout(&self) -> Duration {
        Duration::from_secs(self.memory.timeout_secs)
    }

    /// Per-action deadline.
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch.action_timeout_secs)
    }

    /// Shell kill deadline.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.safety.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_service() {
        let config = AssistantConfig::default();
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert_eq!(config.server.cors_origins, vec!["http://localhost:3000".to_string()]);
        assert_eq!(config.safety.command_policy, PolicyMode::Denylist);
        assert_eq!(config.memory.context_top_k, 3);
        assert_eq!(config.tts.voice, "autumn");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn file_overrides_only_named_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kuro.toml");
        fs::write(
            &path,
            r#"
[server]
bind = "127.0.0.1:9000"

[safety]
command_policy = "allowlist"

[memory]
backend = "memory"
"#,
        )
        .unwrap();
        let config = AssistantConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.safety.command_policy, PolicyMode::Allowlist);
        assert_eq!(config.safety.command_timeout_secs, 10);
        assert_eq!(config.memory.backend, MemoryBackend::Memory);
        assert_eq!(config.oracle.model, "gemini-1.5-flash");
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = AssistantConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kuro.toml");
        fs::write(&path, "[server\nbind = 1").unwrap();
        let err = AssistantConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = AssistantConfig::default();
        config
            .apply_env(env(&[
                ("GOOGLE_API_KEY", "g-key"),
                ("PINECONE_INDEX_NAME", "kuro-test"),
                ("PINECONE_ENV", "eu-west-1"),
                ("KURO_BIND", "127.0.0.1:7000"),
                ("KURO_COMMAND_POLICY", "allow"),
                ("GROQ_API_KEY", "   "),
            ]))
            .unwrap();
        assert_eq!(config.oracle.api_key.as_deref(), Some("g-key"));
        assert_eq!(config.memory.index_name, "kuro-test");
        assert_eq!(config.memory.region, "eu-west-1");
        assert_eq!(config.server.bind, "127.0.0.1:7000");
        assert_eq!(config.safety.command_policy, PolicyMode::Allowlist);
        assert_eq!(config.tts.api_key, None);
        assert_eq!(config.missing_secrets(), vec!["PINECONE_API_KEY", "GROQ_API_KEY"]);
    }

    #[test]
    fn bad_environment_values_are_rejected() {
        let mut config = AssistantConfig::default();
        let err = config
            .apply_env(env(&[("KURO_MEMORY_BACKEND", "redis")]))
            .unwrap_err();
        assert!(err.to_string().contains("KURO_MEMORY_BACKEND"));
    }

    #[test]
    fn validation_catches_zero_timeouts_and_bad_bind() {
        let mut config = AssistantConfig::default();
        config.dispatch.action_timeout_secs = 0;
        assert!(config.validate().unwrap_err().to_string().contains("dispatch.action_timeout_secs"));

        let mut config = AssistantConfig::default();
        config.server.bind = "localhost".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { key, .. }) if key == "server.bind"));
    }

    #[test]
    fn secrets_are_not_serialized() {
        let mut config = AssistantConfig::default();
        config.oracle.api_key = Some("secret".into());
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("gemini-1.5-flash"));
    }
}
