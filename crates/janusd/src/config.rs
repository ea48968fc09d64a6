use janus_core::MAX_TEMPLATE_SIZE;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Which message bus to claim the service name on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl BusKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "session" => Some(Self::Session),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Optional settings from the TOML file named by `JANUS_CONFIG`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub bus: Option<BusKind>,
    pub default_k: Option<usize>,
    pub max_k: Option<usize>,
    pub queue_depth: Option<usize>,
    pub max_template_bytes: Option<usize>,
}

/// Daemon configuration: defaults, then the config file, then `JANUS_*` env vars.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bus to serve on (default: session).
    pub bus: BusKind,
    /// Results returned when a search asks for k = 0.
    pub default_k: usize,
    /// Upper bound on k for a single search.
    pub max_k: usize,
    /// Pending requests buffered for the engine thread.
    pub queue_depth: usize,
    /// Per-template flattening budget, capped at the format maximum.
    pub max_template_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: BusKind::Session,
            default_k: 10,
            max_k: 1000,
            queue_depth: 16,
            max_template_bytes: MAX_TEMPLATE_SIZE,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("JANUS_CONFIG") {
            Ok(path) => read_file(PathBuf::from(path))?,
            Err(_) => ConfigFile::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let bus = env("JANUS_BUS")
            .and_then(|v| BusKind::parse(&v))
            .or(file.bus)
            .unwrap_or(defaults.bus);
        let max_k = env_parse(&env, "JANUS_MAX_K")
            .or(file.max_k)
            .unwrap_or(defaults.max_k)
            .max(1);
        let default_k = env_parse(&env, "JANUS_DEFAULT_K")
            .or(file.default_k)
            .unwrap_or(defaults.default_k)
            .clamp(1, max_k);
        let queue_depth = env_parse(&env, "JANUS_QUEUE_DEPTH")
            .or(file.queue_depth)
            .unwrap_or(defaults.queue_depth)
            .max(1);
        let max_template_bytes = env_parse(&env, "JANUS_MAX_TEMPLATE_BYTES")
            .or(file.max_template_bytes)
            .unwrap_or(defaults.max_template_bytes)
            .min(MAX_TEMPLATE_SIZE);

        Self {
            bus,
            default_k,
            max_k,
            queue_depth,
            max_template_bytes,
        }
    }

    /// Resolve a requested k: 0 means the default, anything else is capped.
    pub fn effective_k(&self, requested: usize) -> usize {
        if requested == 0 {
            self.default_k
        } else {
            requested.min(self.max_k)
        }
    }
}

fn read_file(path: PathBuf) -> Result<ConfigFile, ConfigError> {
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
}

fn env_parse(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<usize> {
    env(key).and_then(|v| v.trim().parse().ok())
}
