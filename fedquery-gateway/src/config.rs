//! Process-wide configuration, loaded once at startup (`spec.md` §6).

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Deployment environment (`spec.md` §6 `env`). Controls whether
/// unsigned JWTs are accepted by `auth::extract_application_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Production,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub url: Url,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

/// The `providers` section: one entry per provider plus the shared
/// in-flight concurrency bound (`spec.md` §4.5, `SPEC_FULL.md` §4.5
/// `providers.maxConcurrent`).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvidersConfig {
    /// Bounds the dispatcher's total in-flight provider calls. Defaults
    /// to one slot per distinct provider referenced by a plan, matching
    /// `SPEC_FULL.md`'s "unbounded per provider count observed in one
    /// request" default when left unset.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    pub entries: HashMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    pub url: Url,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsentConfig {
    pub url: Url,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    pub url: Url,
    pub queue_size: usize,
    #[serde(with = "humantime_serde")]
    pub flush_timeout: Duration,
}

/// Where to load the active unified schema from. `spec.md` §6 leaves
/// `schema.source` open-ended; a file path covers this engine's one
/// deployment shape (the admin-activation path from `spec.md` §4.1 is
/// exercised directly through `SchemaRegistry::activate`, not through
/// this config).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    pub source: std::path::PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Signing keys accepted in `production`; ignored in `local`.
    #[serde(default)]
    pub jwt_public_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    pub providers: ProvidersConfig,
    pub policy: PolicyConfig,
    pub consent: ConsentConfig,
    pub audit: AuditConfig,
    pub schema: SchemaConfig,
    pub server: ServerConfig,
    pub env: Environment,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Configuration {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }
}
