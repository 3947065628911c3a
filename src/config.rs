use crate::{registry::Registry, types::ServiceName};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, env, path::Path, str::FromStr};
use thiserror::Error;

/// Port a service listens on when none is configured.
pub const DEFAULT_PORT: u16 = 80;

/// Image repository prefix for deployments, including any trailing slash.
pub const IMAGE_PREFIX_VAR: &str = "IMAGE_PREFIX";

pub const DEPLOY_CONCURRENCY_VAR: &str = "MICRORPC_DEPLOY_CONCURRENCY";

const DEFAULT_DEPLOY_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("must define {0} environment variable")]
    MissingEnv(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The static service table, as read from TOML:
///
/// ```toml
/// [[services]]
/// name = "NameService"
/// host = "nameservice"
/// port = 80
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: ServiceName,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl RegistryConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for entry in &self.services {
            if entry.name.as_str().is_empty() {
                return Err(ConfigError::Invalid("service name is empty".into()));
            }
            if entry.host.is_empty() {
                return Err(ConfigError::Invalid(format!("{} has an empty host", entry.name)));
            }
            if !seen.insert(entry.name.clone()) {
                return Err(ConfigError::Invalid(format!("{} is listed twice", entry.name)));
            }
        }
        Ok(())
    }

    pub fn apply(&self, registry: &Registry) {
        for entry in &self.services {
            registry.register(entry.name.clone(), entry.host.clone(), entry.port);
        }
    }
}

impl FromStr for RegistryConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

/// Settings for the deployment path. Not needed to serve or call services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployConfig {
    pub image_prefix: String,
    /// Most services provisioned at once.
    pub concurrency: usize,
}

impl DeployConfig {
    pub fn new(image_prefix: impl Into<String>) -> Self {
        Self {
            image_prefix: image_prefix.into(),
            concurrency: DEFAULT_DEPLOY_CONCURRENCY,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let image_prefix = lookup(IMAGE_PREFIX_VAR)
            .filter(|prefix| !prefix.is_empty())
            .ok_or(ConfigError::MissingEnv(IMAGE_PREFIX_VAR))?;
        let mut config = Self::new(image_prefix);

        if let Some(val) = lookup(DEPLOY_CONCURRENCY_VAR) {
            config.concurrency = match val.parse() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "{DEPLOY_CONCURRENCY_VAR} must be a positive integer, got {val:?}"
                    )))
                }
            };
        }
        Ok(config)
    }
}
