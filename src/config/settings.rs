//! TOML configuration for expql.
//!
//! Example configuration:
//! ```toml
//! [events]
//! experimentEvent = "$experiment_started"
//! experimentIdProperty = "Experiment name"
//! variationIdProperty = "Variant name"
//!
//! [defaults]
//! include_by_date = true
//! premium_features = ["quantile-metrics"]
//!
//! [engine]
//! batch_size = 500
//!
//! [logging]
//! filter = "expql=debug"
//!
//! [connections.production]
//! project_id = "12345"
//! username = "svc-account"
//! secret = "${ANALYTICS_SECRET}"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::crypto::ConnectionParams;
use crate::engine::DEFAULT_BATCH_SIZE;
use crate::model::EventSettings;
use crate::validation::{FeatureSet, PremiumFeature};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "EXPQL_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Unknown premium feature: {0}")]
    UnknownFeature(String),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Event naming used when experiment settings do not override it.
    pub events: EventSettings,
    pub defaults: DefaultsSettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
    /// Named analytics project credentials.
    pub connections: BTreeMap<String, ConnectionSettings>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DefaultsSettings {
    /// Emit per-date rows in metric-value queries unless told otherwise.
    pub include_by_date: bool,

    /// Licensed features, e.g. `"quantile-metrics"`.
    pub premium_features: Vec<String>,
}

impl DefaultsSettings {
    pub fn feature_set(&self) -> Result<FeatureSet, SettingsError> {
        self.premium_features.iter().try_fold(FeatureSet::none(), |set, name| {
            let feature = match name.as_str() {
                "quantile-metrics" => PremiumFeature::QuantileMetrics,
                "retention-metrics" => PremiumFeature::RetentionMetrics,
                other => return Err(SettingsError::UnknownFeature(other.to_string())),
            };
            Ok(set.with(feature))
        })
    }
}

/// Reference interpreter settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Users per by-date reducer batch.
    pub batch_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "expql=info".to_string(),
        }
    }
}

/// Credentials for one analytics project. Values support `${ENV_VAR}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionSettings {
    pub project_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub secret: String,
}

impl ConnectionSettings {
    /// Connection params with environment variables expanded.
    pub fn resolve(&self) -> Result<ConnectionParams, SettingsError> {
        Ok(ConnectionParams::new(
            expand_env_vars(&self.project_id)?,
            expand_env_vars(&self.secret)?,
            expand_env_vars(&self.username)?,
        ))
    }
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load settings from the default locations.
    ///
    /// Searches in order:
    /// 1. `$EXPQL_CONFIG`
    /// 2. `./expql.toml`
    /// 3. `<config dir>/expql/config.toml`
    ///
    /// Falls back to defaults when none exists.
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var(CONFIG_ENV) {
            return Self::from_file(&path);
        }

        let local = PathBuf::from("expql.toml");
        if local.exists() {
            return Self::from_file(&local);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("expql").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    pub fn get_connection(&self, name: &str) -> Result<&ConnectionSettings, SettingsError> {
        self.connections
            .get(name)
            .ok_or_else(|| SettingsError::ConnectionNotFound(name.to_string()))
    }

    /// Event settings with empty fields filled from the defaults.
    pub fn event_settings(&self) -> EventSettings {
        self.events.clone().with_defaults()
    }
}

/// Expand `${VAR}` and `$VAR` references. A lone `$` is kept.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut name = String::new();
        if chars.next_if_eq(&'{').is_some() {
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                name.push(ch);
            }
        } else {
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                name.push(ch);
            }
            if name.is_empty() {
                result.push('$');
                continue;
            }
        }

        let value = env::var(&name).map_err(|_| SettingsError::MissingEnvVar(name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
