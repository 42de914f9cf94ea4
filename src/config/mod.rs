//! Configuration file and environment handling.

mod settings;

pub use settings::{
    expand_env_vars, ConnectionSettings, DefaultsSettings, EngineSettings, LoggingSettings, Settings,
    SettingsError, CONFIG_ENV,
};
