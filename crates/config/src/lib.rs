//! Configuration loading, validation, and env substitution.
//!
//! Config files: `herald.toml`, `herald.yaml`, or `herald.json`
//! Searched in `./` then `~/.config/herald/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod template;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, data_dir, discover_and_load, find_config_file,
        load_config,
    },
    schema::{
        BroadcastConfig, DatabaseConfig, HeraldConfig, MetricsConfig, SchedulerConfig,
        TelegramConfig,
    },
    template::default_config_template,
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
