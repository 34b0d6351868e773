//! Configuration loading, env substitution and validation.
//!
//! Config files: `switchboard.toml`, `switchboard.yaml`, `switchboard.yml` or
//! `switchboard.json`, searched in `./` then the user config directory
//! (`~/.config/switchboard/` on Linux).
//!
//! String values may reference `${ENV_VAR}` or `${ENV_VAR:-fallback}`.

pub mod duration;
pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    duration::parse_duration,
    error::{Error, Result},
    loader::{
        apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config,
        parse_config,
    },
    schema::{AgentSeed, DispatchConfig, MetricsConfig, StoreConfig, SwitchboardConfig},
    validate::{
        Diagnostic, Format, Severity, ValidationResult, validate_config, validate_file,
        validate_str, validate_toml_str,
    },
};
