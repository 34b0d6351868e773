use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    Error, Result, env_subst::substitute_env, error::Context, schema::SwitchboardConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "switchboard.toml",
    "switchboard.yaml",
    "switchboard.yml",
    "switchboard.json",
];

/// Load config from the given path (any supported format), then apply
/// `SWITCHBOARD_*` environment overrides.
pub fn load_config(path: &Path) -> Result<SwitchboardConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = parse_config(&substitute_env(&raw), path)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./switchboard.{toml,yaml,yml,json}`
/// 2. `<user config dir>/switchboard/switchboard.{toml,yaml,yml,json}`
///
/// Falls back to defaults when nothing is found or the file is broken.
pub fn discover_and_load() -> SwitchboardConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    SwitchboardConfig::default()
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir()
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));
    local.chain(global).find(|p| p.exists())
}

/// The user-global config directory (`~/.config/switchboard/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "switchboard").map(|d| d.config_dir().to_path_buf())
}

/// Parse raw config text; the format follows the file extension.
pub fn parse_config(raw: &str, path: &Path) -> Result<SwitchboardConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

/// Apply `SWITCHBOARD_*` overrides on top of a parsed config.
///
/// Recognised: `SWITCHBOARD_NAMESPACE`, `SWITCHBOARD_DEDUP_WINDOW`,
/// `SWITCHBOARD_TIE_BREAK_SEED`, `SWITCHBOARD_METRICS_ENABLED`.
pub fn apply_env_overrides(
    config: &mut SwitchboardConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(ns) = lookup("SWITCHBOARD_NAMESPACE") {
        config.store.namespace = ns;
    }
    if let Some(window) = lookup("SWITCHBOARD_DEDUP_WINDOW") {
        config.dispatch.dedup_window = Some(window);
    }
    if let Some(seed) = lookup("SWITCHBOARD_TIE_BREAK_SEED") {
        let seed = seed
            .parse::<u64>()
            .with_context(|| format!("SWITCHBOARD_TIE_BREAK_SEED={seed}"))?;
        config.dispatch.tie_break_seed = Some(seed);
    }
    if let Some(enabled) = lookup("SWITCHBOARD_METRICS_ENABLED") {
        config.metrics.enabled = matches!(enabled.as_str(), "1" | "true" | "yes" | "on");
    }
    Ok(())
}
