use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    schema::HeraldConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["herald.toml", "herald.yaml", "herald.yml", "herald.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<HeraldConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.display().to_string(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./herald.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/herald/herald.{toml,yaml,yml,json}` (user-global)
///
/// Returns `HeraldConfig::default()` if no config file is found. Env
/// overrides are applied in both cases.
pub fn discover_and_load() -> HeraldConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                HeraldConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            HeraldConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/herald/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "herald").map(|d| d.config_dir().to_path_buf())
}

/// Returns the data directory used for the default database location.
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "herald")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".herald"))
}

/// Apply `HERALD_*` environment overrides on top of a loaded config.
pub fn apply_env_overrides(config: &mut HeraldConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup("HERALD_DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Some(token) = lookup("HERALD_TELEGRAM_TOKEN") {
        config.telegram.token = Secret::new(token);
    }
    if let Some(workers) = lookup("HERALD_MAX_WORKERS") {
        match workers.parse() {
            Ok(n) => config.scheduler.max_workers = n,
            Err(_) => warn!(value = %workers, "ignoring invalid HERALD_MAX_WORKERS"),
        }
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<HeraldConfig> {
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
