//! Layered loading: compiled defaults, then the JSON file, then environment.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::JunoSettings;

/// `~/.juno`, falling back to `/tmp/.juno` when HOME is unset.
pub fn juno_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".juno")
}

/// Default settings file location.
pub fn settings_path() -> PathBuf {
    juno_dir().join("settings.json")
}

/// Load from the default path. A missing file is not an error.
pub fn load_settings() -> Result<JunoSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from a specific file, then apply env overrides from the process
/// environment.
pub fn load_settings_from_path(path: &Path) -> Result<JunoSettings> {
    load_settings_from_paths(&[path])
}

/// Load several settings files in order. Later files are deep-merged over
/// earlier ones; missing files are skipped. Env overrides apply last.
pub fn load_settings_from_paths(paths: &[&Path]) -> Result<JunoSettings> {
    let mut merged = Value::Object(serde_json::Map::new());
    for path in paths {
        if !path.exists() {
            continue;
        }
        let raw = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "loaded settings file");
        merged = deep_merge(merged, serde_json::from_str(&raw)?);
    }

    let mut settings = settings_from_value(merged)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    Ok(settings)
}

/// Deep-merge a partial settings document over compiled defaults.
///
/// Defaults are expressed through serde `#[serde(default)]`, so merging a
/// sparse user document is a plain deserialize. Nested objects in `value`
/// only need the keys they override.
pub fn settings_from_value(value: Value) -> Result<JunoSettings> {
    Ok(serde_json::from_value(value)?)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key;
/// any other overlay value replaces the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Apply environment variable overrides. `lookup` abstracts the environment
/// so tests don't mutate process state.
pub fn apply_env_overrides<F>(settings: &mut JunoSettings, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(key) = get("GEMINI_API_KEY") {
        settings.model.api_key = Some(SecretString::from(key));
    }
    if let Some(url) = get("FI_MCP_URL") {
        settings.tools.provider_url = url;
    }
    if let Some(port) = get("PORT") {
        settings.server.port = parse_env("PORT", &port)?;
    }
    if let Some(port) = get("JUNO_TCP_PORT") {
        settings.server.tcp_port = Some(parse_env("JUNO_TCP_PORT", &port)?);
    }
    if let Some(path) = get("JUNO_DB_PATH") {
        settings.store.db_path = PathBuf::from(path);
    }
    if let Some(level) = get("JUNO_LOG_LEVEL") {
        settings.logging.level = level;
    }
    if let Some(json) = get("JUNO_LOG_JSON") {
        settings.logging.json = parse_env("JUNO_LOG_JSON", &json)?;
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| SettingsError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}
