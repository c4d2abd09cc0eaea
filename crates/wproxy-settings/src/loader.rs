//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ProxySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `WPROXY_*` environment overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ProxySettings;

/// Resolve the default settings file (`~/.wproxy/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".wproxy").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ProxySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ProxySettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults merged with the file at `path`, without env overrides.
pub fn read_settings_file(path: &Path) -> Result<ProxySettings> {
    let defaults = serde_json::to_value(ProxySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut ProxySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// - `WPROXY_HOST`, `WPROXY_TARGET_URL`, `WPROXY_PROXY_PATH`,
///   `WPROXY_LOG_LEVEL`: non-empty strings
/// - `WPROXY_PORT`: `1..=65535`
/// - `WPROXY_CANCEL_SIBLING`, `WPROXY_FORWARD_QUERY`, `WPROXY_LOG_JSON`:
///   `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - `WPROXY_MAX_MESSAGE_SIZE`: bytes, `1024..=1 GiB`
///
/// Invalid values are ignored with a warning.
pub fn apply_overrides(settings: &mut ProxySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("WPROXY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("WPROXY_PORT", 1, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("WPROXY_PROXY_PATH") {
        settings.server.proxy_path = v;
    }

    if let Some(v) = env.string("WPROXY_TARGET_URL") {
        settings.proxy.target_url = v;
    }
    if let Some(v) = env.bool("WPROXY_FORWARD_QUERY") {
        settings.proxy.forward_query = v;
    }
    if let Some(v) = env.bool("WPROXY_CANCEL_SIBLING") {
        settings.proxy.cancel_sibling_on_exit = v;
    }
    if let Some(v) = env.usize("WPROXY_MAX_MESSAGE_SIZE", 1024, 1 << 30) {
        settings.proxy.max_message_size = Some(v);
    }

    if let Some(v) = env.string("WPROXY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("WPROXY_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::errors::SettingsError;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({
            "server": {"port": 8090, "host": "0.0.0.0"}
        });
        let source = serde_json::json!({
            "server": {"port": 9000}
        });
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9000);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_object_replaces_primitive() {
        let target = serde_json::json!({"a": "string"});
        let source = serde_json::json!({"a": {"nested": true}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"]["nested"], true);
    }

    // ── read_settings_file ──────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = read_settings_file(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings, ProxySettings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9000}, "proxy": {"pingReply": {"request": "ping", "response": "pong"}}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.proxy_path, "/ws/proxy");
        let reply = settings.proxy.ping_reply.unwrap();
        assert_eq!(reply.response, "pong");
        assert_eq!(settings.proxy.max_frame_size, Some(16 << 20));
    }

    #[test]
    fn invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(
            read_settings_file(&path).unwrap_err(),
            SettingsError::Json(_)
        ));
    }

    #[test]
    fn wrong_type_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": "eighty"}}"#).unwrap();
        assert!(matches!(
            read_settings_file(&path).unwrap_err(),
            SettingsError::Json(_)
        ));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut settings = ProxySettings::default();
        apply_overrides(
            &mut settings,
            vars(&[
                ("WPROXY_HOST", "127.0.0.1"),
                ("WPROXY_PORT", "9100"),
                ("WPROXY_TARGET_URL", "ws://10.0.0.5:9090/feed"),
                ("WPROXY_CANCEL_SIBLING", "off"),
                ("WPROXY_MAX_MESSAGE_SIZE", "2048"),
                ("WPROXY_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.proxy.target_url, "ws://10.0.0.5:9090/feed");
        assert!(!settings.proxy.cancel_sibling_on_exit);
        assert_eq!(settings.proxy.max_message_size, Some(2048));
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let mut settings = ProxySettings::default();
        apply_overrides(
            &mut settings,
            vars(&[
                ("WPROXY_PORT", "0"),
                ("WPROXY_CANCEL_SIBLING", "maybe"),
                ("WPROXY_MAX_MESSAGE_SIZE", "12"),
                ("WPROXY_HOST", ""),
            ]),
        );
        assert_eq!(settings, ProxySettings::default());
    }

    #[test]
    fn parse_bool_variants() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_usize_range("4096", 1024, 8192), Some(4096));
        assert_eq!(parse_usize_range("-1", 0, 10), None);
    }
}
