//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FeedwireSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `FEEDWIRE_*` environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::FeedwireSettings;

/// Resolve the path to the settings file (`~/.feedwire/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".feedwire").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<FeedwireSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. A file with invalid JSON, or with values
/// of the wrong type, is an error.
pub fn load_settings_from_path(path: &Path) -> Result<FeedwireSettings> {
    let mut settings = read_file_over_defaults(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn read_file_over_defaults(path: &Path) -> Result<FeedwireSettings> {
    let defaults = serde_json::to_value(FeedwireSettings::default())?;

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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_env_overrides(settings: &mut FeedwireSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup. [`apply_env_overrides`] uses
/// the process environment.
pub fn apply_overrides(settings: &mut FeedwireSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = Env { lookup };

    // ── Server ──
    if let Some(v) = env.string("FEEDWIRE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("FEEDWIRE_PORT", parse_u16_range, 0, u16::MAX) {
        settings.server.port = v;
    }
    if let Some(v) = env.parsed("FEEDWIRE_MAX_CONNECTIONS", parse_usize_range, 1, 1_000_000) {
        settings.server.max_connections = v;
    }

    // ── Hub ──
    if let Some(v) = env.parsed("FEEDWIRE_MAX_TOPICS", parse_usize_range, 1, 10_000) {
        settings.hub.max_topics_per_session = v;
    }
    if let Some(v) = env.parsed("FEEDWIRE_QUEUE_CAPACITY", parse_usize_range, 1, 10_000_000) {
        settings.hub.queue_capacity = v;
    }
    if let Some(v) = env.parsed("FEEDWIRE_INACTIVITY_SECS", parse_u64_range, 1, 86_400) {
        settings.hub.inactivity_threshold_secs = v;
    }
    if let Some(v) = env.parsed("FEEDWIRE_REAPER_INTERVAL_SECS", parse_u64_range, 1, 86_400) {
        settings.hub.reaper_interval_secs = v;
    }

    // ── Logging ──
    if let Some(v) = env.string("FEEDWIRE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.raw("FEEDWIRE_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.logging.json = b,
            None => warn!(key = "FEEDWIRE_LOG_JSON", value = %v, "invalid boolean env var, ignoring"),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.is_empty())
    }

    fn parsed<T: Copy>(
        &self,
        name: &str,
        parse: fn(&str, T, T) -> Option<T>,
        min: T,
        max: T,
    ) -> Option<T> {
        let val = self.raw(name)?;
        let result = parse(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid numeric env var, ignoring");
        }
        result
    }
}

// ── Pure parsing functions ──

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
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
