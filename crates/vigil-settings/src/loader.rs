//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`VigilSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `VIGIL_*` environment overrides (highest priority)
//! 4. Validate cross-field constraints

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::VigilSettings;

/// Resolve the default settings path (`~/.vigil/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vigil").join("settings.json")
}

/// Load settings from the default path with env overrides.
pub fn load_settings() -> Result<VigilSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env overrides.
///
/// A missing file yields defaults. Invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<VigilSettings> {
    let defaults = serde_json::to_value(VigilSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: VigilSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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
/// Invalid values are logged and ignored (file/default value stays).
pub fn apply_env_overrides(settings: &mut VigilSettings) {
    // ── Provider ────────────────────────────────────────────────────
    if let Some(v) = read_env_string("VIGIL_PROVIDER") {
        settings.provider.default_provider = v;
    }
    if let Some(v) = read_env_string("VIGIL_ANTHROPIC_MODEL") {
        settings.provider.anthropic.model = v;
    }
    if let Some(v) = read_env_string("VIGIL_OPENAI_MODEL") {
        settings.provider.openai.model = v;
    }

    // ── Agent ───────────────────────────────────────────────────────
    if let Some(v) = read_env_u64("VIGIL_MAX_ITERATIONS", 1, 100) {
        settings.agent.max_iterations = u32::try_from(v).unwrap_or(u32::MAX);
    }
    if let Some(v) = read_env_i64("VIGIL_HISTORY_ITERATIONS", -1, 1000) {
        settings.agent.history_iterations = i32::try_from(v).unwrap_or(-1);
    }
    if let Some(v) = read_env_usize("VIGIL_SNAPSHOT_MAX_CHARS", 1000, 1_000_000) {
        settings.agent.snapshot_max_chars = v;
    }
    if let Some(v) = read_env_usize("VIGIL_BATCH_SIZE", 1, 50) {
        settings.agent.batch_size = v;
    }
    if let Some(v) = read_env_bool("VIGIL_AUTO_SCREENSHOT") {
        settings.agent.auto_screenshot = v;
    }

    // ── Transport ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("VIGIL_AUTOMATION_COMMAND") {
        settings.transport.command = v;
    }
    if let Some(v) = read_env_u64("VIGIL_CALL_TIMEOUT_MS", 1000, 600_000) {
        settings.transport.call_timeout_ms = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("VIGIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as an `i64` within a range.
pub fn parse_i64_range(val: &str, min: i64, max: i64) -> Option<i64> {
    let n: i64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_i64(name: &str, min: i64, max: i64) -> Option<i64> {
    let val = std::env::var(name).ok()?;
    let result = parse_i64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid i64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: u64, max: u64) -> Option<usize> {
    read_env_u64(name, min, max).and_then(|v| usize::try_from(v).ok())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
