//! Settings loading: compiled defaults, then the JSON file deep-merged over
//! them, then `TACHO_*` environment overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{tacho_home, TachoSettings};

/// Largest real-world UTC offset, in minutes.
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// `~/.tacho/settings.json`.
pub fn settings_path() -> PathBuf {
    tacho_home().join("settings.json")
}

/// Load from the default path with environment overrides.
pub fn load_settings() -> Result<TachoSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` with environment overrides.
///
/// A missing file yields defaults. Invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TachoSettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// Same as [`load_settings_from_path`] with an explicit environment lookup.
pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<TachoSettings> {
    let defaults = serde_json::to_value(TachoSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TachoSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    validate(&settings)?;
    Ok(settings)
}

/// Objects merge per key, everything else is replaced, and nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TACHO_*` overrides. Unparseable or out-of-range values are logged and ignored.
pub fn apply_env_overrides(settings: &mut TachoSettings, env: impl Fn(&str) -> Option<String>) {
    let env = &env;
    let text = |name: &str| env(name).filter(|v| !v.trim().is_empty());

    if let Some(v) = text("TACHO_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = text("TACHO_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = text("TACHO_LOCATION_URL") {
        settings.location.base_url = v;
    }
    if let Some(v) = read_parsed(env, "TACHO_PORT", |s| parse_range(s, 1, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = read_parsed(env, "TACHO_UTC_OFFSET_MINUTES", |s| {
        parse_range(s, -MAX_UTC_OFFSET_MINUTES, MAX_UTC_OFFSET_MINUTES)
    }) {
        settings.compliance.utc_offset_minutes = v;
    }
    if let Some(v) = read_parsed(env, "TACHO_LOCATION_PROVIDER", |s| s.parse().ok()) {
        settings.location.provider = v;
    }
    if let Some(v) = read_parsed(env, "TACHO_LOCATION_TIMEOUT_MS", |s| parse_range(s, 50, 60_000)) {
        settings.location.timeout_ms = v;
    }
    if let Some(v) = read_parsed(env, "TACHO_LOG_LEVEL", parse_log_level) {
        settings.telemetry.log_level = v;
    }
    if let Some(v) = read_parsed(env, "TACHO_LOG_TO_SQLITE", parse_bool) {
        settings.telemetry.log_to_sqlite = v;
    }
    if let Some(v) = read_parsed(env, "TACHO_METRICS_ENABLED", parse_bool) {
        settings.telemetry.metrics_enabled = v;
    }
}

fn read_parsed<T>(
    env: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = env(name).filter(|v| !v.trim().is_empty())?;
    let result = parse(raw.trim());
    if result.is_none() {
        warn!(key = name, value = %raw, "invalid env override, ignoring");
    }
    result
}

/// Reject combinations the engine cannot work with.
pub fn validate(settings: &TachoSettings) -> Result<()> {
    let c = &settings.compliance;
    if !(-MAX_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&c.utc_offset_minutes) {
        return Err(SettingsError::InvalidValue(format!(
            "compliance.utcOffsetMinutes {} outside ±{MAX_UTC_OFFSET_MINUTES}",
            c.utc_offset_minutes
        )));
    }
    if c.history_max_days == 0 || c.history_default_days == 0 {
        return Err(SettingsError::InvalidValue(
            "compliance history windows must be at least one day".into(),
        ));
    }
    if c.history_default_days > c.history_max_days {
        return Err(SettingsError::InvalidValue(format!(
            "compliance.historyDefaultDays {} exceeds historyMaxDays {}",
            c.history_default_days, c.history_max_days
        )));
    }
    if !(c.parking_radius_km.is_finite() && c.parking_radius_km > 0.0) {
        return Err(SettingsError::InvalidValue(format!(
            "compliance.parkingRadiusKm must be positive, got {}",
            c.parking_radius_km
        )));
    }
    if parse_log_level(&settings.telemetry.log_level).is_none() {
        return Err(SettingsError::InvalidValue(format!(
            "telemetry.logLevel {:?} is not a level",
            settings.telemetry.log_level
        )));
    }
    Ok(())
}

/// Accepts `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`, case-insensitive.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Normalizes a tracing level name to lowercase.
pub fn parse_log_level(val: &str) -> Option<String> {
    let lower = val.to_ascii_lowercase();
    matches!(lower.as_str(), "trace" | "debug" | "info" | "warn" | "error").then_some(lower)
}
