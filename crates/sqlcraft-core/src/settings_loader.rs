//! Settings loading from configuration files.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `SQLCRAFT_DIALECT` | `dialect` |
//! | `SQLCRAFT_DEBUG` | `debug` |
//! | `SQLCRAFT_LOG_LEVEL` | `log_level` |
//! | `SQLCRAFT_POSITIONAL_ALIASES` | `positional_column_aliases` |
//! | `SQLCRAFT_EMPTY_RESULT_MODE` | `empty_result_mode` |
//! | `SQLCRAFT_MAX_IN_LIST_SIZE` | `max_in_list_size` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use sqlcraft_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("sqlcraft.toml").unwrap();
//! ```

use std::path::Path;

use crate::error::QueryError;
use crate::settings::{EmptyResultMode, Settings};

/// Loads settings from a TOML string.
///
/// Any fields not present in the TOML keep their default values.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or cannot be deserialized.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, QueryError> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| QueryError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;
    merge_over_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, QueryError> {
    from_toml_str(&read_file(path.as_ref(), "TOML")?)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read, the TOML is malformed, or an
/// environment variable holds an unparseable value.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, QueryError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

/// Loads settings from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or cannot be deserialized.
pub fn from_json_str(json_str: &str) -> Result<Settings, QueryError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| QueryError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;
    merge_over_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<Settings, QueryError> {
    from_json_str(&read_file(path.as_ref(), "JSON")?)
}

/// Loads settings from just environment variables (starting from defaults).
///
/// # Errors
///
/// Returns an error if an environment variable holds an unparseable value.
pub fn from_env() -> Result<Settings, QueryError> {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings)?;
    Ok(settings)
}

/// Applies `SQLCRAFT_*` environment variable overrides to a settings struct.
///
/// # Errors
///
/// Returns an error if a numeric or enumerated variable cannot be parsed.
pub fn apply_env_overrides(settings: &mut Settings) -> Result<(), QueryError> {
    apply_overrides_from(settings, |key| std::env::var(key).ok())
}

/// Applies overrides read through `lookup`, which maps a variable name to its value.
fn apply_overrides_from(
    settings: &mut Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), QueryError> {
    if let Some(val) = lookup("SQLCRAFT_DIALECT") {
        settings.dialect = val.trim().to_ascii_lowercase();
    }

    if let Some(val) = lookup("SQLCRAFT_DEBUG") {
        settings.debug = parse_flag(&val);
    }

    if let Some(val) = lookup("SQLCRAFT_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Some(val) = lookup("SQLCRAFT_POSITIONAL_ALIASES") {
        settings.positional_column_aliases = parse_flag(&val);
    }

    if let Some(val) = lookup("SQLCRAFT_EMPTY_RESULT_MODE") {
        settings.empty_result_mode = EmptyResultMode::parse(&val).ok_or_else(|| {
            QueryError::ConfigurationError(format!(
                "SQLCRAFT_EMPTY_RESULT_MODE must be 'signal' or 'literal', got '{val}'"
            ))
        })?;
    }

    if let Some(val) = lookup("SQLCRAFT_MAX_IN_LIST_SIZE") {
        let size = val.trim().parse::<usize>().map_err(|e| {
            QueryError::ConfigurationError(format!(
                "SQLCRAFT_MAX_IN_LIST_SIZE must be a positive integer: {e}"
            ))
        })?;
        settings.max_in_list_size = (size > 0).then_some(size);
    }

    Ok(())
}

// ============================================================
// Helpers
// ============================================================

fn parse_flag(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn read_file(path: &Path, kind: &str) -> Result<String, QueryError> {
    std::fs::read_to_string(path).map_err(|e| {
        QueryError::ConfigurationError(format!(
            "Failed to read {kind} file '{}': {e}",
            path.display()
        ))
    })
}

/// Deep-merges `value` over the serialized defaults and deserializes the result.
fn merge_over_defaults(value: serde_json::Value, kind: &str) -> Result<Settings, QueryError> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        QueryError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        QueryError::ConfigurationError(format!("Failed to deserialize settings from {kind}: {e}"))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}
