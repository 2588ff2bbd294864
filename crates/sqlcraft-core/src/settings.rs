//! Settings for sqlcraft.
//!
//! This module provides the [`Settings`] struct, which holds every knob the
//! compiler and the logging setup read. Settings are plain values: they are
//! loaded once (see [`settings_loader`](crate::settings_loader)) and then
//! passed explicitly to whatever needs them. There is no global instance.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What the compiler produces for a query whose predicate can never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyResultMode {
    /// Report an empty result set to the caller instead of SQL text.
    #[default]
    Signal,
    /// Render a query with a literal `WHERE 1=0` predicate.
    Literal,
}

impl EmptyResultMode {
    /// Parses a mode name (`"signal"` or `"literal"`, case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "signal" => Some(Self::Signal),
            "literal" => Some(Self::Literal),
            _ => None,
        }
    }
}

/// The complete set of sqlcraft settings.
///
/// # Examples
///
/// ```
/// use sqlcraft_core::settings::{EmptyResultMode, Settings};
///
/// let settings = Settings::default();
/// assert_eq!(settings.dialect, "postgresql");
/// assert_eq!(settings.empty_result_mode, EmptyResultMode::Signal);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // ── Compilation ──────────────────────────────────────────────────

    /// The dialect used when none is given explicitly
    /// (`postgresql`, `sqlite`, `mysql` or `oracle`).
    pub dialect: String,
    /// Whether every projection is emitted with a positional `colN` alias.
    pub positional_column_aliases: bool,
    /// How a provably empty query is reported.
    pub empty_result_mode: EmptyResultMode,
    /// Overrides the dialect's maximum number of values in one `IN (...)` list.
    pub max_in_list_size: Option<usize>,

    // ── Logging ──────────────────────────────────────────────────────

    /// Whether debug mode (pretty, file/line annotated logs) is enabled.
    pub debug: bool,
    /// The log filter (e.g. "info", "sqlcraft_db=trace").
    pub log_level: String,

    // ── Escape hatch ─────────────────────────────────────────────────

    /// Custom settings that don't fit into the above categories.
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dialect: "postgresql".to_string(),
            positional_column_aliases: false,
            empty_result_mode: EmptyResultMode::Signal,
            max_in_list_size: None,
            debug: true,
            log_level: "info".to_string(),
            extra: HashMap::new(),
        }
    }
}
