//! # sqlcraft-core
//!
//! Core types shared by the sqlcraft crates: the error enum, settings and
//! their loader, and tracing setup. This crate has no knowledge of queries.
//!
//! ## Modules
//!
//! - [`error`] - [`QueryError`] and the [`QueryResult`] alias
//! - [`settings`] - [`Settings`] and [`EmptyResultMode`]
//! - [`settings_loader`] - TOML/JSON/environment loading
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{ErrorCategory, QueryError, QueryResult};
pub use settings::{EmptyResultMode, Settings};
