//! # sqlcraft-db
//!
//! Builds relational queries as immutable descriptors and compiles them to
//! parameterized SQL. A [`Query`](query::Query) is refined through
//! copy-on-write builder calls (`filter`, `exclude`, `values`, `order_by`,
//! `slice`, `union`, ...) that each return a new descriptor and leave the
//! original untouched. Nothing touches a database: the
//! [`SqlCompiler`](query::SqlCompiler) turns a descriptor into SQL text plus
//! an ordered parameter list for one of the supported [`dialect`]s.
//!
//! ## Module Overview
//!
//! - [`model`] - [`ModelMeta`](model::ModelMeta) and the [`ModelRegistry`](model::ModelRegistry)
//! - [`fields`] - Field definitions ([`FieldDef`](fields::FieldDef)) and types
//! - [`value`] - The backend-agnostic [`Value`](value::Value) enum
//! - [`dialect`] - Placeholder, quoting, and clause differences between databases
//! - [`query`] - Query descriptors, lookups, expressions, joins, and compilation

// These clippy lints are intentionally allowed for the query crate:
// - too_many_lines: the compiler's match-heavy methods are large
// - result_large_err: QueryError is the crate-wide error type
// - format_push_string: format! with push_str is clearer than write! for SQL generation
// - doc_markdown: backtick requirements for documentation items are too strict
// - needless_pass_by_value: builder arguments are consumed by design of the API
// - return_self_not_must_use: builder methods are self-documenting
#![allow(clippy::too_many_lines)]
#![allow(clippy::result_large_err)]
#![allow(clippy::format_push_string)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::use_self)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::too_many_arguments)]

pub mod dialect;
pub mod fields;
pub mod model;
pub mod query;
pub mod value;

// Re-export the most commonly used types at the crate root.
pub use dialect::{
    dialect_for, Combinator, DatabaseBackendType, Dialect, MySqlDialect, OracleDialect,
    PostgresDialect, SqliteDialect,
};
pub use fields::{FieldDef, FieldType};
pub use model::{ModelMeta, ModelRegistry};
pub use query::{
    AggregateFunc, Compilation, CompileOptions, CompiledSql, Connector, Direction, Distinct,
    Expression, Lookup, OrderBy, Projection, Query, QueryPlan, SqlCompiler, Subquery, WhereNode,
    Q,
};
pub use value::Value;
