//! Query building and compilation.
//!
//! This module contains the complete query pipeline:
//!
//! - [`lookups`] - Q objects and lookup types for filtering
//! - [`expressions`] - F-objects, aggregates, and subqueries
//! - [`where_node`] - The condition tree and its three-valued rendering
//! - [`joins`] - The alias map, join allocation, and join promotion
//! - [`descriptor`] - The immutable [`Query`] descriptor and its builder operations
//! - [`params`] - Parameter collection and alias reservation during compilation
//! - [`compiler`] - SQL generation for a [`Dialect`](crate::dialect::Dialect)

pub mod compiler;
pub mod descriptor;
pub mod expressions;
pub mod joins;
pub mod lookups;
pub mod params;
pub mod where_node;

pub use compiler::{Compilation, CompileOptions, CompiledSql, SqlCompiler};
pub use descriptor::{Combination, Direction, Distinct, OrderBy, Projection, Query, QueryPlan};
pub use expressions::{AggregateFunc, Expression, Subquery};
pub use joins::{AliasMap, JoinType};
pub use lookups::{Lookup, Q};
pub use where_node::{Connector, WhereNode};
