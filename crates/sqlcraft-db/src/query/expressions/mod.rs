//! Query expressions, aggregates, F-objects, and subqueries.
//!
//! # Submodules
//!
//! - [`core`] - Core expression types: F, Col, Value, Func, Aggregate, arithmetic
//! - [`subquery`] - [`Subquery`], embedded and possibly correlated queries

pub mod core;
pub mod subquery;

pub use self::core::{AggregateFunc, Expression};
pub use self::subquery::Subquery;
