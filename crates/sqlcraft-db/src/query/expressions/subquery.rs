//! Subqueries.
//!
//! A [`Subquery`] is a read-only view of a query descriptor that can be
//! embedded in another query: as a scalar expression, as the right-hand side
//! of an `IN` lookup, inside `EXISTS`, or as a derived table in the FROM
//! position. Inside the wrapped query, [`Expression::OuterRef`] marks a
//! field of the enclosing query; the compiler resolves it to the alias the
//! enclosing query already assigned.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use sqlcraft_db::fields::{FieldDef, FieldType};
//! # use sqlcraft_db::model::{ModelMeta, ModelRegistry};
//! use sqlcraft_db::query::{Expression, Lookup, Query, Q};
//!
//! # let mut registry = ModelRegistry::new();
//! # registry.register(ModelMeta::new("comment", "comment")
//! #     .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
//! #     .field(FieldDef::new("post_id", FieldType::BigIntegerField))).unwrap();
//! # let registry = Arc::new(registry);
//! let comments = Query::new(registry, "comment")?
//!     .filter(Q::filter("post_id", Lookup::Exact(Expression::outer_ref("id"))))?;
//! let sub = comments.as_subquery();
//! assert_eq!(sub.query().outer_refs(), vec!["id".to_string()]);
//! # Ok::<(), sqlcraft_core::QueryError>(())
//! ```

use std::sync::Arc;

use super::core::Expression;
use crate::query::descriptor::Query;

/// A query embedded in another query.
///
/// Cloning is cheap: the wrapped descriptor is shared.
#[derive(Debug, Clone)]
pub struct Subquery {
    query: Arc<Query>,
}

impl Subquery {
    /// Wraps a query descriptor.
    pub fn new(query: Query) -> Self {
        Self {
            query: Arc::new(query),
        }
    }

    /// Returns a reference to the inner query.
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Uses this subquery as a scalar expression.
    pub fn into_expression(self) -> Expression {
        Expression::Subquery(self)
    }

    /// Wraps this subquery in `EXISTS (...)`.
    pub fn exists(self) -> Expression {
        Expression::Exists(self)
    }
}

/// Two subqueries are equal when they wrap the same descriptor instance.
impl PartialEq for Subquery {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.query, &other.query)
    }
}
