//! Query lookups and Q objects for building complex filters.
//!
//! This module provides the [`Lookup`] enum for field-level comparisons and
//! the [`Q`] enum for combining filters with AND, OR, and NOT operators.
//! A `Q` is a plain description: nothing is resolved until it is handed to
//! [`Query::filter`](crate::query::Query::filter) or one of its siblings.
//!
//! # Examples
//!
//! ```
//! use sqlcraft_db::query::lookups::{Lookup, Q};
//!
//! // status = 'paid' AND total > 100
//! let paid = Q::filter("status", Lookup::exact("paid")) & Q::filter("total", Lookup::gt(100));
//!
//! // customer.country = 'US' OR customer.vip = true
//! let either = Q::filter("customer__country", Lookup::exact("US"))
//!     | Q::filter("customer__vip", Lookup::exact(true));
//!
//! // NOT (status = 'void')
//! let live = !Q::filter("status", Lookup::exact("void"));
//! # let _ = (paid, either, live);
//! ```

use std::ops;

use crate::query::expressions::{Expression, Subquery};
use crate::value::Value;

/// A field-level lookup operation.
///
/// Comparison operands are expressions so a lookup can compare against a
/// literal, another field (`F`), an outer reference, or a scalar subquery.
/// Pattern lookups take the raw text; `%`, `_` and `\` in it are escaped.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Exact match (`field = value`, `field IS NULL` for a NULL literal).
    Exact(Expression),
    /// Case-insensitive exact match (`LOWER(field) = LOWER(value)`).
    IExact(Expression),
    /// Greater than (`field > value`).
    Gt(Expression),
    /// Greater than or equal (`field >= value`).
    Gte(Expression),
    /// Less than (`field < value`).
    Lt(Expression),
    /// Less than or equal (`field <= value`).
    Lte(Expression),
    /// Substring match (`field LIKE '%value%'`).
    Contains(String),
    /// Case-insensitive substring match.
    IContains(String),
    /// Starts with (`field LIKE 'value%'`).
    StartsWith(String),
    /// Case-insensitive starts with.
    IStartsWith(String),
    /// Ends with (`field LIKE '%value'`).
    EndsWith(String),
    /// Case-insensitive ends with.
    IEndsWith(String),
    /// Membership in a list of values (`field IN (...)`).
    In(Vec<Value>),
    /// Membership in the rows of a single-column subquery.
    InSubquery(Subquery),
    /// Range test (`field BETWEEN low AND high`).
    Range(Expression, Expression),
    /// NULL test (`field IS NULL` or `field IS NOT NULL`).
    IsNull(bool),
    /// Regular expression match.
    Regex(String),
    /// Case-insensitive regular expression match.
    IRegex(String),
}

impl Lookup {
    /// `field = value`.
    pub fn exact(value: impl Into<Value>) -> Self {
        Self::Exact(Expression::Value(value.into()))
    }

    /// `LOWER(field) = LOWER(value)`.
    pub fn iexact(value: impl Into<Value>) -> Self {
        Self::IExact(Expression::Value(value.into()))
    }

    /// `field > value`.
    pub fn gt(value: impl Into<Value>) -> Self {
        Self::Gt(Expression::Value(value.into()))
    }

    /// `field >= value`.
    pub fn gte(value: impl Into<Value>) -> Self {
        Self::Gte(Expression::Value(value.into()))
    }

    /// `field < value`.
    pub fn lt(value: impl Into<Value>) -> Self {
        Self::Lt(Expression::Value(value.into()))
    }

    /// `field <= value`.
    pub fn lte(value: impl Into<Value>) -> Self {
        Self::Lte(Expression::Value(value.into()))
    }

    /// `field BETWEEN low AND high`.
    pub fn range(low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::Range(
            Expression::Value(low.into()),
            Expression::Value(high.into()),
        )
    }

    /// `field IN (values...)`.
    pub fn in_values<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In(values.into_iter().map(Into::into).collect())
    }

    /// Returns the Django-style name of this lookup (`"exact"`, `"icontains"`, ...).
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Exact(_) => "exact",
            Self::IExact(_) => "iexact",
            Self::Gt(_) => "gt",
            Self::Gte(_) => "gte",
            Self::Lt(_) => "lt",
            Self::Lte(_) => "lte",
            Self::Contains(_) => "contains",
            Self::IContains(_) => "icontains",
            Self::StartsWith(_) => "startswith",
            Self::IStartsWith(_) => "istartswith",
            Self::EndsWith(_) => "endswith",
            Self::IEndsWith(_) => "iendswith",
            Self::In(_) | Self::InSubquery(_) => "in",
            Self::Range(..) => "range",
            Self::IsNull(_) => "isnull",
            Self::Regex(_) => "regex",
            Self::IRegex(_) => "iregex",
        }
    }

    /// Returns `true` if the lookup matches NULL columns itself.
    ///
    /// Negating such a lookup must not add an `IS NOT NULL` guard.
    pub fn matches_null(&self) -> bool {
        match self {
            Self::IsNull(_) => true,
            Self::Exact(Expression::Value(v)) => v.is_null(),
            _ => false,
        }
    }

    /// Returns the expression operands of this lookup.
    pub fn operands(&self) -> Vec<&Expression> {
        match self {
            Self::Exact(e)
            | Self::IExact(e)
            | Self::Gt(e)
            | Self::Gte(e)
            | Self::Lt(e)
            | Self::Lte(e) => vec![e],
            Self::Range(low, high) => vec![low, high],
            _ => Vec::new(),
        }
    }

    /// Rebuilds the lookup with every expression operand passed through `f`.
    pub fn try_map_operands<E>(
        self,
        f: &mut impl FnMut(Expression) -> Result<Expression, E>,
    ) -> Result<Self, E> {
        Ok(match self {
            Self::Exact(e) => Self::Exact(f(e)?),
            Self::IExact(e) => Self::IExact(f(e)?),
            Self::Gt(e) => Self::Gt(f(e)?),
            Self::Gte(e) => Self::Gte(f(e)?),
            Self::Lt(e) => Self::Lt(f(e)?),
            Self::Lte(e) => Self::Lte(f(e)?),
            Self::Range(low, high) => Self::Range(f(low)?, f(high)?),
            other => other,
        })
    }
}

/// Escapes the LIKE wildcards `%`, `_` and the escape character `\` itself.
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// A composable query filter, equivalent to Django's `Q` object.
///
/// `Q` objects can be combined using `&` (AND), `|` (OR), and `!` (NOT)
/// operators to build arbitrarily complex WHERE clauses.
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    /// A lookup on a field path (may use `__` notation for related fields).
    Filter {
        /// The field path.
        field: String,
        /// The lookup operation.
        lookup: Lookup,
    },
    /// A lookup on an arbitrary expression.
    Compare {
        /// The left-hand side.
        lhs: Expression,
        /// The lookup operation.
        lookup: Lookup,
    },
    /// `EXISTS (subquery)`.
    Exists(Subquery),
    /// Logical AND of multiple conditions.
    And(Vec<Q>),
    /// Logical OR of multiple conditions.
    Or(Vec<Q>),
    /// Logical negation of a condition.
    Not(Box<Q>),
}

impl Q {
    /// Creates a new filter Q object.
    pub fn filter(field: impl Into<String>, lookup: Lookup) -> Self {
        Self::Filter {
            field: field.into(),
            lookup,
        }
    }

    /// Creates a lookup on an expression rather than a field path.
    pub const fn compare(lhs: Expression, lookup: Lookup) -> Self {
        Self::Compare { lhs, lookup }
    }

    /// Creates an `EXISTS` test.
    pub const fn exists(subquery: Subquery) -> Self {
        Self::Exists(subquery)
    }

    /// Returns `true` if this is an empty AND/OR (no constraint at all).
    pub fn is_empty(&self) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => children.is_empty(),
            _ => false,
        }
    }
}

impl ops::BitAnd for Q {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            // Flatten nested ANDs
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (other, Self::And(mut right)) => {
                right.insert(0, other);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }
}

impl ops::BitOr for Q {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            // Flatten nested ORs
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (other, Self::Or(mut right)) => {
                right.insert(0, other);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }
}

impl ops::Not for Q {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}
