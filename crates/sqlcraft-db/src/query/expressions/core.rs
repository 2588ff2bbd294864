//! Query expressions, aggregates, and F-objects.
//!
//! An [`Expression`] is anything that produces a value inside a query: a
//! field reference, a literal, a function call, an aggregate, arithmetic, or
//! a nested subquery. Callers build *unresolved* expressions (`F("customer__country")`,
//! [`Expression::entity`]); the descriptor resolves field paths against the
//! model registry when the expression is attached, replacing them with
//! alias-qualified [`Expression::Col`] / [`Expression::AllColumns`] nodes.
//!
//! # Examples
//!
//! ```
//! use sqlcraft_db::query::expressions::{AggregateFunc, Expression};
//!
//! // F("total") * 1.2
//! let gross = Expression::f("total") * Expression::value(1.2);
//!
//! // COUNT(DISTINCT customer)
//! let buyers = Expression::aggregate_distinct(AggregateFunc::Count, Expression::f("customer"));
//! assert!(buyers.contains_aggregate());
//! assert!(!gross.contains_aggregate());
//! ```

use std::ops;

use super::subquery::Subquery;
use crate::value::Value;

/// A query expression that produces a value in the context of a SQL query.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// An unresolved field path (`"customer__country"`) or projection alias.
    F(String),
    /// A resolved column: table alias plus column name.
    Col {
        /// The alias of the table the column belongs to.
        alias: String,
        /// The physical column name.
        column: String,
    },
    /// A reference to a projection by its output alias.
    Ref(String),
    /// Every column of the entity reached by a relationship path (`""` is the base entity).
    Entity(String),
    /// Every column of the table behind a resolved alias.
    AllColumns(String),
    /// A literal value, always bound as a parameter.
    Value(Value),
    /// Constant SQL text emitted verbatim. Never build this from user input.
    Raw(String),
    /// A database function call.
    Func {
        /// Function name (e.g., "COALESCE", "UPPER").
        name: String,
        /// Function arguments.
        args: Vec<Expression>,
    },
    /// An aggregate function.
    Aggregate {
        /// The aggregate operation.
        func: AggregateFunc,
        /// The expression being aggregated.
        field: Box<Expression>,
        /// Whether to apply DISTINCT.
        distinct: bool,
    },
    /// `*`, only meaningful as the argument of `COUNT`.
    Star,
    /// A scalar subquery producing a single column.
    Subquery(Subquery),
    /// An `EXISTS (...)` test.
    Exists(Subquery),
    /// A field of the enclosing query, used inside a subquery.
    OuterRef(String),
    /// Addition.
    Add(Box<Expression>, Box<Expression>),
    /// Subtraction.
    Sub(Box<Expression>, Box<Expression>),
    /// Multiplication.
    Mul(Box<Expression>, Box<Expression>),
    /// Division.
    Div(Box<Expression>, Box<Expression>),
}

/// Aggregate function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    /// COUNT.
    Count,
    /// SUM.
    Sum,
    /// AVG.
    Avg,
    /// MIN.
    Min,
    /// MAX.
    Max,
}

impl AggregateFunc {
    /// Returns the SQL function name for this aggregate.
    pub const fn sql_name(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

impl Expression {
    /// Creates an F-expression referencing a field path or projection alias.
    pub fn f(path: impl Into<String>) -> Self {
        Self::F(path.into())
    }

    /// Creates a resolved column reference.
    pub fn col(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Col {
            alias: alias.into(),
            column: column.into(),
        }
    }

    /// Creates a literal value expression.
    pub fn value(v: impl Into<Value>) -> Self {
        Self::Value(v.into())
    }

    /// Creates constant SQL text, emitted verbatim.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::Raw(sql.into())
    }

    /// Projects every column of the entity reached by `path`.
    pub fn entity(path: impl Into<String>) -> Self {
        Self::Entity(path.into())
    }

    /// Creates a function call expression.
    pub fn func(name: impl Into<String>, args: Vec<Self>) -> Self {
        Self::Func {
            name: name.into(),
            args,
        }
    }

    /// Creates an aggregate expression.
    pub fn aggregate(func: AggregateFunc, field: Self) -> Self {
        Self::Aggregate {
            func,
            field: Box::new(field),
            distinct: false,
        }
    }

    /// Creates an aggregate with DISTINCT.
    pub fn aggregate_distinct(func: AggregateFunc, field: Self) -> Self {
        Self::Aggregate {
            func,
            field: Box::new(field),
            distinct: true,
        }
    }

    /// `COUNT(*)`.
    pub fn count_all() -> Self {
        Self::aggregate(AggregateFunc::Count, Self::Star)
    }

    /// References a field of the enclosing query from inside a subquery.
    pub fn outer_ref(path: impl Into<String>) -> Self {
        Self::OuterRef(path.into())
    }

    /// Returns `true` if an aggregate appears anywhere in this expression.
    ///
    /// Subqueries are opaque: an aggregate inside one does not make the
    /// enclosing expression an aggregate.
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| found |= matches!(e, Self::Aggregate { .. }));
        found
    }

    /// Returns `true` if this expression expands to more than one column.
    pub const fn is_multi_column(&self) -> bool {
        matches!(self, Self::Entity(_) | Self::AllColumns(_))
    }

    /// Visits this expression and every nested expression, pre-order.
    ///
    /// Does not descend into subqueries.
    pub fn walk(&self, visit: &mut impl FnMut(&Self)) {
        visit(self);
        match self {
            Self::Func { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Self::Aggregate { field, .. } => field.walk(visit),
            Self::Add(l, r) | Self::Sub(l, r) | Self::Mul(l, r) | Self::Div(l, r) => {
                l.walk(visit);
                r.walk(visit);
            }
            _ => {}
        }
    }

    /// Rebuilds this expression bottom-up, replacing nodes through `f`.
    ///
    /// `f` sees each node after its children were mapped. Subqueries are
    /// left untouched.
    pub fn try_map<E>(self, f: &mut impl FnMut(Self) -> Result<Self, E>) -> Result<Self, E> {
        let mapped = match self {
            Self::Func { name, args } => {
                let mut mapped_args = Vec::with_capacity(args.len());
                for arg in args {
                    mapped_args.push(arg.try_map(f)?);
                }
                Self::Func {
                    name,
                    args: mapped_args,
                }
            }
            Self::Aggregate {
                func,
                field,
                distinct,
            } => Self::Aggregate {
                func,
                field: Box::new(field.try_map(f)?),
                distinct,
            },
            Self::Add(l, r) => Self::Add(Box::new(l.try_map(f)?), Box::new(r.try_map(f)?)),
            Self::Sub(l, r) => Self::Sub(Box::new(l.try_map(f)?), Box::new(r.try_map(f)?)),
            Self::Mul(l, r) => Self::Mul(Box::new(l.try_map(f)?), Box::new(r.try_map(f)?)),
            Self::Div(l, r) => Self::Div(Box::new(l.try_map(f)?), Box::new(r.try_map(f)?)),
            other => other,
        };
        f(mapped)
    }
}

impl From<Value> for Expression {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl ops::Add for Expression {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self::Add(Box::new(self), Box::new(rhs))
    }
}

impl ops::Sub for Expression {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self::Sub(Box::new(self), Box::new(rhs))
    }
}

impl ops::Mul for Expression {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self::Output {
        Self::Mul(Box::new(self), Box::new(rhs))
    }
}

impl ops::Div for Expression {
    type Output = Self;
    fn div(self, rhs: Self) -> Self::Output {
        Self::Div(Box::new(self), Box::new(rhs))
    }
}
