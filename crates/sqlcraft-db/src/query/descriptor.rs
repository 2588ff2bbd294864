//! The query descriptor.
//!
//! A [`Query`] is an immutable description of a SELECT statement: the base
//! entity, projections, the WHERE and HAVING condition trees, ordering,
//! grouping, the row window, DISTINCT and an optional set operation. Every
//! refinement takes `&self` and returns a new descriptor; the original is
//! never observably changed, so a descriptor can be shared across threads
//! and branched freely. Internally every component sits behind an `Arc` and
//! is copied only when a refinement actually touches it.
//!
//! Field paths (`"customer__region__name"`) are resolved as soon as they are
//! attached. Relationship segments allocate join aliases in the descriptor's
//! [`AliasMap`]; the resolved expression refers to those aliases directly.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use sqlcraft_db::fields::{FieldDef, FieldType};
//! # use sqlcraft_db::model::{ModelMeta, ModelRegistry};
//! use sqlcraft_db::query::{Lookup, Query, Q};
//!
//! # let mut registry = ModelRegistry::new();
//! # registry.register(ModelMeta::new("order", "order")
//! #     .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
//! #     .field(FieldDef::new("status", FieldType::CharField))).unwrap();
//! let base = Query::new(Arc::new(registry), "order")?;
//! let paid = base.filter(Q::filter("status", Lookup::exact("paid")))?;
//!
//! assert!(base.where_root().is_empty());
//! assert!(!paid.where_root().is_empty());
//! # Ok::<(), sqlcraft_core::QueryError>(())
//! ```

use std::sync::Arc;

use sqlcraft_core::{QueryError, QueryResult};

use crate::dialect::Combinator;
use crate::model::{ModelMeta, ModelRegistry};
use crate::query::expressions::{Expression, Subquery};
use crate::query::joins::{AliasMap, JoinContext, JoinType, PlannedJoin, TableSource};
use crate::query::lookups::{Lookup, Q};
use crate::query::where_node::{Connector, WhereNode};
use crate::value::Value;

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// The sorted expression.
    pub expression: Expression,
    /// Whether the sort is descending.
    pub descending: bool,
    /// `Some(true)` for NULLS FIRST, `Some(false)` for NULLS LAST.
    pub nulls_first: Option<bool>,
}

impl OrderBy {
    /// Creates a term sorted in `direction`.
    pub const fn new(expression: Expression, direction: Direction) -> Self {
        Self {
            expression,
            descending: matches!(direction, Direction::Desc),
            nulls_first: None,
        }
    }

    /// Ascending order.
    pub const fn asc(expression: Expression) -> Self {
        Self::new(expression, Direction::Asc)
    }

    /// Descending order.
    pub const fn desc(expression: Expression) -> Self {
        Self::new(expression, Direction::Desc)
    }

    /// Parses `"-field"` (descending) or `"field"` (ascending).
    pub fn parse(spec: &str) -> Self {
        spec.strip_prefix('-').map_or_else(
            || Self::asc(Expression::f(spec)),
            |name| Self::desc(Expression::f(name)),
        )
    }

    /// Sorts NULLs before every other value.
    #[must_use]
    pub fn nulls_first(mut self) -> Self {
        self.nulls_first = Some(true);
        self
    }

    /// Sorts NULLs after every other value.
    #[must_use]
    pub fn nulls_last(mut self) -> Self {
        self.nulls_first = Some(false);
        self
    }

    /// The same term with direction and NULL placement flipped.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            expression: self.expression.clone(),
            descending: !self.descending,
            nulls_first: self.nulls_first.map(|first| !first),
        }
    }
}

/// One SELECT list item.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// The projected expression, resolved.
    pub expression: Expression,
    /// The output alias, if any.
    pub alias: Option<String>,
}

/// DISTINCT mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Distinct {
    /// No DISTINCT.
    #[default]
    Off,
    /// `SELECT DISTINCT`.
    All,
    /// `SELECT DISTINCT ON (...)`.
    On(Vec<Expression>),
}

/// A set operation over sibling descriptors.
#[derive(Debug, Clone)]
pub struct Combination {
    /// The operator joining the members.
    pub kind: Combinator,
    /// The members, in order.
    pub parts: Vec<Query>,
}

/// The finalized join plan and output shape of a descriptor.
///
/// Computed once per compilation by [`Query::finalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    joins: Vec<PlannedJoin>,
    output_columns: Vec<String>,
    has_aggregate: bool,
}

impl QueryPlan {
    /// Every alias with its effective join kind, in creation order.
    pub fn joins(&self) -> &[PlannedJoin] {
        &self.joins
    }

    /// Looks up the planned join for `alias`.
    pub fn join(&self, alias: &str) -> Option<&PlannedJoin> {
        self.joins.iter().find(|j| j.alias == alias)
    }

    /// Output column names, in SELECT order.
    pub fn output_columns(&self) -> &[String] {
        &self.output_columns
    }

    /// Whether any projection aggregates.
    pub const fn has_aggregate(&self) -> bool {
        self.has_aggregate
    }
}

enum FieldTarget {
    Column { column: String, null: bool },
    Reverse,
}

/// An immutable SELECT statement descriptor.
#[derive(Debug, Clone)]
pub struct Query {
    registry: Arc<ModelRegistry>,
    alias_map: Arc<AliasMap>,
    projections: Arc<Vec<Projection>>,
    where_root: Arc<WhereNode>,
    having_root: Arc<WhereNode>,
    ordering: Arc<Vec<OrderBy>>,
    default_ordering: bool,
    standard_ordering: bool,
    grouping: Option<Arc<Vec<Expression>>>,
    limit: Option<u64>,
    offset: Option<u64>,
    distinct: Distinct,
    combination: Option<Arc<Combination>>,
}

impl Query {
    /// Creates a descriptor selecting every row of `model`.
    ///
    /// The base alias is the model's table name.
    pub fn new(registry: Arc<ModelRegistry>, model: &str) -> QueryResult<Self> {
        let table = registry.get(model)?.db_table.clone();
        let alias_map = AliasMap::new(
            table.clone(),
            TableSource::Table(table),
            Some(model.to_string()),
        );
        Ok(Self::with_alias_map(registry, alias_map, true))
    }

    /// Creates a descriptor whose base is the derived table `(subquery) alias`.
    pub fn from_subquery(subquery: Subquery, alias: impl Into<String>) -> Self {
        let registry = Arc::clone(&subquery.query().registry);
        let alias_map = AliasMap::new(alias, TableSource::Subquery(subquery), None);
        Self::with_alias_map(registry, alias_map, false)
    }

    fn with_alias_map(
        registry: Arc<ModelRegistry>,
        alias_map: AliasMap,
        default_ordering: bool,
    ) -> Self {
        Self {
            registry,
            alias_map: Arc::new(alias_map),
            projections: Arc::new(Vec::new()),
            where_root: Arc::new(WhereNode::empty()),
            having_root: Arc::new(WhereNode::empty()),
            ordering: Arc::new(Vec::new()),
            default_ordering,
            standard_ordering: true,
            grouping: None,
            limit: None,
            offset: None,
            distinct: Distinct::Off,
            combination: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// The model registry the descriptor resolves paths against.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// The base model, `None` for a derived table.
    pub fn model(&self) -> Option<&str> {
        self.alias_map.base().model.as_deref()
    }

    /// The base alias.
    pub fn base_alias(&self) -> &str {
        self.alias_map.base_alias()
    }

    /// The alias map.
    pub fn alias_map(&self) -> &AliasMap {
        &self.alias_map
    }

    /// Projections in SELECT order; empty means the default projection.
    pub fn projections(&self) -> &[Projection] {
        &self.projections
    }

    /// The WHERE condition tree.
    pub fn where_root(&self) -> &WhereNode {
        &self.where_root
    }

    /// The HAVING condition tree.
    pub fn having_root(&self) -> &WhereNode {
        &self.having_root
    }

    /// Explicit ordering terms.
    pub fn ordering(&self) -> &[OrderBy] {
        &self.ordering
    }

    /// Whether the model's default ordering applies when nothing else does.
    pub const fn uses_default_ordering(&self) -> bool {
        self.default_ordering
    }

    /// `false` after an odd number of [`reverse_ordering`](Self::reverse_ordering) calls.
    pub const fn is_standard_ordering(&self) -> bool {
        self.standard_ordering
    }

    /// GROUP BY expressions, if set.
    pub fn grouping(&self) -> Option<&[Expression]> {
        self.grouping.as_deref().map(Vec::as_slice)
    }

    /// The row limit.
    pub const fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// The row offset.
    pub const fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Whether a limit or an offset is set.
    pub const fn is_sliced(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }

    /// The DISTINCT mode.
    pub const fn distinct(&self) -> &Distinct {
        &self.distinct
    }

    /// The set operation, if this is a combined query.
    pub fn combination(&self) -> Option<&Combination> {
        self.combination.as_deref()
    }

    /// Whether compiling this descriptor is known to yield no rows.
    ///
    /// Agrees with the compiler's empty-result signal: a union is empty when
    /// every member is, an intersection when any member is, and a difference
    /// when its first member is.
    pub fn is_empty(&self) -> bool {
        if let Some(c) = &self.combination {
            return match c.kind {
                kind if kind.is_union() => c.parts.iter().all(Self::is_empty),
                Combinator::Except => c.parts.first().is_some_and(Self::is_empty),
                _ => c.parts.iter().any(Self::is_empty),
            };
        }
        if let TableSource::Subquery(source) = &self.alias_map.base().source {
            if source.query().is_empty() {
                return true;
            }
        }
        self.where_root.matches_nothing() || self.having_root.matches_nothing()
    }

    // ── Conditions ───────────────────────────────────────────────────

    /// Narrows the query: `WHERE ... AND q`.
    pub fn filter(&self, q: Q) -> QueryResult<Self> {
        self.add_predicate(q, Connector::And)
    }

    /// Widens the query: `WHERE ... OR q`.
    pub fn or_filter(&self, q: Q) -> QueryResult<Self> {
        self.add_predicate(q, Connector::Or)
    }

    /// Excludes rows matching `q`: `WHERE ... AND NOT (q)`.
    pub fn exclude(&self, q: Q) -> QueryResult<Self> {
        self.add_predicate(!q, Connector::And)
    }

    /// Merges `q` into the WHERE tree under `connector`.
    ///
    /// Conditions on aggregates go to HAVING instead.
    pub fn add_predicate(&self, q: Q, connector: Connector) -> QueryResult<Self> {
        self.check_filterable()?;
        if q.is_empty() {
            return Ok(self.clone());
        }
        let mut next = self.clone();
        let widening = connector == Connector::Or && !self.where_root.is_empty();
        let context = JoinContext {
            in_disjunction: widening,
            negated: false,
        };
        let node = next.build_condition(q, context)?;

        if node.contains_aggregate() {
            if connector == Connector::Or {
                return Err(QueryError::NotSupported(
                    "Cannot OR a condition on an aggregate with the WHERE clause".into(),
                ));
            }
            next.having_root = WhereNode::merge(&next.having_root, node, Connector::And);
            return Ok(next);
        }

        if widening {
            let mut aliases = Vec::new();
            self.where_root.walk_expressions(&mut |e| collect_aliases(e, &mut aliases));
            let map = Arc::make_mut(&mut next.alias_map);
            for alias in &aliases {
                map.mark_outer_context(alias);
            }
        }
        next.where_root = WhereNode::merge(&next.where_root, node, connector);
        tracing::trace!(
            table = next.base_alias(),
            connector = connector.sql_keyword().trim(),
            "Merged predicate"
        );
        Ok(next)
    }

    /// Adds a HAVING condition.
    ///
    /// Names resolve to projection aliases first, then to field paths.
    pub fn having(&self, q: Q) -> QueryResult<Self> {
        self.check_filterable()?;
        if q.is_empty() {
            return Ok(self.clone());
        }
        let mut next = self.clone();
        let node = next.build_condition(q, JoinContext::default())?;
        next.having_root = WhereNode::merge(&next.having_root, node, Connector::And);
        Ok(next)
    }

    /// Marks the query as matching no rows.
    ///
    /// On a combined query every member is marked.
    #[must_use]
    pub fn none(&self) -> Self {
        let mut next = self.clone();
        next.set_empty();
        next
    }

    fn set_empty(&mut self) {
        if let Some(combination) = &self.combination {
            let parts = combination.parts.iter().map(Self::none).collect();
            self.combination = Some(Arc::new(Combination {
                kind: combination.kind,
                parts,
            }));
        } else {
            self.where_root = WhereNode::merge(
                &self.where_root,
                Arc::new(WhereNode::Nothing),
                Connector::And,
            );
        }
    }

    fn check_filterable(&self) -> QueryResult<()> {
        self.ensure_not_combined("filter")?;
        if self.is_sliced() {
            return Err(QueryError::NotSupported(
                "Cannot filter a query once a slice has been taken".into(),
            ));
        }
        Ok(())
    }

    fn ensure_not_combined(&self, operation: &str) -> QueryResult<()> {
        if self.combination.is_some() {
            return Err(QueryError::NotSupported(format!(
                "Calling {operation}() after a set operation is not supported"
            )));
        }
        Ok(())
    }

    fn ensure_not_sliced(&self, operation: &str) -> QueryResult<()> {
        if self.is_sliced() {
            return Err(QueryError::NotSupported(format!(
                "Cannot {operation} a query once a slice has been taken"
            )));
        }
        Ok(())
    }

    // ── Projections ──────────────────────────────────────────────────

    /// Appends a SELECT list item.
    ///
    /// Fails with `AmbiguousAlias` when `alias` is already a projection
    /// alias or a field of the base model.
    pub fn add_projection(&self, expression: Expression, alias: Option<&str>) -> QueryResult<Self> {
        self.ensure_not_combined("add_projection")?;
        if let Some(alias) = alias {
            if expression.is_multi_column() {
                return Err(QueryError::NotSupported(format!(
                    "Cannot alias the multi-column projection '{alias}'"
                )));
            }
            self.check_alias_free(alias)?;
        }
        let mut next = self.clone();
        let expression = next.resolve_expression(expression, JoinContext::default())?;
        Arc::make_mut(&mut next.projections).push(Projection {
            expression,
            alias: alias.map(str::to_string),
        });
        Ok(next)
    }

    /// Adds a named computed column next to the current projection.
    ///
    /// When nothing is projected yet, the base entity's columns are kept.
    pub fn annotate(&self, alias: &str, expression: Expression) -> QueryResult<Self> {
        let base = if self.projections.is_empty() && self.combination.is_none() {
            self.add_projection(Expression::entity(""), None)?
        } else {
            self.clone()
        };
        base.add_projection(expression, Some(alias))
    }

    /// Replaces the projection with the given field paths or aliases.
    pub fn values(&self, fields: &[&str]) -> QueryResult<Self> {
        self.ensure_not_combined("values")?;
        let mut next = self.clone();
        let previous = std::mem::take(Arc::make_mut(&mut next.projections));
        let mut projected = Vec::with_capacity(fields.len());
        for field in fields {
            if let Some(existing) = previous.iter().find(|p| p.alias.as_deref() == Some(*field)) {
                next.ref_columns(&existing.expression);
                projected.push(existing.clone());
            } else {
                let (expression, _) = next.resolve_field(field, JoinContext::default())?;
                projected.push(Projection {
                    expression,
                    alias: None,
                });
            }
        }
        for projection in &previous {
            next.unref_columns(&projection.expression);
        }
        next.projections = Arc::new(projected);
        Ok(next)
    }

    fn check_alias_free(&self, alias: &str) -> QueryResult<()> {
        let taken = self.projection_by_alias(alias).is_some()
            || self
                .model()
                .and_then(|m| self.registry.get(m).ok())
                .is_some_and(|meta| meta.get_field(alias).is_some());
        if taken {
            return Err(QueryError::AmbiguousAlias(alias.to_string()));
        }
        Ok(())
    }

    fn projection_by_alias(&self, alias: &str) -> Option<&Projection> {
        self.projections
            .iter()
            .find(|p| p.alias.as_deref() == Some(alias))
    }

    fn release_projections(&mut self) {
        let previous = std::mem::take(Arc::make_mut(&mut self.projections));
        for projection in &previous {
            self.unref_columns(&projection.expression);
        }
    }

    // ── Ordering and grouping ────────────────────────────────────────

    /// Appends an ORDER BY term.
    pub fn add_ordering(&self, expression: Expression, direction: Direction) -> QueryResult<Self> {
        self.add_order_by(OrderBy::new(expression, direction))
    }

    /// Appends a fully specified ORDER BY term.
    ///
    /// A bare name matching a projection alias sorts by that output column.
    /// Combined queries only accept output column names.
    pub fn add_order_by(&self, order: OrderBy) -> QueryResult<Self> {
        self.ensure_not_sliced("reorder")?;
        let mut next = self.clone();
        let expression = match order.expression {
            Expression::F(name) if self.combination.is_some() => {
                if !self.output_columns().contains(&name) {
                    return Err(QueryError::field_error("combined query", name));
                }
                Expression::Ref(name)
            }
            Expression::F(name) if self.projection_by_alias(&name).is_some() => {
                Expression::Ref(name)
            }
            _ if self.combination.is_some() => {
                return Err(QueryError::NotSupported(
                    "ORDER BY on a combined query accepts output column names only".into(),
                ));
            }
            other => next.resolve_expression(other, JoinContext::default())?,
        };
        Arc::make_mut(&mut next.ordering).push(OrderBy {
            expression,
            ..order
        });
        Ok(next)
    }

    /// Replaces the ordering with `["-created_at", "status"]`-style terms.
    ///
    /// An empty list also disables the model's default ordering.
    pub fn order_by(&self, specs: &[&str]) -> QueryResult<Self> {
        self.ensure_not_sliced("reorder")?;
        let mut next = self.clone();
        next.release_ordering();
        if specs.is_empty() {
            next.default_ordering = false;
        }
        for spec in specs {
            next = next.add_order_by(OrderBy::parse(spec))?;
        }
        Ok(next)
    }

    /// Drops every ordering term, the model default included.
    #[must_use]
    pub fn clear_ordering(&self) -> Self {
        let mut next = self.clone();
        next.release_ordering();
        next.default_ordering = false;
        next
    }

    /// Flips the direction of the effective ordering.
    pub fn reverse_ordering(&self) -> QueryResult<Self> {
        self.ensure_not_sliced("reverse")?;
        let mut next = self.clone();
        next.standard_ordering = !next.standard_ordering;
        Ok(next)
    }

    fn release_ordering(&mut self) {
        let previous = std::mem::take(Arc::make_mut(&mut self.ordering));
        for order in &previous {
            self.unref_columns(&order.expression);
        }
    }

    /// Sets the GROUP BY expressions, replacing any previous grouping.
    pub fn set_grouping(&self, expressions: Vec<Expression>) -> QueryResult<Self> {
        self.ensure_not_combined("set_grouping")?;
        let mut next = self.clone();
        if let Some(previous) = next.grouping.take() {
            for expression in previous.iter() {
                next.unref_columns(expression);
            }
        }
        let mut resolved = Vec::with_capacity(expressions.len());
        for expression in expressions {
            resolved.push(next.resolve_expression(expression, JoinContext::default())?);
        }
        next.grouping = Some(Arc::new(resolved));
        Ok(next)
    }

    /// The model's default ordering, when it applies to this descriptor.
    ///
    /// Only local fields of the base model take part.
    pub(crate) fn default_ordering_terms(&self) -> QueryResult<Vec<OrderBy>> {
        if !self.default_ordering
            || !self.ordering.is_empty()
            || self.grouping.is_some()
            || self.combination.is_some()
        {
            return Ok(Vec::new());
        }
        let Some(model) = self.model() else {
            return Ok(Vec::new());
        };
        let meta = self.registry.get(model)?;
        let mut terms = Vec::with_capacity(meta.ordering.len());
        for spec in &meta.ordering {
            let (descending, name) = spec
                .strip_prefix('-')
                .map_or((false, spec.as_str()), |name| (true, name));
            let field = meta
                .get_field(name)
                .ok_or_else(|| QueryError::field_error(model, name))?;
            let expression = Expression::col(self.base_alias(), field.column.clone());
            terms.push(OrderBy {
                expression,
                descending,
                nulls_first: None,
            });
        }
        Ok(terms)
    }

    // ── Window ───────────────────────────────────────────────────────

    /// Sets the maximum number of rows.
    pub fn set_limit(&self, n: i64) -> QueryResult<Self> {
        let n = u64::try_from(n)
            .map_err(|_| QueryError::InvalidRange(format!("Negative limit {n} is not allowed")))?;
        let mut next = self.clone();
        next.limit = Some(n);
        Ok(next)
    }

    /// Sets the number of rows to skip.
    pub fn set_offset(&self, n: i64) -> QueryResult<Self> {
        let n = u64::try_from(n)
            .map_err(|_| QueryError::InvalidRange(format!("Negative offset {n} is not allowed")))?;
        let mut next = self.clone();
        next.offset = (n > 0).then_some(n);
        Ok(next)
    }

    /// Restricts the result to rows `start..stop` of the current window.
    ///
    /// Slices compose: slicing a sliced query narrows the existing window.
    /// An empty window marks the query as matching no rows.
    pub fn slice(&self, start: i64, stop: Option<i64>) -> QueryResult<Self> {
        let negative = || QueryError::InvalidRange("Negative indexing is not supported".into());
        let start = u64::try_from(start).map_err(|_| negative())?;
        let stop = stop
            .map(u64::try_from)
            .transpose()
            .map_err(|_| negative())?;
        let mut next = self.clone();
        next.apply_window(start, stop);
        Ok(next)
    }

    /// Removes the limit and the offset.
    #[must_use]
    pub fn clear_limits(&self) -> Self {
        let mut next = self.clone();
        next.limit = None;
        next.offset = None;
        next
    }

    fn apply_window(&mut self, low: u64, high: Option<u64>) {
        let current_low = self.offset.unwrap_or(0);
        let current_high = self.limit.map(|l| current_low.saturating_add(l));

        let new_high = match (high, current_high) {
            (Some(h), Some(ch)) => Some(ch.min(current_low.saturating_add(h))),
            (Some(h), None) => Some(current_low.saturating_add(h)),
            (None, ch) => ch,
        };
        let new_low = {
            let candidate = current_low.saturating_add(low);
            new_high.map_or(candidate, |h| h.min(candidate))
        };

        self.offset = (new_low > 0).then_some(new_low);
        self.limit = new_high.map(|h| h - new_low);
        if self.limit == Some(0) {
            self.set_empty();
        }
    }

    // ── DISTINCT ─────────────────────────────────────────────────────

    /// Turns plain DISTINCT on or off.
    pub fn set_distinct(&self, distinct: bool) -> QueryResult<Self> {
        self.ensure_not_combined("distinct")?;
        let mut next = self.clone();
        next.distinct = if distinct { Distinct::All } else { Distinct::Off };
        Ok(next)
    }

    /// `DISTINCT ON (fields)`; an empty list means plain DISTINCT.
    pub fn set_distinct_on(&self, fields: &[&str]) -> QueryResult<Self> {
        self.ensure_not_combined("distinct")?;
        self.ensure_not_sliced("create distinct fields for")?;
        let mut next = self.clone();
        if fields.is_empty() {
            next.distinct = Distinct::All;
            return Ok(next);
        }
        let mut expressions = Vec::with_capacity(fields.len());
        for field in fields {
            expressions.push(next.resolve_field(field, JoinContext::default())?.0);
        }
        next.distinct = Distinct::On(expressions);
        Ok(next)
    }

    // ── Set operations ───────────────────────────────────────────────

    /// Combines this query with `other` under `kind`.
    ///
    /// Both sides must produce the same number of columns. Members that are
    /// themselves combined with the same operator, and carry no ordering or
    /// window of their own, are flattened into the new combination.
    pub fn combine_with(&self, other: &Self, kind: Combinator) -> QueryResult<Self> {
        let left = self.output_columns().len();
        let right = other.output_columns().len();
        if left != right {
            return Err(QueryError::IncompatibleShape(format!(
                "{kind} members must produce the same number of columns ({left} != {right})"
            )));
        }

        let mut parts = Vec::new();
        for member in [self, other] {
            match &member.combination {
                Some(c) if c.kind == kind && member.ordering.is_empty() && !member.is_sliced() => {
                    parts.extend(c.parts.iter().cloned());
                }
                _ => parts.push(member.clone()),
            }
        }

        let base = self.alias_map.base();
        let alias_map = AliasMap::new(base.alias.clone(), base.source.clone(), base.model.clone());
        let mut combined = Self::with_alias_map(Arc::clone(&self.registry), alias_map, false);
        combined.combination = Some(Arc::new(Combination { kind, parts }));
        tracing::trace!(kind = %kind, "Combined queries");
        Ok(combined)
    }

    /// `self UNION other`.
    pub fn union(&self, other: &Self) -> QueryResult<Self> {
        self.combine_with(other, Combinator::Union)
    }

    /// `self UNION ALL other`.
    pub fn union_all(&self, other: &Self) -> QueryResult<Self> {
        self.combine_with(other, Combinator::UnionAll)
    }

    /// `self INTERSECT other`.
    pub fn intersection(&self, other: &Self) -> QueryResult<Self> {
        self.combine_with(other, Combinator::Intersect)
    }

    /// `self EXCEPT other`.
    pub fn difference(&self, other: &Self) -> QueryResult<Self> {
        self.combine_with(other, Combinator::Except)
    }

    // ── Derivatives ──────────────────────────────────────────────────

    /// A read-only view of this query for embedding in another one.
    pub fn as_subquery(&self) -> Subquery {
        Subquery::new(self.clone())
    }

    /// The query that tests whether this one returns any row.
    ///
    /// Ordering is dropped, the projection becomes the constant `1` and the
    /// window is narrowed to a single row.
    #[must_use]
    pub fn exists_query(&self) -> Self {
        let needs_wrap =
            self.combination.is_some() || (self.distinct != Distinct::Off && self.is_sliced());
        let mut q = if needs_wrap {
            Self::from_subquery(self.as_subquery(), "subquery")
        } else {
            self.clone()
        };
        q.release_ordering();
        q.default_ordering = false;
        if q.distinct == Distinct::Off && q.grouping.is_none() {
            q.release_projections();
            Arc::make_mut(&mut q.projections).push(Projection {
                expression: Expression::raw("1"),
                alias: Some("a".into()),
            });
        }
        q.apply_window(0, Some(1));
        q
    }

    /// The query that counts the rows of this one, as `"__count"`.
    ///
    /// Combined, sliced, distinct and grouped queries are counted through a
    /// derived table.
    #[must_use]
    pub fn count_query(&self) -> Self {
        let needs_wrap = self.combination.is_some()
            || self.is_sliced()
            || self.distinct != Distinct::Off
            || self.grouping.is_some();
        let mut q = if needs_wrap {
            let mut inner = self.clone();
            if !inner.is_sliced() {
                inner.release_ordering();
                inner.default_ordering = false;
            }
            Self::from_subquery(inner.as_subquery(), "subquery")
        } else {
            let mut q = self.clone();
            q.release_ordering();
            q.release_projections();
            q
        };
        q.default_ordering = false;
        Arc::make_mut(&mut q.projections).push(Projection {
            expression: Expression::count_all(),
            alias: Some("__count".into()),
        });
        q
    }

    // ── Planning ─────────────────────────────────────────────────────

    /// Output column names in SELECT order.
    ///
    /// Unnamed computed columns and duplicate names become `col{n}`, `n`
    /// being the 1-based position.
    pub fn output_columns(&self) -> Vec<String> {
        if let Some(combination) = &self.combination {
            return combination
                .parts
                .first()
                .map(Self::output_columns)
                .unwrap_or_default();
        }
        if self.projections.is_empty() {
            return self.columns_of(self.base_alias());
        }
        let mut names: Vec<String> = Vec::new();
        for projection in self.projections.iter() {
            let candidates = match (&projection.alias, &projection.expression) {
                (Some(alias), _) => vec![alias.clone()],
                (None, Expression::Col { column, .. }) => vec![column.clone()],
                (None, Expression::AllColumns(alias)) => self.columns_of(alias),
                (None, Expression::Ref(name)) => vec![name.clone()],
                (None, _) => vec![String::new()],
            };
            for name in candidates {
                let position = names.len() + 1;
                if name.is_empty() || names.contains(&name) {
                    names.push(format!("col{position}"));
                } else {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Column names of the table behind `alias`.
    pub fn columns_of(&self, alias: &str) -> Vec<String> {
        let Some(entry) = self.alias_map.get(alias) else {
            return Vec::new();
        };
        match (&entry.model, &entry.source) {
            (Some(model), _) => self
                .registry
                .get(model)
                .map(ModelMeta::column_names)
                .unwrap_or_default(),
            (None, TableSource::Subquery(subquery)) => subquery.query().output_columns(),
            (None, TableSource::Table(_)) => Vec::new(),
        }
    }

    /// Field paths referenced through `OuterRef`, in first-use order.
    ///
    /// Nested subqueries are not searched.
    pub fn outer_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = Vec::new();
        let mut visit = |e: &Expression| {
            if let Expression::OuterRef(path) = e {
                if !refs.contains(path) {
                    refs.push(path.clone());
                }
            }
        };
        for projection in self.projections.iter() {
            projection.expression.walk(&mut visit);
        }
        self.where_root.walk_expressions(&mut visit);
        self.having_root.walk_expressions(&mut visit);
        for order in self.ordering.iter() {
            order.expression.walk(&mut visit);
        }
        if let Some(grouping) = &self.grouping {
            for expression in grouping.iter() {
                expression.walk(&mut visit);
            }
        }
        refs
    }

    /// Computes the effective join plan and output shape.
    pub fn finalize(&self) -> QueryPlan {
        QueryPlan {
            joins: self.alias_map.plan(),
            output_columns: self.output_columns(),
            has_aggregate: self
                .projections
                .iter()
                .any(|p| p.expression.contains_aggregate()),
        }
    }

    /// Finds the column `path` names using only joins that already exist.
    ///
    /// Used to resolve outer references while compiling a subquery.
    pub(crate) fn locate_field(&self, path: &str) -> QueryResult<Expression> {
        if let Some(projection) = self.projection_by_alias(path) {
            return Ok(projection.expression.clone());
        }
        let (last, relations) = split_path(path);
        let mut alias = self.base_alias().to_string();
        for segment in relations {
            alias = self
                .alias_map
                .child(&alias, segment)
                .map(|e| e.alias.clone())
                .ok_or_else(|| QueryError::unknown_relationship(alias.clone(), segment))?;
        }
        match self.target_on(&alias, last)? {
            FieldTarget::Column { column, .. } => Ok(Expression::Col { alias, column }),
            FieldTarget::Reverse => {
                let joined = self
                    .alias_map
                    .child(&alias, last)
                    .map(|e| e.alias.clone())
                    .ok_or_else(|| QueryError::unknown_relationship(alias.clone(), last))?;
                let column = self.pk_column_of(&joined)?;
                Ok(Expression::Col {
                    alias: joined,
                    column,
                })
            }
        }
    }

    // ── Resolution ───────────────────────────────────────────────────

    fn resolve_field(&mut self, path: &str, context: JoinContext) -> QueryResult<(Expression, bool)> {
        if let Some(projection) = self.projection_by_alias(path) {
            let expression = projection.expression.clone();
            self.ref_columns(&expression);
            return Ok((expression, false));
        }

        let (last, relations) = split_path(path);
        let base = self.base_alias().to_string();
        let alias = if relations.is_empty() {
            base
        } else {
            Arc::make_mut(&mut self.alias_map).resolve_path(&self.registry, &base, &relations, context)?
        };

        let (alias, column, null) = match self.target_on(&alias, last)? {
            FieldTarget::Column { column, null } => (alias, column, null),
            FieldTarget::Reverse => {
                let joined = Arc::make_mut(&mut self.alias_map).resolve_path(
                    &self.registry,
                    &alias,
                    &[last],
                    context,
                )?;
                let column = self.pk_column_of(&joined)?;
                (joined, column, true)
            }
        };

        let outer = self
            .alias_map
            .get(&alias)
            .is_some_and(|e| e.join_type == JoinType::LeftOuter);
        Arc::make_mut(&mut self.alias_map).ref_chain(&alias);
        Ok((Expression::Col { alias, column }, null || outer))
    }

    fn target_on(&self, alias: &str, name: &str) -> QueryResult<FieldTarget> {
        let entry = self
            .alias_map
            .get(alias)
            .ok_or_else(|| QueryError::field_error(alias, name))?;
        match &entry.model {
            Some(model) => {
                let meta = self.registry.get(model)?;
                let field = if name == "pk" {
                    meta.pk_field()
                } else {
                    meta.get_field(name)
                };
                if let Some(field) = field {
                    Ok(FieldTarget::Column {
                        column: field.column.clone(),
                        null: field.null,
                    })
                } else if self.registry.has_reverse(model, name) {
                    Ok(FieldTarget::Reverse)
                } else {
                    Err(QueryError::field_error(model.clone(), name))
                }
            }
            None if self.columns_of(alias).iter().any(|c| c == name) => Ok(FieldTarget::Column {
                column: name.to_string(),
                null: true,
            }),
            None => Err(QueryError::field_error(alias, name)),
        }
    }

    fn pk_column_of(&self, alias: &str) -> QueryResult<String> {
        let model = self
            .alias_map
            .get(alias)
            .and_then(|e| e.model.as_deref())
            .ok_or_else(|| QueryError::field_error(alias, "pk"))?;
        self.registry
            .get(model)?
            .pk_field()
            .map(|f| f.column.clone())
            .ok_or_else(|| QueryError::field_error(model, "pk"))
    }

    fn resolve_entity(&mut self, path: &str, context: JoinContext) -> QueryResult<Expression> {
        let base = self.base_alias().to_string();
        let alias = if path.is_empty() {
            base
        } else {
            let segments: Vec<&str> = path.split("__").collect();
            Arc::make_mut(&mut self.alias_map).resolve_path(&self.registry, &base, &segments, context)?
        };
        Arc::make_mut(&mut self.alias_map).ref_chain(&alias);
        Ok(Expression::AllColumns(alias))
    }

    fn resolve_expression(&mut self, expression: Expression, context: JoinContext) -> QueryResult<Expression> {
        expression.try_map(&mut |e| match e {
            Expression::F(path) => self.resolve_field(&path, context).map(|(e, _)| e),
            Expression::Entity(path) => self.resolve_entity(&path, context),
            Expression::Subquery(ref subquery) | Expression::Exists(ref subquery) => {
                self.attach_subquery(subquery, context)?;
                Ok(e)
            }
            other => Ok(other),
        })
    }

    fn attach_subquery(&mut self, subquery: &Subquery, context: JoinContext) -> QueryResult<()> {
        for path in subquery.query().outer_refs() {
            self.resolve_field(&path, context)?;
        }
        Ok(())
    }

    fn ref_columns(&mut self, expression: &Expression) {
        let mut aliases = Vec::new();
        expression.walk(&mut |e| collect_aliases(e, &mut aliases));
        let map = Arc::make_mut(&mut self.alias_map);
        for alias in &aliases {
            map.ref_chain(alias);
        }
    }

    fn unref_columns(&mut self, expression: &Expression) {
        let mut aliases = Vec::new();
        expression.walk(&mut |e| collect_aliases(e, &mut aliases));
        let map = Arc::make_mut(&mut self.alias_map);
        for alias in &aliases {
            map.unref_chain(alias);
        }
    }

    fn build_condition(&mut self, q: Q, context: JoinContext) -> QueryResult<Arc<WhereNode>> {
        let node = match q {
            Q::Filter { field, lookup } => {
                let (lhs, nullable) = self.resolve_field(&field, context)?;
                self.build_leaf(lhs, nullable, lookup, context)?
            }
            Q::Compare { lhs, lookup } => {
                let lhs = self.resolve_expression(lhs, context)?;
                self.build_leaf(lhs, false, lookup, context)?
            }
            Q::Exists(subquery) => {
                self.attach_subquery(&subquery, context)?;
                WhereNode::Exists(subquery)
            }
            Q::And(children) => self.build_branch(Connector::And, children, context)?,
            Q::Or(children) => {
                let context = if children.len() > 1 {
                    JoinContext {
                        in_disjunction: true,
                        ..context
                    }
                } else {
                    context
                };
                self.build_branch(Connector::Or, children, context)?
            }
            Q::Not(inner) => {
                let context = JoinContext {
                    negated: true,
                    ..context
                };
                WhereNode::negate(self.build_condition(*inner, context)?)
            }
        };
        Ok(Arc::new(node))
    }

    fn build_branch(&mut self, connector: Connector, children: Vec<Q>, context: JoinContext) -> QueryResult<WhereNode> {
        let mut built = Vec::with_capacity(children.len());
        for child in children {
            built.push(self.build_condition(child, context)?);
        }
        Ok(WhereNode::branch(connector, built))
    }

    fn build_leaf(
        &mut self,
        lhs: Expression,
        nullable: bool,
        lookup: Lookup,
        context: JoinContext,
    ) -> QueryResult<WhereNode> {
        let lookup = match lookup {
            Lookup::In(values) => {
                let mut kept: Vec<Value> = Vec::with_capacity(values.len());
                for value in values {
                    if !value.is_null() && !kept.contains(&value) {
                        kept.push(value);
                    }
                }
                if kept.is_empty() {
                    return Ok(WhereNode::Nothing);
                }
                Lookup::In(kept)
            }
            Lookup::InSubquery(subquery) => {
                self.attach_subquery(&subquery, context)?;
                Lookup::InSubquery(subquery)
            }
            other => other.try_map_operands(&mut |e| self.resolve_expression(e, context))?,
        };

        if context.negated && nullable && !lookup.matches_null() {
            return Ok(WhereNode::branch(
                Connector::And,
                vec![
                    Arc::new(WhereNode::leaf(lhs.clone(), lookup)),
                    Arc::new(WhereNode::leaf(lhs, Lookup::IsNull(false))),
                ],
            ));
        }
        Ok(WhereNode::leaf(lhs, lookup))
    }
}

fn split_path(path: &str) -> (&str, Vec<&str>) {
    let mut segments: Vec<&str> = path.split("__").collect();
    let last = segments.pop().unwrap_or_default();
    (last, segments)
}

fn collect_aliases(expression: &Expression, aliases: &mut Vec<String>) {
    match expression {
        Expression::Col { alias, .. } | Expression::AllColumns(alias) => aliases.push(alias.clone()),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldDef, FieldType};
    use crate::query::expressions::AggregateFunc;

    fn registry() -> Arc<ModelRegistry> {
        let mut r = ModelRegistry::new();
        r.register(
            ModelMeta::new("customer", "customer")
                .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
                .field(FieldDef::new("name", FieldType::CharField))
                .field(FieldDef::new("country", FieldType::CharField)),
        )
        .unwrap();
        r.register(
            ModelMeta::new("warehouse", "warehouse")
                .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
                .field(FieldDef::new("city", FieldType::CharField)),
        )
        .unwrap();
        r.register(
            ModelMeta::new("order", "order")
                .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
                .field(FieldDef::new("status", FieldType::CharField))
                .field(FieldDef::new("total", FieldType::IntegerField))
                .field(FieldDef::new("note", FieldType::TextField).nullable())
                .field(
                    FieldDef::new("customer", FieldType::foreign_key("customer"))
                        .column("customer_id")
                        .nullable()
                        .related_name("orders"),
                )
                .field(
                    FieldDef::new("warehouse", FieldType::foreign_key("warehouse"))
                        .column("warehouse_id"),
                )
                .ordering(&["-id"]),
        )
        .unwrap();
        Arc::new(r)
    }

    fn orders() -> Query {
        Query::new(registry(), "order").unwrap()
    }

    #[test]
    fn test_new_uses_table_alias() {
        let q = orders();
        assert_eq!(q.base_alias(), "order");
        assert_eq!(q.model(), Some("order"));
        assert!(q.where_root().is_empty());
        assert!(q.uses_default_ordering());
    }

    #[test]
    fn test_unknown_model() {
        let err = Query::new(registry(), "invoice").unwrap_err();
        assert!(matches!(err, QueryError::ConfigurationError(_)));
    }

    #[test]
    fn test_filter_leaves_receiver_untouched() {
        let base = orders();
        let filtered = base
            .filter(Q::filter("customer__country", Lookup::exact("NL")))
            .unwrap();
        assert!(base.where_root().is_empty());
        assert_eq!(base.alias_map().len(), 1);
        assert_eq!(filtered.alias_map().len(), 2);
    }

    #[test]
    fn test_filter_and_projection_share_join() {
        let q = orders()
            .filter(Q::filter("customer__country", Lookup::exact("NL")))
            .unwrap()
            .add_projection(Expression::f("customer__name"), None)
            .unwrap();
        assert_eq!(q.alias_map().len(), 2);
        assert_eq!(q.alias_map().get("customer").unwrap().ref_count, 2);
    }

    #[test]
    fn test_trailing_foreign_key_does_not_join() {
        let q = orders()
            .filter(Q::filter("warehouse", Lookup::exact(3)))
            .unwrap();
        assert_eq!(q.alias_map().len(), 1);
        match q.where_root() {
            WhereNode::Leaf(p) => assert_eq!(p.lhs, Expression::col("order", "warehouse_id")),
            other => panic!("unexpected root {other:?}"),
        }
    }

    #[test]
    fn test_or_filter_marks_existing_joins() {
        let q = orders()
            .filter(Q::filter("warehouse__city", Lookup::exact("Oslo")))
            .unwrap()
            .or_filter(Q::filter("status", Lookup::exact("paid")))
            .unwrap();
        let plan = q.finalize();
        assert_eq!(plan.join("warehouse").unwrap().join_type, JoinType::LeftOuter);
    }

    #[test]
    fn test_or_branch_promotes_joins() {
        let q = orders()
            .filter(
                Q::filter("warehouse__city", Lookup::exact("Oslo"))
                    | Q::filter("status", Lookup::exact("paid")),
            )
            .unwrap();
        assert_eq!(
            q.finalize().join("warehouse").unwrap().join_type,
            JoinType::LeftOuter
        );
    }

    #[test]
    fn test_plain_filter_keeps_inner_join() {
        let q = orders()
            .filter(Q::filter("warehouse__city", Lookup::exact("Oslo")))
            .unwrap();
        assert_eq!(
            q.finalize().join("warehouse").unwrap().join_type,
            JoinType::Inner
        );
    }

    #[test]
    fn test_exclude_nullable_adds_not_null_guard() {
        let q = orders()
            .exclude(Q::filter("note", Lookup::exact("x")))
            .unwrap();
        let WhereNode::Branch { negated: true, children, .. } = q.where_root() else {
            panic!("expected negated branch");
        };
        let WhereNode::Branch { children: guarded, .. } = children[0].as_ref() else {
            panic!("expected guard branch");
        };
        assert_eq!(guarded.len(), 2);
        assert!(matches!(
            guarded[1].as_ref(),
            WhereNode::Leaf(p) if p.lookup == Lookup::IsNull(false)
        ));
    }

    #[test]
    fn test_exclude_not_null_column_has_no_guard() {
        let q = orders()
            .exclude(Q::filter("status", Lookup::exact("x")))
            .unwrap();
        let WhereNode::Branch { children, .. } = q.where_root() else {
            panic!("expected negated branch");
        };
        assert!(matches!(children[0].as_ref(), WhereNode::Leaf(_)));
    }

    #[test]
    fn test_in_drops_nulls_and_duplicates() {
        let q = orders()
            .filter(Q::filter(
                "total",
                Lookup::In(vec![Value::from(1), Value::Null, Value::from(1), Value::from(2)]),
            ))
            .unwrap();
        match q.where_root() {
            WhereNode::Leaf(p) => {
                assert_eq!(p.lookup, Lookup::In(vec![Value::from(1), Value::from(2)]));
            }
            other => panic!("unexpected root {other:?}"),
        }
    }

    #[test]
    fn test_empty_in_is_nothing() {
        let q = orders()
            .filter(Q::filter("total", Lookup::In(vec![Value::Null])))
            .unwrap();
        assert!(q.is_empty());
    }

    fn compiles_empty(q: &Query) -> bool {
        use crate::dialect::SqliteDialect;
        use crate::query::compiler::SqlCompiler;
        SqlCompiler::new(q, &SqliteDialect)
            .compile()
            .unwrap()
            .is_empty_result()
    }

    #[test]
    fn test_is_empty_agrees_with_compiler() {
        let no_ids = || Q::filter("id", Lookup::In(Vec::new()));
        let no_customers = Query::new(registry(), "customer").unwrap().none();
        let cases = vec![
            (orders().exclude(no_ids()).unwrap(), false),
            (
                orders()
                    .filter(Q::filter("status", Lookup::exact("a")) | no_ids())
                    .unwrap(),
                false,
            ),
            (
                orders()
                    .filter(Q::filter("status", Lookup::exact("a")) & no_ids())
                    .unwrap(),
                true,
            ),
            (orders().none(), true),
            (orders().exclude(no_ids()).unwrap().none(), true),
            (
                orders()
                    .filter(Q::filter(
                        "customer",
                        Lookup::InSubquery(no_customers.as_subquery()),
                    ))
                    .unwrap(),
                true,
            ),
        ];
        for (q, expected) in cases {
            assert_eq!(q.is_empty(), expected, "{:?}", q.where_root());
            assert_eq!(compiles_empty(&q), expected, "{:?}", q.where_root());
        }
    }

    #[test]
    fn test_is_empty_for_combined_queries() {
        let ids = orders().values(&["id"]).unwrap();
        let none = ids.none();
        assert!(!ids.union(&none).unwrap().is_empty());
        assert!(none.union(&none).unwrap().is_empty());
        assert!(ids.intersection(&none).unwrap().is_empty());
        assert!(none.difference(&ids).unwrap().is_empty());
        assert!(!ids.difference(&none).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_field_and_relationship() {
        let err = orders()
            .filter(Q::filter("colour", Lookup::exact("red")))
            .unwrap_err();
        assert_eq!(err, QueryError::field_error("order", "colour"));
        let err = orders()
            .filter(Q::filter("supplier__name", Lookup::exact("x")))
            .unwrap_err();
        assert_eq!(err, QueryError::unknown_relationship("order", "supplier"));
    }

    #[test]
    fn test_reverse_relation_joins_left() {
        let q = Query::new(registry(), "customer")
            .unwrap()
            .filter(Q::filter("orders__status", Lookup::exact("paid")))
            .unwrap();
        let entry = q.alias_map().get("orders").unwrap();
        assert_eq!(entry.join_type, JoinType::LeftOuter);
        assert_eq!(
            entry.join_columns,
            Some(("id".to_string(), "customer_id".to_string()))
        );
    }

    #[test]
    fn test_ambiguous_alias() {
        let q = orders()
            .annotate("n", Expression::count_all())
            .unwrap();
        let err = q.annotate("n", Expression::value(1)).unwrap_err();
        assert_eq!(err, QueryError::AmbiguousAlias("n".into()));
        let err = q.annotate("status", Expression::value(1)).unwrap_err();
        assert_eq!(err, QueryError::AmbiguousAlias("status".into()));
    }

    #[test]
    fn test_annotate_keeps_model_columns() {
        let q = orders()
            .annotate("gross", Expression::f("total") * Expression::value(2))
            .unwrap();
        let columns = q.output_columns();
        assert_eq!(columns.first().map(String::as_str), Some("id"));
        assert_eq!(columns.last().map(String::as_str), Some("gross"));
    }

    #[test]
    fn test_pk_resolves_to_primary_key() {
        let q = orders().values(&["pk", "customer__pk"]).unwrap();
        assert_eq!(q.projections()[0].expression, Expression::col("order", "id"));
        assert_eq!(q.projections()[1].expression, Expression::col("customer", "id"));
        assert_eq!(q.output_columns(), vec!["id", "col2"]);
    }

    #[test]
    fn test_values_output_columns() {
        let q = orders().values(&["id", "customer__name", "id"]).unwrap();
        assert_eq!(q.output_columns(), vec!["id", "name", "col3"]);
    }

    #[test]
    fn test_filter_on_aggregate_goes_to_having() {
        let q = orders()
            .values(&["status"])
            .unwrap()
            .annotate("n", Expression::count_all())
            .unwrap()
            .filter(Q::filter("n", Lookup::gt(1)))
            .unwrap();
        assert!(q.where_root().is_empty());
        assert!(!q.having_root().is_empty());
    }

    #[test]
    fn test_order_by_alias_becomes_ref() {
        let q = orders()
            .annotate("n", Expression::aggregate(AggregateFunc::Count, Expression::f("id")))
            .unwrap()
            .order_by(&["-n", "status"])
            .unwrap();
        assert_eq!(q.ordering()[0].expression, Expression::Ref("n".into()));
        assert!(q.ordering()[0].descending);
        assert_eq!(q.ordering()[1].expression, Expression::col("order", "status"));
    }

    #[test]
    fn test_clear_ordering_releases_joins() {
        let q = orders().order_by(&["customer__name"]).unwrap();
        assert!(q.finalize().join("customer").unwrap().emitted);
        let cleared = q.clear_ordering();
        assert!(!cleared.finalize().join("customer").unwrap().emitted);
        assert!(!cleared.uses_default_ordering());
    }

    #[test]
    fn test_reverse_ordering_toggles() {
        let q = orders().reverse_ordering().unwrap();
        assert!(!q.is_standard_ordering());
        assert!(q.reverse_ordering().unwrap().is_standard_ordering());
    }

    #[test]
    fn test_default_ordering_terms() {
        let terms = orders().default_ordering_terms().unwrap();
        assert_eq!(terms.len(), 1);
        assert!(terms[0].descending);
        assert!(orders()
            .order_by(&["status"])
            .unwrap()
            .default_ordering_terms()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_negative_limit_rejected() {
        let q = orders();
        let err = q.set_limit(-1).unwrap_err();
        assert!(matches!(err, QueryError::InvalidRange(_)));
        assert_eq!(q.limit(), None);
        assert!(q.set_offset(-5).is_err());
    }

    #[test]
    fn test_slice_composes() {
        let q = orders().slice(10, Some(30)).unwrap();
        assert_eq!((q.offset(), q.limit()), (Some(10), Some(20)));
        let q = q.slice(5, Some(10)).unwrap();
        assert_eq!((q.offset(), q.limit()), (Some(15), Some(5)));
        let q = q.slice(2, None).unwrap();
        assert_eq!((q.offset(), q.limit()), (Some(17), Some(3)));
    }

    #[test]
    fn test_empty_slice_is_none() {
        let q = orders().slice(5, Some(5)).unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn test_filter_after_slice_rejected() {
        let q = orders().slice(0, Some(5)).unwrap();
        let err = q.filter(Q::filter("status", Lookup::exact("x"))).unwrap_err();
        assert!(matches!(err, QueryError::NotSupported(_)));
    }

    #[test]
    fn test_combine_shape_check() {
        let a = orders().values(&["id"]).unwrap();
        let b = orders().values(&["id", "status"]).unwrap();
        let err = a.union(&b).unwrap_err();
        assert!(matches!(err, QueryError::IncompatibleShape(_)));
    }

    #[test]
    fn test_combine_flattens_same_kind() {
        let a = orders().values(&["id"]).unwrap();
        let combined = a.union(&a).unwrap().union(&a).unwrap();
        assert_eq!(combined.combination().unwrap().parts.len(), 3);
        let mixed = a.union(&a).unwrap().intersection(&a).unwrap();
        assert_eq!(mixed.combination().unwrap().parts.len(), 2);
    }

    #[test]
    fn test_filter_after_combine_rejected() {
        let a = orders().values(&["id"]).unwrap();
        let combined = a.union(&a).unwrap();
        assert!(combined
            .filter(Q::filter("id", Lookup::exact(1)))
            .is_err());
        assert!(combined.order_by(&["id"]).is_ok());
        assert!(combined.order_by(&["status"]).is_err());
    }

    #[test]
    fn test_none_on_combined_marks_every_member() {
        let a = orders().values(&["id"]).unwrap();
        let combined = a.union(&a).unwrap().none();
        assert!(combined.is_empty());
    }

    #[test]
    fn test_exists_query_shape() {
        let q = orders()
            .filter(Q::filter("status", Lookup::exact("paid")))
            .unwrap()
            .exists_query();
        assert_eq!(q.output_columns(), vec!["a"]);
        assert_eq!(q.limit(), Some(1));
        assert!(q.ordering().is_empty());
        assert!(!q.uses_default_ordering());
    }

    #[test]
    fn test_count_query_wraps_sliced() {
        let q = orders().slice(0, Some(10)).unwrap().count_query();
        assert_eq!(q.model(), None);
        assert_eq!(q.base_alias(), "subquery");
        assert_eq!(q.output_columns(), vec!["__count"]);
        let plain = orders().count_query();
        assert_eq!(plain.model(), Some("order"));
    }

    #[test]
    fn test_from_subquery_columns() {
        let inner = orders().values(&["id", "total"]).unwrap();
        let q = Query::from_subquery(inner.as_subquery(), "t")
            .filter(Q::filter("total", Lookup::gt(5)))
            .unwrap();
        assert_eq!(q.output_columns(), vec!["id", "total"]);
        let err = q.filter(Q::filter("status", Lookup::exact("x"))).unwrap_err();
        assert_eq!(err, QueryError::field_error("t", "status"));
    }

    #[test]
    fn test_outer_refs_attach_joins_in_parent() {
        let inner = orders()
            .filter(Q::filter("status", Lookup::Exact(Expression::outer_ref("country"))))
            .unwrap();
        assert_eq!(inner.outer_refs(), vec!["country"]);
        let customers = Query::new(registry(), "customer")
            .unwrap()
            .filter(Q::exists(inner.as_subquery()))
            .unwrap();
        assert_eq!(
            customers.locate_field("country").unwrap(),
            Expression::col("customer", "country")
        );
    }

    #[test]
    fn test_distinct_on() {
        let q = orders().set_distinct_on(&["status"]).unwrap();
        assert_eq!(q.distinct(), &Distinct::On(vec![Expression::col("order", "status")]));
        assert_eq!(orders().set_distinct_on(&[]).unwrap().distinct(), &Distinct::All);
    }

    #[test]
    fn test_order_by_parse_and_reverse() {
        let o = OrderBy::parse("-created_at").nulls_last();
        assert!(o.descending);
        let r = o.reversed();
        assert!(!r.descending);
        assert_eq!(r.nulls_first, Some(true));
    }
}
