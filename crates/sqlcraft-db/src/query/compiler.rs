//! SQL compilation.
//!
//! [`SqlCompiler`] turns a [`Query`] descriptor into parameterized SQL for a
//! [`Dialect`]. Compilation is a pure function of the descriptor, the dialect
//! and the [`CompileOptions`]: the same inputs always produce the same text
//! and the same parameter list, and user data never appears in the text.
//!
//! Clauses are emitted in a fixed order: SELECT (with DISTINCT), FROM and
//! joins, WHERE, GROUP BY, HAVING, ORDER BY, then the row window. Compound
//! queries compile each member separately, continuing the parent's
//! placeholder numbering. Subqueries share the parent's parameter list and
//! see the parent's aliases for outer references.
//!
//! A query that can never return rows is not an error: the compiler reports
//! it as [`Compilation::EmptyResultSet`], or, with
//! [`EmptyResultMode::Literal`], renders it with a `1=0` predicate.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use sqlcraft_db::fields::{FieldDef, FieldType};
//! # use sqlcraft_db::model::{ModelMeta, ModelRegistry};
//! use sqlcraft_db::dialect::PostgresDialect;
//! use sqlcraft_db::query::{Lookup, Query, SqlCompiler, Q};
//!
//! # let mut registry = ModelRegistry::new();
//! # registry.register(ModelMeta::new("order", "order")
//! #     .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
//! #     .field(FieldDef::new("status", FieldType::CharField))).unwrap();
//! let query = Query::new(Arc::new(registry), "order")?
//!     .values(&["id"])?
//!     .filter(Q::filter("status", Lookup::exact("paid")))?;
//!
//! let compiled = SqlCompiler::new(&query, &PostgresDialect).compile()?;
//! let sql = compiled.sql().unwrap();
//! assert_eq!(sql.sql, r#"SELECT "order"."id" FROM "order" WHERE "order"."status" = $1"#);
//! assert_eq!(sql.params.len(), 1);
//! # Ok::<(), sqlcraft_core::QueryError>(())
//! ```

use std::collections::HashMap;

use sqlcraft_core::logging::compile_span;
use sqlcraft_core::{EmptyResultMode, QueryError, QueryResult, Settings};
use tracing::debug;

use crate::dialect::{Combinator, Dialect};
use crate::query::descriptor::{Combination, Distinct, OrderBy, Query, QueryPlan};
use crate::query::expressions::{Expression, Subquery};
use crate::query::joins::{JoinType, TableSource};
use crate::query::lookups::{escape_like, Lookup};
use crate::query::params::CompileState;
use crate::query::where_node::{Fragment, LeafCompiler, Predicate};
use crate::value::Value;

/// SQL text plus its ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSql {
    /// The statement, with one dialect placeholder per parameter.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
}

/// The outcome of compiling a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Compilation {
    /// The statement to run.
    Sql(CompiledSql),
    /// The query provably matches no rows; nothing needs to run.
    EmptyResultSet,
}

impl Compilation {
    /// Returns `true` for [`EmptyResultSet`](Self::EmptyResultSet).
    pub const fn is_empty_result(&self) -> bool {
        matches!(self, Self::EmptyResultSet)
    }

    /// The compiled statement, if there is one.
    pub const fn sql(&self) -> Option<&CompiledSql> {
        match self {
            Self::Sql(sql) => Some(sql),
            Self::EmptyResultSet => None,
        }
    }

    /// Consumes the outcome, returning the compiled statement if there is one.
    pub fn into_sql(self) -> Option<CompiledSql> {
        match self {
            Self::Sql(sql) => Some(sql),
            Self::EmptyResultSet => None,
        }
    }
}

/// Knobs that change the compiled text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    /// Alias every top-level output column as `col1`, `col2`, ...
    pub positional_aliases: bool,
    /// How a query that matches no rows is reported.
    pub empty_result_mode: EmptyResultMode,
    /// Overrides the dialect's maximum `IN (...)` list size.
    pub max_in_list_size: Option<usize>,
}

impl CompileOptions {
    /// Reads the compilation settings.
    pub const fn from_settings(settings: &Settings) -> Self {
        Self {
            positional_aliases: settings.positional_column_aliases,
            empty_result_mode: settings.empty_result_mode,
            max_in_list_size: settings.max_in_list_size,
        }
    }
}

/// Compiles one query for one dialect. Single use.
pub struct SqlCompiler<'a> {
    query: &'a Query,
    dialect: &'a dyn Dialect,
    options: CompileOptions,
}

impl<'a> SqlCompiler<'a> {
    /// Creates a compiler with default options.
    pub fn new(query: &'a Query, dialect: &'a dyn Dialect) -> Self {
        Self {
            query,
            dialect,
            options: CompileOptions::default(),
        }
    }

    /// Replaces the compile options.
    #[must_use]
    pub const fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Compiles the query.
    ///
    /// # Errors
    ///
    /// `IncompatibleShape` when compound members or subqueries have the
    /// wrong number of columns, `MisplacedHaving` when HAVING is set on a
    /// query that neither groups nor aggregates, and `NotSupported` when the
    /// dialect cannot express a requested feature.
    pub fn compile(self) -> QueryResult<Compilation> {
        let span = compile_span(self.query.base_alias(), self.dialect.name());
        let _guard = span.enter();

        if let Some(compiled) = self.compile_pass(false)? {
            return Ok(Compilation::Sql(compiled));
        }
        if self.options.empty_result_mode == EmptyResultMode::Literal {
            if let Some(compiled) = self.compile_pass(true)? {
                return Ok(Compilation::Sql(compiled));
            }
        }
        debug!(table = self.query.base_alias(), "Query matches no rows");
        Ok(Compilation::EmptyResultSet)
    }

    fn compile_pass(&self, force_empty: bool) -> QueryResult<Option<CompiledSql>> {
        let mut state = CompileState::default();
        let compiler = QueryCompiler::new(
            self.query,
            self.dialect,
            &self.options,
            None,
            Mode::TopLevel,
            force_empty,
            &mut state,
        );
        let Some(sql) = compiler.compile(&mut state)? else {
            return Ok(None);
        };
        let params = state.params.into_values();
        debug!(
            sql = %sql,
            params = params.len(),
            dialect = self.dialect.name(),
            "Compiled query"
        );
        Ok(Some(CompiledSql { sql, params }))
    }
}

/// Where a statement sits relative to the statement being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    TopLevel,
    Member,
    Nested,
    Derived,
}

/// Compiles one SELECT. Nested statements get their own instance that
/// points back at the enclosing one.
struct QueryCompiler<'a> {
    query: &'a Query,
    dialect: &'a dyn Dialect,
    options: &'a CompileOptions,
    outer: Option<&'a QueryCompiler<'a>>,
    mode: Mode,
    force_empty: bool,
    plan: QueryPlan,
    names: HashMap<String, String>,
}

impl<'a> QueryCompiler<'a> {
    fn new(
        query: &'a Query,
        dialect: &'a dyn Dialect,
        options: &'a CompileOptions,
        outer: Option<&'a QueryCompiler<'a>>,
        mode: Mode,
        force_empty: bool,
        state: &mut CompileState,
    ) -> Self {
        let plan = query.finalize();
        let mut names = HashMap::new();
        if query.combination().is_none() {
            for join in plan.joins().iter().filter(|j| j.emitted) {
                names.insert(join.alias.clone(), state.reserve_name(&join.alias));
            }
        }
        Self {
            query,
            dialect,
            options,
            outer,
            mode,
            force_empty,
            plan,
            names,
        }
    }

    fn quote(&self, name: &str) -> String {
        self.dialect.quote_identifier(name)
    }

    fn alias_name<'n>(&'n self, alias: &'n str) -> &'n str {
        self.names.get(alias).map_or(alias, String::as_str)
    }

    fn column_sql(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", self.quote(self.alias_name(alias)), self.quote(column))
    }

    /// Compiles the statement; `None` when it matches no rows.
    ///
    /// Parameters pushed by a statement that turns out empty are rolled back.
    fn compile(&self, state: &mut CompileState) -> QueryResult<Option<String>> {
        let checkpoint = state.params.checkpoint();
        let compiled = match self.query.combination() {
            Some(combination) => self.compile_combined(combination, state)?,
            None => self.compile_select(state)?,
        };
        if compiled.is_none() {
            state.params.rollback(checkpoint);
        }
        Ok(compiled)
    }

    fn compile_nested(
        &self,
        query: &Query,
        mode: Mode,
        state: &mut CompileState,
    ) -> QueryResult<Option<String>> {
        let force_empty = mode == Mode::Derived && self.force_empty;
        let nested = QueryCompiler::new(
            query,
            self.dialect,
            self.options,
            Some(self),
            mode,
            force_empty,
            state,
        );
        nested.compile(state)
    }

    // ── SELECT ───────────────────────────────────────────────────────

    fn compile_select(&self, state: &mut CompileState) -> QueryResult<Option<String>> {
        let mut sql = String::from("SELECT ");

        match self.query.distinct() {
            Distinct::Off => {}
            Distinct::All => {
                sql.push_str(&self.dialect.distinct_clause(None)?);
                sql.push(' ');
            }
            Distinct::On(expressions) => {
                let mut columns = Vec::with_capacity(expressions.len());
                for expression in expressions {
                    columns.push(self.compile_expression(expression, state)?);
                }
                sql.push_str(&self.dialect.distinct_clause(Some(&columns))?);
                sql.push(' ');
            }
        }

        sql.push_str(&self.compile_select_list(state)?.join(", "));

        let Some(from) = self.compile_from(state)? else {
            return Ok(None);
        };
        sql.push_str(" FROM ");
        sql.push_str(&from);

        let checkpoint = state.params.checkpoint();
        match self.query.where_root().render(self, state)? {
            Fragment::Sql(condition) => {
                sql.push_str(" WHERE ");
                sql.push_str(&condition);
            }
            Fragment::Full => state.params.rollback(checkpoint),
            Fragment::Empty if self.force_empty => {
                state.params.rollback(checkpoint);
                sql.push_str(" WHERE 1=0");
            }
            Fragment::Empty => return Ok(None),
        }

        if let Some(grouping) = self.query.grouping() {
            let mut terms = Vec::with_capacity(grouping.len());
            for expression in grouping {
                terms.push(self.compile_expression(expression, state)?);
            }
            if !terms.is_empty() {
                sql.push_str(" GROUP BY ");
                sql.push_str(&terms.join(", "));
            }
        }

        if !self.query.having_root().is_empty() {
            if self.query.grouping().is_none() && !self.plan.has_aggregate() {
                return Err(QueryError::MisplacedHaving(
                    "HAVING requires a grouping or an aggregate projection".into(),
                ));
            }
            let checkpoint = state.params.checkpoint();
            match self.query.having_root().render(self, state)? {
                Fragment::Sql(condition) => {
                    sql.push_str(" HAVING ");
                    sql.push_str(&condition);
                }
                Fragment::Full => state.params.rollback(checkpoint),
                Fragment::Empty if self.force_empty => {
                    state.params.rollback(checkpoint);
                    sql.push_str(" HAVING 1=0");
                }
                Fragment::Empty => return Ok(None),
            }
        }

        self.push_order_and_window(&mut sql, state)?;
        Ok(Some(sql))
    }

    fn compile_select_list(&self, state: &mut CompileState) -> QueryResult<Vec<String>> {
        // (sql, natural column name, explicit alias)
        let mut items: Vec<(String, Option<String>, Option<String>)> = Vec::new();

        if self.query.projections().is_empty() {
            self.expand_all_columns(self.query.base_alias(), &mut items);
        } else {
            for projection in self.query.projections() {
                match &projection.expression {
                    Expression::AllColumns(alias) => self.expand_all_columns(alias, &mut items),
                    Expression::Entity(path) => {
                        return Err(QueryError::NotSupported(format!(
                            "Unresolved entity projection '{path}'"
                        )));
                    }
                    Expression::Col { column, .. } => items.push((
                        self.compile_expression(&projection.expression, state)?,
                        Some(column.clone()),
                        projection.alias.clone(),
                    )),
                    expression => items.push((
                        self.compile_expression(expression, state)?,
                        None,
                        projection.alias.clone(),
                    )),
                }
            }
        }

        let output = self.plan.output_columns();
        let positional =
            self.options.positional_aliases && matches!(self.mode, Mode::TopLevel | Mode::Member);
        Ok(items
            .into_iter()
            .enumerate()
            .map(|(index, (sql, natural, alias))| {
                if positional {
                    return format!("{sql} AS {}", self.quote(&format!("col{}", index + 1)));
                }
                if let Some(alias) = alias {
                    return format!("{sql} AS {}", self.quote(&alias));
                }
                match output.get(index) {
                    Some(name)
                        if self.mode == Mode::Derived && natural.as_deref() != Some(name.as_str()) =>
                    {
                        format!("{sql} AS {}", self.quote(name))
                    }
                    _ => sql,
                }
            })
            .collect())
    }

    fn expand_all_columns(
        &self,
        alias: &str,
        items: &mut Vec<(String, Option<String>, Option<String>)>,
    ) {
        for column in self.query.columns_of(alias) {
            items.push((self.column_sql(alias, &column), Some(column), None));
        }
    }

    // ── FROM ─────────────────────────────────────────────────────────

    fn compile_from(&self, state: &mut CompileState) -> QueryResult<Option<String>> {
        let alias_map = self.query.alias_map();
        let base = alias_map.base();
        let base_name = self.alias_name(&base.alias);

        let mut sql = match &base.source {
            TableSource::Table(table) => self.table_with_alias(table, base_name),
            TableSource::Subquery(subquery) => {
                let Some(inner) = self.compile_nested(subquery.query(), Mode::Derived, state)?
                else {
                    return Ok(None);
                };
                format!("({inner}) {}", self.quote(base_name))
            }
        };

        for (entry, planned) in alias_map.entries().iter().zip(self.plan.joins()).skip(1) {
            if !planned.emitted {
                continue;
            }
            let (TableSource::Table(table), Some(parent), Some((parent_column, column))) =
                (&entry.source, &entry.parent, &entry.join_columns)
            else {
                continue;
            };
            let keyword = match planned.join_type {
                JoinType::LeftOuter => JoinType::LeftOuter.sql_keyword(),
                _ => JoinType::Inner.sql_keyword(),
            };
            sql.push_str(&format!(
                " {keyword} {} ON ({} = {})",
                self.table_with_alias(table, self.alias_name(&entry.alias)),
                self.column_sql(parent, parent_column),
                self.column_sql(&entry.alias, column),
            ));
        }
        Ok(Some(sql))
    }

    fn table_with_alias(&self, table: &str, alias: &str) -> String {
        if table == alias {
            self.quote(table)
        } else {
            format!("{} {}", self.quote(table), self.quote(alias))
        }
    }

    // ── ORDER BY / window ────────────────────────────────────────────

    fn push_order_and_window(&self, sql: &mut String, state: &mut CompileState) -> QueryResult<()> {
        let terms: Vec<OrderBy> = if !self.query.ordering().is_empty() {
            self.query.ordering().to_vec()
        } else if self.mode == Mode::TopLevel {
            self.query.default_ordering_terms()?
        } else {
            Vec::new()
        };

        if !terms.is_empty() {
            let mut rendered = Vec::with_capacity(terms.len());
            for term in &terms {
                let term = if self.query.is_standard_ordering() {
                    term.clone()
                } else {
                    term.reversed()
                };
                rendered.push(self.compile_order_term(&term, state)?);
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&rendered.join(", "));
        }

        let window = self
            .dialect
            .limit_offset_clause(self.query.limit(), self.query.offset());
        if !window.is_empty() {
            sql.push(' ');
            sql.push_str(&window);
        }
        Ok(())
    }

    fn compile_order_term(&self, term: &OrderBy, state: &mut CompileState) -> QueryResult<String> {
        let expression = match &term.expression {
            Expression::Ref(name) => self.order_ref(name)?,
            other => self.compile_expression(other, state)?,
        };
        let direction = if term.descending { "DESC" } else { "ASC" };
        Ok(match term.nulls_first {
            None => format!("{expression} {direction}"),
            Some(first) if self.dialect.supports_nulls_ordering() => {
                let nulls = if first { "NULLS FIRST" } else { "NULLS LAST" };
                format!("{expression} {direction} {nulls}")
            }
            Some(first) => {
                // The expression appears twice, so its parameters are bound twice.
                let repeated = match &term.expression {
                    Expression::Ref(_) => expression.clone(),
                    other => self.compile_expression(other, state)?,
                };
                let test = if first { "IS NOT NULL" } else { "IS NULL" };
                format!("{expression} {test}, {repeated} {direction}")
            }
        })
    }

    fn order_ref(&self, name: &str) -> QueryResult<String> {
        let by_position = self.query.combination().is_some()
            || (self.options.positional_aliases && matches!(self.mode, Mode::TopLevel | Mode::Member));
        if !by_position {
            return Ok(self.quote(name));
        }
        self.plan
            .output_columns()
            .iter()
            .position(|c| c == name)
            .map(|index| (index + 1).to_string())
            .ok_or_else(|| QueryError::field_error(self.query.base_alias(), name))
    }

    // ── Compound queries ─────────────────────────────────────────────

    fn compile_combined(
        &self,
        combination: &Combination,
        state: &mut CompileState,
    ) -> QueryResult<Option<String>> {
        let expected = self.plan.output_columns().len();
        let mut members = Vec::with_capacity(combination.parts.len());

        for (index, part) in combination.parts.iter().enumerate() {
            let columns = part.output_columns().len();
            if columns != expected {
                return Err(QueryError::IncompatibleShape(format!(
                    "{} member {} has {columns} columns, expected {expected}",
                    combination.kind,
                    index + 1
                )));
            }

            let mut member_state = state.branch();
            let member = QueryCompiler::new(
                part,
                self.dialect,
                self.options,
                self.outer,
                Mode::Member,
                self.force_empty,
                &mut member_state,
            );
            let Some(sql) = member.compile(&mut member_state)? else {
                let droppable = combination.kind.is_union()
                    || (combination.kind == Combinator::Except && index > 0);
                if droppable {
                    debug!(member = index + 1, "Dropped empty compound member");
                    continue;
                }
                return Ok(None);
            };

            let needs_wrap =
                part.combination().is_some() || !part.ordering().is_empty() || part.is_sliced();
            let sql = match (needs_wrap, self.dialect.supports_parentheses_in_compound()) {
                (false, _) => sql,
                (true, true) => format!("({sql})"),
                (true, false) => format!("SELECT * FROM ({sql})"),
            };
            state.params.append(member_state.params);
            members.push(sql);
        }

        if members.is_empty() {
            return Ok(None);
        }
        let keyword = format!(" {} ", self.dialect.combinator_keyword(combination.kind));
        let mut sql = members.join(&keyword);
        self.push_order_and_window(&mut sql, state)?;
        Ok(Some(sql))
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn compile_expression(&self, expression: &Expression, state: &mut CompileState) -> QueryResult<String> {
        Ok(match expression {
            Expression::Col { alias, column } => self.column_sql(alias, column),
            Expression::Ref(name) => self.quote(name),
            Expression::Value(value) => state.params.push(value.clone(), self.dialect),
            Expression::Raw(sql) => sql.clone(),
            Expression::Star => "*".to_string(),
            Expression::Func { name, args } => {
                let mut rendered = Vec::with_capacity(args.len());
                for arg in args {
                    rendered.push(self.compile_expression(arg, state)?);
                }
                format!("{name}({})", rendered.join(", "))
            }
            Expression::Aggregate {
                func,
                field,
                distinct,
            } => {
                let inner = self.compile_expression(field, state)?;
                let distinct = if *distinct { "DISTINCT " } else { "" };
                format!("{}({distinct}{inner})", func.sql_name())
            }
            Expression::Subquery(subquery) => self.compile_scalar_subquery(subquery, state)?,
            Expression::Exists(subquery) => match self.compile_exists(subquery, state)? {
                Fragment::Sql(sql) => sql,
                Fragment::Empty => "1=0".to_string(),
                Fragment::Full => "1=1".to_string(),
            },
            Expression::OuterRef(path) => self.compile_outer_ref(path, state)?,
            Expression::Add(l, r) => self.compile_binary(l, "+", r, state)?,
            Expression::Sub(l, r) => self.compile_binary(l, "-", r, state)?,
            Expression::Mul(l, r) => self.compile_binary(l, "*", r, state)?,
            Expression::Div(l, r) => self.compile_binary(l, "/", r, state)?,
            Expression::F(path) => {
                return Err(QueryError::NotSupported(format!(
                    "Unresolved field reference '{path}'"
                )));
            }
            Expression::Entity(_) | Expression::AllColumns(_) => {
                return Err(QueryError::NotSupported(
                    "A multi-column expression cannot be used as a single value".into(),
                ));
            }
        })
    }

    fn compile_binary(
        &self,
        lhs: &Expression,
        op: &str,
        rhs: &Expression,
        state: &mut CompileState,
    ) -> QueryResult<String> {
        let lhs = self.compile_expression(lhs, state)?;
        let rhs = self.compile_expression(rhs, state)?;
        Ok(format!("({lhs} {op} {rhs})"))
    }

    fn compile_scalar_subquery(&self, subquery: &Subquery, state: &mut CompileState) -> QueryResult<String> {
        let columns = subquery.query().output_columns().len();
        if columns != 1 {
            return Err(QueryError::IncompatibleShape(format!(
                "A scalar subquery must produce exactly one column, not {columns}"
            )));
        }
        Ok(match self.compile_nested(subquery.query(), Mode::Nested, state)? {
            Some(sql) => format!("({sql})"),
            None => "NULL".to_string(),
        })
    }

    fn compile_outer_ref(&self, path: &str, state: &mut CompileState) -> QueryResult<String> {
        let Some(outer) = self.outer else {
            return Err(QueryError::NotSupported(format!(
                "OuterRef('{path}') used outside a subquery"
            )));
        };
        let expression = outer.query.locate_field(path)?;
        outer.compile_expression(&expression, state)
    }

    // ── Lookups ──────────────────────────────────────────────────────

    fn compile_like(
        &self,
        lhs: &str,
        pattern: String,
        case_insensitive: bool,
        state: &mut CompileState,
    ) -> String {
        let rhs = state.params.push(Value::String(pattern), self.dialect);
        let comparison = if case_insensitive {
            self.dialect.case_insensitive_like(lhs, &rhs)
        } else {
            format!("{lhs} LIKE {rhs}")
        };
        format!("{comparison}{}", self.dialect.like_escape_suffix())
    }

    fn compile_in_list(&self, lhs: &str, values: &[Value], state: &mut CompileState) -> Fragment {
        if values.is_empty() {
            return Fragment::Empty;
        }
        let size = self
            .options
            .max_in_list_size
            .or_else(|| self.dialect.max_in_list_size())
            .unwrap_or(values.len())
            .max(1);
        let mut chunks = Vec::new();
        for chunk in values.chunks(size) {
            let mut placeholders = Vec::with_capacity(chunk.len());
            for value in chunk {
                placeholders.push(state.params.push(value.clone(), self.dialect));
            }
            chunks.push(format!("{lhs} IN ({})", placeholders.join(", ")));
        }
        if chunks.len() == 1 {
            Fragment::Sql(chunks.remove(0))
        } else {
            Fragment::Sql(format!("({})", chunks.join(" OR ")))
        }
    }

    fn compile_in_subquery(
        &self,
        lhs: &str,
        subquery: &Subquery,
        state: &mut CompileState,
    ) -> QueryResult<Fragment> {
        let inner = subquery.query();
        let keyed;
        let inner = if inner.projections().is_empty()
            && inner.combination().is_none()
            && inner.model().is_some()
        {
            keyed = inner.values(&["pk"])?;
            &keyed
        } else {
            inner
        };
        let columns = inner.output_columns().len();
        if columns != 1 {
            return Err(QueryError::IncompatibleShape(format!(
                "An IN subquery must produce exactly one column, not {columns}"
            )));
        }
        Ok(match self.compile_nested(inner, Mode::Nested, state)? {
            Some(sql) => Fragment::Sql(format!("{lhs} IN ({sql})")),
            None => Fragment::Empty,
        })
    }
}

impl LeafCompiler for QueryCompiler<'_> {
    fn compile_predicate(&self, predicate: &Predicate, state: &mut CompileState) -> QueryResult<Fragment> {
        let lhs = self.compile_expression(&predicate.lhs, state)?;
        let sql = match &predicate.lookup {
            Lookup::Exact(Expression::Value(Value::Null)) | Lookup::IsNull(true) => {
                format!("{lhs} IS NULL")
            }
            Lookup::IsNull(false) => format!("{lhs} IS NOT NULL"),
            Lookup::Exact(rhs) => format!("{lhs} = {}", self.compile_expression(rhs, state)?),
            Lookup::IExact(Expression::Value(Value::Null)) => format!("{lhs} IS NULL"),
            Lookup::IExact(rhs) => {
                format!("LOWER({lhs}) = LOWER({})", self.compile_expression(rhs, state)?)
            }
            Lookup::Gt(rhs) => format!("{lhs} > {}", self.compile_expression(rhs, state)?),
            Lookup::Gte(rhs) => format!("{lhs} >= {}", self.compile_expression(rhs, state)?),
            Lookup::Lt(rhs) => format!("{lhs} < {}", self.compile_expression(rhs, state)?),
            Lookup::Lte(rhs) => format!("{lhs} <= {}", self.compile_expression(rhs, state)?),
            Lookup::Contains(text) => {
                self.compile_like(&lhs, format!("%{}%", escape_like(text)), false, state)
            }
            Lookup::IContains(text) => {
                self.compile_like(&lhs, format!("%{}%", escape_like(text)), true, state)
            }
            Lookup::StartsWith(text) => {
                self.compile_like(&lhs, format!("{}%", escape_like(text)), false, state)
            }
            Lookup::IStartsWith(text) => {
                self.compile_like(&lhs, format!("{}%", escape_like(text)), true, state)
            }
            Lookup::EndsWith(text) => {
                self.compile_like(&lhs, format!("%{}", escape_like(text)), false, state)
            }
            Lookup::IEndsWith(text) => {
                self.compile_like(&lhs, format!("%{}", escape_like(text)), true, state)
            }
            Lookup::In(values) => return Ok(self.compile_in_list(&lhs, values, state)),
            Lookup::InSubquery(subquery) => return self.compile_in_subquery(&lhs, subquery, state),
            Lookup::Range(low, high) => {
                let low = self.compile_expression(low, state)?;
                let high = self.compile_expression(high, state)?;
                format!("{lhs} BETWEEN {low} AND {high}")
            }
            Lookup::Regex(pattern) => {
                let rhs = state.params.push(Value::from(pattern.as_str()), self.dialect);
                self.dialect.regex_match(&lhs, &rhs, false)?
            }
            Lookup::IRegex(pattern) => {
                let rhs = state.params.push(Value::from(pattern.as_str()), self.dialect);
                self.dialect.regex_match(&lhs, &rhs, true)?
            }
        };
        Ok(Fragment::Sql(sql))
    }

    fn compile_exists(&self, subquery: &Subquery, state: &mut CompileState) -> QueryResult<Fragment> {
        let exists_query = subquery.query().exists_query();
        Ok(match self.compile_nested(&exists_query, Mode::Nested, state)? {
            Some(sql) => Fragment::Sql(format!("EXISTS ({sql})")),
            None => Fragment::Empty,
        })
    }
}
