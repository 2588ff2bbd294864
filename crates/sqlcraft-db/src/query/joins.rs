//! Table aliases and the join graph.
//!
//! Every table a query touches gets an [`AliasEntry`] in the query's
//! [`AliasMap`]. The base table is created with the query; related tables are
//! added by [`AliasMap::resolve_path`] the first time a lookup path walks a
//! relationship, and reused for every later walk of the same
//! (parent alias, relationship) step. That reuse is what makes a filter and a
//! projection through `customer` share a single join.
//!
//! Join kinds are decided in two steps. At allocation a nullable
//! relationship (or any step below an outer join) is LEFT and everything else
//! INNER. Walks made from inside an OR branch or a negated branch only *mark*
//! the entries they touch; [`AliasMap::plan`] turns marked INNER joins into
//! LEFT joins, propagates LEFT to descendants and skips joins nothing
//! references anymore. Nothing ever turns a LEFT join back into INNER.

use std::collections::HashMap;

use sqlcraft_core::{QueryError, QueryResult};

use crate::model::ModelRegistry;
use crate::query::expressions::Subquery;

/// SQL JOIN types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// The base table of the query (no JOIN keyword).
    Base,
    /// INNER JOIN.
    Inner,
    /// LEFT OUTER JOIN.
    LeftOuter,
}

impl JoinType {
    /// Returns the SQL keyword for this join type.
    pub const fn sql_keyword(self) -> &'static str {
        match self {
            Self::Base => "",
            Self::Inner => "INNER JOIN",
            Self::LeftOuter => "LEFT OUTER JOIN",
        }
    }
}

/// What an alias stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum TableSource {
    /// A physical table.
    Table(String),
    /// A derived table built from a subquery.
    Subquery(Subquery),
}

/// The context a path is resolved in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinContext {
    /// The walk happens inside an OR branch.
    pub in_disjunction: bool,
    /// The walk happens under an odd number of negations.
    pub negated: bool,
}

impl JoinContext {
    /// Joins walked in this context must be outer joins.
    pub const fn requires_outer(self) -> bool {
        self.in_disjunction || self.negated
    }
}

/// One table reference in a query.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasEntry {
    /// The alias, unique within the query.
    pub alias: String,
    /// The table or derived table behind the alias.
    pub source: TableSource,
    /// The model whose rows the table holds, `None` for derived tables.
    pub model: Option<String>,
    /// The alias this one was joined from, `None` for the base table.
    pub parent: Option<String>,
    /// The relationship walked from `parent`.
    pub relation: Option<String>,
    /// The join kind chosen at allocation or by promotion.
    pub join_type: JoinType,
    /// `(parent column, own column)` of the equi-join predicate.
    pub join_columns: Option<(String, String)>,
    /// Whether the relationship can produce no matching row.
    pub nullable: bool,
    /// How many live references point at this alias.
    pub ref_count: usize,
    /// Whether a walk from an OR or negated context reached this alias.
    pub outer_context: bool,
}

/// One entry of a finalized join plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedJoin {
    /// The alias of the entry.
    pub alias: String,
    /// The join kind after promotion.
    pub join_type: JoinType,
    /// Whether the entry appears in the FROM clause.
    pub emitted: bool,
}

/// The alias map of one query descriptor.
///
/// Entries keep their creation order, which is the order joins are emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasMap {
    entries: Vec<AliasEntry>,
    by_alias: HashMap<String, usize>,
    by_step: HashMap<(String, String), usize>,
}

impl AliasMap {
    /// Creates a map holding only the base table.
    pub fn new(alias: impl Into<String>, source: TableSource, model: Option<String>) -> Self {
        let alias = alias.into();
        let base = AliasEntry {
            alias: alias.clone(),
            source,
            model,
            parent: None,
            relation: None,
            join_type: JoinType::Base,
            join_columns: None,
            nullable: false,
            ref_count: 0,
            outer_context: false,
        };
        Self {
            entries: vec![base],
            by_alias: HashMap::from([(alias, 0)]),
            by_step: HashMap::new(),
        }
    }

    /// The base entry.
    pub fn base(&self) -> &AliasEntry {
        &self.entries[0]
    }

    /// The base alias.
    pub fn base_alias(&self) -> &str {
        &self.entries[0].alias
    }

    /// Looks up an entry by alias.
    pub fn get(&self, alias: &str) -> Option<&AliasEntry> {
        self.by_alias.get(alias).map(|&i| &self.entries[i])
    }

    /// All entries in creation order.
    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    /// Number of entries, the base included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: a map holds at least the base table.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The existing alias for the `relation` step from `parent`, if any.
    pub fn child(&self, parent: &str, relation: &str) -> Option<&AliasEntry> {
        self.by_step
            .get(&(parent.to_string(), relation.to_string()))
            .map(|&i| &self.entries[i])
    }

    /// Walks `path` from `parent`, reusing or allocating one alias per step.
    ///
    /// Returns the alias of the last step. Every step must be a relationship
    /// of the model reached so far, otherwise `UnknownRelationship`. Aliases
    /// reached from an OR or negated `context` are marked for promotion.
    /// Reference counts are not touched; see [`ref_chain`](Self::ref_chain).
    pub fn resolve_path(
        &mut self,
        registry: &ModelRegistry,
        parent: &str,
        path: &[&str],
        context: JoinContext,
    ) -> QueryResult<String> {
        let mut current = parent.to_string();
        for segment in path {
            let idx = match self.by_step.get(&(current.clone(), (*segment).to_string())) {
                Some(&idx) => idx,
                None => self.allocate(registry, &current, segment)?,
            };
            if context.requires_outer() && !self.entries[idx].outer_context {
                self.entries[idx].outer_context = true;
                tracing::trace!(alias = %self.entries[idx].alias, "Join marked for outer promotion");
            }
            current.clone_from(&self.entries[idx].alias);
        }
        Ok(current)
    }

    fn allocate(&mut self, registry: &ModelRegistry, parent: &str, segment: &str) -> QueryResult<usize> {
        let parent_idx = *self
            .by_alias
            .get(parent)
            .ok_or_else(|| QueryError::unknown_relationship(parent, segment))?;
        let parent_entry = &self.entries[parent_idx];
        let Some(model) = parent_entry.model.as_deref() else {
            return Err(QueryError::unknown_relationship(parent, segment));
        };
        let relation = registry.relation(model, segment)?;
        let target = registry.get(&relation.target_model)?;

        let preferred = if parent_idx == 0 {
            segment.to_string()
        } else {
            format!("{parent}__{segment}")
        };
        let alias = self.unique_alias(&preferred);
        let join_type = if relation.nullable || parent_entry.join_type == JoinType::LeftOuter {
            JoinType::LeftOuter
        } else {
            JoinType::Inner
        };

        tracing::trace!(
            alias = %alias,
            table = %target.db_table,
            parent = parent,
            join = join_type.sql_keyword(),
            "Allocated join alias"
        );

        let idx = self.entries.len();
        self.entries.push(AliasEntry {
            alias: alias.clone(),
            source: TableSource::Table(target.db_table.clone()),
            model: Some(relation.target_model.clone()),
            parent: Some(parent.to_string()),
            relation: Some(segment.to_string()),
            join_type,
            join_columns: Some((relation.from_column, relation.to_column)),
            nullable: relation.nullable,
            ref_count: 0,
            outer_context: false,
        });
        self.by_alias.insert(alias, idx);
        self.by_step
            .insert((parent.to_string(), segment.to_string()), idx);
        Ok(idx)
    }

    fn unique_alias(&self, preferred: &str) -> String {
        if !self.by_alias.contains_key(preferred) {
            return preferred.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{preferred}_{n}");
            if !self.by_alias.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Turns an INNER join into a LEFT OUTER join. Idempotent.
    pub fn promote_to_outer(&mut self, alias: &str) {
        if let Some(&idx) = self.by_alias.get(alias) {
            let entry = &mut self.entries[idx];
            if entry.join_type == JoinType::Inner {
                entry.join_type = JoinType::LeftOuter;
                tracing::trace!(alias = alias, "Promoted join to LEFT OUTER");
            }
        }
    }

    /// Marks `alias` and its ancestors as referenced from an OR or negated context.
    pub fn mark_outer_context(&mut self, alias: &str) {
        let mut current = Some(alias.to_string());
        while let Some(a) = current {
            let Some(&idx) = self.by_alias.get(&a) else { break };
            let entry = &mut self.entries[idx];
            if entry.join_type != JoinType::Base {
                entry.outer_context = true;
            }
            current = entry.parent.clone();
        }
    }

    /// Adds one reference to `alias` and to every alias on its path from the base.
    pub fn ref_chain(&mut self, alias: &str) {
        self.adjust_chain(alias, |count| *count += 1);
    }

    /// Releases a reference taken by [`ref_chain`](Self::ref_chain).
    pub fn unref_chain(&mut self, alias: &str) {
        self.adjust_chain(alias, |count| *count = count.saturating_sub(1));
    }

    fn adjust_chain(&mut self, alias: &str, adjust: impl Fn(&mut usize)) {
        let mut current = Some(alias.to_string());
        while let Some(a) = current {
            let Some(&idx) = self.by_alias.get(&a) else { break };
            adjust(&mut self.entries[idx].ref_count);
            current = self.entries[idx].parent.clone();
        }
    }

    /// Computes the effective join kinds and which joins are emitted.
    ///
    /// Entries marked from an OR/negated context become LEFT, LEFT
    /// propagates to every descendant, and a join is emitted only when it or
    /// one of its descendants is still referenced. The base is always emitted.
    pub fn plan(&self) -> Vec<PlannedJoin> {
        let mut kinds: Vec<JoinType> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let parent_outer = entry
                .parent
                .as_ref()
                .and_then(|p| self.by_alias.get(p))
                .is_some_and(|&i| kinds[i] == JoinType::LeftOuter);
            let kind = match entry.join_type {
                JoinType::Base => JoinType::Base,
                JoinType::Inner if entry.outer_context || parent_outer => JoinType::LeftOuter,
                other => other,
            };
            kinds.push(kind);
        }

        let mut needed: Vec<bool> = self.entries.iter().map(|e| e.ref_count > 0).collect();
        needed[0] = true;
        for idx in (1..self.entries.len()).rev() {
            if needed[idx] {
                if let Some(&p) = self.entries[idx]
                    .parent
                    .as_ref()
                    .and_then(|p| self.by_alias.get(p))
                {
                    needed[p] = true;
                }
            }
        }

        self.entries
            .iter()
            .zip(kinds)
            .zip(needed)
            .map(|((entry, join_type), emitted)| PlannedJoin {
                alias: entry.alias.clone(),
                join_type,
                emitted,
            })
            .collect()
    }
}
