//! The condition tree behind WHERE and HAVING.
//!
//! A [`WhereNode`] is an immutable tagged tree: leaves are resolved
//! predicates, `EXISTS` tests or the [`WhereNode::Nothing`] marker, and
//! branches join children with AND/OR and may be negated. Children are held
//! in `Arc`s so a refined descriptor shares every subtree it did not touch
//! with the descriptor it was derived from.
//!
//! Rendering is three-valued. A subtree can render to SQL text, to
//! [`Fragment::Empty`] (it can never match) or to [`Fragment::Full`] (it
//! always matches), and the connector rules fold those outcomes the way
//! relational logic does. Leaf rendering is delegated to a [`LeafCompiler`]
//! so the tree never needs to know about aliases, dialects or subqueries.

use std::sync::Arc;

use sqlcraft_core::QueryResult;

use crate::query::expressions::{Expression, Subquery};
use crate::query::lookups::Lookup;
use crate::query::params::CompileState;

/// How the children of a branch are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connector {
    /// All children must hold.
    And,
    /// At least one child must hold.
    Or,
}

impl Connector {
    /// The separator placed between rendered children.
    pub const fn sql_keyword(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

/// A resolved comparison: left-hand expression plus lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// The compared expression, with every field path already resolved.
    pub lhs: Expression,
    /// The comparison and its operands.
    pub lookup: Lookup,
}

/// A node of the condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereNode {
    /// A single predicate.
    Leaf(Predicate),
    /// `EXISTS (subquery)`.
    Exists(Subquery),
    /// Matches no rows.
    Nothing,
    /// AND/OR over children, optionally negated.
    Branch {
        /// How children are combined.
        connector: Connector,
        /// Whether the whole branch is wrapped in `NOT (...)`.
        negated: bool,
        /// The children, in the order they were added.
        children: Vec<Arc<WhereNode>>,
    },
}

/// The outcome of rendering a condition (sub)tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// SQL text for the condition.
    Sql(String),
    /// The condition can never hold.
    Empty,
    /// The condition always holds and needs no SQL.
    Full,
}

/// Renders the leaves of a condition tree.
///
/// Implemented by the compiler, which owns alias resolution, the dialect and
/// subquery compilation.
pub trait LeafCompiler {
    /// Renders one predicate, pushing its operands into `state.params`.
    fn compile_predicate(
        &self,
        predicate: &Predicate,
        state: &mut CompileState,
    ) -> QueryResult<Fragment>;

    /// Renders an `EXISTS` test.
    fn compile_exists(&self, subquery: &Subquery, state: &mut CompileState)
        -> QueryResult<Fragment>;
}

enum Rendered {
    Sql(String, Option<Connector>),
    Empty,
    Full,
}

/// What a subtree is known to match before any leaf is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Known {
    Empty,
    Full,
    Open,
}

impl Default for WhereNode {
    fn default() -> Self {
        Self::empty()
    }
}

impl WhereNode {
    /// An empty AND branch: no constraint.
    pub const fn empty() -> Self {
        Self::Branch {
            connector: Connector::And,
            negated: false,
            children: Vec::new(),
        }
    }

    /// A leaf predicate.
    pub const fn leaf(lhs: Expression, lookup: Lookup) -> Self {
        Self::Leaf(Predicate { lhs, lookup })
    }

    /// An un-negated branch.
    pub const fn branch(connector: Connector, children: Vec<Arc<Self>>) -> Self {
        Self::Branch {
            connector,
            negated: false,
            children,
        }
    }

    /// `NOT (node)`.
    pub fn negate(node: Arc<Self>) -> Self {
        Self::Branch {
            connector: Connector::And,
            negated: true,
            children: vec![node],
        }
    }

    /// Returns `true` for a branch without children.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Branch { children, .. } if children.is_empty())
    }

    /// Returns `true` if this tree can never match any row.
    ///
    /// Folds [`Nothing`](Self::Nothing) markers and subqueries over empty
    /// descriptors with the connector rules used by
    /// [`render`](Self::render), so `NOT (nothing)` and `x OR nothing` are
    /// not empty.
    pub fn matches_nothing(&self) -> bool {
        self.fold_known() == Known::Empty
    }

    fn fold_known(&self) -> Known {
        let (connector, negated, children) = match self {
            Self::Nothing => return Known::Empty,
            Self::Leaf(Predicate {
                lookup: Lookup::InSubquery(subquery),
                ..
            })
            | Self::Exists(subquery)
                if subquery.query().is_empty() =>
            {
                return Known::Empty
            }
            Self::Leaf(_) | Self::Exists(_) => return Known::Open,
            Self::Branch {
                connector,
                negated,
                children,
            } => (*connector, *negated, children),
        };
        if children.is_empty() {
            return Known::Full;
        }

        let (mut empty, mut full) = (0, 0);
        for child in children {
            match child.fold_known() {
                Known::Empty => empty += 1,
                Known::Full => full += 1,
                Known::Open => {}
            }
        }
        let folded = match connector {
            Connector::And if empty > 0 => Known::Empty,
            Connector::And if full == children.len() => Known::Full,
            Connector::Or if full > 0 => Known::Full,
            Connector::Or if empty == children.len() => Known::Empty,
            _ => Known::Open,
        };
        match (negated, folded) {
            (true, Known::Empty) => Known::Full,
            (true, Known::Full) => Known::Empty,
            (_, known) => known,
        }
    }

    /// Merges `node` into `root` under `connector`, returning the new root.
    ///
    /// `root` is left untouched; unchanged children are shared.
    ///
    /// - an empty root is replaced by `node`;
    /// - an un-negated root with the same connector gains `node` as a child,
    ///   or `node`'s children when `node` is an un-negated branch of the same
    ///   connector;
    /// - any other root becomes the first child of a new `connector` branch.
    pub fn merge(root: &Arc<Self>, node: Arc<Self>, connector: Connector) -> Arc<Self> {
        if root.is_empty() {
            return node;
        }
        if node.is_empty() {
            return Arc::clone(root);
        }
        let mut children = match root.as_ref() {
            Self::Branch {
                connector: c,
                negated: false,
                children,
            } if *c == connector => children.clone(),
            _ => vec![Arc::clone(root)],
        };
        match node.as_ref() {
            Self::Branch {
                connector: c,
                negated: false,
                children: spliced,
            } if *c == connector => children.extend(spliced.iter().cloned()),
            _ => children.push(node),
        }
        Arc::new(Self::branch(connector, children))
    }

    /// Visits every expression in leaf predicates (left-hand sides and operands).
    ///
    /// Does not descend into subqueries.
    pub fn walk_expressions(&self, visit: &mut impl FnMut(&Expression)) {
        match self {
            Self::Leaf(p) => {
                p.lhs.walk(visit);
                for operand in p.lookup.operands() {
                    operand.walk(visit);
                }
            }
            Self::Branch { children, .. } => {
                for child in children {
                    child.walk_expressions(visit);
                }
            }
            Self::Exists(_) | Self::Nothing => {}
        }
    }

    /// Visits every subquery referenced by this tree.
    pub fn walk_subqueries(&self, visit: &mut impl FnMut(&Subquery)) {
        match self {
            Self::Leaf(p) => {
                if let Lookup::InSubquery(s) = &p.lookup {
                    visit(s);
                }
                let mut exprs = vec![&p.lhs];
                exprs.extend(p.lookup.operands());
                for e in exprs {
                    e.walk(&mut |e| {
                        if let Expression::Subquery(s) | Expression::Exists(s) = e {
                            visit(s);
                        }
                    });
                }
            }
            Self::Exists(s) => visit(s),
            Self::Branch { children, .. } => {
                for child in children {
                    child.walk_subqueries(visit);
                }
            }
            Self::Nothing => {}
        }
    }

    /// Returns `true` if any predicate compares an aggregate.
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk_expressions(&mut |e| found |= matches!(e, Expression::Aggregate { .. }));
        found
    }

    /// Renders this tree.
    ///
    /// The top level is never parenthesized. Parameters pushed by children
    /// that turn out `Empty` or `Full` are rolled back.
    pub fn render<C: LeafCompiler + ?Sized>(
        &self,
        compiler: &C,
        state: &mut CompileState,
    ) -> QueryResult<Fragment> {
        Ok(match self.render_tagged(compiler, state)? {
            Rendered::Sql(sql, _) => Fragment::Sql(sql),
            Rendered::Empty => Fragment::Empty,
            Rendered::Full => Fragment::Full,
        })
    }

    fn render_tagged<C: LeafCompiler + ?Sized>(
        &self,
        compiler: &C,
        state: &mut CompileState,
    ) -> QueryResult<Rendered> {
        let (connector, negated, children) = match self {
            Self::Leaf(p) => return Ok(untagged(compiler.compile_predicate(p, state)?)),
            Self::Exists(s) => return Ok(untagged(compiler.compile_exists(s, state)?)),
            Self::Nothing => return Ok(Rendered::Empty),
            Self::Branch {
                connector,
                negated,
                children,
            } => (*connector, *negated, children),
        };

        // Number of children that must be Full (resp. Empty) for the whole
        // branch to be Full (resp. Empty).
        let (mut full_needed, mut empty_needed) = match connector {
            Connector::And => (children.len(), 1),
            Connector::Or => (1, children.len()),
        };
        let (if_empty, if_full) = if negated {
            (Rendered::Full, Rendered::Empty)
        } else {
            (Rendered::Empty, Rendered::Full)
        };

        let branch_checkpoint = state.params.checkpoint();
        let mut parts: Vec<(String, Option<Connector>)> = Vec::with_capacity(children.len());
        for child in children {
            let checkpoint = state.params.checkpoint();
            match child.render_tagged(compiler, state)? {
                Rendered::Sql(sql, tag) => parts.push((sql, tag)),
                Rendered::Empty => {
                    state.params.rollback(checkpoint);
                    empty_needed -= 1;
                }
                Rendered::Full => {
                    state.params.rollback(checkpoint);
                    full_needed -= 1;
                }
            }
            if empty_needed == 0 {
                state.params.rollback(branch_checkpoint);
                return Ok(if_empty);
            }
            if full_needed == 0 {
                state.params.rollback(branch_checkpoint);
                return Ok(if_full);
            }
        }

        if parts.is_empty() {
            return Ok(if_full);
        }

        let single = parts.len() == 1;
        let mut rendered: Vec<String> = Vec::with_capacity(parts.len());
        let mut single_tag = None;
        for (sql, tag) in parts {
            if single {
                single_tag = tag;
                rendered.push(sql);
            } else if tag.is_some_and(|t| t != connector) {
                rendered.push(format!("({sql})"));
            } else {
                rendered.push(sql);
            }
        }
        let joined = rendered.join(connector.sql_keyword());

        Ok(if negated {
            Rendered::Sql(format!("NOT ({joined})"), None)
        } else if single {
            Rendered::Sql(joined, single_tag)
        } else {
            Rendered::Sql(joined, Some(connector))
        })
    }
}

fn untagged(fragment: Fragment) -> Rendered {
    match fragment {
        Fragment::Sql(sql) => Rendered::Sql(sql, None),
        Fragment::Empty => Rendered::Empty,
        Fragment::Full => Rendered::Full,
    }
}
