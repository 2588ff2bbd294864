//! Parameter collection during compilation.
//!
//! Every literal that ends up in a compiled statement goes through a
//! [`ParamSink`]: the value is appended to the parameter list and a dialect
//! placeholder is returned in its place. Placeholders are numbered by their
//! absolute position, so one sink can be shared by a query and all of its
//! subqueries and the parameter list always matches the left-to-right order
//! of placeholders in the text.

use std::collections::HashSet;

use crate::dialect::Dialect;
use crate::value::Value;

/// An ordered parameter list with absolute placeholder numbering.
#[derive(Debug, Clone, Default)]
pub struct ParamSink {
    offset: usize,
    values: Vec<Value>,
}

impl ParamSink {
    /// Creates an empty sink numbering placeholders from 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty sink whose first placeholder is `offset + 1`.
    ///
    /// Used for members of a compound query, which are compiled separately
    /// but must continue the enclosing statement's numbering.
    pub const fn starting_at(offset: usize) -> Self {
        Self {
            offset,
            values: Vec::new(),
        }
    }

    /// Appends `value` and returns the placeholder standing in for it.
    pub fn push(&mut self, value: Value, dialect: &dyn Dialect) -> String {
        self.values.push(value);
        dialect.placeholder(self.offset + self.values.len())
    }

    /// Absolute number of parameters emitted so far, including the offset.
    pub fn position(&self) -> usize {
        self.offset + self.values.len()
    }

    /// Number of values held by this sink.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if this sink holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Marks the current end of the list.
    pub fn checkpoint(&self) -> usize {
        self.values.len()
    }

    /// Drops every value pushed after `checkpoint`.
    pub fn rollback(&mut self, checkpoint: usize) {
        self.values.truncate(checkpoint);
    }

    /// Appends the values of a sink that continued this one's numbering.
    pub fn append(&mut self, other: Self) {
        debug_assert_eq!(other.offset, self.position());
        self.values.extend(other.values);
    }

    /// Returns the collected values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the sink, returning the collected values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Mutable state of one compilation pass over a single statement.
///
/// Holds the shared parameter sink and the set of table aliases already
/// emitted, which nested subqueries consult so their aliases never collide
/// with an enclosing scope.
#[derive(Debug, Clone, Default)]
pub struct CompileState {
    /// The statement's parameter list.
    pub params: ParamSink,
    names: HashSet<String>,
}

impl CompileState {
    /// Creates state for a statement whose placeholders start after `offset`.
    pub fn starting_at(offset: usize) -> Self {
        Self {
            params: ParamSink::starting_at(offset),
            names: HashSet::new(),
        }
    }

    /// State for a compound-query member: numbering continues this state's,
    /// the names taken so far stay taken, and no values are shared.
    pub fn branch(&self) -> Self {
        Self {
            params: ParamSink::starting_at(self.params.position()),
            names: self.names.clone(),
        }
    }

    /// Reserves a unique alias, appending `_2`, `_3`, ... when `preferred` is taken.
    pub fn reserve_name(&mut self, preferred: &str) -> String {
        if self.names.insert(preferred.to_string()) {
            return preferred.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{preferred}_{n}");
            if self.names.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
