//! Query descriptor produced by the builder and consumed, read-only, by every
//! translator.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::query::metadata::RelationshipMeta;
use crate::query::order::OrderByClause;
use crate::query::predicate::{Predicate, SimpleOp};
use crate::query::value::{Value, ID_FIELD};

/// Recursive description of the fields (select) and related records
/// (expand) requested for one entity type.
///
/// Every node selects the identity field, and every expanded relationship is
/// also selected.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SelectTree {
    /// Entity type of the records at this level.
    pub entity_type: String,
    /// Remote name of the identity field.
    pub primary_key_name: String,
    /// Selected local field names, identity first.
    pub select: Vec<String>,
    /// Expanded relationships keyed by local field name.
    pub expand: BTreeMap<String, SelectTree>,
    /// Flags of the relationship that led here; `None` at the root.
    pub relationship: Option<RelationshipMeta>,
}

impl SelectTree {
    /// Creates a node that selects only the identity field.
    pub fn new(
        entity_type: impl Into<String>,
        primary_key_name: impl Into<String>,
        relationship: Option<RelationshipMeta>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            primary_key_name: primary_key_name.into(),
            select: vec![ID_FIELD.to_owned()],
            expand: BTreeMap::new(),
            relationship,
        }
    }

    /// Adds a field to the select list, keeping first-seen order.
    pub fn add_select(&mut self, name: &str) {
        if !self.select.iter().any(|s| s == name) {
            self.select.push(name.to_owned());
        }
    }

    /// Returns the expanded child for `name`, creating it with `make` when
    /// missing. The relationship is added to the select list too.
    pub fn expand_entry<F>(&mut self, name: &str, make: F) -> &mut SelectTree
    where
        F: FnOnce() -> SelectTree,
    {
        self.add_select(name);
        self.expand.entry(name.to_owned()).or_insert_with(make)
    }

    /// True when `segments` is reachable through this tree: every
    /// non-terminal segment is expanded and the terminal one is selected.
    pub fn covers(&self, segments: &[&str]) -> bool {
        match segments {
            [] => true,
            [last] => self.select.iter().any(|s| s == last),
            [head, rest @ ..] => self
                .expand
                .get(*head)
                .is_some_and(|child| child.covers(rest)),
        }
    }

    /// True when nothing beyond the identity field is requested.
    pub fn is_trivial(&self) -> bool {
        self.expand.is_empty() && self.select.iter().all(|s| s == ID_FIELD)
    }

    /// Unions `other` into `self`.
    pub fn merge(&mut self, other: &SelectTree) {
        for name in &other.select {
            self.add_select(name);
        }
        for (name, child) in &other.expand {
            match self.expand.get_mut(name) {
                Some(existing) => existing.merge(child),
                None => {
                    self.expand.insert(name.clone(), child.clone());
                }
            }
        }
    }

    /// Returns the union of two trees.
    pub fn merged(&self, other: &SelectTree) -> SelectTree {
        let mut out = self.clone();
        out.merge(other);
        out
    }
}

/// How the select tree was requested.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectMode {
    /// From a named projection.
    Projection,
    /// From an explicit comma-separated list.
    Explicit,
    /// Nothing requested: fetch the bounded closure of every field.
    All,
}

/// Immutable description of a query.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QueryDescriptor {
    /// Queried entity type.
    pub entity_type: String,
    /// Identity lookup.
    pub id: Option<Value>,
    /// Projection used to build the select tree.
    pub projection_name: Option<String>,
    /// Filter.
    pub predicate: Option<Predicate>,
    /// Ordering.
    pub order: Option<OrderByClause>,
    /// Maximum number of records.
    pub top: Option<usize>,
    /// Number of records to skip.
    pub skip: Option<usize>,
    /// Request the total count.
    pub count: bool,
    /// Derived type the results are restricted to.
    pub data_type: Option<String>,
    /// Origin of the select tree.
    pub select_mode: SelectMode,
    /// Fields requested for display.
    pub select_tree: SelectTree,
    /// Fields needed only by the predicate or ordering, or the full closure
    /// when nothing was requested.
    pub extend_tree: SelectTree,
    /// Caller-supplied query parameters passed through verbatim.
    pub custom_params: BTreeMap<String, String>,
}

impl QueryDescriptor {
    /// Everything that must be fetched: select tree plus extend tree.
    pub fn fetch_tree(&self) -> SelectTree {
        self.select_tree.merged(&self.extend_tree)
    }

    /// Shape of the returned records. Without an explicit selection the
    /// whole fetched closure is returned.
    pub fn output_tree(&self) -> SelectTree {
        match self.select_mode {
            SelectMode::All => self.fetch_tree(),
            SelectMode::Projection | SelectMode::Explicit => self.select_tree.clone(),
        }
    }

    /// Predicate with the identity lookup ANDed in.
    pub fn effective_predicate(&self) -> Option<Predicate> {
        let by_id = self
            .id
            .clone()
            .map(|id| Predicate::simple(ID_FIELD, SimpleOp::Eq, id));
        match (self.predicate.clone(), by_id) {
            (Some(predicate), Some(by_id)) => Some(predicate.and(by_id)),
            (Some(predicate), None) => Some(predicate),
            (None, by_id) => by_id,
        }
    }
}
