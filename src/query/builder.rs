//! Fluent query builder.
//!
//! A [`QueryBuilder`] accumulates query options and produces an immutable
//! [`QueryDescriptor`]. Invalid arguments are latched: the first error is
//! kept, later calls become no-ops, and [`QueryBuilder::build`] returns it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::BuilderConfig;
use crate::error::{QueryError, Result};
use crate::query::descriptor::{QueryDescriptor, SelectMode, SelectTree};
use crate::query::metadata::{path_segments, FieldKind, FieldMeta, MetadataProvider};
use crate::query::order::OrderByClause;
use crate::query::predicate::{Predicate, SimpleOp};
use crate::query::projection::{ProjectionAttribute, ProjectionKind};
use crate::query::value::Value;

/// Argument accepted by [`QueryBuilder::r#where`].
#[derive(Clone, Debug, PartialEq)]
pub struct WhereClause(Predicate);

impl WhereClause {
    /// Unwraps the predicate.
    pub fn into_predicate(self) -> Predicate {
        self.0
    }
}

impl From<Predicate> for WhereClause {
    fn from(predicate: Predicate) -> Self {
        WhereClause(predicate)
    }
}

impl<V> From<(&str, SimpleOp, V)> for WhereClause
where
    V: Into<Value>,
{
    fn from((path, op, value): (&str, SimpleOp, V)) -> Self {
        WhereClause(Predicate::simple(path, op, value))
    }
}

impl<V> From<(String, SimpleOp, V)> for WhereClause
where
    V: Into<Value>,
{
    fn from((path, op, value): (String, SimpleOp, V)) -> Self {
        WhereClause(Predicate::simple(path, op, value))
    }
}

/// Untyped `where` argument, for callers that assemble arguments at runtime.
#[derive(Clone, Debug, PartialEq)]
pub enum WhereArg {
    /// A complete predicate; must be the only argument.
    Predicate(Predicate),
    /// Attribute path; first of a `(path, op, value)` triple.
    Path(String),
    /// Operator; second of a triple.
    Op(SimpleOp),
    /// Literal; third of a triple.
    Value(Value),
}

/// Fluent builder producing [`QueryDescriptor`]s.
#[derive(Clone)]
pub struct QueryBuilder {
    metadata: Arc<dyn MetadataProvider>,
    config: BuilderConfig,
    entity_type: Option<String>,
    id: Option<Value>,
    predicate: Option<Predicate>,
    order: Option<OrderByClause>,
    top: Option<usize>,
    skip: Option<usize>,
    count: bool,
    select: Vec<String>,
    projection_name: Option<String>,
    data_type: Option<String>,
    custom_params: BTreeMap<String, String>,
    error: Option<QueryError>,
}

impl QueryBuilder {
    /// Creates a builder with default settings.
    pub fn new(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self::with_config(metadata, BuilderConfig::default())
    }

    /// Creates a builder with explicit settings.
    pub fn with_config(metadata: Arc<dyn MetadataProvider>, config: BuilderConfig) -> Self {
        Self {
            metadata,
            config,
            entity_type: None,
            id: None,
            predicate: None,
            order: None,
            top: None,
            skip: None,
            count: false,
            select: Vec::new(),
            projection_name: None,
            data_type: None,
            custom_params: BTreeMap::new(),
            error: None,
        }
    }

    /// Sets the queried entity type.
    pub fn from(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Restricts the query to the record with the given identity.
    pub fn by_id(mut self, id: impl Into<Value>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let id = id.into();
        if id.is_null() {
            self.record_error(QueryError::invalid("by_id requires a non-null identity"));
            return self;
        }
        self.id = Some(id);
        self
    }

    /// Adds a filter. Repeated calls are combined with And.
    pub fn r#where<W>(mut self, clause: W) -> Self
    where
        W: Into<WhereClause>,
    {
        if self.error.is_some() {
            return self;
        }
        self.append_predicate(clause.into().into_predicate());
        self
    }

    /// Adds a filter from untyped arguments: either a single predicate or a
    /// `(path, op, value)` triple.
    pub fn where_args(mut self, args: Vec<WhereArg>) -> Self {
        if self.error.is_some() {
            return self;
        }
        let count = args.len();
        let mut args = args.into_iter();
        let predicate = match (args.next(), args.next(), args.next(), args.next()) {
            (Some(WhereArg::Predicate(predicate)), None, None, None) => predicate,
            (Some(WhereArg::Path(path)), Some(WhereArg::Op(op)), Some(WhereArg::Value(v)), None) => {
                Predicate::simple(path, op, v)
            }
            _ => {
                self.record_error(QueryError::invalid(format!(
                    "where expects a predicate or (path, op, value), got {count} argument(s)"
                )));
                return self;
            }
        };
        self.append_predicate(predicate);
        self
    }

    /// Sets the ordering from a `"path [asc|desc], ..."` specification.
    pub fn order_by(mut self, spec: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match OrderByClause::parse(spec) {
            Ok(order) => self.order = Some(order),
            Err(err) => self.record_error(err),
        }
        self
    }

    /// Limits the number of returned records.
    pub fn top(mut self, n: usize) -> Self {
        self.top = Some(n);
        self
    }

    /// Skips the first `n` records.
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = Some(n);
        self
    }

    /// Requests the total count of matching records.
    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    /// Selects fields from a comma-separated list of dotted paths.
    pub fn select(mut self, fields: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        for field in fields.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            if !self.select.iter().any(|s| s == field) {
                self.select.push(field.to_owned());
            }
        }
        self
    }

    /// Selects fields from a named projection of the queried type.
    pub fn select_by_projection(mut self, name: impl Into<String>) -> Self {
        self.projection_name = Some(name.into());
        self
    }

    /// Restricts results to a derived type.
    pub fn of_data_type(mut self, type_name: impl Into<String>) -> Self {
        self.data_type = Some(type_name.into());
        self
    }

    /// Adds query parameters passed through to the remote service verbatim.
    pub fn with_custom_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.custom_params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Produces the descriptor. The builder is left untouched, so calling
    /// this twice yields equal descriptors.
    pub fn build(&self) -> Result<QueryDescriptor> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        let Some(entity_type) = self.entity_type.as_deref() else {
            return Err(QueryError::invalid("from() must name the queried type"));
        };
        let key_name = self.key_name(entity_type)?;
        if let Some(predicate) = &self.predicate {
            predicate.validate()?;
        }

        let mut select_tree = SelectTree::new(entity_type, &key_name, None);
        let select_mode = if let Some(name) = &self.projection_name {
            let projection = self.metadata.projection(entity_type, name)?;
            self.walk_projection(&mut select_tree, entity_type, &projection.attributes)?;
            SelectMode::Projection
        } else if !self.select.is_empty() {
            SelectMode::Explicit
        } else {
            SelectMode::All
        };
        for field in &self.select {
            let segments = path_segments(field)?;
            self.add_path(&mut select_tree, entity_type, &segments)?;
        }

        let mut extend_tree = SelectTree::new(entity_type, &key_name, None);
        if select_mode == SelectMode::All {
            self.add_closure(&mut extend_tree, entity_type, self.config.expand_depth)?;
        }
        for path in self.referenced_paths() {
            let segments = path_segments(&path)?;
            if !select_tree.covers(&segments) && !extend_tree.covers(&segments) {
                self.add_path(&mut extend_tree, entity_type, &segments)?;
            }
        }

        debug!(
            entity = entity_type,
            mode = ?select_mode,
            select = select_tree.select.len(),
            extend = extend_tree.select.len(),
            "query.builder.build"
        );

        Ok(QueryDescriptor {
            entity_type: entity_type.to_owned(),
            id: self.id.clone(),
            projection_name: self.projection_name.clone(),
            predicate: self.predicate.clone(),
            order: self.order.clone(),
            top: self.top,
            skip: self.skip,
            count: self.count,
            data_type: self.data_type.clone(),
            select_mode,
            select_tree,
            extend_tree,
            custom_params: self.custom_params.clone(),
        })
    }

    fn record_error(&mut self, err: QueryError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn append_predicate(&mut self, predicate: Predicate) {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
    }

    /// Attribute paths read by the filter and the ordering.
    fn referenced_paths(&self) -> Vec<String> {
        let mut paths = self
            .predicate
            .as_ref()
            .map(Predicate::attribute_paths)
            .unwrap_or_default();
        if let Some(order) = &self.order {
            paths.extend(order.items().iter().map(|item| item.path.clone()));
        }
        paths
    }

    fn key_name(&self, entity_type: &str) -> Result<String> {
        let key = self.metadata.key(entity_type)?;
        Ok(key.remote_name.unwrap_or(key.name))
    }

    fn child_node(&self, meta: &FieldMeta) -> Result<SelectTree> {
        let target = meta.target_type.as_deref().unwrap_or_default();
        Ok(SelectTree::new(
            target,
            self.key_name(target)?,
            meta.relationship,
        ))
    }

    fn walk_projection(
        &self,
        node: &mut SelectTree,
        entity_type: &str,
        attributes: &[ProjectionAttribute],
    ) -> Result<()> {
        for attribute in attributes {
            let meta = self.metadata.resolve(entity_type, &attribute.name)?;
            match attribute.kind {
                ProjectionKind::Attr => node.add_select(&attribute.name),
                ProjectionKind::BelongsTo | ProjectionKind::HasMany => {
                    if !meta.is_relationship() {
                        return Err(QueryError::NotARelationship {
                            model: entity_type.to_owned(),
                            prop: attribute.name.clone(),
                        });
                    }
                    let fresh = self.child_node(&meta)?;
                    let target = fresh.entity_type.clone();
                    let child = node.expand_entry(&attribute.name, || fresh);
                    self.walk_projection(child, &target, &attribute.attributes)?;
                }
            }
        }
        Ok(())
    }

    /// Adds one dotted path, creating expand nodes for every relationship
    /// segment on the way.
    fn add_path(&self, node: &mut SelectTree, entity_type: &str, segments: &[&str]) -> Result<()> {
        match segments {
            [] => Ok(()),
            [last] => {
                self.metadata.resolve(entity_type, last)?;
                node.add_select(last);
                Ok(())
            }
            [head, rest @ ..] => {
                let meta = self.metadata.resolve(entity_type, head)?;
                if !meta.is_relationship() {
                    return Err(QueryError::NotARelationship {
                        model: entity_type.to_owned(),
                        prop: (*head).to_owned(),
                    });
                }
                let fresh = self.child_node(&meta)?;
                let target = fresh.entity_type.clone();
                let child = node.expand_entry(head, || fresh);
                self.add_path(child, &target, rest)
            }
        }
    }

    /// Selects every field of `entity_type`, expanding relationships until
    /// `depth` levels have been used. Relationships past the bound are
    /// selected as references only.
    fn add_closure(&self, node: &mut SelectTree, entity_type: &str, depth: usize) -> Result<()> {
        for field in self.metadata.fields(entity_type)? {
            match field.kind {
                FieldKind::Attribute => node.add_select(&field.name),
                FieldKind::BelongsTo | FieldKind::HasMany if depth > 0 => {
                    let fresh = self.child_node(&field)?;
                    let target = fresh.entity_type.clone();
                    let child = node.expand_entry(&field.name, || fresh);
                    self.add_closure(child, &target, depth - 1)?;
                }
                FieldKind::BelongsTo | FieldKind::HasMany => node.add_select(&field.name),
            }
        }
        Ok(())
    }
}
