//! In-memory translator: runs a [`QueryDescriptor`] over plain records.
//!
//! Compilation produces a [`CompiledQuery`] made of four stages, each of
//! which can be built and used on its own:
//!
//! 1. [`RecordFilter`]: per-record boolean test from the predicate tree.
//! 2. [`RecordOrder`]: stable multi-key comparator.
//! 3. [`paginate`]: skip then top.
//! 4. [`project`]: reshapes records to the requested select tree.
//!
//! Records are keyed by local field names. Master relationships are nested
//! objects and detail relationships are arrays of objects; a path that ends on
//! a nested object reads that object's identity field.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{QueryError, Result};
use crate::query::date::{DateService, Rfc3339Dates};
use crate::query::descriptor::{QueryDescriptor, SelectTree};
use crate::query::metadata::{path_segments, resolve_detail, resolve_path, FieldKind, MetadataProvider};
use crate::query::order::OrderByClause;
use crate::query::predicate::{Condition, Param, Predicate, Quantifier, SimpleOp};
use crate::query::value::{Record, Value, ID_FIELD};

/// Key of the runtime type discriminator stored next to a polymorphic master.
fn discriminator_key(relationship: &str) -> String {
    format!("_{relationship}_type")
}

#[derive(Clone, Debug)]
enum Operand {
    Path(Vec<String>),
    Const(Value),
}

impl Operand {
    fn read<'r>(&'r self, record: &'r Record) -> &'r Value {
        match self {
            Operand::Path(path) => lookup(record, path),
            Operand::Const(value) => value,
        }
    }
}

#[derive(Clone, Debug)]
enum FilterNode {
    Compare {
        left: Operand,
        op: SimpleOp,
        right: Operand,
        /// `Some(timeless)` for date comparisons.
        date: Option<bool>,
    },
    Contains {
        path: Vec<String>,
        needle: String,
    },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    Detail {
        path: Vec<String>,
        quantifier: Quantifier,
        inner: Box<FilterNode>,
    },
    Const(bool),
}

/// Compiled predicate test.
#[derive(Clone)]
pub struct RecordFilter {
    root: FilterNode,
    dates: Arc<dyn DateService>,
}

impl std::fmt::Debug for RecordFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFilter")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl RecordFilter {
    /// Tests one record.
    pub fn matches(&self, record: &Record) -> bool {
        self.eval(&self.root, record)
    }

    fn eval(&self, node: &FilterNode, record: &Record) -> bool {
        match node {
            FilterNode::Compare {
                left,
                op,
                right,
                date,
            } => self.compare(left.read(record), *op, right.read(record), *date),
            FilterNode::Contains { path, needle } => match lookup(record, path) {
                Value::Null => false,
                Value::String(s) => s.to_lowercase().contains(needle.as_str()),
                other => other.to_string().to_lowercase().contains(needle.as_str()),
            },
            FilterNode::And(children) => {
                for child in children {
                    if !self.eval(child, record) {
                        return false;
                    }
                }
                true
            }
            FilterNode::Or(children) => {
                for child in children {
                    if self.eval(child, record) {
                        return true;
                    }
                }
                false
            }
            FilterNode::Not(inner) => !self.eval(inner, record),
            FilterNode::Detail {
                path,
                quantifier,
                inner,
            } => {
                let items = lookup(record, path).as_list().unwrap_or_default();
                let passed = items
                    .iter()
                    .filter(|item| {
                        item.as_object()
                            .is_some_and(|object| self.eval(inner, object))
                    })
                    .count();
                match quantifier {
                    Quantifier::All => passed == items.len(),
                    Quantifier::Any => passed > 0,
                }
            }
            FilterNode::Const(value) => *value,
        }
    }

    fn compare(&self, left: &Value, op: SimpleOp, right: &Value, date: Option<bool>) -> bool {
        let as_dates = date.is_some()
            || matches!(left, Value::DateTime(_))
            || matches!(right, Value::DateTime(_));
        if as_dates && !left.is_null() && !right.is_null() {
            if let (Some(l), Some(r)) = (self.dates.parse(left), self.dates.parse(right)) {
                let ord = if date == Some(true) {
                    l.date().cmp(&r.date())
                } else {
                    l.cmp(&r)
                };
                return op.matches(ord);
            }
        }
        match left.compare(right) {
            Some(ord) => op.matches(ord),
            None => op == SimpleOp::Neq,
        }
    }
}

/// Compiled multi-key comparator.
#[derive(Clone, Debug, Default)]
pub struct RecordOrder {
    keys: Vec<(Vec<String>, bool)>,
}

impl RecordOrder {
    /// Compares two records key by key; ties fall through to the next key.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for (path, desc) in &self.keys {
            let ord = lookup(a, path).sort_cmp(lookup(b, path));
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Stable sort in place.
    pub fn sort(&self, records: &mut [Record]) {
        if !self.keys.is_empty() {
            records.sort_by(|a, b| self.compare(a, b));
        }
    }
}

/// Applies `skip` then `top` in a single pass.
pub fn paginate<I>(records: I, skip: Option<usize>, top: Option<usize>) -> Vec<Record>
where
    I: IntoIterator<Item = Record>,
{
    records
        .into_iter()
        .skip(skip.unwrap_or(0))
        .take(top.unwrap_or(usize::MAX))
        .collect()
}

/// Reshapes a record to the fields of `tree`. Expanded masters become nested
/// objects, expanded details become arrays; a polymorphic master also keeps
/// its `_<name>_type` discriminator when the source record has one.
pub fn project(record: &Record, tree: &SelectTree) -> Record {
    let mut out = Record::new();
    for name in &tree.select {
        if tree.expand.contains_key(name) {
            continue;
        }
        if let Some(value) = record.get(name) {
            out.insert(name.clone(), value.clone());
        }
    }
    for (name, child) in &tree.expand {
        let Some(value) = record.get(name) else {
            continue;
        };
        let reshaped = match value {
            Value::Object(nested) => Value::Object(project(nested, child)),
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Object(nested) => Value::Object(project(nested, child)),
                        other => other.clone(),
                    })
                    .collect(),
            ),
            other => other.clone(),
        };
        out.insert(name.clone(), reshaped);
        let polymorphic = child
            .relationship
            .is_some_and(|rel| rel.is_polymorphic && rel.kind == FieldKind::BelongsTo);
        if polymorphic {
            let key = discriminator_key(name);
            if let Some(discriminator) = record.get(&key) {
                out.insert(key, discriminator.clone());
            }
        }
    }
    out
}

/// Executable form of a descriptor.
#[derive(Clone, Debug)]
pub struct CompiledQuery {
    filter: Option<RecordFilter>,
    order: RecordOrder,
    skip: Option<usize>,
    top: Option<usize>,
    shape: SelectTree,
}

impl CompiledQuery {
    /// Filters, orders, paginates and projects `records`.
    pub fn run<I>(&self, records: I) -> Vec<Record>
    where
        I: IntoIterator<Item = Record>,
    {
        let kept: Vec<Record> = match &self.filter {
            Some(filter) => records.into_iter().filter(|r| filter.matches(r)).collect(),
            None => records.into_iter().collect(),
        };
        self.finish(kept)
    }

    /// Orders, paginates and projects records that were already filtered.
    pub fn finish(&self, mut records: Vec<Record>) -> Vec<Record> {
        self.order.sort(&mut records);
        paginate(records, self.skip, self.top)
            .iter()
            .map(|record| project(record, &self.shape))
            .collect()
    }

    /// The filter stage, when the descriptor has a predicate.
    pub fn filter(&self) -> Option<&RecordFilter> {
        self.filter.as_ref()
    }
}

/// Compiles descriptors into in-memory pipelines.
#[derive(Clone)]
pub struct InMemoryTranslator {
    metadata: Arc<dyn MetadataProvider>,
    dates: Arc<dyn DateService>,
}

impl InMemoryTranslator {
    /// Creates a translator using RFC 3339 dates.
    pub fn new(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self::with_date_service(metadata, Arc::new(Rfc3339Dates))
    }

    /// Creates a translator with a custom date service.
    pub fn with_date_service(
        metadata: Arc<dyn MetadataProvider>,
        dates: Arc<dyn DateService>,
    ) -> Self {
        Self { metadata, dates }
    }

    /// Compiles every stage of `descriptor`.
    pub fn compile(&self, descriptor: &QueryDescriptor) -> Result<CompiledQuery> {
        let entity_type = descriptor.entity_type.as_str();
        let filter = descriptor
            .effective_predicate()
            .map(|predicate| self.compile_filter(entity_type, &predicate))
            .transpose()?;
        let order = match &descriptor.order {
            Some(order) => self.compile_order(entity_type, order)?,
            None => RecordOrder::default(),
        };
        debug!(
            entity = entity_type,
            filtered = filter.is_some(),
            order_keys = order.keys.len(),
            "query.memory.compile"
        );
        Ok(CompiledQuery {
            filter,
            order,
            skip: descriptor.skip,
            top: descriptor.top,
            shape: descriptor.output_tree(),
        })
    }

    /// Compiles a predicate tree against `entity_type`.
    pub fn compile_filter(&self, entity_type: &str, predicate: &Predicate) -> Result<RecordFilter> {
        Ok(RecordFilter {
            root: self.node(entity_type, predicate)?,
            dates: Arc::clone(&self.dates),
        })
    }

    /// Compiles an ordering clause against `entity_type`.
    pub fn compile_order(&self, entity_type: &str, order: &OrderByClause) -> Result<RecordOrder> {
        let mut keys = Vec::with_capacity(order.len());
        for item in order.items() {
            keys.push((self.path(entity_type, &item.path)?, item.is_desc()));
        }
        Ok(RecordOrder { keys })
    }

    fn path(&self, entity_type: &str, path: &str) -> Result<Vec<String>> {
        resolve_path(self.metadata.as_ref(), entity_type, path)?;
        Ok(path_segments(path)?.into_iter().map(str::to_owned).collect())
    }

    fn operand(&self, entity_type: &str, param: &Param) -> Result<Operand> {
        match param {
            Param::Attribute(path) => Ok(Operand::Path(self.path(entity_type, path)?)),
            Param::Const(value) => Ok(Operand::Const(value.clone())),
        }
    }

    fn node(&self, entity_type: &str, predicate: &Predicate) -> Result<FilterNode> {
        match predicate {
            Predicate::Simple(simple) => Ok(FilterNode::Compare {
                left: self.operand(entity_type, &simple.left)?,
                op: simple.op,
                right: self.operand(entity_type, &simple.right)?,
                date: None,
            }),
            Predicate::Date(date) => Ok(FilterNode::Compare {
                left: self.operand(entity_type, &date.left)?,
                op: date.op,
                right: self.operand(entity_type, &date.right)?,
                date: Some(date.timeless),
            }),
            Predicate::String(string) => Ok(FilterNode::Contains {
                path: self.path(entity_type, &string.path)?,
                needle: string.contains.to_lowercase(),
            }),
            Predicate::Spatial(spatial) => {
                warn!(
                    entity = entity_type,
                    path = %spatial.path,
                    "query.memory.spatial_unsupported"
                );
                Ok(FilterNode::Const(true))
            }
            Predicate::Complex(group) => {
                let children = group
                    .predicates()
                    .iter()
                    .map(|child| self.node(entity_type, child))
                    .collect::<Result<Vec<_>>>()?;
                Ok(match group.condition() {
                    Condition::And => FilterNode::And(children),
                    Condition::Or => FilterNode::Or(children),
                })
            }
            Predicate::Detail(detail) => {
                let meta = resolve_detail(self.metadata.as_ref(), entity_type, &detail.path)?;
                let target = meta.target_type.unwrap_or_default();
                Ok(FilterNode::Detail {
                    path: self.path(entity_type, &detail.path)?,
                    quantifier: detail.quantifier,
                    inner: Box::new(self.node(&target, &detail.predicate)?),
                })
            }
            Predicate::Not(inner) => Ok(FilterNode::Not(Box::new(self.node(entity_type, inner)?))),
            Predicate::IsOf(_) => Err(QueryError::UnsupportedPredicate {
                translator: "memory",
                kind: predicate.kind(),
            }),
            Predicate::True => Ok(FilterNode::Const(true)),
            Predicate::False => Ok(FilterNode::Const(false)),
        }
    }
}

static NULL: Value = Value::Null;

/// Reads a path from a record. Missing fields read as null; a path ending on
/// a nested object reads its identity field.
pub(crate) fn lookup<'r>(record: &'r Record, path: &[String]) -> &'r Value {
    let Some((head, rest)) = path.split_first() else {
        return &NULL;
    };
    match (record.get(head), rest.is_empty()) {
        (None, _) => &NULL,
        (Some(Value::Object(nested)), true) => nested.get(ID_FIELD).unwrap_or(&NULL),
        (Some(value), true) => value,
        (Some(Value::Object(nested)), false) => lookup(nested, rest),
        (Some(_), false) => &NULL,
    }
}
