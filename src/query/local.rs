//! Local-index translator: plans a [`QueryDescriptor`] against a key-value
//! store with secondary indexes.
//!
//! A single-field comparison against a non-null literal is served by a native
//! index range. Everything the indexes cannot express (nulls, nested paths,
//! substring, quantified and compound predicates) falls back to a full table
//! scan filtered by the in-memory translator. Ordering, pagination and
//! projection always run through the in-memory stages.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{QueryError, Result};
use crate::query::descriptor::{QueryDescriptor, SelectTree};
use crate::query::memory::{lookup, InMemoryTranslator};
use crate::query::metadata::{FieldKind, MetadataProvider};
use crate::query::predicate::{Param, Predicate, SimpleOp};
use crate::query::value::{Record, Value, ID_FIELD};

/// One indexed field.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexField {
    /// Local field name.
    pub name: String,
    /// Multi-valued (detail) field: every element is indexed.
    pub multi_entry: bool,
}

/// Index layout of one entity type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexSpec {
    /// Primary key field.
    pub primary_key: String,
    /// Secondary index fields in first-seen order.
    pub fields: Vec<IndexField>,
}

impl IndexSpec {
    fn new() -> Self {
        Self {
            primary_key: ID_FIELD.to_owned(),
            fields: Vec::new(),
        }
    }

    fn add(&mut self, name: &str, multi_entry: bool) {
        if name == self.primary_key || self.fields.iter().any(|f| f.name == name) {
            return;
        }
        self.fields.push(IndexField {
            name: name.to_owned(),
            multi_entry,
        });
    }
}

/// Renders the store schema string: primary key first, multi-entry fields
/// prefixed with `*`.
impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.primary_key)?;
        for field in &self.fields {
            if field.multi_entry {
                write!(f, ",*{}", field.name)?;
            } else {
                write!(f, ",{}", field.name)?;
            }
        }
        Ok(())
    }
}

/// Native index range operation.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexRange {
    /// Field equals the value.
    Equals(Value),
    /// Field differs from the value.
    NotEqual(Value),
    /// Field is strictly greater.
    Above(Value),
    /// Field is strictly less.
    Below(Value),
    /// Field is greater or equal.
    AboveOrEqual(Value),
    /// Field is less or equal.
    BelowOrEqual(Value),
}

impl IndexRange {
    /// Range equivalent to `field op value`.
    pub fn from_op(op: SimpleOp, value: Value) -> Self {
        match op {
            SimpleOp::Eq => IndexRange::Equals(value),
            SimpleOp::Neq => IndexRange::NotEqual(value),
            SimpleOp::Ge => IndexRange::Above(value),
            SimpleOp::Geq => IndexRange::AboveOrEqual(value),
            SimpleOp::Le => IndexRange::Below(value),
            SimpleOp::Leq => IndexRange::BelowOrEqual(value),
        }
    }

    /// Bound value.
    pub fn value(&self) -> &Value {
        match self {
            IndexRange::Equals(v)
            | IndexRange::NotEqual(v)
            | IndexRange::Above(v)
            | IndexRange::Below(v)
            | IndexRange::AboveOrEqual(v)
            | IndexRange::BelowOrEqual(v) => v,
        }
    }

    /// Tests an indexed value. Nulls are never indexed.
    pub fn contains(&self, indexed: &Value) -> bool {
        if indexed.is_null() {
            return false;
        }
        let Some(ord) = indexed.compare(self.value()) else {
            return false;
        };
        let op = match self {
            IndexRange::Equals(_) => SimpleOp::Eq,
            IndexRange::NotEqual(_) => SimpleOp::Neq,
            IndexRange::Above(_) => SimpleOp::Ge,
            IndexRange::Below(_) => SimpleOp::Le,
            IndexRange::AboveOrEqual(_) => SimpleOp::Geq,
            IndexRange::BelowOrEqual(_) => SimpleOp::Leq,
        };
        op.matches(ord)
    }

    fn name(&self) -> &'static str {
        match self {
            IndexRange::Equals(_) => "equals",
            IndexRange::NotEqual(_) => "notEqual",
            IndexRange::Above(_) => "above",
            IndexRange::Below(_) => "below",
            IndexRange::AboveOrEqual(_) => "aboveOrEqual",
            IndexRange::BelowOrEqual(_) => "belowOrEqual",
        }
    }
}

/// How a query is served by the store.
#[derive(Clone, Debug, PartialEq)]
pub enum LocalPlan {
    /// Native range over one indexed field; the result is final.
    IndexRange {
        /// Indexed field.
        field: String,
        /// Range applied to it.
        range: IndexRange,
    },
    /// Full table scan, filtered in memory when `filtered` is set.
    Scan {
        /// A predicate test runs over every record.
        filtered: bool,
    },
    /// Primary key lookup followed by the in-memory predicate test.
    IdThenFilter {
        /// Identity looked up.
        id: Value,
        /// A predicate besides the identity must hold.
        filtered: bool,
    },
}

impl LocalPlan {
    /// Human-readable plan summary.
    pub fn describe(&self) -> String {
        match self {
            LocalPlan::IndexRange { field, range } => {
                format!("index {field} {} {}", range.name(), range.value())
            }
            LocalPlan::Scan { filtered: false } => "scan".to_owned(),
            LocalPlan::Scan { filtered: true } => "scan + filter".to_owned(),
            LocalPlan::IdThenFilter {
                id,
                filtered: false,
            } => format!("key {id}"),
            LocalPlan::IdThenFilter { id, filtered: true } => format!("key {id} + filter"),
        }
    }
}

/// Storage the local translator reads from.
pub trait LocalStore {
    /// Every record of `entity_type`.
    fn scan(&self, entity_type: &str) -> Result<Vec<Record>>;

    /// Records whose indexed `field` falls in `range`. Multi-entry fields
    /// match when any element does.
    fn range(&self, entity_type: &str, field: &str, range: &IndexRange) -> Result<Vec<Record>>;
}

/// In-memory [`LocalStore`] holding one record table per entity type.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    tables: HashMap<String, Vec<Record>>,
}

impl MemoryStore {
    /// Creates a store without tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates tables from a derived schema.
    pub fn from_schema(schema: &BTreeMap<String, IndexSpec>) -> Self {
        Self {
            tables: schema.keys().map(|k| (k.clone(), Vec::new())).collect(),
        }
    }

    /// Replaces the records of a table.
    pub fn with_table(mut self, entity_type: impl Into<String>, records: Vec<Record>) -> Self {
        self.tables.insert(entity_type.into(), records);
        self
    }

    /// Appends one record, creating the table on demand.
    pub fn insert(&mut self, entity_type: &str, record: Record) {
        self.tables
            .entry(entity_type.to_owned())
            .or_default()
            .push(record);
    }

    fn table(&self, entity_type: &str) -> Result<&[Record]> {
        self.tables
            .get(entity_type)
            .map(Vec::as_slice)
            .ok_or_else(|| QueryError::Store(format!("no table for {entity_type}")))
    }
}

impl LocalStore for MemoryStore {
    fn scan(&self, entity_type: &str) -> Result<Vec<Record>> {
        Ok(self.table(entity_type)?.to_vec())
    }

    fn range(&self, entity_type: &str, field: &str, range: &IndexRange) -> Result<Vec<Record>> {
        let path = [field.to_owned()];
        let hit = |record: &&Record| match lookup(record, &path) {
            Value::List(items) => items.iter().any(|item| range.contains(index_key(item))),
            value => range.contains(value),
        };
        Ok(self.table(entity_type)?.iter().filter(hit).cloned().collect())
    }
}

/// Related records are indexed by their identity.
fn index_key(value: &Value) -> &Value {
    match value {
        Value::Object(record) => record.get(ID_FIELD).unwrap_or(value),
        other => other,
    }
}

/// Plans and runs descriptors against a [`LocalStore`].
#[derive(Clone)]
pub struct LocalIndexTranslator {
    metadata: Arc<dyn MetadataProvider>,
    memory: InMemoryTranslator,
}

impl LocalIndexTranslator {
    /// Creates a translator; filtering and shaping are delegated to an
    /// [`InMemoryTranslator`] over the same metadata.
    pub fn new(metadata: Arc<dyn MetadataProvider>) -> Self {
        let memory = InMemoryTranslator::new(Arc::clone(&metadata));
        Self { metadata, memory }
    }

    /// Uses a preconfigured in-memory translator for the fallback stages.
    pub fn with_memory(metadata: Arc<dyn MetadataProvider>, memory: InMemoryTranslator) -> Self {
        Self { metadata, memory }
    }

    /// Index layout needed to serve `descriptor`, keyed by entity type. Every
    /// entity type reached through the fetched tree gets an entry.
    pub fn plan_schema(&self, descriptor: &QueryDescriptor) -> Result<BTreeMap<String, IndexSpec>> {
        let mut schema = BTreeMap::new();
        self.collect_indexes(&descriptor.fetch_tree(), &mut schema)?;
        Ok(schema)
    }

    fn collect_indexes(
        &self,
        tree: &SelectTree,
        schema: &mut BTreeMap<String, IndexSpec>,
    ) -> Result<()> {
        let mut fields = Vec::with_capacity(tree.select.len());
        for name in &tree.select {
            let meta = self.metadata.resolve(&tree.entity_type, name)?;
            fields.push((name.as_str(), meta.kind == FieldKind::HasMany));
        }
        let spec = schema
            .entry(tree.entity_type.clone())
            .or_insert_with(IndexSpec::new);
        for (name, multi_entry) in fields {
            spec.add(name, multi_entry);
        }
        for child in tree.expand.values() {
            self.collect_indexes(child, schema)?;
        }
        Ok(())
    }

    /// Chooses how the store serves `descriptor`.
    pub fn plan(&self, descriptor: &QueryDescriptor) -> LocalPlan {
        let filtered = descriptor.predicate.is_some();
        if let Some(id) = &descriptor.id {
            return LocalPlan::IdThenFilter {
                id: id.clone(),
                filtered,
            };
        }
        match &descriptor.predicate {
            None => LocalPlan::Scan { filtered: false },
            Some(predicate) => native_range(predicate).unwrap_or(LocalPlan::Scan { filtered: true }),
        }
    }

    /// Runs `descriptor` against `store`.
    pub fn query(&self, store: &dyn LocalStore, descriptor: &QueryDescriptor) -> Result<Vec<Record>> {
        let compiled = self.memory.compile(descriptor)?;
        let plan = self.plan(descriptor);
        debug!(
            entity = %descriptor.entity_type,
            plan = %plan.describe(),
            "query.local.plan"
        );
        let entity_type = descriptor.entity_type.as_str();
        match &plan {
            LocalPlan::IndexRange { field, range } => {
                Ok(compiled.finish(store.range(entity_type, field, range)?))
            }
            LocalPlan::Scan { .. } => Ok(compiled.run(store.scan(entity_type)?)),
            LocalPlan::IdThenFilter { id, .. } => {
                let candidates =
                    store.range(entity_type, ID_FIELD, &IndexRange::Equals(id.clone()))?;
                Ok(compiled.run(candidates))
            }
        }
    }
}

/// Native plan for a single-field comparison against a non-null literal.
fn native_range(predicate: &Predicate) -> Option<LocalPlan> {
    let Predicate::Simple(simple) = predicate else {
        return None;
    };
    let (Param::Attribute(path), Param::Const(value)) = (&simple.left, &simple.right) else {
        return None;
    };
    if value.is_null() || path.contains('.') {
        return None;
    }
    Some(LocalPlan::IndexRange {
        field: path.clone(),
        range: IndexRange::from_op(simple.op, value.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::builder::QueryBuilder;
    use crate::query::fixtures;
    use crate::query::predicate::DetailPredicate;
    use crate::query::value::record_from_json;
    use serde_json::json;

    fn translator() -> LocalIndexTranslator {
        LocalIndexTranslator::new(fixtures::provider())
    }

    fn builder() -> QueryBuilder {
        QueryBuilder::new(fixtures::provider()).from("employee")
    }

    fn store() -> MemoryStore {
        let employees = json!([
            {"id": "e1", "name": "Ivan", "age": 30, "manager": {"id": "e3"},
             "orders": [{"id": 1, "price": 5}]},
            {"id": "e2", "name": "Oleg", "age": 20, "manager": null, "orders": []},
            {"id": "e3", "name": "Anna", "age": 45, "manager": null,
             "orders": [{"id": 2, "price": 50}, {"id": 3, "price": 7}]}
        ]);
        let serde_json::Value::Array(items) = employees else {
            unreachable!()
        };
        MemoryStore::new().with_table("employee", items.into_iter().map(record_from_json).collect())
    }

    fn ids(records: &[Record]) -> Vec<String> {
        records
            .iter()
            .map(|r| r.get("id").map(Value::to_string).unwrap_or_default())
            .collect()
    }

    #[test]
    fn schema_marks_detail_fields_multi_entry() {
        let q = builder().select_by_projection("EmployeeE").build().unwrap();
        let schema = translator().plan_schema(&q).unwrap();
        assert_eq!(schema["employee"].to_string(), "id,name,age,manager,city,*orders");
        assert_eq!(schema["city"].to_string(), "id,title,country");
        assert_eq!(schema["country"].to_string(), "id,name");
        assert_eq!(schema["order"].to_string(), "id,price");
    }

    #[test]
    fn filter_paths_register_intermediate_types() {
        let q = builder()
            .select("name")
            .r#where(("city.country.name", SimpleOp::Eq, "RU"))
            .build()
            .unwrap();
        let schema = translator().plan_schema(&q).unwrap();
        assert_eq!(schema["employee"].to_string(), "id,name,city");
        assert_eq!(schema["city"].to_string(), "id,country");
        assert_eq!(schema["country"].to_string(), "id,name");
    }

    #[test]
    fn single_field_literal_uses_native_range() {
        let q = builder().r#where(("age", SimpleOp::Ge, 25)).build().unwrap();
        let plan = translator().plan(&q);
        assert_eq!(
            plan,
            LocalPlan::IndexRange {
                field: "age".into(),
                range: IndexRange::Above(Value::Int(25)),
            }
        );
        assert_eq!(plan.describe(), "index age above 25");
    }

    #[test]
    fn unindexable_predicates_fall_back_to_scan() {
        let scan = LocalPlan::Scan { filtered: true };
        let cases = [
            Predicate::simple("manager", SimpleOp::Eq, Value::Null),
            Predicate::simple("manager.name", SimpleOp::Eq, "Anna"),
            Predicate::contains("name", "an"),
            DetailPredicate::on("orders").any(Predicate::True),
            Predicate::simple("age", SimpleOp::Ge, 1).and(Predicate::simple("age", SimpleOp::Le, 9)),
        ];
        for predicate in cases {
            let q = builder().r#where(predicate).build().unwrap();
            assert_eq!(translator().plan(&q), scan);
        }
        let q = builder().build().unwrap();
        assert_eq!(translator().plan(&q).describe(), "scan");
    }

    #[test]
    fn by_id_uses_key_lookup() {
        let q = builder()
            .r#where(("age", SimpleOp::Ge, 40))
            .by_id("e3")
            .build()
            .unwrap();
        assert_eq!(translator().plan(&q).describe(), "key e3 + filter");
        let out = translator().query(&store(), &q).unwrap();
        assert_eq!(ids(&out), vec!["e3"]);

        let miss = builder()
            .r#where(("age", SimpleOp::Le, 40))
            .by_id("e3")
            .build()
            .unwrap();
        assert!(translator().query(&store(), &miss).unwrap().is_empty());
    }

    #[test]
    fn native_and_fallback_paths_agree_with_memory() {
        let predicates = [
            Predicate::simple("age", SimpleOp::Geq, 30),
            Predicate::simple("name", SimpleOp::Eq, "Oleg"),
            Predicate::simple("manager", SimpleOp::Eq, "e3"),
            Predicate::contains("name", "AN"),
            DetailPredicate::on("orders").all(Predicate::simple("price", SimpleOp::Le, 10)),
        ];
        let memory = InMemoryTranslator::new(fixtures::provider());
        for predicate in predicates {
            let q = builder()
                .select("name")
                .r#where(predicate)
                .order_by("name")
                .build()
                .unwrap();
            let local = translator().query(&store(), &q).unwrap();
            let expected = memory
                .compile(&q)
                .unwrap()
                .run(store().scan("employee").unwrap());
            assert_eq!(local, expected);
        }
    }

    #[test]
    fn results_are_ordered_paginated_and_projected() {
        let q = builder()
            .select("name")
            .order_by("age desc")
            .skip(1)
            .top(1)
            .build()
            .unwrap();
        let out = translator().query(&store(), &q).unwrap();
        assert_eq!(
            out,
            vec![record_from_json(json!({"id": "e1", "name": "Ivan"}))]
        );
    }

    #[test]
    fn multi_entry_range_matches_any_element() {
        let hits = store()
            .range("employee", "orders", &IndexRange::Equals(Value::Int(3)))
            .unwrap();
        assert_eq!(ids(&hits), vec!["e3"]);
    }

    #[test]
    fn records_without_the_field_are_not_indexed() {
        let mut store = MemoryStore::new();
        store.insert("employee", record_from_json(json!({"id": "a", "age": 30})));
        store.insert("employee", record_from_json(json!({"id": "b"})));
        let q = builder()
            .select("name")
            .r#where(("age", SimpleOp::Neq, 30))
            .build()
            .unwrap();

        let memory = InMemoryTranslator::new(fixtures::provider())
            .compile(&q)
            .unwrap()
            .run(store.scan("employee").unwrap());
        assert_eq!(memory.len(), 1);
        assert_eq!(translator().plan(&q).describe(), "index age notEqual 30");
        assert!(translator().query(&store, &q).unwrap().is_empty());
    }

    #[test]
    fn store_from_schema_starts_with_empty_tables() {
        let q = builder().select("name, city.title").build().unwrap();
        let schema = translator().plan_schema(&q).unwrap();
        let mut store = MemoryStore::from_schema(&schema);
        assert!(store.scan("city").unwrap().is_empty());
        assert_eq!(store.scan("order").unwrap_err().code(), "Store");

        store.insert("employee", record_from_json(json!({"id": "e9", "name": "Lev"})));
        let memory = InMemoryTranslator::new(fixtures::provider());
        let translator = LocalIndexTranslator::with_memory(fixtures::provider(), memory);
        let out = translator.query(&store, &q).unwrap();
        assert_eq!(ids(&out), vec!["e9"]);
    }

    #[test]
    fn missing_table_is_a_store_error() {
        let q = QueryBuilder::new(fixtures::provider())
            .from("city")
            .build()
            .unwrap();
        let err = translator().query(&store(), &q).unwrap_err();
        assert_eq!(err.code(), "Store");
    }
}
