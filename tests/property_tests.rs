mod common;

use proptest::prelude::*;
use relq::config::ProtocolConfig;
use relq::query::builder::QueryBuilder;
use relq::query::local::{LocalIndexTranslator, MemoryStore};
use relq::query::memory::InMemoryTranslator;
use relq::query::predicate::{Condition, Predicate, SimpleOp};
use relq::query::protocol::ProtocolTranslator;
use relq::query::value::{Record, Value};
use serde_json::json;

fn arb_op() -> impl Strategy<Value = SimpleOp> {
    prop_oneof![
        Just(SimpleOp::Eq),
        Just(SimpleOp::Neq),
        Just(SimpleOp::Ge),
        Just(SimpleOp::Geq),
        Just(SimpleOp::Le),
        Just(SimpleOp::Leq),
    ]
}

fn arb_leaf() -> impl Strategy<Value = Predicate> {
    prop_oneof![
        (arb_op(), 18i64..70).prop_map(|(op, age)| Predicate::simple("age", op, age)),
        "[A-Z][a-z]{2,5}".prop_map(|name| Predicate::simple("name", SimpleOp::Eq, name)),
        "[a-z]{1,3}".prop_map(|needle| Predicate::contains("name", needle)),
    ]
}

fn arb_employees() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(("[A-C][a-c]{1,2}", 18i64..70), 0..20).prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(idx, (name, age))| {
                common::records(json!({"id": format!("e{idx}"), "name": name, "age": age}))
                    .remove(0)
            })
            .collect()
    })
}

/// Like `arb_employees`, but some records carry no `age` at all.
fn arb_sparse_employees() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(("[A-C][a-c]{1,2}", proptest::option::of(18i64..70)), 0..20).prop_map(
        |rows| {
            rows.into_iter()
                .enumerate()
                .map(|(idx, (name, age))| {
                    let mut record = common::records(json!({"id": format!("e{idx}"), "name": name}))
                        .remove(0);
                    if let Some(age) = age {
                        record.insert("age".to_owned(), Value::Int(age));
                    }
                    record
                })
                .collect()
        },
    )
}

fn group_len(predicate: &Predicate, condition: Condition) -> usize {
    match predicate {
        Predicate::Complex(group) if group.condition() == condition => group.predicates().len(),
        _ => 1,
    }
}

fn ids(records: &[Record]) -> Vec<Value> {
    records
        .iter()
        .map(|r| r.get("id").cloned().unwrap_or(Value::Null))
        .collect()
}

proptest! {
    #[test]
    fn prop_chained_and_stays_flat(leaves in prop::collection::vec(arb_leaf(), 2..8)) {
        let mut iter = leaves.clone().into_iter();
        let first = iter.next().unwrap_or(Predicate::True);
        let combined = iter.fold(first, Predicate::and);
        prop_assert_eq!(group_len(&combined, Condition::And), leaves.len());

        let mixed = combined.or(Predicate::False);
        prop_assert_eq!(group_len(&mixed, Condition::Or), 2);
    }

    #[test]
    fn prop_build_is_idempotent(
        leaf in arb_leaf(),
        top in proptest::option::of(0usize..50),
        skip in proptest::option::of(0usize..50),
        desc in any::<bool>(),
        use_projection in any::<bool>(),
    ) {
        let mut builder = QueryBuilder::new(common::metadata())
            .from("employee")
            .r#where(leaf)
            .order_by(if desc { "age desc, name" } else { "name" });
        builder = if use_projection {
            builder.select_by_projection("EmployeeL")
        } else {
            builder.select("name, department.title")
        };
        if let Some(top) = top {
            builder = builder.top(top);
        }
        if let Some(skip) = skip {
            builder = builder.skip(skip);
        }
        let first = builder.build().unwrap();
        let second = builder.build().unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_equality_agrees_across_translators(
        records in arb_employees(),
        pick in any::<prop::sample::Index>(),
    ) {
        let target = if records.is_empty() {
            "Zed".to_owned()
        } else {
            records[pick.index(records.len())]
                .get("name")
                .map(Value::to_string)
                .unwrap_or_default()
        };
        let q = QueryBuilder::new(common::metadata())
            .from("employee")
            .select("name, age")
            .r#where(("name", SimpleOp::Eq, target.as_str()))
            .build()
            .unwrap();

        let filter = ProtocolTranslator::new(common::metadata(), ProtocolConfig::default())
            .compile(&q)
            .unwrap()
            .filter;
        prop_assert_eq!(filter, Some(format!("Name eq '{target}'")));

        let expected: Vec<Value> = records
            .iter()
            .filter(|r| r.get("name") == Some(&Value::from(target.as_str())))
            .map(|r| r.get("id").cloned().unwrap_or(Value::Null))
            .collect();
        let memory = InMemoryTranslator::new(common::metadata())
            .compile(&q)
            .unwrap()
            .run(records.clone());
        prop_assert_eq!(ids(&memory), expected);

        let store = MemoryStore::new().with_table("employee", records);
        let local = LocalIndexTranslator::new(common::metadata())
            .query(&store, &q)
            .unwrap();
        prop_assert_eq!(local, memory);
    }

    #[test]
    fn prop_local_matches_memory_for_single_comparisons(
        records in arb_sparse_employees(),
        op in arb_op(),
        age in 18i64..70,
        desc in any::<bool>(),
    ) {
        let q = QueryBuilder::new(common::metadata())
            .from("employee")
            .select("name")
            .r#where(("age", op, age))
            .order_by(if desc { "age desc" } else { "age" })
            .build()
            .unwrap();
        let compiled = InMemoryTranslator::new(common::metadata()).compile(&q).unwrap();
        let memory = compiled.run(records.clone());
        // Records without an age are never indexed; only `neq` lets them
        // through in memory.
        let indexed: Vec<Record> = records
            .iter()
            .filter(|r| r.contains_key("age"))
            .cloned()
            .collect();
        let store = MemoryStore::new().with_table("employee", records.clone());
        let local = LocalIndexTranslator::new(common::metadata())
            .query(&store, &q)
            .unwrap();
        prop_assert_eq!(&local, &compiled.run(indexed));
        if op != SimpleOp::Neq {
            prop_assert_eq!(&local, &memory);
        } else {
            let unindexed = records.len() - records.iter().filter(|r| r.contains_key("age")).count();
            prop_assert_eq!(memory.len(), local.len() + unindexed);
        }
    }

    #[test]
    fn prop_fetch_tree_covers_selected_and_filtered_paths(
        fields in prop::sample::subsequence(
            vec!["name", "age", "hired", "manager.name", "department.title", "tasks"],
            1..6,
        ),
        filter_on_department in any::<bool>(),
    ) {
        let mut builder = QueryBuilder::new(common::metadata())
            .from("employee")
            .select(&fields.join(","));
        if filter_on_department {
            builder = builder.r#where(("department.title", SimpleOp::Eq, "R&D"));
        }
        let q = builder.build().unwrap();
        let fetch = q.fetch_tree();
        prop_assert_eq!(fetch.select.first().map(String::as_str), Some("id"));
        for field in &fields {
            let segments: Vec<&str> = field.split('.').collect();
            prop_assert!(q.select_tree.covers(&segments), "{} not selected", field);
        }
        if filter_on_department {
            prop_assert!(fetch.covers(&["department", "title"]));
        }
    }
}
