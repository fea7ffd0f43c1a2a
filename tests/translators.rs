mod common;

use relq::config::ProtocolConfig;
use relq::query::builder::{QueryBuilder, WhereArg};
use relq::query::local::{LocalIndexTranslator, LocalStore, MemoryStore};
use relq::query::memory::InMemoryTranslator;
use relq::query::predicate::{DetailPredicate, Predicate, SimpleOp};
use relq::query::protocol::ProtocolTranslator;
use relq::query::value::{Record, Value};
use relq::QueryError;
use serde_json::json;

fn builder() -> QueryBuilder {
    QueryBuilder::new(common::metadata()).from("employee")
}

fn protocol() -> ProtocolTranslator {
    ProtocolTranslator::new(common::metadata(), ProtocolConfig::default())
}

fn store() -> MemoryStore {
    MemoryStore::new().with_table("employee", common::employees())
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.get("name").map(Value::to_string).unwrap_or_default())
        .collect()
}

#[test]
fn projection_select_covers_declared_fields_at_every_level() {
    let q = builder().select_by_projection("EmployeeL").build().unwrap();
    let req = protocol().compile(&q).unwrap();
    let select = req.select.unwrap();
    for field in ["__PrimaryKey", "Name", "Manager", "Department", "Tasks"] {
        assert!(select.split(',').any(|s| s == field), "{field} missing in {select}");
    }
    assert_eq!(
        req.expand.as_deref(),
        Some(
            "Department($select=id,Title),\
             Manager($select=__PrimaryKey,Name),\
             Tasks($select=id,Summary,Done)"
        )
    );
}

#[test]
fn equality_filter_agrees_across_translators() {
    let q = builder()
        .select("name, age")
        .r#where(("department.title", SimpleOp::Eq, "R&D"))
        .order_by("age")
        .build()
        .unwrap();

    let req = protocol().compile(&q).unwrap();
    assert_eq!(req.filter.as_deref(), Some("Department/Title eq 'R&D'"));
    assert_eq!(req.expand.as_deref(), Some("Department($select=id,Title)"));
    assert!(req
        .append_to_url("http://svc/odata/Employees")
        .contains("$filter=Department%2FTitle%20eq%20%27R%26D%27"));

    let memory = InMemoryTranslator::new(common::metadata())
        .compile(&q)
        .unwrap()
        .run(common::employees());
    assert_eq!(names(&memory), vec!["Ivan", "Anna"]);
    assert_eq!(
        memory[0],
        common::records(json!({"id": "e1", "name": "Ivan", "age": 34}))[0]
    );

    let local = LocalIndexTranslator::new(common::metadata())
        .query(&store(), &q)
        .unwrap();
    assert_eq!(local, memory);
}

#[test]
fn detail_quantifiers_over_fixture_data() {
    let memory = InMemoryTranslator::new(common::metadata());
    let run = |predicate: Predicate| {
        let q = builder().select("name").r#where(predicate).build().unwrap();
        names(&memory.compile(&q).unwrap().run(common::employees()))
    };
    assert_eq!(
        run(DetailPredicate::on("tasks").all(Predicate::True)),
        vec!["Ivan", "Oleg", "Anna"]
    );
    assert_eq!(
        run(DetailPredicate::on("tasks").any(Predicate::True)),
        vec!["Ivan", "Anna"]
    );
    assert_eq!(
        run(DetailPredicate::on("tasks").all(Predicate::simple("done", SimpleOp::Eq, true))),
        vec!["Ivan", "Oleg"]
    );
    let filter = protocol()
        .compile_filter(
            "employee",
            &DetailPredicate::on("tasks").any(Predicate::simple("done", SimpleOp::Eq, false)),
        )
        .unwrap();
    assert_eq!(filter, "Tasks/any(f0:f0/Done eq false)");
}

#[test]
fn polymorphic_master_keeps_discriminator() {
    let q = builder()
        .select_by_projection("EmployeeL")
        .by_id("e1")
        .build()
        .unwrap();
    let out = InMemoryTranslator::new(common::metadata())
        .compile(&q)
        .unwrap()
        .run(common::employees());
    assert_eq!(out.len(), 1);
    assert_eq!(
        out[0].get("_manager_type"),
        Some(&Value::from("Ns.Director"))
    );
    assert_eq!(
        out[0].get("tasks"),
        common::records(json!({"tasks": [{"id": 1, "summary": "Ship", "done": true}]}))[0]
            .get("tasks")
    );
}

#[test]
fn timeless_date_filter() {
    let predicate =
        Predicate::date("hired", SimpleOp::Eq, Value::from("2021-07-15"), true).unwrap();
    let q = builder().select("name").r#where(predicate).build().unwrap();
    assert_eq!(
        protocol().compile(&q).unwrap().filter.as_deref(),
        Some("date(Hired) eq 2021-07-15")
    );
    let out = InMemoryTranslator::new(common::metadata())
        .compile(&q)
        .unwrap()
        .run(common::employees());
    assert_eq!(names(&out), vec!["Oleg"]);
}

#[test]
fn derived_models_see_inherited_fields() {
    let q = QueryBuilder::new(common::metadata())
        .from("director")
        .select("name, bonus, manager.name")
        .r#where(("age", SimpleOp::Geq, 40))
        .build()
        .unwrap();
    let req = protocol().compile(&q).unwrap();
    assert_eq!(
        req.select.as_deref(),
        Some("__PrimaryKey,Name,Bonus,Manager,Age")
    );
    assert_eq!(
        protocol()
            .compile_filter("director", &Predicate::simple("id", SimpleOp::Eq, "e3"))
            .unwrap(),
        "__PrimaryKey eq e3"
    );
    assert_eq!(req.filter.as_deref(), Some("Age ge 40"));
    let schema = LocalIndexTranslator::new(common::metadata())
        .plan_schema(&q)
        .unwrap();
    assert_eq!(schema["director"].to_string(), "id,name,bonus,manager,age");
    assert_eq!(schema["employee"].to_string(), "id,name");
}

#[test]
fn untyped_where_arguments() {
    let predicate: Predicate = serde_json::from_value(json!({
        "kind": "simple",
        "args": {
            "left": {"param": "attribute", "v": "age"},
            "op": "ge",
            "right": {"param": "const", "v": {"t": "Int", "v": 30}}
        }
    }))
    .unwrap();
    let typed = builder()
        .where_args(vec![WhereArg::Predicate(predicate)])
        .build()
        .unwrap();
    let triple = builder()
        .where_args(vec![
            WhereArg::Path("age".into()),
            WhereArg::Op(SimpleOp::Ge),
            WhereArg::Value(Value::Int(30)),
        ])
        .build()
        .unwrap();
    assert_eq!(typed, triple);

    let err = builder()
        .where_args(vec![WhereArg::Value(Value::Int(30)), WhereArg::Path("age".into())])
        .build()
        .unwrap_err();
    assert!(err.is_construction_error());
}

#[test]
fn error_taxonomy() {
    let unknown = builder().select("salary").build().unwrap_err();
    assert!(unknown.is_schema_error());
    assert_eq!(unknown, QueryError::unknown_property("employee", "salary"));

    let missing = builder().select_by_projection("Nope").build().unwrap_err();
    assert!(missing.is_schema_error());

    let arity = Predicate::complex(relq::query::Condition::And, vec![Predicate::True]).unwrap_err();
    assert!(arity.is_construction_error());

    let is_of = builder()
        .r#where(Predicate::is_of("Ns.Director"))
        .build()
        .unwrap();
    assert_eq!(
        protocol().compile(&is_of).unwrap().filter.as_deref(),
        Some("isof('Ns.Director')")
    );
    let unsupported = InMemoryTranslator::new(common::metadata())
        .compile(&is_of)
        .unwrap_err();
    assert_eq!(unsupported.code(), "UnsupportedPredicate");
    assert!(!unsupported.is_schema_error());
}

#[test]
fn local_store_serves_native_ranges_directly() {
    let q = builder()
        .select("name")
        .r#where(("age", SimpleOp::Le, 30))
        .build()
        .unwrap();
    let translator = LocalIndexTranslator::new(common::metadata());
    assert_eq!(translator.plan(&q).describe(), "index age below 30");
    let out = translator.query(&store(), &q).unwrap();
    assert_eq!(names(&out), vec!["Oleg"]);
    let scanned = store().scan("employee").unwrap();
    assert_eq!(scanned.len(), 3);
}
