#![allow(dead_code)]

use std::sync::Arc;

use relq::query::metadata::{InMemoryMetadata, MetadataProvider};
use relq::query::value::{record_from_json, Record};
use serde_json::json;

pub const SCHEMA: &str = r#"
[[models]]
name = "employee"
primary_key_name = "__PrimaryKey"
type_name = "Ns.Employee"
remote_name = "Employees"

[[models.attributes]]
name = "name"
type = "string"

[[models.attributes]]
name = "age"
type = "number"

[[models.attributes]]
name = "hired"
type = "date"

[[models.relationships]]
name = "manager"
kind = "belongs_to"
target = "employee"
is_polymorphic = true

[[models.relationships]]
name = "department"
kind = "belongs_to"
target = "department"

[[models.relationships]]
name = "tasks"
kind = "has_many"
target = "task"

[[models.projections]]
name = "EmployeeL"

[[models.projections.attributes]]
name = "name"
kind = "attr"
caption = "Name"

[[models.projections.attributes]]
name = "manager"
kind = "belongs_to"
caption = "Manager"
attributes = [{ name = "name", kind = "attr", caption = "Manager name" }]

[[models.projections.attributes]]
name = "department"
kind = "belongs_to"
caption = "Department"
attributes = [{ name = "title", kind = "attr", caption = "Department" }]

[[models.projections.attributes]]
name = "tasks"
kind = "has_many"
caption = "Tasks"
attributes = [
    { name = "summary", kind = "attr", caption = "Summary" },
    { name = "done", kind = "attr", caption = "Done" },
]

[[models]]
name = "director"
parent = "employee"
type_name = "Ns.Director"

[[models.attributes]]
name = "bonus"
type = "decimal"

[[models]]
name = "department"

[[models.attributes]]
name = "title"
type = "string"

[[models]]
name = "task"
key_type = "number"

[[models.attributes]]
name = "summary"
type = "string"

[[models.attributes]]
name = "done"
type = "boolean"
"#;

pub fn metadata() -> Arc<dyn MetadataProvider> {
    match InMemoryMetadata::from_toml_str(SCHEMA) {
        Ok(metadata) => Arc::new(metadata),
        Err(err) => panic!("fixture schema: {err}"),
    }
}

pub fn records(value: serde_json::Value) -> Vec<Record> {
    match value {
        serde_json::Value::Array(items) => items.into_iter().map(record_from_json).collect(),
        other => vec![record_from_json(other)],
    }
}

pub fn employees() -> Vec<Record> {
    records(json!([
        {
            "id": "e1", "name": "Ivan", "age": 34, "hired": "2019-03-01T09:00:00Z",
            "manager": {"id": "e3", "name": "Anna"}, "_manager_type": "Ns.Director",
            "department": {"id": "d1", "title": "R&D"},
            "tasks": [{"id": 1, "summary": "Ship", "done": true}]
        },
        {
            "id": "e2", "name": "Oleg", "age": 27, "hired": "2021-07-15T18:30:00Z",
            "manager": {"id": "e1", "name": "Ivan"},
            "department": {"id": "d2", "title": "Sales"},
            "tasks": []
        },
        {
            "id": "e3", "name": "Anna", "age": 45, "hired": "2015-01-10T08:00:00Z",
            "manager": null,
            "department": {"id": "d1", "title": "R&D"},
            "tasks": [
                {"id": 2, "summary": "Plan", "done": false},
                {"id": 3, "summary": "Hire", "done": true}
            ]
        }
    ]))
}
