//! Schema shared by the unit tests.

use std::sync::Arc;

use crate::query::metadata::{
    AttrType, FieldKind, InMemoryMetadata, KeyType, MetadataProvider, ModelSchema,
    RelationshipDef,
};
use crate::query::projection::{attr, belongs_to, has_many, ProjectionDef};

pub(crate) fn metadata() -> InMemoryMetadata {
    InMemoryMetadata::new()
        .with_model(
            ModelSchema::new("employee")
                .with_key("__PrimaryKey", KeyType::Guid)
                .with_type_name("Ns.Employee")
                .with_remote_name("Employees")
                .with_attr("name", AttrType::String)
                .with_attr("age", AttrType::Number)
                .with_attr("karma", AttrType::Number)
                .with_attr("price", AttrType::Decimal)
                .with_attr("birthday", AttrType::Date)
                .with_attr("location", AttrType::String)
                .with_attr(
                    "gender",
                    AttrType::Enum {
                        type_name: "Ns.Gender".into(),
                    },
                )
                .with_relationship(RelationshipDef {
                    name: "manager".into(),
                    kind: FieldKind::BelongsTo,
                    target: "employee".into(),
                    is_async: false,
                    is_polymorphic: true,
                    is_embedded: false,
                    remote_name: None,
                })
                .with_belongs_to("city", "city")
                .with_has_many("orders", "order")
                .with_projection(ProjectionDef::new(
                    "EmployeeE",
                    vec![
                        attr("name", "Name"),
                        attr("age", "Age"),
                        belongs_to("manager", "Manager", vec![attr("name", "Manager")]),
                        belongs_to(
                            "city",
                            "City",
                            vec![
                                attr("title", "Title"),
                                belongs_to("country", "Country", vec![attr("name", "Name")]),
                            ],
                        ),
                        has_many("orders", "Orders", vec![attr("price", "Price")]),
                    ],
                )),
        )
        .with_model(
            ModelSchema::new("city")
                .with_attr("title", AttrType::String)
                .with_belongs_to("country", "country"),
        )
        .with_model(ModelSchema::new("country").with_attr("name", AttrType::String))
        .with_model(
            ModelSchema::new("order")
                .with_key("id", KeyType::Number)
                .with_attr("price", AttrType::Decimal)
                .with_attr("status", AttrType::String)
                .with_has_many("lines", "line"),
        )
        .with_model(ModelSchema::new("line").with_attr("qty", AttrType::Number))
}

pub(crate) fn provider() -> Arc<dyn MetadataProvider> {
    Arc::new(metadata())
}
