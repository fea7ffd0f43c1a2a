//! Named projections: declared subsets of attributes and relationships to
//! fetch and display.
//!
//! Projections are plain records composed with [`attr`], [`belongs_to`] and
//! [`has_many`]:
//!
//! ```ignore
//! ProjectionDef::new("EmployeeE", vec![
//!     attr("name", "Name"),
//!     belongs_to("manager", "Manager", vec![attr("name", "Manager name")]),
//!     has_many("orders", "Orders", vec![attr("price", "Price")]),
//! ]);
//! ```

use serde::{Deserialize, Serialize};

/// Kind of a projected field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionKind {
    /// Scalar attribute.
    Attr,
    /// Master relationship.
    BelongsTo,
    /// Detail relationship.
    HasMany,
}

/// One projected field. Relationships carry the nested projection of the
/// related type.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProjectionAttribute {
    /// Field name on the owning model.
    pub name: String,
    /// Attribute or relationship.
    pub kind: ProjectionKind,
    /// Display caption.
    #[serde(default)]
    pub caption: String,
    /// Nested attributes of the related type.
    #[serde(default)]
    pub attributes: Vec<ProjectionAttribute>,
}

/// Named projection of a model.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ProjectionDef {
    /// Projection name.
    pub name: String,
    /// Projected fields in declaration order.
    #[serde(default)]
    pub attributes: Vec<ProjectionAttribute>,
}

impl ProjectionDef {
    /// Creates a projection.
    pub fn new(name: impl Into<String>, attributes: Vec<ProjectionAttribute>) -> Self {
        Self {
            name: name.into(),
            attributes,
        }
    }

    /// Looks up a top-level projected field.
    pub fn attribute(&self, name: &str) -> Option<&ProjectionAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Projects a scalar attribute.
pub fn attr(name: impl Into<String>, caption: impl Into<String>) -> ProjectionAttribute {
    ProjectionAttribute {
        name: name.into(),
        kind: ProjectionKind::Attr,
        caption: caption.into(),
        attributes: Vec::new(),
    }
}

/// Projects a master relationship with the given nested fields.
pub fn belongs_to(
    name: impl Into<String>,
    caption: impl Into<String>,
    attributes: Vec<ProjectionAttribute>,
) -> ProjectionAttribute {
    ProjectionAttribute {
        name: name.into(),
        kind: ProjectionKind::BelongsTo,
        caption: caption.into(),
        attributes,
    }
}

/// Projects a detail relationship with the given nested fields.
pub fn has_many(
    name: impl Into<String>,
    caption: impl Into<String>,
    attributes: Vec<ProjectionAttribute>,
) -> ProjectionAttribute {
    ProjectionAttribute {
        name: name.into(),
        kind: ProjectionKind::HasMany,
        caption: caption.into(),
        attributes,
    }
}
