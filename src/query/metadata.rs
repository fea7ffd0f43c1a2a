//! Schema metadata consumed by the builder and the translators.
//!
//! The engine never owns a schema; it reads one through [`MetadataProvider`].
//! [`InMemoryMetadata`] is a provider backed by an explicit list of
//! [`ModelSchema`] trees, loadable from TOML or JSON.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};
use crate::query::projection::ProjectionDef;
use crate::query::value::ID_FIELD;

/// Type of a model's identity field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// GUID key, rendered unquoted by the protocol translator.
    #[default]
    Guid,
    /// String key, rendered quoted.
    String,
    /// Numeric key, rendered unquoted.
    Number,
}

/// Declared type of a scalar attribute.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttrType {
    /// Text.
    String,
    /// Integer or floating number.
    Number,
    /// Fixed-point number.
    Decimal,
    /// Boolean.
    Boolean,
    /// Date/time instant.
    Date,
    /// GUID.
    Guid,
    /// Enumeration rendered as `TypeName'Value'`.
    Enum {
        /// Qualified enum type name.
        type_name: String,
    },
}

/// Kind of a resolved field.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Scalar attribute (including the identity field).
    Attribute,
    /// Master relationship: a single related record.
    BelongsTo,
    /// Detail relationship: a related collection.
    HasMany,
}

/// Declared scalar attribute.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Local field name.
    pub name: String,
    /// Declared type.
    #[serde(flatten)]
    pub ty: AttrType,
    /// Name used by the remote protocol, when it differs from the default
    /// naming convention.
    #[serde(default)]
    pub remote_name: Option<String>,
}

/// Declared relationship.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDef {
    /// Local field name.
    pub name: String,
    /// Master or detail.
    pub kind: FieldKind,
    /// Related entity type.
    pub target: String,
    /// Related data is loaded lazily.
    #[serde(default)]
    pub is_async: bool,
    /// Related record may be of a derived type.
    #[serde(default)]
    pub is_polymorphic: bool,
    /// Related data is embedded in the owning payload.
    #[serde(default)]
    pub is_embedded: bool,
    /// Remote protocol name override.
    #[serde(default)]
    pub remote_name: Option<String>,
}

/// Relationship flags attached to select-tree nodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RelationshipMeta {
    /// Master or detail.
    pub kind: FieldKind,
    /// Related data is loaded lazily.
    pub is_async: bool,
    /// Related record may be of a derived type.
    pub is_polymorphic: bool,
    /// Related data is embedded in the owning payload.
    pub is_embedded: bool,
}

impl From<&RelationshipDef> for RelationshipMeta {
    fn from(def: &RelationshipDef) -> Self {
        Self {
            kind: def.kind,
            is_async: def.is_async,
            is_polymorphic: def.is_polymorphic,
            is_embedded: def.is_embedded,
        }
    }
}

/// Schema of one entity type.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Entity type name.
    pub name: String,
    /// Remote name of the identity field. Unset means inherited from the
    /// parent model, or `id` at the root.
    #[serde(default)]
    pub primary_key_name: Option<String>,
    /// Identity field type. Unset means inherited, or GUID at the root.
    #[serde(default)]
    pub key_type: Option<KeyType>,
    /// Qualified type name used by type assertions and type casts.
    #[serde(default)]
    pub type_name: Option<String>,
    /// Remote collection name used in URLs.
    #[serde(default)]
    pub remote_name: Option<String>,
    /// Base model whose fields and projections are inherited.
    #[serde(default)]
    pub parent: Option<String>,
    /// Scalar attributes in declaration order.
    #[serde(default)]
    pub attributes: Vec<AttributeDef>,
    /// Relationships in declaration order.
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
    /// Named projections.
    #[serde(default)]
    pub projections: Vec<ProjectionDef>,
}

impl ModelSchema {
    /// Creates an empty model whose key is inherited, or a GUID named `id`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key_name: None,
            key_type: None,
            type_name: None,
            remote_name: None,
            parent: None,
            attributes: Vec::new(),
            relationships: Vec::new(),
            projections: Vec::new(),
        }
    }

    /// Sets the identity field's remote name and type.
    pub fn with_key(mut self, primary_key_name: impl Into<String>, key_type: KeyType) -> Self {
        self.primary_key_name = Some(primary_key_name.into());
        self.key_type = Some(key_type);
        self
    }

    /// Sets the qualified type name.
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Sets the remote collection name.
    pub fn with_remote_name(mut self, remote_name: impl Into<String>) -> Self {
        self.remote_name = Some(remote_name.into());
        self
    }

    /// Declares the base model.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Declares a scalar attribute.
    pub fn with_attr(mut self, name: impl Into<String>, ty: AttrType) -> Self {
        self.attributes.push(AttributeDef {
            name: name.into(),
            ty,
            remote_name: None,
        });
        self
    }

    /// Declares a master relationship.
    pub fn with_belongs_to(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.with_relationship(RelationshipDef {
            name: name.into(),
            kind: FieldKind::BelongsTo,
            target: target.into(),
            is_async: false,
            is_polymorphic: false,
            is_embedded: false,
            remote_name: None,
        })
    }

    /// Declares a detail relationship.
    pub fn with_has_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.with_relationship(RelationshipDef {
            name: name.into(),
            kind: FieldKind::HasMany,
            target: target.into(),
            is_async: false,
            is_polymorphic: false,
            is_embedded: false,
            remote_name: None,
        })
    }

    /// Declares a fully specified relationship.
    pub fn with_relationship(mut self, def: RelationshipDef) -> Self {
        self.relationships.push(def);
        self
    }

    /// Registers a named projection.
    pub fn with_projection(mut self, projection: ProjectionDef) -> Self {
        self.projections.push(projection);
        self
    }

    fn local_field(&self, segment: &str) -> Option<FieldMeta> {
        if let Some(attr) = self.attributes.iter().find(|a| a.name == segment) {
            return Some(FieldMeta {
                name: attr.name.clone(),
                source_type: self.name.clone(),
                kind: FieldKind::Attribute,
                attr_type: Some(attr.ty.clone()),
                target_type: None,
                is_key: false,
                key_type: None,
                remote_name: attr.remote_name.clone(),
                relationship: None,
            });
        }
        self.relationships
            .iter()
            .find(|r| r.name == segment)
            .map(|rel| FieldMeta {
                name: rel.name.clone(),
                source_type: self.name.clone(),
                kind: rel.kind,
                attr_type: None,
                target_type: Some(rel.target.clone()),
                is_key: false,
                key_type: None,
                remote_name: rel.remote_name.clone(),
                relationship: Some(RelationshipMeta::from(rel)),
            })
    }
}

/// Result of resolving one path segment against a model.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldMeta {
    /// Local field name (`id` for the identity field).
    pub name: String,
    /// Model that declares the field.
    pub source_type: String,
    /// Attribute or relationship kind.
    pub kind: FieldKind,
    /// Declared type for scalar attributes.
    pub attr_type: Option<AttrType>,
    /// Related entity type for relationships.
    pub target_type: Option<String>,
    /// True for the identity field.
    pub is_key: bool,
    /// Key type, for the identity field.
    pub key_type: Option<KeyType>,
    /// Remote protocol name override.
    pub remote_name: Option<String>,
    /// Relationship flags, for relationships.
    pub relationship: Option<RelationshipMeta>,
}

impl FieldMeta {
    /// True for enum attributes.
    pub fn is_enum(&self) -> bool {
        matches!(self.attr_type, Some(AttrType::Enum { .. }))
    }

    /// True for master and detail relationships.
    pub fn is_relationship(&self) -> bool {
        self.kind != FieldKind::Attribute
    }
}

/// Provides schema lookups for planner consumers. Implementations are read
/// concurrently and must not mutate on lookup.
pub trait MetadataProvider: Send + Sync {
    /// Returns the schema of `entity_type`, failing with
    /// [`QueryError::UnknownModel`] when it is not registered.
    fn model(&self, entity_type: &str) -> Result<Arc<ModelSchema>>;

    /// Resolves a single path segment, honoring model inheritance.
    fn resolve(&self, entity_type: &str, segment: &str) -> Result<FieldMeta> {
        if segment == ID_FIELD {
            return self.key(entity_type);
        }
        let mut current = self.model(entity_type)?;
        loop {
            if let Some(meta) = current.local_field(segment) {
                return Ok(meta);
            }
            let parent = current.parent.clone();
            match parent {
                Some(parent) => current = self.model(&parent)?,
                None => return Err(QueryError::unknown_property(entity_type, segment)),
            }
        }
    }

    /// Identity field of `entity_type`. Its remote name and type come from the
    /// nearest model in the inheritance chain that declares them.
    fn key(&self, entity_type: &str) -> Result<FieldMeta> {
        let mut name = None;
        let mut key_type = None;
        let mut current = Some(self.model(entity_type)?);
        while let Some(model) = current {
            name = name.or_else(|| model.primary_key_name.clone());
            key_type = key_type.or(model.key_type);
            if name.is_some() && key_type.is_some() {
                break;
            }
            current = match model.parent.as_deref() {
                Some(parent) => Some(self.model(parent)?),
                None => None,
            };
        }
        Ok(FieldMeta {
            name: ID_FIELD.to_owned(),
            source_type: entity_type.to_owned(),
            kind: FieldKind::Attribute,
            attr_type: None,
            target_type: None,
            is_key: true,
            key_type: Some(key_type.unwrap_or_default()),
            remote_name: Some(name.unwrap_or_else(|| ID_FIELD.to_owned())),
            relationship: None,
        })
    }

    /// Every attribute and relationship visible on `entity_type`, base model
    /// fields first. The identity field is not included.
    fn fields(&self, entity_type: &str) -> Result<Vec<FieldMeta>> {
        let mut chain = Vec::new();
        let mut current = Some(self.model(entity_type)?);
        while let Some(model) = current {
            current = match model.parent.as_deref() {
                Some(parent) => Some(self.model(parent)?),
                None => None,
            };
            chain.push(model);
        }
        let mut out = Vec::new();
        for model in chain.iter().rev() {
            for attr in &model.attributes {
                out.extend(model.local_field(&attr.name));
            }
            for rel in &model.relationships {
                out.extend(model.local_field(&rel.name));
            }
        }
        Ok(out)
    }

    /// Looks up a named projection, falling back to base models.
    fn projection(&self, entity_type: &str, name: &str) -> Result<ProjectionDef> {
        let mut current = self.model(entity_type)?;
        loop {
            if let Some(found) = current.projections.iter().find(|p| p.name == name) {
                return Ok(found.clone());
            }
            let parent = current.parent.clone();
            match parent {
                Some(parent) => current = self.model(&parent)?,
                None => {
                    return Err(QueryError::ProjectionNotFound {
                        model: entity_type.to_owned(),
                        projection: name.to_owned(),
                    })
                }
            }
        }
    }
}

/// Splits a dotted path, rejecting empty segments.
pub fn path_segments(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    if path.trim().is_empty() || segments.iter().any(|s| s.is_empty()) {
        return Err(QueryError::EmptyPath {
            path: path.to_owned(),
        });
    }
    Ok(segments)
}

/// Resolves a dotted path segment by segment. Every non-terminal segment
/// must be a master (belongsTo) relationship.
pub fn resolve_path(
    provider: &dyn MetadataProvider,
    entity_type: &str,
    path: &str,
) -> Result<Vec<FieldMeta>> {
    let segments = path_segments(path)?;
    let mut out = Vec::with_capacity(segments.len());
    let mut current = entity_type.to_owned();
    let last = segments.len() - 1;
    for (idx, segment) in segments.into_iter().enumerate() {
        let meta = provider.resolve(&current, segment)?;
        if idx < last {
            if meta.kind != FieldKind::BelongsTo {
                return Err(QueryError::NotARelationship {
                    model: current,
                    prop: segment.to_owned(),
                });
            }
            current = meta.target_type.clone().unwrap_or_default();
        }
        out.push(meta);
    }
    Ok(out)
}

/// Resolves the target type of a detail (hasMany) path.
pub fn resolve_detail(
    provider: &dyn MetadataProvider,
    entity_type: &str,
    path: &str,
) -> Result<FieldMeta> {
    let chain = resolve_path(provider, entity_type, path)?;
    let Some(last) = chain.into_iter().last() else {
        return Err(QueryError::EmptyPath {
            path: path.to_owned(),
        });
    };
    if last.kind != FieldKind::HasMany {
        return Err(QueryError::NotARelationship {
            model: last.source_type,
            prop: last.name,
        });
    }
    Ok(last)
}

/// On-disk layout of a schema file.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SchemaFile {
    /// Models in the schema.
    #[serde(default)]
    pub models: Vec<ModelSchema>,
}

/// Simple in-memory metadata provider.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetadata {
    models: HashMap<String, Arc<ModelSchema>>,
}

impl InMemoryMetadata {
    /// Creates a new empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model.
    pub fn with_model(mut self, model: ModelSchema) -> Self {
        self.models.insert(model.name.clone(), Arc::new(model));
        self
    }

    /// Builds a provider from a parsed schema file.
    pub fn from_schema(schema: SchemaFile) -> Self {
        schema
            .models
            .into_iter()
            .fold(Self::new(), InMemoryMetadata::with_model)
    }

    /// Parses a TOML schema (`[[models]]` tables).
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let schema: SchemaFile =
            toml::from_str(raw).map_err(|err| QueryError::Config(err.to_string()))?;
        Ok(Self::from_schema(schema))
    }

    /// Parses a JSON schema (`{"models": [...]}`).
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let schema: SchemaFile =
            serde_json::from_str(raw).map_err(|err| QueryError::Config(err.to_string()))?;
        Ok(Self::from_schema(schema))
    }

    /// Registered model names, sorted.
    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.models.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl MetadataProvider for InMemoryMetadata {
    fn model(&self, entity_type: &str) -> Result<Arc<ModelSchema>> {
        self.models
            .get(entity_type)
            .cloned()
            .ok_or_else(|| QueryError::unknown_model(entity_type))
    }
}
