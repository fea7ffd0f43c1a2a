#![forbid(unsafe_code)]

//! Query model and translators.
//!
//! The builder produces a [`QueryDescriptor`]; the protocol, in-memory and
//! local-index translators consume it read-only.

/// Fluent construction of query descriptors.
pub mod builder;

/// Date formatting and parsing used by date predicates.
pub mod date;

/// Immutable query descriptor and select trees.
pub mod descriptor;

/// Local-index translator, index schema derivation and the store seam.
pub mod local;

/// In-memory translator: filter, order, paginate and project stages.
pub mod memory;

/// Schema metadata consumed by the builder and translators.
///
/// Resolves path segments, walks model inheritance and serves named
/// projections.
pub mod metadata;

/// Multi-key ordering clause.
pub mod order;

/// Filter predicate algebra.
pub mod predicate;

/// Projection definitions.
pub mod projection;

/// Protocol translator producing remote query options.
pub mod protocol;

/// Literal and record values.
pub mod value;

#[cfg(test)]
mod fixtures;

pub use builder::{QueryBuilder, WhereArg, WhereClause};
pub use descriptor::{QueryDescriptor, SelectMode, SelectTree};
pub use local::{IndexRange, IndexSpec, LocalIndexTranslator, LocalPlan, LocalStore, MemoryStore};
pub use memory::{CompiledQuery, InMemoryTranslator};
pub use metadata::{InMemoryMetadata, MetadataProvider, ModelSchema};
pub use order::OrderByClause;
pub use predicate::{Condition, DetailPredicate, Param, Predicate, SimpleOp};
pub use protocol::{ProtocolRequest, ProtocolTranslator};
pub use value::{Record, Value};
