//! Backend-agnostic query representation and translation.
//!
//! Queries are assembled with a [`QueryBuilder`] into an immutable
//! [`QueryDescriptor`], then handed to one of three translators:
//!
//! - [`ProtocolTranslator`] renders OData-style query options for a remote
//!   service.
//! - [`InMemoryTranslator`] filters, orders, paginates and projects plain
//!   records.
//! - [`LocalIndexTranslator`] plans native index ranges against a local
//!   key-value store and falls back to in-memory filtering.
//!
//! Schema knowledge is read through a [`MetadataProvider`] passed to every
//! component.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod query;
pub mod telemetry;

pub use config::EngineConfig;
pub use error::{QueryError, QueryErrorWithCode, Result};
pub use query::{
    InMemoryMetadata, InMemoryTranslator, LocalIndexTranslator, MetadataProvider, Predicate,
    ProtocolTranslator, QueryBuilder, QueryDescriptor,
};
