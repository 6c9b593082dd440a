//! Declarative models over a hierarchical, file-backed configuration tree.
//!
//! Models are declared once as [`Schema`]s made of typed [`FieldSpec`]s,
//! collected into a [`ModelRegistry`] and operated on through an [`Engine`]
//! that owns the shared [`ConfigStore`].

pub mod engine;
pub mod error;
pub mod field;
pub mod identity;
pub mod model;
pub mod registry;
pub mod store;
pub mod validators;

pub use engine::{Engine, ModelInit};
pub use error::{Error, ErrorKind, ErrorPayload, Result};
pub use field::{Choice, Field, FieldSpec, FieldSpecBuilder};
pub use identity::Client;
pub use model::{
    Model,
    hooks::{DefaultHooks, ModelHooks},
    schema::{Schema, SchemaBuilder, SortOrder, SortPolicy},
    set::{Filter, Lookup, ModelSet},
};
pub use registry::{ModelDefinition, ModelRegistry, ModelRegistryBuilder, RegisteredModel};
pub use store::{AuditEntry, ChangeNote, ConfigStore, StoreOptions};

// re-export for `submit_model!`
pub use inventory;
