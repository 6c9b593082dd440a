//! The closed set of models an [`Engine`](crate::Engine) knows about.
//!
//! Models are declared at compile time with [`ModelDefinition`] and either
//! registered explicitly on a [`ModelRegistryBuilder`] or submitted from
//! anywhere in the program with [`submit_model!`](crate::submit_model) and
//! picked up by [`ModelRegistryBuilder::collect_submitted`].

use std::{collections::BTreeMap, sync::Arc};

use tracing::debug;

use crate::{
    error::{Error, Result},
    model::schema::Schema,
};

/// A model type known at compile time.
pub trait ModelDefinition {
    const NAME: &'static str;

    fn schema() -> Result<Schema>;
}

pub struct RegisteredModel {
    pub name: &'static str,
    pub schema: fn() -> Result<Schema>,
}

impl RegisteredModel {
    pub const fn new<M: ModelDefinition>() -> Self {
        Self {
            name: M::NAME,
            schema: M::schema,
        }
    }
}

inventory::collect!(RegisteredModel);

#[macro_export]
macro_rules! submit_model {
    ($model_type:ty) => {
        $crate::inventory::submit! {
            $crate::RegisteredModel::new::<$model_type>()
        }
    };
}

#[derive(Debug, Default)]
pub struct ModelRegistry {
    schemas: BTreeMap<String, Arc<Schema>>,
}

impl ModelRegistry {
    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder::default()
    }

    pub fn schema(&self, name: &str) -> Option<&Arc<Schema>> {
        self.schemas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    fn verify(&self) -> Result<()> {
        for schema in self.schemas.values() {
            for (name, spec) in schema.fields() {
                spec.kind.verify(name, schema.name(), self)?;

                for (model, field) in &spec.referenced_by {
                    let known = self
                        .schema(model)
                        .is_some_and(|target| target.field_spec(field).is_some());
                    if !known {
                        return Err(Error::server(
                            "FIELD_REFERENCED_BY_UNKNOWN_FIELD",
                            format!(
                                "Field `{}.{name}` is referenced by unknown field `{model}.{field}`",
                                schema.name()
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Collects schemas, then checks every cross-model reference once in
/// [`build`](Self::build).
#[derive(Default)]
pub struct ModelRegistryBuilder {
    pending: Vec<(&'static str, Result<Schema>)>,
}

impl ModelRegistryBuilder {
    pub fn register<M: ModelDefinition>(mut self) -> Self {
        self.pending.push((M::NAME, M::schema()));
        self
    }

    pub fn register_schema(mut self, schema: Schema) -> Self {
        self.pending.push(("", Ok(schema)));
        self
    }

    /// Adds every model submitted with `submit_model!`.
    pub fn collect_submitted(mut self) -> Self {
        for registered in inventory::iter::<RegisteredModel> {
            self.pending.push((registered.name, (registered.schema)()));
        }
        self
    }

    pub fn build(self) -> Result<ModelRegistry> {
        let mut schemas = BTreeMap::new();

        for (declared, schema) in self.pending {
            let schema = schema?;
            if !declared.is_empty() && declared != schema.name() {
                return Err(Error::server(
                    "MODEL_REGISTRY_NAME_MISMATCH",
                    format!(
                        "Model `{declared}` produced a schema named `{}`",
                        schema.name()
                    ),
                ));
            }
            let name = schema.name().to_string();
            if schemas.insert(name.clone(), Arc::new(schema)).is_some() {
                return Err(Error::server(
                    "MODEL_REGISTRY_DUPLICATE_NAME",
                    format!("Model `{name}` is registered more than once"),
                ));
            }
        }

        let registry = ModelRegistry { schemas };
        registry.verify()?;

        debug!(models = registry.len(), "model registry built");
        Ok(registry)
    }
}
