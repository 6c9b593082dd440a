//! The handle every model operation runs against.
//!
//! An [`Engine`] bundles the store, the model registry and the installed
//! package set. It is cheap to clone and carries no per-request state; the
//! acting [`Client`] travels with each [`Model`].

use std::{collections::BTreeSet, sync::Arc};

use serde_json::Value as Json;
use serde_value::Value;
use tracing::info;

use crate::{
    error::{Error, Result},
    field::{Field, foreign::ID_FIELD, types::Stamp},
    identity::Client,
    model::{
        Model, dangerous_path, id_required, object_not_found,
        schema::Schema,
        set::{Filter, ModelSet, loose_eq},
    },
    registry::ModelRegistry,
    store::{ChangeNote, ConfigStore, tree},
};

/// How [`Engine::instantiate`] populates a new model.
#[derive(Debug, Clone, Default)]
pub struct ModelInit {
    /// Load the stored record with this id.
    pub id: Option<usize>,
    /// Apply this payload over the defaults.
    pub data: Option<Json>,
    pub client: Option<Client>,
}

impl ModelInit {
    pub fn id(id: usize) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn data(data: Json) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Engine {
    store: Arc<ConfigStore>,
    registry: Arc<ModelRegistry>,
    packages: BTreeSet<String>,
    includes: BTreeSet<String>,
}

impl Engine {
    pub fn new(store: Arc<ConfigStore>, registry: Arc<ModelRegistry>) -> Self {
        Self {
            store,
            registry,
            packages: BTreeSet::new(),
            includes: BTreeSet::new(),
        }
    }

    /// Marks packages as installed.
    pub fn with_packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages.extend(packages.into_iter().map(Into::into));
        self
    }

    pub fn with_includes<I, S>(mut self, includes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.includes.extend(includes.into_iter().map(Into::into));
        self
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn has_package(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    pub fn has_include(&self, include: &str) -> bool {
        self.includes.contains(include)
    }

    pub fn schema(&self, name: &str) -> Result<Arc<Schema>> {
        self.registry.schema(name).cloned().ok_or_else(|| {
            Error::server(
                "MODEL_NOT_REGISTERED",
                format!("Model `{name}` is not registered"),
            )
        })
    }

    /// A fresh record of `name` holding its defaults.
    pub fn model(&self, name: &str) -> Result<Model> {
        Ok(Model::new(self.schema(name)?))
    }

    /// Builds a model either from a stored record or from a payload.
    ///
    /// Singletons always start from their stored record; a payload is then
    /// layered on top.
    pub fn instantiate(&self, name: &str, init: ModelInit) -> Result<Model> {
        if init.id.is_some() && init.data.is_some() {
            return Err(Error::server(
                "MODEL_CANNOT_INITIALIZE_WITH_ID_AND_DATA",
                format!("Model `{name}` cannot be initialized with both an id and data"),
            ));
        }

        let schema = self.schema(name)?;
        let mut model = Model::new(schema.clone()).with_client(init.client.unwrap_or_default());

        if schema.many() {
            if let Some(id) = init.id {
                model.set_id(Some(id));
                model.from_internal(self)?;
            }
        } else if schema.config_path().is_some() || schema.internal_callable().is_some() {
            model.from_internal(self)?;
        }

        if let Some(data) = &init.data {
            model.from_representation(data)?;
        }

        Ok(model)
    }

    /// The stored record `id` of a many model, or the singleton when `id` is
    /// `None`.
    pub fn get(&self, name: &str, id: Option<usize>) -> Result<Model> {
        self.instantiate(
            name,
            ModelInit {
                id,
                ..ModelInit::default()
            },
        )
    }

    /// Every stored record, ordered by the model's sort policy if it has one.
    pub fn read_all(&self, name: &str) -> Result<ModelSet> {
        let schema = self.schema(name)?;

        let mut models = Vec::new();
        for (id, record) in self.stored_records(&schema)? {
            let mut model = Model::new(schema.clone());
            model.set_id(id);
            model.load_fields(&record, self)?;
            models.push(model);
        }

        let mut set = ModelSet::new(models);
        if let Some(policy) = schema.sort() {
            set.sort(policy);
        }
        Ok(set)
    }

    /// Records matching every `field__lookup` term.
    pub fn query(&self, name: &str, terms: &[(&str, Json)]) -> Result<ModelSet> {
        let schema = self.schema(name)?;
        let filters = terms
            .iter()
            .map(|(term, value)| Filter::parse(term, value.clone()))
            .collect::<Result<Vec<_>>>()?;

        if let Some(unknown) = filters
            .iter()
            .find(|f| f.field != ID_FIELD && schema.field_spec(&f.field).is_none())
        {
            return Err(Error::validation(
                "MODEL_QUERY_UNKNOWN_FIELD",
                Some(&unknown.field),
                format!(
                    "{} has no field `{}` to filter on",
                    schema.verbose_name(),
                    unknown.field
                ),
            ));
        }

        Ok(self.read_all(name)?.filter(&filters))
    }

    /// Deletes every record matching `terms` in one write. Nothing is deleted
    /// if any matching record fails validation or is still referenced.
    ///
    /// Matches are looked up again under the write lock, so the returned set
    /// is what was actually removed.
    pub fn delete_many(
        &self,
        name: &str,
        terms: &[(&str, Json)],
        client: Client,
        apply: bool,
    ) -> Result<ModelSet> {
        let schema = self.schema(name)?;
        let path = default_storage(&schema, "MODEL_REQUIRES_CUSTOM_DELETE")?;

        self.store.refresh()?;
        let matched = self.deletable(name, terms, &client)?;
        if !matched.exists() {
            return Ok(matched);
        }

        let mut note = ChangeNote::new(format!(
            "Deleted {} {}",
            matched.count(),
            schema.verbose_name_plural()
        ))
        .client(client.clone());
        if let Some(subsystem) = schema.subsystem() {
            note = note.subsystem(subsystem);
        }

        let doomed = self.store.with_write_lock(&note, |tree| {
            let doomed = self.deletable(name, terms, &client)?;
            for id in doomed.iter().filter_map(Model::id) {
                tree::remove(tree, &tree::join(&[path, &id.to_string()]));
            }
            Ok(doomed)
        })?;
        info!(model = name, count = doomed.count(), username = %client.username, "objects deleted");

        if let (true, Some(first)) = (apply, doomed.first()) {
            schema.hooks().apply(first, self)?;
        }
        Ok(doomed)
    }

    /// Records matching `terms`, each checked for deletion.
    fn deletable(&self, name: &str, terms: &[(&str, Json)], client: &Client) -> Result<ModelSet> {
        let doomed: ModelSet = self
            .query(name, terms)?
            .into_iter()
            .map(|m| m.with_client(client.clone()))
            .collect();

        for model in &doomed {
            model.check_packages(self)?;
            model.validate(self)?;
            model.ensure_unreferenced(self)?;
        }
        Ok(doomed)
    }

    /// Replaces the whole collection with `payloads`, assigning ids in
    /// order. Every payload is validated, against the others too, before
    /// anything is written.
    pub fn replace_all(
        &self,
        name: &str,
        payloads: &[Json],
        client: Client,
        apply: bool,
    ) -> Result<ModelSet> {
        let schema = self.schema(name)?;
        let path = default_storage(&schema, "MODEL_REQUIRES_CUSTOM_CREATE")?;

        self.store.refresh()?;

        let mut models = Vec::with_capacity(payloads.len());
        for (id, payload) in payloads.iter().enumerate() {
            let mut model = Model::new(schema.clone()).with_client(client.clone());
            model.from_representation(payload)?;
            model.set_id(Some(id));
            model.stamp(Stamp::Create);
            model.check_packages(self)?;
            model.validate_against(self, &[])?;
            models.push(model);
        }

        let mut note = ChangeNote::new(format!("Replaced all {}", schema.verbose_name_plural()))
            .client(client.clone());
        if let Some(subsystem) = schema.subsystem() {
            note = note.subsystem(subsystem);
        }

        self.store.with_write_lock(&note, |tree| {
            let records = models
                .iter()
                .map(|m| Ok((m.id(), m.to_internal(self)?)))
                .collect::<Result<Vec<_>>>()?;

            for model in &models {
                let others: Vec<_> = records
                    .iter()
                    .filter(|(id, _)| *id != model.id())
                    .cloned()
                    .collect();
                model.validate_against(self, &others)?;
            }

            for existing in &self.read_all(name)? {
                let kept = models.iter().any(|new| {
                    existing
                        .fields()
                        .iter()
                        .filter(|f| !f.spec().referenced_by.is_empty())
                        .all(|f| new.get(f.name()) == Some(f.value()))
                });
                if !kept {
                    existing.ensure_unreferenced(self)?;
                }
            }

            let collection = Value::Map(
                records
                    .into_iter()
                    .filter_map(|(id, record)| Some((tree::key(&id?.to_string()), record)))
                    .collect(),
            );
            tree::set(tree, path, collection)
        })?;
        info!(model = name, count = models.len(), username = %client.username, "objects replaced");

        let set = ModelSet::new(models);
        if let (true, Some(first)) = (apply, set.first()) {
            schema.hooks().apply(first, self)?;
        }
        Ok(set)
    }

    fn storage(&self, schema: &Schema) -> Result<Option<Value>> {
        match (schema.config_path(), schema.internal_callable()) {
            (Some(path), _) => Ok(self.store.get_opt(path)),
            (None, Some(callable)) => callable(&self.store).map(Some),
            (None, None) => Err(Error::server(
                "MODEL_WITHOUT_STORAGE",
                format!(
                    "{} has neither a config path nor an internal callable",
                    schema.verbose_name()
                ),
            )),
        }
    }

    /// Every stored record of a model with its id. A singleton yields one
    /// record with no id.
    pub(crate) fn stored_records(&self, schema: &Schema) -> Result<Vec<(Option<usize>, Value)>> {
        let data = self.storage(schema)?;

        if !schema.many() {
            let record = data.filter(|d| !tree::is_blank(d)).unwrap_or_else(tree::empty);
            return Ok(vec![(None, record)]);
        }

        let ids = tree::record_ids(data.as_ref())
            .ok_or_else(|| dangerous_path(schema.config_path().unwrap_or(schema.name())))?;
        let Some(data) = data else {
            return Ok(Vec::new());
        };

        Ok(ids
            .into_iter()
            .filter_map(|id| tree::get(&data, &id.to_string()).map(|r| (Some(id), r.clone())))
            .collect())
    }

    pub(crate) fn load_record(&self, schema: &Schema, id: Option<usize>) -> Result<Value> {
        if !schema.many() {
            return Ok(self
                .stored_records(schema)?
                .into_iter()
                .next()
                .map(|(_, record)| record)
                .unwrap_or_else(tree::empty));
        }

        let id = id.ok_or_else(|| id_required(schema))?;
        self.stored_records(schema)?
            .into_iter()
            .find(|(stored, _)| *stored == Some(id))
            .map(|(_, record)| record)
            .ok_or_else(|| object_not_found(schema, id))
    }

    /// The record of `model` whose `field` has representation `value`.
    pub(crate) fn find_by_representation(
        &self,
        model: &str,
        field: &str,
        value: &Json,
    ) -> Result<Option<(Option<usize>, Value)>> {
        let schema = self.schema(model)?;

        if field == ID_FIELD {
            let wanted = match value {
                Json::Number(n) => n.as_u64().map(|n| n as usize),
                Json::String(s) => s.parse().ok(),
                _ => None,
            };
            let Some(wanted) = wanted else {
                return Ok(None);
            };
            return Ok(self
                .stored_records(&schema)?
                .into_iter()
                .find(|(id, _)| *id == Some(wanted)));
        }

        let reader = self.field_reader(&schema, field)?;
        for (id, record) in self.stored_records(&schema)? {
            let decoded = reader.decode_internal(reader.locate(&record), self)?;
            if loose_eq(&decoded, value) {
                return Ok(Some((id, record)));
            }
        }
        Ok(None)
    }

    /// The record of `model` whose `field` is stored as `raw`.
    pub(crate) fn find_by_internal(
        &self,
        model: &str,
        field: &str,
        raw: &str,
    ) -> Result<Option<(Option<usize>, Value)>> {
        let schema = self.schema(model)?;
        let records = self.stored_records(&schema)?;

        if field == ID_FIELD {
            let wanted = raw.parse::<usize>().ok();
            return Ok(records.into_iter().find(|(id, _)| wanted.is_some() && *id == wanted));
        }

        let path = schema.internal_path(field)?;
        Ok(records.into_iter().find(|(_, record)| {
            tree::get(record, &path)
                .and_then(tree::scalar_text)
                .is_some_and(|text| text == raw)
        }))
    }

    pub(crate) fn decode_record_field(&self, model: &str, field: &str, record: &Value) -> Result<Json> {
        let schema = self.schema(model)?;
        let reader = self.field_reader(&schema, field)?;
        reader.decode_internal(reader.locate(record), self)
    }

    fn field_reader(&self, schema: &Schema, field: &str) -> Result<Field> {
        let spec = schema.field_spec(field).ok_or_else(|| {
            Error::server(
                "MODEL_FIELD_NOT_FOUND",
                format!("Model `{}` has no field `{field}`", schema.name()),
            )
        })?;
        Ok(Field::new(field, spec.clone()))
    }
}

fn default_storage<'a>(schema: &'a Schema, response_id: &str) -> Result<&'a str> {
    match schema.config_path() {
        Some(path) if schema.many() => Ok(path),
        _ => Err(Error::server(
            response_id,
            format!(
                "{} has no default storage for bulk operations",
                schema.verbose_name()
            ),
        )),
    }
}
