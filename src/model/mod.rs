//! Records composed of typed fields, and the CRUD protocol over them.
//!
//! A [`Model`] is transient: build one per operation from an
//! [`Engine`](crate::Engine), mutate it, then either discard it or commit it
//! with [`Model::create`], [`Model::update`] or [`Model::delete`]. Every
//! commit validates all fields in declaration order before touching the
//! store; the first failure aborts the operation with nothing written.
//!
//! Checks that depend on other stored records (uniqueness, foreign keys,
//! references) are repeated by the default storage routines while the
//! write lock is held, against the tree as it is on disk at that moment.

pub mod hooks;
pub mod schema;
pub mod set;

use std::{fmt, sync::Arc};

use serde_json::{Map, Value as Json, json};
use serde_value::Value;
use tracing::{info, warn};

use crate::{
    engine::Engine,
    error::{Error, Result},
    field::{Field, foreign::ID_FIELD, types::Stamp},
    identity::Client,
    store::{ChangeNote, tree},
};
use schema::Schema;

pub(crate) fn dangerous_path(path: &str) -> Error {
    Error::server(
        "MODEL_DANGEROUS_CONFIG_PATH",
        format!("Config path `{path}` does not hold a collection of records; refusing to write to it"),
    )
}

pub(crate) fn id_required(schema: &Schema) -> Error {
    Error::validation(
        "MODEL_ID_REQUIRED",
        Some(ID_FIELD),
        format!("An id is required to address a {} object", schema.verbose_name()),
    )
}

pub(crate) fn object_not_found(schema: &Schema, id: usize) -> Error {
    Error::not_found(
        "MODEL_OBJECT_NOT_FOUND",
        format!("{} object with id {id} does not exist", schema.verbose_name()),
    )
}

#[derive(Clone)]
pub struct Model {
    schema: Arc<Schema>,
    id: Option<usize>,
    fields: Vec<Field>,
    client: Client,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.schema.name())
            .field("id", &self.id)
            .field("fields", &self.fields)
            .field("client", &self.client)
            .finish()
    }
}

impl Model {
    /// A record holding every field's default, acting as the system identity.
    pub fn new(schema: Arc<Schema>) -> Self {
        let fields = schema
            .fields()
            .iter()
            .map(|(name, spec)| Field::new(name.clone(), spec.clone()))
            .collect();

        Self {
            schema,
            id: None,
            fields,
            client: Client::system(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn id(&self) -> Option<usize> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: Option<usize>) {
        self.id = id;
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<&Json> {
        self.field(name).map(Field::value)
    }

    pub fn set(&mut self, name: &str, value: impl Into<Json>) -> Result<()> {
        let model = self.schema.name().to_string();
        let field = self.field_mut(name).ok_or_else(|| {
            Error::server(
                "MODEL_FIELD_NOT_FOUND",
                format!("Model `{model}` has no field `{name}`"),
            )
        })?;
        field.set_value(value);
        Ok(())
    }

    /// Applies a caller payload. Keys naming read-only fields and keys the
    /// model does not declare are ignored; fields missing from the payload
    /// keep their current values.
    pub fn from_representation(&mut self, payload: &Json) -> Result<()> {
        let Json::Object(payload) = payload else {
            return Err(Error::validation(
                "MODEL_REPRESENTATION_MUST_BE_OBJECT",
                None,
                format!("{} data must be an object", self.schema.verbose_name()),
            ));
        };

        for field in &mut self.fields {
            if field.spec().read_only {
                continue;
            }
            if let Some(value) = payload.get(field.name()) {
                field.set_value(value.clone());
            }
        }

        Ok(())
    }

    /// The record as exchanged with callers. Write-only fields and fields
    /// whose conditions are unmet are left out.
    pub fn to_representation(&self) -> Json {
        let mut map = Map::new();
        if self.schema.many() {
            map.insert(
                ID_FIELD.to_string(),
                self.id.map(Json::from).unwrap_or(Json::Null),
            );
        }
        for field in &self.fields {
            if field.spec().write_only || !field.conditions_met(self) {
                continue;
            }
            map.insert(field.name().to_string(), field.value().clone());
        }
        Json::Object(map)
    }

    /// Persisted fields as `(path inside record, stored value)`.
    fn internal_entries(&self, engine: &Engine) -> Result<Vec<(String, Option<Value>)>> {
        self.fields
            .iter()
            .filter(|f| !f.spec().representation_only && f.conditions_met(self))
            .map(|f| Ok((f.internal_path(), f.to_internal(engine)?)))
            .collect()
    }

    /// The record in stored form.
    pub fn to_internal(&self, engine: &Engine) -> Result<Value> {
        let mut record = tree::empty();
        for (path, value) in self.internal_entries(engine)? {
            if let Some(value) = value {
                tree::set(&mut record, &path, value)?;
            }
        }
        Ok(record)
    }

    /// Reloads every field from the stored record this model addresses.
    pub fn from_internal(&mut self, engine: &Engine) -> Result<()> {
        let record = engine.load_record(&self.schema, self.id)?;
        self.load_fields(&record, engine)
    }

    pub(crate) fn load_fields(&mut self, record: &Value, engine: &Engine) -> Result<()> {
        for field in &mut self.fields {
            if field.spec().representation_only {
                continue;
            }
            let raw = field.locate(record);
            field.from_internal(raw, engine)?;
        }
        Ok(())
    }

    pub(crate) fn stamp(&mut self, event: Stamp) {
        for field in &mut self.fields {
            if let Some(now) = field.spec().kind.stamp(event) {
                field.set_value(now);
            }
        }
    }

    /// Stored records of the same model other than this one.
    fn siblings(&self, engine: &Engine) -> Result<Vec<(Option<usize>, Value)>> {
        if !self.schema.many() {
            return Ok(Vec::new());
        }
        Ok(engine
            .stored_records(&self.schema)?
            .into_iter()
            .filter(|(id, _)| self.id.is_none() || *id != self.id)
            .collect())
    }

    /// Validates every field, then model-wide constraints.
    pub fn validate(&self, engine: &Engine) -> Result<()> {
        let siblings = self.siblings(engine)?;
        self.validate_against(engine, &siblings)
    }

    pub(crate) fn validate_against(
        &self,
        engine: &Engine,
        siblings: &[(Option<usize>, Value)],
    ) -> Result<()> {
        for field in &self.fields {
            field.validate(self, siblings, engine)?;
        }

        self.validate_unique_together(engine, siblings)?;

        self.schema.hooks().validate_extra(self, engine)
    }

    fn validate_unique_together(
        &self,
        engine: &Engine,
        siblings: &[(Option<usize>, Value)],
    ) -> Result<()> {
        let group: Vec<&Field> = self
            .schema
            .unique_together()
            .iter()
            .filter_map(|name| self.field(name))
            .collect();
        if group.is_empty() {
            return Ok(());
        }

        let mine = group
            .iter()
            .map(|f| f.to_internal(engine))
            .collect::<Result<Vec<_>>>()?;

        let clash = siblings.iter().find(|(_, record)| {
            group
                .iter()
                .zip(&mine)
                .all(|(field, value)| field.locate(record) == value.as_ref())
        });

        if let Some((id, _)) = clash {
            let names: Vec<&str> = group.iter().map(|f| f.name()).collect();
            return Err(Error::validation(
                "MODEL_FIELDS_NOT_UNIQUE_TOGETHER",
                None,
                format!(
                    "Fields [{}] must be unique together; object {} already uses these values",
                    names.join(", "),
                    id.map(|id| id.to_string()).unwrap_or_default()
                ),
            ));
        }

        Ok(())
    }

    pub(crate) fn check_packages(&self, engine: &Engine) -> Result<()> {
        if let Some(missing) = self
            .schema
            .packages()
            .iter()
            .find(|p| !engine.has_package(p))
        {
            return Err(Error::failed_dependency(
                "MODEL_MISSING_REQUIRED_PACKAGE",
                format!(
                    "{} requires package `{missing}`, which is not installed",
                    self.schema.verbose_name()
                ),
            ));
        }
        if let Some(missing) = self
            .schema
            .package_includes()
            .iter()
            .find(|i| !engine.has_include(i))
        {
            return Err(Error::failed_dependency(
                "MODEL_MISSING_REQUIRED_INCLUDE",
                format!(
                    "{} requires `{missing}`, which is not loaded",
                    self.schema.verbose_name()
                ),
            ));
        }
        Ok(())
    }

    /// Records of other models whose `referenced_by` fields currently point
    /// at this record.
    pub fn references(&self, engine: &Engine) -> Result<Vec<Json>> {
        let mut found = Vec::new();

        for field in &self.fields {
            if field.value().is_null() {
                continue;
            }
            for (model, referencing) in &field.spec().referenced_by {
                let schema = engine.schema(model)?;
                let spec = schema.field_spec(referencing).ok_or_else(|| {
                    Error::server(
                        "MODEL_FIELD_NOT_FOUND",
                        format!("Model `{model}` has no field `{referencing}`"),
                    )
                })?;
                let reader = Field::new(referencing.clone(), spec.clone());

                for (id, record) in engine.stored_records(&schema)? {
                    if model == self.name() && id == self.id {
                        continue;
                    }
                    let value = reader.decode_internal(reader.locate(&record), engine)?;
                    let hit = match &value {
                        Json::Array(items) => items.contains(field.value()),
                        single => single == field.value(),
                    };
                    if hit {
                        found.push(json!({ "model": model, "id": id, "field": referencing }));
                    }
                }
            }
        }

        Ok(found)
    }

    pub(crate) fn ensure_unreferenced(&self, engine: &Engine) -> Result<()> {
        let references = self.references(engine)?;
        if references.is_empty() {
            return Ok(());
        }

        warn!(
            model = self.name(),
            id = ?self.id,
            references = references.len(),
            "refusing to delete referenced record"
        );
        Err(Error::conflict(
            "MODEL_CANNOT_BE_DELETED_IN_USE",
            format!(
                "{} object cannot be deleted because it is in use",
                self.schema.verbose_name()
            ),
            json!({ "references": references }),
        ))
    }

    /// This record's representation, or every record's when `all` is set on
    /// a many model.
    pub fn read(&self, engine: &Engine, all: bool) -> Result<Json> {
        if all && self.schema.many() {
            return Ok(engine.read_all(self.name())?.to_representation());
        }
        Ok(self.to_representation())
    }

    fn change(&self, verb: &str) -> ChangeNote {
        let mut note = ChangeNote::new(format!("{verb} {}", self.schema.verbose_name()))
            .client(self.client.clone());
        if let Some(subsystem) = self.schema.subsystem() {
            note = note.subsystem(subsystem);
        }
        note
    }

    fn ensure_exists(&self, engine: &Engine) -> Result<()> {
        if self.schema.many() {
            let id = self.id.ok_or_else(|| id_required(&self.schema))?;
            engine.load_record(&self.schema, Some(id))?;
        }
        Ok(())
    }

    pub fn create(&mut self, engine: &Engine, apply: bool) -> Result<()> {
        self.check_packages(engine)?;
        engine.store().refresh()?;
        if self.schema.many() {
            self.id = None;
        }
        self.stamp(Stamp::Create);
        self.validate(engine)?;

        let hooks = self.schema.hooks().clone();
        hooks.create(self, engine)?;
        info!(model = self.name(), id = ?self.id, username = %self.client.username, "object created");

        if apply {
            hooks.apply(self, engine)?;
        }
        Ok(())
    }

    pub fn update(&mut self, engine: &Engine, apply: bool) -> Result<()> {
        self.check_packages(engine)?;
        engine.store().refresh()?;
        self.ensure_exists(engine)?;
        self.stamp(Stamp::Update);
        self.validate(engine)?;

        let hooks = self.schema.hooks().clone();
        hooks.update(self, engine)?;
        info!(model = self.name(), id = ?self.id, username = %self.client.username, "object updated");

        if apply {
            hooks.apply(self, engine)?;
        }
        Ok(())
    }

    pub fn delete(&mut self, engine: &Engine, apply: bool) -> Result<()> {
        self.check_packages(engine)?;
        engine.store().refresh()?;
        self.ensure_exists(engine)?;
        self.validate(engine)?;
        self.ensure_unreferenced(engine)?;

        let hooks = self.schema.hooks().clone();
        hooks.delete(self, engine)?;
        info!(model = self.name(), id = ?self.id, username = %self.client.username, "object deleted");

        if apply {
            hooks.apply(self, engine)?;
        }
        Ok(())
    }

    /// Appends this record to its collection under the next free id.
    pub fn default_create(&mut self, engine: &Engine) -> Result<()> {
        let schema = self.schema.clone();
        let path = match schema.config_path() {
            Some(path) if schema.many() => path,
            _ => {
                return Err(Error::server(
                    "MODEL_REQUIRES_CUSTOM_CREATE",
                    format!(
                        "{} has no default create behaviour; it must provide its own",
                        schema.verbose_name()
                    ),
                ));
            }
        };

        let id = engine.store().with_write_lock(&self.change("Added"), |tree| {
            self.validate(engine)?;
            let record = self.to_internal(engine)?;
            let id = tree::next_id(tree::get(tree, path)).ok_or_else(|| dangerous_path(path))?;
            tree::set(tree, &tree::join(&[path, &id.to_string()]), record)?;
            Ok(id)
        })?;

        self.id = Some(id);
        Ok(())
    }

    /// Merges this record's stored form over what is stored, keeping keys
    /// the model does not declare.
    pub fn default_update(&mut self, engine: &Engine) -> Result<()> {
        let Some(base) = self.schema.config_path() else {
            return Err(Error::server(
                "MODEL_REQUIRES_CUSTOM_UPDATE",
                format!(
                    "{} has no config path; it must provide its own update",
                    self.schema.verbose_name()
                ),
            ));
        };
        let path = match (self.schema.many(), self.id) {
            (true, Some(id)) => tree::join(&[base, &id.to_string()]),
            (true, None) => return Err(id_required(&self.schema)),
            (false, _) => base.to_string(),
        };

        let (many, id) = (self.schema.many(), self.id);
        let schema = self.schema.clone();

        engine.store().with_write_lock(&self.change("Modified"), |tree| {
            self.validate(engine)?;
            let entries = self.internal_entries(engine)?;

            let mut record = match tree::get(tree, &path) {
                Some(Value::Map(map)) => Value::Map(map.clone()),
                Some(blank) if tree::is_blank(blank) => tree::empty(),
                None if !many => tree::empty(),
                None => return Err(object_not_found(&schema, id.unwrap_or_default())),
                Some(_) => return Err(dangerous_path(&path)),
            };

            for (key, value) in entries {
                match value {
                    Some(value) => tree::set(&mut record, &key, value)?,
                    None => {
                        tree::remove(&mut record, &key);
                    }
                }
            }

            tree::set(tree, &path, record)
        })
    }

    /// Removes this record from its collection. Remaining ids are left
    /// untouched.
    pub fn default_delete(&mut self, engine: &Engine) -> Result<()> {
        let schema = self.schema.clone();
        let (path, id) = match (schema.config_path(), schema.many(), self.id) {
            (Some(path), true, Some(id)) => (path, id),
            (Some(_), true, None) => return Err(id_required(&schema)),
            _ => {
                return Err(Error::server(
                    "MODEL_REQUIRES_CUSTOM_DELETE",
                    format!(
                        "{} has no default delete behaviour; it must provide its own",
                        schema.verbose_name()
                    ),
                ));
            }
        };

        engine.store().with_write_lock(&self.change("Deleted"), |tree| {
            self.ensure_unreferenced(engine)?;
            tree::remove(tree, &tree::join(&[path, &id.to_string()]))
                .map(|_| ())
                .ok_or_else(|| object_not_found(&schema, id))
        })
    }
}
