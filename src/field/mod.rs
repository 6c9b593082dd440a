//! Typed, self-describing units of model data.
//!
//! A [`FieldSpec`] is the immutable declaration shared by every record of a
//! model; a [`Field`] is one record's slot holding the current
//! representation value. Declarations are built with [`FieldSpecBuilder`]:
//!
//! ```rust
//! use config_model::FieldSpec;
//!
//! let spec = FieldSpec::string()
//!     .required(true)
//!     .unique(true)
//!     .help_text("Name used to reference this gateway")
//!     .build()
//!     .unwrap();
//! assert!(spec.unique);
//! ```

pub mod foreign;
pub mod types;

use std::sync::Arc;

use derive_builder::Builder;
use serde_json::Value as Json;
use serde_value::Value;

use crate::{
    engine::Engine,
    error::{Error, Result},
    model::Model,
    store::tree,
    validators::Validator,
};
use foreign::ForeignModelType;
use types::{
    BooleanType, DateTimeType, FieldCx, FieldType, FloatType, IntegerType, StringType,
};

/// One allowed value of a closed enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub value: Json,
    pub label: String,
}

fn display(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", build_fn(validate = "Self::validate"))]
pub struct FieldSpec {
    #[builder(setter(custom))]
    pub kind: Arc<dyn FieldType>,

    /// Storage key; defaults to the field's name.
    #[builder(default, setter(into, strip_option))]
    pub internal_name: Option<String>,

    /// Path inside the record under which the value is stored.
    #[builder(default, setter(into, strip_option))]
    pub internal_namespace: Option<String>,

    #[builder(default, setter(custom))]
    pub default: Option<Json>,

    #[builder(default)]
    pub required: bool,
    #[builder(default)]
    pub unique: bool,
    #[builder(default)]
    pub allow_null: bool,
    #[builder(default = "true")]
    pub allow_empty: bool,
    #[builder(default)]
    pub read_only: bool,
    #[builder(default)]
    pub write_only: bool,
    #[builder(default)]
    pub representation_only: bool,

    #[builder(default)]
    pub many: bool,
    #[builder(default)]
    pub many_minimum: usize,
    #[builder(default = "usize::MAX")]
    pub many_maximum: usize,
    /// Joins many values into one stored string; `None` stores a native
    /// sequence.
    #[builder(default = "Some(\",\".to_string())", setter(custom))]
    pub delimiter: Option<String>,

    /// Sibling field name and the value it must hold for this field to take
    /// part. An array value means any of its elements.
    #[builder(default, setter(custom))]
    pub conditions: Vec<(String, Json)>,

    #[builder(default, setter(custom))]
    pub choices: Vec<Choice>,

    #[builder(default, setter(custom))]
    pub validators: Vec<Arc<dyn Validator>>,

    /// `(model, field)` pairs whose stored values point at this field.
    #[builder(default, setter(custom))]
    pub referenced_by: Vec<(String, String)>,

    #[builder(default, setter(into, strip_option))]
    pub verbose_name: Option<String>,

    #[builder(default, setter(into))]
    pub help_text: String,
}

impl FieldSpec {
    pub fn typed(kind: impl FieldType + 'static) -> FieldSpecBuilder {
        <FieldSpecBuilder as Default>::default().kind(kind)
    }

    /// Boolean stored as `indicates_true`, with false stored by omission.
    /// Defaults to false.
    pub fn boolean(indicates_true: &str) -> FieldSpecBuilder {
        Self::typed(BooleanType::new(indicates_true, None)).default_value(false)
    }

    pub fn boolean_with(indicates_true: &str, indicates_false: &str) -> FieldSpecBuilder {
        Self::typed(BooleanType::new(indicates_true, Some(indicates_false))).default_value(false)
    }

    pub fn integer(minimum: i64, maximum: i64) -> FieldSpecBuilder {
        Self::typed(IntegerType::new(minimum, maximum))
    }

    pub fn float() -> FieldSpecBuilder {
        Self::typed(FloatType::default())
    }

    pub fn string() -> FieldSpecBuilder {
        Self::typed(StringType::default())
    }

    pub fn string_length(min_length: usize, max_length: usize) -> FieldSpecBuilder {
        Self::typed(StringType {
            min_length,
            max_length,
        })
    }

    pub fn datetime() -> FieldSpecBuilder {
        Self::typed(DateTimeType::default())
    }

    /// Reference to `model_name` records by their `model_field`, storing the
    /// same field. Use [`ForeignModelType::internal`] through
    /// [`FieldSpec::typed`] to store a different one.
    pub fn foreign(model_name: &str, model_field: &str) -> FieldSpecBuilder {
        Self::typed(ForeignModelType::new(model_name, model_field))
    }

    /// Choice values paired with their labels.
    pub fn choices_verbose(&self) -> Vec<(Json, String)> {
        self.choices
            .iter()
            .map(|c| (c.value.clone(), c.label.clone()))
            .collect()
    }

    /// Type validators followed by declared ones, in run order.
    pub fn all_validators(&self) -> Vec<Arc<dyn Validator>> {
        let mut validators = self.kind.implicit_validators();
        validators.extend(self.validators.iter().cloned());
        validators
    }
}

impl FieldSpecBuilder {
    pub fn kind(mut self, kind: impl FieldType + 'static) -> Self {
        self.kind = Some(Arc::new(kind));
        self
    }

    pub fn default_value(mut self, value: impl Into<Json>) -> Self {
        self.default = Some(Some(value.into()));
        self
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(Some(delimiter.into()));
        self
    }

    /// Store many values as a sequence instead of a joined string.
    pub fn native_array(mut self) -> Self {
        self.delimiter = Some(None);
        self
    }

    pub fn condition(mut self, field: impl Into<String>, value: impl Into<Json>) -> Self {
        self.conditions
            .get_or_insert_with(Vec::new)
            .push((field.into(), value.into()));
        self
    }

    pub fn choices<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Json>,
    {
        let choices = self.choices.get_or_insert_with(Vec::new);
        for value in values {
            let value = value.into();
            choices.push(Choice {
                label: display(&value),
                value,
            });
        }
        self
    }

    pub fn verbose_choices<I, V, L>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (V, L)>,
        V: Into<Json>,
        L: Into<String>,
    {
        let choices = self.choices.get_or_insert_with(Vec::new);
        for (value, label) in values {
            choices.push(Choice {
                value: value.into(),
                label: label.into(),
            });
        }
        self
    }

    pub fn validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators
            .get_or_insert_with(Vec::new)
            .push(Arc::new(validator));
        self
    }

    pub fn referenced_by(mut self, model: impl Into<String>, field: impl Into<String>) -> Self {
        self.referenced_by
            .get_or_insert_with(Vec::new)
            .push((model.into(), field.into()));
        self
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let required = self.required.unwrap_or(false);
        let read_only = self.read_only.unwrap_or(false);
        let allow_null = self.allow_null.unwrap_or(false);
        let many = self.many.unwrap_or(false);
        let default = self.default.clone().flatten();

        if required && default.is_some() {
            return Err("required fields cannot declare a default".to_string());
        }
        if !required && !read_only && !allow_null && default.is_none() {
            return Err(
                "optional fields must declare a default or allow null".to_string(),
            );
        }
        if required && read_only {
            return Err("read-only fields cannot be required".to_string());
        }
        if self.write_only.unwrap_or(false) && read_only {
            return Err("fields cannot be both read-only and write-only".to_string());
        }

        let minimum = self.many_minimum.unwrap_or(0);
        let maximum = self.many_maximum.unwrap_or(usize::MAX);
        if minimum > maximum {
            return Err(format!(
                "many_minimum ({minimum}) exceeds many_maximum ({maximum})"
            ));
        }
        if many && matches!(&self.delimiter, Some(Some(d)) if d.is_empty()) {
            return Err("many fields cannot use an empty delimiter".to_string());
        }

        if let (Some(default), Some(choices)) = (&default, &self.choices) {
            let values: Vec<&Json> = match default {
                Json::Array(items) if many => items.iter().collect(),
                Json::Null => Vec::new(),
                single => vec![single],
            };
            if let Some(bad) = values
                .into_iter()
                .find(|v| !choices.iter().any(|c| &c.value == *v))
            {
                return Err(format!("default `{bad}` is not one of the field's choices"));
            }
        }

        Ok(())
    }
}

impl From<FieldSpecBuilderError> for Error {
    fn from(err: FieldSpecBuilderError) -> Self {
        Error::server("FIELD_INVALID_DEFINITION", err.to_string())
    }
}

/// One record's value for a declared field.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    spec: Arc<FieldSpec>,
    value: Json,
}

fn is_empty(value: &Json) -> bool {
    match value {
        Json::String(s) => s.is_empty(),
        Json::Array(items) => items.is_empty(),
        _ => false,
    }
}

impl Field {
    /// A field holding its declared default.
    pub fn new(name: impl Into<String>, spec: Arc<FieldSpec>) -> Self {
        let value = spec.default.clone().unwrap_or(Json::Null);
        Self {
            name: name.into(),
            spec,
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    pub fn value(&self) -> &Json {
        &self.value
    }

    pub fn set_value(&mut self, value: impl Into<Json>) {
        self.value = value.into();
    }

    pub fn reset(&mut self) {
        self.value = self.spec.default.clone().unwrap_or(Json::Null);
    }

    pub fn internal_name(&self) -> &str {
        self.spec.internal_name.as_deref().unwrap_or(&self.name)
    }

    /// Location of the stored value relative to its record.
    pub fn internal_path(&self) -> String {
        tree::join(&[
            self.spec.internal_namespace.as_deref().unwrap_or(""),
            self.internal_name(),
        ])
    }

    pub fn verbose_name(&self) -> String {
        self.spec
            .verbose_name
            .clone()
            .unwrap_or_else(|| self.name.replace('_', " "))
    }

    /// Whether every condition holds against the owner's sibling values.
    pub fn conditions_met(&self, owner: &Model) -> bool {
        self.spec.conditions.iter().all(|(sibling, expected)| {
            let actual = owner.get(sibling).unwrap_or(&Json::Null);
            match expected {
                Json::Array(options) => options.contains(actual),
                expected => expected == actual,
            }
        })
    }

    fn cx<'a>(&'a self, engine: &'a Engine) -> FieldCx<'a> {
        FieldCx {
            field: &self.name,
            engine,
        }
    }

    fn encode_element(&self, value: &Json, cx: &FieldCx<'_>) -> Result<Option<String>> {
        if !self.spec.kind.accepts(value) {
            return Err(Error::server(
                "FIELD_CANNOT_ENCODE_VALUE",
                format!(
                    "Field `{}` cannot store `{value}` as a {}",
                    self.name,
                    self.spec.kind.type_name()
                ),
            ));
        }
        self.spec.kind.encode(value, cx)
    }

    /// Current value in stored form. `None` leaves the key out.
    pub fn to_internal(&self, engine: &Engine) -> Result<Option<Value>> {
        let cx = self.cx(engine);

        if self.value.is_null() {
            return Ok(None);
        }
        if !self.spec.many {
            return Ok(self.encode_element(&self.value, &cx)?.map(Value::String));
        }

        let Json::Array(items) = &self.value else {
            return Err(Error::server(
                "FIELD_CANNOT_ENCODE_VALUE",
                format!("Field `{}` holds many values but is not an array", self.name),
            ));
        };

        let mut encoded = Vec::with_capacity(items.len());
        for item in items {
            if let Some(text) = self.encode_element(item, &cx)? {
                encoded.push(text);
            }
        }

        Ok(Some(match &self.spec.delimiter {
            Some(delimiter) => Value::String(encoded.join(delimiter)),
            None => Value::Seq(encoded.into_iter().map(Value::String).collect()),
        }))
    }

    fn decode_text(&self, raw: &Value, cx: &FieldCx<'_>) -> Result<Json> {
        let text = tree::scalar_text(raw).ok_or_else(|| {
            Error::server(
                "FIELD_INVALID_INTERNAL_VALUE",
                format!("Stored value for field `{}` is not a scalar", self.name),
            )
        })?;
        self.spec.kind.decode(&text, cx)
    }

    /// Representation of a stored value; `raw` is `None` when the key is
    /// missing from the record.
    pub fn decode_internal(&self, raw: Option<&Value>, engine: &Engine) -> Result<Json> {
        let cx = self.cx(engine);

        let Some(raw) = raw else {
            return Ok(self
                .spec
                .kind
                .absent()
                .or_else(|| self.spec.default.clone())
                .unwrap_or(Json::Null));
        };

        if !self.spec.many {
            return self.decode_text(raw, &cx);
        }

        let items = match raw {
            Value::Seq(items) => items
                .iter()
                .map(|item| self.decode_text(item, &cx))
                .collect::<Result<Vec<_>>>()?,
            scalar => {
                let text = tree::scalar_text(scalar).ok_or_else(|| {
                    Error::server(
                        "FIELD_INVALID_INTERNAL_VALUE",
                        format!("Stored value for field `{}` is not a list", self.name),
                    )
                })?;
                if text.is_empty() {
                    Vec::new()
                } else {
                    let parts: Vec<&str> = match &self.spec.delimiter {
                        Some(delimiter) => text.split(delimiter.as_str()).collect(),
                        None => vec![text.as_str()],
                    };
                    parts
                        .into_iter()
                        .map(|part| self.spec.kind.decode(part, &cx))
                        .collect::<Result<Vec<_>>>()?
                }
            }
        };

        Ok(Json::Array(items))
    }

    /// Loads the value from stored form.
    pub fn from_internal(&mut self, raw: Option<&Value>, engine: &Engine) -> Result<()> {
        self.value = self.decode_internal(raw, engine)?;
        Ok(())
    }

    /// Locates this field's stored value inside a record.
    pub fn locate<'a>(&self, record: &'a Value) -> Option<&'a Value> {
        tree::get(record, &self.internal_path())
    }

    fn fail(&self, response_id: &str, message: String) -> Error {
        Error::validation(response_id, Some(&self.name), message)
    }

    /// Runs the validation pipeline against the owning model.
    ///
    /// `siblings` are the stored records of the same model the uniqueness
    /// check compares against, the owner's own record excluded.
    pub fn validate(&self, owner: &Model, siblings: &[(Option<usize>, Value)], engine: &Engine) -> Result<()> {
        if !self.conditions_met(owner) {
            return Ok(());
        }

        let spec = &self.spec;
        let name = &self.name;

        if self.value.is_null() {
            if spec.required {
                return Err(self.fail(
                    "FIELD_REQUIRED",
                    format!("Field `{name}` is required"),
                ));
            }
            if spec.allow_null || spec.read_only {
                return Ok(());
            }
            return Err(self.fail(
                "FIELD_NULL_NOT_ALLOWED",
                format!("Field `{name}` cannot be null"),
            ));
        }

        if !spec.allow_empty && is_empty(&self.value) {
            return Err(self.fail(
                "FIELD_EMPTY_NOT_ALLOWED",
                format!("Field `{name}` cannot be empty"),
            ));
        }

        let elements: Vec<&Json> = if spec.many {
            let Json::Array(items) = &self.value else {
                return Err(self.fail(
                    "FIELD_INVALID_TYPE",
                    format!("Field `{name}` must be a list of values"),
                ));
            };
            if items.len() < spec.many_minimum {
                return Err(self.fail(
                    "FIELD_MANY_MINIMUM_CONSTRAINT",
                    format!("Field `{name}` requires at least {} values", spec.many_minimum),
                ));
            }
            if items.len() > spec.many_maximum {
                return Err(self.fail(
                    "FIELD_MANY_MAXIMUM_CONSTRAINT",
                    format!("Field `{name}` allows at most {} values", spec.many_maximum),
                ));
            }
            items.iter().collect()
        } else {
            vec![&self.value]
        };

        for element in &elements {
            if !spec.kind.accepts(element) {
                return Err(self.fail(
                    "FIELD_INVALID_TYPE",
                    format!(
                        "Field `{name}` must be of type {}, received `{element}`",
                        spec.kind.type_name()
                    ),
                ));
            }
            if let (true, Some(delimiter), Some(text)) = (spec.many, &spec.delimiter, element.as_str()) {
                if text.contains(delimiter.as_str()) {
                    return Err(self.fail(
                        "FIELD_VALUE_CONTAINS_DELIMITER",
                        format!("Field `{name}` values cannot contain `{delimiter}`"),
                    ));
                }
                // a lone empty element would be stored the same as an empty list
                if text.is_empty() {
                    return Err(self.fail(
                        "FIELD_VALUE_EMPTY_IN_LIST",
                        format!("Field `{name}` values cannot be empty"),
                    ));
                }
            }
        }

        if !spec.choices.is_empty() {
            if let Some(bad) = elements
                .iter()
                .find(|e| !spec.choices.iter().any(|c| &c.value == **e))
            {
                let options: Vec<String> = spec.choices.iter().map(|c| display(&c.value)).collect();
                return Err(self.fail(
                    "FIELD_INVALID_CHOICE",
                    format!(
                        "Field `{name}` must be one of [{}], received `{bad}`",
                        options.join(", ")
                    ),
                ));
            }
        }

        let validators = spec.all_validators();
        for element in &elements {
            for validator in &validators {
                validator.validate(element, name)?;
            }
        }

        let cx = self.cx(engine);
        for element in &elements {
            spec.kind.check(element, &cx)?;
        }

        if spec.unique {
            if let Some(mine) = self.to_internal(engine)? {
                if let Some((id, _)) = siblings
                    .iter()
                    .find(|(_, record)| self.locate(record) == Some(&mine))
                {
                    return Err(self.fail(
                        "FIELD_NOT_UNIQUE",
                        format!(
                            "Field `{name}` must be unique; `{}` is already used by object {}",
                            self.value,
                            id.map(|id| id.to_string()).unwrap_or_default()
                        ),
                    ));
                }
            }
        }

        Ok(())
    }
}
