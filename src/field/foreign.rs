//! Fields that point at records of another model.
//!
//! Clients reference the target by one of its fields (`model_field`, often a
//! name) while the stored value is another of its fields
//! (`model_field_internal`, often the record id). Conversion in both
//! directions queries the target's stored records.

use serde_json::Value as Json;
use tracing::warn;

use crate::{
    error::{Error, Result},
    field::types::{FieldCx, FieldType},
    registry::ModelRegistry,
    store::tree,
};

/// Pseudo field name addressing a record's id.
pub const ID_FIELD: &str = "id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignModelType {
    pub model_name: String,
    pub model_field: String,
    pub model_field_internal: String,
    /// Values stored verbatim without a matching target record.
    pub allowed_keywords: Vec<String>,
}

impl ForeignModelType {
    pub fn new(model_name: impl Into<String>, model_field: impl Into<String>) -> Self {
        let model_field = model_field.into();
        Self {
            model_name: model_name.into(),
            model_field_internal: model_field.clone(),
            model_field,
            allowed_keywords: Vec::new(),
        }
    }

    pub fn internal(mut self, model_field_internal: impl Into<String>) -> Self {
        self.model_field_internal = model_field_internal.into();
        self
    }

    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.allowed_keywords.push(keyword.into());
        self
    }

    fn is_keyword(&self, value: &Json) -> bool {
        value
            .as_str()
            .is_some_and(|s| self.allowed_keywords.iter().any(|k| k == s))
    }

    fn verify_target_field(&self, field: &str, owner: &str, target: &str, registry: &ModelRegistry) -> Result<()> {
        let schema = registry.schema(&self.model_name).ok_or_else(|| {
            Error::server(
                "FOREIGN_MODEL_FIELD_WITH_UNKNOWN_MODEL",
                format!(
                    "Field `{owner}.{field}` references unknown model `{}`",
                    self.model_name
                ),
            )
        })?;

        if target == ID_FIELD {
            if !schema.many() {
                return Err(Error::server(
                    "FOREIGN_MODEL_FIELD_ID_REQUIRES_MANY_MODEL",
                    format!(
                        "Field `{owner}.{field}` references ids of `{}`, which is not a many model",
                        self.model_name
                    ),
                ));
            }
            return Ok(());
        }

        let spec = schema.field_spec(target).ok_or_else(|| {
            Error::server(
                "FOREIGN_MODEL_FIELD_WITH_UNKNOWN_FIELD",
                format!(
                    "Field `{owner}.{field}` references unknown field `{}.{target}`",
                    self.model_name
                ),
            )
        })?;

        if !spec.unique {
            return Err(Error::server(
                "FOREIGN_MODEL_FIELD_REFERENCES_NON_UNIQUE_FIELD",
                format!(
                    "Field `{owner}.{field}` references `{}.{target}`, which is not unique",
                    self.model_name
                ),
            ));
        }

        Ok(())
    }
}

impl FieldType for ForeignModelType {
    fn type_name(&self) -> &'static str {
        "foreign model"
    }

    fn accepts(&self, value: &Json) -> bool {
        value.is_string() || value.is_number()
    }

    fn encode(&self, value: &Json, cx: &FieldCx<'_>) -> Result<Option<String>> {
        let raw = match value {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        };
        if self.is_keyword(value) {
            return Ok(Some(raw));
        }

        let found = cx
            .engine
            .find_by_representation(&self.model_name, &self.model_field, value)?;
        let Some((id, record)) = found else {
            warn!(
                field = cx.field,
                model = %self.model_name,
                value = %raw,
                "foreign reference did not resolve; storing raw value"
            );
            return Ok(Some(raw));
        };

        if self.model_field_internal == ID_FIELD {
            return Ok(Some(id.map(|id| id.to_string()).unwrap_or(raw)));
        }

        let schema = cx.engine.schema(&self.model_name)?;
        let path = schema.internal_path(&self.model_field_internal)?;
        Ok(Some(
            tree::get(&record, &path)
                .and_then(tree::scalar_text)
                .unwrap_or(raw),
        ))
    }

    fn decode(&self, raw: &str, cx: &FieldCx<'_>) -> Result<Json> {
        if self.allowed_keywords.iter().any(|k| k == raw) {
            return Ok(Json::String(raw.to_string()));
        }

        let found = cx
            .engine
            .find_by_internal(&self.model_name, &self.model_field_internal, raw)?;
        let Some((id, record)) = found else {
            warn!(
                field = cx.field,
                model = %self.model_name,
                value = raw,
                "stored foreign reference did not resolve; returning raw value"
            );
            return Ok(Json::String(raw.to_string()));
        };

        if self.model_field == ID_FIELD {
            return Ok(id.map(Json::from).unwrap_or(Json::Null));
        }

        cx.engine
            .decode_record_field(&self.model_name, &self.model_field, &record)
    }

    fn check(&self, value: &Json, cx: &FieldCx<'_>) -> Result<()> {
        if self.is_keyword(value) {
            return Ok(());
        }

        let found = cx
            .engine
            .find_by_representation(&self.model_name, &self.model_field, value)?;
        if found.is_none() {
            return Err(Error::not_found(
                "FOREIGN_MODEL_FIELD_VALUE_NOT_FOUND",
                format!(
                    "Field `{}` could not locate a `{}` object with `{}` set to `{value}`",
                    cx.field, self.model_name, self.model_field
                ),
            ));
        }

        Ok(())
    }

    fn verify(&self, field: &str, owner: &str, registry: &ModelRegistry) -> Result<()> {
        self.verify_target_field(field, owner, &self.model_field, registry)?;
        self.verify_target_field(field, owner, &self.model_field_internal, registry)
    }

    fn as_foreign(&self) -> Option<&ForeignModelType> {
        Some(self)
    }
}
