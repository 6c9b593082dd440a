//! Concrete field types.
//!
//! A [`FieldType`] converts one representation element to and from its
//! stored text. Cardinality, delimiters, null handling and the validation
//! pipeline are handled by [`Field`](crate::Field) and are the same for
//! every type.

use std::{fmt, sync::Arc};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Number, Value as Json};

use crate::{
    engine::Engine,
    error::{Error, Result},
    field::foreign::ForeignModelType,
    registry::ModelRegistry,
    validators::{IntegerRangeValidator, LengthValidator, NumericRangeValidator, Validator},
};

/// Everything a conversion may consult besides the value itself.
pub struct FieldCx<'a> {
    pub field: &'a str,
    pub engine: &'a Engine,
}

/// When a timestamp-like field may stamp itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    Create,
    Update,
}

pub trait FieldType: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &'static str;

    /// Whether a single non-null element has this type's representation
    /// shape.
    fn accepts(&self, value: &Json) -> bool;

    /// Representation element to stored text. `None` means the key is left
    /// out of the stored record.
    fn encode(&self, value: &Json, cx: &FieldCx<'_>) -> Result<Option<String>>;

    /// Stored text to representation element.
    fn decode(&self, raw: &str, cx: &FieldCx<'_>) -> Result<Json>;

    /// Representation for a key missing from the stored record, when the
    /// absence itself carries meaning.
    fn absent(&self) -> Option<Json> {
        None
    }

    /// Validators every field of this type runs before its declared ones.
    fn implicit_validators(&self) -> Vec<Arc<dyn Validator>> {
        Vec::new()
    }

    /// Type-specific checks run after the validators.
    fn check(&self, _value: &Json, _cx: &FieldCx<'_>) -> Result<()> {
        Ok(())
    }

    /// Checks run once when the registry is built.
    fn verify(&self, _field: &str, _owner: &str, _registry: &ModelRegistry) -> Result<()> {
        Ok(())
    }

    fn stamp(&self, _event: Stamp) -> Option<Json> {
        None
    }

    fn as_foreign(&self) -> Option<&ForeignModelType> {
        None
    }
}

pub(crate) fn corrupt(cx: &FieldCx<'_>, type_name: &str, raw: &str) -> Error {
    Error::server(
        "FIELD_INVALID_INTERNAL_VALUE",
        format!(
            "Stored value `{raw}` for field `{}` is not a valid {type_name}",
            cx.field
        ),
    )
}

/// True/false stored as one of two sentinel strings.
///
/// With `indicates_false` set to `None`, false is stored by leaving the key
/// out, and any stored value other than `indicates_true` reads as false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanType {
    pub indicates_true: String,
    pub indicates_false: Option<String>,
}

impl Default for BooleanType {
    fn default() -> Self {
        Self {
            indicates_true: String::new(),
            indicates_false: None,
        }
    }
}

impl BooleanType {
    pub fn new(indicates_true: impl Into<String>, indicates_false: Option<&str>) -> Self {
        Self {
            indicates_true: indicates_true.into(),
            indicates_false: indicates_false.map(str::to_string),
        }
    }
}

impl FieldType for BooleanType {
    fn type_name(&self) -> &'static str {
        "boolean"
    }

    fn accepts(&self, value: &Json) -> bool {
        value.is_boolean()
    }

    fn encode(&self, value: &Json, _cx: &FieldCx<'_>) -> Result<Option<String>> {
        Ok(match value.as_bool() {
            Some(true) => Some(self.indicates_true.clone()),
            _ => self.indicates_false.clone(),
        })
    }

    fn decode(&self, raw: &str, _cx: &FieldCx<'_>) -> Result<Json> {
        Ok(Json::Bool(raw == self.indicates_true))
    }

    fn absent(&self) -> Option<Json> {
        Some(Json::Bool(false))
    }
}

/// Signed integer stored in decimal. Always range-checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerType {
    pub minimum: i64,
    pub maximum: i64,
}

impl IntegerType {
    pub fn new(minimum: i64, maximum: i64) -> Self {
        Self { minimum, maximum }
    }
}

impl FieldType for IntegerType {
    fn type_name(&self) -> &'static str {
        "integer"
    }

    fn accepts(&self, value: &Json) -> bool {
        value.is_i64()
    }

    fn encode(&self, value: &Json, cx: &FieldCx<'_>) -> Result<Option<String>> {
        value
            .as_i64()
            .map(|n| Some(n.to_string()))
            .ok_or_else(|| corrupt(cx, self.type_name(), &value.to_string()))
    }

    fn decode(&self, raw: &str, cx: &FieldCx<'_>) -> Result<Json> {
        raw.trim()
            .parse::<i64>()
            .map(Json::from)
            .map_err(|_| corrupt(cx, self.type_name(), raw))
    }

    fn implicit_validators(&self) -> Vec<Arc<dyn Validator>> {
        vec![Arc::new(IntegerRangeValidator::new(self.minimum, self.maximum))]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FloatType {
    pub range: Option<(f64, f64)>,
}

impl FieldType for FloatType {
    fn type_name(&self) -> &'static str {
        "float"
    }

    fn accepts(&self, value: &Json) -> bool {
        value.is_number()
    }

    fn encode(&self, value: &Json, cx: &FieldCx<'_>) -> Result<Option<String>> {
        value
            .as_f64()
            .map(|n| Some(n.to_string()))
            .ok_or_else(|| corrupt(cx, self.type_name(), &value.to_string()))
    }

    fn decode(&self, raw: &str, cx: &FieldCx<'_>) -> Result<Json> {
        raw.trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Json::Number)
            .ok_or_else(|| corrupt(cx, self.type_name(), raw))
    }

    fn implicit_validators(&self) -> Vec<Arc<dyn Validator>> {
        self.range
            .map(|(min, max)| Arc::new(NumericRangeValidator::new(min, max)) as Arc<dyn Validator>)
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringType {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for StringType {
    fn default() -> Self {
        Self {
            min_length: 0,
            max_length: usize::MAX,
        }
    }
}

impl FieldType for StringType {
    fn type_name(&self) -> &'static str {
        "string"
    }

    fn accepts(&self, value: &Json) -> bool {
        value.is_string()
    }

    fn encode(&self, value: &Json, cx: &FieldCx<'_>) -> Result<Option<String>> {
        value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| corrupt(cx, self.type_name(), &value.to_string()))
    }

    fn decode(&self, raw: &str, _cx: &FieldCx<'_>) -> Result<Json> {
        Ok(Json::String(raw.to_string()))
    }

    fn implicit_validators(&self) -> Vec<Arc<dyn Validator>> {
        if self.min_length == 0 && self.max_length == usize::MAX {
            return Vec::new();
        }
        vec![Arc::new(LengthValidator::new(self.min_length, self.max_length))]
    }
}

pub const DEFAULT_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// UTC timestamp shown as formatted text and stored as Unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTimeType {
    pub format: String,
    pub auto_add_now: bool,
    pub auto_update_now: bool,
}

impl Default for DateTimeType {
    fn default() -> Self {
        Self {
            format: DEFAULT_DATETIME_FORMAT.to_string(),
            auto_add_now: false,
            auto_update_now: false,
        }
    }
}

impl DateTimeType {
    fn now(&self) -> Json {
        Json::String(Utc::now().format(&self.format).to_string())
    }
}

impl FieldType for DateTimeType {
    fn type_name(&self) -> &'static str {
        "datetime"
    }

    fn accepts(&self, value: &Json) -> bool {
        value
            .as_str()
            .is_some_and(|s| NaiveDateTime::parse_from_str(s, &self.format).is_ok())
    }

    fn encode(&self, value: &Json, cx: &FieldCx<'_>) -> Result<Option<String>> {
        value
            .as_str()
            .and_then(|s| NaiveDateTime::parse_from_str(s, &self.format).ok())
            .map(|dt| Some(dt.and_utc().timestamp().to_string()))
            .ok_or_else(|| corrupt(cx, self.type_name(), &value.to_string()))
    }

    fn decode(&self, raw: &str, cx: &FieldCx<'_>) -> Result<Json> {
        raw.trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .map(|dt| Json::String(dt.format(&self.format).to_string()))
            .ok_or_else(|| corrupt(cx, self.type_name(), raw))
    }

    fn stamp(&self, event: Stamp) -> Option<Json> {
        match event {
            Stamp::Create if self.auto_add_now || self.auto_update_now => Some(self.now()),
            Stamp::Update if self.auto_update_now => Some(self.now()),
            _ => None,
        }
    }
}
