use std::{cmp::Ordering, fmt, str::FromStr};

use serde_json::Value as Json;

use crate::{
    error::{Error, Result},
    field::foreign::ID_FIELD,
    model::{
        Model,
        schema::{SortOrder, SortPolicy},
    },
};

/// How a [`Filter`] compares a record's value against the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lookup {
    #[default]
    Exact,
    Contains,
    StartsWith,
    EndsWith,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl Lookup {
    pub fn as_str(self) -> &'static str {
        match self {
            Lookup::Exact => "exact",
            Lookup::Contains => "contains",
            Lookup::StartsWith => "startswith",
            Lookup::EndsWith => "endswith",
            Lookup::LessThan => "lt",
            Lookup::LessThanOrEqual => "lte",
            Lookup::GreaterThan => "gt",
            Lookup::GreaterThanOrEqual => "gte",
        }
    }
}

impl FromStr for Lookup {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "exact" => Lookup::Exact,
            "contains" => Lookup::Contains,
            "startswith" => Lookup::StartsWith,
            "endswith" => Lookup::EndsWith,
            "lt" => Lookup::LessThan,
            "lte" => Lookup::LessThanOrEqual,
            "gt" => Lookup::GreaterThan,
            "gte" => Lookup::GreaterThanOrEqual,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One query term, written `field` or `field__lookup`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub lookup: Lookup,
    pub value: Json,
}

impl Filter {
    pub fn new(field: impl Into<String>, lookup: Lookup, value: impl Into<Json>) -> Self {
        Self {
            field: field.into(),
            lookup,
            value: value.into(),
        }
    }

    /// Splits `name__lookup`; a suffix that is not a known lookup stays part
    /// of the field name.
    pub fn parse(term: &str, value: impl Into<Json>) -> Result<Self> {
        let (field, lookup) = match term.rsplit_once("__") {
            Some((field, suffix)) => match suffix.parse::<Lookup>() {
                Ok(lookup) => (field, lookup),
                Err(()) => (term, Lookup::Exact),
            },
            None => (term, Lookup::Exact),
        };

        if field.is_empty() {
            return Err(Error::validation(
                "MODEL_QUERY_INVALID_FILTER",
                None,
                format!("Query term `{term}` does not name a field"),
            ));
        }

        Ok(Self::new(field, lookup, value))
    }

    fn actual(&self, model: &Model) -> Option<Json> {
        if self.field == ID_FIELD {
            return Some(model.id().map(Json::from).unwrap_or(Json::Null));
        }
        model.get(&self.field).cloned()
    }

    pub fn matches(&self, model: &Model) -> bool {
        let Some(actual) = self.actual(model) else {
            return false;
        };

        if let Json::Array(items) = &actual {
            return match self.lookup {
                Lookup::Exact | Lookup::Contains => items.iter().any(|i| loose_eq(i, &self.value)),
                _ => items.iter().any(|i| self.compare_scalar(i)),
            };
        }

        self.compare_scalar(&actual)
    }

    fn compare_scalar(&self, actual: &Json) -> bool {
        let expected = &self.value;
        match self.lookup {
            Lookup::Exact => loose_eq(actual, expected),
            Lookup::Contains => text_pair(actual, expected).is_some_and(|(a, e)| a.contains(&e)),
            Lookup::StartsWith => text_pair(actual, expected).is_some_and(|(a, e)| a.starts_with(&e)),
            Lookup::EndsWith => text_pair(actual, expected).is_some_and(|(a, e)| a.ends_with(&e)),
            Lookup::LessThan => number_cmp(actual, expected) == Some(Ordering::Less),
            Lookup::LessThanOrEqual => {
                matches!(number_cmp(actual, expected), Some(Ordering::Less | Ordering::Equal))
            }
            Lookup::GreaterThan => number_cmp(actual, expected) == Some(Ordering::Greater),
            Lookup::GreaterThanOrEqual => {
                matches!(number_cmp(actual, expected), Some(Ordering::Greater | Ordering::Equal))
            }
        }
    }
}

fn scalar_text(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text_pair(actual: &Json, expected: &Json) -> Option<(String, String)> {
    Some((scalar_text(actual)?, scalar_text(expected)?))
}

fn as_number(value: &Json) -> Option<f64> {
    match value {
        Json::Number(n) => n.as_f64(),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number_cmp(actual: &Json, expected: &Json) -> Option<Ordering> {
    as_number(actual)?.partial_cmp(&as_number(expected)?)
}

/// Equality that treats `1` and `"1"` alike.
pub(crate) fn loose_eq(actual: &Json, expected: &Json) -> bool {
    actual == expected
        || match (as_number(actual), as_number(expected)) {
            (Some(a), Some(e)) => a == e,
            _ => text_pair(actual, expected).is_some_and(|(a, e)| a == e),
        }
}

fn rank(value: &Json) -> u8 {
    match value {
        Json::Null => 0,
        Json::Bool(_) => 1,
        Json::Number(_) => 2,
        Json::String(_) => 3,
        Json::Array(_) => 4,
        Json::Object(_) => 5,
    }
}

/// Total order over representation values used for sorting.
pub fn compare_values(a: &Json, b: &Json) -> Ordering {
    match (a, b) {
        (Json::Bool(a), Json::Bool(b)) => a.cmp(b),
        (Json::Number(a), Json::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Json::String(a), Json::String(b)) => a.cmp(b),
        (Json::Array(a), Json::Array(b)) => a
            .iter()
            .zip(b)
            .map(|(a, b)| compare_values(a, b))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// An ordered collection of records of one model.
#[derive(Debug, Clone, Default)]
pub struct ModelSet {
    models: Vec<Model>,
}

impl ModelSet {
    pub fn new(models: Vec<Model>) -> Self {
        Self { models }
    }

    pub fn exists(&self) -> bool {
        !self.models.is_empty()
    }

    pub fn count(&self) -> usize {
        self.models.len()
    }

    pub fn first(&self) -> Option<&Model> {
        self.models.first()
    }

    pub fn get(&self, index: usize) -> Option<&Model> {
        self.models.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Model> {
        self.models.iter()
    }

    /// Records matching every filter.
    pub fn filter(&self, filters: &[Filter]) -> ModelSet {
        self.models
            .iter()
            .filter(|m| filters.iter().all(|f| f.matches(m)))
            .cloned()
            .collect()
    }

    /// Stable sort; records compare field by field in `policy.by` order.
    pub fn sort(&mut self, policy: &SortPolicy) {
        self.models.sort_by(|a, b| {
            let ordering = policy
                .by
                .iter()
                .map(|field| {
                    let null = Json::Null;
                    compare_values(a.get(field).unwrap_or(&null), b.get(field).unwrap_or(&null))
                })
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal);
            match policy.order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });
    }

    pub fn to_representation(&self) -> Json {
        Json::Array(self.models.iter().map(Model::to_representation).collect())
    }

    pub fn into_vec(self) -> Vec<Model> {
        self.models
    }
}

impl FromIterator<Model> for ModelSet {
    fn from_iter<I: IntoIterator<Item = Model>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for ModelSet {
    type Item = Model;
    type IntoIter = std::vec::IntoIter<Model>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.into_iter()
    }
}

impl<'a> IntoIterator for &'a ModelSet {
    type Item = &'a Model;
    type IntoIter = std::slice::Iter<'a, Model>;

    fn into_iter(self) -> Self::IntoIter {
        self.models.iter()
    }
}
