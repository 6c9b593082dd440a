use std::{collections::BTreeSet, fmt, sync::Arc};

use serde_value::Value;

use crate::{
    error::{Error, Result},
    field::{FieldSpec, FieldSpecBuilder, foreign::ID_FIELD},
    model::hooks::{DefaultHooks, ModelHooks},
    store::{ConfigStore, tree},
};

/// Produces a model's stored data when it does not live at a config path.
pub type InternalCallable = Arc<dyn Fn(&ConfigStore) -> Result<Value> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Ordering applied when listing many records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortPolicy {
    pub by: Vec<String>,
    pub order: SortOrder,
}

/// Splits a CamelCase type name into words, keeping acronyms together:
/// `DNSResolverHost` becomes `DNS Resolver Host`.
pub fn split_camel_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut words = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_uppercase() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_lower) {
                words.push(' ');
            }
        }
        words.push(c);
    }

    words
}

/// Static description of a model: where it is stored and which fields it
/// has, in declaration order.
pub struct Schema {
    name: String,
    verbose_name: String,
    verbose_name_plural: String,
    config_path: Option<String>,
    internal_callable: Option<InternalCallable>,
    many: bool,
    sort: Option<SortPolicy>,
    unique_together: Vec<String>,
    subsystem: Option<String>,
    packages: Vec<String>,
    package_includes: Vec<String>,
    fields: Vec<(String, Arc<FieldSpec>)>,
    hooks: Arc<dyn ModelHooks>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("config_path", &self.config_path)
            .field("many", &self.many)
            .field(
                "fields",
                &self.fields.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn verbose_name(&self) -> &str {
        &self.verbose_name
    }

    pub fn verbose_name_plural(&self) -> &str {
        &self.verbose_name_plural
    }

    pub fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }

    pub fn internal_callable(&self) -> Option<&InternalCallable> {
        self.internal_callable.as_ref()
    }

    pub fn many(&self) -> bool {
        self.many
    }

    pub fn sort(&self) -> Option<&SortPolicy> {
        self.sort.as_ref()
    }

    pub fn unique_together(&self) -> &[String] {
        &self.unique_together
    }

    pub fn subsystem(&self) -> Option<&str> {
        self.subsystem.as_deref()
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn package_includes(&self) -> &[String] {
        &self.package_includes
    }

    pub fn fields(&self) -> &[(String, Arc<FieldSpec>)] {
        &self.fields
    }

    pub fn field_spec(&self, name: &str) -> Option<&Arc<FieldSpec>> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, spec)| spec)
    }

    pub fn hooks(&self) -> &Arc<dyn ModelHooks> {
        &self.hooks
    }

    /// Where a field's value sits inside one stored record.
    pub fn internal_path(&self, field: &str) -> Result<String> {
        let spec = self.field_spec(field).ok_or_else(|| {
            Error::server(
                "MODEL_FIELD_NOT_FOUND",
                format!("Model `{}` has no field `{field}`", self.name),
            )
        })?;
        Ok(tree::join(&[
            spec.internal_namespace.as_deref().unwrap_or(""),
            spec.internal_name.as_deref().unwrap_or(field),
        ]))
    }

    /// Whether the default create/delete behaviour applies.
    pub fn has_default_storage(&self) -> bool {
        self.many && self.config_path.is_some()
    }
}

/// Declares a [`Schema`].
///
/// ```rust
/// use config_model::{FieldSpec, Schema};
///
/// let schema = Schema::builder("StaticRoute")
///     .config_path("staticroutes/route")
///     .many()
///     .field("network", FieldSpec::string().required(true).unique(true))
///     .field("descr", FieldSpec::string().default_value(""))
///     .build()
///     .unwrap();
///
/// assert_eq!(schema.verbose_name(), "Static Route");
/// ```
pub struct SchemaBuilder {
    name: String,
    verbose_name: Option<String>,
    verbose_name_plural: Option<String>,
    config_path: Option<String>,
    internal_callable: Option<InternalCallable>,
    many: bool,
    sort: Option<SortPolicy>,
    unique_together: Vec<String>,
    subsystem: Option<String>,
    packages: Vec<String>,
    package_includes: Vec<String>,
    fields: Vec<(String, Result<FieldSpec>)>,
    hooks: Arc<dyn ModelHooks>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verbose_name: None,
            verbose_name_plural: None,
            config_path: None,
            internal_callable: None,
            many: false,
            sort: None,
            unique_together: Vec::new(),
            subsystem: None,
            packages: Vec::new(),
            package_includes: Vec::new(),
            fields: Vec::new(),
            hooks: Arc::new(DefaultHooks),
        }
    }

    pub fn verbose_name(mut self, name: impl Into<String>) -> Self {
        self.verbose_name = Some(name.into());
        self
    }

    pub fn verbose_name_plural(mut self, name: impl Into<String>) -> Self {
        self.verbose_name_plural = Some(name.into());
        self
    }

    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn internal_callable<F>(mut self, callable: F) -> Self
    where
        F: Fn(&ConfigStore) -> Result<Value> + Send + Sync + 'static,
    {
        self.internal_callable = Some(Arc::new(callable));
        self
    }

    pub fn many(mut self) -> Self {
        self.many = true;
        self
    }

    pub fn sort_by<I, S>(mut self, fields: I, order: SortOrder) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sort = Some(SortPolicy {
            by: fields.into_iter().map(Into::into).collect(),
            order,
        });
        self
    }

    pub fn unique_together<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_together = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.packages.push(package.into());
        self
    }

    pub fn package_include(mut self, include: impl Into<String>) -> Self {
        self.package_includes.push(include.into());
        self
    }

    pub fn hooks(mut self, hooks: impl ModelHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Appends a field. Declaration order is validation and serialization
    /// order.
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpecBuilder) -> Self {
        self.fields
            .push((name.into(), spec.build().map_err(Error::from)));
        self
    }

    fn invalid(&self, message: String) -> Error {
        Error::server("MODEL_INVALID_DEFINITION", format!("Model `{}`: {message}", self.name))
    }

    pub fn build(self) -> Result<Schema> {
        if self.config_path.is_some() && self.internal_callable.is_some() {
            return Err(Error::server(
                "MODEL_WITH_CONFLICTING_STORAGE",
                format!(
                    "Model `{}` cannot declare both a config path and an internal callable",
                    self.name
                ),
            ));
        }

        let mut names = BTreeSet::new();
        for (name, _) in &self.fields {
            if self.many && name == ID_FIELD {
                return Err(self.invalid(format!("field name `{ID_FIELD}` is reserved")));
            }
            if !names.insert(name.clone()) {
                return Err(self.invalid(format!("field `{name}` is declared twice")));
            }
        }

        for grouped in &self.unique_together {
            if !names.contains(grouped.as_str()) {
                return Err(self.invalid(format!("unique_together names unknown field `{grouped}`")));
            }
        }
        if let Some(sort) = &self.sort {
            if let Some(unknown) = sort
                .by
                .iter()
                .find(|f| !names.contains(f.as_str()) && f.as_str() != ID_FIELD)
            {
                return Err(self.invalid(format!("sort policy names unknown field `{unknown}`")));
            }
        }

        let mut fields = Vec::with_capacity(self.fields.len());
        for (name, spec) in self.fields {
            let spec = spec.map_err(|err| {
                Error::server(
                    "FIELD_INVALID_DEFINITION",
                    format!("Model `{}` field `{name}`: {err}", self.name),
                )
            })?;
            if let Some((sibling, _)) = spec
                .conditions
                .iter()
                .find(|(sibling, _)| !names.contains(sibling.as_str()))
            {
                return Err(Error::server(
                    "MODEL_INVALID_DEFINITION",
                    format!(
                        "Model `{}`: field `{name}` is conditioned on unknown field `{sibling}`",
                        self.name
                    ),
                ));
            }
            fields.push((name, Arc::new(spec)));
        }

        let verbose_name = self
            .verbose_name
            .unwrap_or_else(|| split_camel_case(&self.name));
        let verbose_name_plural = self
            .verbose_name_plural
            .unwrap_or_else(|| format!("{verbose_name}s"));

        Ok(Schema {
            name: self.name,
            verbose_name,
            verbose_name_plural,
            config_path: self.config_path,
            internal_callable: self.internal_callable,
            many: self.many,
            sort: self.sort,
            unique_together: self.unique_together,
            subsystem: self.subsystem,
            packages: self.packages,
            package_includes: self.package_includes,
            fields,
            hooks: self.hooks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_camel_case() {
        assert_eq!(split_camel_case("StaticRoute"), "Static Route");
        assert_eq!(split_camel_case("DNSResolverHostOverride"), "DNS Resolver Host Override");
        assert_eq!(split_camel_case("RESTAPISettings"), "RESTAPI Settings");
        assert_eq!(split_camel_case("Gateway"), "Gateway");
    }

    #[test]
    fn test_conflicting_storage_is_rejected() {
        let err = Schema::builder("Broken")
            .config_path("a/b")
            .internal_callable(|_| Ok(tree::empty()))
            .build()
            .unwrap_err();
        assert_eq!(err.response_id(), "MODEL_WITH_CONFLICTING_STORAGE");
    }

    #[test]
    fn test_invalid_field_definition_surfaces_at_build() {
        let err = Schema::builder("Broken")
            .config_path("a")
            .field("name", FieldSpec::string().required(true).default_value("x"))
            .build()
            .unwrap_err();
        assert_eq!(err.response_id(), "FIELD_INVALID_DEFINITION");
    }

    #[test]
    fn test_verbose_name_overrides() {
        let schema = Schema::builder("Gateway")
            .verbose_name_plural("Gateways (all)")
            .build()
            .unwrap();
        assert_eq!(schema.verbose_name(), "Gateway");
        assert_eq!(schema.verbose_name_plural(), "Gateways (all)");
    }
}
