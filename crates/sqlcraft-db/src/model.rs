//! Model metadata and the model registry.
//!
//! [`ModelMeta`] is the equivalent of a Django model's `class Meta` plus its
//! field list: a table name, the fields mapped to columns, and an optional
//! default ordering. [`ModelRegistry`] holds every known model and answers
//! the question the path resolver keeps asking: "what does this segment of a
//! lookup path mean on this model?".
//!
//! A registry is built once, wrapped in an `Arc`, and shared by every query
//! descriptor derived from it.

use std::collections::HashMap;

use sqlcraft_core::{QueryError, QueryResult};

use crate::fields::FieldDef;

/// Metadata about a model.
///
/// # Examples
///
/// ```
/// use sqlcraft_db::fields::{FieldDef, FieldType};
/// use sqlcraft_db::model::ModelMeta;
///
/// let order = ModelMeta::new("order", "order")
///     .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
///     .field(FieldDef::new("status", FieldType::CharField))
///     .ordering(&["-id"]);
///
/// assert_eq!(order.pk_field().map(|f| f.column.as_str()), Some("id"));
/// assert!(order.get_field("status").is_some());
/// ```
#[derive(Debug, Clone)]
pub struct ModelMeta {
    /// The model name used in lookup paths and relation targets.
    pub model_name: &'static str,
    /// The database table name.
    pub db_table: String,
    /// Field definitions in declaration order.
    pub fields: Vec<FieldDef>,
    /// Default ordering for top-level queries (`"-created_at"` style).
    pub ordering: Vec<String>,
}

impl ModelMeta {
    /// Creates metadata for a model with no fields.
    pub fn new(model_name: &'static str, db_table: impl Into<String>) -> Self {
        Self {
            model_name,
            db_table: db_table.into(),
            fields: Vec::new(),
            ordering: Vec::new(),
        }
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Sets the default ordering.
    #[must_use]
    pub fn ordering(mut self, ordering: &[&str]) -> Self {
        self.ordering = ordering.iter().map(|s| (*s).to_string()).collect();
        self
    }

    /// Looks up a field by attribute name. `"pk"` names the primary key.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        if name == "pk" {
            return self.pk_field();
        }
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the primary key field.
    pub fn pk_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// Returns the column names of every field, in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.column.clone()).collect()
    }
}

/// One traversable relationship step between two models.
///
/// Forward relations come from a foreign-key field on the source model;
/// reverse relations are the other side of a foreign key declared on the
/// target. Reverse relations can match zero rows and are always nullable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// The segment name in lookup paths.
    pub name: String,
    /// The model the step starts from.
    pub source_model: String,
    /// The model the step arrives at.
    pub target_model: String,
    /// The column on the source side of the join predicate.
    pub from_column: String,
    /// The column on the target side of the join predicate.
    pub to_column: String,
    /// Whether the step may produce no matching row.
    pub nullable: bool,
    /// Whether this is the reverse side of a foreign key.
    pub reverse: bool,
}

#[derive(Debug, Clone)]
struct ReverseLink {
    name: String,
    source_model: &'static str,
    field: &'static str,
}

/// A collection of models and the relationships between them.
///
/// # Examples
///
/// ```
/// use sqlcraft_db::fields::{FieldDef, FieldType};
/// use sqlcraft_db::model::{ModelMeta, ModelRegistry};
///
/// let mut registry = ModelRegistry::new();
/// registry
///     .register(
///         ModelMeta::new("customer", "customer")
///             .field(FieldDef::new("id", FieldType::BigAutoField).primary_key()),
///     )
///     .unwrap();
/// registry
///     .register(
///         ModelMeta::new("order", "order")
///             .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
///             .field(
///                 FieldDef::new("customer", FieldType::foreign_key("customer"))
///                     .column("customer_id")
///                     .nullable(),
///             ),
///     )
///     .unwrap();
///
/// let rel = registry.relation("order", "customer").unwrap();
/// assert_eq!(rel.from_column, "customer_id");
/// assert!(rel.nullable);
///
/// let back = registry.relation("customer", "order").unwrap();
/// assert!(back.reverse);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelMeta>,
    index: HashMap<String, usize>,
    reverse: HashMap<String, Vec<ReverseLink>>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model.
    ///
    /// Fails with `ConfigurationError` when a model of the same name is
    /// already registered or a reverse relation name is declared twice.
    pub fn register(&mut self, meta: ModelMeta) -> QueryResult<()> {
        if self.index.contains_key(meta.model_name) {
            return Err(QueryError::ConfigurationError(format!(
                "Model '{}' is already registered",
                meta.model_name
            )));
        }
        for field in meta.fields.iter().filter(|f| f.is_relation()) {
            let Some(target) = field.field_type.related_model() else {
                continue;
            };
            let name = field
                .field_type
                .related_name()
                .unwrap_or(meta.model_name)
                .to_string();
            let links = self.reverse.entry(target.to_string()).or_default();
            if links.iter().any(|l| l.name == name) {
                return Err(QueryError::ConfigurationError(format!(
                    "Reverse relation '{name}' on '{target}' is declared twice"
                )));
            }
            links.push(ReverseLink {
                name,
                source_model: meta.model_name,
                field: field.name,
            });
        }
        tracing::trace!(model = meta.model_name, table = %meta.db_table, "Registered model");
        self.index.insert(meta.model_name.to_string(), self.models.len());
        self.models.push(meta);
        Ok(())
    }

    /// Returns the metadata for a registered model.
    pub fn get(&self, model: &str) -> QueryResult<&ModelMeta> {
        self.index
            .get(model)
            .map(|&i| &self.models[i])
            .ok_or_else(|| {
                QueryError::ConfigurationError(format!("Model '{model}' is not registered"))
            })
    }

    /// Returns every registered model in registration order.
    pub fn models(&self) -> &[ModelMeta] {
        &self.models
    }

    /// Resolves a relationship segment on `model`.
    ///
    /// Forward foreign keys are matched by field name, reverse relations by
    /// their related name. Anything else is an `UnknownRelationship`.
    pub fn relation(&self, model: &str, name: &str) -> QueryResult<Relation> {
        let meta = self.get(model)?;

        if let Some(field) = meta.get_field(name) {
            let Some(target) = field.field_type.related_model() else {
                return Err(QueryError::unknown_relationship(model, name));
            };
            let target_meta = self.get(target)?;
            let to_column = pk_column(target_meta)?;
            return Ok(Relation {
                name: name.to_string(),
                source_model: model.to_string(),
                target_model: target.to_string(),
                from_column: field.column.clone(),
                to_column,
                nullable: field.null,
                reverse: false,
            });
        }

        let link = self
            .reverse
            .get(model)
            .and_then(|links| links.iter().find(|l| l.name == name))
            .ok_or_else(|| QueryError::unknown_relationship(model, name))?;
        let source_meta = self.get(link.source_model)?;
        let fk = source_meta
            .get_field(link.field)
            .ok_or_else(|| QueryError::field_error(link.source_model, link.field))?;
        Ok(Relation {
            name: name.to_string(),
            source_model: model.to_string(),
            target_model: link.source_model.to_string(),
            from_column: pk_column(meta)?,
            to_column: fk.column.clone(),
            nullable: true,
            reverse: true,
        })
    }

    /// Returns `true` if `name` is a reverse relation of `model`.
    pub fn has_reverse(&self, model: &str, name: &str) -> bool {
        self.reverse
            .get(model)
            .is_some_and(|links| links.iter().any(|l| l.name == name))
    }
}

fn pk_column(meta: &ModelMeta) -> QueryResult<String> {
    meta.pk_field().map(|f| f.column.clone()).ok_or_else(|| {
        QueryError::ConfigurationError(format!(
            "Model '{}' has no primary key",
            meta.model_name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldType;

    fn registry() -> ModelRegistry {
        let mut r = ModelRegistry::new();
        r.register(
            ModelMeta::new("customer", "shop_customer")
                .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
                .field(FieldDef::new("country", FieldType::CharField)),
        )
        .unwrap();
        r.register(
            ModelMeta::new("order", "order")
                .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
                .field(
                    FieldDef::new("customer", FieldType::foreign_key("customer"))
                        .column("customer_id")
                        .nullable(),
                )
                .field(FieldDef::new("status", FieldType::CharField)),
        )
        .unwrap();
        r.register(
            ModelMeta::new("line", "order_line")
                .field(FieldDef::new("id", FieldType::BigAutoField).primary_key())
                .field(
                    FieldDef::new("order", FieldType::foreign_key("order"))
                        .column("order_id")
                        .related_name("lines"),
                ),
        )
        .unwrap();
        r
    }

    #[test]
    fn test_get_field_and_pk_alias() {
        let r = registry();
        let order = r.get("order").unwrap();
        assert_eq!(order.get_field("status").unwrap().column, "status");
        assert_eq!(order.get_field("pk").unwrap().name, "id");
        assert!(order.get_field("missing").is_none());
    }

    #[test]
    fn test_unknown_model() {
        let r = registry();
        let err = r.get("invoice").unwrap_err();
        assert!(matches!(err, QueryError::ConfigurationError(_)));
    }

    #[test]
    fn test_duplicate_model_rejected() {
        let mut r = registry();
        let err = r.register(ModelMeta::new("order", "order2")).unwrap_err();
        assert!(matches!(err, QueryError::ConfigurationError(_)));
    }

    #[test]
    fn test_forward_relation() {
        let r = registry();
        let rel = r.relation("order", "customer").unwrap();
        assert_eq!(rel.target_model, "customer");
        assert_eq!(rel.from_column, "customer_id");
        assert_eq!(rel.to_column, "id");
        assert!(rel.nullable);
        assert!(!rel.reverse);
    }

    #[test]
    fn test_reverse_relation_default_name() {
        let r = registry();
        let rel = r.relation("customer", "order").unwrap();
        assert_eq!(rel.target_model, "order");
        assert_eq!(rel.from_column, "id");
        assert_eq!(rel.to_column, "customer_id");
        assert!(rel.nullable);
        assert!(rel.reverse);
    }

    #[test]
    fn test_reverse_relation_related_name() {
        let r = registry();
        assert!(r.has_reverse("order", "lines"));
        let rel = r.relation("order", "lines").unwrap();
        assert_eq!(rel.target_model, "line");
        assert_eq!(rel.to_column, "order_id");
    }

    #[test]
    fn test_scalar_field_is_not_relation() {
        let r = registry();
        let err = r.relation("order", "status").unwrap_err();
        assert_eq!(err, QueryError::unknown_relationship("order", "status"));
    }

    #[test]
    fn test_missing_relation() {
        let r = registry();
        let err = r.relation("order", "warehouse").unwrap_err();
        assert!(matches!(err, QueryError::UnknownRelationship { .. }));
    }

    #[test]
    fn test_column_names_in_order() {
        let r = registry();
        assert_eq!(
            r.get("order").unwrap().column_names(),
            vec!["id", "customer_id", "status"]
        );
    }
}
