//! Field type definitions.
//!
//! A [`FieldDef`] maps one attribute of a model to a database column. The
//! path resolver reads these to turn `"customer__country"` into a column
//! reference, and relational field types ([`FieldType::ForeignKey`],
//! [`FieldType::OneToOneField`]) are what make a path segment traversable.

/// The type of a model field.
///
/// Only relational variants influence query compilation; the scalar variants
/// are carried so schema definitions read naturally and so callers can
/// inspect them.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum FieldType {
    /// Auto-incrementing 32-bit integer primary key.
    AutoField,
    /// Auto-incrementing 64-bit integer primary key.
    BigAutoField,
    /// Variable-length string.
    CharField,
    /// Unlimited-length text.
    TextField,
    /// 32-bit signed integer.
    IntegerField,
    /// 64-bit signed integer.
    BigIntegerField,
    /// 64-bit floating-point number.
    FloatField,
    /// Fixed-precision decimal number.
    DecimalField {
        /// Maximum total digits.
        max_digits: u32,
        /// Digits after the decimal point.
        decimal_places: u32,
    },
    /// Boolean (true/false).
    BooleanField,
    /// Date without time.
    DateField,
    /// Date and time.
    DateTimeField,
    /// Time without date.
    TimeField,
    /// UUID field.
    UuidField,
    /// Raw binary data.
    BinaryField,
    /// JSON data.
    JsonField,
    /// Many-to-one relationship.
    ForeignKey {
        /// The target model name.
        to: String,
        /// The name the target model uses for the reverse relation.
        related_name: Option<String>,
    },
    /// One-to-one relationship (unique foreign key).
    OneToOneField {
        /// The target model name.
        to: String,
        /// The name the target model uses for the reverse relation.
        related_name: Option<String>,
    },
}

impl FieldType {
    /// Creates a `ForeignKey` to `to` without an explicit reverse name.
    pub fn foreign_key(to: impl Into<String>) -> Self {
        Self::ForeignKey {
            to: to.into(),
            related_name: None,
        }
    }

    /// Creates a `OneToOneField` to `to` without an explicit reverse name.
    pub fn one_to_one(to: impl Into<String>) -> Self {
        Self::OneToOneField {
            to: to.into(),
            related_name: None,
        }
    }

    /// Returns the target model of a relational field type.
    pub fn related_model(&self) -> Option<&str> {
        match self {
            Self::ForeignKey { to, .. } | Self::OneToOneField { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Returns the explicit reverse relation name, if any.
    pub fn related_name(&self) -> Option<&str> {
        match self {
            Self::ForeignKey { related_name, .. } | Self::OneToOneField { related_name, .. } => {
                related_name.as_deref()
            }
            _ => None,
        }
    }
}

/// Definition of a model field.
///
/// # Examples
///
/// ```
/// use sqlcraft_db::fields::{FieldDef, FieldType};
///
/// let customer = FieldDef::new("customer", FieldType::foreign_key("customer"))
///     .column("customer_id")
///     .nullable();
/// assert!(customer.is_relation());
/// assert_eq!(customer.column, "customer_id");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// The attribute name used in query paths.
    pub name: &'static str,
    /// The database column name (may differ from `name`).
    pub column: String,
    /// The type of this field.
    pub field_type: FieldType,
    /// Whether this field is the primary key.
    pub primary_key: bool,
    /// Whether NULL is allowed in the database.
    pub null: bool,
}

impl FieldDef {
    /// Creates a non-null field whose column name equals its attribute name.
    pub fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            column: name.to_string(),
            field_type,
            primary_key: false,
            null: false,
        }
    }

    /// Sets the database column name.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Marks this field as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Allows NULL values in the database.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    /// Sets the reverse relation name on a relational field.
    ///
    /// Has no effect on scalar fields.
    #[must_use]
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        match &mut self.field_type {
            FieldType::ForeignKey { related_name, .. }
            | FieldType::OneToOneField { related_name, .. } => *related_name = Some(name.into()),
            _ => {}
        }
        self
    }

    /// Returns `true` if this field points at another model.
    pub const fn is_relation(&self) -> bool {
        matches!(
            self.field_type,
            FieldType::ForeignKey { .. } | FieldType::OneToOneField { .. }
        )
    }
}
