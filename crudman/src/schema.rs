//! # Model Schema
//!
//! Adapter-neutral description of a resource's fields. Validation rules, default whitelists and
//! keyword-search fields are all derived from it. Schemas are declared by hand or reflected from a
//! Sea-ORM entity with [`ModelSchema::from_entity`].

use sea_orm::{ColumnTrait, ColumnType, EntityName, EntityTrait, IdenStatic, Iterable, PrimaryKeyToColumn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Text,
    Integer,
    Float,
    Boolean,
    Date,
    DateTime,
    Uuid,
    Json,
    Binary,
    Any,
}

impl FieldKind {
    fn from_column_type(column_type: &ColumnType) -> Self {
        match column_type {
            ColumnType::Char(_) | ColumnType::String(_) => Self::String,
            ColumnType::Text => Self::Text,
            ColumnType::TinyInteger
            | ColumnType::SmallInteger
            | ColumnType::Integer
            | ColumnType::BigInteger
            | ColumnType::TinyUnsigned
            | ColumnType::SmallUnsigned
            | ColumnType::Unsigned
            | ColumnType::BigUnsigned => Self::Integer,
            ColumnType::Float | ColumnType::Double | ColumnType::Decimal(_) => Self::Float,
            ColumnType::Boolean => Self::Boolean,
            ColumnType::Date => Self::Date,
            ColumnType::DateTime | ColumnType::Timestamp | ColumnType::TimestampWithTimeZone => {
                Self::DateTime
            }
            ColumnType::Uuid => Self::Uuid,
            ColumnType::Json | ColumnType::JsonBinary => Self::Json,
            ColumnType::Binary(_) | ColumnType::VarBinary(_) => Self::Binary,
            _ => Self::Any,
        }
    }

    #[must_use]
    pub fn is_textual(self) -> bool {
        matches!(self, Self::String | Self::Text)
    }

    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub max_length: Option<u32>,
    pub primary: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            max_length: None,
            primary: false,
        }
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn max_length(mut self, max: u32) -> Self {
        self.max_length = Some(max);
        self
    }

    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    pub relations: Vec<String>,
    pub identity_field: String,
}

impl ModelSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            relations: Vec::new(),
            identity_field: "id".to_string(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relations.push(relation.into());
        self
    }

    #[must_use]
    pub fn identity(mut self, field: impl Into<String>) -> Self {
        self.identity_field = field.into();
        self
    }

    /// Reflect column names, types, nullability and primary key from a Sea-ORM entity.
    #[must_use]
    pub fn from_entity<E: EntityTrait>() -> Self {
        let primary: Vec<String> = E::PrimaryKey::iter()
            .map(|pk| pk.into_column().as_str().to_string())
            .collect();

        let fields = E::Column::iter()
            .map(|column| {
                let def = column.def();
                let name = column.as_str().to_string();
                FieldSpec {
                    primary: primary.contains(&name),
                    kind: FieldKind::from_column_type(def.get_column_type()),
                    nullable: def.is_null(),
                    max_length: None,
                    name,
                }
            })
            .collect();

        Self {
            name: E::default().table_name().to_string(),
            fields,
            relations: Vec::new(),
            identity_field: primary.first().cloned().unwrap_or_else(|| "id".to_string()),
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|f| crate::models::same_name(&f.name, name))
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Default keyword-search fields: every textual column.
    #[must_use]
    pub fn textual_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.kind.is_textual())
            .map(|f| f.name.clone())
            .collect()
    }
}
