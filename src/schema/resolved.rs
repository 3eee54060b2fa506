//! Resolved entity model: schema flattened into per-entity field and relation maps.
//! Built once at startup, then shared read-only.

use crate::error::AppError;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

/// Declared type of a field. Anything that is not a known scalar tag names another model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FieldType {
    String,
    Int,
    BigInt,
    Float,
    Decimal,
    Boolean,
    DateTime,
    Json,
    Bytes,
    Uuid,
    /// Database type without dedicated handling (enums, `inet`, ...), kept by its
    /// qualified name. Tagged `native:<schema>.<type>` in model definitions.
    Native(String),
    Model(String),
}

const NATIVE_PREFIX: &str = "native:";

impl FieldType {
    pub fn parse(tag: &str) -> Self {
        if let Some(name) = tag.strip_prefix(NATIVE_PREFIX).filter(|n| !n.is_empty()) {
            return FieldType::Native(name.to_string());
        }
        match tag.to_lowercase().as_str() {
            "string" | "text" | "varchar" => FieldType::String,
            "int" | "integer" | "int4" | "smallint" | "int2" => FieldType::Int,
            "bigint" | "int8" => FieldType::BigInt,
            "float" | "double" | "real" | "float4" | "float8" => FieldType::Float,
            "decimal" | "numeric" => FieldType::Decimal,
            "boolean" | "bool" => FieldType::Boolean,
            "datetime" | "timestamp" | "timestamptz" | "date" => FieldType::DateTime,
            "json" | "jsonb" => FieldType::Json,
            "bytes" | "bytea" => FieldType::Bytes,
            "uuid" => FieldType::Uuid,
            _ => FieldType::Model(tag.to_string()),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, FieldType::Int | FieldType::BigInt)
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, FieldType::Model(_))
    }

    /// Interpret a raw query-string value according to this type. Falls back to the string.
    pub fn coerce(&self, raw: &str) -> Value {
        match self {
            FieldType::Int | FieldType::BigInt => raw
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::String(raw.to_string())),
            FieldType::Float => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(raw.to_string())),
            FieldType::Boolean if raw.eq_ignore_ascii_case("true") => Value::Bool(true),
            FieldType::Boolean if raw.eq_ignore_ascii_case("false") => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub is_list: bool,
    pub is_unique: bool,
}

impl FieldDescriptor {
    /// A field the storage layer keeps as a column (not a relation accessor).
    pub fn is_column(&self) -> bool {
        self.field_type.is_scalar()
    }
}

/// Inferred relation from an owning entity to a target entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RelationDescriptor {
    /// Owner holds the target id in `foreign_field` (e.g. `idTeam`).
    OneToMany { target: String, foreign_field: String },
    /// Both sides declare the other's plural; `plural_field` is the owner's list field (e.g. `tags`).
    ManyToMany { target: String, plural_field: String },
}

impl RelationDescriptor {
    pub fn target(&self) -> &str {
        match self {
            RelationDescriptor::OneToMany { target, .. } | RelationDescriptor::ManyToMany { target, .. } => target,
        }
    }

    /// Name under which the relation is addressed in payloads, includes and results.
    pub fn accessor<'a>(&'a self, key: &'a str) -> &'a str {
        match self {
            RelationDescriptor::OneToMany { .. } => key,
            RelationDescriptor::ManyToMany { plural_field, .. } => plural_field,
        }
    }
}

/// Target side of a one-to-many relation: the list accessor on the target entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InverseRelation {
    pub source: String,
    pub foreign_field: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct EntityDescriptor {
    /// Entity key: model name with a lower-cased first letter.
    pub name: String,
    /// Model name as declared; also the storage table name.
    pub model_name: String,
    pub fields: IndexMap<String, FieldDescriptor>,
    pub relations: IndexMap<String, RelationDescriptor>,
    pub inverse: IndexMap<String, InverseRelation>,
}

impl EntityDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn columns(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values().filter(|f| f.is_column())
    }

    pub fn relation(&self, key: &str) -> Option<&RelationDescriptor> {
        self.relations.get(key)
    }

    /// Find a relation by the name it is addressed with (`team`, `tags`).
    pub fn relation_by_accessor(&self, accessor: &str) -> Option<(&str, &RelationDescriptor)> {
        self.relations
            .iter()
            .find(|(key, rel)| rel.accessor(key) == accessor)
            .map(|(key, rel)| (key.as_str(), rel))
    }

    /// Whether `name` can be eager-loaded: a relation accessor, an inverse list, or a declared field.
    pub fn is_loadable(&self, name: &str) -> bool {
        self.relation_by_accessor(name).is_some() || self.inverse.contains_key(name) || self.has_field(name)
    }
}

/// All entities keyed by entity name, in schema declaration order.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ModelMap {
    pub entities: IndexMap<String, EntityDescriptor>,
}

impl ModelMap {
    pub fn get(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(name)
    }

    /// Lookup that treats absence as a configuration problem.
    pub fn entity(&self, name: &str) -> Result<&EntityDescriptor, AppError> {
        self.entities
            .get(name)
            .ok_or_else(|| AppError::Metadata(format!("unknown entity '{}'", name)))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entities.values()
    }
}
