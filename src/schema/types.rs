//! Raw schema input and per-entity API config, as read from JSON.

use crate::facade::Operation;
use crate::options::UpsertRule;
use serde::{Deserialize, Serialize};

/// One field as reported by the schema system.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    /// Scalar tag ("String", "Int", "Boolean", ...) or the name of another model.
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub is_list: bool,
    #[serde(default)]
    pub is_unique: bool,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, type_: impl Into<String>) -> Self {
        FieldDefinition {
            name: name.into(),
            type_: type_.into(),
            is_list: false,
            is_unique: false,
        }
    }

    pub fn list(mut self) -> Self {
        self.is_list = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }
}

/// A model: name plus fields in declaration order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

impl ModelDefinition {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        ModelDefinition {
            name: name.into(),
            fields,
        }
    }
}

/// Exposure of one entity over the facade/HTTP layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApiEntityConfig {
    /// Entity key (model name with lower-cased first letter).
    pub entity: String,
    /// URL segment; defaults to the entity key.
    #[serde(default)]
    pub path_segment: Option<String>,
    /// Enabled operations; all six when absent.
    #[serde(default)]
    pub operations: Option<Vec<Operation>>,
    #[serde(default)]
    pub queryable_fields: Vec<String>,
    #[serde(default)]
    pub search_fields: Vec<String>,
    /// Fields stripped from every returned record (password hashes, secrets).
    #[serde(default)]
    pub sensitive_fields: Vec<String>,
    #[serde(default)]
    pub upsert_rules: Vec<UpsertRule>,
}

impl ApiEntityConfig {
    pub fn path_segment(&self) -> &str {
        self.path_segment.as_deref().unwrap_or(&self.entity)
    }

    pub fn allows(&self, op: Operation) -> bool {
        self.operations
            .as_ref()
            .map(|ops| ops.contains(&op))
            .unwrap_or(true)
    }
}
