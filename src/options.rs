//! Per-entity options: named hook slots and query/mutation knobs.
//! An empty slot means default behavior.

use crate::error::AppError;
use crate::query::{Filter, QueryParams, QuerySpec};
use crate::schema::EntityDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Pre-transforms a create/update payload before relation resolution and sanitization.
#[async_trait]
pub trait FilterCreateData: Send + Sync {
    async fn filter_create_data(
        &self,
        data: Map<String, Value>,
        entity: &EntityDescriptor,
    ) -> Result<Map<String, Value>, AppError>;
}

/// Replaces the built list query before it is executed (tenant scoping, soft-delete exclusion).
#[async_trait]
pub trait FilterAllQuery: Send + Sync {
    async fn filter_all_query(&self, params: &QueryParams, built: QuerySpec) -> Result<QuerySpec, AppError>;
}

/// Transforms the rows returned by `list`.
#[async_trait]
pub trait FilterResultData: Send + Sync {
    async fn filter_result_data(&self, rows: Vec<Value>, params: &QueryParams) -> Result<Vec<Value>, AppError>;
}

/// Transforms the record returned by `get_one`.
#[async_trait]
pub trait FilterGetItem: Send + Sync {
    async fn filter_get_item(&self, record: Value, params: &QueryParams) -> Result<Value, AppError>;
}

/// Custom identifier resolution. `None` falls back to the default rules.
pub trait ResolveWhere: Send + Sync {
    fn resolve_where(&self, id: &str, entity: &EntityDescriptor) -> Option<Filter>;
}

impl<F> ResolveWhere for F
where
    F: Fn(&str, &EntityDescriptor) -> Option<Filter> + Send + Sync,
{
    fn resolve_where(&self, id: &str, entity: &EntityDescriptor) -> Option<Filter> {
        self(id, entity)
    }
}

/// Field derivation applied to create/update payloads.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum UpsertRule {
    /// `field` = slug of `from` when `from` is a string in the payload.
    Slugify { field: String, from: String },
}

pub const DEFAULT_METAS_FIELD: &str = "metas";

#[derive(Clone, Default)]
pub struct CrudOptions {
    /// Fields searched by `q`; `relation.field` reaches into a direct relation.
    pub queryable_fields: Vec<String>,
    /// Fields an identifier is matched against, instead of `id`/`uid`.
    pub search_fields: Vec<String>,
    /// Base filter; derived filters override it.
    pub base_filter: Filter,
    pub include: BTreeSet<String>,
    pub upsert_rules: Vec<UpsertRule>,
    pub metas_field: Option<String>,
    pub filter_create_data: Option<Arc<dyn FilterCreateData>>,
    pub filter_all_query: Option<Arc<dyn FilterAllQuery>>,
    pub filter_result_data: Option<Arc<dyn FilterResultData>>,
    pub filter_get_item: Option<Arc<dyn FilterGetItem>>,
    pub resolve_where: Option<Arc<dyn ResolveWhere>>,
}

impl CrudOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queryable_fields<I: IntoIterator<Item = S>, S: Into<String>>(mut self, fields: I) -> Self {
        self.queryable_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn search_fields<I: IntoIterator<Item = S>, S: Into<String>>(mut self, fields: I) -> Self {
        self.search_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn base_filter(mut self, filter: Filter) -> Self {
        self.base_filter = filter;
        self
    }

    pub fn include(mut self, accessor: impl Into<String>) -> Self {
        self.include.insert(accessor.into());
        self
    }

    pub fn upsert_rule(mut self, rule: UpsertRule) -> Self {
        self.upsert_rules.push(rule);
        self
    }

    pub fn metas_field(mut self, field: impl Into<String>) -> Self {
        self.metas_field = Some(field.into());
        self
    }

    pub fn on_create_data(mut self, hook: impl FilterCreateData + 'static) -> Self {
        self.filter_create_data = Some(Arc::new(hook));
        self
    }

    pub fn on_all_query(mut self, hook: impl FilterAllQuery + 'static) -> Self {
        self.filter_all_query = Some(Arc::new(hook));
        self
    }

    pub fn on_result_data(mut self, hook: impl FilterResultData + 'static) -> Self {
        self.filter_result_data = Some(Arc::new(hook));
        self
    }

    pub fn on_get_item(mut self, hook: impl FilterGetItem + 'static) -> Self {
        self.filter_get_item = Some(Arc::new(hook));
        self
    }

    pub fn on_resolve_where(mut self, hook: impl ResolveWhere + 'static) -> Self {
        self.resolve_where = Some(Arc::new(hook));
        self
    }

    pub fn metas_field_name(&self) -> &str {
        self.metas_field.as_deref().unwrap_or(DEFAULT_METAS_FIELD)
    }
}

/// Strips sensitive fields from every returned record.
#[derive(Clone, Debug)]
pub struct FieldMask {
    fields: HashSet<String>,
}

impl FieldMask {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(fields: I) -> Self {
        FieldMask {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    fn mask(&self, mut record: Value) -> Value {
        if let Value::Object(map) = &mut record {
            map.retain(|k, _| !self.fields.contains(k));
        }
        record
    }
}

#[async_trait]
impl FilterResultData for FieldMask {
    async fn filter_result_data(&self, rows: Vec<Value>, _params: &QueryParams) -> Result<Vec<Value>, AppError> {
        Ok(rows.into_iter().map(|r| self.mask(r)).collect())
    }
}

#[async_trait]
impl FilterGetItem for FieldMask {
    async fn filter_get_item(&self, record: Value, _params: &QueryParams) -> Result<Value, AppError> {
        Ok(self.mask(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_rule_from_json() {
        let rule: UpsertRule = serde_json::from_value(json!({"rule": "slugify", "field": "slug", "from": "title"})).unwrap();
        assert_eq!(
            rule,
            UpsertRule::Slugify {
                field: "slug".into(),
                from: "title".into()
            }
        );
    }

    #[tokio::test]
    async fn field_mask_removes_sensitive_fields() {
        let mask = FieldMask::new(["password"]);
        let rows = mask
            .filter_result_data(vec![json!({"id": 1, "password": "x"})], &QueryParams::new())
            .await
            .unwrap();
        assert_eq!(rows, vec![json!({"id": 1})]);
    }

    #[test]
    fn metas_field_defaults() {
        assert_eq!(CrudOptions::new().metas_field_name(), "metas");
        assert_eq!(CrudOptions::new().metas_field("extra").metas_field_name(), "extra");
    }
}
