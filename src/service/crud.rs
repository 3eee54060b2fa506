//! Generic CRUD execution over a storage backend.

use crate::backend::StorageBackend;
use crate::error::{AppError, BackendError};
use crate::mutation::{
    apply_upsert_rules, diff_ids, extract_relations, linked_ids, prepare_payload, sanitize, MutationPayload, RelationWrite,
};
use crate::options::CrudOptions;
use crate::query::{build_get_query, build_list_query, resolve_identifier, Filter, QueryParams, QuerySpec};
use crate::schema::{EntityDescriptor, ModelMap};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Rows for one page plus the total matching the filter, independent of pagination.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ListResult {
    pub data: Vec<Value>,
    pub count: u64,
}

#[derive(Clone)]
pub struct CrudService {
    backend: Arc<dyn StorageBackend>,
    model: Arc<ModelMap>,
}

impl CrudService {
    pub fn new(backend: Arc<dyn StorageBackend>, model: Arc<ModelMap>) -> Self {
        CrudService { backend, model }
    }

    pub fn model(&self) -> &ModelMap {
        &self.model
    }

    fn backend_err(entity: &EntityDescriptor) -> impl Fn(BackendError) -> AppError + '_ {
        move |e| {
            tracing::debug!(entity = %entity.name, error = %e, kind = ?e.kind, "backend error");
            AppError::from_backend(&entity.name, e)
        }
    }

    /// List with pagination, search, filters, sort, select and includes.
    pub async fn list(&self, entity: &str, params: &QueryParams, options: &CrudOptions) -> Result<ListResult, AppError> {
        let entity = self.model.entity(entity)?;
        let plan = build_list_query(entity, params, options);
        let spec = match &options.filter_all_query {
            Some(hook) => hook.filter_all_query(params, plan.spec).await?,
            None => plan.spec,
        };
        let count = self
            .backend
            .count(&entity.name, &spec.filter)
            .await
            .map_err(Self::backend_err(entity))?;
        if plan.count_only {
            return Ok(ListResult { data: Vec::new(), count });
        }
        let rows = self
            .backend
            .find_many(&entity.name, &spec)
            .await
            .map_err(Self::backend_err(entity))?;
        let data = match &options.filter_result_data {
            Some(hook) => hook.filter_result_data(rows, params).await?,
            None => rows,
        };
        Ok(ListResult { data, count })
    }

    /// One record by identifier; `None` when nothing matches.
    pub async fn get_one(
        &self,
        entity: &str,
        id: &str,
        params: &QueryParams,
        options: &CrudOptions,
    ) -> Result<Option<Value>, AppError> {
        let entity = self.model.entity(entity)?;
        let spec = build_get_query(entity, id, params, options)?;
        let record = self
            .backend
            .find_first(&entity.name, &spec)
            .await
            .map_err(Self::backend_err(entity))?;
        match (record, &options.filter_get_item) {
            (Some(record), Some(hook)) => Ok(Some(hook.filter_get_item(record, params).await?)),
            (record, _) => Ok(record),
        }
    }

    pub async fn create(&self, entity: &str, data: Value, options: &CrudOptions) -> Result<Value, AppError> {
        let entity = self.model.entity(entity)?;
        let data = self.pre_process(entity, data, options).await?;
        let payload = prepare_payload(data, entity, &self.model, &options.upsert_rules)?;
        tracing::debug!(entity = %entity.name, payload = %payload.to_json(), "create");
        self.backend
            .create(&entity.name, &payload)
            .await
            .map_err(Self::backend_err(entity))
    }

    /// Update one record. Many-to-many lists are reconciled against the current links.
    ///
    /// The current links are read before the write without isolation; a concurrent
    /// update of the same record between the two can be lost.
    pub async fn update(&self, entity: &str, id: &str, data: Value, options: &CrudOptions) -> Result<Value, AppError> {
        let entity = self.model.entity(entity)?;
        let filter = resolve_identifier(entity, id, options)?;
        let mut data = self.pre_process(entity, data, options).await?;
        apply_upsert_rules(&mut data, &options.upsert_rules)?;
        let mut relations = extract_relations(&mut data, entity, &self.model);

        let many: BTreeSet<String> = relations
            .iter()
            .filter(|(_, w)| matches!(w, RelationWrite::ConnectMany { .. }))
            .map(|(k, _)| k.clone())
            .collect();
        let current = self
            .backend
            .find_first(
                &entity.name,
                &QuerySpec {
                    include: many.clone(),
                    ..QuerySpec::filtered(filter.clone())
                },
            )
            .await
            .map_err(Self::backend_err(entity))?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", entity.name, id)))?;

        for accessor in &many {
            if let Some(RelationWrite::ConnectMany { connect, disconnect }) = relations.get_mut(accessor) {
                let diff = diff_ids(&linked_ids(&current, accessor), connect);
                *connect = diff.connect;
                *disconnect = diff.disconnect;
            }
        }

        let payload = MutationPayload {
            fields: sanitize(data, entity),
            relations,
        };
        tracing::debug!(entity = %entity.name, id = %id, payload = %payload.to_json(), "update");
        self.backend
            .update(&entity.name, &record_filter(&current, filter), &payload)
            .await
            .map_err(Self::backend_err(entity))
    }

    pub async fn delete(&self, entity: &str, id: &str, options: &CrudOptions) -> Result<Value, AppError> {
        let entity = self.model.entity(entity)?;
        let filter = resolve_identifier(entity, id, options)?;
        self.backend
            .delete(&entity.name, &filter)
            .await
            .map_err(Self::backend_err(entity))
    }

    /// Shallow-merge `metas` into the entity's metadata field.
    pub async fn update_metas(&self, entity: &str, id: &str, metas: Value, options: &CrudOptions) -> Result<Value, AppError> {
        let entity = self.model.entity(entity)?;
        let field = options.metas_field_name();
        if !entity.has_field(field) {
            return Err(AppError::Metadata(format!("{} has no '{}' field", entity.name, field)));
        }
        let Value::Object(patch) = metas else {
            return Err(AppError::Validation("metas must be an object".into()));
        };
        let filter = resolve_identifier(entity, id, options)?;
        let current = self
            .backend
            .find_first(
                &entity.name,
                &QuerySpec {
                    select: Some(["id".to_string(), field.to_string()].into_iter().collect()),
                    ..QuerySpec::filtered(filter.clone())
                },
            )
            .await
            .map_err(Self::backend_err(entity))?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", entity.name, id)))?;

        let mut merged = match current.get(field) {
            Some(Value::Object(existing)) => existing.clone(),
            _ => Map::new(),
        };
        merged.extend(patch);
        let mut fields = Map::new();
        fields.insert(field.to_string(), Value::Object(merged));
        self.backend
            .update(&entity.name, &record_filter(&current, filter), &MutationPayload::from_fields(fields))
            .await
            .map_err(Self::backend_err(entity))
    }

    /// Object check and create-data hook, shared by create and update.
    async fn pre_process(
        &self,
        entity: &EntityDescriptor,
        data: Value,
        options: &CrudOptions,
    ) -> Result<Map<String, Value>, AppError> {
        let Value::Object(data) = data else {
            return Err(AppError::Validation("payload must be a JSON object".into()));
        };
        match &options.filter_create_data {
            Some(hook) => hook.filter_create_data(data, entity).await,
            None => Ok(data),
        }
    }
}

/// Address a loaded record by primary key when it has one.
fn record_filter(record: &Value, fallback: Filter) -> Filter {
    match record.get("id") {
        Some(id) if !id.is_null() => Filter::eq("id", id.clone()),
        _ => fallback,
    }
}
