//! Uniform operation set over one entity, bindable to routes without per-entity code.
//!
//! Each operation runs the caller's override when that slot is populated, otherwise the
//! generic `CrudService` behavior.

use crate::error::AppError;
use crate::options::CrudOptions;
use crate::query::QueryParams;
use crate::response::Envelope;
use crate::service::CrudService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Get,
    Update,
    Delete,
    All,
    UpdateMetas,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Create,
        Operation::Get,
        Operation::Update,
        Operation::Delete,
        Operation::All,
        Operation::UpdateMetas,
    ];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Get => "get",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::All => "all",
            Operation::UpdateMetas => "update_metas",
        };
        f.write_str(name)
    }
}

/// Normalized request: path id, parsed query string, JSON body.
#[derive(Clone, Debug, Default)]
pub struct CrudRequest {
    pub id: Option<String>,
    pub query: QueryParams,
    pub body: Option<Value>,
}

impl CrudRequest {
    fn require_id(&self) -> Result<&str, AppError> {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Validation("id is required".into()))
    }

    fn require_body(&mut self) -> Result<Value, AppError> {
        match self.body.take() {
            Some(Value::Null) | None => Err(AppError::Validation("payload is required".into())),
            Some(body) => Ok(body),
        }
    }
}

/// Caller-supplied implementation of one operation.
#[async_trait]
pub trait CrudOperation: Send + Sync {
    async fn call(&self, request: CrudRequest) -> Result<Envelope, AppError>;
}

/// Optional per-operation overrides; an empty slot uses the generic behavior.
#[derive(Clone, Default)]
pub struct CrudOverrides {
    pub create: Option<Arc<dyn CrudOperation>>,
    pub get: Option<Arc<dyn CrudOperation>>,
    pub update: Option<Arc<dyn CrudOperation>>,
    pub delete: Option<Arc<dyn CrudOperation>>,
    pub all: Option<Arc<dyn CrudOperation>>,
    pub update_metas: Option<Arc<dyn CrudOperation>>,
}

impl CrudOverrides {
    pub fn slot(&self, op: Operation) -> Option<&Arc<dyn CrudOperation>> {
        match op {
            Operation::Create => self.create.as_ref(),
            Operation::Get => self.get.as_ref(),
            Operation::Update => self.update.as_ref(),
            Operation::Delete => self.delete.as_ref(),
            Operation::All => self.all.as_ref(),
            Operation::UpdateMetas => self.update_metas.as_ref(),
        }
    }

    pub fn set(&mut self, op: Operation, handler: Arc<dyn CrudOperation>) {
        let slot = match op {
            Operation::Create => &mut self.create,
            Operation::Get => &mut self.get,
            Operation::Update => &mut self.update,
            Operation::Delete => &mut self.delete,
            Operation::All => &mut self.all,
            Operation::UpdateMetas => &mut self.update_metas,
        };
        *slot = Some(handler);
    }
}

#[derive(Clone)]
pub struct CrudFacade {
    entity: String,
    service: CrudService,
    options: Arc<CrudOptions>,
    overrides: CrudOverrides,
}

impl CrudFacade {
    /// Generic handler for `entity`. Fails when the entity is not in the model.
    pub fn for_entity(service: CrudService, entity: &str, options: CrudOptions) -> Result<Self, AppError> {
        service.model().entity(entity)?;
        Ok(CrudFacade {
            entity: entity.to_string(),
            service,
            options: Arc::new(options),
            overrides: CrudOverrides::default(),
        })
    }

    pub fn with_overrides(mut self, overrides: CrudOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_override(mut self, op: Operation, handler: impl CrudOperation + 'static) -> Self {
        self.overrides.set(op, Arc::new(handler));
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn options(&self) -> &CrudOptions {
        &self.options
    }

    pub async fn dispatch(&self, op: Operation, request: CrudRequest) -> Result<Envelope, AppError> {
        if let Some(handler) = self.overrides.slot(op) {
            tracing::debug!(entity = %self.entity, op = %op, "dispatching to override");
            return handler.call(request).await;
        }
        match op {
            Operation::Create => self.create(request).await,
            Operation::Get => self.get(request).await,
            Operation::Update => self.update(request).await,
            Operation::Delete => self.delete(request).await,
            Operation::All => self.all(request).await,
            Operation::UpdateMetas => self.update_metas(request).await,
        }
    }

    async fn create(&self, mut request: CrudRequest) -> Result<Envelope, AppError> {
        let body = request.require_body()?;
        let record = self.service.create(&self.entity, body, &self.options).await?;
        Ok(Envelope::one(record))
    }

    async fn get(&self, request: CrudRequest) -> Result<Envelope, AppError> {
        let id = request.require_id()?;
        let record = self
            .service
            .get_one(&self.entity, id, &request.query, &self.options)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} {}", self.entity, id)))?;
        Ok(Envelope::one(record))
    }

    async fn update(&self, mut request: CrudRequest) -> Result<Envelope, AppError> {
        let body = request.require_body()?;
        let id = request.require_id()?;
        let record = self.service.update(&self.entity, id, body, &self.options).await?;
        Ok(Envelope::one(record))
    }

    async fn delete(&self, request: CrudRequest) -> Result<Envelope, AppError> {
        let id = request.require_id()?;
        let record = self.service.delete(&self.entity, id, &self.options).await?;
        Ok(Envelope::one(record))
    }

    async fn all(&self, request: CrudRequest) -> Result<Envelope, AppError> {
        let result = self.service.list(&self.entity, &request.query, &self.options).await?;
        Ok(Envelope::many(result.data, result.count))
    }

    async fn update_metas(&self, mut request: CrudRequest) -> Result<Envelope, AppError> {
        let body = request.require_body()?;
        let id = request.require_id()?;
        let record = self.service.update_metas(&self.entity, id, body, &self.options).await?;
        Ok(Envelope::one(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::schema::{build, infer, FieldDefinition, ModelDefinition};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn facade() -> CrudFacade {
        let f = FieldDefinition::new;
        let mut map = build(&[ModelDefinition::new(
            "Tag",
            vec![f("id", "Int"), f("name", "String"), f("metas", "Json")],
        )]);
        infer(&mut map);
        let model = Arc::new(map);
        let service = CrudService::new(Arc::new(MemoryBackend::new(model.clone())), model);
        CrudFacade::for_entity(service, "tag", CrudOptions::new()).unwrap()
    }

    struct Fixed;

    #[async_trait]
    impl CrudOperation for Fixed {
        async fn call(&self, request: CrudRequest) -> Result<Envelope, AppError> {
            Ok(Envelope::one(json!({ "custom": request.id })))
        }
    }

    #[tokio::test]
    async fn generic_operations_round_trip() {
        let facade = facade();
        let created = facade
            .dispatch(
                Operation::Create,
                CrudRequest {
                    body: Some(json!({"name": "rust"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(created.data, json!({"id": 1, "name": "rust"}));

        let listed = facade.dispatch(Operation::All, CrudRequest::default()).await.unwrap();
        assert_eq!(listed.count, Some(1));

        let got = facade
            .dispatch(
                Operation::Get,
                CrudRequest {
                    id: Some("1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(got.data["name"], json!("rust"));
    }

    #[tokio::test]
    async fn missing_inputs_are_validation_errors() {
        let facade = facade();
        let err = facade.dispatch(Operation::Create, CrudRequest::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = facade
            .dispatch(
                Operation::Delete,
                CrudRequest {
                    id: Some("  ".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn get_of_absent_record_is_not_found() {
        let err = facade()
            .dispatch(
                Operation::Get,
                CrudRequest {
                    id: Some("9".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn override_slot_replaces_only_its_operation() {
        let facade = facade().with_override(Operation::Get, Fixed);
        let got = facade
            .dispatch(
                Operation::Get,
                CrudRequest {
                    id: Some("x".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(got.data, json!({"custom": "x"}));
        let listed = facade.dispatch(Operation::All, CrudRequest::default()).await.unwrap();
        assert_eq!(listed.count, Some(0));
    }

    #[test]
    fn unknown_entity_is_rejected() {
        let f = facade();
        let err = CrudFacade::for_entity(f.service.clone(), "nope", CrudOptions::new()).err();
        assert!(matches!(err, Some(AppError::Metadata(_))));
    }
}
