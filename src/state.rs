//! Shared application state: one facade per exposed path segment.

use crate::error::{AppError, ConfigError};
use crate::facade::{CrudFacade, Operation};
use crate::options::{CrudOptions, FieldMask};
use crate::schema::{validate_api_config, ApiEntityConfig};
use crate::service::CrudService;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

pub struct ExposedEntity {
    pub facade: CrudFacade,
    pub operations: HashSet<Operation>,
}

#[derive(Default)]
pub struct FacadeRegistry {
    by_path: IndexMap<String, ExposedEntity>,
}

impl FacadeRegistry {
    /// Expose every entity of the service's model under its own key with all operations.
    pub fn for_all_entities(service: &CrudService) -> Result<Self, AppError> {
        let configs: Vec<ApiEntityConfig> = service
            .model()
            .iter()
            .map(|e| ApiEntityConfig {
                entity: e.name.clone(),
                ..Default::default()
            })
            .collect();
        Self::from_config(service, &configs)
    }

    /// Expose the configured entities. An empty config exposes every entity.
    pub fn from_config(service: &CrudService, configs: &[ApiEntityConfig]) -> Result<Self, AppError> {
        if configs.is_empty() && !service.model().is_empty() {
            return Self::for_all_entities(service);
        }
        validate_api_config(service.model(), configs)?;
        let mut registry = FacadeRegistry::default();
        for config in configs {
            let facade = CrudFacade::for_entity(service.clone(), &config.entity, options_for(config))?;
            let operations = Operation::ALL.into_iter().filter(|op| config.allows(*op)).collect();
            registry.insert(config.path_segment(), facade, operations)?;
        }
        tracing::info!(entities = registry.by_path.len(), "facades registered");
        Ok(registry)
    }

    /// Register a facade (possibly with overrides) under `path_segment`.
    pub fn insert(
        &mut self,
        path_segment: &str,
        facade: CrudFacade,
        operations: HashSet<Operation>,
    ) -> Result<(), ConfigError> {
        if self.by_path.contains_key(path_segment) {
            return Err(ConfigError::DuplicatePathSegment(path_segment.to_string()));
        }
        self.by_path
            .insert(path_segment.to_string(), ExposedEntity { facade, operations });
        Ok(())
    }

    /// Facade for `path_segment` when `op` is enabled there.
    pub fn resolve(&self, path_segment: &str, op: Operation) -> Result<&CrudFacade, AppError> {
        let exposed = self
            .by_path
            .get(path_segment)
            .ok_or_else(|| AppError::NotFound(format!("no entity at '{}'", path_segment)))?;
        if !exposed.operations.contains(&op) {
            return Err(AppError::Forbidden(format!("{} not allowed on {}", op, path_segment)));
        }
        Ok(&exposed.facade)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.by_path.keys().map(String::as_str)
    }
}

fn options_for(config: &ApiEntityConfig) -> CrudOptions {
    let mut options = CrudOptions::new()
        .queryable_fields(config.queryable_fields.iter().cloned())
        .search_fields(config.search_fields.iter().cloned());
    for rule in &config.upsert_rules {
        options = options.upsert_rule(rule.clone());
    }
    if !config.sensitive_fields.is_empty() {
        let mask = FieldMask::new(config.sensitive_fields.iter().cloned());
        options = options.on_result_data(mask.clone()).on_get_item(mask);
    }
    options
}

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<FacadeRegistry>,
}

impl AppState {
    pub fn new(registry: FacadeRegistry) -> Self {
        AppState {
            registry: Arc::new(registry),
        }
    }
}
