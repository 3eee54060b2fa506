//! API config validation against the resolved model.

use crate::error::ConfigError;
use crate::schema::resolved::ModelMap;
use crate::schema::types::ApiEntityConfig;
use std::collections::HashSet;

pub fn validate_api_config(model: &ModelMap, configs: &[ApiEntityConfig]) -> Result<(), ConfigError> {
    let mut path_segments = HashSet::new();
    for api in configs {
        let Some(entity) = model.get(&api.entity) else {
            return Err(ConfigError::MissingReference {
                kind: "entity",
                id: api.entity.clone(),
            });
        };
        if !path_segments.insert(api.path_segment()) {
            return Err(ConfigError::DuplicatePathSegment(api.path_segment().to_string()));
        }
        for field in api.queryable_fields.iter().chain(&api.search_fields) {
            let head = field.split('.').next().unwrap_or(field);
            if !entity.has_field(head) && entity.relation_by_accessor(head).is_none() {
                tracing::warn!(entity = %api.entity, field = %field, "configured field is not declared on entity");
            }
        }
    }
    Ok(())
}
