//! Model metadata store: entity key -> field name -> field type.

use crate::case::decapitalize;
use crate::schema::resolved::{EntityDescriptor, FieldDescriptor, FieldType, ModelMap};
use crate::schema::types::ModelDefinition;
use indexmap::IndexMap;

/// Build the descriptor map from model definitions. Relations are left empty; see `infer`.
/// No validation: an empty model list yields an empty map.
pub fn build(models: &[ModelDefinition]) -> ModelMap {
    let mut entities = IndexMap::with_capacity(models.len());
    for model in models {
        let name = decapitalize(&model.name);
        let fields = model
            .fields
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    FieldDescriptor {
                        name: f.name.clone(),
                        field_type: FieldType::parse(&f.type_),
                        is_list: f.is_list,
                        is_unique: f.is_unique,
                    },
                )
            })
            .collect();
        entities.insert(
            name.clone(),
            EntityDescriptor {
                name,
                model_name: model.name.clone(),
                fields,
                relations: IndexMap::new(),
                inverse: IndexMap::new(),
            },
        );
    }
    tracing::debug!(entities = entities.len(), "model metadata built");
    ModelMap { entities }
}
