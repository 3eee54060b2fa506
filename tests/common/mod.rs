#![allow(dead_code)]

use relcrud::schema::FieldDefinition;
use relcrud::{build, infer, CrudService, MemoryBackend, ModelDefinition, ModelMap};
use std::sync::Arc;

pub fn models() -> Vec<ModelDefinition> {
    let f = FieldDefinition::new;
    vec![
        ModelDefinition::new(
            "User",
            vec![
                f("id", "Int"),
                f("uid", "String"),
                f("name", "String"),
                f("email", "String").unique(),
                f("password", "String"),
                f("metas", "Json"),
                f("idTeam", "Int"),
                f("team", "Team"),
            ],
        ),
        ModelDefinition::new("Team", vec![f("id", "Int"), f("name", "String"), f("users", "User").list()]),
        ModelDefinition::new(
            "Post",
            vec![f("id", "Int"), f("title", "String"), f("slug", "String"), f("tags", "Tag").list()],
        ),
        ModelDefinition::new("Tag", vec![f("id", "Int"), f("name", "String"), f("posts", "Post").list()]),
    ]
}

pub fn model() -> Arc<ModelMap> {
    let mut map = build(&models());
    infer(&mut map);
    Arc::new(map)
}

/// Service over a fresh memory backend; the backend handle is returned for ops-log assertions.
pub fn service() -> (CrudService, Arc<MemoryBackend>) {
    let model = model();
    let backend = Arc::new(MemoryBackend::new(model.clone()));
    (CrudService::new(backend.clone(), model), backend)
}
