//! Translates raw create/update bodies into sanitized, relation-resolved payloads.

use crate::case::slugify;
use crate::error::AppError;
use crate::options::UpsertRule;
use crate::schema::{EntityDescriptor, ModelMap, RelationDescriptor};
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{json, Map, Value};

/// Relation write issued alongside the scalar fields.
#[derive(Clone, Debug, PartialEq)]
pub enum RelationWrite {
    /// Attach the single related record with this id (one-to-many owner side).
    ConnectOne(Value),
    /// Attach / detach related records by id (many-to-many).
    ConnectMany { connect: Vec<Value>, disconnect: Vec<Value> },
}

impl RelationWrite {
    pub fn connect_many(ids: Vec<Value>) -> Self {
        RelationWrite::ConnectMany {
            connect: ids,
            disconnect: Vec::new(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            RelationWrite::ConnectOne(id) => json!({ "connect": { "id": id } }),
            RelationWrite::ConnectMany { connect, disconnect } => {
                let mut out = Map::new();
                out.insert("connect".into(), ids_to_objects(connect));
                if !disconnect.is_empty() {
                    out.insert("disconnect".into(), ids_to_objects(disconnect));
                }
                Value::Object(out)
            }
        }
    }
}

fn ids_to_objects(ids: &[Value]) -> Value {
    Value::Array(ids.iter().map(|id| json!({ "id": id })).collect())
}

/// Scalar fields plus relation writes keyed by relation accessor (`team`, `tags`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutationPayload {
    pub fields: Map<String, Value>,
    pub relations: IndexMap<String, RelationWrite>,
}

impl MutationPayload {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        MutationPayload {
            fields,
            relations: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.relations.is_empty()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Serializes in the storage-call shape: `{ name: "Ann", team: { connect: { id: 5 } } }`.
impl Serialize for MutationPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + self.relations.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        for (k, w) in &self.relations {
            map.serialize_entry(k, &w.to_json())?;
        }
        map.end()
    }
}

/// Drop every key not declared on the entity. Never adds keys; idempotent.
pub fn sanitize(mut data: Map<String, Value>, entity: &EntityDescriptor) -> Map<String, Value> {
    data.retain(|key, _| {
        let known = entity.has_field(key);
        if !known {
            tracing::warn!(entity = %entity.name, field = %key, "dropping unknown field from payload");
        }
        known
    });
    data
}

pub fn apply_upsert_rules(data: &mut Map<String, Value>, rules: &[UpsertRule]) -> Result<(), AppError> {
    for rule in rules {
        match rule {
            UpsertRule::Slugify { field, from } => {
                if let Some(Value::String(source)) = data.get(from) {
                    let slug = slugify(source).map_err(|e| AppError::Metadata(format!("slug rule for {}: {}", field, e)))?;
                    data.insert(field.clone(), Value::String(slug));
                }
            }
        }
    }
    Ok(())
}

/// Pull relation fields out of `data` and turn them into connect directives.
///
/// `idTeam: 5` becomes `team: ConnectOne(5)`; `tags: [1, {id: 2}]` becomes
/// `tags: ConnectMany([1, 2])`. A null foreign id is left in place so it clears the link.
pub fn extract_relations(
    data: &mut Map<String, Value>,
    entity: &EntityDescriptor,
    model: &ModelMap,
) -> IndexMap<String, RelationWrite> {
    let mut writes = IndexMap::new();
    for (key, relation) in &entity.relations {
        match relation {
            RelationDescriptor::OneToMany { target, foreign_field } => {
                let Some(raw) = data.get(foreign_field) else { continue };
                if raw.is_null() {
                    continue;
                }
                let id = normalize_id(raw.clone(), model, target);
                data.remove(foreign_field);
                writes.insert(key.clone(), RelationWrite::ConnectOne(id));
            }
            RelationDescriptor::ManyToMany { target, plural_field } => {
                let Some(raw) = data.remove(plural_field) else { continue };
                match raw {
                    Value::Array(items) => {
                        let ids = collect_ids(items, model, target);
                        writes.insert(plural_field.clone(), RelationWrite::connect_many(ids));
                    }
                    other => {
                        tracing::warn!(
                            entity = %entity.name,
                            field = %plural_field,
                            value = %other,
                            "many-to-many field is not a list; ignoring"
                        );
                    }
                }
            }
        }
    }
    writes
}

/// Full create/update pre-processing after hooks: upsert rules, relations, sanitization.
pub fn prepare_payload(
    mut data: Map<String, Value>,
    entity: &EntityDescriptor,
    model: &ModelMap,
    rules: &[UpsertRule],
) -> Result<MutationPayload, AppError> {
    apply_upsert_rules(&mut data, rules)?;
    let relations = extract_relations(&mut data, entity, model);
    Ok(MutationPayload {
        fields: sanitize(data, entity),
        relations,
    })
}

/// Ids from a list of raw ids or objects carrying `id`, deduplicated in order.
pub fn collect_ids(items: Vec<Value>, model: &ModelMap, target: &str) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        let id = match item {
            Value::Object(mut obj) => match obj.remove("id") {
                Some(id) if !id.is_null() => id,
                _ => continue,
            },
            Value::Null => continue,
            other => other,
        };
        let id = normalize_id(id, model, target);
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

/// Numeric strings become numbers when the target's `id` is an integer field.
fn normalize_id(id: Value, model: &ModelMap, target: &str) -> Value {
    let int_pk = model
        .get(target)
        .and_then(|e| e.field("id"))
        .map(|f| f.field_type.is_integer())
        .unwrap_or(false);
    match id {
        Value::String(s) if int_pk => s.trim().parse::<i64>().map(Value::from).unwrap_or(Value::String(s)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{build, infer, FieldDefinition, ModelDefinition};
    use pretty_assertions::assert_eq;

    fn model() -> ModelMap {
        let f = FieldDefinition::new;
        let mut map = build(&[
            ModelDefinition::new("User", vec![f("id", "Int"), f("name", "String"), f("idTeam", "Int"), f("team", "Team")]),
            ModelDefinition::new("Team", vec![f("id", "Int"), f("users", "User").list()]),
            ModelDefinition::new(
                "Post",
                vec![f("id", "Int"), f("title", "String"), f("slug", "String"), f("tags", "Tag").list()],
            ),
            ModelDefinition::new("Tag", vec![f("id", "Int"), f("posts", "Post").list()]),
        ]);
        infer(&mut map);
        map
    }

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn one_to_many_field_becomes_connect() {
        let map = model();
        let payload = prepare_payload(
            obj(json!({"name": "Ann", "idTeam": 5})),
            map.get("user").unwrap(),
            &map,
            &[],
        ).unwrap();
        assert_eq!(payload.to_json(), json!({"name": "Ann", "team": {"connect": {"id": 5}}}));
    }

    #[test]
    fn many_to_many_list_becomes_connect_list() {
        let map = model();
        let payload = prepare_payload(obj(json!({"tags": [1, 2, 3]})), map.get("post").unwrap(), &map, &[]).unwrap();
        assert_eq!(
            payload.to_json(),
            json!({"tags": {"connect": [{"id": 1}, {"id": 2}, {"id": 3}]}})
        );

        let payload = prepare_payload(
            obj(json!({"tags": [{"id": "4"}, 4, {"name": "no id"}]})),
            map.get("post").unwrap(),
            &map,
            &[],
        ).unwrap();
        assert_eq!(payload.relations.get("tags"), Some(&RelationWrite::connect_many(vec![json!(4)])));
    }

    #[test]
    fn sanitize_only_removes_and_is_idempotent() {
        let map = model();
        let user = map.get("user").unwrap();
        let once = sanitize(obj(json!({"name": "Ann", "password": "x", "id": 3})), user);
        assert_eq!(Value::Object(once.clone()), json!({"name": "Ann", "id": 3}));
        assert_eq!(sanitize(once.clone(), user), once);
    }

    #[test]
    fn slugify_rule_derives_field() {
        let map = model();
        let rules = [UpsertRule::Slugify {
            field: "slug".into(),
            from: "title".into(),
        }];
        let payload = prepare_payload(obj(json!({"title": "Hello, Rust World"})), map.get("post").unwrap(), &map, &rules).unwrap();
        assert_eq!(payload.fields.get("slug"), Some(&json!("hello-rust-world")));
    }

    #[test]
    fn null_foreign_id_is_kept_raw() {
        let map = model();
        let payload = prepare_payload(obj(json!({"idTeam": null})), map.get("user").unwrap(), &map, &[]).unwrap();
        assert!(payload.relations.is_empty());
        assert_eq!(payload.fields.get("idTeam"), Some(&Value::Null));
    }
}
