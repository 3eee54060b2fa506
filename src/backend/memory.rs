//! In-process storage backend.
//!
//! Rows are JSON objects per entity; many-to-many links live in a set per entity pair.
//! Every call is appended to an operation log so tests can assert exactly what the CRUD
//! layer asked the storage layer to do.

use crate::backend::StorageBackend;
use crate::error::BackendError;
use crate::mutation::{MutationPayload, RelationWrite};
use crate::query::{Condition, Direction, Filter, Predicate, QuerySpec};
use crate::schema::{EntityDescriptor, ModelMap, RelationDescriptor};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// One recorded backend call.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendOp {
    Count { entity: String, filter: Filter },
    FindMany { entity: String, query: QuerySpec },
    FindFirst { entity: String, query: QuerySpec },
    Create { entity: String, payload: Value },
    Update { entity: String, filter: Filter, payload: Value },
    Delete { entity: String, filter: Filter },
}

type Row = Map<String, Value>;

#[derive(Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
    next_id: HashMap<String, i64>,
    /// (entity, entity) sorted pair -> linked (id, id) keys in the same order.
    links: HashMap<(String, String), HashSet<(String, String)>>,
}

pub struct MemoryBackend {
    model: Arc<ModelMap>,
    tables: Mutex<Tables>,
    ops_log: Mutex<Vec<BackendOp>>,
}

impl MemoryBackend {
    pub fn new(model: Arc<ModelMap>) -> Self {
        MemoryBackend {
            model,
            tables: Mutex::new(Tables::default()),
            ops_log: Mutex::new(Vec::new()),
        }
    }

    pub fn ops(&self) -> Vec<BackendOp> {
        self.ops_log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_ops(&self) {
        self.ops_log.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn record(&self, op: BackendOp) {
        self.ops_log.lock().unwrap_or_else(|e| e.into_inner()).push(op);
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn entity(&self, name: &str) -> Result<&EntityDescriptor, BackendError> {
        self.model
            .get(name)
            .ok_or_else(|| BackendError::other("unknown_model", format!("unknown model '{}'", name)))
    }
}

fn id_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => id_key(a) == id_key(b),
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

fn condition_matches(value: Option<&Value>, condition: &Condition) -> bool {
    let value = value.unwrap_or(&Value::Null);
    match condition {
        Condition::Equals(expected) => match value {
            Value::Array(items) if !expected.is_array() => items.iter().any(|i| loose_eq(i, expected)),
            _ => loose_eq(value, expected),
        },
        Condition::In(options) => match value {
            Value::Array(items) => options.iter().any(|o| items.iter().any(|i| loose_eq(i, o))),
            _ => options.iter().any(|o| loose_eq(value, o)),
        },
        Condition::Contains(needle) => {
            let hay = match value {
                Value::String(s) => s.to_lowercase(),
                Value::Null => return false,
                other => other.to_string().to_lowercase(),
            };
            hay.contains(&needle.to_lowercase())
        }
        Condition::HasEvery(required) => match value {
            Value::Array(items) => required.iter().all(|r| items.iter().any(|i| loose_eq(i, r))),
            _ => false,
        },
    }
}

fn link_pair(a: &str, b: &str) -> ((String, String), bool) {
    if a <= b {
        ((a.to_string(), b.to_string()), false)
    } else {
        ((b.to_string(), a.to_string()), true)
    }
}

impl Tables {
    fn table(&self, entity: &str) -> &[Row] {
        self.rows.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    fn find_by_id(&self, entity: &str, id: &Value) -> Option<&Row> {
        let key = id_key(id);
        self.table(entity)
            .iter()
            .find(|r| r.get("id").map(|v| id_key(v) == key).unwrap_or(false))
    }

    fn linked_ids(&self, owner: &str, owner_id: &Value, target: &str) -> Vec<String> {
        let (pair, swapped) = link_pair(owner, target);
        let key = id_key(owner_id);
        let mut ids: Vec<String> = self
            .links
            .get(&pair)
            .map(|set| {
                set.iter()
                    .filter_map(|(x, y)| {
                        let (mine, theirs) = if swapped { (y, x) } else { (x, y) };
                        (*mine == key).then(|| theirs.clone())
                    })
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn set_link(&mut self, owner: &str, owner_id: &Value, target: &str, target_id: &Value, linked: bool) {
        let (pair, swapped) = link_pair(owner, target);
        let (mine, theirs) = (id_key(owner_id), id_key(target_id));
        let entry = if swapped { (theirs, mine) } else { (mine, theirs) };
        let set = self.links.entry(pair).or_default();
        if linked {
            set.insert(entry);
        } else {
            set.remove(&entry);
        }
    }

    /// Rows reachable from `row` through `accessor`; `None` when the accessor is not a relation.
    fn related(&self, entity: &EntityDescriptor, row: &Row, accessor: &str) -> Option<Vec<Row>> {
        if let Some((_, relation)) = entity.relation_by_accessor(accessor) {
            return Some(match relation {
                RelationDescriptor::OneToMany { target, foreign_field } => row
                    .get(foreign_field)
                    .and_then(|id| self.find_by_id(target, id))
                    .cloned()
                    .into_iter()
                    .collect(),
                RelationDescriptor::ManyToMany { target, .. } => {
                    let id = row.get("id").cloned().unwrap_or(Value::Null);
                    self.linked_ids(&entity.name, &id, target)
                        .iter()
                        .filter_map(|k| self.find_by_id(target, &Value::String(k.clone())).cloned())
                        .collect()
                }
            });
        }
        let inverse = entity.inverse.get(accessor)?;
        let id = row.get("id")?;
        Some(
            self.table(&inverse.source)
                .iter()
                .filter(|r| r.get(&inverse.foreign_field).map(|v| loose_eq(v, id)).unwrap_or(false))
                .cloned()
                .collect(),
        )
    }

    fn matches(&self, entity: &EntityDescriptor, row: &Row, filter: &Filter) -> bool {
        let all = filter
            .conditions
            .iter()
            .all(|(field, c)| condition_matches(row.get(field), c));
        all && (filter.any.is_empty() || filter.any.iter().any(|p| self.predicate_matches(entity, row, p)))
    }

    fn predicate_matches(&self, entity: &EntityDescriptor, row: &Row, predicate: &Predicate) -> bool {
        match predicate {
            Predicate::Field { field, condition } => condition_matches(row.get(field), condition),
            Predicate::Related {
                relation,
                field,
                condition,
            } => self
                .related(entity, row, relation)
                .map(|rows| rows.iter().any(|r| condition_matches(r.get(field), condition)))
                .unwrap_or(false),
        }
    }

    fn matching(&self, entity: &EntityDescriptor, filter: &Filter) -> Vec<Row> {
        self.table(&entity.name)
            .iter()
            .filter(|r| self.matches(entity, r, filter))
            .cloned()
            .collect()
    }

    fn position(&self, entity: &EntityDescriptor, filter: &Filter) -> Option<usize> {
        self.table(&entity.name)
            .iter()
            .position(|r| self.matches(entity, r, filter))
    }

    fn shape(&self, entity: &EntityDescriptor, row: &Row, query: &QuerySpec) -> Value {
        let mut out: Row = match &query.select {
            Some(fields) => row
                .iter()
                .filter(|(k, _)| fields.contains(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => row.clone(),
        };
        for accessor in &query.include {
            let Some(rows) = self.related(entity, row, accessor) else { continue };
            let to_one = matches!(
                entity.relation_by_accessor(accessor),
                Some((_, RelationDescriptor::OneToMany { .. }))
            );
            let value = if to_one {
                rows.into_iter().next().map(Value::Object).unwrap_or(Value::Null)
            } else {
                Value::Array(rows.into_iter().map(Value::Object).collect())
            };
            out.insert(accessor.clone(), value);
        }
        Value::Object(out)
    }

    fn check_unique(&self, entity: &EntityDescriptor, row: &Row, skip: Option<usize>) -> Result<(), BackendError> {
        let unique: Vec<&str> = entity
            .fields
            .values()
            .filter(|f| f.is_unique || f.name == "id")
            .map(|f| f.name.as_str())
            .collect();
        for (i, other) in self.table(&entity.name).iter().enumerate() {
            if Some(i) == skip {
                continue;
            }
            for field in &unique {
                if let (Some(a), Some(b)) = (row.get(*field), other.get(*field)) {
                    if !a.is_null() && loose_eq(a, b) {
                        return Err(BackendError::unique(format!(
                            "Unique constraint failed on the fields: (`{}`)",
                            field
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply relation writes for `row` (already holding its id). One-to-many sets the owning field.
    /// Every write is checked before any link changes, so a failed write leaves the links as they were.
    fn apply_relations(
        &mut self,
        entity: &EntityDescriptor,
        row: &mut Row,
        relations: &indexmap::IndexMap<String, RelationWrite>,
    ) -> Result<(), BackendError> {
        let row_id = row.get("id").cloned().unwrap_or(Value::Null);
        let mut links = Vec::new();
        for (accessor, write) in relations {
            let Some((_, relation)) = entity.relation_by_accessor(accessor) else {
                return Err(BackendError::other(
                    "unknown_relation",
                    format!("unknown relation '{}' on {}", accessor, entity.name),
                ));
            };
            match (relation, write) {
                (RelationDescriptor::OneToMany { target, foreign_field }, RelationWrite::ConnectOne(id)) => {
                    if self.find_by_id(target, id).is_none() {
                        return Err(BackendError::not_found(format!("{} {} to connect not found", target, id)));
                    }
                    row.insert(foreign_field.clone(), id.clone());
                }
                (RelationDescriptor::ManyToMany { target, .. }, RelationWrite::ConnectMany { connect, disconnect }) => {
                    if let Some(id) = connect.iter().find(|id| self.find_by_id(target, id).is_none()) {
                        return Err(BackendError::not_found(format!("{} {} to connect not found", target, id)));
                    }
                    links.push((target, connect, disconnect));
                }
                _ => {
                    return Err(BackendError::other(
                        "relation_kind",
                        format!("write does not fit relation '{}'", accessor),
                    ))
                }
            }
        }
        for (target, connect, disconnect) in links {
            for id in disconnect {
                self.set_link(&entity.name, &row_id, target, id, false);
            }
            for id in connect {
                self.set_link(&entity.name, &row_id, target, id, true);
            }
        }
        Ok(())
    }

    fn unlink_all(&mut self, entity: &str, id: &Value) {
        let key = id_key(id);
        for ((a, b), set) in self.links.iter_mut() {
            if a == entity {
                set.retain(|(x, _)| *x != key);
            }
            if b == entity {
                set.retain(|(_, y)| *y != key);
            }
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn count(&self, entity: &str, filter: &Filter) -> Result<u64, BackendError> {
        self.record(BackendOp::Count {
            entity: entity.to_string(),
            filter: filter.clone(),
        });
        let descriptor = self.entity(entity)?;
        Ok(self.tables().matching(descriptor, filter).len() as u64)
    }

    async fn find_many(&self, entity: &str, query: &QuerySpec) -> Result<Vec<Value>, BackendError> {
        self.record(BackendOp::FindMany {
            entity: entity.to_string(),
            query: query.clone(),
        });
        let descriptor = self.entity(entity)?;
        let tables = self.tables();
        let mut rows = tables.matching(descriptor, &query.filter);
        if let Some(order) = &query.order_by {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.field), b.get(&order.field));
                match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }
        let take = query.take.map(|t| t as usize).unwrap_or(usize::MAX);
        Ok(rows
            .iter()
            .skip(query.skip as usize)
            .take(take)
            .map(|r| tables.shape(descriptor, r, query))
            .collect())
    }

    async fn find_first(&self, entity: &str, query: &QuerySpec) -> Result<Option<Value>, BackendError> {
        self.record(BackendOp::FindFirst {
            entity: entity.to_string(),
            query: query.clone(),
        });
        let descriptor = self.entity(entity)?;
        let tables = self.tables();
        Ok(tables
            .matching(descriptor, &query.filter)
            .first()
            .map(|r| tables.shape(descriptor, r, query)))
    }

    async fn create(&self, entity: &str, payload: &MutationPayload) -> Result<Value, BackendError> {
        self.record(BackendOp::Create {
            entity: entity.to_string(),
            payload: payload.to_json(),
        });
        let descriptor = self.entity(entity)?;
        let mut tables = self.tables();
        let mut row = payload.fields.clone();
        if descriptor.has_field("id") && !row.contains_key("id") {
            let next = tables.next_id.entry(entity.to_string()).or_insert(0);
            *next += 1;
            row.insert("id".into(), Value::from(*next));
        }
        tables.check_unique(descriptor, &row, None)?;
        tables.apply_relations(descriptor, &mut row, &payload.relations)?;
        tables.rows.entry(entity.to_string()).or_default().push(row.clone());
        Ok(Value::Object(row))
    }

    async fn update(&self, entity: &str, filter: &Filter, payload: &MutationPayload) -> Result<Value, BackendError> {
        self.record(BackendOp::Update {
            entity: entity.to_string(),
            filter: filter.clone(),
            payload: payload.to_json(),
        });
        let descriptor = self.entity(entity)?;
        let mut tables = self.tables();
        let index = tables
            .position(descriptor, filter)
            .ok_or_else(|| BackendError::not_found("Record to update not found."))?;
        let mut row = tables.table(entity)[index].clone();
        for (k, v) in payload.fields.iter().filter(|(k, _)| k.as_str() != "id") {
            row.insert(k.clone(), v.clone());
        }
        tables.check_unique(descriptor, &row, Some(index))?;
        tables.apply_relations(descriptor, &mut row, &payload.relations)?;
        if let Some(rows) = tables.rows.get_mut(entity) {
            rows[index] = row.clone();
        }
        Ok(Value::Object(row))
    }

    async fn delete(&self, entity: &str, filter: &Filter) -> Result<Value, BackendError> {
        self.record(BackendOp::Delete {
            entity: entity.to_string(),
            filter: filter.clone(),
        });
        let descriptor = self.entity(entity)?;
        let mut tables = self.tables();
        let index = tables
            .position(descriptor, filter)
            .ok_or_else(|| BackendError::not_found("Record to delete does not exist."))?;
        let row = match tables.rows.get_mut(entity) {
            Some(rows) => rows.remove(index),
            None => return Err(BackendError::not_found("Record to delete does not exist.")),
        };
        if let Some(id) = row.get("id") {
            tables.unlink_all(entity, id);
        }
        Ok(Value::Object(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::OrderBy;
    use crate::schema::{build, infer, FieldDefinition, ModelDefinition};
    use serde_json::json;

    fn backend() -> MemoryBackend {
        let f = FieldDefinition::new;
        let mut map = build(&[
            ModelDefinition::new("Post", vec![f("id", "Int"), f("title", "String").unique(), f("tags", "Tag").list()]),
            ModelDefinition::new("Tag", vec![f("id", "Int"), f("name", "String"), f("posts", "Post").list()]),
        ]);
        infer(&mut map);
        MemoryBackend::new(Arc::new(map))
    }

    fn fields(v: Value) -> MutationPayload {
        match v {
            Value::Object(m) => MutationPayload::from_fields(m),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn links_are_visible_from_both_sides() {
        let db = backend();
        db.create("tag", &fields(json!({"name": "rust"}))).await.unwrap();
        let mut payload = fields(json!({"title": "hello"}));
        payload
            .relations
            .insert("tags".into(), RelationWrite::connect_many(vec![json!(1)]));
        db.create("post", &payload).await.unwrap();

        let mut q = QuerySpec::filtered(Filter::eq("id", 1));
        q.include.insert("posts".into());
        let tag = db.find_first("tag", &q).await.unwrap().unwrap();
        assert_eq!(tag["posts"][0]["title"], json!("hello"));
    }

    #[tokio::test]
    async fn unique_fields_conflict() {
        let db = backend();
        db.create("post", &fields(json!({"title": "a"}))).await.unwrap();
        let err = db.create("post", &fields(json!({"title": "a"}))).await.unwrap_err();
        assert_eq!(err.kind, crate::error::BackendErrorKind::UniqueViolation);
    }

    #[tokio::test]
    async fn sort_skip_take() {
        let db = backend();
        for name in ["b", "c", "a"] {
            db.create("tag", &fields(json!({ "name": name }))).await.unwrap();
        }
        let q = QuerySpec {
            order_by: Some(OrderBy {
                field: "name".into(),
                direction: Direction::Asc,
            }),
            skip: 1,
            take: Some(1),
            ..Default::default()
        };
        let rows = db.find_many("tag", &q).await.unwrap();
        assert_eq!(rows, vec![json!({"id": 1, "name": "b"})]);
    }

    fn tagged(title: &str, ids: Vec<Value>) -> MutationPayload {
        let mut payload = fields(json!({ "title": title }));
        payload.relations.insert("tags".into(), RelationWrite::connect_many(ids));
        payload
    }

    async fn tag_ids(db: &MemoryBackend, post: i64) -> Vec<Value> {
        let mut q = QuerySpec::filtered(Filter::eq("id", post));
        q.include.insert("tags".into());
        let post = db.find_first("post", &q).await.unwrap().unwrap();
        post["tags"].as_array().unwrap().iter().map(|t| t["id"].clone()).collect()
    }

    #[tokio::test]
    async fn failed_link_write_changes_nothing() {
        let db = backend();
        for name in ["a", "b"] {
            db.create("tag", &fields(json!({ "name": name }))).await.unwrap();
        }
        db.create("post", &tagged("hello", vec![json!(1)])).await.unwrap();

        let err = db
            .update("post", &Filter::eq("id", 1), &tagged("changed", vec![json!(2), json!(99)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::BackendErrorKind::NotFound);
        assert_eq!(tag_ids(&db, 1).await, vec![json!(1)]);
        let post = db.find_first("post", &QuerySpec::filtered(Filter::eq("id", 1))).await.unwrap().unwrap();
        assert_eq!(post["title"], json!("hello"));

        db.create("post", &tagged("other", vec![json!(2), json!(99)])).await.unwrap_err();
        let mut q = QuerySpec::filtered(Filter::eq("id", 2));
        q.include.insert("posts".into());
        let tag = db.find_first("tag", &q).await.unwrap().unwrap();
        assert_eq!(tag["posts"], json!([]));
    }

    #[test]
    fn scalar_conditions_on_lists_test_membership() {
        let labels = json!(["rust", "axum"]);
        assert!(condition_matches(Some(&labels), &Condition::Equals(json!("rust"))));
        assert!(!condition_matches(Some(&labels), &Condition::Equals(json!("go"))));
        assert!(condition_matches(Some(&labels), &Condition::In(vec![json!("go"), json!("axum")])));
    }

    #[tokio::test]
    async fn update_keeps_the_primary_key() {
        let db = backend();
        db.create("tag", &fields(json!({"name": "a"}))).await.unwrap();
        let row = db
            .update("tag", &Filter::eq("id", 1), &fields(json!({"id": 7, "name": "b"})))
            .await
            .unwrap();
        assert_eq!(row, json!({"id": 1, "name": "b"}));
    }

    #[tokio::test]
    async fn missing_rows_report_not_found() {
        let db = backend();
        let err = db.delete("tag", &Filter::eq("id", 3)).await.unwrap_err();
        assert_eq!(err.kind, crate::error::BackendErrorKind::NotFound);
        assert_eq!(db.ops().len(), 1);
    }
}
