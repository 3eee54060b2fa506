mod common;

use pretty_assertions::assert_eq;
use relcrud::backend::BackendOp;
use relcrud::options::{FilterAllQuery, FilterCreateData, UpsertRule};
use relcrud::query::{Condition, Filter};
use relcrud::schema::EntityDescriptor;
use relcrud::{AppError, CrudOptions, QueryParams, QuerySpec};
use serde_json::{json, Map, Value};

fn params(pairs: &[(&str, &str)]) -> QueryParams {
    QueryParams::from_pairs(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
}

fn last_write(ops: &[BackendOp]) -> Option<Value> {
    ops.iter().rev().find_map(|op| match op {
        BackendOp::Create { payload, .. } | BackendOp::Update { payload, .. } => Some(payload.clone()),
        _ => None,
    })
}

#[tokio::test]
async fn create_turns_foreign_id_into_connect() {
    let (service, backend) = common::service();
    let none = CrudOptions::new();
    service.create("team", json!({"id": 5, "name": "Core"}), &none).await.unwrap();
    backend.clear_ops();

    let user = service
        .create("user", json!({"name": "Ann", "idTeam": 5, "nickname": "a"}), &none)
        .await
        .unwrap();
    assert_eq!(
        last_write(&backend.ops()),
        Some(json!({"name": "Ann", "team": {"connect": {"id": 5}}}))
    );
    assert_eq!(user["idTeam"], json!(5));
}

#[tokio::test]
async fn update_reconciles_many_to_many_links() {
    let (service, backend) = common::service();
    let none = CrudOptions::new();
    for name in ["a", "b", "c", "d"] {
        service.create("tag", json!({ "name": name }), &none).await.unwrap();
    }
    service
        .create("post", json!({"title": "hello", "tags": [1, 2, 3]}), &none)
        .await
        .unwrap();
    assert_eq!(
        last_write(&backend.ops()),
        Some(json!({"title": "hello", "tags": {"connect": [{"id": 1}, {"id": 2}, {"id": 3}]}}))
    );

    service
        .update("post", "1", json!({"tags": [2, 3, 4]}), &none)
        .await
        .unwrap();
    assert_eq!(
        last_write(&backend.ops()),
        Some(json!({"tags": {"connect": [{"id": 4}], "disconnect": [{"id": 1}]}}))
    );

    let post = service
        .get_one("post", "1", &params(&[("fetch-tags", "1")]), &none)
        .await
        .unwrap()
        .unwrap();
    let ids: Vec<Value> = post["tags"].as_array().unwrap().iter().map(|t| t["id"].clone()).collect();
    assert_eq!(ids, vec![json!(2), json!(3), json!(4)]);
}

#[tokio::test]
async fn failed_update_leaves_links_untouched() {
    let (service, _) = common::service();
    let none = CrudOptions::new();
    for name in ["a", "b"] {
        service.create("tag", json!({ "name": name }), &none).await.unwrap();
    }
    service
        .create("post", json!({"title": "hello", "tags": [1]}), &none)
        .await
        .unwrap();

    let err = service
        .update("post", "1", json!({"tags": [2, 99]}), &none)
        .await
        .unwrap_err();
    assert!(matches!(&err, AppError::NotFound(m) if m.contains("tag 99")));

    let post = service
        .get_one("post", "1", &params(&[("fetch-tags", "1")]), &none)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(post["tags"], json!([{"id": 1, "name": "a"}]));
}

#[tokio::test]
async fn count_ignores_pagination() {
    let (service, _) = common::service();
    let none = CrudOptions::new();
    for title in ["one", "two", "three"] {
        service.create("post", json!({ "title": title }), &none).await.unwrap();
    }
    let small = service.list("post", &params(&[("limit", "1")]), &none).await.unwrap();
    let large = service.list("post", &params(&[("limit", "1000")]), &none).await.unwrap();
    assert_eq!(small.data.len(), 1);
    assert_eq!(small.count, 3);
    assert_eq!(large.count, small.count);
    assert_eq!(large.data.len(), 3);

    let only = service.list("post", &params(&[("count", "1")]), &none).await.unwrap();
    assert!(only.data.is_empty());
    assert_eq!(only.count, 3);
}

#[tokio::test]
async fn list_sorts_pages_and_searches() {
    let (service, _) = common::service();
    let none = CrudOptions::new();
    for title in ["Rust tips", "Go notes", "rust macros"] {
        service.create("post", json!({ "title": title }), &none).await.unwrap();
    }
    let page = service
        .list("post", &params(&[("by", "title"), ("order", "asc"), ("page", "2"), ("limit", "1")]), &none)
        .await
        .unwrap();
    assert_eq!(page.data[0]["title"], json!("Rust tips"));

    let searchable = CrudOptions::new().queryable_fields(["title"]);
    let found = service.list("post", &params(&[("q", "RUST")]), &searchable).await.unwrap();
    assert_eq!(found.count, 2);
}

#[tokio::test]
async fn get_one_resolves_numeric_and_slug_identifiers() {
    let (service, backend) = common::service();
    let none = CrudOptions::new();
    backend.clear_ops();
    assert_eq!(service.get_one("user", "42", &QueryParams::new(), &none).await.unwrap(), None);
    service.get_one("user", "abc-slug", &QueryParams::new(), &none).await.unwrap();

    let filters: Vec<Filter> = backend
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            BackendOp::FindFirst { query, .. } => Some(query.filter),
            _ => None,
        })
        .collect();
    assert_eq!(filters, vec![Filter::eq("id", 42), Filter::eq("uid", "abc-slug")]);
}

#[tokio::test]
async fn unique_violation_maps_to_conflict() {
    let (service, _) = common::service();
    let none = CrudOptions::new();
    service.create("user", json!({"email": "a@x.io"}), &none).await.unwrap();
    let err = service.create("user", json!({"email": "a@x.io"}), &none).await.unwrap_err();
    assert!(matches!(&err, AppError::Conflict(m) if m == "user already exists"));
}

#[tokio::test]
async fn connect_to_missing_record_is_not_found() {
    let (service, _) = common::service();
    let err = service
        .create("user", json!({"name": "Ann", "idTeam": 99}), &CrudOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn update_metas_merges_shallowly() {
    let (service, _) = common::service();
    let none = CrudOptions::new();
    service
        .create("user", json!({"name": "Ann", "metas": {"a": 1, "b": {"x": 1}}}), &none)
        .await
        .unwrap();
    let user = service
        .update_metas("user", "1", json!({"b": {"y": 2}, "c": 3}), &none)
        .await
        .unwrap();
    assert_eq!(user["metas"], json!({"a": 1, "b": {"y": 2}, "c": 3}));
    assert_eq!(user["name"], json!("Ann"));

    let err = service.update_metas("post", "1", json!({}), &none).await.unwrap_err();
    assert!(matches!(err, AppError::Metadata(_)));
}

#[tokio::test]
async fn delete_returns_the_removed_record() {
    let (service, _) = common::service();
    let none = CrudOptions::new();
    service.create("tag", json!({"name": "old"}), &none).await.unwrap();
    let removed = service.delete("tag", "1", &none).await.unwrap();
    assert_eq!(removed["name"], json!("old"));
    let err = service.delete("tag", "1", &none).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

struct Stamp;

#[async_trait::async_trait]
impl FilterCreateData for Stamp {
    async fn filter_create_data(
        &self,
        mut data: Map<String, Value>,
        _entity: &EntityDescriptor,
    ) -> Result<Map<String, Value>, AppError> {
        data.insert("uid".into(), json!("stamped"));
        Ok(data)
    }
}

struct OnlyTeam(i64);

#[async_trait::async_trait]
impl FilterAllQuery for OnlyTeam {
    async fn filter_all_query(&self, _params: &QueryParams, built: QuerySpec) -> Result<QuerySpec, AppError> {
        let filter = Filter::eq("idTeam", self.0).merged_over(&built.filter);
        Ok(QuerySpec { filter, ..built })
    }
}

#[tokio::test]
async fn hooks_shape_payloads_and_queries() {
    let (service, _) = common::service();
    let none = CrudOptions::new();
    for id in [1, 2] {
        service.create("team", json!({ "id": id, "name": "t" }), &none).await.unwrap();
    }
    let stamping = CrudOptions::new().on_create_data(Stamp);
    let ann = service
        .create("user", json!({"name": "Ann", "idTeam": 1}), &stamping)
        .await
        .unwrap();
    assert_eq!(ann["uid"], json!("stamped"));
    service.create("user", json!({"name": "Bob", "idTeam": 2}), &none).await.unwrap();

    let scoped = CrudOptions::new().on_all_query(OnlyTeam(2));
    let result = service.list("user", &QueryParams::new(), &scoped).await.unwrap();
    assert_eq!(result.count, 1);
    assert_eq!(result.data[0]["name"], json!("Bob"));

    let by_uid = service.get_one("user", "stamped", &QueryParams::new(), &none).await.unwrap();
    assert_eq!(by_uid.map(|u| u["name"].clone()), Some(json!("Ann")));
}

#[tokio::test]
async fn upsert_rule_and_base_filter() {
    let (service, _) = common::service();
    let options = CrudOptions::new().upsert_rule(UpsertRule::Slugify {
        field: "slug".into(),
        from: "title".into(),
    });
    let post = service.create("post", json!({"title": "Hello World!"}), &options).await.unwrap();
    assert_eq!(post["slug"], json!("hello-world"));
    service.create("post", json!({"title": "Draft"}), &options).await.unwrap();

    let hidden = CrudOptions::new().base_filter(Filter::new().with("slug", Condition::Equals(json!("draft"))));
    let result = service.list("post", &QueryParams::new(), &hidden).await.unwrap();
    assert_eq!(result.count, 1);
}

#[tokio::test]
async fn inverse_relation_loads_on_the_target() {
    let (service, _) = common::service();
    let none = CrudOptions::new();
    service.create("team", json!({"name": "Core"}), &none).await.unwrap();
    service.create("user", json!({"name": "Ann", "idTeam": 1}), &none).await.unwrap();
    let team = service
        .get_one("team", "1", &params(&[("fetch-users", "true")]), &none)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(team["users"][0]["name"], json!("Ann"));

    let user = service
        .get_one("user", "1", &params(&[("fetch-team", "1")]), &none)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user["team"]["name"], json!("Core"));
}
