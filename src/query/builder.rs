//! Turns a query-parameter bag into a `QuerySpec` for list and single-record reads.

use crate::error::AppError;
use crate::options::CrudOptions;
use crate::query::filter::{Condition, Direction, Filter, OrderBy, Predicate, QuerySpec};
use crate::query::params::{is_truthy, ParamValue, QueryParams};
use crate::schema::{EntityDescriptor, FieldType};
use serde_json::Value;
use std::collections::BTreeSet;

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 100;
/// Largest offset or limit a backend accepts (PostgreSQL bigint).
pub const MAX_WINDOW: u64 = i64::MAX as u64;
pub const DEFAULT_SORT_FIELD: &str = "id";
pub const FETCH_PREFIX: &str = "fetch-";

/// Parameter names that are never treated as field filters.
pub const RESERVED_PARAMS: &[&str] = &["page", "limit", "by", "order", "q", "count", "select", "include"];

/// A list query plus whether the caller only wants the total.
#[derive(Clone, Debug, PartialEq)]
pub struct ListPlan {
    pub spec: QuerySpec,
    pub count_only: bool,
}

pub fn build_list_query(entity: &EntityDescriptor, params: &QueryParams, options: &CrudOptions) -> ListPlan {
    let page = positive(params.get_str("page")).unwrap_or(DEFAULT_PAGE);
    let limit = positive(params.get_str("limit")).unwrap_or(DEFAULT_LIMIT).min(MAX_WINDOW);

    let mut derived = field_filters(entity, params);
    if let Some(q) = params.get_str("q").filter(|q| !q.is_empty()) {
        derived.any = search_predicates(entity, q, &options.queryable_fields);
    }

    let spec = QuerySpec {
        filter: derived.merged_over(&options.base_filter),
        order_by: Some(order_by(entity, params)),
        skip: (page - 1).saturating_mul(limit).min(MAX_WINDOW),
        take: Some(limit),
        include: includes(entity, params, options),
        select: select_fields(entity, params),
    };
    ListPlan {
        spec,
        count_only: params.is_truthy("count"),
    }
}

pub fn build_get_query(
    entity: &EntityDescriptor,
    id: &str,
    params: &QueryParams,
    options: &CrudOptions,
) -> Result<QuerySpec, AppError> {
    Ok(QuerySpec {
        filter: resolve_identifier(entity, id, options)?,
        order_by: None,
        skip: 0,
        take: Some(1),
        include: includes(entity, params, options),
        select: select_fields(entity, params),
    })
}

/// Filter selecting the record addressed by `id`.
///
/// Order: `resolve_where` hook, then `search_fields` (OR, integer fields only when `id`
/// is numeric), then numeric primary key, then a UUID primary key, then the `uid` field.
pub fn resolve_identifier(entity: &EntityDescriptor, id: &str, options: &CrudOptions) -> Result<Filter, AppError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(AppError::Validation("id is required".into()));
    }
    if let Some(filter) = options.resolve_where.as_ref().and_then(|h| h.resolve_where(id, entity)) {
        return Ok(filter);
    }
    let numeric = id.parse::<i64>().ok();

    if !options.search_fields.is_empty() {
        let any: Vec<Predicate> = options
            .search_fields
            .iter()
            .filter_map(|field| {
                let is_int = entity
                    .field(field)
                    .map(|f| f.field_type.is_integer())
                    .unwrap_or(false);
                let value = match (is_int, numeric) {
                    (true, Some(n)) => Value::from(n),
                    (true, None) => return None,
                    (false, _) => Value::String(id.to_string()),
                };
                Some(Predicate::Field {
                    field: field.clone(),
                    condition: Condition::Equals(value),
                })
            })
            .collect();
        if any.is_empty() {
            return Err(AppError::Metadata(format!(
                "no search field of {} can match '{}'",
                entity.name, id
            )));
        }
        return Ok(Filter::any_of(any));
    }

    if let Some(n) = numeric {
        return Ok(Filter::eq("id", n));
    }
    let uuid_key = entity.field("id").map(|f| f.field_type == FieldType::Uuid).unwrap_or(false);
    if uuid_key && uuid::Uuid::parse_str(id).is_ok() {
        return Ok(Filter::eq("id", id));
    }
    if entity.has_field("uid") {
        return Ok(Filter::eq("uid", id));
    }
    Err(AppError::Metadata(format!(
        "{} has no uid field to resolve '{}'",
        entity.name, id
    )))
}

fn positive(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|s| s.trim().parse::<u64>().ok()).filter(|n| *n >= 1)
}

fn order_by(entity: &EntityDescriptor, params: &QueryParams) -> OrderBy {
    let requested = params.get_str("by").filter(|s| !s.is_empty()).unwrap_or(DEFAULT_SORT_FIELD);
    let field = if entity.fields.is_empty() || entity.has_field(requested) {
        requested
    } else {
        tracing::warn!(entity = %entity.name, field = %requested, "unknown sort field; using default");
        DEFAULT_SORT_FIELD
    };
    let direction = params
        .get_str("order")
        .and_then(Direction::parse)
        .unwrap_or(Direction::Desc);
    OrderBy {
        field: field.to_string(),
        direction,
    }
}

/// Equality / one-of / contains-all filters from params named after declared columns.
fn field_filters(entity: &EntityDescriptor, params: &QueryParams) -> Filter {
    let mut filter = Filter::new();
    for (key, value) in params.iter() {
        if RESERVED_PARAMS.contains(&key) || key.starts_with(FETCH_PREFIX) {
            continue;
        }
        let Some(field) = entity.field(key).filter(|f| f.is_column()) else {
            continue;
        };
        let ty = &field.field_type;
        let condition = match value {
            ParamValue::List(values) => Condition::In(values.iter().map(|v| ty.coerce(v)).collect()),
            ParamValue::Single(s) if s.contains(',') => Condition::In(split(ty, s, ',')),
            ParamValue::Single(s) if s.contains('|') => Condition::HasEvery(split(ty, s, '|')),
            ParamValue::Single(s) => Condition::Equals(ty.coerce(s)),
        };
        filter.conditions.insert(key.to_string(), condition);
    }
    filter
}

fn split(ty: &FieldType, s: &str, sep: char) -> Vec<Value> {
    s.split(sep)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| ty.coerce(p))
        .collect()
}

/// OR across queryable fields (contains) plus primary key equality when `q` is an integer.
fn search_predicates(entity: &EntityDescriptor, q: &str, queryable: &[String]) -> Vec<Predicate> {
    if queryable.is_empty() {
        return Vec::new();
    }
    let mut any = Vec::new();
    for path in queryable {
        match path.split_once('.') {
            Some((relation, field)) => {
                if entity.relation_by_accessor(relation).is_none() && !entity.inverse.contains_key(relation) {
                    tracing::warn!(entity = %entity.name, field = %path, "search path does not name a relation");
                    continue;
                }
                any.push(Predicate::Related {
                    relation: relation.to_string(),
                    field: field.to_string(),
                    condition: Condition::Contains(q.to_string()),
                });
            }
            None => {
                if entity.field(path).map(|f| f.is_column()).unwrap_or(false) {
                    any.push(Predicate::Field {
                        field: path.clone(),
                        condition: Condition::Contains(q.to_string()),
                    });
                }
            }
        }
    }
    if let Ok(n) = q.trim().parse::<i64>() {
        if entity.has_field("id") {
            any.push(Predicate::Field {
                field: "id".into(),
                condition: Condition::Equals(Value::from(n)),
            });
        }
    }
    any
}

/// `select=a,b`; undeclared fields are dropped with a warning.
fn select_fields(entity: &EntityDescriptor, params: &QueryParams) -> Option<BTreeSet<String>> {
    let raw = params.get_str("select").filter(|s| !s.trim().is_empty())?;
    let mut out = BTreeSet::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if entity.has_field(name) {
            out.insert(name.to_string());
        } else {
            tracing::warn!(entity = %entity.name, field = %name, "dropping unknown select field");
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Option includes, `include=a,b`, plus every truthy `fetch-<name>` naming a loadable accessor.
fn includes(entity: &EntityDescriptor, params: &QueryParams, options: &CrudOptions) -> BTreeSet<String> {
    let mut out = options.include.clone();
    if let Some(raw) = params.get_str("include") {
        out.extend(raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from));
    }
    for (key, value) in params.iter() {
        let Some(name) = key.strip_prefix(FETCH_PREFIX) else { continue };
        if !is_truthy(value.first()) {
            continue;
        }
        if entity.is_loadable(name) {
            out.insert(name.to_string());
        } else {
            tracing::warn!(entity = %entity.name, relation = %name, "ignoring fetch of unknown relation");
        }
    }
    out
}
