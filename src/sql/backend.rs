//! PostgreSQL storage backend on sqlx.

use crate::backend::StorageBackend;
use crate::error::BackendError;
use crate::mutation::{MutationPayload, RelationWrite};
use crate::query::{Filter, QuerySpec};
use crate::schema::{EntityDescriptor, ModelMap, RelationDescriptor};
use crate::sql::builder::{QueryBuf, SqlCompiler};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Column, PgConnection, PgPool, Postgres, Row, TypeInfo};
use std::sync::Arc;

pub struct PgBackend {
    pool: PgPool,
    model: Arc<ModelMap>,
    schema: String,
}

impl PgBackend {
    pub fn new(pool: PgPool, model: Arc<ModelMap>, schema: impl Into<String>) -> Self {
        PgBackend {
            pool,
            model,
            schema: schema.into(),
        }
    }

    fn compiler(&self) -> SqlCompiler<'_> {
        SqlCompiler::new(&self.model, &self.schema)
    }

    fn entity(&self, name: &str) -> Result<&EntityDescriptor, BackendError> {
        self.model
            .get(name)
            .ok_or_else(|| BackendError::other("unknown_model", format!("unknown model '{}'", name)))
    }

    /// Write scalar fields and relations in one transaction; returns the written row.
    async fn write(
        &self,
        entity: &EntityDescriptor,
        filter: Option<&Filter>,
        payload: &MutationPayload,
    ) -> Result<Value, BackendError> {
        let mut fields = payload.fields.clone();
        let mut links = Vec::new();
        for (accessor, write) in &payload.relations {
            let Some((_, relation)) = entity.relation_by_accessor(accessor) else {
                return Err(BackendError::other(
                    "unknown_relation",
                    format!("unknown relation '{}' on {}", accessor, entity.name),
                ));
            };
            match (relation, write) {
                (RelationDescriptor::OneToMany { foreign_field, .. }, RelationWrite::ConnectOne(id)) => {
                    fields.insert(foreign_field.clone(), id.clone());
                }
                (RelationDescriptor::ManyToMany { target, .. }, RelationWrite::ConnectMany { connect, disconnect }) => {
                    links.push((self.entity(target)?, connect, disconnect));
                }
                _ => {
                    return Err(BackendError::other(
                        "relation_kind",
                        format!("write does not fit relation '{}'", accessor),
                    ))
                }
            }
        }

        let sql = self.compiler();
        let statement = match filter {
            Some(filter) => sql.update(entity, filter, &fields),
            None => sql.insert(entity, &fields),
        };
        let mut tx = self.pool.begin().await?;
        let row = fetch_optional(&mut tx, &statement)
            .await?
            .ok_or_else(|| BackendError::not_found("Record to update not found."))?;
        let id = row.get("id").cloned().unwrap_or(Value::Null);
        for (target, connect, disconnect) in links {
            if !disconnect.is_empty() {
                execute(&mut tx, &sql.unlink(entity, target, &id, disconnect)).await?;
            }
            if !connect.is_empty() {
                execute(&mut tx, &sql.link(entity, target, &id, connect)).await?;
            }
        }
        tx.commit().await?;
        Ok(row)
    }
}

fn query(q: &QueryBuf) -> sqlx::query::Query<'_, Postgres, PgArguments> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(p.clone());
    }
    query
}

async fn fetch_optional(conn: &mut PgConnection, q: &QueryBuf) -> Result<Option<Value>, BackendError> {
    let row = query(q).fetch_optional(conn).await?;
    Ok(row.map(|r| row_to_json(&r)))
}

async fn execute(conn: &mut PgConnection, q: &QueryBuf) -> Result<u64, BackendError> {
    Ok(query(q).execute(conn).await?.rows_affected())
}

#[async_trait]
impl StorageBackend for PgBackend {
    async fn count(&self, entity: &str, filter: &Filter) -> Result<u64, BackendError> {
        let entity = self.entity(entity)?;
        let q = self.compiler().count(entity, filter);
        let row = query(&q).fetch_one(&self.pool).await?;
        let n: i64 = row.try_get(0)?;
        Ok(n.max(0) as u64)
    }

    async fn find_many(&self, entity: &str, spec: &QuerySpec) -> Result<Vec<Value>, BackendError> {
        let entity = self.entity(entity)?;
        let q = self.compiler().select(entity, spec);
        let rows = query(&q).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn find_first(&self, entity: &str, spec: &QuerySpec) -> Result<Option<Value>, BackendError> {
        let entity = self.entity(entity)?;
        let spec = QuerySpec {
            take: Some(1),
            ..spec.clone()
        };
        let q = self.compiler().select(entity, &spec);
        let row = query(&q).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| row_to_json(&r)))
    }

    async fn create(&self, entity: &str, payload: &MutationPayload) -> Result<Value, BackendError> {
        let entity = self.entity(entity)?;
        self.write(entity, None, payload).await
    }

    async fn update(&self, entity: &str, filter: &Filter, payload: &MutationPayload) -> Result<Value, BackendError> {
        let entity = self.entity(entity)?;
        self.write(entity, Some(filter), payload).await
    }

    async fn delete(&self, entity: &str, filter: &Filter) -> Result<Value, BackendError> {
        let entity = self.entity(entity)?;
        let q = self.compiler().delete(entity, filter);
        let row = query(&q)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BackendError::not_found("Record to delete does not exist."))?;
        Ok(row_to_json(&row))
    }
}

fn row_to_json(row: &PgRow) -> Value {
    let mut map = Map::new();
    for (i, col) in row.columns().iter().enumerate() {
        map.insert(col.name().to_string(), cell_to_value(row, i, col.type_info().name()));
    }
    Value::Object(map)
}

fn get<'r, T>(row: &'r PgRow, index: usize) -> Option<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get::<Option<T>, _>(index).ok().flatten()
}

fn float(n: f64) -> Value {
    serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

/// Decode one cell by its Postgres type name. Unknown types are read as text.
fn cell_to_value(row: &PgRow, index: usize, type_name: &str) -> Value {
    let value = match type_name {
        "INT2" => get::<i16>(row, index).map(Value::from),
        "INT4" => get::<i32>(row, index).map(Value::from),
        "INT8" => get::<i64>(row, index).map(Value::from),
        "FLOAT4" => get::<f32>(row, index).map(|n| float(n as f64)),
        "FLOAT8" => get::<f64>(row, index).map(float),
        "BOOL" => get::<bool>(row, index).map(Value::Bool),
        "UUID" => get::<uuid::Uuid>(row, index).map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, index).map(|d| Value::String(d.to_rfc3339())),
        "TIMESTAMP" => get::<chrono::NaiveDateTime>(row, index)
            .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "DATE" => get::<chrono::NaiveDate>(row, index).map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        "JSON" | "JSONB" => get::<Value>(row, index),
        "TEXT[]" | "VARCHAR[]" => get::<Vec<String>>(row, index).map(Value::from),
        "INT4[]" => get::<Vec<i32>>(row, index).map(Value::from),
        "INT8[]" => get::<Vec<i64>>(row, index).map(Value::from),
        _ => get::<String>(row, index).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}
