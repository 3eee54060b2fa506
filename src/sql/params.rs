//! Convert serde_json::Value to values sqlx can bind.

use crate::schema::FieldType;
use crate::sql::builder::quoted;
use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

/// A value bound to a PostgreSQL statement. Placeholders carry an explicit cast
/// (see [`pg_cast`]), so the declared type only has to be one Postgres can cast from.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Json(Value),
    /// Scalar list column value; elements travel as text and are cast by the placeholder.
    TextArray(Vec<String>),
}

impl PgBindValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => PgBindValue::I64(i),
                None => PgBindValue::F64(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => PgBindValue::String(s.clone()),
            Value::Array(_) | Value::Object(_) => PgBindValue::Json(v.clone()),
        }
    }

    /// Like [`from_json`](Self::from_json), but arrays become Postgres arrays.
    pub fn list_from_json(v: &Value) -> Self {
        match v {
            Value::Array(items) => PgBindValue::TextArray(items.iter().map(text_of).collect()),
            other => Self::from_json(other),
        }
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cast applied to a placeholder bound against a column of this type.
/// Native types are cast to their own (quoted, schema-qualified) name.
pub fn pg_cast(field_type: &FieldType) -> Option<String> {
    let cast = match field_type {
        FieldType::String => "text",
        FieldType::Int | FieldType::BigInt => "int8",
        FieldType::Float => "float8",
        FieldType::Decimal => "numeric",
        FieldType::Boolean => "boolean",
        FieldType::DateTime => "timestamptz",
        FieldType::Json => "jsonb",
        FieldType::Uuid => "uuid",
        FieldType::Native(name) => return Some(name.split('.').map(quoted).collect::<Vec<_>>().join(".")),
        FieldType::Bytes | FieldType::Model(_) => return None,
    };
    Some(cast.to_string())
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            PgBindValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf),
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf),
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf),
            PgBindValue::String(s) => <String as Encode<Postgres>>::encode_by_ref(s, buf),
            PgBindValue::Json(v) => <Value as Encode<Postgres>>::encode_by_ref(v, buf),
            PgBindValue::TextArray(items) => <Vec<String> as Encode<Postgres>>::encode_by_ref(items, buf),
        }
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::String(_) => <String as Type<Postgres>>::type_info(),
            PgBindValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            PgBindValue::I64(_) => <i64 as Type<Postgres>>::type_info(),
            PgBindValue::F64(_) => <f64 as Type<Postgres>>::type_info(),
            PgBindValue::Json(_) => <Value as Type<Postgres>>::type_info(),
            PgBindValue::TextArray(_) => <Vec<String> as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        <String as Type<Postgres>>::type_info()
    }
}
