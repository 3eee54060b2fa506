//! Standard response envelope: `{ data, count? }`.

use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Envelope {
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

impl Envelope {
    pub fn one(data: Value) -> Self {
        Envelope { data, count: None }
    }

    pub fn many(rows: Vec<Value>, count: u64) -> Self {
        Envelope {
            data: Value::Array(rows),
            count: Some(count),
        }
    }
}

pub fn success(envelope: Envelope) -> (StatusCode, Json<Envelope>) {
    (StatusCode::OK, Json(envelope))
}

pub fn created(envelope: Envelope) -> (StatusCode, Json<Envelope>) {
    (StatusCode::CREATED, Json(envelope))
}
