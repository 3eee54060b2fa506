//! Entity handlers: bind HTTP requests to the facade registered for the path segment.

use crate::error::AppError;
use crate::facade::{CrudRequest, Operation};
use crate::query::QueryParams;
use crate::response::{created, success, Envelope};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::Value;

fn body_object(value: Value) -> Result<Value, AppError> {
    match value {
        Value::Object(_) => Ok(value),
        _ => Err(AppError::BadRequest("body must be a JSON object".into())),
    }
}

async fn dispatch(state: &AppState, path_segment: &str, op: Operation, request: CrudRequest) -> Result<Envelope, AppError> {
    let facade = state.registry.resolve(path_segment, op)?;
    facade.dispatch(op, request).await
}

pub async fn list(
    State(state): State<AppState>,
    Path(path_segment): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let request = CrudRequest {
        query: QueryParams::from_pairs(pairs),
        ..Default::default()
    };
    Ok(success(dispatch(&state, &path_segment, Operation::All, request).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Path(path_segment): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let request = CrudRequest {
        body: Some(body_object(body)?),
        ..Default::default()
    };
    Ok(created(dispatch(&state, &path_segment, Operation::Create, request).await?))
}

pub async fn read(
    State(state): State<AppState>,
    Path((path_segment, id)): Path<(String, String)>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let request = CrudRequest {
        id: Some(id),
        query: QueryParams::from_pairs(pairs),
        body: None,
    };
    Ok(success(dispatch(&state, &path_segment, Operation::Get, request).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path((path_segment, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let request = CrudRequest {
        id: Some(id),
        body: Some(body_object(body)?),
        ..Default::default()
    };
    Ok(success(dispatch(&state, &path_segment, Operation::Update, request).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path((path_segment, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let request = CrudRequest {
        id: Some(id),
        ..Default::default()
    };
    Ok(success(dispatch(&state, &path_segment, Operation::Delete, request).await?))
}

pub async fn update_metas(
    State(state): State<AppState>,
    Path((path_segment, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let request = CrudRequest {
        id: Some(id),
        body: Some(body_object(body)?),
        ..Default::default()
    };
    Ok(success(dispatch(&state, &path_segment, Operation::UpdateMetas, request).await?))
}
