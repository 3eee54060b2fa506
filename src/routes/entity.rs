//! Entity CRUD routes. Parameterized paths; handlers resolve the facade by path segment.

use crate::handlers::entity::{create, delete as delete_handler, list, read, update, update_metas};
use crate::state::AppState;
use axum::{routing::get, routing::patch, Router};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;

pub fn entity_routes(state: AppState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/:path_segment", get(list).post(create))
        .route(
            "/:path_segment/:id",
            get(read).patch(update).delete(delete_handler),
        )
        .route("/:path_segment/:id/metas", patch(update_metas))
        .layer(ServiceBuilder::new().layer(RequestBodyLimitLayer::new(body_limit_bytes)))
        .with_state(state)
}
